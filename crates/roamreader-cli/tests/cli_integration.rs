use std::ffi::OsStr;
use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use serde_json::Value;
use tempfile::TempDir;

const EXPORT: &str = r#"{
    "timelineObjects": [
        {"placeVisit": {
            "location": {"address": "Pike Place Market, Seattle, Washington, 98101", "latitudeE7": 476097000, "longitudeE7": -1223422000},
            "duration": {"startTimestamp": "2021-09-04T17:00:00.000Z", "endTimestamp": "2021-09-04T18:20:00.000Z"}
        }},
        {"activitySegment": {
            "startLocation": {"latitudeE7": 476097000, "longitudeE7": -1223422000},
            "endLocation": {"latitudeE7": 476205000, "longitudeE7": -1223493000},
            "duration": {"startTimestamp": "2021-09-04T18:20:00Z", "endTimestamp": "2021-09-04T18:40:00Z"},
            "activityType": "WALKING",
            "distance": 1450
        }},
        {"placeVisit": {
            "location": {"address": "Granville Island, Vancouver, British Columbia, Canada"},
            "duration": {"startTimestamp": "2021-09-06T10:00:00Z", "endTimestamp": "2021-09-06T12:00:00Z"}
        }}
    ]
}"#;

fn run_roamreader<I, S>(db: &Path, args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new(env!("CARGO_BIN_EXE_roamreader"))
        .arg("--db")
        .arg(db)
        .args(args)
        .env_remove("ROAMREADER_DB")
        .env_remove("OPENAI_API_KEY")
        .env("RUST_LOG", "off")
        .output()
        .unwrap_or_else(|err| panic!("failed to execute roamreader binary: {err}"))
}

fn run_json<I, S>(db: &Path, args: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_roamreader(db, args);
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!(
            "roamreader command failed (status={}):\nstdout:\n{}\nstderr:\n{}",
            output.status, stdout, stderr
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let value: Value = serde_json::from_str(&stdout)
        .unwrap_or_else(|err| panic!("stdout is not valid JSON: {err}\nstdout:\n{stdout}"));
    assert_eq!(value["contract_version"], "cli.v1");
    value
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap_or_else(|| panic!("path should be valid UTF-8: {}", path.display()))
}

struct Fixture {
    _dir: TempDir,
    db: std::path::PathBuf,
}

fn ingested_fixture() -> Fixture {
    let dir = TempDir::new().unwrap_or_else(|err| panic!("failed to create temp dir: {err}"));
    let exports = dir.path().join("Semantic Location History/2021");
    fs::create_dir_all(&exports).unwrap_or_else(|err| panic!("failed to create exports: {err}"));
    fs::write(exports.join("2021_SEPTEMBER.json"), EXPORT)
        .unwrap_or_else(|err| panic!("failed to write export: {err}"));
    fs::write(exports.join("broken.json"), "{\"timelineObjects\": [")
        .unwrap_or_else(|err| panic!("failed to write export: {err}"));

    let db = dir.path().join("history.sqlite3");
    let report = run_json(&db, ["ingest", "--root", path_str(dir.path())]);
    assert_eq!(report["files_seen"], 2);
    assert_eq!(report["files_ingested"], 1);
    assert_eq!(report["record_count"], 3);
    assert_eq!(report["cancelled"], false);
    assert_eq!(report["failures"][0]["kind"], "json");

    Fixture { _dir: dir, db }
}

#[test]
fn db_migrate_and_stats_on_fresh_store() {
    let dir = TempDir::new().unwrap_or_else(|err| panic!("failed to create temp dir: {err}"));
    let db = dir.path().join("fresh.sqlite3");

    let migrate = run_json(&db, ["db", "migrate"]);
    assert_eq!(migrate["migrated"], false);

    let stats = run_json(&db, ["db", "stats"]);
    assert_eq!(stats["counts"]["place_visits"], 0);
    assert_eq!(stats["counts"]["activity_segments"], 0);
    assert_eq!(stats["tables"][0]["table"], "place_visits");
}

#[test]
fn ingest_then_query_structured_and_raw() {
    let fixture = ingested_fixture();

    let stats = run_json(&fixture.db, ["db", "stats"]);
    assert_eq!(stats["counts"]["place_visits"], 2);
    assert_eq!(stats["counts"]["activity_segments"], 1);

    let on_date = run_json(&fixture.db, ["query", "intent", "date", "2021-09-04"]);
    assert_eq!(on_date["rows"][0][0], "Pike Place Market, Seattle, Washington, 98101");
    assert_eq!(on_date["rows"][0][3], 80);

    let walking = run_json(&fixture.db, ["query", "intent", "travel-mode", "--mode", "WALKING"]);
    assert_eq!(walking["rows"][0][2], 1450);

    let raw = run_json(
        &fixture.db,
        ["query", "sql", "SELECT address FROM place_visits ORDER BY address", "--max-rows", "1"],
    );
    assert_eq!(raw["rows"].as_array().map(Vec::len), Some(1));
    assert_eq!(raw["truncated"], true);
}

#[test]
fn visited_and_places_report_derived_regions() {
    let fixture = ingested_fixture();

    let countries = run_json(&fixture.db, ["visited"]);
    assert_eq!(countries["text"], "Countries visited: Canada, United States");

    let states = run_json(&fixture.db, ["visited", "--level", "states"]);
    assert_eq!(states["values"], serde_json::json!(["British Columbia", "Washington"]));

    let places = run_json(&fixture.db, ["places", "Washington"]);
    assert_eq!(places["places"].as_array().map(Vec::len), Some(1));
    assert_eq!(places["places"][0]["latitude"], 47.6097);

    let blank = run_roamreader(&fixture.db, ["places", "  "]);
    assert!(!blank.status.success());
}

#[test]
fn write_statements_are_refused() {
    let fixture = ingested_fixture();
    let output = run_roamreader(&fixture.db, ["query", "sql", "DELETE FROM place_visits"]);
    assert!(!output.status.success());

    let stats = run_json(&fixture.db, ["db", "stats"]);
    assert_eq!(stats["counts"]["place_visits"], 2);
}

#[test]
fn missing_root_is_fatal() {
    let dir = TempDir::new().unwrap_or_else(|err| panic!("failed to create temp dir: {err}"));
    let db = dir.path().join("history.sqlite3");
    let missing = dir.path().join("does-not-exist");

    let output = run_roamreader(&db, ["ingest", "--root", path_str(&missing)]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("directory not found"), "stderr:\n{stderr}");
}

#[test]
fn ask_requires_an_api_key() {
    let dir = TempDir::new().unwrap_or_else(|err| panic!("failed to create temp dir: {err}"));
    let db = dir.path().join("history.sqlite3");
    let output = run_roamreader(&db, ["ask", "Where did I go?"]);
    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
}
