use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use roamreader_api::{
    CancellationToken, ChatCompletionsModel, IngestOptions, RoamReaderApi, DEFAULT_ENDPOINT,
    DEFAULT_MODEL,
};
use roamreader_core::{Intent, SummaryLevel, DEFAULT_MAX_ROWS};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

const CLI_CONTRACT_VERSION: &str = "cli.v1";
const DEFAULT_LOG_FILTER: &str = "roamreader=info";

#[derive(Debug, Parser)]
#[command(name = "roamreader")]
#[command(about = "Location history ingestion and query CLI")]
struct Cli {
    #[arg(long, env = "ROAMREADER_DB", default_value = "./roamreader.sqlite3")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    Ingest(IngestArgs),
    Query {
        #[command(subcommand)]
        command: QueryCommand,
    },
    Ask(AskArgs),
    Visited(VisitedArgs),
    Places(PlacesArgs),
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    Migrate,
    Stats,
}

#[derive(Debug, Args)]
struct IngestArgs {
    #[arg(long)]
    root: PathBuf,
    #[arg(long, default_value = "json")]
    extension: String,
    #[arg(long)]
    max_depth: Option<usize>,
    #[arg(long)]
    follow_links: bool,
}

#[derive(Debug, Subcommand)]
enum QueryCommand {
    Sql(QuerySqlArgs),
    Intent {
        #[command(subcommand)]
        intent: IntentCommand,
        #[arg(long, global = true, default_value_t = DEFAULT_MAX_ROWS)]
        max_rows: usize,
    },
}

#[derive(Debug, Args)]
struct QuerySqlArgs {
    sql: String,
    #[arg(long, default_value_t = DEFAULT_MAX_ROWS)]
    max_rows: usize,
}

#[derive(Debug, Subcommand)]
enum IntentCommand {
    Date { date: String },
    Duration { place: String },
    List { area: String },
    Summary {
        #[arg(value_enum)]
        level: LevelArg,
    },
    TravelMode {
        #[arg(long)]
        mode: Option<String>,
    },
}

#[derive(Debug, Args)]
struct AskArgs {
    question: String,
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: String,
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,
    #[arg(long, default_value = DEFAULT_ENDPOINT)]
    endpoint: String,
    #[arg(long, default_value_t = DEFAULT_MAX_ROWS)]
    max_rows: usize,
}

#[derive(Debug, Args)]
struct VisitedArgs {
    #[arg(long, value_enum, default_value_t = LevelArg::Countries)]
    level: LevelArg,
}

#[derive(Debug, Args)]
struct PlacesArgs {
    location: String,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LevelArg {
    Countries,
    States,
}

impl LevelArg {
    fn into_level(self) -> SummaryLevel {
        match self {
            Self::Countries => SummaryLevel::Countries,
            Self::States => SummaryLevel::States,
        }
    }
}

impl IntentCommand {
    fn into_intent(self) -> Intent {
        match self {
            Self::Date { date } => Intent::Date { date },
            Self::Duration { place } => Intent::Duration { place },
            Self::List { area } => Intent::List { area },
            Self::Summary { level } => Intent::Summary { level: level.into_level() },
            Self::TravelMode { mode } => Intent::TravelMode { mode },
        }
    }
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    tracing::debug!(db = %cli.db.display(), "using store");
    let api = RoamReaderApi::new(cli.db);
    match cli.command {
        Command::Db { command } => run_db(command, &api),
        Command::Ingest(args) => run_ingest(args, &api),
        Command::Query { command } => run_query(command, &api),
        Command::Ask(args) => run_ask(args, &api),
        Command::Visited(args) => {
            let summary = api.visited(args.level.into_level())?;
            emit_json(serde_json::to_value(&summary).context("failed to serialize summary")?)
        }
        Command::Places(args) => {
            let places = api.places(&args.location)?;
            emit_json(serde_json::json!({
                "location": args.location,
                "places": places
            }))
        }
    }
}

fn run_db(command: DbCommand, api: &RoamReaderApi) -> Result<()> {
    match command {
        DbCommand::Migrate => {
            let report = api.migrate()?;
            emit_json(serde_json::json!({
                "db": api.db_path(),
                "migrated": report.migrated(),
                "added_columns": report.added_columns
            }))
        }
        DbCommand::Stats => {
            let stats = api.stats()?;
            emit_json(serde_json::to_value(&stats).context("failed to serialize stats")?)
        }
    }
}

fn run_ingest(args: IngestArgs, api: &RoamReaderApi) -> Result<()> {
    let cancel = CancellationToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || handler_token.cancel())
        .context("failed to install Ctrl-C handler")?;

    let options = IngestOptions {
        extension: args.extension.trim_start_matches('.').to_string(),
        max_depth: args.max_depth,
        follow_links: args.follow_links,
    };
    let report = api.ingest(&args.root, &options, &cancel)?;
    let mut value = serde_json::to_value(&report).context("failed to serialize ingest report")?;
    if let Value::Object(object) = &mut value {
        object.insert("record_count".to_string(), Value::from(report.record_count()));
    }
    emit_json(value)
}

fn run_query(command: QueryCommand, api: &RoamReaderApi) -> Result<()> {
    let rows = match command {
        QueryCommand::Sql(args) => api.query_sql(&args.sql, args.max_rows)?,
        QueryCommand::Intent { intent, max_rows } => {
            api.query_intent(&intent.into_intent(), max_rows)?
        }
    };
    emit_json(serde_json::to_value(&rows).context("failed to serialize query rows")?)
}

fn run_ask(args: AskArgs, api: &RoamReaderApi) -> Result<()> {
    let model = ChatCompletionsModel::new(args.endpoint, args.api_key, args.model);
    let answer = api.ask(&model, &args.question, args.max_rows)?;
    emit_json(serde_json::to_value(&answer).context("failed to serialize answer")?)
}
