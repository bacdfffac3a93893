use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use roamreader_core::{
    coordinate_or_zero, validate_limit, validate_read_only_sql, query::escape_like,
    ActivitySegment, PlaceVisit, QueryRows, QueryValue, StructuredQuery, TimelineRecord,
};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params, params_from_iter, Connection, Transaction};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PLACE_VISITS_TABLE: &str = "place_visits";
pub const ACTIVITY_SEGMENTS_TABLE: &str = "activity_segments";

const CREATE_TABLES_SQL: &str = r"
CREATE TABLE IF NOT EXISTS place_visits (
  address TEXT,
  arrival TEXT,
  departure TEXT,
  duration_min INTEGER,
  latitude REAL,
  longitude REAL,
  state TEXT,
  country TEXT,
  visit_date TEXT
);

CREATE TABLE IF NOT EXISTS activity_segments (
  start_time TEXT,
  end_time TEXT,
  start_lat REAL,
  start_lon REAL,
  end_lat REAL,
  end_lon REAL,
  mode_of_travel TEXT,
  distance INTEGER
);
";

/// Columns later pipeline versions added to `place_visits`, with their
/// declarations. Existing rows read the default after the column is added.
const PLACE_VISITS_ADDITIVE_COLUMNS: &[(&str, &str)] = &[
    ("state", "TEXT DEFAULT ''"),
    ("country", "TEXT DEFAULT ''"),
    ("visit_date", "TEXT DEFAULT ''"),
];

const INSERT_PLACE_VISIT_SQL: &str = "INSERT INTO place_visits(
    address, arrival, departure, duration_min, latitude, longitude, state, country, visit_date
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)";

const INSERT_ACTIVITY_SEGMENT_SQL: &str = "INSERT INTO activity_segments(
    start_time, end_time, start_lat, start_lon, end_lat, end_lon, mode_of_travel, distance
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)";

pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaReport {
    pub added_columns: Vec<String>,
}

impl SchemaReport {
    #[must_use]
    pub fn migrated(&self) -> bool {
        !self.added_columns.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InsertSummary {
    pub place_visits: usize,
    pub activity_segments: usize,
}

impl InsertSummary {
    #[must_use]
    pub fn total(&self) -> usize {
        self.place_visits + self.activity_segments
    }

    pub fn add(&mut self, other: Self) {
        self.place_visits += other.place_visits;
        self.activity_segments += other.activity_segments;
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableCounts {
    pub place_visits: i64,
    pub activity_segments: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableSchema {
    pub table: String,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlacePoint {
    pub latitude: f64,
    pub longitude: f64,
    pub address: String,
}

impl SqliteStore {
    /// Open the local location-history store and configure runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Create missing tables, then add any `place_visits` columns an older
    /// store lacks. Safe to run repeatedly; never drops rows.
    ///
    /// # Errors
    /// Returns an error when table creation, inspection or alteration fails.
    pub fn ensure_schema(&mut self) -> Result<SchemaReport> {
        let tx = self.conn.transaction().context("failed to start schema transaction")?;
        tx.execute_batch(CREATE_TABLES_SQL).context("failed to create tables")?;

        let existing = table_columns(&tx, PLACE_VISITS_TABLE)?;
        let mut report = SchemaReport::default();
        for (column, declaration) in PLACE_VISITS_ADDITIVE_COLUMNS {
            if existing.iter().any(|name| name == column) {
                continue;
            }
            tx.execute_batch(&format!(
                "ALTER TABLE {PLACE_VISITS_TABLE} ADD COLUMN {column} {declaration}"
            ))
            .with_context(|| format!("failed to add column {PLACE_VISITS_TABLE}.{column}"))?;
            tracing::info!(table = PLACE_VISITS_TABLE, column, "added missing column");
            report.added_columns.push((*column).to_string());
        }

        tx.commit().context("failed to commit schema transaction")?;
        Ok(report)
    }

    /// Append every record of one export file in a single transaction.
    ///
    /// Any failure rolls back the rows written so far for this call only.
    ///
    /// # Errors
    /// Returns an error when a row cannot be inserted or the commit fails.
    pub fn insert_records<I>(&mut self, records: I) -> Result<InsertSummary>
    where
        I: IntoIterator<Item = TimelineRecord>,
    {
        let tx = self.conn.transaction().context("failed to start transaction")?;
        let summary = Self::insert_all(&tx, records)?;
        tx.commit().context("failed to commit write transaction")?;
        Ok(summary)
    }

    fn insert_all<I>(tx: &Transaction<'_>, records: I) -> Result<InsertSummary>
    where
        I: IntoIterator<Item = TimelineRecord>,
    {
        let mut summary = InsertSummary::default();
        for record in records {
            match record {
                TimelineRecord::PlaceVisit(visit) => {
                    insert_place_visit(tx, &visit)?;
                    summary.place_visits += 1;
                }
                TimelineRecord::ActivitySegment(segment) => {
                    insert_activity_segment(tx, &segment)?;
                    summary.activity_segments += 1;
                }
            }
        }
        Ok(summary)
    }

    /// Row counts of both tables.
    ///
    /// # Errors
    /// Returns an error when either table cannot be counted.
    pub fn counts(&self) -> Result<TableCounts> {
        Ok(TableCounts {
            place_visits: self.count_rows(PLACE_VISITS_TABLE)?,
            activity_segments: self.count_rows(ACTIVITY_SEGMENTS_TABLE)?,
        })
    }

    fn count_rows(&self, table: &str) -> Result<i64> {
        self.conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .with_context(|| format!("failed to count rows in {table}"))
    }

    /// Column names of both tables, in declaration order.
    ///
    /// # Errors
    /// Returns an error when table metadata cannot be read.
    pub fn schema_description(&self) -> Result<Vec<TableSchema>> {
        [PLACE_VISITS_TABLE, ACTIVITY_SEGMENTS_TABLE]
            .into_iter()
            .map(|table| -> Result<TableSchema> {
                Ok(TableSchema {
                    table: table.to_string(),
                    columns: table_columns(&self.conn, table)?,
                })
            })
            .collect()
    }

    /// Run one read-only statement, returning at most `max_rows` rows.
    ///
    /// The SQL text is never rewritten; rows past the bound are not read and
    /// `truncated` reports whether any existed.
    ///
    /// # Errors
    /// Returns an error when the statement is rejected, is not read-only
    /// according to `SQLite`, or fails to execute.
    pub fn query_read_only(&self, query: &StructuredQuery, max_rows: usize) -> Result<QueryRows> {
        let max_rows = validate_limit(max_rows)?;
        let sql = validate_read_only_sql(&query.sql)?;

        let mut stmt = self.conn.prepare(&sql).context("failed to prepare query")?;
        if !stmt.readonly() {
            bail!("statement would modify the store: {sql}");
        }

        let columns = stmt.column_names().into_iter().map(str::to_string).collect::<Vec<_>>();
        let mut rows = stmt
            .query(params_from_iter(query.params.iter().map(sql_value)))
            .context("failed to execute query")?;

        let mut result = QueryRows { columns, ..QueryRows::default() };
        while let Some(row) = rows.next()? {
            if result.rows.len() == max_rows {
                result.truncated = true;
                break;
            }
            let mut cells = Vec::with_capacity(result.columns.len());
            for index in 0..result.columns.len() {
                cells.push(json_value(row.get_ref(index)?));
            }
            result.rows.push(cells);
        }

        Ok(result)
    }

    /// Coordinates and addresses of visits in a state, or whose address
    /// mentions `location`.
    ///
    /// # Errors
    /// Returns an error when `location` is blank or the lookup fails.
    pub fn places_in(&self, location: &str) -> Result<Vec<PlacePoint>> {
        let location = location.trim();
        if location.is_empty() {
            bail!("location is empty");
        }
        let mut stmt = self.conn.prepare(
            "SELECT latitude, longitude, address
             FROM place_visits
             WHERE state = ?1 OR address LIKE ?2 ESCAPE '\\'",
        )?;
        let points = stmt
            .query_map(params![location, format!("%{}%", escape_like(location))], |row| {
                Ok(PlacePoint {
                    latitude: row.get::<_, Option<f64>>(0)?.unwrap_or_default(),
                    longitude: row.get::<_, Option<f64>>(1)?.unwrap_or_default(),
                    address: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("failed to load places for {location}"))?;
        Ok(points)
    }
}

fn insert_place_visit(tx: &Transaction<'_>, visit: &PlaceVisit) -> Result<()> {
    tx.prepare_cached(INSERT_PLACE_VISIT_SQL)?
        .execute(params![
            visit.address,
            visit.arrival,
            visit.departure,
            visit.duration_minutes,
            coordinate_or_zero(visit.latitude),
            coordinate_or_zero(visit.longitude),
            visit.state,
            visit.country,
            visit.visit_date,
        ])
        .context("failed to insert place visit")?;
    Ok(())
}

fn insert_activity_segment(tx: &Transaction<'_>, segment: &ActivitySegment) -> Result<()> {
    tx.prepare_cached(INSERT_ACTIVITY_SEGMENT_SQL)?
        .execute(params![
            segment.start_time,
            segment.end_time,
            coordinate_or_zero(segment.start_latitude),
            coordinate_or_zero(segment.start_longitude),
            coordinate_or_zero(segment.end_latitude),
            coordinate_or_zero(segment.end_longitude),
            segment.mode_of_travel,
            segment.distance,
        ])
        .context("failed to insert activity segment")?;
    Ok(())
}

fn table_exists(conn: &Connection, table_name: &str) -> Result<bool> {
    let exists = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            params![table_name],
            |row| row.get::<_, i64>(0),
        )
        .with_context(|| format!("failed to check if table exists: {table_name}"))?;
    Ok(exists == 1)
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    if !table_exists(conn, table)? {
        return Err(anyhow!("table does not exist: {table}"));
    }

    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .with_context(|| format!("failed to inspect table_info for {table}"))?;
    let mut rows = stmt.query([])?;

    let mut columns = Vec::new();
    while let Some(row) = rows.next()? {
        columns.push(row.get::<_, String>(1)?);
    }
    Ok(columns)
}

fn sql_value(value: &QueryValue) -> SqlValue {
    match value {
        QueryValue::Null => SqlValue::Null,
        QueryValue::Integer(value) => SqlValue::Integer(*value),
        QueryValue::Real(value) => SqlValue::Real(*value),
        QueryValue::Text(value) => SqlValue::Text(value.clone()),
    }
}

fn json_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(value) => Value::from(value),
        ValueRef::Real(value) => serde_json::Number::from_f64(value).map_or(Value::Null, Value::Number),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(format!("<blob {} bytes>", bytes.len())),
    }
}
