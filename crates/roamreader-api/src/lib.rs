//! Application surface over the location-history store: ingestion,
//! structured queries and question answering.

use std::path::{Path, PathBuf};

use anyhow::Result;
use roamreader_core::{Answer, Intent, QueryRows, StructuredQuery, SummaryLevel, MAX_ROWS_CEILING};
use roamreader_store_sqlite::{PlacePoint, SchemaReport, SqliteStore, TableCounts, TableSchema};
use serde::{Deserialize, Serialize};

pub mod chat;
pub mod ingest;
pub mod prompts;
pub mod shell;

pub use chat::{parse_plan, ChatCompletionsModel, DEFAULT_ENDPOINT, DEFAULT_MODEL};
pub use ingest::{
    ingest_directory, ingest_file, read_export, CancellationToken, FileError, FileFailure,
    IngestError, IngestOptions, IngestReport,
};
pub use shell::{answer, LanguageModel, NO_RESULTS};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreStats {
    pub counts: TableCounts,
    pub tables: Vec<TableSchema>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VisitedSummary {
    pub level: SummaryLevel,
    pub values: Vec<String>,
    pub text: String,
    pub truncated: bool,
}

#[derive(Debug, Clone)]
pub struct RoamReaderApi {
    db_path: PathBuf,
}

impl RoamReaderApi {
    #[must_use]
    pub fn new(db_path: PathBuf) -> Self {
        Self { db_path }
    }

    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Open the store, bringing its schema up to date first.
    fn open_store(&self) -> Result<SqliteStore> {
        let mut store = SqliteStore::open(&self.db_path)?;
        store.ensure_schema()?;
        Ok(store)
    }

    /// Create or upgrade the store schema.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or migrated.
    pub fn migrate(&self) -> Result<SchemaReport> {
        let mut store = SqliteStore::open(&self.db_path)?;
        store.ensure_schema()
    }

    /// Row counts and table layout.
    ///
    /// # Errors
    /// Returns an error when the store cannot be opened or inspected.
    pub fn stats(&self) -> Result<StoreStats> {
        let store = self.open_store()?;
        Ok(StoreStats { counts: store.counts()?, tables: store.schema_description()? })
    }

    /// Ingest every export under `root`.
    ///
    /// # Errors
    /// Returns an error when the store cannot be opened or `root` is not a
    /// directory. Per-file failures are carried in the report.
    pub fn ingest(
        &self,
        root: &Path,
        options: &IngestOptions,
        cancel: &CancellationToken,
    ) -> Result<IngestReport> {
        let mut store = self.open_store()?;
        Ok(ingest_directory(&mut store, root, options, cancel)?)
    }

    /// Run one read-only SQL statement.
    ///
    /// # Errors
    /// Returns an error when the statement is rejected or fails.
    pub fn query_sql(&self, sql: &str, max_rows: usize) -> Result<QueryRows> {
        let store = self.open_store()?;
        store.query_read_only(&StructuredQuery::raw(sql)?, max_rows)
    }

    /// Run a known intent without involving a language model.
    ///
    /// # Errors
    /// Returns an error when the query fails.
    pub fn query_intent(&self, intent: &Intent, max_rows: usize) -> Result<QueryRows> {
        let store = self.open_store()?;
        store.query_read_only(&intent.to_query(), max_rows)
    }

    /// Distinct countries or states visited, with a prose rendering.
    ///
    /// # Errors
    /// Returns an error when the query fails.
    pub fn visited(&self, level: SummaryLevel) -> Result<VisitedSummary> {
        let rows = self.query_intent(&Intent::Summary { level }, MAX_ROWS_CEILING)?;
        if rows.truncated {
            tracing::warn!(level = level.as_str(), shown = rows.rows.len(), "summary truncated");
        }
        Ok(VisitedSummary {
            level,
            text: level.describe_rows(&rows),
            values: rows.first_column_text(),
            truncated: rows.truncated,
        })
    }

    /// Coordinates of visits matching `location`, for map rendering.
    ///
    /// # Errors
    /// Returns an error when the lookup fails.
    pub fn places(&self, location: &str) -> Result<Vec<PlacePoint>> {
        let store = self.open_store()?;
        store.places_in(location)
    }

    /// Answer a natural-language question.
    ///
    /// # Errors
    /// Returns an error when the model or the planned query fails.
    pub fn ask(&self, model: &dyn LanguageModel, question: &str, max_rows: usize) -> Result<Answer> {
        let store = self.open_store()?;
        answer(&store, model, question, max_rows)
    }
}
