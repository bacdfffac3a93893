//! Batch ingestion of a location-history export tree.
//!
//! Each export file is one unit of work: it is read, extracted and committed
//! in its own transaction. A bad file is recorded in the report and the walk
//! moves on, so earlier commits are never lost to a later failure.

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use roamreader_core::{extract, parse_document, ExtractError};
use roamreader_store_sqlite::{InsertSummary, SqliteStore};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use walkdir::WalkDir;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),
}

/// Why a single export file was not ingested.
#[derive(Debug, thiserror::Error)]
pub enum FileError {
    #[error("failed to read file: {0}")]
    Read(#[from] io::Error),
    #[error("invalid JSON: {0}")]
    Json(#[source] serde_json::Error),
    #[error("unexpected export structure: {0}")]
    Structure(#[source] ExtractError),
    #[error("failed to store records: {0:#}")]
    Store(anyhow::Error),
}

impl FileError {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Read(_) => "read",
            Self::Json(_) => "json",
            Self::Structure(_) => "structure",
            Self::Store(_) => "store",
        }
    }
}

impl From<ExtractError> for FileError {
    fn from(value: ExtractError) -> Self {
        match value {
            ExtractError::Json(err) => Self::Json(err),
            other => Self::Structure(other),
        }
    }
}

#[derive(Debug)]
pub struct FileFailure {
    pub path: PathBuf,
    pub error: FileError,
}

impl Serialize for FileFailure {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("FileFailure", 3)?;
        state.serialize_field("path", &self.path)?;
        state.serialize_field("kind", self.error.kind())?;
        state.serialize_field("message", &self.error.to_string())?;
        state.end()
    }
}

/// Outcome of one ingestion run.
#[derive(Debug, Serialize)]
pub struct IngestReport {
    pub root: PathBuf,
    pub files_seen: usize,
    pub files_ingested: usize,
    pub inserted: InsertSummary,
    pub failures: Vec<FileFailure>,
    pub cancelled: bool,
}

impl IngestReport {
    fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            files_seen: 0,
            files_ingested: 0,
            inserted: InsertSummary::default(),
            failures: Vec::new(),
            cancelled: false,
        }
    }

    /// Records committed across all successful files.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.inserted.total()
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && !self.cancelled
    }
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// File extension to ingest, without the leading dot.
    pub extension: String,
    pub max_depth: Option<usize>,
    pub follow_links: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self { extension: "json".to_string(), max_depth: None, follow_links: false }
    }
}

/// Cooperative stop signal, checked between files.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Ingest every matching file under `root` into `store`.
///
/// Files are visited in filesystem traversal order, which is not guaranteed
/// to be stable across platforms or runs.
///
/// # Errors
/// Returns [`IngestError::DirectoryNotFound`] when `root` is not an existing
/// directory. Per-file problems are reported in [`IngestReport::failures`].
pub fn ingest_directory(
    store: &mut SqliteStore,
    root: &Path,
    options: &IngestOptions,
    cancel: &CancellationToken,
) -> Result<IngestReport, IngestError> {
    if !root.is_dir() {
        return Err(IngestError::DirectoryNotFound(root.to_path_buf()));
    }

    tracing::info!(root = %root.display(), "starting ingestion");
    let mut report = IngestReport::new(root);

    let mut walker = WalkDir::new(root).follow_links(options.follow_links);
    if let Some(depth) = options.max_depth {
        walker = walker.max_depth(depth);
    }

    for entry in walker {
        if cancel.is_cancelled() {
            tracing::warn!(files_ingested = report.files_ingested, "ingestion cancelled");
            report.cancelled = true;
            break;
        }

        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let path = err.path().map_or_else(|| root.to_path_buf(), Path::to_path_buf);
                let message = err.to_string();
                let error = err.into_io_error().unwrap_or_else(|| io::Error::other(message));
                tracing::warn!(path = %path.display(), %error, "failed to walk directory entry");
                report.failures.push(FileFailure { path, error: FileError::Read(error) });
                continue;
            }
        };

        if !entry.file_type().is_file() || !has_extension(entry.path(), &options.extension) {
            continue;
        }

        report.files_seen += 1;
        let path = entry.into_path();
        match ingest_file(store, &path) {
            Ok(summary) => {
                tracing::info!(
                    path = %path.display(),
                    place_visits = summary.place_visits,
                    activity_segments = summary.activity_segments,
                    "committed export file"
                );
                report.files_ingested += 1;
                report.inserted.add(summary);
            }
            Err(error) => {
                tracing::warn!(path = %path.display(), kind = error.kind(), %error, "skipping export file");
                report.failures.push(FileFailure { path, error });
            }
        }
    }

    tracing::info!(
        files_ingested = report.files_ingested,
        files_failed = report.failures.len(),
        records = report.record_count(),
        "ingestion finished"
    );
    Ok(report)
}

/// Read, extract and commit a single export file.
///
/// # Errors
/// Returns a [`FileError`] naming the stage that failed; nothing from this
/// file is committed in that case.
pub fn ingest_file(store: &mut SqliteStore, path: &Path) -> Result<InsertSummary, FileError> {
    let text = read_export(path)?;
    let document = parse_document(&text)?;
    let records = extract(&document)?;
    store.insert_records(records).map_err(FileError::Store)
}

/// Decode an export file as UTF-8, dropping a leading byte-order mark and
/// replacing malformed sequences.
///
/// # Errors
/// Returns the underlying I/O error when the file cannot be read.
pub fn read_export(path: &Path) -> io::Result<String> {
    let bytes = fs::read(path)?;
    let (text, _) = encoding_rs::UTF_8.decode_with_bom_removal(&bytes);
    Ok(text.into_owned())
}

fn has_extension(path: &Path, extension: &str) -> bool {
    if path.extension().and_then(OsStr::to_str) == Some(extension) {
        return true;
    }
    // a bare `.json` has no extension as far as `Path` is concerned
    path.file_name().and_then(OsStr::to_str).and_then(|name| name.strip_prefix('.'))
        == Some(extension)
}
