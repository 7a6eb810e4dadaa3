use std::path::PathBuf;

use csv::{ReaderBuilder, Trim, WriterBuilder};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::acquisition::{load_observations, LoadOptions, LoadReport};
use crate::meta::retrieve;
use crate::store::{StoreOptions, StoreSession};
use crate::types::{Missingness, ObservationDraft, StoreError};

/// Columns an observation file must carry, in any order.
///
/// `missing_value`, `missing_stderr` and `missing_sample_size` may also be
/// present. When one is absent, its code follows the number: not-missing
/// when the number is present, `Other` when it is empty.
pub const OBSERVATION_COLUMNS: [&str; 10] = [
    "source",
    "signal",
    "time_type",
    "geo_type",
    "geo_value",
    "time_value",
    "issue",
    "value",
    "stderr",
    "sample_size",
];

/// Configuration for importing an observation CSV file.
#[derive(Debug, Clone)]
pub struct ImportConfig {
    /// Path to the database file.
    pub db_path: PathBuf,
    /// Whether to create the database if it doesn't exist.
    pub create_if_missing: bool,
    /// Observation CSV to load.
    pub input: PathBuf,
    /// Batching for the loader.
    pub load: LoadOptions,
}

/// Summary statistics from an import operation.
#[derive(Debug, Clone)]
pub struct ImportSummary {
    /// Records read from the file.
    pub rows_read: u64,
    /// What the loader did with them.
    pub load: LoadReport,
}

/// Configuration for exporting the metadata snapshot to CSV.
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Path to the database file.
    pub db_path: PathBuf,
    /// Destination CSV file.
    pub out: PathBuf,
}

/// Summary statistics from an export operation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExportSummary {
    /// Timestamp of the exported snapshot.
    pub snapshot_timestamp: i64,
    /// Metadata rows written.
    pub rows_exported: u64,
}

/// Error type for CLI import/export operations.
#[derive(Error, Debug)]
pub enum CliError {
    /// Generic error message.
    #[error("{0}")]
    Message(String),
    /// IO error from file operations.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// CSV parsing or writing error.
    #[error(transparent)]
    Csv(#[from] csv::Error),
    /// Store operation error.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<&str> for CliError {
    fn from(value: &str) -> Self {
        CliError::Message(value.to_string())
    }
}

impl From<String> for CliError {
    fn from(value: String) -> Self {
        CliError::Message(value)
    }
}

/// Reads an observation CSV and hands every record to the staging loader.
///
/// The whole file is parsed before the store is opened, so a malformed
/// record never leaves a half-loaded file behind.
pub fn run_import(cfg: &ImportConfig, opts: &StoreOptions) -> Result<ImportSummary, CliError> {
    let drafts = read_observations(&cfg.input)?;
    let rows_read = drafts.len() as u64;
    let store_opts = StoreOptions {
        create_if_missing: cfg.create_if_missing || opts.create_if_missing,
        ..opts.clone()
    };
    let mut session = StoreSession::open(&cfg.db_path, &store_opts)?;
    let load = load_observations(&mut session, drafts, &cfg.load)?;
    info!(
        input = %cfg.input.display(),
        rows_read,
        batches = load.batches,
        "cli.import.completed"
    );
    Ok(ImportSummary { rows_read, load })
}

/// Parses an observation CSV into loader drafts.
pub fn read_observations(path: &std::path::Path) -> Result<Vec<ObservationDraft>, CliError> {
    let mut reader = ReaderBuilder::new().trim(Trim::All).from_path(path)?;
    let headers = reader.headers()?.clone();
    for column in OBSERVATION_COLUMNS {
        if !headers.iter().any(|h| h == column) {
            return Err(CliError::Message(format!(
                "{}: missing column '{column}'",
                path.display()
            )));
        }
    }
    let has = |column: &str| headers.iter().any(|h| h == column);
    let (has_value, has_stderr, has_sample_size) = (
        has("missing_value"),
        has("missing_stderr"),
        has("missing_sample_size"),
    );
    let mut drafts = Vec::new();
    for result in reader.deserialize::<ObservationDraft>() {
        let mut draft = result?;
        if !has_value {
            draft.missing_value = implied_missingness(draft.value);
        }
        if !has_stderr {
            draft.missing_stderr = implied_missingness(draft.stderr);
        }
        if !has_sample_size {
            draft.missing_sample_size = implied_missingness(draft.sample_size);
        }
        drafts.push(draft);
    }
    Ok(drafts)
}

fn implied_missingness(number: Option<f64>) -> Missingness {
    match number {
        Some(_) => Missingness::NotMissing,
        None => Missingness::Other,
    }
}

/// Writes the current metadata snapshot as CSV, one row per group.
pub fn run_export(cfg: &ExportConfig, opts: &StoreOptions) -> Result<ExportSummary, CliError> {
    let session = StoreSession::open(&cfg.db_path, opts)?;
    let snapshot = retrieve(&session)?.ok_or_else(|| {
        CliError::Message("no metadata snapshot stored (run `meta refresh` first)".into())
    })?;
    if let Some(parent) = cfg.out.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = WriterBuilder::new().from_path(&cfg.out)?;
    let mut summary = ExportSummary {
        snapshot_timestamp: snapshot.timestamp(),
        rows_exported: 0,
    };
    for entry in snapshot.entries() {
        writer.serialize(entry)?;
        summary.rows_exported += 1;
    }
    writer.flush()?;
    info!(
        out = %cfg.out.display(),
        rows = summary.rows_exported,
        snapshot = summary.snapshot_timestamp,
        "cli.export.completed"
    );
    Ok(summary)
}
