use std::path::PathBuf;

use thiserror::Error;

/// Error type shared by every store operation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database file not found and creation was not requested.
    #[error("database not found: {0}")]
    MissingDatabase(PathBuf),
    /// The staging area held rows when a load started.
    #[error("staging area holds {rows} rows; a previous load failed or another load is running")]
    StagingNotEmpty {
        /// Rows observed in the staging area.
        rows: u64,
    },
    /// A draft failed validation at the loader boundary.
    #[error("invalid observation at index {index}: {reason}")]
    InvalidObservation {
        /// Position of the offending draft in the input sequence.
        index: usize,
        /// What was wrong with it.
        reason: String,
    },
    /// Deletion input could not be parsed.
    #[error("invalid deletion input: {0}")]
    InvalidDeletionInput(String),
    /// A stored or supplied value could not be interpreted.
    #[error("invalid value: {0}")]
    InvalidValue(String),
    /// A partial-commit load failed after some batches were already committed.
    #[error("load failed after {committed_batches} committed batches ({committed_rows} rows): {source}")]
    PartialLoad {
        /// Batches committed before the failure.
        committed_batches: usize,
        /// Rows merged by those batches.
        committed_rows: u64,
        /// The failure that stopped the load.
        #[source]
        source: Box<StoreError>,
    },
    /// An aggregation worker failed while summarizing one pair.
    #[error("metadata aggregation failed for ({source_name}, {signal}): {error}")]
    Aggregation {
        /// Source of the failing pair.
        source_name: String,
        /// Signal of the failing pair.
        signal: String,
        /// Underlying failure.
        error: Box<StoreError>,
    },
    /// An aggregation worker thread panicked.
    #[error("metadata worker {0} panicked")]
    WorkerPanicked(String),
    /// SQLite error.
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    /// CSV parsing or writing error.
    #[error(transparent)]
    Csv(#[from] csv::Error),
    /// JSON encoding or decoding error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    pub(crate) fn invalid_value(msg: impl Into<String>) -> Self {
        StoreError::InvalidValue(msg.into())
    }

    pub(crate) fn invalid_observation(index: usize, reason: impl Into<String>) -> Self {
        StoreError::InvalidObservation {
            index,
            reason: reason.into(),
        }
    }
}
