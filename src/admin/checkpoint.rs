use std::path::Path;
use std::time::Instant;

use serde::Serialize;
use tracing::info;

use crate::store::{StoreOptions, StoreSession};
use crate::types::Result;

/// How aggressively the WAL is folded back into the database file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointMode {
    /// Copy what can be copied without waiting on readers.
    Passive,
    /// Wait for readers, copy everything and truncate the WAL to zero bytes.
    #[default]
    Truncate,
}

impl CheckpointMode {
    fn pragma(self) -> &'static str {
        match self {
            CheckpointMode::Passive => "PRAGMA wal_checkpoint(PASSIVE)",
            CheckpointMode::Truncate => "PRAGMA wal_checkpoint(TRUNCATE)",
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            CheckpointMode::Passive => "passive",
            CheckpointMode::Truncate => "truncate",
        }
    }
}

/// Report generated after executing a checkpoint operation.
#[derive(Debug, Clone, Serialize)]
pub struct CheckpointReport {
    /// The checkpoint mode used.
    pub mode: String,
    /// Duration of the checkpoint operation in milliseconds.
    pub duration_ms: f64,
    /// True when a reader or writer prevented a complete checkpoint.
    pub busy: bool,
    /// Frames in the WAL when the checkpoint ran.
    pub wal_frames: i64,
    /// Frames copied back into the database file.
    pub checkpointed_frames: i64,
}

/// Executes a WAL checkpoint on the store at `path`.
///
/// # Errors
///
/// Returns an error if the database cannot be opened or the checkpoint fails.
pub fn checkpoint(
    path: impl AsRef<Path>,
    opts: &StoreOptions,
    mode: CheckpointMode,
) -> Result<CheckpointReport> {
    let session = StoreSession::open(path.as_ref(), opts)?;
    let start = Instant::now();
    let (busy, wal_frames, checkpointed_frames): (i64, i64, i64) =
        session
            .conn()
            .query_row(mode.pragma(), [], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?;
    let report = CheckpointReport {
        mode: mode.as_str().to_string(),
        duration_ms: start.elapsed().as_secs_f64() * 1_000.0,
        busy: busy != 0,
        wal_frames,
        checkpointed_frames,
    };
    info!(
        mode = %report.mode,
        busy = report.busy,
        wal_frames,
        checkpointed_frames,
        duration_ms = report.duration_ms,
        "admin.checkpoint.completed"
    );
    Ok(report)
}
