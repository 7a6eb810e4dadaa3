#![forbid(unsafe_code)]

//! Store administration and maintenance utilities.
//!
//! Every function here opens its own session from a path, so the binary can
//! run them without holding a long-lived handle.

mod checkpoint;
mod repair;
mod stats;
mod util;
mod verify;

/// Folds the write-ahead log back into the database file.
pub use checkpoint::{checkpoint, CheckpointMode, CheckpointReport};

/// Emergency repair of the staging id counter.
pub use repair::{repair_staging_sequence, RepairReport};

/// Row counts, id counter and file sizes.
pub use stats::{stats, FilesystemStats, SequenceStats, StatsReport, TableStats};

/// Consistency checks of the latest projection against history.
pub use verify::{verify, VerifyCounts, VerifyFinding, VerifyLevel, VerifyReport, VerifySeverity};
