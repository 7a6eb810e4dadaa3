use std::path::Path;

use rusqlite::TransactionBehavior;
use serde::Serialize;
use tracing::{info, warn};

use crate::admin::util::{max_stored_id, staging_sequence, STAGING_SEQUENCE};
use crate::store::{StoreOptions, StoreSession};
use crate::types::Result;

/// Report generated by [`repair_staging_sequence`].
#[derive(Debug, Clone, Serialize)]
pub struct RepairReport {
    /// Staged rows discarded.
    pub staging_cleared: u64,
    /// Counter value found before the repair.
    pub previous_sequence: Option<i64>,
    /// Counter value after the repair.
    pub sequence: i64,
    /// True when the counter had to be moved forward.
    pub advanced: bool,
}

/// Clears the staging area and moves its id counter past every stored id.
///
/// Needed after the staging table was reset by hand: a rewound counter would
/// hand out ids that history and latest already use, and the next merge
/// would overwrite unrelated rows.
pub fn repair_staging_sequence(
    path: impl AsRef<Path>,
    opts: &StoreOptions,
) -> Result<RepairReport> {
    let mut session = StoreSession::open(path.as_ref(), opts)?;
    let tx = session
        .conn_mut()
        .transaction_with_behavior(TransactionBehavior::Immediate)?;

    let staging_cleared = tx.execute("DELETE FROM signal_load", [])? as u64;
    let previous_sequence = staging_sequence(&tx)?;
    let floor = max_stored_id(&tx)?.unwrap_or(0);
    let current = previous_sequence.unwrap_or(0);
    let advanced = current < floor;
    if advanced {
        let updated = tx.execute(
            "UPDATE sqlite_sequence SET seq = ?1 WHERE name = ?2",
            rusqlite::params![floor, STAGING_SEQUENCE],
        )?;
        if updated == 0 {
            tx.execute(
                "INSERT INTO sqlite_sequence (name, seq) VALUES (?1, ?2)",
                rusqlite::params![STAGING_SEQUENCE, floor],
            )?;
        }
    }
    tx.commit()?;

    let report = RepairReport {
        staging_cleared,
        previous_sequence,
        sequence: current.max(floor),
        advanced,
    };
    if advanced {
        warn!(
            staging_cleared,
            previous = current,
            sequence = report.sequence,
            "admin.repair.sequence_advanced"
        );
    } else {
        info!(
            staging_cleared,
            sequence = report.sequence,
            "admin.repair.completed"
        );
    }
    Ok(report)
}
