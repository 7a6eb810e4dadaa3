use std::time::Instant;

use rusqlite::{Connection, TransactionBehavior};
use serde::Serialize;
use tracing::{debug, info};

use crate::store::StoreSession;
use crate::types::Result;

// Dimension registration is a left anti-join: staged pairs with no registry row.
const SIGNAL_DIM_ADD_NEW: &str = "
INSERT INTO signal_dim (source, signal)
SELECT DISTINCT sl.source, sl.signal
FROM signal_load sl
    LEFT JOIN signal_dim sd ON sl.source = sd.source AND sl.signal = sd.signal
WHERE sd.source IS NULL";

const GEO_DIM_ADD_NEW: &str = "
INSERT INTO geo_dim (geo_type, geo_value)
SELECT DISTINCT sl.geo_type, sl.geo_value
FROM signal_load sl
    LEFT JOIN geo_dim gd ON sl.geo_type = gd.geo_type AND sl.geo_value = gd.geo_value
WHERE gd.geo_type IS NULL";

const HISTORY_UPSERT: &str = "
INSERT INTO signal_history
    (signal_data_id, signal_key_id, geo_key_id, time_type, time_value, issue, lag,
     value_updated_timestamp, value, stderr, sample_size,
     missing_value, missing_stderr, missing_sample_size)
SELECT
    sl.signal_data_id, sd.signal_key_id, gd.geo_key_id, sl.time_type, sl.time_value, sl.issue,
    sl.lag, sl.value_updated_timestamp, sl.value, sl.stderr, sl.sample_size,
    sl.missing_value, sl.missing_stderr, sl.missing_sample_size
FROM signal_load sl
    JOIN signal_dim sd ON sd.source = sl.source AND sd.signal = sl.signal
    JOIN geo_dim gd ON gd.geo_type = sl.geo_type AND gd.geo_value = sl.geo_value
WHERE sl.signal_data_id <= ?1
ON CONFLICT (signal_key_id, geo_key_id, time_type, time_value, issue) DO UPDATE SET
    signal_data_id = excluded.signal_data_id,
    value_updated_timestamp = excluded.value_updated_timestamp,
    value = excluded.value,
    stderr = excluded.stderr,
    sample_size = excluded.sample_size,
    lag = excluded.lag,
    missing_value = excluded.missing_value,
    missing_stderr = excluded.missing_stderr,
    missing_sample_size = excluded.missing_sample_size";

// Unconditional replace: the loader's correction pass already cleared the
// flag on every staged row that is not the newest issue for its key.
const LATEST_UPSERT: &str = "
INSERT INTO signal_latest
    (signal_data_id, signal_key_id, geo_key_id, time_type, time_value, issue, lag,
     value_updated_timestamp, value, stderr, sample_size,
     missing_value, missing_stderr, missing_sample_size)
SELECT
    sl.signal_data_id, sd.signal_key_id, gd.geo_key_id, sl.time_type, sl.time_value, sl.issue,
    sl.lag, sl.value_updated_timestamp, sl.value, sl.stderr, sl.sample_size,
    sl.missing_value, sl.missing_stderr, sl.missing_sample_size
FROM signal_load sl
    JOIN signal_dim sd ON sd.source = sl.source AND sd.signal = sl.signal
    JOIN geo_dim gd ON gd.geo_type = sl.geo_type AND gd.geo_value = sl.geo_value
WHERE sl.signal_data_id <= ?1 AND sl.is_latest_issue = 1
ON CONFLICT (signal_key_id, geo_key_id, time_type, time_value) DO UPDATE SET
    signal_data_id = excluded.signal_data_id,
    value_updated_timestamp = excluded.value_updated_timestamp,
    value = excluded.value,
    stderr = excluded.stderr,
    sample_size = excluded.sample_size,
    issue = excluded.issue,
    lag = excluded.lag,
    missing_value = excluded.missing_value,
    missing_stderr = excluded.missing_stderr,
    missing_sample_size = excluded.missing_sample_size";

// Targeted delete; resetting the table would rewind the id sequence that
// history and latest share.
const STAGING_DELETE_PROCESSED: &str = "DELETE FROM signal_load WHERE signal_data_id <= ?1";

/// Row counts produced by one merge run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    /// New `(source, signal)` registry entries.
    pub signal_dims_added: u64,
    /// New `(geo_type, geo_value)` registry entries.
    pub geo_dims_added: u64,
    /// History rows inserted or overwritten.
    pub history_upserted: u64,
    /// Latest rows inserted or replaced.
    pub latest_upserted: u64,
    /// Staging rows removed.
    pub staging_cleared: u64,
}

/// Promotes the staging area into the registry, history and latest tables.
///
/// Runs in its own immediate transaction; an empty staging area is a no-op.
pub fn merge_staged(session: &mut StoreSession) -> Result<MergeReport> {
    let tx = session
        .conn_mut()
        .transaction_with_behavior(TransactionBehavior::Immediate)?;
    let report = merge_in(&tx)?;
    tx.commit()?;
    Ok(report)
}

/// Merge steps against a connection whose transaction the caller owns.
pub(crate) fn merge_in(conn: &Connection) -> Result<MergeReport> {
    let mut report = MergeReport::default();
    let max_id: Option<i64> =
        conn.query_row("SELECT MAX(signal_data_id) FROM signal_load", [], |row| {
            row.get(0)
        })?;
    let Some(max_id) = max_id else {
        debug!("acquisition.merge.empty");
        return Ok(report);
    };

    let start = Instant::now();
    report.signal_dims_added = run_step(conn, "signal_dim_add_new", SIGNAL_DIM_ADD_NEW, None)?;
    report.geo_dims_added = run_step(conn, "geo_dim_add_new", GEO_DIM_ADD_NEW, None)?;
    report.history_upserted = run_step(conn, "history_upsert", HISTORY_UPSERT, Some(max_id))?;
    report.latest_upserted = run_step(conn, "latest_upsert", LATEST_UPSERT, Some(max_id))?;
    report.staging_cleared = run_step(
        conn,
        "staging_delete_processed",
        STAGING_DELETE_PROCESSED,
        Some(max_id),
    )?;

    info!(
        signal_dims_added = report.signal_dims_added,
        geo_dims_added = report.geo_dims_added,
        history_upserted = report.history_upserted,
        latest_upserted = report.latest_upserted,
        staging_cleared = report.staging_cleared,
        duration_ms = start.elapsed().as_secs_f64() * 1_000.0,
        "acquisition.merge.completed"
    );
    Ok(report)
}

fn run_step(conn: &Connection, step: &'static str, sql: &str, max_id: Option<i64>) -> Result<u64> {
    let start = Instant::now();
    let rows = match max_id {
        Some(id) => conn.execute(sql, [id])?,
        None => conn.execute(sql, [])?,
    };
    debug!(
        step,
        rows,
        duration_ms = start.elapsed().as_secs_f64() * 1_000.0,
        "acquisition.merge.step"
    );
    Ok(rows as u64)
}
