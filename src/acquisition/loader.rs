use std::ops::Add;
use std::time::Instant;

use rusqlite::{params, Connection, TransactionBehavior};
use serde::Serialize;
use tracing::{error, info};

use super::merge::{merge_in, MergeReport};
use crate::store::{count_rows, unix_now, StoreSession, Table};
use crate::types::{ObservationDraft, Result, SignalObservation, StoreError};

/// Default rows per batch; large enough that most loads are a single batch.
pub const DEFAULT_BATCH_SIZE: usize = 1 << 20;

const INSERT_INTO_LOADER: &str = "
INSERT INTO signal_load
    (source, signal, time_type, geo_type, time_value, geo_value,
     value_updated_timestamp, value, stderr, sample_size, issue, lag,
     is_latest_issue, missing_value, missing_stderr, missing_sample_size)
VALUES
    (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 1, ?13, ?14, ?15)";

// A staged row that is older than the latest row for its key is stale on arrival.
const CLEAR_STALE_AGAINST_LATEST: &str = "
UPDATE signal_load SET is_latest_issue = 0
FROM signal_latest_v l
WHERE signal_load.source = l.source
    AND signal_load.signal = l.signal
    AND signal_load.time_type = l.time_type
    AND signal_load.geo_type = l.geo_type
    AND signal_load.geo_value = l.geo_value
    AND signal_load.time_value = l.time_value
    AND signal_load.issue < l.issue";

// Two issues of one key in the same batch: only the newest may win.
const CLEAR_STALE_WITHIN_BATCH: &str = "
UPDATE signal_load SET is_latest_issue = 0
WHERE is_latest_issue = 1 AND EXISTS (
    SELECT 1 FROM signal_load newer
    WHERE newer.source = signal_load.source
        AND newer.signal = signal_load.signal
        AND newer.time_type = signal_load.time_type
        AND newer.geo_type = signal_load.geo_type
        AND newer.time_value = signal_load.time_value
        AND newer.geo_value = signal_load.geo_value
        AND newer.issue > signal_load.issue)";

/// Tuning for [`load_observations`].
#[derive(Clone, Debug)]
pub struct LoadOptions {
    /// Rows staged and merged per batch. Zero means one batch for everything.
    pub batch_size: usize,
    /// Commit after every batch instead of once at the end.
    ///
    /// Batches committed before a failure stay committed; the failure is
    /// reported as [`StoreError::PartialLoad`] so the caller can reconcile.
    pub commit_partial: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            commit_partial: false,
        }
    }
}

/// Row count that the store may be unable to report.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AffectedRows {
    /// The store reported this many rows.
    Exact(u64),
    /// At least one batch did not report a count.
    Unknown,
}

impl AffectedRows {
    /// The count, when known.
    pub fn exact(self) -> Option<u64> {
        match self {
            AffectedRows::Exact(n) => Some(n),
            AffectedRows::Unknown => None,
        }
    }
}

impl Add for AffectedRows {
    type Output = AffectedRows;

    fn add(self, rhs: AffectedRows) -> AffectedRows {
        match (self, rhs) {
            (AffectedRows::Exact(a), AffectedRows::Exact(b)) => AffectedRows::Exact(a + b),
            _ => AffectedRows::Unknown,
        }
    }
}

/// Outcome of a completed load.
#[derive(Clone, Debug, Serialize)]
pub struct LoadReport {
    /// Batches staged and merged.
    pub batches: usize,
    /// Total rows merged.
    pub rows: AffectedRows,
    /// Staged rows that did not become the latest value for their key.
    pub not_latest: u64,
    /// Per-batch merge counts.
    pub merges: Vec<MergeReport>,
}

/// Number of batches `rows` drafts split into at `batch_size`.
pub fn batch_count(rows: usize, batch_size: usize) -> usize {
    if rows == 0 {
        0
    } else if batch_size == 0 {
        1
    } else {
        rows.div_ceil(batch_size)
    }
}

/// Validates `drafts`, stages them in batches and merges each batch.
///
/// Every draft is validated before the store is touched. The staging area
/// must be empty when the load starts; the check and the first insert share
/// one immediate transaction, so a concurrent loader waits on the write lock
/// instead of racing the check.
///
/// # Errors
///
/// - [`StoreError::InvalidObservation`] for a draft that fails validation.
/// - [`StoreError::StagingNotEmpty`] when leftover staged rows are found.
/// - [`StoreError::PartialLoad`] when `commit_partial` is set and a batch
///   fails after earlier batches committed.
pub fn load_observations(
    session: &mut StoreSession,
    drafts: Vec<ObservationDraft>,
    opts: &LoadOptions,
) -> Result<LoadReport> {
    let rows = drafts
        .into_iter()
        .enumerate()
        .map(|(index, draft)| draft.validate(index))
        .collect::<Result<Vec<_>>>()?;
    let batch_size = if opts.batch_size == 0 {
        rows.len().max(1)
    } else {
        opts.batch_size
    };
    let start = Instant::now();
    let mut report = LoadReport {
        batches: 0,
        rows: AffectedRows::Exact(0),
        not_latest: 0,
        merges: Vec::with_capacity(batch_count(rows.len(), batch_size)),
    };

    if opts.commit_partial {
        load_committing_each_batch(session, &rows, batch_size, &mut report)?;
    } else {
        let tx = session
            .conn_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        ensure_staging_empty(&tx)?;
        for batch in rows.chunks(batch_size) {
            run_batch(&tx, batch, &mut report)?;
        }
        tx.commit()?;
    }

    info!(
        batches = report.batches,
        rows = ?report.rows,
        not_latest = report.not_latest,
        commit_partial = opts.commit_partial,
        duration_ms = start.elapsed().as_secs_f64() * 1_000.0,
        "acquisition.load.completed"
    );
    Ok(report)
}

fn load_committing_each_batch(
    session: &mut StoreSession,
    rows: &[SignalObservation],
    batch_size: usize,
    report: &mut LoadReport,
) -> Result<()> {
    if rows.is_empty() {
        return ensure_staging_empty(session.conn());
    }
    let mut committed_rows = 0u64;
    for (index, batch) in rows.chunks(batch_size).enumerate() {
        match run_committed_batch(session, index == 0, batch, report) {
            Ok(()) => committed_rows = report.rows.exact().unwrap_or(committed_rows),
            Err(err) if index == 0 => return Err(err),
            Err(err) => {
                error!(
                    committed_batches = index,
                    committed_rows,
                    error = %err,
                    "acquisition.load.partial_failure"
                );
                return Err(StoreError::PartialLoad {
                    committed_batches: index,
                    committed_rows,
                    source: Box::new(err),
                });
            }
        }
    }
    Ok(())
}

fn run_committed_batch(
    session: &mut StoreSession,
    first: bool,
    batch: &[SignalObservation],
    report: &mut LoadReport,
) -> Result<()> {
    let tx = session
        .conn_mut()
        .transaction_with_behavior(TransactionBehavior::Immediate)?;
    if first {
        ensure_staging_empty(&tx)?;
    }
    run_batch(&tx, batch, report)?;
    tx.commit()?;
    Ok(())
}

fn ensure_staging_empty(conn: &Connection) -> Result<()> {
    let rows = count_rows(conn, Table::Staging)?;
    if rows != 0 {
        error!(
            rows,
            hint = "a previous load failed, another load is running, or access is not exclusive",
            "acquisition.load.staging_not_empty"
        );
        return Err(StoreError::StagingNotEmpty { rows });
    }
    Ok(())
}

fn run_batch(conn: &Connection, batch: &[SignalObservation], report: &mut LoadReport) -> Result<()> {
    let start = Instant::now();
    let staged = stage_batch(conn, batch, unix_now())?;
    let not_latest = conn.execute(CLEAR_STALE_AGAINST_LATEST, [])?
        + conn.execute(CLEAR_STALE_WITHIN_BATCH, [])?;
    let merge = merge_in(conn)?;

    report.batches += 1;
    report.rows = report.rows + AffectedRows::Exact(staged);
    report.not_latest += not_latest as u64;
    report.merges.push(merge);
    info!(
        batch = report.batches,
        staged,
        not_latest,
        duration_ms = start.elapsed().as_secs_f64() * 1_000.0,
        "acquisition.load.batch"
    );
    Ok(())
}

fn stage_batch(conn: &Connection, batch: &[SignalObservation], now: i64) -> Result<u64> {
    let mut stmt = conn.prepare_cached(INSERT_INTO_LOADER)?;
    let mut staged = 0u64;
    for row in batch {
        let d = &row.draft;
        staged += stmt.execute(params![
            d.source,
            d.signal,
            d.time_type,
            d.geo_type,
            d.time_value,
            d.geo_value,
            now,
            d.value,
            d.stderr,
            d.sample_size,
            d.issue,
            row.lag,
            d.missing_value,
            d.missing_stderr,
            d.missing_sample_size,
        ])? as u64;
    }
    Ok(staged)
}
