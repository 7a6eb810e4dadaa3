use std::path::{Path, PathBuf};
use std::time::Instant;

use csv::{ReaderBuilder, StringRecord, Trim};
use rusqlite::{params, Connection, Transaction, TransactionBehavior};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::store::StoreSession;
use crate::types::{FullKey, NaturalKey, Result, StoreError, TimeType};

/// Requests staged into the scratch table per insert chunk.
pub const DELETE_CHUNK_ROWS: usize = 100_000;

/// Field order of a deletion file, after its header row.
pub const DELETION_FILE_FIELDS: [&str; 9] = [
    "geo_value",
    "value",
    "stderr",
    "sample_size",
    "issue",
    "time_value",
    "geo_type",
    "signal",
    "source",
];

const SCRATCH: &str = "tmp_delete_table";

// Shaped like the staging area plus the resolution columns.
const CREATE_SCRATCH: &str = "
DROP TABLE IF EXISTS temp.tmp_delete_table;
CREATE TEMP TABLE tmp_delete_table AS SELECT * FROM main.signal_load WHERE 0;
ALTER TABLE tmp_delete_table ADD COLUMN delete_history_id INTEGER;
ALTER TABLE tmp_delete_table ADD COLUMN delete_latest_id INTEGER;
ALTER TABLE tmp_delete_table ADD COLUMN recompute INTEGER NOT NULL DEFAULT 0;";

const INSERT_SCRATCH: &str = "
INSERT INTO tmp_delete_table
    (geo_value, issue, time_value, geo_type, signal, source, time_type,
     value_updated_timestamp, lag, is_latest_issue)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, 0, 0)";

const RESOLVE_HISTORY_ID: &str = "
UPDATE tmp_delete_table AS d SET delete_history_id = h.signal_data_id
FROM signal_history_v h
WHERE d.source = h.source AND d.signal = h.signal AND d.time_type = h.time_type
    AND d.geo_type = h.geo_type AND d.geo_value = h.geo_value
    AND d.time_value = h.time_value AND d.issue = h.issue";

// Deleting a version that is not stored is a no-op.
const DROP_UNRESOLVED: &str = "DELETE FROM tmp_delete_table WHERE delete_history_id IS NULL";

// A full-key match in latest means the targeted version is the current value.
const RESOLVE_LATEST_ID: &str = "
UPDATE tmp_delete_table AS d SET recompute = 1, delete_latest_id = l.signal_data_id
FROM signal_latest_v l
WHERE d.source = l.source AND d.signal = l.signal AND d.time_type = l.time_type
    AND d.geo_type = l.geo_type AND d.geo_value = l.geo_value
    AND d.time_value = l.time_value AND d.issue = l.issue";

const DELETE_HISTORY: &str = "
DELETE FROM signal_history
WHERE signal_data_id IN (SELECT delete_history_id FROM tmp_delete_table)";

const DELETE_LATEST: &str = "
DELETE FROM signal_latest
WHERE signal_data_id IN (
    SELECT delete_latest_id FROM tmp_delete_table WHERE delete_latest_id IS NOT NULL)";

// Must run after both deletes: the max issue is taken over surviving history
// and the reinsert cannot collide with the removed latest row.
const RECOMPUTE_LATEST: &str = "
WITH targets AS (
    SELECT DISTINCT sd.signal_key_id, gd.geo_key_id, d.time_type, d.time_value
    FROM tmp_delete_table d
        JOIN signal_dim sd ON sd.source = d.source AND sd.signal = d.signal
        JOIN geo_dim gd ON gd.geo_type = d.geo_type AND gd.geo_value = d.geo_value
    WHERE d.recompute = 1
),
winners AS (
    SELECT h.signal_key_id, h.geo_key_id, h.time_type, h.time_value, MAX(h.issue) AS issue
    FROM signal_history h
        JOIN targets t ON t.signal_key_id = h.signal_key_id AND t.geo_key_id = h.geo_key_id
            AND t.time_type = h.time_type AND t.time_value = h.time_value
    GROUP BY h.signal_key_id, h.geo_key_id, h.time_type, h.time_value
)
INSERT INTO signal_latest
    (signal_data_id, signal_key_id, geo_key_id, time_type, time_value, issue, lag,
     value_updated_timestamp, value, stderr, sample_size,
     missing_value, missing_stderr, missing_sample_size)
SELECT
    h.signal_data_id, h.signal_key_id, h.geo_key_id, h.time_type, h.time_value, h.issue, h.lag,
    h.value_updated_timestamp, h.value, h.stderr, h.sample_size,
    h.missing_value, h.missing_stderr, h.missing_sample_size
FROM signal_history h
    JOIN winners w ON w.signal_key_id = h.signal_key_id AND w.geo_key_id = h.geo_key_id
        AND w.time_type = h.time_type AND w.time_value = h.time_value AND w.issue = h.issue";

/// Versions to delete.
#[derive(Clone, Debug)]
pub enum DeletionInput {
    /// Comma-separated file with a header row and [`DELETION_FILE_FIELDS`]
    /// order; `time_type` is taken as `day`.
    File(PathBuf),
    /// Explicit full keys.
    Rows(Vec<FullKey>),
}

/// Row counts produced by one deletion run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeleteReport {
    /// Requests received, duplicates included.
    pub requested: u64,
    /// History rows removed.
    pub history_deleted: u64,
    /// Latest rows removed because they were the deleted version.
    pub latest_deleted: u64,
    /// Latest rows rebuilt from the next-newest surviving issue.
    pub latest_recomputed: u64,
}

/// Drops the scratch table on every exit path.
struct ScratchTable<'c> {
    conn: &'c Connection,
}

impl<'c> ScratchTable<'c> {
    fn create(conn: &'c Connection) -> Result<Self> {
        conn.execute_batch(CREATE_SCRATCH)?;
        Ok(Self { conn })
    }
}

impl Drop for ScratchTable<'_> {
    fn drop(&mut self) {
        if let Err(err) = self
            .conn
            .execute_batch("DROP TABLE IF EXISTS temp.tmp_delete_table")
        {
            warn!(error = %err, table = SCRATCH, "acquisition.delete.scratch_drop_failed");
        }
    }
}

/// Removes specific versions from history and repairs the latest projection.
///
/// All steps share one transaction: either every resolved version is removed
/// and every affected latest row rebuilt, or nothing changes. Returns counts
/// with `history_deleted` being the number of versions actually removed;
/// requests for versions that are not stored are ignored.
///
/// # Errors
///
/// Returns [`StoreError::InvalidDeletionInput`] for a malformed deletion file,
/// before the store is touched.
pub fn delete_versions(session: &mut StoreSession, input: DeletionInput) -> Result<DeleteReport> {
    let requests = match input {
        DeletionInput::File(path) => read_deletion_file(&path)?,
        DeletionInput::Rows(rows) => rows,
    };
    let start = Instant::now();
    let conn = session.conn();
    let _scratch = ScratchTable::create(conn)?;
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;

    stage_requests(&tx, &requests)?;
    tx.execute(RESOLVE_HISTORY_ID, [])?;
    let unresolved = tx.execute(DROP_UNRESOLVED, [])?;
    tx.execute(RESOLVE_LATEST_ID, [])?;
    let history_deleted = tx.execute(DELETE_HISTORY, [])? as u64;
    let latest_deleted = tx.execute(DELETE_LATEST, [])? as u64;
    let latest_recomputed = tx.execute(RECOMPUTE_LATEST, [])? as u64;
    tx.commit()?;

    let report = DeleteReport {
        requested: requests.len() as u64,
        history_deleted,
        latest_deleted,
        latest_recomputed,
    };
    info!(
        requested = report.requested,
        unresolved,
        history_deleted,
        latest_deleted,
        latest_recomputed,
        duration_ms = start.elapsed().as_secs_f64() * 1_000.0,
        "acquisition.delete.completed"
    );
    Ok(report)
}

fn stage_requests(conn: &Connection, requests: &[FullKey]) -> Result<()> {
    let mut stmt = conn.prepare(INSERT_SCRATCH)?;
    for (chunk_index, chunk) in requests.chunks(DELETE_CHUNK_ROWS).enumerate() {
        for request in chunk {
            let key = &request.key;
            stmt.execute(params![
                key.geo_value,
                request.issue,
                key.time_value,
                key.geo_type,
                key.signal,
                key.source,
                key.time_type,
            ])?;
        }
        debug!(
            chunk = chunk_index,
            rows = chunk.len(),
            "acquisition.delete.chunk_staged"
        );
    }
    Ok(())
}

/// Parses a deletion file into full keys without touching the store.
pub fn read_deletion_file(path: &Path) -> Result<Vec<FullKey>> {
    let invalid = |msg: String| StoreError::InvalidDeletionInput(msg);
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .trim(Trim::All)
        .from_path(path)
        .map_err(|err| invalid(format!("{}: {err}", path.display())))?;
    let headers = reader.headers()?.clone();
    if headers.len() != DELETION_FILE_FIELDS.len() {
        return Err(invalid(format!(
            "{}: header has {} fields, expected {} ({})",
            path.display(),
            headers.len(),
            DELETION_FILE_FIELDS.len(),
            DELETION_FILE_FIELDS.join(",")
        )));
    }

    let mut keys = Vec::new();
    for result in reader.records() {
        let record = result?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let key = parse_deletion_record(&record)
            .map_err(|reason| invalid(format!("{} line {line}: {reason}", path.display())))?;
        keys.push(key);
    }
    Ok(keys)
}

fn parse_deletion_record(record: &StringRecord) -> std::result::Result<FullKey, String> {
    if record.len() != DELETION_FILE_FIELDS.len() {
        return Err(format!(
            "expected {} fields, found {}",
            DELETION_FILE_FIELDS.len(),
            record.len()
        ));
    }
    let field = |idx: usize| -> std::result::Result<&str, String> {
        let value = &record[idx];
        if value.is_empty() {
            Err(format!("{} is empty", DELETION_FILE_FIELDS[idx]))
        } else {
            Ok(value)
        }
    };
    let integer = |idx: usize| -> std::result::Result<i64, String> {
        let raw = field(idx)?;
        raw.parse::<i64>()
            .map_err(|_| format!("{} '{raw}' is not an integer", DELETION_FILE_FIELDS[idx]))
    };
    Ok(FullKey {
        key: NaturalKey {
            source: field(8)?.to_string(),
            signal: field(7)?.to_string(),
            time_type: TimeType::Day,
            geo_type: field(6)?.parse().map_err(|err: StoreError| err.to_string())?,
            geo_value: field(0)?.to_string(),
            time_value: integer(5)?,
        },
        issue: integer(4)?,
    })
}
