use std::path::Path;

use rusqlite::Connection;
use serde::Serialize;
use tracing::{info, warn};

use crate::admin::util::{max_stored_id, staging_sequence};
use crate::store::{StoreOptions, StoreSession, Table};
use crate::types::Result;

const MAX_FINDINGS: usize = 32;

// Natural keys with history but no latest row.
const MISSING_LATEST: &str = "
SELECT sd.source, sd.signal, h.time_type, gd.geo_type, gd.geo_value, h.time_value,
    MAX(h.issue)
FROM signal_history h
    JOIN signal_dim sd USING (signal_key_id)
    JOIN geo_dim gd USING (geo_key_id)
    LEFT JOIN signal_latest l ON l.signal_key_id = h.signal_key_id
        AND l.geo_key_id = h.geo_key_id AND l.time_type = h.time_type
        AND l.time_value = h.time_value
WHERE l.signal_data_id IS NULL
GROUP BY h.signal_key_id, h.geo_key_id, h.time_type, h.time_value";

// Latest rows whose issue is not the newest surviving issue.
const STALE_LATEST: &str = "
SELECT l.source, l.signal, l.time_type, l.geo_type, l.geo_value, l.time_value, l.issue,
    m.max_issue
FROM signal_latest_v l
    JOIN (
        SELECT signal_key_id, geo_key_id, time_type, time_value, MAX(issue) AS max_issue
        FROM signal_history
        GROUP BY signal_key_id, geo_key_id, time_type, time_value
    ) m ON m.signal_key_id = l.signal_key_id AND m.geo_key_id = l.geo_key_id
        AND m.time_type = l.time_type AND m.time_value = l.time_value
WHERE l.issue <> m.max_issue";

// Latest rows that do not point at a history row with the same full key.
const ORPHANED_LATEST: &str = "
SELECT l.source, l.signal, l.time_type, l.geo_type, l.geo_value, l.time_value, l.issue,
    l.signal_data_id
FROM signal_latest_v l
    LEFT JOIN signal_history h ON h.signal_data_id = l.signal_data_id
        AND h.signal_key_id = l.signal_key_id AND h.geo_key_id = l.geo_key_id
        AND h.time_type = l.time_type AND h.time_value = l.time_value
        AND h.issue = l.issue
WHERE h.signal_data_id IS NULL";

/// Specifies the depth of verification checks to perform.
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyLevel {
    /// Row counts, staging state and the id sequence only.
    Fast,
    /// Also checks every latest row against the history store.
    Full,
}

/// Indicates the severity level of a verification finding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifySeverity {
    /// Informational message about the verification process.
    Info,
    /// Non-critical issue that may indicate a problem.
    Warning,
    /// The latest projection or the id sequence is inconsistent.
    Error,
}

/// Represents a single issue discovered during verification.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyFinding {
    /// The severity level of this finding.
    pub severity: VerifySeverity,
    /// Human-readable description of the issue.
    pub message: String,
}

impl VerifyFinding {
    fn error(message: impl Into<String>) -> Self {
        Self {
            severity: VerifySeverity::Error,
            message: message.into(),
        }
    }

    fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: VerifySeverity::Warning,
            message: message.into(),
        }
    }
}

/// Statistics collected during the verification process.
#[derive(Clone, Debug, Default, Serialize)]
pub struct VerifyCounts {
    /// Versions in the history store.
    pub history_rows: u64,
    /// Rows in the latest projection.
    pub latest_rows: u64,
    /// Rows waiting in the staging area.
    pub staging_rows: u64,
    /// Natural keys without a latest row.
    pub missing_latest: u64,
    /// Latest rows that are not the newest issue.
    pub stale_latest: u64,
    /// Latest rows without a matching history row.
    pub orphaned_latest: u64,
}

/// Complete report of a verification operation.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyReport {
    /// The verification level that was performed.
    pub level: VerifyLevel,
    /// True when no error-severity finding was recorded.
    pub success: bool,
    /// Issues discovered during verification, capped per check.
    pub findings: Vec<VerifyFinding>,
    /// Totals behind the findings.
    pub counts: VerifyCounts,
}

/// Verifies that the latest projection agrees with the history store.
///
/// Every natural key with history must have exactly one latest row, and that
/// row must be the surviving version with the greatest issue. Leftover staged
/// rows are reported as a warning; an id sequence behind the stored ids is an
/// error because the next load would reuse ids.
///
/// # Errors
///
/// Returns an error if the database cannot be opened or a query fails.
pub fn verify(
    path: impl AsRef<Path>,
    opts: &StoreOptions,
    level: VerifyLevel,
) -> Result<VerifyReport> {
    let session = StoreSession::open(path.as_ref(), opts)?;
    let conn = session.conn();
    let mut findings = Vec::new();
    let mut counts = VerifyCounts {
        history_rows: session.count_rows(Table::History)?,
        latest_rows: session.count_rows(Table::Latest)?,
        staging_rows: session.count_rows(Table::Staging)?,
        ..VerifyCounts::default()
    };

    if counts.staging_rows > 0 {
        findings.push(VerifyFinding::warning(format!(
            "staging area holds {} rows; the next load will refuse to start",
            counts.staging_rows
        )));
    }
    if let Some(max_id) = max_stored_id(conn)? {
        let seq = staging_sequence(conn)?.unwrap_or(0);
        if seq < max_id {
            findings.push(VerifyFinding::error(format!(
                "staging sequence {seq} is behind stored id {max_id}; run repair-staging"
            )));
        }
    }

    if matches!(level, VerifyLevel::Full) {
        counts.missing_latest = collect(conn, MISSING_LATEST, &mut findings, |r| {
            Ok(format!(
                "no latest row for {} (history has issue {})",
                describe_key(r)?,
                r.get::<_, i64>(6)?
            ))
        })?;
        counts.stale_latest = collect(conn, STALE_LATEST, &mut findings, |r| {
            Ok(format!(
                "latest row for {} holds issue {} but newest issue is {}",
                describe_key(r)?,
                r.get::<_, i64>(6)?,
                r.get::<_, i64>(7)?
            ))
        })?;
        counts.orphaned_latest = collect(conn, ORPHANED_LATEST, &mut findings, |r| {
            Ok(format!(
                "latest row {} for {} issue {} has no history row",
                r.get::<_, i64>(7)?,
                describe_key(r)?,
                r.get::<_, i64>(6)?
            ))
        })?;
    }

    let success = !findings
        .iter()
        .any(|f| f.severity == VerifySeverity::Error);
    if success {
        info!(level = ?level, findings = findings.len(), "admin.verify.completed");
    } else {
        warn!(
            level = ?level,
            findings = findings.len(),
            missing_latest = counts.missing_latest,
            stale_latest = counts.stale_latest,
            orphaned_latest = counts.orphaned_latest,
            "admin.verify.failed"
        );
    }
    Ok(VerifyReport {
        level,
        success,
        findings,
        counts,
    })
}

/// Runs `sql`, turning up to [`MAX_FINDINGS`] rows into error findings, and
/// returns the total number of rows.
fn collect(
    conn: &Connection,
    sql: &str,
    findings: &mut Vec<VerifyFinding>,
    describe: impl Fn(&rusqlite::Row<'_>) -> rusqlite::Result<String>,
) -> Result<u64> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query([])?;
    let mut total = 0u64;
    while let Some(row) = rows.next()? {
        if (total as usize) < MAX_FINDINGS {
            findings.push(VerifyFinding::error(describe(row)?));
        }
        total += 1;
    }
    Ok(total)
}

fn describe_key(row: &rusqlite::Row<'_>) -> rusqlite::Result<String> {
    Ok(format!(
        "({}, {}, {}, {}, {}, {})",
        row.get::<_, String>(0)?,
        row.get::<_, String>(1)?,
        row.get::<_, String>(2)?,
        row.get::<_, String>(3)?,
        row.get::<_, String>(4)?,
        row.get::<_, i64>(5)?
    ))
}
