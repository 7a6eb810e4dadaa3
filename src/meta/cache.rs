use std::collections::HashMap;
use std::time::Instant;

use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info};

use super::aggregate::{aggregate, AggregateOptions, MetaKey, MetadataSummary};
use crate::store::{unix_now, StoreSession};
use crate::types::{GeoType, Result, TimeType};

const INSERT_SNAPSHOT: &str = "INSERT INTO signal_meta_cache (timestamp, epidata) VALUES (?1, ?2)";

// Equal timestamps resolve to the row written last.
const SELECT_CURRENT: &str = "
SELECT timestamp, epidata FROM signal_meta_cache
ORDER BY timestamp DESC, rowid DESC
LIMIT 1";

/// The current metadata snapshot, indexed for lookup by group.
#[derive(Clone, Debug)]
pub struct MetaSnapshot {
    timestamp: i64,
    entries: Vec<MetadataSummary>,
    index: HashMap<MetaKey, usize>,
}

impl MetaSnapshot {
    fn new(timestamp: i64, entries: Vec<MetadataSummary>) -> Self {
        let index = entries
            .iter()
            .enumerate()
            .map(|(pos, entry)| (entry.meta_key(), pos))
            .collect();
        Self {
            timestamp,
            entries,
            index,
        }
    }

    /// Epoch seconds at which the snapshot was stored.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Summaries in aggregation order.
    pub fn entries(&self) -> &[MetadataSummary] {
        &self.entries
    }

    /// Number of groups in the snapshot.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the snapshot holds no groups.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Summary for `key`.
    pub fn get(&self, key: &MetaKey) -> Option<&MetadataSummary> {
        self.index.get(key).map(|&pos| &self.entries[pos])
    }

    /// Summary for the group named by its parts.
    pub fn lookup(
        &self,
        source: &str,
        signal: &str,
        time_type: TimeType,
        geo_type: GeoType,
    ) -> Option<&MetadataSummary> {
        self.get(&MetaKey {
            source: source.to_string(),
            signal: signal.to_string(),
            time_type,
            geo_type,
        })
    }
}

/// Outcome of [`refresh`].
#[derive(Clone, Copy, Debug, Serialize)]
pub struct RefreshReport {
    /// Timestamp the new snapshot was stored under.
    pub timestamp: i64,
    /// Groups in the new snapshot.
    pub groups: usize,
    /// Wall time of aggregation plus store.
    pub duration_ms: f64,
}

/// Appends `entries` as a new snapshot and returns its timestamp.
///
/// Earlier snapshots are kept; readers only ever see the newest.
pub fn store_snapshot(session: &StoreSession, entries: &[MetadataSummary]) -> Result<i64> {
    let epidata = serde_json::to_string(entries)?;
    let timestamp = unix_now();
    session
        .conn()
        .execute(INSERT_SNAPSHOT, params![timestamp, epidata])?;
    debug!(
        timestamp,
        groups = entries.len(),
        bytes = epidata.len(),
        "meta.cache.stored"
    );
    Ok(timestamp)
}

/// Newest snapshot, or `None` when nothing has been stored yet.
pub fn retrieve(session: &StoreSession) -> Result<Option<MetaSnapshot>> {
    let row: Option<(i64, String)> = session
        .conn()
        .query_row(SELECT_CURRENT, [], |row| Ok((row.get(0)?, row.get(1)?)))
        .optional()?;
    let Some((timestamp, epidata)) = row else {
        return Ok(None);
    };
    let entries: Vec<MetadataSummary> = serde_json::from_str(&epidata)?;
    Ok(Some(MetaSnapshot::new(timestamp, entries)))
}

/// Runs [`aggregate`] and stores the result as the new snapshot.
pub fn refresh(session: &StoreSession, opts: &AggregateOptions) -> Result<RefreshReport> {
    let start = Instant::now();
    let entries = aggregate(session, opts)?;
    let timestamp = store_snapshot(session, &entries)?;
    let report = RefreshReport {
        timestamp,
        groups: entries.len(),
        duration_ms: start.elapsed().as_secs_f64() * 1_000.0,
    };
    info!(
        timestamp,
        groups = report.groups,
        duration_ms = report.duration_ms,
        "meta.cache.refreshed"
    );
    Ok(report)
}
