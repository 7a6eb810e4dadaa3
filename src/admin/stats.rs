use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::admin::util::{staging_sequence, wal_path};
use crate::store::{StoreOptions, StoreSession, Table};
use crate::types::Result;

#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub tables: TableStats,
    pub sequence: SequenceStats,
    pub filesystem: FilesystemStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableStats {
    pub history_rows: u64,
    pub latest_rows: u64,
    pub staging_rows: u64,
    pub signal_dims: u64,
    pub geo_dims: u64,
    pub meta_snapshots: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SequenceStats {
    pub staging_sequence: Option<i64>,
    pub newest_snapshot: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FilesystemStats {
    pub db_path: String,
    pub db_size_bytes: u64,
    pub wal_path: String,
    pub wal_size_bytes: u64,
}

pub fn stats(path: impl AsRef<Path>, opts: &StoreOptions) -> Result<StatsReport> {
    let path = path.as_ref();
    let session = StoreSession::open(path, opts)?;
    let conn = session.conn();

    let tables = TableStats {
        history_rows: session.count_rows(Table::History)?,
        latest_rows: session.count_rows(Table::Latest)?,
        staging_rows: session.count_rows(Table::Staging)?,
        signal_dims: session.count_rows(Table::SignalDim)?,
        geo_dims: session.count_rows(Table::GeoDim)?,
        meta_snapshots: session.count_rows(Table::MetaCache)?,
    };

    let newest_snapshot: Option<i64> =
        conn.query_row("SELECT MAX(timestamp) FROM signal_meta_cache", [], |row| {
            row.get(0)
        })?;
    let sequence = SequenceStats {
        staging_sequence: staging_sequence(conn)?,
        newest_snapshot,
    };

    let db_meta = fs::metadata(path)?;
    let wal_path = wal_path(path);
    let wal_size = fs::metadata(&wal_path).map(|m| m.len()).unwrap_or(0);
    let filesystem = FilesystemStats {
        db_path: path.display().to_string(),
        db_size_bytes: db_meta.len(),
        wal_path: wal_path.display().to_string(),
        wal_size_bytes: wal_size,
    };

    Ok(StatsReport {
        tables,
        sequence,
        filesystem,
    })
}
