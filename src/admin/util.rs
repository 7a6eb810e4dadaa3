use std::ffi::OsString;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OptionalExtension};

use crate::types::Result;

/// Name under which SQLite tracks the staging id sequence.
pub(crate) const STAGING_SEQUENCE: &str = "signal_load";

pub(crate) fn wal_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("episignal.db"));
    name.push("-wal");
    let mut output = path.to_path_buf();
    output.set_file_name(name);
    output
}

/// Current value of the staging AUTOINCREMENT counter, if SQLite has one.
pub(crate) fn staging_sequence(conn: &Connection) -> Result<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT seq FROM sqlite_sequence WHERE name = ?1",
            [STAGING_SEQUENCE],
            |row| row.get(0),
        )
        .optional()?)
}

/// Largest `signal_data_id` held by history or latest.
pub(crate) fn max_stored_id(conn: &Connection) -> Result<Option<i64>> {
    Ok(conn.query_row(
        "SELECT MAX(id) FROM (
            SELECT MAX(signal_data_id) AS id FROM signal_history
            UNION ALL
            SELECT MAX(signal_data_id) FROM signal_latest)",
        [],
        |row| row.get(0),
    )?)
}
