#![forbid(unsafe_code)]

//! Session handle over the SQLite-backed signal store.
//!
//! Every component call takes an explicit [`StoreSession`]. A session owns
//! one connection; sessions are cheap to [`fork`](StoreSession::fork) so that
//! worker threads each read through their own connection.

mod options;
mod rows;
pub(crate) mod schema;

use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags};
use time::OffsetDateTime;
use tracing::debug;

use crate::types::{Result, StoreError};

pub use options::{StoreOptions, Synchronous};
pub use schema::Table;

/// Open connection to a signal store file.
pub struct StoreSession {
    conn: Connection,
    path: PathBuf,
    opts: StoreOptions,
}

impl std::fmt::Debug for StoreSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreSession")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl StoreSession {
    /// Opens the store at `path`, creating tables and views that are missing.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MissingDatabase`] when the file does not exist and
    /// `opts.create_if_missing` is false.
    pub fn open(path: impl AsRef<Path>, opts: &StoreOptions) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            if !opts.create_if_missing {
                return Err(StoreError::MissingDatabase(path.to_path_buf()));
            }
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
        }
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags)?;
        conn.busy_timeout(opts.busy_timeout)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", opts.synchronous.pragma_value())?;
        conn.execute_batch(schema::SCHEMA)?;
        debug!(db_path = %path.display(), journal_mode = %mode, "store.session.open");
        Ok(Self {
            conn,
            path: path.to_path_buf(),
            opts: opts.clone(),
        })
    }

    /// Opens a sibling session on the same file.
    pub fn fork(&self) -> Result<Self> {
        let opts = StoreOptions {
            create_if_missing: false,
            ..self.opts.clone()
        };
        Self::open(&self.path, &opts)
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Options this session was opened with.
    pub fn options(&self) -> &StoreOptions {
        &self.opts
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Number of rows currently in `table`.
    pub fn count_rows(&self, table: Table) -> Result<u64> {
        count_rows(&self.conn, table)
    }

    /// Number of versions in the history store.
    pub fn count_history_rows(&self) -> Result<u64> {
        self.count_rows(Table::History)
    }

    /// Number of rows in the latest projection.
    pub fn count_latest_rows(&self) -> Result<u64> {
        self.count_rows(Table::Latest)
    }

    /// Number of rows waiting in the staging area.
    pub fn count_staging_rows(&self) -> Result<u64> {
        self.count_rows(Table::Staging)
    }

    /// Closes the connection, surfacing any error SQLite reports.
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, err)| StoreError::from(err))
    }
}

pub(crate) fn count_rows(conn: &Connection, table: Table) -> Result<u64> {
    let sql = format!("SELECT COUNT(1) FROM {}", table.name());
    let count: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
    Ok(count as u64)
}

/// Current time in epoch seconds.
pub(crate) fn unix_now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}
