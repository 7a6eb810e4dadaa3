//! Table and view definitions.
//!
//! `signal_data_id` is minted by the staging table's AUTOINCREMENT sequence
//! and carried into history and latest, so the staging table must never be
//! dropped or recreated.

pub(crate) const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS signal_dim (
    signal_key_id INTEGER PRIMARY KEY AUTOINCREMENT,
    source TEXT NOT NULL,
    signal TEXT NOT NULL,
    UNIQUE (source, signal)
);

CREATE TABLE IF NOT EXISTS geo_dim (
    geo_key_id INTEGER PRIMARY KEY AUTOINCREMENT,
    geo_type TEXT NOT NULL,
    geo_value TEXT NOT NULL,
    UNIQUE (geo_type, geo_value)
);

CREATE TABLE IF NOT EXISTS signal_load (
    signal_data_id INTEGER PRIMARY KEY AUTOINCREMENT,
    source TEXT NOT NULL,
    signal TEXT NOT NULL,
    geo_type TEXT NOT NULL,
    geo_value TEXT NOT NULL,
    time_type TEXT NOT NULL,
    time_value INTEGER NOT NULL,
    issue INTEGER NOT NULL,
    lag INTEGER NOT NULL,
    value_updated_timestamp INTEGER NOT NULL,
    value REAL,
    stderr REAL,
    sample_size REAL,
    missing_value INTEGER NOT NULL DEFAULT 0,
    missing_stderr INTEGER NOT NULL DEFAULT 0,
    missing_sample_size INTEGER NOT NULL DEFAULT 0,
    is_latest_issue INTEGER NOT NULL DEFAULT 1,
    UNIQUE (source, signal, time_type, geo_type, time_value, geo_value, issue)
);

CREATE TABLE IF NOT EXISTS signal_history (
    signal_data_id INTEGER PRIMARY KEY,
    signal_key_id INTEGER NOT NULL REFERENCES signal_dim (signal_key_id),
    geo_key_id INTEGER NOT NULL REFERENCES geo_dim (geo_key_id),
    time_type TEXT NOT NULL,
    time_value INTEGER NOT NULL,
    issue INTEGER NOT NULL,
    lag INTEGER NOT NULL,
    value_updated_timestamp INTEGER NOT NULL,
    value REAL,
    stderr REAL,
    sample_size REAL,
    missing_value INTEGER NOT NULL DEFAULT 0,
    missing_stderr INTEGER NOT NULL DEFAULT 0,
    missing_sample_size INTEGER NOT NULL DEFAULT 0,
    UNIQUE (signal_key_id, geo_key_id, time_type, time_value, issue)
);

CREATE TABLE IF NOT EXISTS signal_latest (
    signal_data_id INTEGER PRIMARY KEY,
    signal_key_id INTEGER NOT NULL REFERENCES signal_dim (signal_key_id),
    geo_key_id INTEGER NOT NULL REFERENCES geo_dim (geo_key_id),
    time_type TEXT NOT NULL,
    time_value INTEGER NOT NULL,
    issue INTEGER NOT NULL,
    lag INTEGER NOT NULL,
    value_updated_timestamp INTEGER NOT NULL,
    value REAL,
    stderr REAL,
    sample_size REAL,
    missing_value INTEGER NOT NULL DEFAULT 0,
    missing_stderr INTEGER NOT NULL DEFAULT 0,
    missing_sample_size INTEGER NOT NULL DEFAULT 0,
    UNIQUE (signal_key_id, geo_key_id, time_type, time_value)
);

CREATE TABLE IF NOT EXISTS signal_meta_cache (
    timestamp INTEGER NOT NULL,
    epidata TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS signal_meta_cache_by_timestamp
    ON signal_meta_cache (timestamp);

CREATE VIEW IF NOT EXISTS signal_history_v AS
SELECT
    h.signal_data_id, sd.source, sd.signal, h.time_type, gd.geo_type, gd.geo_value,
    h.time_value, h.issue, h.lag, h.value, h.stderr, h.sample_size,
    h.missing_value, h.missing_stderr, h.missing_sample_size, h.value_updated_timestamp,
    h.signal_key_id, h.geo_key_id
FROM signal_history h
    JOIN signal_dim sd USING (signal_key_id)
    JOIN geo_dim gd USING (geo_key_id);

CREATE VIEW IF NOT EXISTS signal_latest_v AS
SELECT
    l.signal_data_id, sd.source, sd.signal, l.time_type, gd.geo_type, gd.geo_value,
    l.time_value, l.issue, l.lag, l.value, l.stderr, l.sample_size,
    l.missing_value, l.missing_stderr, l.missing_sample_size, l.value_updated_timestamp,
    l.signal_key_id, l.geo_key_id
FROM signal_latest l
    JOIN signal_dim sd USING (signal_key_id)
    JOIN geo_dim gd USING (geo_key_id);
";

/// Columns selected from either view, in [`crate::store::rows`] decode order.
pub(crate) const OBSERVATION_COLUMNS: &str = "signal_data_id, source, signal, time_type, \
     geo_type, geo_value, time_value, issue, lag, value, stderr, sample_size, \
     missing_value, missing_stderr, missing_sample_size, value_updated_timestamp";

/// Tables whose row counts are exposed to callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Table {
    /// Append-only history of every merged version.
    History,
    /// Current-value projection.
    Latest,
    /// Staging area for the batch being loaded.
    Staging,
    /// `(source, signal)` dimension.
    SignalDim,
    /// `(geo_type, geo_value)` dimension.
    GeoDim,
    /// Persisted metadata snapshots.
    MetaCache,
}

impl Table {
    /// SQL name of the table.
    pub fn name(self) -> &'static str {
        match self {
            Table::History => "signal_history",
            Table::Latest => "signal_latest",
            Table::Staging => "signal_load",
            Table::SignalDim => "signal_dim",
            Table::GeoDim => "geo_dim",
            Table::MetaCache => "signal_meta_cache",
        }
    }
}
