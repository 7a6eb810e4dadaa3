use rusqlite::{params, Row};

use super::schema::OBSERVATION_COLUMNS;
use super::StoreSession;
use crate::types::{NaturalKey, Result, StoredObservation};

const NATURAL_KEY_FILTER: &str = "source = ?1 AND signal = ?2 AND time_type = ?3 \
     AND geo_type = ?4 AND geo_value = ?5 AND time_value = ?6";

pub(crate) fn observation_from_row(row: &Row<'_>) -> rusqlite::Result<StoredObservation> {
    Ok(StoredObservation {
        signal_data_id: row.get(0)?,
        key: NaturalKey {
            source: row.get(1)?,
            signal: row.get(2)?,
            time_type: row.get(3)?,
            geo_type: row.get(4)?,
            geo_value: row.get(5)?,
            time_value: row.get(6)?,
        },
        issue: row.get(7)?,
        lag: row.get(8)?,
        value: row.get(9)?,
        stderr: row.get(10)?,
        sample_size: row.get(11)?,
        missing_value: row.get(12)?,
        missing_stderr: row.get(13)?,
        missing_sample_size: row.get(14)?,
        value_updated_timestamp: row.get(15)?,
    })
}

impl StoreSession {
    /// Every stored version of `key`, oldest issue first.
    pub fn history_versions(&self, key: &NaturalKey) -> Result<Vec<StoredObservation>> {
        let sql = format!(
            "SELECT {OBSERVATION_COLUMNS} FROM signal_history_v \
             WHERE {NATURAL_KEY_FILTER} ORDER BY issue ASC"
        );
        let mut stmt = self.conn().prepare_cached(&sql)?;
        let rows = stmt.query_map(
            params![
                key.source,
                key.signal,
                key.time_type,
                key.geo_type,
                key.geo_value,
                key.time_value
            ],
            observation_from_row,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// The current value for `key`, if any version survives.
    pub fn latest_row(&self, key: &NaturalKey) -> Result<Option<StoredObservation>> {
        let sql =
            format!("SELECT {OBSERVATION_COLUMNS} FROM signal_latest_v WHERE {NATURAL_KEY_FILTER}");
        let mut stmt = self.conn().prepare_cached(&sql)?;
        let mut rows = stmt.query_map(
            params![
                key.source,
                key.signal,
                key.time_type,
                key.geo_type,
                key.geo_value,
                key.time_value
            ],
            observation_from_row,
        )?;
        Ok(rows.next().transpose()?)
    }

    /// The whole latest projection ordered by natural key.
    pub fn latest_rows(&self) -> Result<Vec<StoredObservation>> {
        self.scan_view("signal_latest_v")
    }

    /// The whole history store ordered by natural key, then issue.
    pub fn history_rows(&self) -> Result<Vec<StoredObservation>> {
        self.scan_view("signal_history_v")
    }

    fn scan_view(&self, view: &str) -> Result<Vec<StoredObservation>> {
        let sql = format!(
            "SELECT {OBSERVATION_COLUMNS} FROM {view} ORDER BY source, signal, time_type, \
             geo_type, geo_value, time_value, issue"
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map([], observation_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}
