#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;

use episignal::{
    acquisition::{load_observations, LoadOptions, LoadReport},
    store::{StoreOptions, StoreSession},
    types::{GeoType, Missingness, NaturalKey, ObservationDraft, StoredObservation, TimeType},
};
use tempfile::TempDir;

pub fn setup_store(name: &str) -> (TempDir, PathBuf, StoreSession) {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join(format!("{name}.db"));
    let session = StoreSession::open(&path, &StoreOptions::create()).expect("open store");
    (dir, path, session)
}

pub fn draft(signal: &str, geo_value: &str, time_value: i64, issue: i64, value: f64) -> ObservationDraft {
    ObservationDraft {
        source: "src".into(),
        signal: signal.into(),
        time_type: TimeType::Day,
        geo_type: GeoType::County,
        geo_value: geo_value.into(),
        time_value,
        issue,
        value: Some(value),
        stderr: Some(value / 10.0),
        sample_size: Some(100.0),
        missing_value: Missingness::NotMissing,
        missing_stderr: Missingness::NotMissing,
        missing_sample_size: Missingness::NotMissing,
    }
}

pub fn key(signal: &str, geo_value: &str, time_value: i64) -> NaturalKey {
    draft(signal, geo_value, time_value, time_value, 0.0).natural_key()
}

pub fn load(session: &mut StoreSession, drafts: Vec<ObservationDraft>) -> LoadReport {
    load_observations(session, drafts, &LoadOptions::default()).expect("load observations")
}

/// Checks that latest holds exactly the max-issue history row of every key.
pub fn assert_latest_invariant(session: &StoreSession) {
    let mut newest: BTreeMap<NaturalKey, StoredObservation> = BTreeMap::new();
    for row in session.history_rows().expect("history rows") {
        match newest.get(&row.key) {
            Some(current) if current.issue >= row.issue => {}
            _ => {
                newest.insert(row.key.clone(), row);
            }
        }
    }
    let latest: BTreeMap<NaturalKey, StoredObservation> = session
        .latest_rows()
        .expect("latest rows")
        .into_iter()
        .map(|row| (row.key.clone(), row))
        .collect();
    assert_eq!(
        latest.keys().collect::<Vec<_>>(),
        newest.keys().collect::<Vec<_>>(),
        "latest keys must match history keys"
    );
    for (key, expected) in &newest {
        let actual = &latest[key];
        assert_eq!(actual, expected, "latest row for {key:?} is not the newest issue");
    }
}
