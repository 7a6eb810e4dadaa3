#![allow(missing_docs)]

mod common;

use std::path::PathBuf;

use episignal::{
    admin::{
        checkpoint, repair_staging_sequence, stats, verify, CheckpointMode, VerifyLevel,
        VerifySeverity,
    },
    store::StoreOptions,
};
use rusqlite::Connection;
use tempfile::TempDir;

use common::{assert_latest_invariant, draft, load, setup_store};

fn setup_db(name: &str) -> (TempDir, PathBuf) {
    let (dir, path, mut session) = setup_store(name);
    load(
        &mut session,
        vec![
            draft("sig", "01000", 20200101, 20200101, 1.0),
            draft("sig", "01000", 20200101, 20200102, 2.0),
            draft("sig", "02000", 20200101, 20200102, 3.0),
        ],
    );
    session.close().expect("close");
    (dir, path)
}

fn admin_opts() -> StoreOptions {
    StoreOptions::default()
}

#[test]
fn stats_reports_tables() {
    let (_dir, db_path) = setup_db("admin-stats");
    let report = stats(&db_path, &admin_opts()).expect("stats report");
    assert_eq!(report.tables.history_rows, 3);
    assert_eq!(report.tables.latest_rows, 2);
    assert_eq!(report.tables.staging_rows, 0);
    assert_eq!(report.tables.signal_dims, 1);
    assert_eq!(report.tables.geo_dims, 2);
    assert_eq!(report.tables.meta_snapshots, 0);
    assert_eq!(report.sequence.staging_sequence, Some(3));
    assert!(report.filesystem.db_size_bytes > 0);
}

#[test]
fn stats_refuses_missing_database() {
    let dir = TempDir::new().expect("tempdir");
    let err = stats(dir.path().join("absent.db"), &admin_opts()).expect_err("missing db");
    assert!(err.to_string().contains("database not found"), "{err}");
}

#[test]
fn verify_full_passes_on_healthy_store() {
    let (_dir, db_path) = setup_db("admin-verify");
    let report = verify(&db_path, &admin_opts(), VerifyLevel::Full).expect("verify");
    assert!(report.success, "verification findings: {:?}", report.findings);
    assert!(report.findings.is_empty());
    assert_eq!(report.counts.history_rows, 3);
    assert_eq!(report.counts.latest_rows, 2);
}

#[test]
fn verify_full_reports_broken_latest_rows() {
    let (_dir, db_path) = setup_db("admin-verify-broken");
    let conn = Connection::open(&db_path).expect("raw connection");
    // Point 01000 back at its older issue and drop the latest row of 02000.
    conn.execute_batch(
        "UPDATE signal_latest SET issue = 20200101, signal_data_id = (
             SELECT h.signal_data_id FROM signal_history h
             WHERE h.geo_key_id = signal_latest.geo_key_id AND h.issue = 20200101)
         WHERE geo_key_id = (SELECT geo_key_id FROM geo_dim WHERE geo_value = '01000');
         DELETE FROM signal_latest
         WHERE geo_key_id = (SELECT geo_key_id FROM geo_dim WHERE geo_value = '02000');",
    )
    .expect("tamper");
    drop(conn);

    let report = verify(&db_path, &admin_opts(), VerifyLevel::Full).expect("verify");
    assert!(!report.success);
    assert_eq!(report.counts.stale_latest, 1);
    assert_eq!(report.counts.missing_latest, 1);
    assert_eq!(report.counts.orphaned_latest, 0);
    assert!(report
        .findings
        .iter()
        .all(|f| f.severity == VerifySeverity::Error));

    let fast = verify(&db_path, &admin_opts(), VerifyLevel::Fast).expect("verify fast");
    assert!(fast.success);
}

#[test]
fn repair_advances_a_rewound_sequence() {
    let (_dir, db_path) = setup_db("admin-repair");
    let conn = Connection::open(&db_path).expect("raw connection");
    conn.execute("DELETE FROM sqlite_sequence WHERE name = 'signal_load'", [])
        .expect("rewind");
    conn.execute(
        "INSERT INTO signal_load (source, signal, geo_type, geo_value, time_type, time_value,
            issue, lag, value_updated_timestamp)
         VALUES ('src', 'sig', 'county', '09000', 'day', 20200101, 20200101, 0, 0)",
        [],
    )
    .expect("stray staged row");
    drop(conn);

    let broken = verify(&db_path, &admin_opts(), VerifyLevel::Fast).expect("verify");
    assert!(!broken.success);
    assert!(broken
        .findings
        .iter()
        .any(|f| f.severity == VerifySeverity::Warning));

    let report = repair_staging_sequence(&db_path, &admin_opts()).expect("repair");
    assert_eq!(report.staging_cleared, 1);
    assert!(report.advanced);
    assert_eq!(report.sequence, 3);

    let healed = verify(&db_path, &admin_opts(), VerifyLevel::Full).expect("verify");
    assert!(healed.success, "findings: {:?}", healed.findings);

    let mut session =
        episignal::store::StoreSession::open(&db_path, &admin_opts()).expect("reopen");
    load(&mut session, vec![draft("sig", "03000", 20200101, 20200101, 4.0)]);
    let row = session
        .latest_row(&common::key("sig", "03000", 20200101))
        .expect("lookup")
        .expect("present");
    assert_eq!(row.signal_data_id, 4);
    assert_latest_invariant(&session);
}

#[test]
fn repair_on_healthy_store_keeps_sequence() {
    let (_dir, db_path) = setup_db("admin-repair-noop");
    let report = repair_staging_sequence(&db_path, &admin_opts()).expect("repair");
    assert_eq!(report.staging_cleared, 0);
    assert!(!report.advanced);
    assert_eq!(report.previous_sequence, Some(3));
    assert_eq!(report.sequence, 3);
}

#[test]
fn checkpoint_truncates_wal() {
    let (_dir, db_path) = setup_db("admin-checkpoint");
    let report = checkpoint(&db_path, &admin_opts(), CheckpointMode::Truncate).expect("checkpoint");
    assert_eq!(report.mode, "truncate");
    assert!(!report.busy);
    assert_eq!(report.wal_frames, report.checkpointed_frames);
}
