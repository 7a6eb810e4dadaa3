#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::{assert::Assert, cargo::cargo_bin_cmd};
use serde_json::Value;
use tempfile::TempDir;

const OBSERVATIONS: &str = "\
source,signal,time_type,geo_type,geo_value,time_value,issue,value,stderr,sample_size,missing_value,missing_stderr,missing_sample_size
src,sig,day,county,01000,20200101,20200101,1.0,0.1,100,0,0,0
src,sig,day,county,01000,20200101,20200103,3.0,0.3,100,0,0,0
src,sig,day,county,02000,20200102,20200103,5.0,0.5,50,0,0,0
src,other,day,state,pa,20200101,20200102,,,,3,3,3
";

/// Runs the binary against `db` with a config path that never exists, so a
/// user config cannot leak into the test.
fn episignal(dir: &Path, db: &Path, args: &[&str]) -> Assert {
    cargo_bin_cmd!("episignal")
        .env_remove("EPISIGNAL_DB")
        .env_remove("RUST_LOG")
        .arg("--config")
        .arg(dir.join("absent-config.toml"))
        .arg("--db")
        .arg(db)
        .args(args)
        .assert()
}

fn json_of(assert: Assert) -> Value {
    let stdout = assert.get_output().stdout.clone();
    serde_json::from_slice(&stdout).expect("valid json")
}

fn setup_loaded(name: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("tempdir");
    let db = dir.path().join(format!("{name}.db"));
    let input = dir.path().join("observations.csv");
    fs::write(&input, OBSERVATIONS).expect("write observations");
    episignal(
        dir.path(),
        &db,
        &["load", input.to_str().expect("utf-8 path"), "--create"],
    )
    .success();
    (dir, db)
}

#[test]
fn load_reports_batches_as_json() {
    let dir = TempDir::new().expect("tempdir");
    let db = dir.path().join("load.db");
    let input = dir.path().join("observations.csv");
    fs::write(&input, OBSERVATIONS).expect("write observations");
    let json = json_of(
        episignal(
            dir.path(),
            &db,
            &[
                "--format",
                "json",
                "load",
                input.to_str().expect("utf-8 path"),
                "--create",
                "--batch-size",
                "2",
            ],
        )
        .success(),
    );
    assert_eq!(json["batches"], 2);
    assert_eq!(json["not_latest"], 1);
    assert_eq!(json["merges"].as_array().map(Vec::len), Some(2));
}

#[test]
fn load_without_create_refuses_missing_database() {
    let dir = TempDir::new().expect("tempdir");
    let db = dir.path().join("absent.db");
    let input = dir.path().join("observations.csv");
    fs::write(&input, OBSERVATIONS).expect("write observations");
    let output = episignal(
        dir.path(),
        &db,
        &["load", input.to_str().expect("utf-8 path")],
    )
    .failure()
    .get_output()
    .stderr
    .clone();
    let stderr = String::from_utf8_lossy(&output);
    assert!(stderr.contains("database not found"), "{stderr}");
    assert!(!db.exists());
}

#[test]
fn stats_emits_json() {
    let (dir, db) = setup_loaded("stats");
    let json = json_of(episignal(dir.path(), &db, &["--format", "json", "stats"]).success());
    assert_eq!(json["tables"]["history_rows"], 4);
    assert_eq!(json["tables"]["latest_rows"], 3);
    assert_eq!(json["tables"]["signal_dims"], 2);
    assert!(json["filesystem"]["db_size_bytes"].is_number());
}

#[test]
fn verify_full_succeeds() {
    let (dir, db) = setup_loaded("verify");
    let json = json_of(
        episignal(
            dir.path(),
            &db,
            &["--format", "json", "verify", "--level", "full"],
        )
        .success(),
    );
    assert!(json["success"].as_bool().unwrap_or(false));
    assert_eq!(json["counts"]["stale_latest"], 0);
}

#[test]
fn delete_walks_latest_back() {
    let (dir, db) = setup_loaded("delete");
    let deletions = dir.path().join("deletions.csv");
    fs::write(
        &deletions,
        "geo_id,value,stderr,sample_size,issue,time_value,geo_type,signal,source\n\
         01000,3.0,0.3,100,20200103,20200101,county,sig,src\n",
    )
    .expect("write deletions");
    let json = json_of(
        episignal(
            dir.path(),
            &db,
            &[
                "--format",
                "json",
                "delete",
                deletions.to_str().expect("utf-8 path"),
            ],
        )
        .success(),
    );
    assert_eq!(json["history_deleted"], 1);
    assert_eq!(json["latest_recomputed"], 1);
    episignal(dir.path(), &db, &["verify"]).success();
}

#[test]
fn meta_refresh_show_and_export() {
    let (dir, db) = setup_loaded("meta");
    let refreshed = json_of(
        episignal(
            dir.path(),
            &db,
            &["--format", "json", "meta", "refresh", "--workers", "2"],
        )
        .success(),
    );
    assert_eq!(refreshed["groups"], 2);

    let shown = json_of(
        episignal(
            dir.path(),
            &db,
            &["--format", "json", "meta", "show", "--signal", "sig"],
        )
        .success(),
    );
    let entries = shown.as_array().expect("entry list");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["data_source"], "src");
    assert_eq!(entries[0]["num_locations"], 2);
    assert_eq!(entries[0]["max_issue"], 20200103);

    let out = dir.path().join("meta.csv");
    let exported_summary = json_of(
        episignal(
            dir.path(),
            &db,
            &["--format", "json", "meta", "export", out.to_str().expect("utf-8 path")],
        )
        .success(),
    );
    assert_eq!(exported_summary["rows_exported"], 2);
    assert_eq!(exported_summary["snapshot_timestamp"], refreshed["timestamp"]);
    let exported = fs::read_to_string(&out).expect("read export");
    assert_eq!(exported.lines().count(), 3);
    assert!(exported.lines().any(|l| l.starts_with("src,other,day,state")));
}

#[test]
fn meta_show_without_snapshot_fails() {
    let (dir, db) = setup_loaded("meta-empty");
    let output = episignal(dir.path(), &db, &["meta", "show"])
        .failure()
        .get_output()
        .stderr
        .clone();
    assert!(String::from_utf8_lossy(&output).contains("meta refresh"));
}

#[test]
fn repair_staging_and_checkpoint_complete() {
    let (dir, db) = setup_loaded("maintenance");
    let repaired = json_of(
        episignal(dir.path(), &db, &["--format", "json", "repair-staging"]).success(),
    );
    assert_eq!(repaired["staging_cleared"], 0);
    assert_eq!(repaired["advanced"], false);

    let checkpointed = json_of(
        episignal(
            dir.path(),
            &db,
            &["--format", "json", "checkpoint", "--mode", "passive"],
        )
        .success(),
    );
    assert_eq!(checkpointed["mode"], "passive");
}

#[test]
fn missing_database_argument_is_reported() {
    let dir = TempDir::new().expect("tempdir");
    let output = cargo_bin_cmd!("episignal")
        .env_remove("EPISIGNAL_DB")
        .arg("--config")
        .arg(dir.path().join("absent-config.toml"))
        .arg("stats")
        .assert()
        .failure()
        .get_output()
        .stderr
        .clone();
    assert!(String::from_utf8_lossy(&output).contains("no database given"));
}

#[test]
fn profile_from_config_supplies_database() {
    let dir = TempDir::new().expect("tempdir");
    let db = dir.path().join("profile.db");
    let input = dir.path().join("observations.csv");
    fs::write(&input, OBSERVATIONS).expect("write observations");
    let config = dir.path().join("config.toml");
    fs::write(
        &config,
        format!(
            "default_profile = \"local\"\n\n[profiles.local]\ndatabase = {:?}\nbatch_size = 1\n",
            db.to_str().expect("utf-8 path")
        ),
    )
    .expect("write config");

    let json = json_of(
        cargo_bin_cmd!("episignal")
            .env_remove("EPISIGNAL_DB")
            .arg("--config")
            .arg(&config)
            .args(["--format", "json", "load"])
            .arg(&input)
            .arg("--create")
            .assert()
            .success(),
    );
    assert_eq!(json["batches"], 4);
    assert!(db.exists());
}
