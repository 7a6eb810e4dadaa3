#![allow(missing_docs)]

mod common;

use std::fs;

use episignal::{
    acquisition::{delete_versions, DeleteReport, DeletionInput},
    types::StoreError,
};

use common::{assert_latest_invariant, draft, key, load, setup_store};

#[test]
fn deleting_latest_issues_walks_back_then_removes_key() {
    let (_dir, _path, mut session) = setup_store("walk-back");
    load(
        &mut session,
        vec![
            draft("sig", "01000", 20200101, 20200101, 1.0),
            draft("sig", "01000", 20200101, 20200102, 2.0),
        ],
    );
    let k = key("sig", "01000", 20200101);
    assert_eq!(session.latest_row(&k).expect("lookup").expect("present").issue, 20200102);

    let report = delete_versions(&mut session, DeletionInput::Rows(vec![k.at_issue(20200102)]))
        .expect("delete newest");
    assert_eq!(
        report,
        DeleteReport {
            requested: 1,
            history_deleted: 1,
            latest_deleted: 1,
            latest_recomputed: 1,
        }
    );
    let latest = session.latest_row(&k).expect("lookup").expect("recomputed");
    assert_eq!(latest.issue, 20200101);
    assert_eq!(latest.value, Some(1.0));
    assert_latest_invariant(&session);

    let report = delete_versions(&mut session, DeletionInput::Rows(vec![k.at_issue(20200101)]))
        .expect("delete last");
    assert_eq!(report.history_deleted, 1);
    assert_eq!(report.latest_deleted, 1);
    assert_eq!(report.latest_recomputed, 0);
    assert!(session.latest_row(&k).expect("lookup").is_none());
    assert!(session.history_versions(&k).expect("versions").is_empty());
}

#[test]
fn deleting_an_older_issue_leaves_latest_alone() {
    let (_dir, _path, mut session) = setup_store("older");
    load(
        &mut session,
        vec![
            draft("sig", "01000", 20200101, 20200101, 1.0),
            draft("sig", "01000", 20200101, 20200103, 3.0),
        ],
    );
    let k = key("sig", "01000", 20200101);
    let before = session.latest_row(&k).expect("lookup").expect("present");

    let report = delete_versions(&mut session, DeletionInput::Rows(vec![k.at_issue(20200101)]))
        .expect("delete");
    assert_eq!(report.history_deleted, 1);
    assert_eq!(report.latest_deleted, 0);
    assert_eq!(report.latest_recomputed, 0);
    assert_eq!(session.count_history_rows().expect("count"), 1);
    assert_eq!(session.latest_row(&k).expect("lookup"), Some(before));
}

#[test]
fn deleting_absent_versions_is_a_no_op() {
    let (_dir, _path, mut session) = setup_store("absent");
    load(&mut session, vec![draft("sig", "01000", 20200101, 20200101, 1.0)]);
    let report = delete_versions(
        &mut session,
        DeletionInput::Rows(vec![
            key("sig", "01000", 20200101).at_issue(20200109),
            key("other", "01000", 20200101).at_issue(20200101),
        ]),
    )
    .expect("delete");
    assert_eq!(report.requested, 2);
    assert_eq!(report.history_deleted, 0);
    assert_eq!(session.count_history_rows().expect("count"), 1);
    assert_eq!(session.count_latest_rows().expect("count"), 1);
}

#[test]
fn duplicate_requests_count_once() {
    let (_dir, _path, mut session) = setup_store("duplicates");
    load(
        &mut session,
        vec![
            draft("sig", "01000", 20200101, 20200101, 1.0),
            draft("sig", "01000", 20200101, 20200102, 2.0),
        ],
    );
    let target = key("sig", "01000", 20200101).at_issue(20200102);
    let report = delete_versions(
        &mut session,
        DeletionInput::Rows(vec![target.clone(), target.clone(), target]),
    )
    .expect("delete");
    assert_eq!(report.requested, 3);
    assert_eq!(report.history_deleted, 1);
    assert_eq!(report.latest_recomputed, 1);
    assert_eq!(session.count_latest_rows().expect("count"), 1);
    assert_latest_invariant(&session);
}

#[test]
fn mixed_batch_repairs_every_affected_key() {
    let (_dir, _path, mut session) = setup_store("mixed");
    let mut drafts = Vec::new();
    for geo in ["01000", "02000", "03000"] {
        for issue in [20200101, 20200102, 20200103] {
            drafts.push(draft("sig", geo, 20200101, issue, issue as f64));
        }
    }
    load(&mut session, drafts);
    let report = delete_versions(
        &mut session,
        DeletionInput::Rows(vec![
            key("sig", "01000", 20200101).at_issue(20200103),
            key("sig", "02000", 20200101).at_issue(20200102),
            key("sig", "03000", 20200101).at_issue(20200103),
            key("sig", "03000", 20200101).at_issue(20200102),
        ]),
    )
    .expect("delete");
    assert_eq!(report.history_deleted, 4);
    assert_eq!(report.latest_deleted, 2);
    assert_eq!(report.latest_recomputed, 2);
    let issue_of = |geo| {
        session
            .latest_row(&key("sig", geo, 20200101))
            .expect("lookup")
            .expect("present")
            .issue
    };
    assert_eq!(issue_of("01000"), 20200102);
    assert_eq!(issue_of("02000"), 20200103);
    assert_eq!(issue_of("03000"), 20200101);
    assert_latest_invariant(&session);
}

#[test]
fn deletion_file_drives_the_same_engine() {
    let (dir, _path, mut session) = setup_store("file");
    load(
        &mut session,
        vec![
            draft("sig", "01000", 20200101, 20200101, 1.0),
            draft("sig", "01000", 20200101, 20200102, 2.0),
            draft("sig", "02000", 20200101, 20200101, 5.0),
        ],
    );
    let file = dir.path().join("deletions.csv");
    fs::write(
        &file,
        "geo_id,value,stderr,sample_size,issue,time_value,geo_type,signal,source\n\
         01000,,,,20200102,20200101,county,sig,src\n\
         02000,5,0.5,100,20200101,20200101,county,sig,src\n",
    )
    .expect("write deletions");

    let report = delete_versions(&mut session, DeletionInput::File(file)).expect("delete");
    assert_eq!(report.history_deleted, 2);
    assert_eq!(session.count_history_rows().expect("count"), 1);
    assert_eq!(session.count_latest_rows().expect("count"), 1);
    assert_latest_invariant(&session);
}

#[test]
fn malformed_file_changes_nothing() {
    let (dir, _path, mut session) = setup_store("malformed");
    load(&mut session, vec![draft("sig", "01000", 20200101, 20200101, 1.0)]);
    let file = dir.path().join("deletions.csv");
    fs::write(
        &file,
        "geo_id,value,stderr,sample_size,issue,time_value,geo_type,signal,source\n\
         01000,,,,20200101,20200101,county,sig,src\n\
         02000,,,20200101,20200101,county,sig\n",
    )
    .expect("write deletions");

    let err = delete_versions(&mut session, DeletionInput::File(file)).expect_err("short record");
    assert!(matches!(err, StoreError::InvalidDeletionInput(_)), "{err}");
    assert_eq!(session.count_history_rows().expect("count"), 1);
    assert_eq!(session.count_latest_rows().expect("count"), 1);
}
