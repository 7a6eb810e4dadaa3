#![allow(missing_docs)]

mod common;

use std::collections::BTreeMap;

use episignal::{
    acquisition::{delete_versions, load_observations, DeletionInput, LoadOptions},
    admin::{verify, VerifyLevel},
    store::StoreOptions,
    types::FullKey,
};
use proptest::prelude::*;

use common::{assert_latest_invariant, draft, key, setup_store};

const GEOS: [&str; 3] = ["01000", "02000", "03000"];

#[derive(Debug, Clone)]
enum Operation {
    Load {
        rows: Vec<(usize, i64, i64, f64)>,
        batch_size: usize,
    },
    Delete {
        versions: Vec<(usize, i64, i64)>,
    },
}

fn full_key(geo: usize, day: i64, delay: i64) -> FullKey {
    let time_value = 20200101 + day;
    key("sig", GEOS[geo], time_value).at_issue(time_value + delay)
}

fn arb_operation() -> impl Strategy<Value = Operation> {
    prop_oneof![
        3 => (
            prop::collection::vec((0..GEOS.len(), 0i64..3, 0i64..5, -100.0f64..100.0), 1..12),
            1usize..6,
        )
            .prop_map(|(rows, batch_size)| Operation::Load { rows, batch_size }),
        1 => prop::collection::vec((0..GEOS.len(), 0i64..3, 0i64..5), 1..6)
            .prop_map(|versions| Operation::Delete { versions }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn latest_tracks_newest_surviving_issue(ops in prop::collection::vec(arb_operation(), 1..12)) {
        let (_dir, path, mut session) = setup_store("prop");

        for op in ops {
            match op {
                Operation::Load { rows, batch_size } => {
                    // One version per full key; the staging key rejects duplicates.
                    let mut unique = BTreeMap::new();
                    for (geo, day, delay, value) in rows {
                        unique.insert((geo, day, delay), value);
                    }
                    let drafts = unique
                        .into_iter()
                        .map(|((geo, day, delay), value)| {
                            let time_value = 20200101 + day;
                            draft("sig", GEOS[geo], time_value, time_value + delay, value)
                        })
                        .collect();
                    let opts = LoadOptions { batch_size, commit_partial: false };
                    load_observations(&mut session, drafts, &opts).expect("load");
                }
                Operation::Delete { versions } => {
                    let rows = versions
                        .into_iter()
                        .map(|(geo, day, delay)| full_key(geo, day, delay))
                        .collect();
                    delete_versions(&mut session, DeletionInput::Rows(rows)).expect("delete");
                }
            }
            assert_latest_invariant(&session);
        }

        let report = verify(&path, &StoreOptions::default(), VerifyLevel::Full).expect("verify");
        prop_assert!(report.success, "findings: {:?}", report.findings);
        prop_assert_eq!(session.count_staging_rows().expect("count"), 0);
    }
}
