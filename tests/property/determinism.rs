//! Property-based tests for determinism guarantees

use proptest::prelude::*;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use strata::engine::StateEngine;
use strata::{LoadOptions, PersistOptions};
use tempfile::TempDir;

#[derive(Debug, Clone)]
enum Op {
    Set(String, i64),
    Delete(String),
}

fn key() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["a", "b", "c", "d"]).prop_map(str::to_string)
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (key(), any::<i64>()).prop_map(|(k, v)| Op::Set(k, v)),
        1 => key().prop_map(Op::Delete),
    ]
}

/// Replaying a root context's history reproduces its data, last write winning
#[test]
fn test_replay_determinism_property() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(&prop::collection::vec(op(), 0..60), |ops| {
            let engine = StateEngine::in_memory().unwrap();
            let store = engine.store();
            let ctx = store.create(None).unwrap();
            let mut expected: BTreeMap<String, Value> = BTreeMap::new();

            for op in &ops {
                match op {
                    Op::Set(k, v) => {
                        store.set(&ctx, k, json!(v)).unwrap();
                        expected.insert(k.clone(), json!(v));
                    }
                    Op::Delete(k) => {
                        store.delete(&ctx, k).unwrap();
                        expected.remove(k);
                    }
                }
            }

            let outcome = engine.replay(&ctx, None, None).unwrap();
            prop_assert_eq!(store.values(&ctx).unwrap(), expected.clone());
            prop_assert_eq!(store.values(&outcome.context_id).unwrap(), expected);
            Ok(())
        })
        .unwrap();
}

/// A child's merged view is its parent's data overlaid with its own
#[test]
fn test_merged_view_overlay_property() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(
            &(
                prop::collection::btree_map(key(), any::<i64>(), 0..4),
                prop::collection::btree_map(key(), any::<i64>(), 0..4),
            ),
            |(parent_data, child_data)| {
                let engine = StateEngine::in_memory().unwrap();
                let store = engine.store();
                let parent = store.create(None).unwrap();
                let child = store.create(Some(&parent)).unwrap();
                for (k, v) in &parent_data {
                    store.set(&parent, k, json!(v)).unwrap();
                }
                for (k, v) in &child_data {
                    store.set(&child, k, json!(v)).unwrap();
                }

                let mut expected: BTreeMap<String, Value> = parent_data
                    .iter()
                    .map(|(k, v)| (k.clone(), json!(v)))
                    .collect();
                expected.extend(child_data.iter().map(|(k, v)| (k.clone(), json!(v))));

                prop_assert_eq!(store.values(&child).unwrap(), expected);
                for (k, v) in &parent_data {
                    prop_assert_eq!(store.get(&parent, k).unwrap(), Some(json!(v)));
                }
                Ok(())
            },
        )
        .unwrap();
}

/// Persist then load yields the same merged data on both encodings
#[test]
fn test_persistence_roundtrip_property() {
    let config = ProptestConfig {
        cases: 32,
        ..ProptestConfig::default()
    };
    let mut runner = proptest::test_runner::TestRunner::new(config);

    runner
        .run(
            &(
                prop::collection::btree_map("[a-z]{1,8}", any::<String>(), 0..8),
                any::<bool>(),
            ),
            |(data, compress)| {
                let temp_dir = TempDir::new().unwrap();
                let engine = StateEngine::builder()
                    .persistence_dir(temp_dir.path())
                    .build()
                    .unwrap();
                let store = engine.store();
                let ctx = store.create(None).unwrap();
                for (k, v) in &data {
                    store.set(&ctx, k, json!(v)).unwrap();
                }
                let before = store.values(&ctx).unwrap();

                engine
                    .persistence()
                    .persist(&ctx, PersistOptions::version(1).compressed(compress))
                    .unwrap();
                let loaded = engine
                    .persistence()
                    .load(&ctx, LoadOptions::version(1))
                    .unwrap();

                prop_assert_eq!(store.values(&loaded.context_id).unwrap(), before);
                Ok(())
            },
        )
        .unwrap();
}
