//! Event recording, querying and replay

use super::test_utils::engine;
use serde_json::json;
use strata::events::{EventKind, EventQuery, EVENT_TRANSFORMED};
use strata::StateError;

#[test]
fn test_mutations_are_recorded_in_order() {
    let engine = engine();
    let store = engine.store();
    let ctx = store.create(None).unwrap();

    store.set(&ctx, "a", json!(1)).unwrap();
    store.set(&ctx, "a", json!(2)).unwrap();
    store.delete(&ctx, "a").unwrap();

    let events = engine
        .events()
        .query(&EventQuery::new().context(ctx.clone()))
        .unwrap();
    let kinds: Vec<_> = events.iter().map(|e| e.kind.clone()).collect();
    assert_eq!(kinds, vec![EventKind::Delete, EventKind::Set, EventKind::Set]);
    assert_eq!(events[1].payload["old_value"], json!(1));
    assert_eq!(events[1].payload["new_value"], json!(2));
    assert!(events.windows(2).all(|w| w[0].seq > w[1].seq));
}

#[test]
fn test_query_filters_by_context_and_limit() {
    let engine = engine();
    let store = engine.store();
    let a = store.create(None).unwrap();
    let b = store.create(None).unwrap();
    for i in 0..5 {
        store.set(&a, &format!("k{}", i), json!(i)).unwrap();
        store.set(&b, "k", json!(i)).unwrap();
    }

    let only_b = engine
        .events()
        .query(&EventQuery::new().context(b.clone()))
        .unwrap();
    assert_eq!(only_b.len(), 5);
    assert!(only_b.iter().all(|e| e.context_id == b));

    let latest = engine
        .events()
        .query(&EventQuery::new().context(a.clone()).limit(2))
        .unwrap();
    assert_eq!(latest.len(), 2);
    assert_eq!(latest[0].key(), Some("k4"));
}

#[test]
fn test_inverted_range_is_rejected() {
    let engine = engine();
    let err = EventQuery::new()
        .with_range_str(Some("2024-02-01T00:00:00Z"), Some("2024-01-01T00:00:00Z"))
        .and_then(|query| engine.events().query(&query))
        .unwrap_err();
    assert!(matches!(err, StateError::InvalidArgument(_)));
}

#[test]
fn test_replay_reconstructs_live_state() {
    let engine = engine();
    let store = engine.store();
    let ctx = store.create(None).unwrap();

    store.set(&ctx, "name", json!("first")).unwrap();
    store.set(&ctx, "count", json!(1)).unwrap();
    store.set(&ctx, "name", json!("second")).unwrap();
    store.set(&ctx, "temp", json!(true)).unwrap();
    store.delete(&ctx, "temp").unwrap();
    store.set(&ctx, "count", json!(2)).unwrap();

    let outcome = engine.replay(&ctx, None, None).unwrap();

    assert_ne!(outcome.context_id, ctx);
    assert!(outcome.context_id.starts_with(&format!("replay_{}", ctx)));
    assert_eq!(outcome.applied, 6);
    assert_eq!(
        store.values(&outcome.context_id).unwrap(),
        store.values(&ctx).unwrap()
    );
}

#[test]
fn test_replay_matches_concurrent_writers() {
    let engine = engine();
    let ctx = engine.store().create(None).unwrap();

    std::thread::scope(|scope| {
        for t in 0..8 {
            let store = engine.store();
            let ctx = &ctx;
            scope.spawn(move || {
                for i in 0..50 {
                    store.set(ctx, "k", json!(t * 100 + i)).unwrap();
                }
            });
        }
    });

    let outcome = engine.replay(&ctx, None, None).unwrap();
    assert_eq!(outcome.applied, 400);
    assert_eq!(
        engine.store().get(&outcome.context_id, "k").unwrap(),
        engine.store().get(&ctx, "k").unwrap()
    );
}

#[test]
fn test_replay_ignores_other_contexts_and_custom_events() {
    let engine = engine();
    let store = engine.store();
    let ctx = store.create(None).unwrap();
    let other = store.create(None).unwrap();

    store.set(&ctx, "k", json!("mine")).unwrap();
    store.set(&other, "k", json!("theirs")).unwrap();
    store.snapshot(&ctx).unwrap();
    engine.transforms().apply_transform(&ctx, "sanitize").unwrap();

    let transformed = engine
        .events()
        .query(&EventQuery::new().context(ctx.clone()))
        .unwrap()
        .into_iter()
        .filter(|e| e.kind == EventKind::Custom(EVENT_TRANSFORMED.to_string()))
        .count();
    assert_eq!(transformed, 1);

    let outcome = engine.replay(&ctx, None, None).unwrap();
    assert_eq!(outcome.applied, 1);
    assert_eq!(
        store.get(&outcome.context_id, "k").unwrap(),
        Some(json!("mine"))
    );
}

#[test]
fn test_replay_of_cleared_context_still_works() {
    let engine = engine();
    let store = engine.store();
    let ctx = store.create(None).unwrap();
    store.set(&ctx, "k", json!(1)).unwrap();
    store.clear(&ctx).unwrap();

    let outcome = engine.replay(&ctx, None, None).unwrap();
    assert_eq!(store.get(&outcome.context_id, "k").unwrap(), Some(json!(1)));
}

#[test]
fn test_capacity_evicts_oldest() {
    let mut config = strata::EngineConfig::default();
    config.events.capacity = 3;
    let engine = strata::StateEngine::builder().config(config).build().unwrap();
    let ctx = engine.create_context(None).unwrap();
    for i in 0..5 {
        engine.store().set(&ctx, "k", json!(i)).unwrap();
    }

    assert_eq!(engine.events().len(), 3);
    let events = engine.events().query(&EventQuery::new()).unwrap();
    assert_eq!(events.last().unwrap().payload["new_value"], json!(2));
}

#[test]
fn test_clear_history_for_one_context() {
    let engine = engine();
    let store = engine.store();
    let a = store.create(None).unwrap();
    let b = store.create(None).unwrap();
    store.set(&a, "k", json!(1)).unwrap();
    store.set(&a, "k", json!(2)).unwrap();
    store.set(&b, "k", json!(3)).unwrap();

    assert_eq!(engine.events().clear(Some(&a)), 2);
    assert_eq!(engine.events().len(), 1);
    assert_eq!(engine.events().clear(None), 1);
    assert!(engine.events().is_empty());
}
