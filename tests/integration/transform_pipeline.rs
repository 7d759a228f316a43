//! Transforms, pipelines, caching and metrics

use super::test_utils::{engine, engine_without_cache_expiry};
use serde_json::{json, Value};
use strata::engine::StateEngine;
use strata::{BuiltinTransform, ErrorKind, Message, PipelineConfig, Role, State, StateError};

fn register_math(engine: &StateEngine) {
    let transforms = engine.transforms();
    transforms.register_transform("double", |mut state: State| {
        if let Some(n) = state.get("n").and_then(Value::as_i64) {
            state.set("n", json!(n * 2));
        }
        Ok(state)
    });
    transforms.register_transform("increment", |mut state: State| {
        if let Some(n) = state.get("n").and_then(Value::as_i64) {
            state.set("n", json!(n + 1));
        }
        Ok(state)
    });
}

#[test]
fn test_pipeline_matches_sequential_transforms() {
    let engine = engine();
    register_math(&engine);
    let store = engine.store();
    let sequential = store.create(None).unwrap();
    let piped = store.create(None).unwrap();
    store.set(&sequential, "n", json!(3)).unwrap();
    store.set(&piped, "n", json!(3)).unwrap();

    engine.transforms().apply_transform(&sequential, "double").unwrap();
    engine.transforms().apply_transform(&sequential, "increment").unwrap();

    engine
        .transforms()
        .register_pipeline(
            "math",
            vec!["double".to_string(), "increment".to_string()],
            PipelineConfig::default(),
        )
        .unwrap();
    let outcome = engine.transforms().apply_pipeline(&piped, "math").unwrap();

    assert_eq!(outcome.transforms_applied, 2);
    assert_eq!(outcome.state.get("n"), Some(&json!(7)));
    assert_eq!(
        store.values(&piped).unwrap(),
        store.values(&sequential).unwrap()
    );
}

#[test]
fn test_cache_hit_on_unchanged_context() {
    let engine = engine_without_cache_expiry();
    register_math(&engine);
    let store = engine.store();
    let ctx = store.create(None).unwrap();
    store.set(&ctx, "n", json!(1)).unwrap();
    engine
        .transforms()
        .register_pipeline("double", vec!["double".to_string()], PipelineConfig::cached())
        .unwrap();

    let first = engine.transforms().apply_pipeline(&ctx, "double").unwrap();
    let metrics = engine.transforms().get_metrics("double").unwrap();
    assert_eq!((metrics.cache_misses, metrics.cache_hits), (1, 0));

    let second = engine.transforms().apply_pipeline(&ctx, "double").unwrap();
    let metrics = engine.transforms().get_metrics("double").unwrap();
    assert_eq!((metrics.cache_misses, metrics.cache_hits), (1, 1));

    assert!(!first.from_cache);
    assert!(second.from_cache);
    assert_eq!(first.state, second.state);
    assert_eq!(store.get(&ctx, "n").unwrap(), Some(json!(2)));
}

#[test]
fn test_mutation_invalidates_cache() {
    let engine = engine_without_cache_expiry();
    register_math(&engine);
    let store = engine.store();
    let ctx = store.create(None).unwrap();
    store.set(&ctx, "n", json!(1)).unwrap();
    engine
        .transforms()
        .register_pipeline("double", vec!["double".to_string()], PipelineConfig::cached())
        .unwrap();

    engine.transforms().apply_pipeline(&ctx, "double").unwrap();
    store.set(&ctx, "n", json!(10)).unwrap();
    let outcome = engine.transforms().apply_pipeline(&ctx, "double").unwrap();

    assert!(!outcome.from_cache);
    assert_eq!(outcome.state.get("n"), Some(&json!(20)));
    assert_eq!(engine.transforms().clear_cache(), 1);
    assert_eq!(engine.transforms().cache_len(), 0);
}

#[test]
fn test_parent_mutation_invalidates_cache() {
    let engine = engine_without_cache_expiry();
    register_math(&engine);
    let store = engine.store();
    let parent = store.create(None).unwrap();
    let child = store.create(Some(&parent)).unwrap();
    store.set(&parent, "org", json!("acme")).unwrap();
    store.set(&child, "n", json!(1)).unwrap();
    engine
        .transforms()
        .register_pipeline("double", vec!["double".to_string()], PipelineConfig::cached())
        .unwrap();

    let first = engine.transforms().apply_pipeline(&child, "double").unwrap();
    assert_eq!(first.state.get("org"), Some(&json!("acme")));

    store.set(&parent, "org", json!("globex")).unwrap();
    let second = engine.transforms().apply_pipeline(&child, "double").unwrap();

    assert!(!second.from_cache);
    assert_eq!(second.state.get("org"), Some(&json!("globex")));
    assert_eq!(second.state, store.as_state(&child).unwrap());
}

#[test]
fn test_failing_step_stops_pipeline() {
    let engine = engine();
    register_math(&engine);
    engine
        .transforms()
        .register_transform("explode", |_state: State| {
            Err(StateError::InvalidArgument("boom".to_string()))
        });
    let store = engine.store();
    let ctx = store.create(None).unwrap();
    store.set(&ctx, "n", json!(1)).unwrap();
    engine
        .transforms()
        .register_pipeline(
            "broken",
            vec![
                "double".to_string(),
                "explode".to_string(),
                "increment".to_string(),
            ],
            PipelineConfig::default(),
        )
        .unwrap();

    let err = engine.transforms().apply_pipeline(&ctx, "broken").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransformFailed);
    assert!(matches!(err, StateError::TransformFailed { ref name, .. } if name == "explode"));
    assert_eq!(store.get(&ctx, "n").unwrap(), Some(json!(2)));

    let metrics = engine.transforms().get_metrics("broken").unwrap();
    assert_eq!(metrics.error_count, 1);
    let explode = engine.transforms().get_metrics("explode").unwrap();
    assert_eq!(explode.error_count, 1);
}

#[test]
fn test_missing_transform_and_pipeline() {
    let engine = engine();
    let ctx = engine.create_context(None).unwrap();

    let err = engine.transforms().apply_transform(&ctx, "nope").unwrap_err();
    assert!(matches!(err, StateError::TransformNotFound(_)));

    let err = engine.transforms().apply_pipeline(&ctx, "nope").unwrap_err();
    assert!(matches!(err, StateError::PipelineNotFound(_)));

    let err = engine.transforms().get_metrics("nope").unwrap_err();
    assert!(matches!(err, StateError::MetricsNotFound(_)));
}

#[test]
fn test_transform_reads_inherited_data_and_writes_locally() {
    let engine = engine();
    let store = engine.store();
    let parent = store.create(None).unwrap();
    let child = store.create(Some(&parent)).unwrap();
    store.set(&parent, "Display Name", json!("x")).unwrap();

    engine
        .transforms()
        .apply_transform(&child, "normalizeKeys")
        .unwrap();

    assert_eq!(store.get(&child, "display_name").unwrap(), Some(json!("x")));
    assert_eq!(store.get(&parent, "display_name").unwrap(), None);
}

#[test]
fn test_configured_builtin_limits_messages() {
    let engine = engine();
    let store = engine.store();
    let ctx = store.create(None).unwrap();
    for i in 0..4 {
        store
            .add_message(&ctx, Message::new(Role::User, format!("m{}", i)))
            .unwrap();
    }
    engine
        .transforms()
        .register_from_config("lastTwo", "limitMessages", &json!({"limit": 2}))
        .unwrap();

    let outcome = engine.transforms().apply_transform(&ctx, "lastTwo").unwrap();
    assert_eq!(outcome.transform, "lastTwo");
    // Write-back appends new messages only, so the local log is unchanged.
    assert_eq!(store.messages(&ctx).unwrap().len(), 4);
}

#[test]
fn test_builtins_registered_by_default() {
    let engine = engine();
    let names = engine.transforms().list_transforms();
    for builtin in BuiltinTransform::defaults() {
        assert!(names.contains(&builtin.name().to_string()));
    }
    assert!(engine.transforms().list_pipelines().is_empty());
}

#[test]
fn test_bad_builtin_config_is_rejected() {
    let engine = engine();
    let err = engine
        .transforms()
        .register_from_config("f", "filter", &json!({"pattern": "("}))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let err = engine
        .transforms()
        .register_from_config("l", "limitMessages", &json!({"limit": "many"}))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}
