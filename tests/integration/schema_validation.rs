//! Schema binding and validation through the context store

use super::test_utils::engine;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use strata::engine::StateEngine;
use strata::schema::{
    InMemorySchemaRepository, SchemaRepository, StructValidator, NO_SCHEMA_MESSAGE,
};
use strata::{SchemaDef, StateError};

#[test]
fn test_unbound_context_is_valid() {
    let engine = engine();
    let ctx = engine.create_context(None).unwrap();

    let result = engine.store().validate(&ctx).unwrap();
    assert!(result.valid);
    assert_eq!(result.message.as_deref(), Some(NO_SCHEMA_MESSAGE));
}

#[test]
fn test_missing_required_field() {
    let engine = engine();
    let store = engine.store();
    let ctx = store.create(None).unwrap();
    engine
        .schemas()
        .register_schema(SchemaDef::new("named").require("name"))
        .unwrap();
    store.bind_schema(&ctx, "named").unwrap();

    let result = store.validate(&ctx).unwrap();
    assert!(!result.valid);
    assert_eq!(result.errors, vec!["name is required".to_string()]);

    store.set(&ctx, "name", json!("ok")).unwrap();
    assert!(store.validate(&ctx).unwrap().valid);
}

#[test]
fn test_validation_sees_inherited_data() {
    let engine = engine();
    let store = engine.store();
    let parent = store.create(None).unwrap();
    let child = store.create(Some(&parent)).unwrap();
    store.set(&parent, "name", json!("from parent")).unwrap();
    engine
        .schemas()
        .register_schema(SchemaDef::new("named").require("name"))
        .unwrap();
    store.bind_schema(&child, "named").unwrap();

    assert!(store.validate(&child).unwrap().valid);
}

#[test]
fn test_schema_from_host_value() {
    let engine = engine();
    let store = engine.store();
    let def = SchemaDef::from_value(
        "task",
        &json!({
            "title": "Task",
            "properties": {
                "priority": {"type": "integer", "validator": "positive"},
                "done": "boolean"
            },
            "required": ["priority"]
        }),
    )
    .unwrap();
    engine.schemas().register_schema(def).unwrap();
    engine
        .schemas()
        .register_custom_validator("positive", |v: &Value| v.as_i64().map_or(false, |n| n > 0));

    let ctx = store.create(None).unwrap();
    store.bind_schema(&ctx, "task").unwrap();
    store.set(&ctx, "priority", json!(-1)).unwrap();
    store.set(&ctx, "done", json!("false")).unwrap();

    let result = store.validate(&ctx).unwrap();
    assert!(!result.valid);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].contains("positive"));

    store.set(&ctx, "priority", json!(3)).unwrap();
    assert!(store.validate(&ctx).unwrap().valid);
}

#[test]
fn test_binding_requires_known_context_and_schema() {
    let engine = engine();
    let ctx = engine.create_context(None).unwrap();

    let err = engine.store().bind_schema(&ctx, "absent").unwrap_err();
    assert!(matches!(err, StateError::SchemaNotFound(_)));

    engine.schemas().register_schema(SchemaDef::new("s")).unwrap();
    let err = engine.store().bind_schema("context_999", "s").unwrap_err();
    assert!(matches!(err, StateError::ContextNotFound(_)));
}

#[test]
fn test_clear_removes_binding() {
    let engine = engine();
    let ctx = engine.create_context(None).unwrap();
    engine.schemas().register_schema(SchemaDef::new("s")).unwrap();
    engine.store().bind_schema(&ctx, "s").unwrap();
    assert_eq!(engine.schemas().binding(&ctx), Some("s".to_string()));

    engine.store().clear(&ctx).unwrap();
    assert_eq!(engine.schemas().binding(&ctx), None);
}

#[test]
fn test_versioned_validation() {
    let engine = engine();
    engine.schemas().register_schema(SchemaDef::new("s").require("a")).unwrap();
    let data: BTreeMap<String, Value> = BTreeMap::from([("a".to_string(), json!(1))]);

    assert!(engine.schemas().validate_with_version("s", 1, &data).unwrap().valid);
    let err = engine
        .schemas()
        .validate_with_version("s", 2, &data)
        .unwrap_err();
    assert!(matches!(err, StateError::SchemaVersionNotFound { version: 2, .. }));
    assert_eq!(engine.schemas().schema_versions("s").unwrap().len(), 1);
}

#[test]
fn test_engine_with_custom_backends() {
    let repository = Arc::new(InMemorySchemaRepository::new());
    repository.save(SchemaDef::new("preloaded").require("x")).unwrap();

    let engine = StateEngine::builder()
        .schema_repository(repository)
        .validator(Arc::new(StructValidator::strict()))
        .build()
        .unwrap();
    let ctx = engine.create_context(None).unwrap();
    engine.store().bind_schema(&ctx, "preloaded").unwrap();
    engine.store().set(&ctx, "x", json!(1)).unwrap();

    assert!(engine.store().validate(&ctx).unwrap().valid);
    assert_eq!(engine.schemas().list_schemas().unwrap(), vec!["preloaded"]);
}
