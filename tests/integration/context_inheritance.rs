//! Parent/child resolution, override independence and clone isolation

use super::test_utils::engine;
use serde_json::json;
use strata::{InheritanceConfig, Message, Role, StateError};

#[test]
fn test_child_reads_parent_key() {
    let engine = engine();
    let store = engine.store();
    let parent = store.create(None).unwrap();
    let child = store.create(Some(&parent)).unwrap();

    store.set(&parent, "k", json!({"nested": [1, 2]})).unwrap();

    assert_eq!(
        store.get(&child, "k").unwrap(),
        store.get(&parent, "k").unwrap()
    );
    assert!(store.has(&child, "k").unwrap());
}

#[test]
fn test_override_is_independent() {
    let engine = engine();
    let store = engine.store();
    let parent = store.create(None).unwrap();
    let child = store.create(Some(&parent)).unwrap();

    store.set(&parent, "k", json!("v1")).unwrap();
    let previous = store.set(&child, "k", json!("v2")).unwrap();

    assert_eq!(previous, Some(json!("v1")));
    assert_eq!(store.get(&child, "k").unwrap(), Some(json!("v2")));
    assert_eq!(store.get(&parent, "k").unwrap(), Some(json!("v1")));
}

#[test]
fn test_delete_of_inherited_key_is_scoped() {
    let engine = engine();
    let store = engine.store();
    let parent = store.create(None).unwrap();
    let child = store.create(Some(&parent)).unwrap();
    store.set(&parent, "k", json!(1)).unwrap();

    let outcome = store.delete(&child, "k").unwrap();

    assert!(outcome.existed);
    assert!(!outcome.deleted);
    assert_eq!(store.get(&child, "k").unwrap(), Some(json!(1)));
}

#[test]
fn test_delete_of_missing_key() {
    let engine = engine();
    let store = engine.store();
    let ctx = store.create(None).unwrap();

    let outcome = store.delete(&ctx, "absent").unwrap();
    assert!(!outcome.existed);
    assert!(!outcome.deleted);
}

#[test]
fn test_clone_isolation() {
    let engine = engine();
    let store = engine.store();
    let parent = store.create(None).unwrap();
    let ctx = store.create(Some(&parent)).unwrap();
    store.set(&parent, "shared", json!("p")).unwrap();
    store.set(&ctx, "mine", json!("c")).unwrap();

    let copy = store.clone_context(&ctx).unwrap();

    assert_ne!(copy, ctx);
    assert_eq!(
        store.context(&copy).unwrap().parent_id,
        Some(parent.clone())
    );
    assert_eq!(store.get(&copy, "mine").unwrap(), None);
    assert_eq!(store.get(&copy, "shared").unwrap(), Some(json!("p")));

    store.set(&copy, "mine", json!("other")).unwrap();
    assert_eq!(store.get(&ctx, "mine").unwrap(), Some(json!("c")));
}

#[test]
fn test_three_level_chain_resolves_nearest() {
    let engine = engine();
    let store = engine.store();
    let root = store.create(None).unwrap();
    let middle = store.create(Some(&root)).unwrap();
    let leaf = store.create(Some(&middle)).unwrap();

    store.set(&root, "a", json!("root")).unwrap();
    store.set(&root, "b", json!("root")).unwrap();
    store.set(&middle, "b", json!("middle")).unwrap();

    assert_eq!(store.get(&leaf, "a").unwrap(), Some(json!("root")));
    assert_eq!(store.get(&leaf, "b").unwrap(), Some(json!("middle")));
    assert_eq!(store.keys(&leaf).unwrap(), vec!["a", "b"]);
}

#[test]
fn test_inheritance_flags_limit_messages() {
    let engine = engine();
    let store = engine.store();
    let parent = store.create(None).unwrap();
    let child = store.create(Some(&parent)).unwrap();
    store
        .add_message(&parent, Message::new(Role::System, "be brief"))
        .unwrap();
    store
        .add_message(&child, Message::new(Role::User, "hello"))
        .unwrap();

    assert_eq!(store.messages(&child).unwrap().len(), 2);
    assert_eq!(store.messages(&child).unwrap()[0].content, "be brief");

    let config = InheritanceConfig {
        messages: false,
        ..InheritanceConfig::default()
    };
    let updated = store.with_inheritance_config(&child, config).unwrap();
    assert_eq!(updated.id, child);

    let messages = store.messages(&child).unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "hello");
}

#[test]
fn test_metadata_inheritance() {
    let engine = engine();
    let store = engine.store();
    let parent = store.create(None).unwrap();
    let child = store.create(Some(&parent)).unwrap();
    store.set_metadata(&parent, "owner", json!("team-a")).unwrap();

    assert_eq!(
        store.get_metadata(&child, "owner").unwrap(),
        Some(json!("team-a"))
    );

    store
        .with_inheritance_config(
            &child,
            InheritanceConfig::from_values(&json!(true), &json!(true), &json!(false)).unwrap(),
        )
        .unwrap();
    assert_eq!(store.get_metadata(&child, "owner").unwrap(), None);
}

#[test]
fn test_unknown_parent_is_rejected() {
    let engine = engine();
    let err = engine.store().create(Some("context_404")).unwrap_err();
    assert!(matches!(err, StateError::ContextNotFound(id) if id == "context_404"));
}

#[test]
fn test_cleared_parent_leaves_child_as_root() {
    let engine = engine();
    let store = engine.store();
    let parent = store.create(None).unwrap();
    let child = store.create(Some(&parent)).unwrap();
    store.set(&parent, "k", json!(1)).unwrap();
    store.set(&child, "own", json!(2)).unwrap();

    store.clear(&parent).unwrap();

    assert!(!store.contains(&parent));
    assert_eq!(store.get(&child, "k").unwrap(), None);
    assert_eq!(store.get(&child, "own").unwrap(), Some(json!(2)));
    assert!(store.get(&parent, "k").unwrap_err().is_not_found());
}
