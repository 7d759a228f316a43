//! Context registry
//!
//! `ContextStore` allocates ids, owns every context and routes reads and
//! writes through the merged-view resolution in `view`. Set and Delete events
//! are appended while the registry write lock is held, so the log order of
//! writes to a context matches the order they were applied in. Lock order is
//! always registry, then event log.

use super::view::Registry;
use super::{DeleteOutcome, InheritanceConfig, SharedContext, Snapshot};
use crate::error::StateError;
use crate::events::{Event, EventLog};
use crate::schema::{SchemaRegistry, ValidationResult};
use crate::state::{Artifact, Message, State};
use crate::types::{now, ContextId};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Revisions of a context and its live ancestors, nearest first
pub(crate) type ChainRevision = Vec<(ContextId, u64)>;

pub struct ContextStore {
    registry: RwLock<Registry>,
    events: Arc<EventLog>,
    schemas: Arc<SchemaRegistry>,
}

impl ContextStore {
    pub fn new(events: Arc<EventLog>, schemas: Arc<SchemaRegistry>) -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            events,
            schemas,
        }
    }

    pub fn events(&self) -> &Arc<EventLog> {
        &self.events
    }

    pub fn schemas(&self) -> &Arc<SchemaRegistry> {
        &self.schemas
    }

    /// Create a context, optionally under an existing parent
    pub fn create(&self, parent_id: Option<&str>) -> Result<ContextId, StateError> {
        let mut registry = self.registry.write();
        if let Some(parent) = parent_id {
            registry.node(parent)?;
        }
        let id = registry.allocate_id("context");
        registry.insert(SharedContext {
            id: id.clone(),
            parent_id: parent_id.map(str::to_string),
            local: State::new(),
            inheritance: InheritanceConfig::default(),
            revision: 0,
            created_at: now(),
        });
        debug!(context_id = %id, parent_id = ?parent_id, "Created context");
        Ok(id)
    }

    /// Register a parentless context around an existing state
    pub(crate) fn register_root(
        &self,
        prefix: &str,
        state: State,
        inheritance: InheritanceConfig,
    ) -> ContextId {
        let mut registry = self.registry.write();
        let id = registry.allocate_id(prefix);
        registry.insert(SharedContext {
            id: id.clone(),
            parent_id: None,
            local: state,
            inheritance,
            revision: 0,
            created_at: now(),
        });
        debug!(context_id = %id, "Registered root context");
        id
    }

    pub fn get(&self, id: &str, key: &str) -> Result<Option<Value>, StateError> {
        let registry = self.registry.read();
        Ok(registry.resolve(id, key)?.cloned())
    }

    /// Write `key` to the local layer, returning the previously resolved value
    pub fn set(&self, id: &str, key: &str, value: Value) -> Result<Option<Value>, StateError> {
        let mut registry = self.registry.write();
        let old = registry.resolve(id, key)?.cloned();
        let node = registry.node_mut(id)?;
        node.local.set(key, value.clone());
        node.revision += 1;
        self.events.append(Event::set(id, key, old.clone(), value));
        Ok(old)
    }

    /// Remove `key` from the local layer
    ///
    /// A key that only an ancestor holds is reported as existing but is left
    /// in place; shadowing deletes are not supported.
    pub fn delete(&self, id: &str, key: &str) -> Result<DeleteOutcome, StateError> {
        let mut registry = self.registry.write();
        let node = registry.node_mut(id)?;
        let Some(old) = node.local.delete(key) else {
            let inherited = registry.resolve(id, key)?.is_some();
            return Ok(DeleteOutcome {
                deleted: false,
                existed: inherited,
            });
        };
        node.revision += 1;
        self.events.append(Event::delete(id, key, old));
        Ok(DeleteOutcome {
            deleted: true,
            existed: true,
        })
    }

    pub fn has(&self, id: &str, key: &str) -> Result<bool, StateError> {
        Ok(self.registry.read().resolve(id, key)?.is_some())
    }

    /// Merged keys, sorted
    pub fn keys(&self, id: &str) -> Result<Vec<String>, StateError> {
        Ok(self.registry.read().merged(id)?.keys())
    }

    pub fn values(&self, id: &str) -> Result<BTreeMap<String, Value>, StateError> {
        let mut merged = self.registry.read().merged(id)?;
        Ok(merged.take_values())
    }

    /// Replace a context's inheritance config, keeping its id
    pub fn with_inheritance_config(
        &self,
        id: &str,
        config: InheritanceConfig,
    ) -> Result<SharedContext, StateError> {
        let mut registry = self.registry.write();
        let node = registry.node_mut(id)?;
        node.inheritance = config;
        node.revision += 1;
        debug!(context_id = id, ?config, "Updated inheritance config");
        Ok(node.clone())
    }

    /// New context with the same parent and inheritance, empty local layer
    pub fn clone_context(&self, id: &str) -> Result<ContextId, StateError> {
        let mut registry = self.registry.write();
        let source = registry.node(id)?;
        let parent_id = source.parent_id.clone();
        let inheritance = source.inheritance;
        let clone_id = registry.allocate_id("context");
        registry.insert(SharedContext {
            id: clone_id.clone(),
            parent_id,
            local: State::new(),
            inheritance,
            revision: 0,
            created_at: now(),
        });
        debug!(source = id, context_id = %clone_id, "Cloned context");
        Ok(clone_id)
    }

    /// Merged view as a flat state
    pub fn as_state(&self, id: &str) -> Result<State, StateError> {
        self.registry.read().merged(id)
    }

    pub fn local_state(&self, id: &str) -> Result<State, StateError> {
        Ok(self.registry.read().node(id)?.local.clone())
    }

    pub fn context(&self, id: &str) -> Result<SharedContext, StateError> {
        Ok(self.registry.read().node(id)?.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.registry.read().contexts.contains_key(id)
    }

    /// Registered context ids, sorted
    pub fn ids(&self) -> Vec<ContextId> {
        let mut ids: Vec<_> = self.registry.read().contexts.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.registry.read().contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Revisions along the parent chain; see `Registry::chain_revision`
    pub(crate) fn revision(&self, id: &str) -> Result<ChainRevision, StateError> {
        self.registry.read().chain_revision(id)
    }

    /// Merged view together with the chain revision it was read at
    pub(crate) fn state_at_revision(
        &self,
        id: &str,
    ) -> Result<(State, ChainRevision), StateError> {
        let registry = self.registry.read();
        Ok((registry.merged(id)?, registry.chain_revision(id)?))
    }

    fn mutate_local<F>(&self, id: &str, apply: F) -> Result<(), StateError>
    where
        F: FnOnce(&mut State),
    {
        let mut registry = self.registry.write();
        let node = registry.node_mut(id)?;
        apply(&mut node.local);
        node.revision += 1;
        Ok(())
    }

    pub fn add_artifact(&self, id: &str, artifact: Artifact) -> Result<(), StateError> {
        self.mutate_local(id, |local| local.add_artifact(artifact))
    }

    pub fn add_message(&self, id: &str, message: Message) -> Result<(), StateError> {
        self.mutate_local(id, |local| local.add_message(message))
    }

    pub fn set_metadata(&self, id: &str, key: &str, value: Value) -> Result<(), StateError> {
        self.mutate_local(id, |local| local.set_metadata(key, value))
    }

    pub fn get_artifact(&self, id: &str, artifact_id: &str) -> Result<Option<Artifact>, StateError> {
        Ok(self.as_state(id)?.get_artifact(artifact_id).cloned())
    }

    pub fn artifacts(&self, id: &str) -> Result<BTreeMap<String, Artifact>, StateError> {
        Ok(self.as_state(id)?.artifacts().clone())
    }

    pub fn messages(&self, id: &str) -> Result<Vec<Message>, StateError> {
        Ok(self.as_state(id)?.messages().to_vec())
    }

    pub fn get_metadata(&self, id: &str, key: &str) -> Result<Option<Value>, StateError> {
        Ok(self.as_state(id)?.get_metadata(key).cloned())
    }

    /// Remove a context and its schema binding
    ///
    /// Children keep their dangling parent id and resolve as roots afterwards.
    pub fn clear(&self, id: &str) -> Result<(), StateError> {
        let orphans = {
            let mut registry = self.registry.write();
            let removed = registry
                .contexts
                .remove(id)
                .ok_or_else(|| StateError::ContextNotFound(id.to_string()))?;
            if let Some(parent) = &removed.parent_id {
                if let Some(siblings) = registry.children.get_mut(parent) {
                    siblings.remove(id);
                }
            }
            registry.children.remove(id).unwrap_or_default()
        };
        self.schemas.unbind(id);
        if !orphans.is_empty() {
            warn!(
                context_id = id,
                orphans = ?orphans,
                "Cleared context still referenced as parent"
            );
        }
        debug!(context_id = id, "Cleared context");
        Ok(())
    }

    /// Copy the merged and local layers without recording an event
    pub fn capture(&self, id: &str) -> Result<Snapshot, StateError> {
        let registry = self.registry.read();
        let node = registry.node(id)?;
        Ok(Snapshot {
            context_id: node.id.clone(),
            parent_id: node.parent_id.clone(),
            timestamp: now(),
            state: registry.merged(id)?,
            local_state: node.local.clone(),
            inheritance: node.inheritance,
        })
    }

    /// Capture a snapshot and record it in the event log
    pub fn snapshot(&self, id: &str) -> Result<Snapshot, StateError> {
        let snapshot = self.capture(id)?;
        let payload = serde_json::to_value(&snapshot)
            .map_err(|e| StateError::Deserialization(e.to_string()))?;
        self.events
            .append(Event::snapshot(id, payload).with_timestamp(snapshot.timestamp));
        Ok(snapshot)
    }

    pub fn bind_schema(&self, id: &str, schema_id: &str) -> Result<(), StateError> {
        if !self.contains(id) {
            return Err(StateError::ContextNotFound(id.to_string()));
        }
        self.schemas.bind(id, schema_id)
    }

    /// Validate the merged data against the bound schema
    pub fn validate(&self, id: &str) -> Result<ValidationResult, StateError> {
        let data = self.values(id)?;
        self.schemas.validate(id, &data)
    }

    /// Fold a transform result back into the local layer
    ///
    /// Keys whose value differs from `input` are overwritten (each recorded
    /// as a Set event); artifacts and metadata are added or replaced. When
    /// `input`'s messages are a prefix of the output's, the tail is appended;
    /// otherwise every output message not in `input` is appended.
    pub(crate) fn merge_into_local(
        &self,
        id: &str,
        input: &State,
        mut output: State,
    ) -> Result<(), StateError> {
        let mut registry = self.registry.write();
        let mut changed = Vec::new();
        for (key, value) in output.take_values() {
            if input.get(&key) == Some(&value) {
                continue;
            }
            let old = registry.resolve(id, &key)?.cloned();
            changed.push((key, old, value));
        }

        let node = registry.node_mut(id)?;
        for (key, old, value) in changed {
            node.local.set(key.clone(), value.clone());
            self.events.append(Event::set(id, &key, old, value));
        }
        for artifact in output.artifacts().values() {
            if input.get_artifact(&artifact.id) != Some(artifact) {
                node.local.add_artifact(artifact.clone());
            }
        }
        for (key, value) in output.all_metadata() {
            if input.get_metadata(key) != Some(value) {
                node.local.set_metadata(key.clone(), value.clone());
            }
        }
        for message in appended_messages(input.messages(), output.messages()) {
            node.local.add_message(message.clone());
        }
        node.revision += 1;
        Ok(())
    }
}

/// Messages a transform added on top of `input`
fn appended_messages<'a>(input: &[Message], output: &'a [Message]) -> Vec<&'a Message> {
    if output.starts_with(input) {
        return output[input.len()..].iter().collect();
    }
    output.iter().filter(|m| !input.contains(m)).collect()
}
