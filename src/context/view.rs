//! Context arena and merged-view resolution.

use super::{InheritanceConfig, SharedContext};
use crate::error::StateError;
use crate::state::State;
use crate::types::ContextId;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

/// Owning arena of contexts plus the reverse parent index
#[derive(Default)]
pub(crate) struct Registry {
    pub contexts: HashMap<ContextId, SharedContext>,
    pub children: HashMap<ContextId, BTreeSet<ContextId>>,
    pub next_id: u64,
}

impl Registry {
    pub fn allocate_id(&mut self, prefix: &str) -> ContextId {
        self.next_id += 1;
        format!("{}_{}", prefix, self.next_id)
    }

    pub fn node(&self, id: &str) -> Result<&SharedContext, StateError> {
        self.contexts
            .get(id)
            .ok_or_else(|| StateError::ContextNotFound(id.to_string()))
    }

    pub fn node_mut(&mut self, id: &str) -> Result<&mut SharedContext, StateError> {
        self.contexts
            .get_mut(id)
            .ok_or_else(|| StateError::ContextNotFound(id.to_string()))
    }

    pub fn insert(&mut self, context: SharedContext) {
        if let Some(parent) = &context.parent_id {
            self.children
                .entry(parent.clone())
                .or_default()
                .insert(context.id.clone());
        }
        self.contexts.insert(context.id.clone(), context);
    }

    /// Ancestors of `id` from its parent upwards, stopping at a dangling link
    fn ancestors(&self, id: &str) -> Result<Vec<&SharedContext>, StateError> {
        let mut chain = Vec::new();
        let mut current = self.node(id)?.parent_id.as_deref();
        while let Some(parent_id) = current {
            let Some(parent) = self.contexts.get(parent_id) else {
                break;
            };
            // Ids are fresh at creation so a cycle cannot form; the bound
            // keeps a corrupted arena from looping.
            if chain.len() > self.contexts.len() {
                break;
            }
            chain.push(parent);
            current = parent.parent_id.as_deref();
        }
        Ok(chain)
    }

    /// Local-first key lookup through the parent chain
    pub fn resolve(&self, id: &str, key: &str) -> Result<Option<&Value>, StateError> {
        let node = self.node(id)?;
        if let Some(value) = node.local.get(key) {
            return Ok(Some(value));
        }
        Ok(self
            .ancestors(id)?
            .into_iter()
            .find_map(|ancestor| ancestor.local.get(key)))
    }

    /// Revisions of `id` and every live ancestor, nearest first
    ///
    /// Changes whenever any layer feeding the merged view changes, or when an
    /// ancestor is cleared out of the chain.
    pub fn chain_revision(&self, id: &str) -> Result<Vec<(ContextId, u64)>, StateError> {
        let node = self.node(id)?;
        let mut chain = vec![(node.id.clone(), node.revision)];
        chain.extend(
            self.ancestors(id)?
                .into_iter()
                .map(|ancestor| (ancestor.id.clone(), ancestor.revision)),
        );
        Ok(chain)
    }

    /// Compose the merged view of `id`, local entries winning
    pub fn merged(&self, id: &str) -> Result<State, StateError> {
        let node = self.node(id)?;
        let ancestors = self.ancestors(id)?;

        let mut layers = ancestors.into_iter().rev();
        let mut acc = match layers.next() {
            Some(root) => root.local.clone(),
            None => return Ok(node.local.clone()),
        };
        for layer in layers.chain(std::iter::once(node)) {
            acc = overlay(acc, &layer.local, &layer.inheritance);
        }
        Ok(acc)
    }
}

fn overlay(mut base: State, local: &State, inheritance: &InheritanceConfig) -> State {
    let mut merged = State::new();

    let mut data = base.take_values();
    data.extend(local.values().iter().map(|(k, v)| (k.clone(), v.clone())));
    merged.set_values(data);

    if inheritance.artifacts {
        for artifact in base.artifacts().values() {
            merged.add_artifact(artifact.clone());
        }
    }
    for artifact in local.artifacts().values() {
        merged.add_artifact(artifact.clone());
    }

    let mut messages = if inheritance.messages {
        base.messages().to_vec()
    } else {
        Vec::new()
    };
    messages.extend(local.messages().iter().cloned());
    merged.set_messages(messages);

    if inheritance.metadata {
        for (key, value) in base.all_metadata() {
            merged.set_metadata(key.clone(), value.clone());
        }
    }
    for (key, value) in local.all_metadata() {
        merged.set_metadata(key.clone(), value.clone());
    }

    merged
}
