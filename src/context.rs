//! Shared Contexts
//!
//! A shared context is a node in the inheritance tree: a local `State` layer
//! plus an optional parent id. Contexts live in one owning registry keyed by
//! id; the parent relation is stored as an id, never as a live reference.
//!
//! Reads compose the merged view. Key/value data always falls back through
//! the parent chain; artifacts, messages and metadata fall back only when the
//! context's inheritance config permits it. Writes only touch the local layer.

mod store;
mod view;

pub use store::ContextStore;
pub(crate) use store::ChainRevision;

use crate::error::StateError;
use crate::state::State;
use crate::types::{ContextId, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which non-data categories a context inherits from its parent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InheritanceConfig {
    pub messages: bool,
    pub artifacts: bool,
    pub metadata: bool,
}

impl Default for InheritanceConfig {
    fn default() -> Self {
        Self {
            messages: true,
            artifacts: true,
            metadata: true,
        }
    }
}

impl InheritanceConfig {
    pub fn new(messages: bool, artifacts: bool, metadata: bool) -> Self {
        Self {
            messages,
            artifacts,
            metadata,
        }
    }

    /// Build from host-supplied values; every flag must be a boolean
    pub fn from_values(
        messages: &Value,
        artifacts: &Value,
        metadata: &Value,
    ) -> Result<Self, StateError> {
        Ok(Self {
            messages: flag("messages", messages)?,
            artifacts: flag("artifacts", artifacts)?,
            metadata: flag("metadata", metadata)?,
        })
    }
}

fn flag(name: &str, value: &Value) -> Result<bool, StateError> {
    value.as_bool().ok_or_else(|| {
        StateError::InvalidArgument(format!(
            "inheritance flag {} must be a boolean, got {}",
            name, value
        ))
    })
}

/// A node in the context tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedContext {
    pub id: ContextId,
    pub parent_id: Option<ContextId>,
    pub local: State,
    pub inheritance: InheritanceConfig,
    /// Bumped on every change to the local layer or inheritance config
    pub revision: u64,
    pub created_at: Timestamp,
}

/// Point-in-time copy of a context's merged and local layers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub context_id: ContextId,
    pub parent_id: Option<ContextId>,
    pub timestamp: Timestamp,
    pub state: State,
    pub local_state: State,
    pub inheritance: InheritanceConfig,
}

/// Result of a key deletion
///
/// `existed` reports whether the key resolved anywhere in the chain;
/// `deleted` is only true when the local layer held it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOutcome {
    pub deleted: bool,
    pub existed: bool,
}
