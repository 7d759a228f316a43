//! Strata: hierarchical, event-sourced shared state
//!
//! Shares and evolves data across a tree of cooperating execution contexts.
//! Children read through to their ancestors, every write lands in an
//! append-only event log that can be replayed, contexts can be persisted as
//! versioned (optionally gzip-compressed) documents, and named transform
//! pipelines reshape state with caching and metrics. Schemas validate the
//! key/value data of bound contexts.

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod events;
pub mod logging;
pub mod persistence;
pub mod schema;
pub mod state;
pub mod transform;
pub mod types;

pub use crate::config::{ConfigLoader, EngineConfig};
pub use crate::context::{ContextStore, DeleteOutcome, InheritanceConfig, SharedContext, Snapshot};
pub use crate::engine::{StateEngine, StateEngineBuilder};
pub use crate::error::{ErrorKind, StateError};
pub use crate::events::{Event, EventKind, EventLog, EventQuery};
pub use crate::persistence::{LoadOptions, PersistOptions, PersistenceManager};
pub use crate::schema::{SchemaDef, SchemaRegistry, ValidationResult};
pub use crate::state::{Artifact, Message, Role, State};
pub use crate::transform::{BuiltinTransform, PipelineConfig, TransformPipeline};
pub use crate::types::{ContextId, SchemaId, Timestamp, Version};
