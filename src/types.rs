//! Identifier aliases and time helpers shared across components.

use chrono::{DateTime, Utc};

/// Unique, immutable identifier of a shared context
pub type ContextId = String;

/// Identifier of a registered schema definition
pub type SchemaId = String;

/// Persisted snapshot version number (monotonic per context, never 0)
pub type Version = u64;

/// Wall-clock timestamp used for events and persisted documents
pub type Timestamp = DateTime<Utc>;

pub fn now() -> Timestamp {
    Utc::now()
}
