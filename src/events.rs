//! Context Events
//!
//! Append-only record of context mutations, snapshots and engine activity.
//! The log is bounded, queryable by context and time range, and can replay a
//! context's Set/Delete history into a fresh context.

pub mod log;
mod replay;
pub mod sink;

pub use log::{EventFilterInfo, EventLog, DEFAULT_CAPACITY, DEFAULT_QUERY_LIMIT};
pub use replay::ReplayOutcome;
pub use sink::{EventSink, MemorySink, TracingSink};

use crate::error::StateError;
use crate::types::{now, ContextId, Timestamp};
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const EVENT_PERSISTED: &str = "state.persisted";
pub const EVENT_LOADED: &str = "state.loaded";
pub const EVENT_DELETED: &str = "state.deleted";
pub const EVENT_MIGRATED: &str = "state.migrated";
pub const EVENT_TRANSFORMED: &str = "state.transformed";
pub const EVENT_PIPELINE_APPLIED: &str = "state.pipeline.applied";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Set,
    Delete,
    Snapshot,
    Custom(String),
}

impl EventKind {
    pub fn name(&self) -> &str {
        match self {
            EventKind::Set => "set",
            EventKind::Delete => "delete",
            EventKind::Snapshot => "snapshot",
            EventKind::Custom(name) => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Caller-supplied id, or `<kind>_<seq>` when left empty
    pub id: String,
    /// Arrival order assigned by the log; replay tie-break
    pub seq: u64,
    pub kind: EventKind,
    pub context_id: ContextId,
    pub timestamp: Timestamp,
    pub payload: Value,
}

impl Event {
    pub fn new(kind: EventKind, context_id: impl Into<ContextId>, payload: Value) -> Self {
        Self {
            id: String::new(),
            seq: 0,
            kind,
            context_id: context_id.into(),
            timestamp: now(),
            payload,
        }
    }

    pub fn set(context_id: &str, key: &str, old_value: Option<Value>, new_value: Value) -> Self {
        Self::new(
            EventKind::Set,
            context_id,
            json!({ "key": key, "old_value": old_value, "new_value": new_value }),
        )
    }

    pub fn delete(context_id: &str, key: &str, old_value: Value) -> Self {
        Self::new(
            EventKind::Delete,
            context_id,
            json!({ "key": key, "old_value": old_value }),
        )
    }

    pub fn snapshot(context_id: &str, snapshot: Value) -> Self {
        Self::new(EventKind::Snapshot, context_id, snapshot)
    }

    pub fn custom(name: &str, context_id: &str, payload: Value) -> Self {
        Self::new(EventKind::Custom(name.to_string()), context_id, payload)
    }

    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Key touched by a Set/Delete event
    pub fn key(&self) -> Option<&str> {
        self.payload.get("key").and_then(Value::as_str)
    }

    /// String event filters are matched against
    pub fn subject(&self) -> &str {
        match self.kind {
            EventKind::Set | EventKind::Delete => self.key().unwrap_or(""),
            _ => self.kind.name(),
        }
    }
}

/// Filter for `EventLog::query`; time bounds are half-open `[from, to)`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventQuery {
    pub context_id: Option<ContextId>,
    pub from: Option<Timestamp>,
    pub to: Option<Timestamp>,
    pub limit: Option<usize>,
}

impl EventQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn context(mut self, context_id: impl Into<ContextId>) -> Self {
        self.context_id = Some(context_id.into());
        self
    }

    pub fn since(mut self, from: Timestamp) -> Self {
        self.from = Some(from);
        self
    }

    pub fn until(mut self, to: Timestamp) -> Self {
        self.to = Some(to);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Apply RFC 3339 bounds supplied by a host layer
    pub fn with_range_str(mut self, from: Option<&str>, to: Option<&str>) -> Result<Self, StateError> {
        self.from = from.map(parse_timestamp).transpose()?;
        self.to = to.map(parse_timestamp).transpose()?;
        Ok(self)
    }

    pub(crate) fn check_range(&self) -> Result<(), StateError> {
        check_range(self.from, self.to)
    }

    pub(crate) fn matches(&self, event: &Event) -> bool {
        self.context_id
            .as_ref()
            .map_or(true, |id| *id == event.context_id)
            && in_range(event.timestamp, self.from, self.to)
    }
}

pub fn parse_timestamp(raw: &str) -> Result<Timestamp, StateError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&chrono::Utc))
        .map_err(|e| StateError::InvalidArgument(format!("invalid timestamp {:?}: {}", raw, e)))
}

pub(crate) fn check_range(from: Option<Timestamp>, to: Option<Timestamp>) -> Result<(), StateError> {
    if let (Some(from), Some(to)) = (from, to) {
        if from > to {
            return Err(StateError::InvalidArgument(format!(
                "time range start {} is after end {}",
                from.to_rfc3339(),
                to.to_rfc3339()
            )));
        }
    }
    Ok(())
}

pub(crate) fn in_range(ts: Timestamp, from: Option<Timestamp>, to: Option<Timestamp>) -> bool {
    from.map_or(true, |f| ts >= f) && to.map_or(true, |t| ts < t)
}
