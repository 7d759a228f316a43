//! Bounded event log
//!
//! Ring buffer of context events with filtered query. Appends are serialized
//! by the log's lock, so `seq` gives a stable total order even when the clock
//! resolution collapses several events onto one timestamp. Timestamps never
//! run backwards relative to `seq`.

use super::sink::EventSink;
use super::{Event, EventQuery};
use crate::error::StateError;
use crate::types::Timestamp;
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_CAPACITY: usize = 1000;
pub const DEFAULT_QUERY_LIMIT: usize = 100;

/// Public view of a registered filter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilterInfo {
    pub name: String,
    pub pattern: String,
}

struct EventFilter {
    pattern: String,
    regex: Regex,
}

struct LogInner {
    events: VecDeque<Event>,
    next_seq: u64,
    last_timestamp: Option<Timestamp>,
    filters: BTreeMap<String, EventFilter>,
    next_filter: usize,
}

pub struct EventLog {
    inner: Mutex<LogInner>,
    capacity: usize,
    query_limit: usize,
    sink: Option<Arc<dyn EventSink>>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self::with_options(capacity, DEFAULT_QUERY_LIMIT, None)
    }

    pub fn with_options(
        capacity: usize,
        query_limit: usize,
        sink: Option<Arc<dyn EventSink>>,
    ) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(LogInner {
                events: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
                next_seq: 1,
                last_timestamp: None,
                filters: BTreeMap::new(),
                next_filter: 0,
            }),
            capacity,
            query_limit: query_limit.max(1),
            sink,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Record an event and forward it to the sink
    ///
    /// Recording never depends on filters; filters only scope what the sink
    /// receives. Returns the assigned sequence number.
    pub fn append(&self, mut event: Event) -> u64 {
        let (seq, forward) = {
            let mut inner = self.inner.lock();
            let seq = inner.next_seq;
            inner.next_seq += 1;
            event.seq = seq;
            match inner.last_timestamp {
                Some(last) if event.timestamp < last => event.timestamp = last,
                _ => inner.last_timestamp = Some(event.timestamp),
            }
            if event.id.is_empty() {
                event.id = format!("{}_{}", event.kind.name(), seq);
            }

            let forward = self.sink.is_some()
                && (inner.filters.is_empty()
                    || inner
                        .filters
                        .values()
                        .any(|f| f.regex.is_match(event.subject())));
            let forwarded = if forward { Some(event.clone()) } else { None };

            inner.events.push_back(event);
            while inner.events.len() > self.capacity {
                inner.events.pop_front();
            }
            (seq, forwarded)
        };

        if let (Some(sink), Some(event)) = (&self.sink, forward) {
            sink.emit(&event);
        }
        seq
    }

    /// Matching events, newest first
    pub fn query(&self, query: &EventQuery) -> Result<Vec<Event>, StateError> {
        query.check_range()?;
        let limit = query.limit.filter(|l| *l > 0).unwrap_or(self.query_limit);
        let inner = self.inner.lock();
        Ok(inner
            .events
            .iter()
            .rev()
            .filter(|e| query.matches(e))
            .take(limit)
            .cloned()
            .collect())
    }

    /// Events for one context in arrival order, without a limit
    pub(crate) fn history(&self, context_id: &str) -> Vec<Event> {
        let inner = self.inner.lock();
        inner
            .events
            .iter()
            .filter(|e| e.context_id == context_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop history for one context, or everything when `context_id` is None
    pub fn clear(&self, context_id: Option<&str>) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.events.len();
        match context_id {
            Some(id) => inner.events.retain(|e| e.context_id != id),
            None => inner.events.clear(),
        }
        let removed = before - inner.events.len();
        debug!(context_id = ?context_id, removed, "Cleared event history");
        removed
    }

    pub fn add_filter(
        &self,
        name: Option<&str>,
        pattern: &str,
    ) -> Result<EventFilterInfo, StateError> {
        let regex = Regex::new(pattern).map_err(|e| {
            StateError::InvalidArgument(format!("invalid event filter pattern {:?}: {}", pattern, e))
        })?;

        let mut inner = self.inner.lock();
        let name = match name {
            Some(n) if !n.is_empty() => n.to_string(),
            _ => {
                let generated = format!("filter_{}", inner.next_filter);
                inner.next_filter += 1;
                generated
            }
        };
        inner.filters.insert(
            name.clone(),
            EventFilter {
                pattern: pattern.to_string(),
                regex,
            },
        );
        Ok(EventFilterInfo {
            name,
            pattern: pattern.to_string(),
        })
    }

    pub fn remove_filter(&self, name: &str) -> bool {
        self.inner.lock().filters.remove(name).is_some()
    }

    pub fn list_filters(&self) -> Vec<EventFilterInfo> {
        self.inner
            .lock()
            .filters
            .iter()
            .map(|(name, f)| EventFilterInfo {
                name: name.clone(),
                pattern: f.pattern.clone(),
            })
            .collect()
    }
}
