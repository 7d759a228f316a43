//! Event sinks
//!
//! A sink receives the notifications the log forwards after recording. The
//! log works without one; replay only depends on the recorded history.

use super::Event;
use parking_lot::Mutex;
use tracing::debug;

pub trait EventSink: Send + Sync {
    fn emit(&self, event: &Event);
}

/// Emits every forwarded event as a `tracing` record
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &Event) {
        debug!(
            target: "strata::events",
            event_id = %event.id,
            seq = event.seq,
            kind = event.kind.name(),
            context_id = %event.context_id,
            subject = event.subject(),
            "State event"
        );
    }
}

/// Collects forwarded events in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<Event>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &Event) {
        self.events.lock().push(event.clone());
    }
}
