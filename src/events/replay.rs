//! Chronological replay of a context's mutation history.

use super::{check_range, in_range, EventKind, EventLog};
use crate::context::{ContextStore, InheritanceConfig};
use crate::error::StateError;
use crate::state::State;
use crate::types::{ContextId, Timestamp};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayOutcome {
    /// Fresh root context holding the reconstructed data
    pub context_id: ContextId,
    /// Number of Set/Delete events applied
    pub applied: usize,
}

impl EventLog {
    /// Rebuild `context_id`'s key/value data from recorded Set/Delete events
    ///
    /// Events in `[from, to)` are applied oldest first, with arrival order
    /// breaking timestamp ties. The source context need not still exist.
    pub fn replay(
        &self,
        store: &ContextStore,
        context_id: &str,
        from: Option<Timestamp>,
        to: Option<Timestamp>,
    ) -> Result<ReplayOutcome, StateError> {
        check_range(from, to)?;

        let mut events: Vec<_> = self
            .history(context_id)
            .into_iter()
            .filter(|e| in_range(e.timestamp, from, to))
            .collect();
        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.seq.cmp(&b.seq)));

        let mut state = State::new();
        let mut applied = 0;
        for event in &events {
            let Some(key) = event.key() else { continue };
            match event.kind {
                EventKind::Set => {
                    let value = event
                        .payload
                        .get("new_value")
                        .cloned()
                        .unwrap_or_default();
                    state.set(key, value);
                }
                // The replay target is a root, so removing the key leaves
                // nothing to fall back to.
                EventKind::Delete => {
                    state.delete(key);
                }
                _ => continue,
            }
            applied += 1;
        }

        let replay_id = store.register_root(
            &format!("replay_{}", context_id),
            state,
            InheritanceConfig::default(),
        );
        info!(
            source = context_id,
            replay = %replay_id,
            applied,
            "Replayed context history"
        );
        Ok(ReplayOutcome {
            context_id: replay_id,
            applied,
        })
    }
}
