//! Key-level differences between two persisted versions.

use crate::transform::flatten_map;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

const DIFF_SEPARATOR: &str = ".";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueChange {
    pub old: Value,
    pub new: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDiff {
    pub added: BTreeMap<String, Value>,
    pub removed: BTreeMap<String, Value>,
    pub modified: BTreeMap<String, ValueChange>,
}

impl StateDiff {
    /// Compare two key/value maps after flattening nested objects
    pub fn between(from: &BTreeMap<String, Value>, to: &BTreeMap<String, Value>) -> Self {
        let from = flatten_map(from, DIFF_SEPARATOR);
        let to = flatten_map(to, DIFF_SEPARATOR);
        let mut diff = StateDiff::default();

        for (key, new) in &to {
            match from.get(key) {
                None => {
                    diff.added.insert(key.clone(), new.clone());
                }
                Some(old) if old != new => {
                    diff.modified.insert(
                        key.clone(),
                        ValueChange {
                            old: old.clone(),
                            new: new.clone(),
                        },
                    );
                }
                Some(_) => {}
            }
        }
        for (key, old) in from {
            if !to.contains_key(&key) {
                diff.removed.insert(key, old);
            }
        }
        diff
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }
}
