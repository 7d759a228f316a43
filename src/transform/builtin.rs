//! Built-in transforms
//!
//! Each built-in is a parameterised value that can be registered under any
//! name. The defaults are registered under their own names at start-up.

use super::TransformFn;
use crate::error::StateError;
use crate::state::{Role, State};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

pub const DEFAULT_FLATTEN_SEPARATOR: &str = ".";
pub const DEFAULT_MESSAGE_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuiltinTransform {
    /// Keep keys matching a regular expression
    Filter { pattern: String },
    SelectKeys { keys: Vec<String> },
    RenameKeys { mapping: BTreeMap<String, String> },
    PrefixKeys { prefix: String },
    NormalizeKeys,
    Flatten { separator: String },
    ClearMessages,
    /// Keep the most recent `limit` messages
    LimitMessages { limit: usize },
    FilterMessagesByRole { roles: Vec<Role> },
    /// Drop null values and blank keys, trim string values
    Sanitize,
}

impl BuiltinTransform {
    pub fn name(&self) -> &'static str {
        match self {
            BuiltinTransform::Filter { .. } => "filter",
            BuiltinTransform::SelectKeys { .. } => "selectKeys",
            BuiltinTransform::RenameKeys { .. } => "renameKeys",
            BuiltinTransform::PrefixKeys { .. } => "prefixKeys",
            BuiltinTransform::NormalizeKeys => "normalizeKeys",
            BuiltinTransform::Flatten { .. } => "flatten",
            BuiltinTransform::ClearMessages => "clearMessages",
            BuiltinTransform::LimitMessages { .. } => "limitMessages",
            BuiltinTransform::FilterMessagesByRole { .. } => "filterMessagesByRole",
            BuiltinTransform::Sanitize => "sanitize",
        }
    }

    /// Every built-in with its default parameters
    pub fn defaults() -> Vec<Self> {
        vec![
            BuiltinTransform::Filter {
                pattern: String::new(),
            },
            BuiltinTransform::SelectKeys { keys: Vec::new() },
            BuiltinTransform::RenameKeys {
                mapping: BTreeMap::new(),
            },
            BuiltinTransform::PrefixKeys {
                prefix: String::new(),
            },
            BuiltinTransform::NormalizeKeys,
            BuiltinTransform::Flatten {
                separator: DEFAULT_FLATTEN_SEPARATOR.to_string(),
            },
            BuiltinTransform::ClearMessages,
            BuiltinTransform::LimitMessages {
                limit: DEFAULT_MESSAGE_LIMIT,
            },
            BuiltinTransform::FilterMessagesByRole { roles: Vec::new() },
            BuiltinTransform::Sanitize,
        ]
    }

    /// Build a built-in from its kind name and a host-supplied config object
    ///
    /// Missing parameters take their defaults; parameters of the wrong type
    /// are rejected.
    pub fn from_config(kind: &str, config: &Value) -> Result<Self, StateError> {
        let empty = Map::new();
        let params = match config {
            Value::Null => &empty,
            Value::Object(map) => map,
            other => {
                return Err(StateError::InvalidArgument(format!(
                    "transform config must be an object, got {}",
                    other
                )))
            }
        };

        Ok(match kind {
            "filter" => BuiltinTransform::Filter {
                pattern: string_param(params, "pattern")?.unwrap_or_default(),
            },
            "selectKeys" => BuiltinTransform::SelectKeys {
                keys: string_list_param(params, "keys")?,
            },
            "renameKeys" => {
                let mut mapping = BTreeMap::new();
                if let Some(raw) = params.get("mapping") {
                    let raw = raw.as_object().ok_or_else(|| invalid("mapping", "an object"))?;
                    for (from, to) in raw {
                        let to = to.as_str().ok_or_else(|| invalid("mapping", "string values"))?;
                        mapping.insert(from.clone(), to.to_string());
                    }
                }
                BuiltinTransform::RenameKeys { mapping }
            }
            "prefixKeys" => BuiltinTransform::PrefixKeys {
                prefix: string_param(params, "prefix")?.unwrap_or_default(),
            },
            "normalizeKeys" => BuiltinTransform::NormalizeKeys,
            "flatten" => BuiltinTransform::Flatten {
                separator: string_param(params, "separator")?
                    .unwrap_or_else(|| DEFAULT_FLATTEN_SEPARATOR.to_string()),
            },
            "clearMessages" => BuiltinTransform::ClearMessages,
            "limitMessages" => {
                let limit = match params.get("limit") {
                    None => DEFAULT_MESSAGE_LIMIT,
                    Some(raw) => raw
                        .as_u64()
                        .or_else(|| raw.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
                        .ok_or_else(|| invalid("limit", "a non-negative number"))?
                        as usize,
                };
                BuiltinTransform::LimitMessages { limit }
            }
            "filterMessagesByRole" => BuiltinTransform::FilterMessagesByRole {
                roles: string_list_param(params, "roles")?
                    .iter()
                    .map(|r| r.parse::<Role>())
                    .collect::<Result<Vec<_>, _>>()?,
            },
            "sanitize" => BuiltinTransform::Sanitize,
            other => {
                return Err(StateError::InvalidArgument(format!(
                    "unsupported transform type: {}",
                    other
                )))
            }
        })
    }

    /// Compile into a callable transform
    pub fn into_fn(self) -> Result<TransformFn, StateError> {
        Ok(match self {
            BuiltinTransform::Filter { pattern } => {
                let regex = Regex::new(&pattern).map_err(|e| {
                    StateError::InvalidArgument(format!("invalid filter pattern {:?}: {}", pattern, e))
                })?;
                transform_fn(move |mut state: State| {
                    state.retain(|key, _| regex.is_match(key));
                    Ok(state)
                })
            }
            BuiltinTransform::SelectKeys { keys } => {
                let keys: BTreeSet<String> = keys.into_iter().collect();
                transform_fn(move |mut state: State| {
                    state.retain(|key, _| keys.contains(key));
                    Ok(state)
                })
            }
            BuiltinTransform::RenameKeys { mapping } => transform_fn(move |mut state: State| {
                let renamed = state
                    .take_values()
                    .into_iter()
                    .map(|(k, v)| (mapping.get(&k).cloned().unwrap_or(k), v))
                    .collect();
                state.set_values(renamed);
                Ok(state)
            }),
            BuiltinTransform::PrefixKeys { prefix } => transform_fn(move |mut state: State| {
                let prefixed = state
                    .take_values()
                    .into_iter()
                    .map(|(k, v)| (format!("{}{}", prefix, k), v))
                    .collect();
                state.set_values(prefixed);
                Ok(state)
            }),
            BuiltinTransform::NormalizeKeys => transform_fn(|mut state: State| {
                let normalized = state
                    .take_values()
                    .into_iter()
                    .map(|(k, v)| (normalize_key(&k), v))
                    .collect();
                state.set_values(normalized);
                Ok(state)
            }),
            BuiltinTransform::Flatten { separator } => transform_fn(move |mut state: State| {
                let flat = flatten_map(state.values(), &separator);
                state.set_values(flat);
                Ok(state)
            }),
            BuiltinTransform::ClearMessages => transform_fn(|mut state: State| {
                state.clear_messages();
                Ok(state)
            }),
            BuiltinTransform::LimitMessages { limit } => transform_fn(move |mut state: State| {
                let messages = state.messages();
                let keep = messages[messages.len().saturating_sub(limit)..].to_vec();
                state.set_messages(keep);
                Ok(state)
            }),
            BuiltinTransform::FilterMessagesByRole { roles } => transform_fn(move |mut state: State| {
                let keep = state
                    .messages()
                    .iter()
                    .filter(|m| roles.contains(&m.role))
                    .cloned()
                    .collect();
                state.set_messages(keep);
                Ok(state)
            }),
            BuiltinTransform::Sanitize => transform_fn(|state: State| Ok(sanitize(state))),
        })
    }
}

fn transform_fn<F>(f: F) -> TransformFn
where
    F: Fn(State) -> Result<State, StateError> + Send + Sync + 'static,
{
    Arc::new(f)
}

fn invalid(param: &str, expected: &str) -> StateError {
    StateError::InvalidArgument(format!("transform parameter {} must be {}", param, expected))
}

fn string_param(params: &Map<String, Value>, name: &str) -> Result<Option<String>, StateError> {
    match params.get(name) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(invalid(name, "a string")),
    }
}

fn string_list_param(params: &Map<String, Value>, name: &str) -> Result<Vec<String>, StateError> {
    match params.get(name) {
        None => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| invalid(name, "a list of strings"))
            })
            .collect(),
        Some(_) => Err(invalid(name, "a list of strings")),
    }
}

/// Lowercase, trim, and replace anything outside `[a-z0-9_]` with `_`
pub fn normalize_key(key: &str) -> String {
    key.trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Flatten nested objects into `parent<sep>child` keys
///
/// Arrays, scalars and empty objects are kept as leaf values.
pub fn flatten_map(data: &BTreeMap<String, Value>, separator: &str) -> BTreeMap<String, Value> {
    fn walk(prefix: &str, value: &Value, separator: &str, out: &mut BTreeMap<String, Value>) {
        match value {
            Value::Object(map) if !map.is_empty() => {
                for (key, child) in map {
                    walk(&format!("{}{}{}", prefix, separator, key), child, separator, out);
                }
            }
            leaf => {
                out.insert(prefix.to_string(), leaf.clone());
            }
        }
    }

    let mut out = BTreeMap::new();
    for (key, value) in data {
        walk(key, value, separator, &mut out);
    }
    out
}

/// Drop null values and blank keys; trim surrounding whitespace from strings
pub fn sanitize(mut state: State) -> State {
    let cleaned = state
        .take_values()
        .into_iter()
        .filter(|(k, v)| !k.trim().is_empty() && !v.is_null())
        .map(|(k, v)| match v {
            Value::String(s) => (k, Value::String(s.trim().to_string())),
            other => (k, other),
        })
        .collect();
    state.set_values(cleaned);
    state
}
