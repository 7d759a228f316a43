//! Structural validation of key/value data against a `SchemaDef`.

use super::{PropertyType, SchemaDef, ValidationResult};
use serde_json::Value;
use std::collections::BTreeMap;

pub trait Validator: Send + Sync {
    fn validate_struct(&self, def: &SchemaDef, data: &BTreeMap<String, Value>) -> ValidationResult;
}

/// Required-field and property-type checks
///
/// With coercion enabled, numeric strings satisfy `number`/`integer` and the
/// strings `"true"`/`"false"` satisfy `boolean`.
#[derive(Debug, Clone, Copy)]
pub struct StructValidator {
    coerce: bool,
}

impl Default for StructValidator {
    fn default() -> Self {
        Self { coerce: true }
    }
}

impl StructValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strict() -> Self {
        Self { coerce: false }
    }

    fn matches(&self, expected: PropertyType, value: &Value) -> bool {
        match (expected, value) {
            (PropertyType::Any, _) => true,
            (PropertyType::String, Value::String(_))
            | (PropertyType::Boolean, Value::Bool(_))
            | (PropertyType::Array, Value::Array(_))
            | (PropertyType::Object, Value::Object(_))
            | (PropertyType::Null, Value::Null)
            | (PropertyType::Number, Value::Number(_)) => true,
            (PropertyType::Integer, Value::Number(n)) => {
                n.is_i64() || n.is_u64() || n.as_f64().map_or(false, |f| f.fract() == 0.0)
            }
            (PropertyType::Number, Value::String(s)) if self.coerce => s.trim().parse::<f64>().is_ok(),
            (PropertyType::Integer, Value::String(s)) if self.coerce => s.trim().parse::<i64>().is_ok(),
            (PropertyType::Boolean, Value::String(s)) if self.coerce => {
                matches!(s.as_str(), "true" | "false")
            }
            _ => false,
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl Validator for StructValidator {
    fn validate_struct(&self, def: &SchemaDef, data: &BTreeMap<String, Value>) -> ValidationResult {
        let mut errors = Vec::new();

        for name in &def.required {
            if !data.contains_key(name) {
                errors.push(format!("{} is required", name));
            }
        }

        for (name, prop) in &def.properties {
            let Some(value) = data.get(name) else {
                continue;
            };
            if !self.matches(prop.property_type, value) {
                errors.push(format!(
                    "{} must be of type {:?}, got {}",
                    name,
                    prop.property_type,
                    type_name(value)
                ));
            }
        }

        ValidationResult::from_errors(errors)
    }
}
