//! Schemas
//!
//! Named structural definitions bound to contexts and checked against a
//! context's merged key/value data. Storage and checking sit behind the
//! `SchemaRepository` and `Validator` traits so hosts can plug their own.

mod registry;
pub mod repository;
pub mod validator;

pub use registry::{CustomValidator, SchemaRegistry};
pub use repository::{InMemorySchemaRepository, SchemaRepository};
pub use validator::{StructValidator, Validator};

use crate::error::StateError;
use crate::types::SchemaId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Message attached to a trivially valid result when nothing is bound
pub const NO_SCHEMA_MESSAGE: &str = "No schema configured for validation";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    Null,
    Any,
}

impl PropertyType {
    pub fn parse(raw: &str) -> Result<Self, StateError> {
        match raw {
            "string" => Ok(PropertyType::String),
            "number" => Ok(PropertyType::Number),
            "integer" => Ok(PropertyType::Integer),
            "boolean" => Ok(PropertyType::Boolean),
            "array" => Ok(PropertyType::Array),
            "object" => Ok(PropertyType::Object),
            "null" => Ok(PropertyType::Null),
            "any" | "" => Ok(PropertyType::Any),
            other => Err(StateError::InvalidArgument(format!(
                "unknown property type: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDef {
    #[serde(rename = "type")]
    pub property_type: PropertyType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Name of a custom validator registered with the `SchemaRegistry`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validator: Option<String>,
}

impl PropertyDef {
    pub fn new(property_type: PropertyType) -> Self {
        Self {
            property_type,
            description: None,
            validator: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_validator(mut self, name: impl Into<String>) -> Self {
        self.validator = Some(name.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDef {
    pub id: SchemaId,
    pub title: String,
    #[serde(rename = "type", default = "object_type")]
    pub schema_type: String,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyDef>,
    #[serde(default)]
    pub required: Vec<String>,
}

fn object_type() -> String {
    "object".to_string()
}

impl SchemaDef {
    pub fn new(id: impl Into<SchemaId>) -> Self {
        let id = id.into();
        Self {
            title: id.clone(),
            id,
            schema_type: object_type(),
            properties: BTreeMap::new(),
            required: Vec::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn property(mut self, name: impl Into<String>, def: PropertyDef) -> Self {
        self.properties.insert(name.into(), def);
        self
    }

    pub fn require(mut self, name: impl Into<String>) -> Self {
        self.required.push(name.into());
        self
    }

    /// Parse a host-supplied definition `{type?, title?, properties?, required?}`
    ///
    /// Property entries may be a bare type name or an object with `type`,
    /// `description` and `validator`.
    pub fn from_value(id: impl Into<SchemaId>, raw: &Value) -> Result<Self, StateError> {
        let obj = raw.as_object().ok_or_else(|| {
            StateError::InvalidArgument("schema definition must be an object".to_string())
        })?;
        let mut def = SchemaDef::new(id);

        if let Some(title) = obj.get("title").and_then(Value::as_str) {
            def.title = title.to_string();
        }
        if let Some(kind) = obj.get("type") {
            def.schema_type = kind
                .as_str()
                .ok_or_else(|| StateError::InvalidArgument("schema type must be a string".into()))?
                .to_string();
        }

        if let Some(properties) = obj.get("properties") {
            let properties = properties.as_object().ok_or_else(|| {
                StateError::InvalidArgument("schema properties must be an object".into())
            })?;
            for (name, prop) in properties {
                let parsed = match prop {
                    Value::String(kind) => PropertyDef::new(PropertyType::parse(kind)?),
                    Value::Object(fields) => {
                        let kind = fields.get("type").and_then(Value::as_str).unwrap_or("any");
                        PropertyDef {
                            property_type: PropertyType::parse(kind)?,
                            description: fields
                                .get("description")
                                .and_then(Value::as_str)
                                .map(str::to_string),
                            validator: fields
                                .get("validator")
                                .and_then(Value::as_str)
                                .map(str::to_string),
                        }
                    }
                    other => {
                        return Err(StateError::InvalidArgument(format!(
                            "property {} must be a type name or object, got {}",
                            name, other
                        )))
                    }
                };
                def.properties.insert(name.clone(), parsed);
            }
        }

        if let Some(required) = obj.get("required") {
            let required = required.as_array().ok_or_else(|| {
                StateError::InvalidArgument("schema required must be an array".into())
            })?;
            for entry in required {
                let name = entry.as_str().ok_or_else(|| {
                    StateError::InvalidArgument(format!("required entry must be a string, got {}", entry))
                })?;
                def.required.push(name.to_string());
            }
        }

        Ok(def)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            message: None,
        }
    }

    pub fn unbound() -> Self {
        Self {
            message: Some(NO_SCHEMA_MESSAGE.to_string()),
            ..Self::ok()
        }
    }

    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
            message: None,
        }
    }

    /// Convert into `Err(ValidationFailed)` when invalid
    pub fn into_result(self) -> Result<(), StateError> {
        if self.valid {
            Ok(())
        } else {
            Err(StateError::ValidationFailed(self.errors))
        }
    }
}

/// Synthetic version record; schemas carry a single version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaVersion {
    pub version: u32,
    pub title: String,
}
