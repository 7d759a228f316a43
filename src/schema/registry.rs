//! Schema registry: definitions, per-context bindings and custom validators.

use super::repository::{InMemorySchemaRepository, SchemaRepository};
use super::validator::{StructValidator, Validator};
use super::{SchemaDef, SchemaVersion, ValidationResult};
use crate::error::StateError;
use crate::types::{ContextId, SchemaId};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Named predicate referenced from `PropertyDef::validator`
pub type CustomValidator = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

const SCHEMA_VERSION: u32 = 1;

pub struct SchemaRegistry {
    repository: Arc<dyn SchemaRepository>,
    validator: Arc<dyn Validator>,
    bindings: RwLock<HashMap<ContextId, SchemaId>>,
    custom: RwLock<BTreeMap<String, CustomValidator>>,
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaRegistry {
    pub fn new() -> Self {
        let (repository, validator) = Self::default_backends();
        Self::with_backends(repository, validator)
    }

    pub(crate) fn default_backends() -> (Arc<dyn SchemaRepository>, Arc<dyn Validator>) {
        (
            Arc::new(InMemorySchemaRepository::new()),
            Arc::new(StructValidator::new()),
        )
    }

    pub fn with_backends(
        repository: Arc<dyn SchemaRepository>,
        validator: Arc<dyn Validator>,
    ) -> Self {
        Self {
            repository,
            validator,
            bindings: RwLock::new(HashMap::new()),
            custom: RwLock::new(BTreeMap::new()),
        }
    }

    /// Store a definition, overwriting any previous one with the same id
    pub fn register_schema(&self, def: SchemaDef) -> Result<(), StateError> {
        debug!(schema_id = %def.id, "Registered schema");
        self.repository.save(def)
    }

    pub fn get_schema(&self, id: &str) -> Result<SchemaDef, StateError> {
        self.repository
            .get(id)?
            .ok_or_else(|| StateError::SchemaNotFound(id.to_string()))
    }

    pub fn list_schemas(&self) -> Result<Vec<SchemaId>, StateError> {
        self.repository.list()
    }

    /// Bind a registered schema to a context, replacing any previous binding
    pub fn bind(&self, context_id: &str, schema_id: &str) -> Result<(), StateError> {
        self.get_schema(schema_id)?;
        self.bindings
            .write()
            .insert(context_id.to_string(), schema_id.to_string());
        debug!(context_id, schema_id, "Bound schema");
        Ok(())
    }

    pub fn unbind(&self, context_id: &str) -> Option<SchemaId> {
        self.bindings.write().remove(context_id)
    }

    pub fn binding(&self, context_id: &str) -> Option<SchemaId> {
        self.bindings.read().get(context_id).cloned()
    }

    /// Definition bound to a context, if any
    pub fn get_state_schema(&self, context_id: &str) -> Result<Option<SchemaDef>, StateError> {
        match self.binding(context_id) {
            Some(schema_id) => self.get_schema(&schema_id).map(Some),
            None => Ok(None),
        }
    }

    /// Validate data for a context against its bound schema
    pub fn validate(
        &self,
        context_id: &str,
        data: &BTreeMap<String, Value>,
    ) -> Result<ValidationResult, StateError> {
        match self.binding(context_id) {
            Some(schema_id) => self.validate_against(&schema_id, data),
            None => Ok(ValidationResult::unbound()),
        }
    }

    pub fn validate_against(
        &self,
        schema_id: &str,
        data: &BTreeMap<String, Value>,
    ) -> Result<ValidationResult, StateError> {
        let def = self.get_schema(schema_id)?;
        let mut result = self.validator.validate_struct(&def, data);

        let custom = self.custom.read();
        for (name, prop) in &def.properties {
            let (Some(validator_name), Some(value)) = (&prop.validator, data.get(name)) else {
                continue;
            };
            match custom.get(validator_name) {
                Some(check) if check(value) => {}
                Some(_) => result
                    .errors
                    .push(format!("{} failed custom validation {}", name, validator_name)),
                None => result
                    .errors
                    .push(format!("{} references unknown validator {}", name, validator_name)),
            }
        }
        result.valid = result.errors.is_empty();
        Ok(result)
    }

    pub fn validate_with_version(
        &self,
        schema_id: &str,
        version: u32,
        data: &BTreeMap<String, Value>,
    ) -> Result<ValidationResult, StateError> {
        self.check_version(schema_id, version)?;
        self.validate_against(schema_id, data)
    }

    /// Version records for a schema; empty when the schema is unknown
    pub fn schema_versions(&self, schema_id: &str) -> Result<Vec<SchemaVersion>, StateError> {
        Ok(self
            .repository
            .get(schema_id)?
            .map(|def| SchemaVersion {
                version: SCHEMA_VERSION,
                title: def.title,
            })
            .into_iter()
            .collect())
    }

    /// Select the active version of a schema
    pub fn set_schema_version(&self, schema_id: &str, version: u32) -> Result<(), StateError> {
        self.check_version(schema_id, version)
    }

    fn check_version(&self, schema_id: &str, version: u32) -> Result<(), StateError> {
        self.get_schema(schema_id)?;
        if version != SCHEMA_VERSION {
            return Err(StateError::SchemaVersionNotFound {
                schema_id: schema_id.to_string(),
                version,
            });
        }
        Ok(())
    }

    pub fn register_custom_validator<F>(&self, name: &str, check: F)
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.custom.write().insert(name.to_string(), Arc::new(check));
        debug!(name, "Registered custom validator");
    }

    pub fn unregister_custom_validator(&self, name: &str) -> bool {
        self.custom.write().remove(name).is_some()
    }

    pub fn custom_validators(&self) -> Vec<String> {
        self.custom.read().keys().cloned().collect()
    }
}
