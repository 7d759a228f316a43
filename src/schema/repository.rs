//! Schema storage backends.

use super::SchemaDef;
use crate::error::StateError;
use crate::types::SchemaId;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Storage for schema definitions, keyed by `SchemaDef::id`
pub trait SchemaRepository: Send + Sync {
    /// Store a definition, replacing any previous one with the same id
    fn save(&self, def: SchemaDef) -> Result<(), StateError>;

    fn get(&self, id: &str) -> Result<Option<SchemaDef>, StateError>;

    fn delete(&self, id: &str) -> Result<bool, StateError>;

    fn list(&self) -> Result<Vec<SchemaId>, StateError>;
}

#[derive(Default)]
pub struct InMemorySchemaRepository {
    schemas: RwLock<BTreeMap<SchemaId, SchemaDef>>,
}

impl InMemorySchemaRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SchemaRepository for InMemorySchemaRepository {
    fn save(&self, def: SchemaDef) -> Result<(), StateError> {
        self.schemas.write().insert(def.id.clone(), def);
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<SchemaDef>, StateError> {
        Ok(self.schemas.read().get(id).cloned())
    }

    fn delete(&self, id: &str) -> Result<bool, StateError> {
        Ok(self.schemas.write().remove(id).is_some())
    }

    fn list(&self) -> Result<Vec<SchemaId>, StateError> {
        Ok(self.schemas.read().keys().cloned().collect())
    }
}
