//! Engine facade
//!
//! Wires the context store, event log, schema registry, persistence manager
//! and transform pipeline together so they share one event log and one
//! schema registry.

use crate::config::EngineConfig;
use crate::context::ContextStore;
use crate::error::StateError;
use crate::events::{EventLog, EventSink, ReplayOutcome};
use crate::persistence::PersistenceManager;
use crate::schema::{SchemaRegistry, SchemaRepository, Validator};
use crate::transform::TransformPipeline;
use crate::types::{ContextId, Timestamp};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// The assembled engine.
///
/// Components are reachable individually; the facade adds only replay,
/// which needs both the event log and the store.
pub struct StateEngine {
    config: EngineConfig,
    store: Arc<ContextStore>,
    persistence: PersistenceManager,
    transforms: TransformPipeline,
}

impl StateEngine {
    pub fn builder() -> StateEngineBuilder {
        StateEngineBuilder::default()
    }

    /// Engine with default configuration and no persistence directory
    pub fn in_memory() -> Result<Self, StateError> {
        Self::builder().build()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<ContextStore> {
        &self.store
    }

    pub fn events(&self) -> &Arc<EventLog> {
        self.store.events()
    }

    pub fn schemas(&self) -> &Arc<SchemaRegistry> {
        self.store.schemas()
    }

    pub fn persistence(&self) -> &PersistenceManager {
        &self.persistence
    }

    pub fn transforms(&self) -> &TransformPipeline {
        &self.transforms
    }

    /// Rebuild `context_id` from its Set/Delete history into a fresh root context
    pub fn replay(
        &self,
        context_id: &str,
        from: Option<Timestamp>,
        to: Option<Timestamp>,
    ) -> Result<ReplayOutcome, StateError> {
        self.events().replay(&self.store, context_id, from, to)
    }

    /// Convenience for `store().create(parent)`
    pub fn create_context(&self, parent_id: Option<&str>) -> Result<ContextId, StateError> {
        self.store.create(parent_id)
    }
}

#[derive(Default)]
pub struct StateEngineBuilder {
    config: EngineConfig,
    sink: Option<Arc<dyn EventSink>>,
    repository: Option<Arc<dyn SchemaRepository>>,
    validator: Option<Arc<dyn Validator>>,
}

impl StateEngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn persistence_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.persistence.dir = Some(dir.into());
        self
    }

    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn schema_repository(mut self, repository: Arc<dyn SchemaRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Validate the configuration and assemble every component.
    ///
    /// With a persistence directory configured, versions already on disk are
    /// indexed so they can be loaded immediately.
    pub fn build(self) -> Result<StateEngine, StateError> {
        self.config
            .validate()
            .map_err(|errors| StateError::ConfigError(errors.join("; ")))?;

        let events = Arc::new(EventLog::with_options(
            self.config.events.capacity,
            self.config.events.query_limit,
            self.sink,
        ));

        let schemas = match (self.repository, self.validator) {
            (None, None) => SchemaRegistry::new(),
            (repository, validator) => {
                let defaults = SchemaRegistry::default_backends();
                SchemaRegistry::with_backends(
                    repository.unwrap_or(defaults.0),
                    validator.unwrap_or(defaults.1),
                )
            }
        };
        let store = Arc::new(ContextStore::new(events, Arc::new(schemas)));

        let persistence = PersistenceManager::new(
            self.config.persistence.dir.clone(),
            self.config.persistence.compress,
            Arc::clone(&store),
        );
        if persistence.is_configured() {
            let indexed = persistence.rescan()?;
            info!(versions = indexed, "Indexed persisted versions");
        }

        let transforms =
            TransformPipeline::new(Arc::clone(&store), self.config.transforms.cache_bucket_secs)?;

        debug!(
            capacity = self.config.events.capacity,
            persistence = persistence.is_configured(),
            "State engine ready"
        );

        Ok(StateEngine {
            config: self.config,
            store,
            persistence,
            transforms,
        })
    }
}
