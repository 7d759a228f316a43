//! Versioned Persistence
//!
//! Serializes a context's merged and local layers into numbered versions on
//! disk, keeps an in-memory version index, and supports load, diff and schema
//! migration. Every operation needs a configured directory.

mod diff;
pub mod document;
mod files;

pub use diff::{StateDiff, ValueChange};
pub use document::{StateDocument, VersionMetadata};

use crate::context::ContextStore;
use crate::error::StateError;
use crate::events::{Event, EVENT_DELETED, EVENT_LOADED, EVENT_MIGRATED, EVENT_PERSISTED};
use crate::transform::sanitize;
use crate::types::{now, ContextId, SchemaId, Timestamp, Version};
use files::StateFiles;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Index entry for one persisted version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedVersion {
    pub context_id: ContextId,
    pub version: Version,
    pub timestamp: Timestamp,
    pub compressed: bool,
    pub size_bytes: u64,
}

impl From<&VersionMetadata> for PersistedVersion {
    fn from(meta: &VersionMetadata) -> Self {
        Self {
            context_id: meta.context_id.clone(),
            version: meta.version,
            timestamp: meta.timestamp,
            compressed: meta.compressed,
            size_bytes: meta.size,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistOptions {
    /// Explicit version; `None` allocates the next free number
    pub version: Option<Version>,
    pub description: Option<String>,
    /// Overrides the manager's default compression
    pub compress: Option<bool>,
}

impl PersistOptions {
    pub fn version(version: Version) -> Self {
        Self {
            version: Some(version),
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn compressed(mut self, compress: bool) -> Self {
        self.compress = Some(compress);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    /// Version to load; 0 selects the latest indexed version
    pub version: Version,
    pub validate_schema: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            version: 0,
            validate_schema: true,
        }
    }
}

impl LoadOptions {
    pub fn version(version: Version) -> Self {
        Self {
            version,
            ..Self::default()
        }
    }

    pub fn skip_validation(mut self) -> Self {
        self.validate_schema = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadOutcome {
    /// Freshly registered context holding the loaded state
    pub context_id: ContextId,
    pub source_id: ContextId,
    pub version: Version,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationOutcome {
    /// Freshly registered context holding the migrated state
    pub context_id: ContextId,
    pub source_version: Version,
    /// Version the migrated state was persisted as
    pub version: Version,
    pub schema_id: SchemaId,
    /// Whether the sanitize transform had to run
    pub sanitized: bool,
}

type VersionIndex = HashMap<ContextId, BTreeMap<Version, PersistedVersion>>;

pub struct PersistenceManager {
    files: Option<StateFiles>,
    compress_default: bool,
    store: Arc<ContextStore>,
    index: RwLock<VersionIndex>,
}

impl PersistenceManager {
    pub fn new(dir: Option<PathBuf>, compress_default: bool, store: Arc<ContextStore>) -> Self {
        Self {
            files: dir.map(StateFiles::new),
            compress_default,
            store,
            index: RwLock::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.files.as_ref().map(StateFiles::root)
    }

    pub fn is_configured(&self) -> bool {
        self.files.is_some()
    }

    fn files(&self) -> Result<&StateFiles, StateError> {
        self.files.as_ref().ok_or(StateError::Unconfigured)
    }

    /// Write the context's current merged and local layers as a version
    pub fn persist(
        &self,
        context_id: &str,
        options: PersistOptions,
    ) -> Result<PersistedVersion, StateError> {
        self.files()?;
        let version = match options.version {
            Some(0) => {
                return Err(StateError::InvalidArgument(
                    "persisted versions start at 1".to_string(),
                ))
            }
            Some(v) => v,
            None => self.next_version(context_id)?,
        };
        let compress = options.compress.unwrap_or(self.compress_default);

        let snapshot = self.store.capture(context_id)?;
        let document = StateDocument {
            context_id: context_id.to_string(),
            version,
            timestamp: snapshot.timestamp,
            description: options.description.unwrap_or_default(),
            artifacts: snapshot.state.artifacts().clone(),
            messages: snapshot.state.messages().to_vec(),
            state: snapshot.state,
            local_state: snapshot.local_state,
            inheritance: snapshot.inheritance,
            compressed: compress,
        };
        let persisted = self.write_document(&document)?;

        self.store.events().append(Event::custom(
            EVENT_PERSISTED,
            context_id,
            json!({
                "version": version,
                "size": persisted.size_bytes,
                "compressed": compress,
                "description": document.description,
            }),
        ));
        info!(
            context_id,
            version,
            compressed = compress,
            size = persisted.size_bytes,
            "Persisted context state"
        );
        Ok(persisted)
    }

    fn write_document(&self, document: &StateDocument) -> Result<PersistedVersion, StateError> {
        let files = self.files()?;
        let bytes = document::encode(document, document.compressed)?;
        let meta = VersionMetadata {
            context_id: document.context_id.clone(),
            version: document.version,
            timestamp: document.timestamp,
            filename: StateFiles::data_filename(document.version, document.compressed),
            compressed: document.compressed,
            size: bytes.len() as u64,
        };

        if self
            .index
            .read()
            .get(&document.context_id)
            .map_or(false, |versions| versions.contains_key(&document.version))
        {
            warn!(
                context_id = %document.context_id,
                version = document.version,
                "Overwriting existing persisted version"
            );
        }

        files.write(&document.context_id, document.version, &bytes, &meta)?;
        let persisted = PersistedVersion::from(&meta);
        self.index
            .write()
            .entry(document.context_id.clone())
            .or_default()
            .insert(document.version, persisted.clone());
        Ok(persisted)
    }

    fn resolve_version(&self, context_id: &str, version: Version) -> Result<Version, StateError> {
        if version != 0 {
            return Ok(version);
        }
        self.index
            .read()
            .get(context_id)
            .and_then(|versions| versions.keys().next_back().copied())
            .ok_or_else(|| StateError::VersionNotFound {
                context_id: context_id.to_string(),
                version,
            })
    }

    /// Read and decode a persisted document; version 0 selects the latest
    pub fn read_document(
        &self,
        context_id: &str,
        version: Version,
    ) -> Result<StateDocument, StateError> {
        let files = self.files()?;
        let version = self.resolve_version(context_id, version)?;
        let (bytes, compressed) =
            files
                .read(context_id, version)?
                .ok_or_else(|| StateError::VersionNotFound {
                    context_id: context_id.to_string(),
                    version,
                })?;
        document::decode(&bytes, compressed)
    }

    /// Register a new root context holding a persisted version
    ///
    /// When validation is requested and the source context has a bound
    /// schema, a failing document is rejected before registration.
    pub fn load(&self, context_id: &str, options: LoadOptions) -> Result<LoadOutcome, StateError> {
        let document = self.read_document(context_id, options.version)?;
        if options.validate_schema {
            self.store
                .schemas()
                .validate(context_id, document.state.values())?
                .into_result()?;
        }

        let version = document.version;
        let loaded_id = self.store.register_root(
            &format!("loaded_{}_v{}", context_id, version),
            document.state,
            document.inheritance,
        );
        self.store.events().append(Event::custom(
            EVENT_LOADED,
            context_id,
            json!({
                "loaded_context_id": loaded_id,
                "version": version,
                "validate_schema": options.validate_schema,
            }),
        ));
        info!(context_id, version, loaded = %loaded_id, "Loaded persisted state");
        Ok(LoadOutcome {
            context_id: loaded_id,
            source_id: context_id.to_string(),
            version,
        })
    }

    /// Remove a version's data and metadata; missing files count as removed
    ///
    /// Returns whether anything (files or index entry) existed.
    pub fn delete(&self, context_id: &str, version: Version) -> Result<bool, StateError> {
        let files = self.files()?;
        if version == 0 {
            return Err(StateError::InvalidArgument(
                "a version number is required to delete".to_string(),
            ));
        }
        let removed_files = files.remove(context_id, version)?;
        let removed_entry = {
            let mut index = self.index.write();
            let removed = index
                .get_mut(context_id)
                .map_or(false, |versions| versions.remove(&version).is_some());
            if index.get(context_id).map_or(false, BTreeMap::is_empty) {
                index.remove(context_id);
            }
            removed
        };

        let existed = removed_files || removed_entry;
        self.store.events().append(Event::custom(
            EVENT_DELETED,
            context_id,
            json!({ "version": version, "deleted": existed }),
        ));
        debug!(context_id, version, existed, "Deleted persisted version");
        Ok(existed)
    }

    /// Indexed versions of one context, oldest first
    pub fn list_versions(&self, context_id: &str) -> Result<Vec<PersistedVersion>, StateError> {
        self.files()?;
        Ok(self
            .index
            .read()
            .get(context_id)
            .map(|versions| versions.values().cloned().collect())
            .unwrap_or_default())
    }

    /// Version numbers for every indexed context
    pub fn list_all(&self) -> Result<BTreeMap<ContextId, Vec<Version>>, StateError> {
        self.files()?;
        Ok(self
            .index
            .read()
            .iter()
            .map(|(id, versions)| (id.clone(), versions.keys().copied().collect()))
            .collect())
    }

    /// One past the highest indexed version, or 1
    pub fn next_version(&self, context_id: &str) -> Result<Version, StateError> {
        self.files()?;
        Ok(self
            .index
            .read()
            .get(context_id)
            .and_then(|versions| versions.keys().next_back())
            .map_or(1, |max| max + 1))
    }

    /// Rebuild the version index from the sidecar files on disk
    pub fn rescan(&self) -> Result<usize, StateError> {
        let found = self.files()?.scan()?;
        let mut index = VersionIndex::new();
        for meta in &found {
            index
                .entry(meta.context_id.clone())
                .or_default()
                .insert(meta.version, PersistedVersion::from(meta));
        }
        *self.index.write() = index;
        info!(versions = found.len(), "Rebuilt persisted version index");
        Ok(found.len())
    }

    /// Compare the merged key/value data of two versions
    pub fn diff(
        &self,
        context_id: &str,
        from_version: Version,
        to_version: Version,
    ) -> Result<StateDiff, StateError> {
        if from_version == 0 || to_version == 0 {
            return Err(StateError::InvalidArgument(
                "both versions are required for a diff".to_string(),
            ));
        }
        let from = self.read_document(context_id, from_version)?;
        let to = self.read_document(context_id, to_version)?;
        Ok(StateDiff::between(from.state.values(), to.state.values()))
    }

    /// Re-validate a version against another schema and persist the result
    ///
    /// Data failing the target schema is passed through the sanitize
    /// transform once; if it still fails, nothing is written. The source
    /// version is left in place.
    pub fn migrate(
        &self,
        context_id: &str,
        from_version: Version,
        schema_id: &str,
    ) -> Result<MigrationOutcome, StateError> {
        let source = self.read_document(context_id, from_version)?;
        let schemas = self.store.schemas();

        let mut state = source.state;
        let mut sanitized = false;
        if !schemas.validate_against(schema_id, state.values())?.valid {
            state = sanitize(state);
            sanitized = true;
            schemas
                .validate_against(schema_id, state.values())?
                .into_result()?;
        }

        let version = self.next_version(context_id)?;
        let document = StateDocument {
            context_id: context_id.to_string(),
            version,
            timestamp: now(),
            description: format!(
                "migrated from v{} to schema {}",
                source.version, schema_id
            ),
            artifacts: state.artifacts().clone(),
            messages: state.messages().to_vec(),
            local_state: state.clone(),
            state: state.clone(),
            inheritance: source.inheritance,
            compressed: source.compressed,
        };
        self.write_document(&document)?;

        let migrated_id = self.store.register_root(
            &format!("migrated_{}_v{}", context_id, version),
            state,
            source.inheritance,
        );
        schemas.bind(&migrated_id, schema_id)?;

        self.store.events().append(Event::custom(
            EVENT_MIGRATED,
            context_id,
            json!({
                "migrated_context_id": migrated_id,
                "from_version": source.version,
                "to_version": version,
                "schema_id": schema_id,
                "sanitized": sanitized,
            }),
        ));
        info!(
            context_id,
            from_version = source.version,
            to_version = version,
            schema_id,
            sanitized,
            "Migrated persisted state"
        );
        Ok(MigrationOutcome {
            context_id: migrated_id,
            source_version: source.version,
            version,
            schema_id: schema_id.to_string(),
            sanitized,
        })
    }
}
