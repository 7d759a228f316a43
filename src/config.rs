//! Configuration System
//!
//! Layered engine configuration built on the `config` crate. Sources, lowest to
//! highest precedence: built-in defaults, the global config file, workspace
//! files, then `STRATA__` environment variables.

use crate::error::StateError;
use crate::events::{DEFAULT_CAPACITY, DEFAULT_QUERY_LIMIT};
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

mod merge {
    pub mod merge_policy;
}
mod sources {
    pub mod global_file;
    pub mod workspace_file;
}

pub use merge::merge_policy::DEFAULT_CACHE_BUCKET_SECS;
pub use sources::global_file::{global_config_path, CONFIG_DIR_ENV};
pub use sources::workspace_file::ENV_NAME_VAR;

/// Prefix for environment overrides, e.g. `STRATA__EVENTS__CAPACITY=500`
pub const ENV_PREFIX: &str = "STRATA";

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub events: EventLogConfig,

    #[serde(default)]
    pub persistence: PersistenceConfig,

    #[serde(default)]
    pub transforms: TransformConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLogConfig {
    /// Maximum number of retained events; oldest are evicted first
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Result limit applied when a query does not specify one
    #[serde(default = "default_query_limit")]
    pub query_limit: usize,
}

fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}

fn default_query_limit() -> usize {
    DEFAULT_QUERY_LIMIT
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            query_limit: default_query_limit(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Storage directory; persistence operations fail with `Unconfigured` when unset
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// Gzip documents unless a persist call says otherwise
    #[serde(default)]
    pub compress: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformConfig {
    /// Width of the pipeline cache time bucket; 0 disables time-based expiry
    #[serde(default = "default_cache_bucket_secs")]
    pub cache_bucket_secs: u64,
}

fn default_cache_bucket_secs() -> u64 {
    DEFAULT_CACHE_BUCKET_SECS
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            cache_bucket_secs: default_cache_bucket_secs(),
        }
    }
}

impl EngineConfig {
    /// Collect every problem instead of stopping at the first one.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.events.capacity == 0 {
            errors.push("events.capacity must be greater than 0".to_string());
        }
        if self.events.query_limit == 0 {
            errors.push("events.query_limit must be greater than 0".to_string());
        }
        if let Some(dir) = &self.persistence.dir {
            if dir.as_os_str().is_empty() {
                errors.push("persistence.dir must not be empty".to_string());
            }
        }
        if let Err(e) = self.logging.validate() {
            errors.push(e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn with_persistence_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.persistence.dir = Some(dir.into());
        self
    }
}

/// Loads an [`EngineConfig`] from the layered sources.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load defaults, global file, workspace files and environment overrides.
    pub fn load(workspace_root: &Path) -> Result<EngineConfig, StateError> {
        let builder = merge::merge_policy::builder_with_defaults()?;
        let builder = sources::global_file::add_to_builder(builder)?;
        let builder = sources::workspace_file::add_to_builder(builder, workspace_root)?;
        let builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let config: EngineConfig = builder.build()?.try_deserialize()?;
        debug!(workspace = %workspace_root.display(), "Configuration loaded");
        Self::checked(config)
    }

    /// Load a single explicit file on top of the defaults.
    pub fn load_file(path: &Path) -> Result<EngineConfig, StateError> {
        if !path.exists() {
            return Err(StateError::ConfigError(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        let config: EngineConfig = merge::merge_policy::builder_with_defaults()?
            .add_source(config::File::from(path))
            .build()?
            .try_deserialize()?;
        Self::checked(config)
    }

    fn checked(config: EngineConfig) -> Result<EngineConfig, StateError> {
        config
            .validate()
            .map_err(|errors| StateError::ConfigError(errors.join("; ")))?;
        Ok(config)
    }
}
