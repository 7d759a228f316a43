//! Error types for the shared state engine.

use crate::types::{ContextId, SchemaId, Version};
use thiserror::Error;

/// Coarse error categories callers can branch on without matching every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidArgument,
    Unconfigured,
    ValidationFailed,
    Deserialization,
    TransformFailed,
    Config,
    Io,
}

/// Errors returned by every engine component
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Context not found: {0}")]
    ContextNotFound(ContextId),

    #[error("Schema not found: {0}")]
    SchemaNotFound(SchemaId),

    #[error("Schema {schema_id} has no version {version}")]
    SchemaVersionNotFound { schema_id: SchemaId, version: u32 },

    #[error("Version {version} not found for context {context_id}")]
    VersionNotFound {
        context_id: ContextId,
        version: Version,
    },

    #[error("Transform not found: {0}")]
    TransformNotFound(String),

    #[error("Pipeline not found: {0}")]
    PipelineNotFound(String),

    #[error("Metrics not found: {0}")]
    MetricsNotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("No persistence directory configured")]
    Unconfigured,

    #[error("Validation failed: {}", .0.join("; "))]
    ValidationFailed(Vec<String>),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Transform {name} failed: {reason}")]
    TransformFailed { name: String, reason: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl StateError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StateError::ContextNotFound(_)
            | StateError::SchemaNotFound(_)
            | StateError::SchemaVersionNotFound { .. }
            | StateError::VersionNotFound { .. }
            | StateError::TransformNotFound(_)
            | StateError::PipelineNotFound(_)
            | StateError::MetricsNotFound(_) => ErrorKind::NotFound,
            StateError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            StateError::Unconfigured => ErrorKind::Unconfigured,
            StateError::ValidationFailed(_) => ErrorKind::ValidationFailed,
            StateError::Deserialization(_) => ErrorKind::Deserialization,
            StateError::TransformFailed { .. } => ErrorKind::TransformFailed,
            StateError::ConfigError(_) => ErrorKind::Config,
            StateError::IoError(_) => ErrorKind::Io,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

impl From<config::ConfigError> for StateError {
    fn from(err: config::ConfigError) -> Self {
        StateError::ConfigError(err.to_string())
    }
}
