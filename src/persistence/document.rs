//! On-disk document formats for persisted versions.

use crate::context::InheritanceConfig;
use crate::error::StateError;
use crate::state::{Artifact, Message, State};
use crate::types::{ContextId, Timestamp, Version};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{Read, Write};

/// Full snapshot of one context at one version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateDocument {
    pub context_id: ContextId,
    pub version: Version,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub description: String,
    /// Merged view at persist time
    pub state: State,
    pub local_state: State,
    #[serde(default)]
    pub inheritance: InheritanceConfig,
    #[serde(default)]
    pub artifacts: BTreeMap<String, Artifact>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub compressed: bool,
}

/// Sidecar describing a data file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionMetadata {
    pub context_id: ContextId,
    pub version: Version,
    pub timestamp: Timestamp,
    pub filename: String,
    pub compressed: bool,
    pub size: u64,
}

pub fn encode(doc: &StateDocument, compress: bool) -> Result<Vec<u8>, StateError> {
    let json = serde_json::to_vec_pretty(doc).map_err(|e| {
        StateError::IoError(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Failed to serialize state document: {}", e),
        ))
    })?;
    if !compress {
        return Ok(json);
    }
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    Ok(encoder.finish()?)
}

pub fn decode(bytes: &[u8], compressed: bool) -> Result<StateDocument, StateError> {
    let json = if compressed {
        let mut decoded = Vec::new();
        GzDecoder::new(bytes)
            .read_to_end(&mut decoded)
            .map_err(|e| StateError::Deserialization(format!("corrupt gzip stream: {}", e)))?;
        decoded
    } else {
        bytes.to_vec()
    };
    serde_json::from_slice(&json)
        .map_err(|e| StateError::Deserialization(format!("corrupt state document: {}", e)))
}

pub fn encode_metadata(meta: &VersionMetadata) -> Result<Vec<u8>, StateError> {
    serde_json::to_vec_pretty(meta).map_err(|e| {
        StateError::IoError(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Failed to serialize version metadata: {}", e),
        ))
    })
}

pub fn decode_metadata(bytes: &[u8]) -> Result<VersionMetadata, StateError> {
    serde_json::from_slice(bytes)
        .map_err(|e| StateError::Deserialization(format!("corrupt version metadata: {}", e)))
}
