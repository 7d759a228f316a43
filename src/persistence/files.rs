//! File layout for persisted versions
//!
//! `<root>/states/<context>/state_v<n>.json[.gz]` holds the document and
//! `metadata_v<n>.json` its sidecar. Writes go through a `.tmp` file and a
//! rename; the pair as a whole is not atomic.

use super::document::{decode_metadata, encode_metadata, VersionMetadata};
use crate::error::StateError;
use crate::types::Version;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

pub struct StateFiles {
    root: PathBuf,
}

impl StateFiles {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn states_dir(&self) -> PathBuf {
        self.root.join("states")
    }

    fn context_dir(&self, context_id: &str) -> Result<PathBuf, StateError> {
        if context_id.is_empty()
            || context_id == "."
            || context_id == ".."
            || context_id.contains(['/', '\\'])
        {
            return Err(StateError::InvalidArgument(format!(
                "context id {:?} cannot be used as a directory name",
                context_id
            )));
        }
        Ok(self.states_dir().join(context_id))
    }

    pub fn data_filename(version: Version, compressed: bool) -> String {
        if compressed {
            format!("state_v{}.json.gz", version)
        } else {
            format!("state_v{}.json", version)
        }
    }

    fn metadata_filename(version: Version) -> String {
        format!("metadata_v{}.json", version)
    }

    /// Write the data file and its sidecar, removing the stale alternate encoding
    pub fn write(
        &self,
        context_id: &str,
        version: Version,
        data: &[u8],
        meta: &VersionMetadata,
    ) -> Result<(), StateError> {
        let dir = self.context_dir(context_id)?;
        fs::create_dir_all(&dir).map_err(|e| {
            StateError::IoError(io::Error::new(
                e.kind(),
                format!("Failed to create context directory {:?}: {}", dir, e),
            ))
        })?;

        write_atomic(&dir.join(Self::data_filename(version, meta.compressed)), data)?;
        remove_if_exists(&dir.join(Self::data_filename(version, !meta.compressed)))?;
        write_atomic(
            &dir.join(Self::metadata_filename(version)),
            &encode_metadata(meta)?,
        )
    }

    /// Read a data file, trying the uncompressed name first
    ///
    /// Returns the raw bytes and whether they are gzip-compressed.
    pub fn read(
        &self,
        context_id: &str,
        version: Version,
    ) -> Result<Option<(Vec<u8>, bool)>, StateError> {
        let dir = self.context_dir(context_id)?;
        for compressed in [false, true] {
            let path = dir.join(Self::data_filename(version, compressed));
            match fs::read(&path) {
                Ok(bytes) => return Ok(Some((bytes, compressed))),
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }

    /// Remove both data encodings and the sidecar; true if anything existed
    pub fn remove(&self, context_id: &str, version: Version) -> Result<bool, StateError> {
        let dir = self.context_dir(context_id)?;
        let mut removed = false;
        for name in [
            Self::data_filename(version, false),
            Self::data_filename(version, true),
            Self::metadata_filename(version),
        ] {
            removed |= remove_if_exists(&dir.join(name))?;
        }
        Ok(removed)
    }

    /// Every readable sidecar under the root; unreadable ones are skipped
    pub fn scan(&self) -> Result<Vec<VersionMetadata>, StateError> {
        let states = self.states_dir();
        let entries = match fs::read_dir(&states) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut found = Vec::new();
        for entry in entries {
            let context_dir = entry?.path();
            if !context_dir.is_dir() {
                continue;
            }
            for file in fs::read_dir(&context_dir)? {
                let path = file?.path();
                let is_sidecar = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map_or(false, |n| n.starts_with("metadata_v") && n.ends_with(".json"));
                if !is_sidecar {
                    continue;
                }
                match fs::read(&path).map_err(StateError::from).and_then(|b| decode_metadata(&b)) {
                    Ok(meta) => found.push(meta),
                    Err(e) => warn!(path = ?path, error = %e, "Skipping unreadable version metadata"),
                }
            }
        }
        Ok(found)
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StateError> {
    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, bytes).map_err(|e| {
        StateError::IoError(io::Error::new(
            e.kind(),
            format!("Failed to write {:?}: {}", temp_path, e),
        ))
    })?;
    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        StateError::IoError(io::Error::new(
            e.kind(),
            format!("Failed to rename temp file to {:?}: {}", path, e),
        ))
    })
}

fn remove_if_exists(path: &Path) -> Result<bool, StateError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
