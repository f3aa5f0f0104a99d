//! Build manifest written next to the compiled entry-point binaries.
//!
//! ```json
//! { "entry_points": [ { "filename": "app-entry-1", "user_meta": "BAAAAA..." } ] }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::metadata::DeploymentMetadata;
use crate::value::MetadataError;

/// Errors that can occur when loading a build manifest.
#[derive(Error, Debug)]
pub enum ManifestError {
    /// The manifest file could not be read.
    #[error("IO error reading {path}: {source}")]
    Io {
        /// Path of the manifest.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The JSON content does not match the manifest schema.
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One packageable program entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPoint {
    /// File name of the entry-point binary, relative to the manifest's directory.
    pub filename: String,
    /// Base64-encoded metadata blob (see [`crate::value`]).
    pub user_meta: String,
    /// Source-level name of the function the entry point was generated from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_function_name: Option<String>,
}

impl EntryPoint {
    /// Decode the base64 layer of `user_meta`.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::Base64`] if `user_meta` is not valid base64.
    pub fn metadata_blob(&self) -> Result<Vec<u8>, MetadataError> {
        STANDARD
            .decode(self.user_meta.trim())
            .map_err(|e| MetadataError::Base64(e.to_string()))
    }

    /// Decode `user_meta` into deployment parameters.
    ///
    /// # Errors
    ///
    /// Returns a [`MetadataError`] if either the base64 or the binary layer is
    /// malformed, or required fields are missing.
    pub fn metadata(&self) -> Result<DeploymentMetadata, MetadataError> {
        DeploymentMetadata::from_bytes(&self.metadata_blob()?)
    }
}

/// All entry points produced by one build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildManifest {
    /// Entry points in build order.
    pub entry_points: Vec<EntryPoint>,
}

impl BuildManifest {
    /// Location of the manifest belonging to a built binary: the same path
    /// with its extension replaced by `.json`.
    pub fn path_for(binary: &Path) -> PathBuf {
        binary.with_extension("json")
    }

    /// Parse a manifest from a JSON file on disk.
    ///
    /// # Errors
    ///
    /// Returns `ManifestError::Io` if the file cannot be read, or
    /// `ManifestError::Parse` if the JSON does not match the schema.
    pub fn from_file(path: &Path) -> Result<Self, ManifestError> {
        let content = fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse a manifest from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns `ManifestError::Parse` if the JSON does not match the schema.
    pub fn parse(content: &str) -> Result<Self, ManifestError> {
        Ok(serde_json::from_str(content)?)
    }
}
