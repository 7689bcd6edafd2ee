//! Content addressing for deployable artifacts.
//!
//! An artifact's storage key is derived purely from a short fingerprint of
//! its content: `source-{hash}.zip`. Identical content always maps to the
//! same key and changed content to a new one, so "did the code change?" is
//! answered by comparing keys, without any version counter.
//!
//! The fingerprint keeps only the first 8 hex characters of a SHA-256
//! digest. That is 32 bits: collisions between two *different* artifacts are
//! possible in principle and accepted in exchange for readable object names.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::consts::{ARTIFACT_HASH_LEN, STORAGE_KEY_PREFIX, STORAGE_KEY_SUFFIX};
use crate::util::hash::{ContentHash, HashError, hash_bytes, hash_directory, hash_file};

/// Entries never included in a directory fingerprint.
const EXCLUDED_ENTRIES: &[&str] = &[".git", "__pycache__", ".DS_Store"];

/// Truncated content fingerprint (8 lowercase hex characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactHash(String);

impl ArtifactHash {
  /// Truncate a full digest to the artifact fingerprint length.
  pub fn from_content_hash(hash: &ContentHash) -> Self {
    Self(hash.0.chars().take(ARTIFACT_HASH_LEN).collect())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl std::fmt::Display for ArtifactHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.0)
  }
}

/// Content-addressed object name in the artifact bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageKey(String);

impl StorageKey {
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl std::fmt::Display for StorageKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.0)
  }
}

/// Where artifact content comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactSource {
  /// A pre-built archive.
  File(PathBuf),
  /// A source tree, fingerprinted entry by entry.
  Directory(PathBuf),
  /// In-memory content.
  Bytes(Vec<u8>),
}

impl ArtifactSource {
  /// Pick `File` or `Directory` depending on what `path` is on disk.
  pub fn from_path(path: &Path) -> Self {
    if path.is_dir() {
      ArtifactSource::Directory(path.to_path_buf())
    } else {
      ArtifactSource::File(path.to_path_buf())
    }
  }
}

/// Errors produced while fingerprinting artifact content.
#[derive(Debug, Error)]
pub enum ArtifactError {
  #[error("artifact source not found: {0}")]
  NotFound(PathBuf),

  #[error("failed to hash artifact source: {0}")]
  Hash(#[from] HashError),
}

/// A fingerprinted artifact and the key it is stored under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactReference {
  pub content_hash: ArtifactHash,
  pub storage_key: StorageKey,
  pub source: ArtifactSource,
}

impl ArtifactReference {
  /// Fingerprint `source` and derive its storage key.
  pub fn from_source(source: ArtifactSource) -> Result<Self, ArtifactError> {
    let content_hash = fingerprint_source(&source)?;
    let storage_key = derive_key(&content_hash);
    debug!(hash = %content_hash, key = %storage_key, "fingerprinted artifact");
    Ok(Self {
      content_hash,
      storage_key,
      source,
    })
  }
}

/// Fingerprint raw bytes.
pub fn fingerprint(bytes: &[u8]) -> ArtifactHash {
  ArtifactHash::from_content_hash(&hash_bytes(bytes))
}

/// Derive the storage key for a fingerprint. Pure string template.
pub fn derive_key(hash: &ArtifactHash) -> StorageKey {
  StorageKey(format!("{}{}{}", STORAGE_KEY_PREFIX, hash.0, STORAGE_KEY_SUFFIX))
}

/// Fingerprint any artifact source.
pub fn fingerprint_source(source: &ArtifactSource) -> Result<ArtifactHash, ArtifactError> {
  let full = match source {
    ArtifactSource::Bytes(bytes) => hash_bytes(bytes),
    ArtifactSource::File(path) => {
      if !path.is_file() {
        return Err(ArtifactError::NotFound(path.clone()));
      }
      hash_file(path)?
    }
    ArtifactSource::Directory(path) => {
      if !path.is_dir() {
        return Err(ArtifactError::NotFound(path.clone()));
      }
      hash_directory(path, EXCLUDED_ENTRIES)?
    }
  };
  Ok(ArtifactHash::from_content_hash(&full))
}
