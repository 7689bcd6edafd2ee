//! Implementation of the `stratus fingerprint` command.
//!
//! Prints the content hash and storage key an artifact source would be
//! uploaded under.

use std::path::Path;

use anyhow::{Context, Result};

use stratus_lib::artifact::{ArtifactReference, ArtifactSource};

use crate::output::{print_json, print_stat};

pub fn cmd_fingerprint(path: &Path, json: bool) -> Result<()> {
  let reference = ArtifactReference::from_source(ArtifactSource::from_path(path))
    .with_context(|| format!("Failed to fingerprint {}", path.display()))?;

  if json {
    return print_json(&serde_json::json!({
      "content_hash": reference.content_hash,
      "storage_key": reference.storage_key,
    }));
  }

  print_stat("Content hash", reference.content_hash.as_str());
  print_stat("Storage key", reference.storage_key.as_str());
  Ok(())
}
