use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::STATE_VERSION;
use crate::manifest::Manifest;
use crate::resource::{Attributes, Ownership, ResourceId, ResourceKind};

/// Errors that can occur when reading or writing state.
#[derive(Debug, Error)]
pub enum StateError {
  /// Failed to create the state directory.
  #[error("failed to create state directory: {0}")]
  CreateDir(#[source] io::Error),

  #[error("failed to read state file: {0}")]
  Read(#[source] io::Error),

  #[error("failed to write state file: {0}")]
  Write(#[source] io::Error),

  #[error("failed to parse state file: {0}")]
  Parse(#[source] serde_json::Error),

  #[error("failed to serialize state: {0}")]
  Serialize(#[source] serde_json::Error),

  #[error("unsupported state file version {0}, expected {STATE_VERSION}")]
  UnsupportedVersion(u32),
}

/// What a previous run knew about one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
  pub kind: ResourceKind,
  pub key: String,
  #[serde(default)]
  pub protected: bool,
  #[serde(default)]
  pub ownership: Ownership,
  /// Dependencies at the time of recording, used to order deletes.
  #[serde(default)]
  pub depends_on: BTreeSet<ResourceId>,
  #[serde(default)]
  pub attributes: Attributes,
  #[serde(default)]
  pub outputs: Attributes,
}

/// State of one project after a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
  pub version: u32,
  pub project: String,
  /// Unix seconds of the last write.
  pub updated_at: u64,
  pub resources: BTreeMap<ResourceId, StateRecord>,
}

impl RunState {
  pub fn new(project: impl Into<String>) -> Self {
    Self {
      version: STATE_VERSION,
      project: project.into(),
      updated_at: 0,
      resources: BTreeMap::new(),
    }
  }

  pub fn get(&self, id: &ResourceId) -> Option<&StateRecord> {
    self.resources.get(id)
  }

  pub fn upsert(&mut self, id: ResourceId, record: StateRecord) {
    self.resources.insert(id, record);
  }

  pub fn remove(&mut self, id: &ResourceId) -> Option<StateRecord> {
    self.resources.remove(id)
  }

  /// Recorded resources the manifest no longer declares, in id order.
  pub fn orphans<'a>(&'a self, manifest: &Manifest) -> Vec<(&'a ResourceId, &'a StateRecord)> {
    self
      .resources
      .iter()
      .filter(|(id, _)| manifest.get(id).is_none())
      .collect()
  }

  /// Stamp the current time.
  pub fn touch(&mut self) {
    self.updated_at = SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .map(|d| d.as_secs())
      .unwrap_or_default();
  }

  /// First recorded value of a named output across resources of `kind`.
  pub fn output(&self, kind: ResourceKind, name: &str) -> Option<&serde_json::Value> {
    self
      .resources
      .values()
      .filter(|r| r.kind == kind)
      .find_map(|r| r.outputs.get(name))
  }
}
