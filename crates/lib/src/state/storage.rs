//! State storage.
//!
//! One JSON file per project:
//!
//! ```text
//! {data_dir}/state/
//! └── <project>.json      # RunState
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::consts::STATE_VERSION;
use crate::platform::paths::state_dir;

use super::types::{RunState, StateError};

/// Reads and writes the state file of one project.
#[derive(Debug, Clone)]
pub struct StateStore {
  path: PathBuf,
}

impl StateStore {
  pub fn new(path: PathBuf) -> Self {
    Self { path }
  }

  /// The store for `project` under the default state directory.
  pub fn for_project(project: &str) -> Self {
    Self::new(state_dir().join(format!("{}.json", project)))
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Load the state for `project`.
  ///
  /// Returns an empty state if nothing has been recorded yet.
  pub fn load(&self, project: &str) -> Result<RunState, StateError> {
    let content = match fs::read_to_string(&self.path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(RunState::new(project)),
      Err(e) => return Err(StateError::Read(e)),
    };

    let state: RunState = serde_json::from_str(&content).map_err(StateError::Parse)?;
    if state.version != STATE_VERSION {
      return Err(StateError::UnsupportedVersion(state.version));
    }
    debug!(path = %self.path.display(), resources = state.resources.len(), "loaded state");
    Ok(state)
  }

  /// Save the state.
  ///
  /// Uses atomic write (write to temp, then rename) to prevent corruption.
  pub fn save(&self, state: &RunState) -> Result<(), StateError> {
    if let Some(parent) = self.path.parent() {
      fs::create_dir_all(parent).map_err(StateError::CreateDir)?;
    }

    let temp_path = self.path.with_extension("json.tmp");
    let content = serde_json::to_string_pretty(state).map_err(StateError::Serialize)?;
    fs::write(&temp_path, &content).map_err(StateError::Write)?;
    fs::rename(&temp_path, &self.path).map_err(StateError::Write)?;

    debug!(path = %self.path.display(), "saved state");
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::resource::{Attributes, Ownership, ResourceId, ResourceKind};
  use crate::state::StateRecord;
  use serial_test::serial;
  use tempfile::TempDir;

  #[test]
  fn missing_file_is_empty_state() {
    let temp = TempDir::new().unwrap();
    let store = StateStore::new(temp.path().join("acme.json"));

    let state = store.load("acme").unwrap();
    assert_eq!(state.project, "acme");
    assert!(state.resources.is_empty());
  }

  #[test]
  fn save_and_reload() {
    let temp = TempDir::new().unwrap();
    let store = StateStore::new(temp.path().join("nested/acme.json"));

    let mut state = RunState::new("acme");
    state.upsert(
      ResourceId::new("bucket"),
      StateRecord {
        kind: ResourceKind::Bucket,
        key: "data-in".to_string(),
        protected: true,
        ownership: Ownership::Managed,
        depends_on: Default::default(),
        attributes: Attributes::new(),
        outputs: Attributes::new(),
      },
    );
    state.touch();
    store.save(&state).unwrap();

    assert_eq!(store.load("acme").unwrap(), state);
    assert!(!temp.path().join("nested/acme.json.tmp").exists());
  }

  #[test]
  fn unsupported_version_rejected() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("acme.json");
    fs::write(
      &path,
      r#"{"version": 99999, "project": "acme", "updated_at": 0, "resources": {}}"#,
    )
    .unwrap();

    let result = StateStore::new(path).load("acme");
    assert!(matches!(result, Err(StateError::UnsupportedVersion(99999))));
  }

  #[test]
  #[serial]
  fn default_location_follows_data_dir() {
    temp_env::with_var(crate::consts::HOME_ENV, Some("/srv/stratus"), || {
      let store = StateStore::for_project("acme");
      assert_eq!(store.path(), Path::new("/srv/stratus/state/acme.json"));
    });
  }
}
