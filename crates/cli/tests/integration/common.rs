//! Shared test helpers for CLI integration tests.

use std::path::PathBuf;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Get path to a fixture file.
pub fn fixture_path(name: &str) -> PathBuf {
  PathBuf::from(env!("CARGO_MANIFEST_DIR"))
    .join("tests")
    .join("fixtures")
    .join(name)
}

/// Read fixture content.
pub fn fixture_content(name: &str) -> String {
  std::fs::read_to_string(fixture_path(name)).unwrap_or_else(|e| panic!("Failed to load fixture {}: {}", name, e))
}

/// Isolated test environment.
///
/// Each test gets its own temporary directory holding the desired-state file,
/// the function source it points at, and the stratus data directory.
pub struct TestEnv {
  pub temp: TempDir,
  pub config_path: PathBuf,
}

impl TestEnv {
  /// Create from a fixture file.
  ///
  /// Copies the fixture content to a temporary `stratus.toml` next to a small
  /// function source tree.
  pub fn from_fixture(name: &str) -> Self {
    let temp = TempDir::new().unwrap();
    let config_path = temp.path().join("stratus.toml");
    std::fs::write(&config_path, fixture_content(name)).unwrap();
    let env = Self { temp, config_path };
    env.write_file("function/main.py", "def entryPoint(event, context):\n    pass\n");
    env
  }

  /// Write a file relative to the temp directory.
  pub fn write_file(&self, relative_path: &str, content: &str) {
    let path = self.temp.path().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
  }

  /// Rewrite the desired-state file.
  pub fn edit_config(&self, edit: impl FnOnce(String) -> String) {
    let content = std::fs::read_to_string(&self.config_path).unwrap();
    std::fs::write(&self.config_path, edit(content)).unwrap();
  }

  /// Data path for state and the local provider table.
  pub fn data_path(&self) -> PathBuf {
    let p = self.temp.path().join("data");
    std::fs::create_dir_all(&p).unwrap();
    dunce::canonicalize(&p).unwrap_or(p)
  }

  /// Get a pre-configured Command for the stratus binary.
  ///
  /// `STRATUS_HOME` points at an isolated data path.
  pub fn stratus_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("stratus");
    cmd.env("STRATUS_HOME", self.data_path());
    cmd.env_remove("RUST_LOG");
    cmd
  }
}
