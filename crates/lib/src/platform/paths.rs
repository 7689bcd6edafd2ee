use crate::consts::{APP_NAME, HOME_ENV};
use std::path::PathBuf;

/// Directory name for persisted run state within the data directory.
const STATE_DIR: &str = "state";

/// Directory name for the local provider's table within the data directory.
const PROVIDER_DIR: &str = "provider";

/// Returns the user's home directory, or the current directory if `HOME` is unset.
pub fn home_dir() -> PathBuf {
  std::env::var("HOME").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("."))
}

/// Returns the directory for data files for the application
///
/// `STRATUS_HOME` wins when set, then `XDG_DATA_HOME`, then `~/.local/share`.
pub fn data_dir() -> PathBuf {
  if let Ok(home) = std::env::var(HOME_ENV)
    && !home.is_empty()
  {
    return PathBuf::from(home);
  }
  let data_home = std::env::var("XDG_DATA_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".local").join("share"));
  data_home.join(APP_NAME)
}

/// Returns the directory holding persisted run state
pub fn state_dir() -> PathBuf {
  data_dir().join(STATE_DIR)
}

/// Returns the directory holding the local provider's resource table
pub fn provider_dir() -> PathBuf {
  data_dir().join(PROVIDER_DIR)
}
