mod apply;
mod fingerprint;
mod plan;
mod status;
mod trigger;

pub use apply::{ApplyArgs, cmd_apply};
pub use fingerprint::cmd_fingerprint;
pub use plan::cmd_plan;
pub use status::cmd_status;
pub use trigger::cmd_trigger;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use stratus_lib::desired::DesiredState;
use stratus_lib::platform::paths::provider_dir;
use stratus_lib::provider::LocalProvider;

/// Load a desired-state file and return it with the directory relative
/// artifact sources resolve against.
pub(crate) fn load_desired(file: &Path) -> Result<(DesiredState, PathBuf)> {
  let desired =
    DesiredState::load(file).with_context(|| format!("Failed to load desired state: {}", file.display()))?;
  let absolute = dunce::canonicalize(file).with_context(|| format!("Failed to resolve path: {}", file.display()))?;
  let base_dir = absolute.parent().map(Path::to_path_buf).unwrap_or_default();
  Ok((desired, base_dir))
}

/// Open the persisted local provider for `project`.
pub(crate) fn open_provider(project: &str) -> Result<Arc<LocalProvider>> {
  let path = provider_dir().join(format!("{}.json", project));
  let provider = LocalProvider::open(&path)
    .with_context(|| format!("Failed to open provider table: {}", path.display()))?
    .with_api_enforcement();
  Ok(Arc::new(provider))
}

pub(crate) fn runtime() -> Result<tokio::runtime::Runtime> {
  tokio::runtime::Runtime::new().context("Failed to create async runtime")
}
