//! Apply orchestration.
//!
//! This module provides the high-level `apply` function that orchestrates
//! the full reconcile flow:
//!
//! 1. Lower the desired state into a manifest and fingerprint the artifact
//! 2. Evaluate ownership policy
//! 3. Build the dependency graph, rejecting cycles
//! 4. Load the previous run state and observe the provider
//! 5. Compute the plan, refusing protected deletes
//! 6. Execute the plan (skipped for dry runs)
//! 7. Record what now exists and save the run state
//!
//! Nothing is mutated before step 6. A run that fails part way still saves
//! state for everything that succeeded, so the next run resumes from there.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::artifact::{ArtifactReference, StorageKey};
use crate::desired::{DesiredError, DesiredState};
use crate::manifest::{Manifest, ManifestError};
use crate::plan::{ObservedState, Plan, PlanError, compute_plan, observe};
use crate::policy::{PolicyError, apply_policy};
use crate::provider::{Provider, ProviderContext};
use crate::resource::ResourceKind;
use crate::state::{RunState, StateError, StateRecord, StateStore};

use super::dag::{DagError, ResourceDag};
use super::types::{ExecuteConfig, ResourceStatus, RunReport};
use super::{ExecutionInput, execute_plan};

/// Principal recorded when none is configured.
pub const DEFAULT_PRINCIPAL: &str = "local-operator";

/// Errors that stop a run before anything is mutated, or while saving state.
///
/// Failures of individual resources are not errors; they are reported in the
/// [`RunReport`].
#[derive(Debug, Error)]
pub enum ApplyError {
  #[error("desired state error: {0}")]
  Desired(#[from] DesiredError),

  #[error("policy error: {0}")]
  Policy(#[from] PolicyError),

  #[error("{0}")]
  Dag(#[from] DagError),

  #[error("{0}")]
  Plan(#[from] PlanError),

  #[error("manifest error: {0}")]
  Manifest(#[from] ManifestError),

  #[error("state error: {0}")]
  State(#[from] StateError),
}

/// Options for one apply run.
#[derive(Debug, Clone)]
pub struct ApplyOptions {
  pub execute: ExecuteConfig,

  /// Plan only; execute nothing and leave the state untouched.
  pub dry_run: bool,

  /// Identity the provider calls are made as.
  pub principal: String,
}

impl Default for ApplyOptions {
  fn default() -> Self {
    Self {
      execute: ExecuteConfig::default(),
      dry_run: false,
      principal: DEFAULT_PRINCIPAL.to_string(),
    }
  }
}

/// Everything computed before execution.
#[derive(Debug, Clone)]
pub struct Prepared {
  pub ctx: ProviderContext,
  pub manifest: Manifest,
  pub dag: ResourceDag,
  pub previous: RunState,
  pub observed: ObservedState,
  pub plan: Plan,
  pub artifact: ArtifactReference,
}

/// Values worth showing once a run finishes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunOutputs {
  /// URI of the deployed function, when known.
  pub function_uri: Option<String>,
  pub storage_key: Option<StorageKey>,
}

/// Result of an apply operation.
#[derive(Debug)]
pub struct ApplyResult {
  pub plan: Plan,

  /// Execution details. `None` for dry runs.
  pub report: Option<RunReport>,

  pub outputs: RunOutputs,

  /// The state as saved (or, for dry runs, as loaded).
  pub state: RunState,
}

impl ApplyResult {
  /// True when every planned action reached its desired state.
  pub fn is_success(&self) -> bool {
    self.report.as_ref().is_none_or(RunReport::is_success)
  }
}

/// Run everything up to and including planning.
pub async fn prepare(
  desired: &DesiredState,
  base_dir: &Path,
  provider: &dyn Provider,
  principal: &str,
  store: &StateStore,
) -> Result<Prepared, ApplyError> {
  let ctx = ProviderContext::new(&desired.project, &desired.region, principal);

  let lowered = desired.lower(base_dir)?;
  let mut manifest = lowered.manifest;
  apply_policy(&mut manifest, &lowered.toggles)?;

  let dag = ResourceDag::from_manifest(&manifest)?;
  debug!(
    resources = dag.len(),
    critical_path = ?dag.critical_path(),
    "built dependency graph"
  );

  let previous = store.load(&desired.project)?;
  let observed = observe(provider, &ctx, &manifest, &previous).await?;
  let plan = compute_plan(&manifest, &dag, &observed)?;

  info!(project = %desired.project, summary = ?plan.summary(), "plan computed");

  Ok(Prepared {
    ctx,
    manifest,
    dag,
    previous,
    observed,
    plan,
    artifact: lowered.artifact,
  })
}

/// Execute a prepared plan and save the resulting state.
pub async fn apply_prepared(
  prepared: Prepared,
  provider: Arc<dyn Provider>,
  store: &StateStore,
  options: &ApplyOptions,
  cancel: &CancellationToken,
) -> Result<ApplyResult, ApplyError> {
  if options.dry_run {
    info!("dry run, not executing");
    let outputs = outputs_for(&prepared.previous, Some(&prepared.artifact));
    return Ok(ApplyResult {
      plan: prepared.plan,
      report: None,
      outputs,
      state: prepared.previous,
    });
  }

  let input = ExecutionInput {
    plan: &prepared.plan,
    manifest: &prepared.manifest,
    dag: &prepared.dag,
    observed: &prepared.observed,
    artifact: Some(&prepared.artifact),
  };
  let report = execute_plan(input, provider, &prepared.ctx, &options.execute, cancel).await;

  let state = next_state(&prepared, &report)?;
  store.save(&state)?;

  if report.is_success() {
    info!(path = %store.path().display(), "run state saved");
  } else {
    warn!(
      failed = report.failed().len(),
      skipped = report.skipped().len() + report.cancelled().len(),
      "run incomplete, state saved for resumption"
    );
  }

  let outputs = outputs_for(&state, Some(&prepared.artifact));
  Ok(ApplyResult {
    plan: prepared.plan,
    report: Some(report),
    outputs,
    state,
  })
}

/// Reconcile `desired` against the provider.
pub async fn apply(
  desired: &DesiredState,
  base_dir: &Path,
  provider: Arc<dyn Provider>,
  store: &StateStore,
  options: &ApplyOptions,
  cancel: &CancellationToken,
) -> Result<ApplyResult, ApplyError> {
  let prepared = prepare(desired, base_dir, provider.as_ref(), &options.principal, store).await?;
  apply_prepared(prepared, provider, store, options, cancel).await
}

/// Fold a run's outcomes into the previous state.
///
/// Resources that failed or never ran keep whatever was recorded before.
fn next_state(prepared: &Prepared, report: &RunReport) -> Result<RunState, ApplyError> {
  let mut state = prepared.previous.clone();
  state.project = prepared.manifest.project.clone();

  for outcome in report.outcomes.values() {
    let orphan = prepared.plan.get(&outcome.id).is_some_and(|a| a.orphan);
    match &outcome.status {
      ResourceStatus::Deleted => {
        state.remove(&outcome.id);
      }
      ResourceStatus::Unchanged if orphan => {
        // An externally owned resource that is no longer declared.
        state.remove(&outcome.id);
      }
      status if status.is_success() => {
        let Some(resource) = prepared.manifest.get(&outcome.id) else {
          continue;
        };
        let outputs = outcome
          .observed
          .as_ref()
          .map(|o| o.outputs.clone())
          .or_else(|| state.get(&outcome.id).map(|r| r.outputs.clone()))
          .unwrap_or_default();
        let record = StateRecord {
          kind: resource.kind,
          key: resource.key.clone(),
          protected: resource.protected,
          ownership: resource.ownership,
          depends_on: prepared.dag.dependencies(&outcome.id).into_iter().collect(),
          attributes: prepared.manifest.resolved_attributes(&outcome.id)?,
          outputs,
        };
        state.upsert(outcome.id.clone(), record);
      }
      _ => {}
    }
  }

  for id in &prepared.plan.dropped {
    state.remove(id);
  }

  state.touch();
  Ok(state)
}

fn outputs_for(state: &RunState, artifact: Option<&ArtifactReference>) -> RunOutputs {
  RunOutputs {
    function_uri: state
      .output(ResourceKind::FunctionDeployment, "uri")
      .and_then(|v| v.as_str())
      .map(String::from),
    storage_key: artifact.map(|a| a.storage_key.clone()),
  }
}
