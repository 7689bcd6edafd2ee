//! Plan execution.
//!
//! This module provides the readiness-counting scheduler that runs a plan
//! against a provider. It handles:
//! - dependency ordering: a resource starts only after every dependency has
//!   a recorded successful outcome
//! - bounded parallelism across independent branches
//! - per-action timeouts and retries of transient provider errors
//! - failure propagation: dependents of a failed resource are skipped
//! - cancellation: once cancelled, no new action starts
//!
//! The coordinator loop is the only writer of the [`RunReport`]. Spawned
//! tasks return their result and never touch shared state.

pub mod apply;
pub mod dag;
pub mod retry;
pub mod types;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::artifact::ArtifactReference;
use crate::manifest::Manifest;
use crate::plan::{Action, ObservedState, Plan, PlannedAction};
use crate::provider::{ObservedResource, Provider, ProviderContext, ResourceRequest};
use crate::resource::{Ownership, ResourceId, ResourceKind};

use retry::with_backoff;

pub use apply::{ApplyError, ApplyOptions, ApplyResult, Prepared, RunOutputs, apply, apply_prepared, prepare};
pub use dag::{DagError, ResourceDag};
pub use types::{ExecuteConfig, ExecuteError, ResourceOutcome, ResourceStatus, RetryConfig, RunReport};

/// Everything the scheduler reads while running a plan.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionInput<'a> {
  pub plan: &'a Plan,
  pub manifest: &'a Manifest,
  pub dag: &'a ResourceDag,
  pub observed: &'a ObservedState,
  /// Content uploaded by the artifact object's create or update.
  pub artifact: Option<&'a ArtifactReference>,
}

/// The provider work behind one planned action.
#[derive(Debug)]
enum Work {
  Create(ResourceRequest),
  Update(ResourceRequest),
  /// Check an externally owned resource exists.
  Verify,
  /// Nothing to do; carry the known observation forward.
  Keep(Option<ObservedResource>),
  Delete,
  Refuse,
}

#[derive(Debug)]
struct Job {
  id: ResourceId,
  kind: ResourceKind,
  key: String,
  work: Work,
}

type JobResult = Result<(ResourceStatus, Option<ObservedResource>), ExecuteError>;

impl Job {
  async fn run(self, provider: &dyn Provider, ctx: &ProviderContext, retry: &types::RetryConfig) -> JobResult {
    let what = self.id.as_str();
    match &self.work {
      Work::Create(request) => {
        let observed = with_backoff(retry, what, || provider.create(ctx, request)).await?;
        Ok((ResourceStatus::Created, Some(observed)))
      }
      Work::Update(request) => {
        let observed = with_backoff(retry, what, || provider.update(ctx, request)).await?;
        Ok((ResourceStatus::Updated, Some(observed)))
      }
      Work::Verify => {
        let found = with_backoff(retry, what, || provider.get(ctx, self.kind, &self.key)).await?;
        match found {
          Some(observed) => Ok((ResourceStatus::Unchanged, Some(observed))),
          None => Err(ExecuteError::ExternalResourceMissing {
            kind: self.kind,
            key: self.key.clone(),
          }),
        }
      }
      Work::Keep(known) => Ok((ResourceStatus::Unchanged, known.clone())),
      Work::Delete => {
        with_backoff(retry, what, || provider.delete(ctx, self.kind, &self.key)).await?;
        Ok((ResourceStatus::Deleted, None))
      }
      Work::Refuse => Err(ExecuteError::Protected),
    }
  }
}

/// Run `job` under the per-action timeout.
async fn run_with_timeout(job: Job, provider: &dyn Provider, ctx: &ProviderContext, config: &ExecuteConfig) -> JobResult {
  match tokio::time::timeout(config.action_timeout, job.run(provider, ctx, &config.retry)).await {
    Ok(result) => result,
    Err(_) => Err(ExecuteError::Timeout(config.action_timeout)),
  }
}

fn job_for(entry: &PlannedAction, input: &ExecutionInput<'_>) -> Result<Job, ExecuteError> {
  let request = || -> Result<ResourceRequest, ExecuteError> {
    let artifact = match entry.kind {
      ResourceKind::ArtifactObject => input.artifact.cloned(),
      _ => None,
    };
    Ok(ResourceRequest {
      id: entry.id.clone(),
      kind: entry.kind,
      key: entry.key.clone(),
      attributes: input.manifest.resolved_attributes(&entry.id)?,
      artifact,
    })
  };

  let work = match entry.action {
    Action::Create => Work::Create(request()?),
    Action::Update => Work::Update(request()?),
    Action::NoOp if entry.ownership == Ownership::ExternallyOwned && !entry.orphan => Work::Verify,
    Action::NoOp => Work::Keep(input.observed.declared.get(&entry.id).cloned()),
    Action::Delete => Work::Delete,
    Action::RefuseDelete => Work::Refuse,
  };
  Ok(Job {
    id: entry.id.clone(),
    kind: entry.kind,
    key: entry.key.clone(),
    work,
  })
}

fn outcome(entry: &PlannedAction, status: ResourceStatus, observed: Option<ObservedResource>) -> ResourceOutcome {
  ResourceOutcome {
    id: entry.id.clone(),
    kind: entry.kind,
    action: entry.action,
    status,
    observed,
  }
}

/// Execute a plan.
///
/// Forward actions run through the readiness scheduler; deletions of
/// orphans run afterwards, one at a time, in plan order. Individual failures
/// are recorded in the report, never returned as an error.
pub async fn execute_plan(
  input: ExecutionInput<'_>,
  provider: Arc<dyn Provider>,
  ctx: &ProviderContext,
  config: &ExecuteConfig,
  cancel: &CancellationToken,
) -> RunReport {
  let mut report = RunReport::default();

  let watcher = config.deadline.map(|limit| {
    let token = cancel.clone();
    tokio::spawn(async move {
      tokio::time::sleep(limit).await;
      warn!(?limit, "deadline reached, no new actions will start");
      token.cancel();
    })
  });

  execute_forward(&input, &provider, ctx, config, cancel, &mut report).await;
  execute_deletes(&input, &provider, ctx, config, cancel, &mut report).await;

  if let Some(watcher) = watcher {
    watcher.abort();
  }

  info!(
    resources = report.outcomes.len(),
    failed = report.failed().len(),
    skipped = report.skipped().len(),
    cancelled = report.cancelled().len(),
    "execution complete"
  );
  report
}

async fn execute_forward(
  input: &ExecutionInput<'_>,
  provider: &Arc<dyn Provider>,
  ctx: &ProviderContext,
  config: &ExecuteConfig,
  cancel: &CancellationToken,
  report: &mut RunReport,
) {
  let entries: BTreeMap<&ResourceId, &PlannedAction> = input
    .plan
    .actions
    .iter()
    .filter(|a| !a.orphan)
    .map(|a| (&a.id, a))
    .collect();

  // Unfinished dependencies per resource.
  let mut pending: BTreeMap<ResourceId, usize> = entries
    .keys()
    .map(|id| {
      let count = input
        .dag
        .dependencies(id)
        .iter()
        .filter(|dep| entries.contains_key(dep))
        .count();
      ((*id).clone(), count)
    })
    .collect();
  let mut ready: BTreeSet<ResourceId> = pending
    .iter()
    .filter(|(_, count)| **count == 0)
    .map(|(id, _)| id.clone())
    .collect();

  let semaphore = Arc::new(Semaphore::new(config.parallelism.max(1)));
  let mut join_set: JoinSet<(ResourceId, JobResult)> = JoinSet::new();
  let mut in_flight: BTreeSet<ResourceId> = BTreeSet::new();

  debug!(resources = entries.len(), ready = ready.len(), "starting forward execution");

  loop {
    while let Some(id) = ready.pop_first() {
      let Some(entry) = entries.get(&id).copied() else {
        continue;
      };
      if cancel.is_cancelled() {
        report.record(outcome(entry, ResourceStatus::Cancelled, None));
        continue;
      }

      let job = match job_for(entry, input) {
        Ok(job) => job,
        Err(err) => {
          fail(entry, err, input, &entries, report);
          continue;
        }
      };

      // A job waiting for a worker slot has not started; cancellation wins.
      let permit = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        permit = Arc::clone(&semaphore).acquire_owned() => permit.ok(),
      };
      let Some(permit) = permit else {
        debug!(resource = %id, "cancelled while waiting for a worker");
        report.record(outcome(entry, ResourceStatus::Cancelled, None));
        continue;
      };

      debug!(resource = %id, action = %entry.action, "starting");
      in_flight.insert(id.clone());
      let provider = Arc::clone(provider);
      let ctx = ctx.clone();
      let config = config.clone();
      join_set.spawn(async move {
        let _permit = permit;
        let result = run_with_timeout(job, provider.as_ref(), &ctx, &config).await;
        (id, result)
      });
    }

    let Some(joined) = join_set.join_next().await else {
      break;
    };
    let (id, result) = match joined {
      Ok(done) => done,
      Err(err) => {
        error!(error = %err, "action task failed to complete");
        continue;
      }
    };
    in_flight.remove(&id);
    let Some(entry) = entries.get(&id).copied() else {
      continue;
    };

    match result {
      Ok((status, observed)) => {
        info!(resource = %id, action = %entry.action, status = %status, "applied");
        report.record(outcome(entry, status, observed));
        for dependent in input.dag.dependents(&id) {
          if report.contains(&dependent) {
            continue;
          }
          if let Some(count) = pending.get_mut(&dependent) {
            *count = count.saturating_sub(1);
            if *count == 0 {
              ready.insert(dependent);
            }
          }
        }
      }
      Err(err) => fail(entry, err, input, &entries, report),
    }
  }

  // Anything left never started: its task died, the run was cancelled, or a
  // dependency never finished.
  for (id, entry) in &entries {
    if report.contains(id) {
      continue;
    }
    let status = if in_flight.contains(*id) {
      ResourceStatus::Failed {
        reason: "action task aborted".to_string(),
      }
    } else if cancel.is_cancelled() {
      ResourceStatus::Cancelled
    } else {
      let blocked_by = input
        .dag
        .dependencies(id)
        .into_iter()
        .find(|dep| !report.status(dep).is_some_and(ResourceStatus::is_success))
        .unwrap_or_else(|| (*id).clone());
      ResourceStatus::Skipped { blocked_by }
    };
    report.record(outcome(entry, status, None));
  }
}

/// Record a failure and skip everything downstream of it.
fn fail(
  entry: &PlannedAction,
  err: ExecuteError,
  input: &ExecutionInput<'_>,
  entries: &BTreeMap<&ResourceId, &PlannedAction>,
  report: &mut RunReport,
) {
  error!(resource = %entry.id, action = %entry.action, error = %err, "action failed");
  report.record(outcome(
    entry,
    ResourceStatus::Failed {
      reason: err.to_string(),
    },
    None,
  ));

  for dependent in input.dag.transitive_dependents(&entry.id) {
    if report.contains(&dependent) {
      continue;
    }
    let Some(skipped) = entries.get(&dependent) else {
      continue;
    };
    warn!(resource = %dependent, blocked_by = %entry.id, "skipping: dependency failed");
    report.record(outcome(
      skipped,
      ResourceStatus::Skipped {
        blocked_by: entry.id.clone(),
      },
      None,
    ));
  }
}

async fn execute_deletes(
  input: &ExecutionInput<'_>,
  provider: &Arc<dyn Provider>,
  ctx: &ProviderContext,
  config: &ExecuteConfig,
  cancel: &CancellationToken,
  report: &mut RunReport,
) {
  // Deletes that did not happen, with the resource that caused it.
  let mut blocked: Vec<(ResourceId, ResourceId)> = Vec::new();

  for entry in input.plan.actions.iter().filter(|a| a.orphan) {
    if cancel.is_cancelled() {
      report.record(outcome(entry, ResourceStatus::Cancelled, None));
      continue;
    }

    // A dependent that still exists keeps its dependencies alive.
    let blocker = blocked.iter().find(|(held, _)| {
      input
        .observed
        .orphans
        .get(held)
        .is_some_and(|o| o.record.depends_on.contains(&entry.id))
    });
    if let Some((_, root)) = blocker {
      warn!(resource = %entry.id, blocked_by = %root, "skipping delete: dependent still exists");
      let root = root.clone();
      report.record(outcome(entry, ResourceStatus::Skipped { blocked_by: root.clone() }, None));
      blocked.push((entry.id.clone(), root));
      continue;
    }

    let result = match job_for(entry, input) {
      Ok(job) => run_with_timeout(job, provider.as_ref(), ctx, config).await,
      Err(err) => Err(err),
    };
    match result {
      Ok((status, observed)) => {
        info!(resource = %entry.id, action = %entry.action, status = %status, "applied");
        report.record(outcome(entry, status, observed));
      }
      Err(err) => {
        error!(resource = %entry.id, action = %entry.action, error = %err, "action failed");
        report.record(outcome(
          entry,
          ResourceStatus::Failed {
            reason: err.to_string(),
          },
          None,
        ));
        blocked.push((entry.id.clone(), entry.id.clone()));
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::time::{Duration, Instant};

  use async_trait::async_trait;

  use crate::plan::{OrphanObservation, compute_plan};
  use crate::provider::{LocalProvider, ProviderError};
  use crate::resource::{Attributes, Resource};
  use crate::state::StateRecord;

  fn ctx() -> ProviderContext {
    ProviderContext::new("acme", "us-central1", "deployer@acme.iam.gserviceaccount.com")
  }

  fn config() -> ExecuteConfig {
    ExecuteConfig {
      parallelism: 4,
      action_timeout: Duration::from_secs(5),
      deadline: None,
      retry: RetryConfig {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
      },
    }
  }

  /// `sa` and `bucket` are independent roots; `fn` needs both, `trigger` needs `fn`.
  fn manifest() -> Manifest {
    let mut manifest = Manifest::new("acme", "us-central1");
    for resource in [
      Resource::new("sa", ResourceKind::ServiceAccount, "rt@acme.iam.gserviceaccount.com"),
      Resource::new("bucket", ResourceKind::Bucket, "acme-src"),
      Resource::new("fn", ResourceKind::FunctionDeployment, "handler")
        .with_ref("service_account", "sa")
        .depends_on("bucket"),
      Resource::new("trigger", ResourceKind::EventTrigger, "handler-trigger").with_ref("function", "fn"),
    ] {
      manifest.insert(resource).unwrap();
    }
    manifest
  }

  async fn run(
    manifest: &Manifest,
    observed: &ObservedState,
    provider: Arc<LocalProvider>,
    config: &ExecuteConfig,
    cancel: &CancellationToken,
  ) -> (Plan, RunReport) {
    let dag = ResourceDag::from_manifest(manifest).unwrap();
    let plan = compute_plan(manifest, &dag, observed).unwrap();
    let input = ExecutionInput {
      plan: &plan,
      manifest,
      dag: &dag,
      observed,
      artifact: None,
    };
    let report = execute_plan(input, provider, &ctx(), config, cancel).await;
    (plan, report)
  }

  fn id(s: &str) -> ResourceId {
    ResourceId::new(s)
  }

  /// Independent buckets, keyed by id.
  fn buckets(ids: &[&str]) -> Manifest {
    let mut manifest = Manifest::new("acme", "us-central1");
    for bucket in ids {
      manifest.insert(Resource::new(*bucket, ResourceKind::Bucket, *bucket)).unwrap();
    }
    manifest
  }

  /// Tracks how many creates run at once.
  #[derive(Default)]
  struct CountingProvider {
    inner: LocalProvider,
    current: AtomicUsize,
    peak: AtomicUsize,
  }

  #[async_trait]
  impl Provider for CountingProvider {
    async fn get(
      &self,
      ctx: &ProviderContext,
      kind: ResourceKind,
      key: &str,
    ) -> Result<Option<ObservedResource>, ProviderError> {
      self.inner.get(ctx, kind, key).await
    }

    async fn list(&self, ctx: &ProviderContext, kind: ResourceKind) -> Result<Vec<ObservedResource>, ProviderError> {
      self.inner.list(ctx, kind).await
    }

    async fn create(&self, ctx: &ProviderContext, request: &ResourceRequest) -> Result<ObservedResource, ProviderError> {
      let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
      self.peak.fetch_max(now, Ordering::SeqCst);
      tokio::time::sleep(Duration::from_millis(50)).await;
      let result = self.inner.create(ctx, request).await;
      self.current.fetch_sub(1, Ordering::SeqCst);
      result
    }

    async fn update(&self, ctx: &ProviderContext, request: &ResourceRequest) -> Result<ObservedResource, ProviderError> {
      self.inner.update(ctx, request).await
    }

    async fn delete(&self, ctx: &ProviderContext, kind: ResourceKind, key: &str) -> Result<(), ProviderError> {
      self.inner.delete(ctx, kind, key).await
    }
  }

  #[tokio::test]
  async fn dependencies_complete_before_dependents() {
    let provider = Arc::new(LocalProvider::new());
    let (_, report) = run(
      &manifest(),
      &ObservedState::default(),
      provider.clone(),
      &config(),
      &CancellationToken::new(),
    )
    .await;

    assert!(report.is_success());
    let pos = |s: &str| report.position(&id(s)).unwrap();
    assert!(pos("sa") < pos("fn"));
    assert!(pos("bucket") < pos("fn"));
    assert!(pos("fn") < pos("trigger"));
    assert_eq!(provider.mutations().len(), 4);
  }

  #[tokio::test]
  async fn failure_skips_only_dependents() {
    let provider = Arc::new(LocalProvider::new());
    provider.fail_permanent(ResourceKind::ServiceAccount, "rt@acme.iam.gserviceaccount.com");

    let (_, report) = run(
      &manifest(),
      &ObservedState::default(),
      provider.clone(),
      &config(),
      &CancellationToken::new(),
    )
    .await;

    assert!(matches!(report.status(&id("sa")), Some(ResourceStatus::Failed { .. })));
    assert_eq!(report.status(&id("bucket")), Some(&ResourceStatus::Created));
    assert_eq!(
      report.status(&id("fn")),
      Some(&ResourceStatus::Skipped { blocked_by: id("sa") })
    );
    assert_eq!(
      report.status(&id("trigger")),
      Some(&ResourceStatus::Skipped { blocked_by: id("sa") })
    );
    assert!(provider.record(ResourceKind::FunctionDeployment, "handler").is_none());
  }

  #[tokio::test]
  async fn transient_failures_are_retried() {
    let provider = Arc::new(LocalProvider::new());
    provider.fail_transient(ResourceKind::Bucket, "acme-src", 2);

    let (_, report) = run(
      &manifest(),
      &ObservedState::default(),
      provider.clone(),
      &config(),
      &CancellationToken::new(),
    )
    .await;

    assert!(report.is_success());
    let bucket_creates = provider
      .mutations()
      .into_iter()
      .filter(|c| c.kind == ResourceKind::Bucket)
      .count();
    assert_eq!(bucket_creates, 3);
  }

  #[tokio::test]
  async fn timed_out_action_blocks_dependents() {
    let provider = Arc::new(LocalProvider::new());
    provider.set_latency(ResourceKind::Bucket, "acme-src", Duration::from_millis(500));
    let config = ExecuteConfig {
      action_timeout: Duration::from_millis(50),
      ..config()
    };

    let (_, report) = run(
      &manifest(),
      &ObservedState::default(),
      provider,
      &config,
      &CancellationToken::new(),
    )
    .await;

    let Some(ResourceStatus::Failed { reason }) = report.status(&id("bucket")) else {
      panic!("bucket should have failed");
    };
    assert!(reason.starts_with("timed out"));
    assert_eq!(
      report.status(&id("fn")),
      Some(&ResourceStatus::Skipped { blocked_by: id("bucket") })
    );
  }

  #[tokio::test]
  async fn cancelled_run_starts_nothing() {
    let provider = Arc::new(LocalProvider::new());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let (_, report) = run(&manifest(), &ObservedState::default(), provider.clone(), &config(), &cancel).await;

    assert_eq!(report.cancelled().len(), 4);
    assert!(provider.mutations().is_empty());
  }

  #[tokio::test]
  async fn deadline_stops_new_actions() {
    let provider = Arc::new(LocalProvider::new());
    provider.set_latency(
      ResourceKind::ServiceAccount,
      "rt@acme.iam.gserviceaccount.com",
      Duration::from_millis(200),
    );
    let config = ExecuteConfig {
      deadline: Some(Duration::from_millis(50)),
      ..config()
    };

    let (_, report) = run(
      &manifest(),
      &ObservedState::default(),
      provider,
      &config,
      &CancellationToken::new(),
    )
    .await;

    // The in-flight create finishes; nothing after it starts.
    assert_eq!(report.status(&id("sa")), Some(&ResourceStatus::Created));
    assert_eq!(report.status(&id("fn")), Some(&ResourceStatus::Cancelled));
    assert_eq!(report.status(&id("trigger")), Some(&ResourceStatus::Cancelled));
  }

  #[tokio::test]
  async fn externally_owned_missing_blocks_dependents() {
    let mut manifest = manifest();
    manifest.resources.get_mut(&id("sa")).unwrap().ownership = Ownership::ExternallyOwned;
    let provider = Arc::new(LocalProvider::new());

    let (plan, report) = run(
      &manifest,
      &ObservedState::default(),
      provider.clone(),
      &config(),
      &CancellationToken::new(),
    )
    .await;

    assert_eq!(plan.action(&id("sa")), Some(Action::NoOp));
    let Some(ResourceStatus::Failed { reason }) = report.status(&id("sa")) else {
      panic!("missing external account should fail");
    };
    assert!(reason.contains("does not exist"));
    assert_eq!(
      report.status(&id("fn")),
      Some(&ResourceStatus::Skipped { blocked_by: id("sa") })
    );
    assert!(provider.mutations().iter().all(|c| c.kind != ResourceKind::ServiceAccount));
  }

  #[tokio::test]
  async fn orphan_deletes_follow_forward_actions() {
    let provider = Arc::new(LocalProvider::new());
    provider.seed(ObservedResource {
      kind: ResourceKind::EventTrigger,
      key: "old-trigger".to_string(),
      attributes: Attributes::new(),
      outputs: Attributes::new(),
    });
    let mut observed = ObservedState::default();
    observed.orphans.insert(
      id("old-trigger"),
      OrphanObservation {
        record: StateRecord {
          kind: ResourceKind::EventTrigger,
          key: "old-trigger".to_string(),
          protected: false,
          ownership: Ownership::Managed,
          depends_on: BTreeSet::new(),
          attributes: Attributes::new(),
          outputs: Attributes::new(),
        },
        observed: provider.record(ResourceKind::EventTrigger, "old-trigger"),
      },
    );

    let (_, report) = run(&manifest(), &observed, provider.clone(), &config(), &CancellationToken::new()).await;

    assert_eq!(report.status(&id("old-trigger")), Some(&ResourceStatus::Deleted));
    assert_eq!(report.completion_order.last(), Some(&id("old-trigger")));
    assert!(provider.record(ResourceKind::EventTrigger, "old-trigger").is_none());
  }

  #[tokio::test]
  async fn independent_roots_share_a_bounded_pool() {
    let manifest = buckets(&["a", "b", "c", "d", "e", "f"]);
    let dag = ResourceDag::from_manifest(&manifest).unwrap();
    let observed = ObservedState::default();
    let plan = compute_plan(&manifest, &dag, &observed).unwrap();
    let input = ExecutionInput {
      plan: &plan,
      manifest: &manifest,
      dag: &dag,
      observed: &observed,
      artifact: None,
    };
    let provider = Arc::new(CountingProvider::default());
    let config = ExecuteConfig {
      parallelism: 3,
      ..config()
    };

    let started = Instant::now();
    let report = execute_plan(input, provider.clone(), &ctx(), &config, &CancellationToken::new()).await;
    let elapsed = started.elapsed();

    assert!(report.is_success());
    assert_eq!(provider.peak.load(Ordering::SeqCst), 3);
    // Six 50ms creates one at a time would take at least 300ms.
    assert!(elapsed < Duration::from_millis(300), "took {elapsed:?}");
  }

  #[tokio::test]
  async fn queued_work_is_cancelled_at_deadline() {
    let provider = Arc::new(LocalProvider::new());
    provider.set_latency(ResourceKind::Bucket, "a", Duration::from_millis(300));
    let config = ExecuteConfig {
      parallelism: 1,
      deadline: Some(Duration::from_millis(50)),
      ..config()
    };

    let (_, report) = run(
      &buckets(&["a", "b"]),
      &ObservedState::default(),
      provider.clone(),
      &config,
      &CancellationToken::new(),
    )
    .await;

    assert_eq!(report.status(&id("a")), Some(&ResourceStatus::Created));
    assert_eq!(report.status(&id("b")), Some(&ResourceStatus::Cancelled));
    let created: Vec<_> = provider.mutations().into_iter().map(|c| c.key).collect();
    assert_eq!(created, vec!["a".to_string()]);
  }
}
