//! Types for plan execution.
//!
//! This module defines the error types, per-resource outcomes and
//! configuration for executing a plan against a provider.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::manifest::ManifestError;
use crate::plan::Action;
use crate::provider::{ObservedResource, ProviderError};
use crate::resource::{ResourceId, ResourceKind};

/// Errors that can occur while executing a single action.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExecuteError {
  /// The provider rejected the call and retrying will not help.
  #[error(transparent)]
  Provider(#[from] ProviderError),

  /// The provider kept failing transiently.
  #[error("gave up after {attempts} attempts: {last}")]
  RetriesExhausted { attempts: u32, last: ProviderError },

  /// The action did not finish within the per-action timeout.
  #[error("timed out after {0:?}")]
  Timeout(Duration),

  /// An externally owned resource this run depends on does not exist.
  #[error("externally owned {kind} {key} does not exist")]
  ExternalResourceMissing { kind: ResourceKind, key: String },

  /// A protected resource reached execution with a delete. Plans refuse these,
  /// so this only happens with hand-built plans.
  #[error("refusing to delete protected resource")]
  Protected,

  #[error(transparent)]
  Manifest(#[from] ManifestError),
}

/// Final status of one resource after a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum ResourceStatus {
  Created,
  Updated,
  Unchanged,
  Deleted,
  Failed { reason: String },
  /// Not attempted because a dependency failed.
  Skipped { blocked_by: ResourceId },
  /// Not attempted because the run was cancelled.
  Cancelled,
}

impl ResourceStatus {
  /// Whether the resource reached its desired state.
  pub fn is_success(&self) -> bool {
    matches!(
      self,
      ResourceStatus::Created | ResourceStatus::Updated | ResourceStatus::Unchanged | ResourceStatus::Deleted
    )
  }
}

impl std::fmt::Display for ResourceStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ResourceStatus::Created => f.write_str("created"),
      ResourceStatus::Updated => f.write_str("updated"),
      ResourceStatus::Unchanged => f.write_str("unchanged"),
      ResourceStatus::Deleted => f.write_str("deleted"),
      ResourceStatus::Failed { reason } => write!(f, "failed: {}", reason),
      ResourceStatus::Skipped { blocked_by } => write!(f, "skipped: blocked-by {}", blocked_by),
      ResourceStatus::Cancelled => f.write_str("skipped: cancelled"),
    }
  }
}

/// What happened to one resource.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceOutcome {
  pub id: ResourceId,
  pub kind: ResourceKind,
  pub action: Action,
  #[serde(flatten)]
  pub status: ResourceStatus,
  /// Provider view after the action, when one is known.
  #[serde(skip)]
  pub observed: Option<ObservedResource>,
}

/// Result of executing a plan.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
  pub outcomes: BTreeMap<ResourceId, ResourceOutcome>,
  /// Ids in the order their outcome was recorded.
  pub completion_order: Vec<ResourceId>,
}

impl RunReport {
  pub(crate) fn record(&mut self, outcome: ResourceOutcome) {
    self.completion_order.push(outcome.id.clone());
    self.outcomes.insert(outcome.id.clone(), outcome);
  }

  pub fn contains(&self, id: &ResourceId) -> bool {
    self.outcomes.contains_key(id)
  }

  pub fn status(&self, id: &ResourceId) -> Option<&ResourceStatus> {
    self.outcomes.get(id).map(|o| &o.status)
  }

  /// Returns true if every resource reached its desired state.
  pub fn is_success(&self) -> bool {
    self.outcomes.values().all(|o| o.status.is_success())
  }

  pub fn failed(&self) -> Vec<&ResourceId> {
    self.filter(|s| matches!(s, ResourceStatus::Failed { .. }))
  }

  pub fn skipped(&self) -> Vec<&ResourceId> {
    self.filter(|s| matches!(s, ResourceStatus::Skipped { .. }))
  }

  pub fn cancelled(&self) -> Vec<&ResourceId> {
    self.filter(|s| matches!(s, ResourceStatus::Cancelled))
  }

  /// Position of `id` in the completion order.
  pub fn position(&self, id: &ResourceId) -> Option<usize> {
    self.completion_order.iter().position(|c| c == id)
  }

  fn filter(&self, pred: impl Fn(&ResourceStatus) -> bool) -> Vec<&ResourceId> {
    self.outcomes.values().filter(|o| pred(&o.status)).map(|o| &o.id).collect()
  }
}

/// Retry policy for transient provider errors.
#[derive(Debug, Clone)]
pub struct RetryConfig {
  /// Total attempts including the first one.
  pub max_attempts: u32,
  pub base_delay: Duration,
  pub max_delay: Duration,
}

impl RetryConfig {
  /// Delay before retry number `attempt` (1-based): doubles each time, capped.
  pub fn delay_for(&self, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    self.base_delay.saturating_mul(factor).min(self.max_delay)
  }
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      max_attempts: 4,
      base_delay: Duration::from_millis(200),
      max_delay: Duration::from_secs(5),
    }
  }
}

/// Configuration for plan execution.
#[derive(Debug, Clone)]
pub struct ExecuteConfig {
  /// Maximum number of provider actions in flight.
  pub parallelism: usize,

  /// Upper bound for one action, retries included.
  pub action_timeout: Duration,

  /// Stop starting new actions once this much time has passed.
  pub deadline: Option<Duration>,

  pub retry: RetryConfig,
}

impl Default for ExecuteConfig {
  fn default() -> Self {
    Self {
      parallelism: num_cpus(),
      action_timeout: Duration::from_secs(600),
      deadline: None,
      retry: RetryConfig::default(),
    }
  }
}

/// Get the number of CPUs for default parallelism.
fn num_cpus() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn outcome(id: &str, status: ResourceStatus) -> ResourceOutcome {
    ResourceOutcome {
      id: ResourceId::new(id),
      kind: ResourceKind::Bucket,
      action: Action::Create,
      status,
      observed: None,
    }
  }

  #[test]
  fn empty_report_is_success() {
    let report = RunReport::default();
    assert!(report.is_success());
    assert!(report.failed().is_empty());
  }

  #[test]
  fn failure_and_skip_are_not_success() {
    let mut report = RunReport::default();
    report.record(outcome("a", ResourceStatus::Created));
    report.record(outcome(
      "b",
      ResourceStatus::Failed {
        reason: "boom".to_string(),
      },
    ));
    report.record(outcome(
      "c",
      ResourceStatus::Skipped {
        blocked_by: ResourceId::new("b"),
      },
    ));

    assert!(!report.is_success());
    assert_eq!(report.failed(), vec![&ResourceId::new("b")]);
    assert_eq!(report.skipped(), vec![&ResourceId::new("c")]);
    assert_eq!(report.position(&ResourceId::new("c")), Some(2));
  }

  #[test]
  fn status_display() {
    assert_eq!(ResourceStatus::Created.to_string(), "created");
    assert_eq!(
      ResourceStatus::Failed {
        reason: "permission denied".to_string()
      }
      .to_string(),
      "failed: permission denied"
    );
    assert_eq!(
      ResourceStatus::Skipped {
        blocked_by: ResourceId::new("runtime-sa")
      }
      .to_string(),
      "skipped: blocked-by runtime-sa"
    );
    assert_eq!(ResourceStatus::Cancelled.to_string(), "skipped: cancelled");
  }

  #[test]
  fn backoff_doubles_and_caps() {
    let retry = RetryConfig {
      max_attempts: 10,
      base_delay: Duration::from_millis(100),
      max_delay: Duration::from_millis(500),
    };
    assert_eq!(retry.delay_for(1), Duration::from_millis(100));
    assert_eq!(retry.delay_for(2), Duration::from_millis(200));
    assert_eq!(retry.delay_for(3), Duration::from_millis(400));
    assert_eq!(retry.delay_for(4), Duration::from_millis(500));
    assert_eq!(retry.delay_for(40), Duration::from_millis(500));
  }

  #[test]
  fn execute_config_default_parallelism() {
    let config = ExecuteConfig::default();
    assert!(config.parallelism >= 1);
    assert!(config.deadline.is_none());
  }
}
