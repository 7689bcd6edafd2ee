use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::execute::dag::DagError;
use crate::manifest::ManifestError;
use crate::provider::{ObservedResource, ProviderError};
use crate::resource::{Ownership, ResourceId, ResourceKind};
use crate::state::StateRecord;

/// What the reconciler will do to one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
  Create,
  Update,
  NoOp,
  /// Deletion is implied but the resource is protected. Never executed: a
  /// plan containing one fails as a whole.
  RefuseDelete,
  Delete,
}

impl Action {
  /// Whether executing this action calls a mutating provider operation.
  pub fn is_mutation(&self) -> bool {
    matches!(self, Action::Create | Action::Update | Action::Delete)
  }
}

impl std::fmt::Display for Action {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      Action::Create => "create",
      Action::Update => "update",
      Action::NoOp => "no-op",
      Action::RefuseDelete => "refuse-delete",
      Action::Delete => "delete",
    };
    f.write_str(s)
  }
}

/// One entry of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedAction {
  pub id: ResourceId,
  pub kind: ResourceKind,
  pub key: String,
  pub action: Action,
  pub ownership: Ownership,
  /// Human-readable cause, e.g. `absent` or `attributes differ: memory`.
  pub reason: String,
  /// Attributes whose desired value differs from the observed one.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub changed: Vec<String>,
  /// The resource is recorded from a previous run but no longer declared.
  #[serde(default)]
  pub orphan: bool,
}

/// An ordered plan.
///
/// Forward actions come first in dependency order, followed by deletions with
/// dependents before their dependencies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
  pub project: String,
  pub actions: Vec<PlannedAction>,
  /// Orphans that no longer exist in the provider; they are only forgotten.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub dropped: Vec<ResourceId>,
}

impl Plan {
  pub fn get(&self, id: &ResourceId) -> Option<&PlannedAction> {
    self.actions.iter().find(|a| &a.id == id)
  }

  pub fn action(&self, id: &ResourceId) -> Option<Action> {
    self.get(id).map(|a| a.action)
  }

  /// Number of entries per action.
  pub fn summary(&self) -> BTreeMap<String, usize> {
    let mut out = BTreeMap::new();
    for action in &self.actions {
      *out.entry(action.action.to_string()).or_insert(0) += 1;
    }
    out
  }

  /// True when applying would change nothing.
  pub fn is_converged(&self) -> bool {
    self.actions.iter().all(|a| !a.action.is_mutation()) && self.dropped.is_empty()
  }

  pub fn refused(&self) -> Vec<&ResourceId> {
    self
      .actions
      .iter()
      .filter(|a| a.action == Action::RefuseDelete)
      .map(|a| &a.id)
      .collect()
  }
}

/// An orphan and what the provider says about it.
#[derive(Debug, Clone, PartialEq)]
pub struct OrphanObservation {
  pub record: StateRecord,
  pub observed: Option<ObservedResource>,
}

/// Everything the provider reported before planning.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservedState {
  /// Declared resources that exist, by id. Absent ones are missing.
  pub declared: BTreeMap<ResourceId, ObservedResource>,
  pub orphans: BTreeMap<ResourceId, OrphanObservation>,
}

/// Errors raised while planning. None of them leave side effects behind.
#[derive(Debug, Error)]
pub enum PlanError {
  /// The plan would delete protected resources. The refused plan is attached
  /// for display.
  #[error("refusing to delete protected resources: {}", join(.ids))]
  ProtectedResource { ids: Vec<ResourceId>, plan: Box<Plan> },

  #[error("failed to observe {id}: {source}")]
  Observe {
    id: ResourceId,
    #[source]
    source: ProviderError,
  },

  #[error(transparent)]
  Manifest(#[from] ManifestError),

  #[error(transparent)]
  Dag(#[from] DagError),
}

fn join(ids: &[ResourceId]) -> String {
  ids.iter().map(ResourceId::as_str).collect::<Vec<_>>().join(", ")
}
