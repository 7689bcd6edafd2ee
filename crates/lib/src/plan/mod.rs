//! Reconciliation planning.
//!
//! Compares the manifest against what the provider reports and decides an
//! [`Action`] per resource:
//!
//! - absent: `Create`
//! - present with differing attributes: `Update`
//! - referencing an artifact object that is being updated: `Update`
//! - externally owned: always `NoOp`
//! - recorded by a previous run but no longer declared: `Delete`, or
//!   `RefuseDelete` if protected, which fails the whole plan
//!
//! Planning never mutates anything.

mod types;

pub use types::*;

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, warn};

use crate::execute::dag::ResourceDag;
use crate::manifest::Manifest;
use crate::provider::{ObservedResource, Provider, ProviderContext};
use crate::resource::{Attributes, Ownership, ResourceId, ResourceKind};
use crate::state::{RunState, StateRecord};

/// Query the provider for every declared resource and every orphan recorded
/// in `previous`.
pub async fn observe(
  provider: &dyn Provider,
  ctx: &ProviderContext,
  manifest: &Manifest,
  previous: &RunState,
) -> Result<ObservedState, PlanError> {
  let mut observed = ObservedState::default();

  for resource in manifest.resources.values() {
    let found = provider
      .get(ctx, resource.kind, &resource.key)
      .await
      .map_err(|source| PlanError::Observe {
        id: resource.id.clone(),
        source,
      })?;
    if let Some(found) = found {
      observed.declared.insert(resource.id.clone(), found);
    }
  }

  let orphans = previous.orphans(manifest);
  let kinds: BTreeSet<ResourceKind> = orphans.iter().map(|(_, r)| r.kind).collect();
  let mut listed: BTreeMap<(ResourceKind, String), ObservedResource> = BTreeMap::new();
  for kind in kinds {
    let Some((first, _)) = orphans.iter().find(|(_, r)| r.kind == kind) else {
      continue;
    };
    let items = provider.list(ctx, kind).await.map_err(|source| PlanError::Observe {
      id: (*first).clone(),
      source,
    })?;
    listed.extend(items.into_iter().map(|r| ((r.kind, r.key.clone()), r)));
  }
  for (id, record) in orphans {
    observed.orphans.insert(
      id.clone(),
      OrphanObservation {
        record: record.clone(),
        observed: listed.remove(&(record.kind, record.key.clone())),
      },
    );
  }

  debug!(
    present = observed.declared.len(),
    declared = manifest.len(),
    orphans = observed.orphans.len(),
    "observed provider state"
  );
  Ok(observed)
}

/// Attribute names whose desired value differs from the observed one.
///
/// Attributes the provider reports but the desired state never sets are
/// ignored.
pub fn diff_attributes(desired: &Attributes, observed: &Attributes) -> Vec<String> {
  desired
    .iter()
    .filter(|(name, value)| observed.get(*name) != Some(*value))
    .map(|(name, _)| name.clone())
    .collect()
}

/// Build the plan.
pub fn compute_plan(manifest: &Manifest, dag: &ResourceDag, observed: &ObservedState) -> Result<Plan, PlanError> {
  let mut plan = Plan {
    project: manifest.project.clone(),
    ..Plan::default()
  };
  // Resources forced to update because an artifact they reference changed.
  let mut forced: BTreeMap<ResourceId, ResourceId> = BTreeMap::new();

  for id in dag.topological_order() {
    let Some(resource) = manifest.get(&id) else {
      continue;
    };

    let mut entry = PlannedAction {
      id: id.clone(),
      kind: resource.kind,
      key: resource.key.clone(),
      action: Action::NoOp,
      ownership: resource.ownership,
      reason: String::new(),
      changed: Vec::new(),
      orphan: false,
    };

    if !resource.is_managed() {
      entry.reason = "externally owned".to_string();
      plan.actions.push(entry);
      continue;
    }

    let desired = manifest.resolved_attributes(&id)?;
    match observed.declared.get(&id) {
      None => {
        entry.action = Action::Create;
        entry.reason = "absent".to_string();
      }
      Some(current) => {
        let changed = diff_attributes(&desired, &current.attributes);
        if !changed.is_empty() {
          entry.action = Action::Update;
          entry.reason = format!("attributes differ: {}", changed.join(", "));
          entry.changed = changed;
        } else if let Some(artifact) = forced.get(&id) {
          entry.action = Action::Update;
          entry.reason = format!("artifact {} changed", artifact);
        } else {
          entry.reason = "up to date".to_string();
        }
      }
    }

    if resource.kind == ResourceKind::ArtifactObject && entry.action == Action::Update {
      for dependent in manifest.referencing(&id) {
        forced.entry(dependent.clone()).or_insert_with(|| id.clone());
      }
    }

    if entry.action != Action::NoOp {
      info!(resource = %id, action = %entry.action, reason = %entry.reason, "planned");
    }
    plan.actions.push(entry);
  }

  plan_orphans(&mut plan, observed);

  let refused: Vec<ResourceId> = plan.refused().into_iter().cloned().collect();
  if !refused.is_empty() {
    warn!(resources = ?refused, "plan would delete protected resources");
    return Err(PlanError::ProtectedResource {
      ids: refused,
      plan: Box::new(plan),
    });
  }
  Ok(plan)
}

fn plan_orphans(plan: &mut Plan, observed: &ObservedState) {
  let present: BTreeMap<&ResourceId, &StateRecord> = observed
    .orphans
    .iter()
    .filter(|(_, o)| o.observed.is_some())
    .map(|(id, o)| (id, &o.record))
    .collect();

  for (id, orphan) in &observed.orphans {
    if orphan.observed.is_none() {
      debug!(resource = %id, "orphan already gone");
      plan.dropped.push(id.clone());
    }
  }

  for id in deletion_order(&present) {
    let Some(record) = present.get(&id) else {
      continue;
    };
    let (action, reason) = if record.ownership == Ownership::ExternallyOwned {
      (Action::NoOp, "no longer declared, externally owned")
    } else if record.protected {
      (Action::RefuseDelete, "no longer declared, protected")
    } else {
      (Action::Delete, "no longer declared")
    };
    plan.actions.push(PlannedAction {
      id: id.clone(),
      kind: record.kind,
      key: record.key.clone(),
      action,
      ownership: record.ownership,
      reason: reason.to_string(),
      changed: Vec::new(),
      orphan: true,
    });
  }
}

/// Orphans ordered so that a resource comes before anything it depended on.
fn deletion_order(orphans: &BTreeMap<&ResourceId, &StateRecord>) -> Vec<ResourceId> {
  // Dependents left to delete before each orphan.
  let mut waiting: BTreeMap<&ResourceId, usize> = orphans.keys().map(|id| (*id, 0)).collect();
  for record in orphans.values() {
    for dep in &record.depends_on {
      if let Some(count) = waiting.get_mut(dep) {
        *count += 1;
      }
    }
  }

  let mut ready: BTreeSet<&ResourceId> = waiting.iter().filter(|(_, n)| **n == 0).map(|(id, _)| *id).collect();
  let mut order = Vec::with_capacity(orphans.len());
  while let Some(id) = ready.pop_first() {
    waiting.remove(id);
    order.push(id.clone());
    if let Some(record) = orphans.get(id) {
      for dep in &record.depends_on {
        if let Some(count) = waiting.get_mut(dep) {
          *count = count.saturating_sub(1);
          if *count == 0 {
            ready.insert(dep);
          }
        }
      }
    }
  }
  // Recorded dependencies can only cycle if the state file was edited by
  // hand; delete whatever remains in id order.
  order.extend(waiting.into_keys().cloned());
  order
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::resource::Resource;
  use serde_json::json;

  fn manifest() -> Manifest {
    let mut manifest = Manifest::new("acme", "us-central1");
    for resource in [
      Resource::new("bucket", ResourceKind::Bucket, "acme-src").with_attr("location", "us-central1"),
      Resource::new("artifact", ResourceKind::ArtifactObject, "artifact")
        .with_ref("bucket", "bucket")
        .with_attr("object", "source-00000002.zip"),
      Resource::new("fn", ResourceKind::FunctionDeployment, "handler")
        .with_ref("source", "artifact")
        .with_attr("memory", "256M"),
    ] {
      manifest.insert(resource).unwrap();
    }
    manifest
  }

  fn observed_from(manifest: &Manifest, ids: &[&str]) -> ObservedState {
    let mut observed = ObservedState::default();
    for id in ids {
      let id = ResourceId::new(*id);
      let resource = manifest.get(&id).unwrap();
      let mut attributes = manifest.resolved_attributes(&id).unwrap();
      attributes.insert("etag".to_string(), json!("7"));
      observed.declared.insert(
        id,
        ObservedResource {
          kind: resource.kind,
          key: resource.key.clone(),
          attributes,
          outputs: Attributes::new(),
        },
      );
    }
    observed
  }

  fn plan_for(manifest: &Manifest, observed: &ObservedState) -> Result<Plan, PlanError> {
    let dag = ResourceDag::from_manifest(manifest).unwrap();
    compute_plan(manifest, &dag, observed)
  }

  fn orphan(kind: ResourceKind, key: &str, protected: bool, present: bool) -> OrphanObservation {
    let record = StateRecord {
      kind,
      key: key.to_string(),
      protected,
      ownership: Ownership::Managed,
      depends_on: BTreeSet::new(),
      attributes: Attributes::new(),
      outputs: Attributes::new(),
    };
    OrphanObservation {
      observed: present.then(|| ObservedResource {
        kind,
        key: key.to_string(),
        attributes: Attributes::new(),
        outputs: Attributes::new(),
      }),
      record,
    }
  }

  #[test]
  fn absent_resources_are_created_in_order() {
    let manifest = manifest();
    let plan = plan_for(&manifest, &ObservedState::default()).unwrap();

    let ids: Vec<_> = plan.actions.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(ids, vec!["bucket", "artifact", "fn"]);
    assert!(plan.actions.iter().all(|a| a.action == Action::Create));
  }

  #[test]
  fn matching_state_is_all_noop() {
    let manifest = manifest();
    let observed = observed_from(&manifest, &["bucket", "artifact", "fn"]);

    let plan = plan_for(&manifest, &observed).unwrap();
    assert!(plan.is_converged());
  }

  #[test]
  fn differing_attribute_is_update() {
    let manifest = manifest();
    let mut observed = observed_from(&manifest, &["bucket", "artifact", "fn"]);
    observed
      .declared
      .get_mut(&ResourceId::new("fn"))
      .unwrap()
      .attributes
      .insert("memory".to_string(), json!("128M"));

    let plan = plan_for(&manifest, &observed).unwrap();
    let entry = plan.get(&ResourceId::new("fn")).unwrap();
    assert_eq!(entry.action, Action::Update);
    assert_eq!(entry.changed, vec!["memory".to_string()]);
  }

  #[test]
  fn artifact_update_cascades_to_function() {
    let manifest = manifest();
    let mut observed = observed_from(&manifest, &["bucket", "artifact", "fn"]);
    observed
      .declared
      .get_mut(&ResourceId::new("artifact"))
      .unwrap()
      .attributes
      .insert("content_hash".to_string(), json!("00000001"));
    let mut manifest = manifest;
    manifest
      .resources
      .get_mut(&ResourceId::new("artifact"))
      .unwrap()
      .attributes
      .insert("content_hash".to_string(), "00000002".into());

    let plan = plan_for(&manifest, &observed).unwrap();
    assert_eq!(plan.action(&ResourceId::new("artifact")), Some(Action::Update));
    let function = plan.get(&ResourceId::new("fn")).unwrap();
    assert_eq!(function.action, Action::Update);
    assert_eq!(function.reason, "artifact artifact changed");
  }

  #[test]
  fn externally_owned_is_always_noop() {
    let mut manifest = manifest();
    manifest.resources.get_mut(&ResourceId::new("bucket")).unwrap().ownership = Ownership::ExternallyOwned;

    let plan = plan_for(&manifest, &ObservedState::default()).unwrap();
    let entry = plan.get(&ResourceId::new("bucket")).unwrap();
    assert_eq!(entry.action, Action::NoOp);
    assert_eq!(entry.reason, "externally owned");
  }

  #[test]
  fn unprotected_orphan_is_deleted() {
    let manifest = manifest();
    let mut observed = observed_from(&manifest, &["bucket", "artifact", "fn"]);
    observed.orphans.insert(
      ResourceId::new("old-trigger"),
      orphan(ResourceKind::EventTrigger, "handler-trigger", false, true),
    );

    let plan = plan_for(&manifest, &observed).unwrap();
    let entry = plan.actions.last().unwrap();
    assert_eq!(entry.id, ResourceId::new("old-trigger"));
    assert_eq!(entry.action, Action::Delete);
    assert!(entry.orphan);
  }

  #[test]
  fn protected_orphan_fails_plan() {
    let manifest = manifest();
    let mut observed = observed_from(&manifest, &["bucket", "artifact", "fn"]);
    observed.orphans.insert(
      ResourceId::new("archive"),
      orphan(ResourceKind::Bucket, "acme-archive", true, true),
    );

    let err = plan_for(&manifest, &observed).unwrap_err();
    let PlanError::ProtectedResource { ids, plan } = err else {
      panic!("expected protected resource error, got {:?}", err);
    };
    assert_eq!(ids, vec![ResourceId::new("archive")]);
    assert_eq!(plan.action(&ResourceId::new("archive")), Some(Action::RefuseDelete));
  }

  #[test]
  fn vanished_orphan_is_dropped() {
    let manifest = manifest();
    let mut observed = observed_from(&manifest, &["bucket", "artifact", "fn"]);
    observed
      .orphans
      .insert(ResourceId::new("gone"), orphan(ResourceKind::Bucket, "gone", true, false));

    let plan = plan_for(&manifest, &observed).unwrap();
    assert_eq!(plan.dropped, vec![ResourceId::new("gone")]);
    assert!(plan.get(&ResourceId::new("gone")).is_none());
  }

  #[test]
  fn deletes_run_dependents_first() {
    let mut bucket = orphan(ResourceKind::Bucket, "b", false, true).record;
    let mut object = orphan(ResourceKind::ArtifactObject, "o", false, true).record;
    object.depends_on.insert(ResourceId::new("a-bucket"));
    bucket.depends_on.clear();
    let a_bucket = ResourceId::new("a-bucket");
    let z_object = ResourceId::new("z-object");
    let orphans: BTreeMap<&ResourceId, &StateRecord> = [(&a_bucket, &bucket), (&z_object, &object)].into_iter().collect();

    assert_eq!(deletion_order(&orphans), vec![z_object.clone(), a_bucket.clone()]);
  }

  #[test]
  fn diff_ignores_server_side_attributes() {
    let desired: Attributes = [("memory".to_string(), json!("256M"))].into_iter().collect();
    let observed: Attributes = [
      ("memory".to_string(), json!("256M")),
      ("update_time".to_string(), json!("2024-01-01T00:00:00Z")),
    ]
    .into_iter()
    .collect();

    assert!(diff_attributes(&desired, &observed).is_empty());
  }
}
