//! Manifest types for stratus.
//!
//! The manifest is the complete, lowered desired state of one run: every
//! declared [`Resource`] keyed by its id. It is produced from a
//! [`DesiredState`](crate::desired::DesiredState), validated once, and then
//! only read by the graph builder, planner and scheduler.
//!
//! # Ordering
//!
//! Uses [`BTreeMap`] so iteration (and everything derived from it, including
//! tie-breaks in the topological order) is deterministic.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resource::{AttrValue, Attributes, Resource, ResourceId, ResourceKind};

/// Errors raised while constructing or validating a manifest.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ManifestError {
  /// Two resources share an id.
  #[error("duplicate resource id: {0}")]
  DuplicateId(ResourceId),

  /// A reference or explicit dependency names an undeclared resource.
  #[error("resource {from} references undeclared resource {missing}")]
  UnresolvedReference { from: ResourceId, missing: ResourceId },

  /// A reference points at a resource of the wrong kind.
  #[error("resource {from} attribute {attribute} must reference a {expected}, but {target} is a {found}")]
  IncompatibleReference {
    from: ResourceId,
    attribute: String,
    target: ResourceId,
    expected: ResourceKind,
    found: ResourceKind,
  },

  /// A resource lists itself as a dependency.
  #[error("resource {0} depends on itself")]
  SelfDependency(ResourceId),

  /// Lookup of a resource that is not in the manifest.
  #[error("resource not found: {0}")]
  NotFound(ResourceId),
}

/// The complete desired state of one run.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
  pub project: String,
  pub region: String,
  pub resources: BTreeMap<ResourceId, Resource>,
}

impl Manifest {
  pub fn new(project: impl Into<String>, region: impl Into<String>) -> Self {
    Self {
      project: project.into(),
      region: region.into(),
      resources: BTreeMap::new(),
    }
  }

  /// Add a resource, rejecting duplicate ids.
  pub fn insert(&mut self, resource: Resource) -> Result<(), ManifestError> {
    if self.resources.contains_key(&resource.id) {
      return Err(ManifestError::DuplicateId(resource.id));
    }
    self.resources.insert(resource.id.clone(), resource);
    Ok(())
  }

  pub fn get(&self, id: &ResourceId) -> Option<&Resource> {
    self.resources.get(id)
  }

  pub fn len(&self) -> usize {
    self.resources.len()
  }

  pub fn is_empty(&self) -> bool {
    self.resources.is_empty()
  }

  /// Check that every reference and explicit dependency resolves to a
  /// declared resource of a compatible kind.
  ///
  /// Errors are reported for the first offending resource in id order.
  pub fn validate(&self) -> Result<(), ManifestError> {
    for resource in self.resources.values() {
      for dep in &resource.depends_on {
        if dep == &resource.id {
          return Err(ManifestError::SelfDependency(resource.id.clone()));
        }
        if !self.resources.contains_key(dep) {
          return Err(ManifestError::UnresolvedReference {
            from: resource.id.clone(),
            missing: dep.clone(),
          });
        }
      }

      for (attribute, target) in resource.attribute_refs() {
        if target == &resource.id {
          return Err(ManifestError::SelfDependency(resource.id.clone()));
        }
        let Some(target_resource) = self.resources.get(target) else {
          return Err(ManifestError::UnresolvedReference {
            from: resource.id.clone(),
            missing: target.clone(),
          });
        };
        if let Some(expected) = resource.kind.expected_reference(attribute)
          && expected != target_resource.kind
        {
          return Err(ManifestError::IncompatibleReference {
            from: resource.id.clone(),
            attribute: attribute.to_string(),
            target: target.clone(),
            expected,
            found: target_resource.kind,
          });
        }
      }
    }
    Ok(())
  }

  /// The value a reference to `id` resolves to.
  ///
  /// Artifact objects resolve to their content-addressed storage key so that
  /// a new upload changes the resolved attributes of everything pointing at
  /// it; every other kind resolves to its provider key.
  pub fn reference_value(&self, id: &ResourceId) -> Option<String> {
    let resource = self.resources.get(id)?;
    match resource.kind {
      ResourceKind::ArtifactObject => match resource.attributes.get("object") {
        Some(AttrValue::String(key)) => Some(key.clone()),
        _ => Some(resource.key.clone()),
      },
      _ => Some(resource.key.clone()),
    }
  }

  /// Attributes of `id` with every reference replaced by its resolved value.
  pub fn resolved_attributes(&self, id: &ResourceId) -> Result<Attributes, ManifestError> {
    let resource = self.resources.get(id).ok_or_else(|| ManifestError::NotFound(id.clone()))?;
    let lookup = |target: &ResourceId| self.reference_value(target);

    let mut resolved = Attributes::new();
    for (name, value) in &resource.attributes {
      let value = value
        .resolve(&lookup)
        .map_err(|missing| ManifestError::UnresolvedReference {
          from: id.clone(),
          missing,
        })?;
      resolved.insert(name.clone(), value);
    }
    Ok(resolved)
  }

  /// Resources whose attributes reference `id`, in id order.
  pub fn referencing(&self, id: &ResourceId) -> Vec<&ResourceId> {
    self
      .resources
      .values()
      .filter(|r| r.attribute_refs().iter().any(|(_, target)| *target == id))
      .map(|r| &r.id)
      .collect()
  }
}
