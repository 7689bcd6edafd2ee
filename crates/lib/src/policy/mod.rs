//! Conditional ownership policy.
//!
//! Some resources (typically IAM bindings and the runtime service account)
//! may be owned by another stack. Each resource declares a [`Condition`];
//! evaluating it against the run's toggles tags the resource as
//! [`Ownership::Managed`] or [`Ownership::ExternallyOwned`] once, before
//! planning. Downstream code only ever looks at the tag.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::debug;

use crate::manifest::Manifest;
use crate::resource::{Condition, Ownership, ResourceId};

/// Errors produced while evaluating ownership.
#[derive(Debug, Error, PartialEq)]
pub enum PolicyError {
  /// A resource refers to a toggle the desired state never declares.
  #[error("resource {resource} is conditional on undeclared toggle {toggle:?}")]
  UndeclaredToggle { resource: ResourceId, toggle: String },
}

/// Named boolean toggles from the desired state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Toggles(BTreeMap<String, bool>);

impl Toggles {
  pub fn new(values: BTreeMap<String, bool>) -> Self {
    Self(values)
  }

  pub fn get(&self, name: &str) -> Option<bool> {
    self.0.get(name).copied()
  }

  pub fn set(&mut self, name: impl Into<String>, value: bool) {
    self.0.insert(name.into(), value);
  }
}

/// Resolve a single condition.
pub fn evaluate(condition: &Condition, toggles: &Toggles) -> Option<Ownership> {
  let managed = match condition {
    Condition::Always => true,
    Condition::Never => false,
    Condition::Toggle(name) => toggles.get(name)?,
  };
  Some(if managed {
    Ownership::Managed
  } else {
    Ownership::ExternallyOwned
  })
}

/// Annotate every resource in the manifest with its ownership.
pub fn apply_policy(manifest: &mut Manifest, toggles: &Toggles) -> Result<(), PolicyError> {
  for resource in manifest.resources.values_mut() {
    let ownership = evaluate(&resource.condition, toggles).ok_or_else(|| {
      let toggle = match &resource.condition {
        Condition::Toggle(name) => name.clone(),
        _ => String::new(),
      };
      PolicyError::UndeclaredToggle {
        resource: resource.id.clone(),
        toggle,
      }
    })?;

    if ownership == Ownership::ExternallyOwned {
      debug!(resource = %resource.id, "resource is externally owned");
    }
    resource.ownership = ownership;
  }
  Ok(())
}
