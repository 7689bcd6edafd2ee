//! Desired-state file loading and lowering.
//!
//! The desired state is a TOML document describing one function deployment
//! and everything around it. [`DesiredState::lower`] turns it into a validated
//! [`Manifest`] of kind-agnostic resources plus the [`Toggles`] the policy
//! evaluator needs.

mod types;

pub use types::*;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::artifact::{ArtifactError, ArtifactReference, ArtifactSource};
use crate::consts::DEFAULT_EVENT_TYPE;
use crate::manifest::{Manifest, ManifestError};
use crate::policy::Toggles;
use crate::resource::kinds::{
  ApiToggle, ArtifactObject, Binding, Bucket, FunctionDeployment, Member, Meta, ProjectScope, ServiceAccount, Target,
};
use crate::resource::{Condition, ResourceId};
use crate::trigger::{EventTrigger, TriggerError, compile_filters};

/// Errors produced while reading or lowering a desired-state file.
#[derive(Debug, Error)]
pub enum DesiredError {
  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },

  #[error("{entry} must set either `managed` or `managed_if`")]
  OwnershipUnspecified { entry: String },

  #[error("{entry} sets both `managed` and `managed_if`")]
  ConflictingOwnership { entry: String },

  #[error("binding {entry}: {reason}")]
  InvalidBinding { entry: String, reason: String },

  #[error(transparent)]
  Artifact(#[from] ArtifactError),

  #[error(transparent)]
  Trigger(#[from] TriggerError),

  #[error(transparent)]
  Manifest(#[from] ManifestError),
}

/// Result of lowering a desired state.
#[derive(Debug, Clone)]
pub struct Lowered {
  pub manifest: Manifest,
  pub toggles: Toggles,
  pub artifact: ArtifactReference,
}

impl DesiredState {
  /// Read and parse a desired-state file.
  pub fn load(path: &Path) -> Result<Self, DesiredError> {
    let content = std::fs::read_to_string(path).map_err(|source| DesiredError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let state = Self::parse(&content).map_err(|source| DesiredError::Parse {
      path: path.to_path_buf(),
      source,
    })?;
    debug!(path = %path.display(), project = %state.project, "loaded desired state");
    Ok(state)
  }

  pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
    toml::from_str(content)
  }

  /// Lower into a validated manifest.
  ///
  /// Relative artifact sources are resolved against `base_dir`, normally the
  /// directory holding the desired-state file.
  pub fn lower(&self, base_dir: &Path) -> Result<Lowered, DesiredError> {
    let mut manifest = Manifest::new(&self.project, &self.region);

    for api in &self.apis {
      let entry = format!("api {}", api.service);
      let id = api.id.clone().unwrap_or_else(|| default_api_id(&api.service));
      let toggle = ApiToggle {
        meta: meta(&id, api.protected, condition(&entry, &api.ownership, false)?, &[]),
        service: api.service.clone(),
      };
      manifest.insert(toggle.to_resource())?;
    }

    for sa in &self.service_accounts {
      let entry = format!("service account {}", sa.id);
      let account = ServiceAccount {
        meta: meta(&sa.id, sa.protected, condition(&entry, &sa.ownership, true)?, &sa.depends_on),
        account_id: sa.account_id.clone(),
        email: ServiceAccount::email_for(&sa.account_id, &self.project),
        display_name: sa.display_name.clone(),
      };
      manifest.insert(account.to_resource())?;
    }

    for bucket in &self.buckets {
      let entry = format!("bucket {}", bucket.id);
      let lowered = Bucket {
        meta: meta(
          &bucket.id,
          bucket.protected,
          condition(&entry, &bucket.ownership, false)?,
          &bucket.depends_on,
        ),
        name: bucket.name.clone(),
        location: bucket.location.clone().unwrap_or_else(|| self.region.clone()),
        storage_class: bucket.storage_class.clone(),
        uniform_access: bucket.uniform_access,
        labels: bucket.labels.clone(),
      };
      manifest.insert(lowered.to_resource())?;
    }

    let mut binding_ids = BTreeSet::new();
    for binding in &self.bindings {
      let lowered = self.lower_binding(binding)?;
      binding_ids.insert(lowered.meta.id.clone());
      manifest.insert(lowered.to_resource())?;
    }

    let source_path = base_dir.join(&self.artifact.source);
    let artifact = ArtifactReference::from_source(ArtifactSource::from_path(&source_path))?;
    info!(key = %artifact.storage_key, "artifact fingerprinted");

    let object = ArtifactObject {
      meta: meta(&self.artifact.id, self.artifact.protected, Condition::Always, &[]),
      bucket: self.bucket_target(&self.artifact.bucket),
      artifact: artifact.clone(),
    };
    manifest.insert(object.to_resource())?;

    let function = self.lower_function(&artifact, &binding_ids)?;
    manifest.insert(function.to_resource())?;

    if let Some(config) = &self.trigger {
      let invoker = config.invoker.as_deref().unwrap_or(&self.function.service_account);
      if let Some(trigger) =
        function.trigger_resource(self.bucket_target_by_name(&config.source_bucket), self.account_target(invoker))
      {
        manifest.insert(trigger)?;
      }
    }

    manifest.validate()?;
    debug!(resources = manifest.len(), "lowered desired state");

    Ok(Lowered {
      manifest,
      toggles: Toggles::new(self.toggles.clone()),
      artifact,
    })
  }

  /// Compile the trigger section, if present.
  pub fn compile_trigger(&self) -> Result<Option<EventTrigger>, DesiredError> {
    let Some(config) = &self.trigger else {
      return Ok(None);
    };
    let invoker = config.invoker.as_deref().unwrap_or(&self.function.service_account);
    Ok(Some(EventTrigger {
      region: config
        .region
        .clone()
        .or_else(|| self.function.region.clone())
        .unwrap_or_else(|| self.region.clone()),
      event_type: config.event_type.clone().unwrap_or_else(|| DEFAULT_EVENT_TYPE.to_string()),
      retry_policy: config.retry_policy,
      invoker_principal: self.account_email(invoker),
      filters: compile_filters(&config.source_bucket, config.object_pattern.as_deref())?,
    }))
  }

  fn lower_function(
    &self,
    artifact: &ArtifactReference,
    binding_ids: &BTreeSet<ResourceId>,
  ) -> Result<FunctionDeployment, DesiredError> {
    let spec = &self.function;
    let trigger = match (&self.trigger, self.compile_trigger()?) {
      (Some(config), Some(compiled)) => {
        let id = config.id.clone().unwrap_or_else(|| format!("{}-trigger", spec.id));
        let mut trigger_meta = meta(&id, false, Condition::Always, &config.depends_on);
        // Role grants must land before the subscription is created.
        trigger_meta.depends_on.extend(binding_ids.iter().cloned());
        Some((trigger_meta, compiled))
      }
      _ => None,
    };

    Ok(FunctionDeployment {
      meta: meta(&spec.id, spec.protected, Condition::Always, &spec.depends_on),
      name: spec.name.clone(),
      region: spec.region.clone().unwrap_or_else(|| self.region.clone()),
      runtime: spec.runtime.clone(),
      entry_point: spec.entry_point.clone(),
      memory: spec.memory.clone(),
      timeout_seconds: spec.timeout_seconds,
      max_instances: spec.max_instances,
      environment: spec.environment.clone(),
      service_account: self.account_target(&spec.service_account),
      source: ResourceId::new(&self.artifact.id),
      artifact: artifact.clone(),
      trigger,
    })
  }

  fn lower_binding(&self, spec: &BindingSpec) -> Result<Binding, DesiredError> {
    let label = spec
      .service_account
      .clone()
      .or_else(|| spec.member.clone())
      .unwrap_or_default();
    let id = spec.id.clone().unwrap_or_else(|| default_binding_id(&spec.role, &label));
    let entry = format!("binding {}", id);
    let invalid = |reason: &str| DesiredError::InvalidBinding {
      entry: id.clone(),
      reason: reason.to_string(),
    };

    let member = match (&spec.member, &spec.service_account) {
      (Some(_), Some(_)) => return Err(invalid("set only one of `member` and `service_account`")),
      (None, None) => return Err(invalid("one of `member` or `service_account` is required")),
      (Some(principal), None) => {
        if !principal.contains(':') {
          return Err(invalid("member must be a typed principal such as `user:name@example.com`"));
        }
        Member::Principal(principal.clone())
      }
      (None, Some(account)) => {
        let Some(sa) = self.service_accounts.iter().find(|sa| &sa.id == account) else {
          return Err(
            ManifestError::UnresolvedReference {
              from: ResourceId::new(&id),
              missing: ResourceId::new(account),
            }
            .into(),
          );
        };
        Member::ServiceAccount {
          id: ResourceId::new(&sa.id),
          email: ServiceAccount::email_for(&sa.account_id, &self.project),
        }
      }
    };

    Ok(Binding {
      meta: meta(&id, spec.protected, condition(&entry, &spec.ownership, true)?, &spec.depends_on),
      role: spec.role.clone(),
      member,
      scope: spec
        .scope
        .clone()
        .map(ProjectScope)
        .unwrap_or_else(|| ProjectScope::project(&self.project)),
    })
  }

  /// A bucket given as a declared id or a literal name.
  fn bucket_target(&self, value: &str) -> Target {
    match self.buckets.iter().find(|b| b.id == value) {
      Some(b) => Target::Declared(ResourceId::new(&b.id)),
      None => self.bucket_target_by_name(value),
    }
  }

  fn bucket_target_by_name(&self, name: &str) -> Target {
    match self.buckets.iter().find(|b| b.name == name) {
      Some(b) => Target::Declared(ResourceId::new(&b.id)),
      None => Target::External(name.to_string()),
    }
  }

  /// A service account given as a declared id or a literal email.
  fn account_target(&self, value: &str) -> Target {
    match self.service_accounts.iter().find(|sa| sa.id == value) {
      Some(sa) => Target::Declared(ResourceId::new(&sa.id)),
      None => Target::External(value.to_string()),
    }
  }

  fn account_email(&self, value: &str) -> String {
    match self.service_accounts.iter().find(|sa| sa.id == value) {
      Some(sa) => ServiceAccount::email_for(&sa.account_id, &self.project),
      None => value.to_string(),
    }
  }
}

fn meta(id: &str, protected: bool, condition: Condition, depends_on: &[String]) -> Meta {
  Meta {
    id: ResourceId::new(id),
    protected,
    condition,
    depends_on: depends_on.iter().map(ResourceId::new).collect(),
  }
}

/// Translate the ownership fields of an entry into a condition.
///
/// `required` entries (service accounts and bindings) must say explicitly
/// who owns them.
fn condition(entry: &str, spec: &OwnershipSpec, required: bool) -> Result<Condition, DesiredError> {
  match (spec.managed, &spec.managed_if) {
    (Some(_), Some(_)) => Err(DesiredError::ConflictingOwnership {
      entry: entry.to_string(),
    }),
    (Some(true), None) => Ok(Condition::Always),
    (Some(false), None) => Ok(Condition::Never),
    (None, Some(toggle)) => Ok(Condition::Toggle(toggle.clone())),
    (None, None) if required => Err(DesiredError::OwnershipUnspecified {
      entry: entry.to_string(),
    }),
    (None, None) => Ok(Condition::Always),
  }
}

fn default_api_id(service: &str) -> String {
  format!("api-{}", service.split('.').next().unwrap_or(service))
}

fn default_binding_id(role: &str, member: &str) -> String {
  let role = role.rsplit('/').next().unwrap_or(role);
  let slug = |s: &str| {
    s.chars()
      .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
      .collect::<String>()
  };
  format!("{}-{}", slug(role), slug(member))
}
