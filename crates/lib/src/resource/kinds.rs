//! Typed descriptions of each manageable entity.
//!
//! These are the strongly typed forms the desired-state lowering builds
//! before flattening them into kind-agnostic [`Resource`]s. Cross-resource
//! links are expressed as [`Target`]s so that links to declared resources
//! become graph edges while links to things managed elsewhere stay literal.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::artifact::ArtifactReference;
use crate::trigger::EventTrigger;

use super::types::{AttrValue, Condition, Resource, ResourceId, ResourceKind};

/// A link from one entity to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
  /// A resource declared in this run.
  Declared(ResourceId),
  /// A literal value naming something outside this run.
  External(String),
}

impl Target {
  pub fn to_attr(&self) -> AttrValue {
    match self {
      Target::Declared(id) => AttrValue::Ref(id.clone()),
      Target::External(value) => AttrValue::String(value.clone()),
    }
  }
}

/// Fields shared by every entity.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Meta {
  pub id: ResourceId,
  pub protected: bool,
  pub condition: Condition,
  pub depends_on: BTreeSet<ResourceId>,
}

impl Meta {
  pub fn new(id: impl Into<String>) -> Self {
    Self {
      id: ResourceId::new(id),
      ..Default::default()
    }
  }

  fn resource(&self, kind: ResourceKind, key: impl Into<String>) -> Resource {
    let mut resource = Resource::new(self.id.0.clone(), kind, key)
      .protected(self.protected)
      .with_condition(self.condition.clone());
    resource.depends_on = self.depends_on.clone();
    resource
  }
}

/// A service API that must be enabled in the project.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiToggle {
  pub meta: Meta,
  pub service: String,
}

impl ApiToggle {
  pub fn to_resource(&self) -> Resource {
    self
      .meta
      .resource(ResourceKind::ApiToggle, &self.service)
      .with_attr("service", self.service.as_str())
  }
}

/// An identity functions and triggers run as.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceAccount {
  pub meta: Meta,
  pub account_id: String,
  pub email: String,
  pub display_name: Option<String>,
}

impl ServiceAccount {
  pub fn email_for(account_id: &str, project: &str) -> String {
    format!("{}@{}.iam.gserviceaccount.com", account_id, project)
  }

  pub fn to_resource(&self) -> Resource {
    let mut resource = self
      .meta
      .resource(ResourceKind::ServiceAccount, &self.email)
      .with_attr("account_id", self.account_id.as_str());
    if let Some(name) = &self.display_name {
      resource = resource.with_attr("display_name", name.as_str());
    }
    resource
  }
}

/// An object storage container.
#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
  pub meta: Meta,
  pub name: String,
  pub location: String,
  pub storage_class: String,
  pub uniform_access: bool,
  pub labels: BTreeMap<String, String>,
}

impl Bucket {
  pub fn to_resource(&self) -> Resource {
    let mut resource = self
      .meta
      .resource(ResourceKind::Bucket, &self.name)
      .with_attr("location", self.location.as_str())
      .with_attr("storage_class", self.storage_class.as_str())
      .with_attr("uniform_access", self.uniform_access);
    if !self.labels.is_empty() {
      resource = resource.with_attr("labels", string_map(&self.labels));
    }
    resource
  }
}

/// Scope an IAM binding applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectScope(pub String);

impl ProjectScope {
  pub fn project(project: &str) -> Self {
    Self(format!("projects/{}", project))
  }
}

/// Member of a binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Member {
  /// A service account declared in this run, by id and resolved email.
  ServiceAccount { id: ResourceId, email: String },
  /// A literal principal such as `user:ops@example.com`.
  Principal(String),
}

impl Member {
  /// The principal string as IAM expects it.
  pub fn principal(&self) -> String {
    match self {
      Member::ServiceAccount { email, .. } => format!("serviceAccount:{}", email),
      Member::Principal(p) => p.clone(),
    }
  }
}

/// An IAM role grant.
///
/// Whether this run owns the binding is decided by `meta.condition`; see
/// [`crate::policy`].
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
  pub meta: Meta,
  pub role: String,
  pub member: Member,
  pub scope: ProjectScope,
}

impl Binding {
  pub fn key(&self) -> String {
    format!("{}|{}|{}", self.scope.0, self.role, self.member.principal())
  }

  pub fn to_resource(&self) -> Resource {
    let resource = self
      .meta
      .resource(ResourceKind::Binding, self.key())
      .with_attr("role", self.role.as_str())
      .with_attr("scope", self.scope.0.as_str());
    match &self.member {
      Member::ServiceAccount { id, .. } => resource
        .with_ref("member", id.as_str())
        .with_attr("member_type", "serviceAccount"),
      Member::Principal(p) => resource.with_attr("member", p.as_str()),
    }
  }
}

/// The uploaded function source.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactObject {
  pub meta: Meta,
  pub bucket: Target,
  pub artifact: ArtifactReference,
}

impl ArtifactObject {
  /// The artifact slot is keyed by id so a new upload is an update of the
  /// same resource, not a new one.
  pub fn to_resource(&self) -> Resource {
    self
      .meta
      .resource(ResourceKind::ArtifactObject, self.meta.id.as_str())
      .with_attr("bucket", self.bucket.to_attr())
      .with_attr("object", self.artifact.storage_key.as_str())
      .with_attr("content_hash", self.artifact.content_hash.as_str())
  }
}

/// A deployed function.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDeployment {
  pub meta: Meta,
  pub name: String,
  pub region: String,
  pub runtime: String,
  pub entry_point: String,
  pub memory: String,
  pub timeout_seconds: i64,
  pub max_instances: Option<i64>,
  pub environment: BTreeMap<String, String>,
  pub service_account: Target,
  /// Id of the [`ArtifactObject`] holding the source.
  pub source: ResourceId,
  pub artifact: ArtifactReference,
  pub trigger: Option<(Meta, EventTrigger)>,
}

impl FunctionDeployment {
  pub fn to_resource(&self) -> Resource {
    let mut resource = self
      .meta
      .resource(ResourceKind::FunctionDeployment, &self.name)
      .with_attr("region", self.region.as_str())
      .with_attr("runtime", self.runtime.as_str())
      .with_attr("entry_point", self.entry_point.as_str())
      .with_attr("memory", self.memory.as_str())
      .with_attr("timeout_seconds", self.timeout_seconds)
      .with_attr("service_account", self.service_account.to_attr())
      .with_ref("source", self.source.as_str());
    if let Some(max) = self.max_instances {
      resource = resource.with_attr("max_instances", max);
    }
    if !self.environment.is_empty() {
      resource = resource.with_attr("environment", string_map(&self.environment));
    }
    resource
  }

  /// The trigger as its own resource, wired to this function.
  ///
  /// `bucket` links the source bucket when it is declared in this run and
  /// `invoker` the identity the subscription delivers events as.
  pub fn trigger_resource(&self, bucket: Target, invoker: Target) -> Option<Resource> {
    let (meta, trigger) = self.trigger.as_ref()?;
    let filters = AttrValue::List(trigger.filters.iter().map(|f| f.to_attr()).collect());
    Some(
      meta
        .resource(ResourceKind::EventTrigger, format!("{}-trigger", self.name))
        .with_ref("function", self.meta.id.as_str())
        .with_attr("bucket", bucket.to_attr())
        .with_attr("region", trigger.region.as_str())
        .with_attr("event_type", trigger.event_type.as_str())
        .with_attr("retry_policy", trigger.retry_policy.to_string())
        .with_attr("service_account", invoker.to_attr())
        .with_attr("filters", filters),
    )
  }
}

fn string_map(map: &BTreeMap<String, String>) -> AttrValue {
  AttrValue::Map(
    map
      .iter()
      .map(|(k, v)| (k.clone(), AttrValue::String(v.clone())))
      .collect(),
  )
}
