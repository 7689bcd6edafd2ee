//! Core resource types.
//!
//! A [`Resource`] is the kind-agnostic unit the graph builder, planner and
//! scheduler operate on. Typed descriptions from the desired-state file are
//! lowered into resources; their attributes may hold [`AttrValue::Ref`]
//! references to other resources, which become implicit dependency edges and
//! are resolved to concrete values before diffing.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Resolved attribute map, as exchanged with providers and persisted in state.
pub type Attributes = BTreeMap<String, serde_json::Value>;

/// Identifier of a resource, unique within a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(pub String);

impl ResourceId {
  pub fn new(id: impl Into<String>) -> Self {
    Self(id.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl std::fmt::Display for ResourceId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl From<&str> for ResourceId {
  fn from(value: &str) -> Self {
    Self(value.to_string())
  }
}

/// The kinds of entity the reconciler manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
  ApiToggle,
  ServiceAccount,
  Binding,
  Bucket,
  ArtifactObject,
  FunctionDeployment,
  EventTrigger,
}

impl ResourceKind {
  /// All kinds, in the order providers are listed during observation.
  pub const ALL: [ResourceKind; 7] = [
    ResourceKind::ApiToggle,
    ResourceKind::ServiceAccount,
    ResourceKind::Binding,
    ResourceKind::Bucket,
    ResourceKind::ArtifactObject,
    ResourceKind::FunctionDeployment,
    ResourceKind::EventTrigger,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      ResourceKind::ApiToggle => "api_toggle",
      ResourceKind::ServiceAccount => "service_account",
      ResourceKind::Binding => "binding",
      ResourceKind::Bucket => "bucket",
      ResourceKind::ArtifactObject => "artifact_object",
      ResourceKind::FunctionDeployment => "function_deployment",
      ResourceKind::EventTrigger => "event_trigger",
    }
  }

  /// Service APIs that must be enabled before a resource of this kind can be
  /// provisioned.
  pub fn required_services(&self) -> &'static [&'static str] {
    match self {
      ResourceKind::ApiToggle => &[],
      ResourceKind::ServiceAccount | ResourceKind::Binding => &["iam.googleapis.com"],
      ResourceKind::Bucket | ResourceKind::ArtifactObject => &["storage.googleapis.com"],
      ResourceKind::FunctionDeployment => &[
        "cloudfunctions.googleapis.com",
        "cloudbuild.googleapis.com",
        "run.googleapis.com",
        "artifactregistry.googleapis.com",
      ],
      ResourceKind::EventTrigger => &["eventarc.googleapis.com", "pubsub.googleapis.com"],
    }
  }

  /// The kind a reference stored under `attribute` must point at, if the
  /// attribute is constrained.
  pub fn expected_reference(&self, attribute: &str) -> Option<ResourceKind> {
    match (self, attribute) {
      (ResourceKind::ArtifactObject, "bucket") => Some(ResourceKind::Bucket),
      (ResourceKind::FunctionDeployment, "source") => Some(ResourceKind::ArtifactObject),
      (ResourceKind::FunctionDeployment, "service_account") => Some(ResourceKind::ServiceAccount),
      (ResourceKind::Binding, "member") => Some(ResourceKind::ServiceAccount),
      (ResourceKind::EventTrigger, "function") => Some(ResourceKind::FunctionDeployment),
      (ResourceKind::EventTrigger, "service_account") => Some(ResourceKind::ServiceAccount),
      (ResourceKind::EventTrigger, "bucket") => Some(ResourceKind::Bucket),
      _ => None,
    }
  }
}

impl std::fmt::Display for ResourceKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A desired attribute value.
///
/// Mirrors JSON values, plus `Ref` for a reference to another declared
/// resource. Lists and maps may nest references at any depth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttrValue {
  String(String),
  Integer(i64),
  Boolean(bool),
  List(Vec<AttrValue>),
  Map(BTreeMap<String, AttrValue>),
  Ref(ResourceId),
}

impl AttrValue {
  /// Collect every resource referenced by this value.
  pub fn collect_refs<'a>(&'a self, refs: &mut Vec<&'a ResourceId>) {
    match self {
      AttrValue::Ref(id) => refs.push(id),
      AttrValue::List(items) => items.iter().for_each(|v| v.collect_refs(refs)),
      AttrValue::Map(map) => map.values().for_each(|v| v.collect_refs(refs)),
      AttrValue::String(_) | AttrValue::Integer(_) | AttrValue::Boolean(_) => {}
    }
  }

  /// Resolve into a plain JSON value, replacing references with the value
  /// `lookup` returns for them.
  ///
  /// Returns the first reference `lookup` cannot resolve as the error.
  pub fn resolve<F>(&self, lookup: &F) -> Result<serde_json::Value, ResourceId>
  where
    F: Fn(&ResourceId) -> Option<String>,
  {
    Ok(match self {
      AttrValue::String(s) => serde_json::Value::String(s.clone()),
      AttrValue::Integer(n) => serde_json::Value::from(*n),
      AttrValue::Boolean(b) => serde_json::Value::Bool(*b),
      AttrValue::List(items) => serde_json::Value::Array(
        items
          .iter()
          .map(|v| v.resolve(lookup))
          .collect::<Result<Vec<_>, _>>()?,
      ),
      AttrValue::Map(map) => {
        let mut object = serde_json::Map::new();
        for (key, value) in map {
          object.insert(key.clone(), value.resolve(lookup)?);
        }
        serde_json::Value::Object(object)
      }
      AttrValue::Ref(id) => serde_json::Value::String(lookup(id).ok_or_else(|| id.clone())?),
    })
  }
}

impl From<&str> for AttrValue {
  fn from(value: &str) -> Self {
    AttrValue::String(value.to_string())
  }
}

impl From<String> for AttrValue {
  fn from(value: String) -> Self {
    AttrValue::String(value)
  }
}

impl From<i64> for AttrValue {
  fn from(value: i64) -> Self {
    AttrValue::Integer(value)
  }
}

impl From<bool> for AttrValue {
  fn from(value: bool) -> Self {
    AttrValue::Boolean(value)
  }
}

/// Who decides whether a resource is created, updated and deleted.
///
/// Unevaluated resources carry a [`Condition`]; the policy evaluator turns it
/// into an `Ownership` once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ownership {
  /// This run creates, updates and deletes the resource.
  #[default]
  Managed,
  /// Another stack owns the resource; this run only waits on it.
  ExternallyOwned,
}

impl std::fmt::Display for Ownership {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Ownership::Managed => f.write_str("managed"),
      Ownership::ExternallyOwned => f.write_str("externally-owned"),
    }
  }
}

/// The declared ownership condition of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
  #[default]
  Always,
  Never,
  /// Managed only when the named toggle is on.
  Toggle(String),
}

/// A single declared resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
  pub id: ResourceId,
  pub kind: ResourceKind,
  /// Provider-level natural key (service name, account email, bucket name...).
  pub key: String,
  pub attributes: BTreeMap<String, AttrValue>,
  /// Explicit dependencies; implicit ones come from attribute references.
  pub depends_on: BTreeSet<ResourceId>,
  /// Refuse any plan that would delete this resource.
  pub protected: bool,
  pub condition: Condition,
  /// Result of policy evaluation. `Managed` until evaluated.
  pub ownership: Ownership,
}

impl Resource {
  pub fn new(id: impl Into<String>, kind: ResourceKind, key: impl Into<String>) -> Self {
    Self {
      id: ResourceId::new(id),
      kind,
      key: key.into(),
      attributes: BTreeMap::new(),
      depends_on: BTreeSet::new(),
      protected: false,
      condition: Condition::Always,
      ownership: Ownership::Managed,
    }
  }

  pub fn with_attr(mut self, name: &str, value: impl Into<AttrValue>) -> Self {
    self.attributes.insert(name.to_string(), value.into());
    self
  }

  pub fn with_ref(mut self, name: &str, target: &str) -> Self {
    self.attributes.insert(name.to_string(), AttrValue::Ref(ResourceId::new(target)));
    self
  }

  pub fn depends_on(mut self, target: &str) -> Self {
    self.depends_on.insert(ResourceId::new(target));
    self
  }

  pub fn protected(mut self, protected: bool) -> Self {
    self.protected = protected;
    self
  }

  pub fn with_condition(mut self, condition: Condition) -> Self {
    self.condition = condition;
    self
  }

  /// References held in attributes, paired with the top-level attribute name.
  pub fn attribute_refs(&self) -> Vec<(&str, &ResourceId)> {
    let mut out = Vec::new();
    for (name, value) in &self.attributes {
      let mut refs = Vec::new();
      value.collect_refs(&mut refs);
      out.extend(refs.into_iter().map(|id| (name.as_str(), id)));
    }
    out
  }

  /// Whether this run may mutate the resource.
  pub fn is_managed(&self) -> bool {
    self.ownership == Ownership::Managed
  }
}
