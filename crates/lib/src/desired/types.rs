//! Serde shapes of the desired-state file.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::trigger::RetryPolicy;

/// The whole desired-state description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DesiredState {
  pub project: String,
  pub region: String,
  /// Ownership toggles referenced by `managed_if`.
  #[serde(default)]
  pub toggles: BTreeMap<String, bool>,
  #[serde(default)]
  pub apis: Vec<ApiSpec>,
  #[serde(default)]
  pub service_accounts: Vec<ServiceAccountSpec>,
  #[serde(default)]
  pub buckets: Vec<BucketSpec>,
  pub artifact: ArtifactSpec,
  pub function: FunctionSpec,
  #[serde(default)]
  pub trigger: Option<TriggerConfig>,
  #[serde(default)]
  pub bindings: Vec<BindingSpec>,
}

/// Ownership fields shared by conditionally managed entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipSpec {
  /// Fixed ownership.
  #[serde(default)]
  pub managed: Option<bool>,
  /// Ownership follows the named toggle.
  #[serde(default)]
  pub managed_if: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiSpec {
  pub service: String,
  #[serde(default)]
  pub id: Option<String>,
  #[serde(default)]
  pub protected: bool,
  #[serde(flatten)]
  pub ownership: OwnershipSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceAccountSpec {
  pub id: String,
  pub account_id: String,
  #[serde(default)]
  pub display_name: Option<String>,
  #[serde(default)]
  pub protected: bool,
  #[serde(default)]
  pub depends_on: Vec<String>,
  #[serde(flatten)]
  pub ownership: OwnershipSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BucketSpec {
  pub id: String,
  pub name: String,
  /// Defaults to the project region.
  #[serde(default)]
  pub location: Option<String>,
  #[serde(default = "default_storage_class")]
  pub storage_class: String,
  #[serde(default = "default_true")]
  pub uniform_access: bool,
  #[serde(default)]
  pub labels: BTreeMap<String, String>,
  #[serde(default)]
  pub protected: bool,
  #[serde(default)]
  pub depends_on: Vec<String>,
  #[serde(flatten)]
  pub ownership: OwnershipSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArtifactSpec {
  #[serde(default = "default_artifact_id")]
  pub id: String,
  /// Bucket id when declared in this file, bucket name otherwise.
  pub bucket: String,
  /// Archive file or source directory, relative to the desired-state file.
  pub source: PathBuf,
  #[serde(default)]
  pub protected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FunctionSpec {
  #[serde(default = "default_function_id")]
  pub id: String,
  pub name: String,
  /// Defaults to the project region.
  #[serde(default)]
  pub region: Option<String>,
  pub runtime: String,
  pub entry_point: String,
  #[serde(default = "default_memory")]
  pub memory: String,
  #[serde(default = "default_timeout")]
  pub timeout_seconds: i64,
  #[serde(default)]
  pub max_instances: Option<i64>,
  #[serde(default)]
  pub environment: BTreeMap<String, String>,
  /// Service account id when declared in this file, account email otherwise.
  pub service_account: String,
  #[serde(default)]
  pub protected: bool,
  #[serde(default)]
  pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TriggerConfig {
  #[serde(default)]
  pub id: Option<String>,
  pub source_bucket: String,
  #[serde(default)]
  pub object_pattern: Option<String>,
  #[serde(default)]
  pub event_type: Option<String>,
  #[serde(default)]
  pub retry_policy: RetryPolicy,
  /// Defaults to the function's region.
  #[serde(default)]
  pub region: Option<String>,
  /// Service account id or email events are delivered as. Defaults to the
  /// function's service account.
  #[serde(default)]
  pub invoker: Option<String>,
  #[serde(default)]
  pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BindingSpec {
  #[serde(default)]
  pub id: Option<String>,
  pub role: String,
  /// Literal principal, e.g. `user:ops@example.com`.
  #[serde(default)]
  pub member: Option<String>,
  /// Id of a declared service account.
  #[serde(default)]
  pub service_account: Option<String>,
  /// Defaults to `projects/{project}`.
  #[serde(default)]
  pub scope: Option<String>,
  #[serde(default)]
  pub protected: bool,
  #[serde(default)]
  pub depends_on: Vec<String>,
  #[serde(flatten)]
  pub ownership: OwnershipSpec,
}

fn default_true() -> bool {
  true
}

fn default_storage_class() -> String {
  "STANDARD".to_string()
}

fn default_artifact_id() -> String {
  "function-source".to_string()
}

fn default_function_id() -> String {
  "function".to_string()
}

fn default_memory() -> String {
  "256M".to_string()
}

fn default_timeout() -> i64 {
  60
}
