//! Provider boundary.
//!
//! A [`Provider`] is the only thing that talks to the platform being
//! provisioned. Observation goes through [`Provider::get`] and
//! [`Provider::list`]; mutations through create, update and delete. Every call
//! receives an explicit [`ProviderContext`] instead of reading ambient
//! credentials or defaults.

pub mod local;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::artifact::ArtifactReference;
use crate::resource::{Attributes, ResourceId, ResourceKind};

pub use local::LocalProvider;

/// Errors a provider reports.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
  /// The call may succeed if retried (rate limits, eventual consistency).
  #[error("transient provider error: {message}")]
  Transient { message: String },

  /// Retrying will not help (permission denied, invalid argument).
  #[error("provider error: {message}")]
  Permanent { message: String },
}

impl ProviderError {
  pub fn transient(message: impl Into<String>) -> Self {
    ProviderError::Transient {
      message: message.into(),
    }
  }

  pub fn permanent(message: impl Into<String>) -> Self {
    ProviderError::Permanent {
      message: message.into(),
    }
  }

  pub fn is_transient(&self) -> bool {
    matches!(self, ProviderError::Transient { .. })
  }
}

/// Project, region and acting principal for a provider call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderContext {
  pub project: String,
  pub region: String,
  /// Identity the call is made as.
  pub principal: String,
}

impl ProviderContext {
  pub fn new(project: impl Into<String>, region: impl Into<String>, principal: impl Into<String>) -> Self {
    Self {
      project: project.into(),
      region: region.into(),
      principal: principal.into(),
    }
  }
}

/// A resource as the provider currently reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedResource {
  pub kind: ResourceKind,
  pub key: String,
  /// May contain server-side attributes the desired state never sets.
  pub attributes: Attributes,
  /// Values produced by the provider, e.g. a function endpoint.
  #[serde(default)]
  pub outputs: Attributes,
}

/// A create or update request.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceRequest {
  pub id: ResourceId,
  pub kind: ResourceKind,
  pub key: String,
  /// Fully resolved desired attributes.
  pub attributes: Attributes,
  /// Content to upload, for artifact objects.
  pub artifact: Option<ArtifactReference>,
}

/// The platform being provisioned.
#[async_trait]
pub trait Provider: Send + Sync {
  /// Observe a single resource. `Ok(None)` means it does not exist.
  async fn get(
    &self,
    ctx: &ProviderContext,
    kind: ResourceKind,
    key: &str,
  ) -> Result<Option<ObservedResource>, ProviderError>;

  /// Observe every resource of a kind.
  async fn list(&self, ctx: &ProviderContext, kind: ResourceKind) -> Result<Vec<ObservedResource>, ProviderError>;

  async fn create(&self, ctx: &ProviderContext, request: &ResourceRequest) -> Result<ObservedResource, ProviderError>;

  async fn update(&self, ctx: &ProviderContext, request: &ResourceRequest) -> Result<ObservedResource, ProviderError>;

  async fn delete(&self, ctx: &ProviderContext, kind: ResourceKind, key: &str) -> Result<(), ProviderError>;
}
