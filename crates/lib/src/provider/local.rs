//! A provider backed by a local resource table.
//!
//! Keeps every resource in memory, optionally persisting the table to a JSON
//! file so successive runs observe what earlier runs created. Behaves like a
//! remote platform in the ways the reconciler cares about: creates fail on
//! existing keys, updates fail on missing ones, objects report server-side
//! attributes and outputs, and prerequisite APIs can be enforced.
//!
//! Every call is recorded, and failures or latency can be injected per
//! resource for testing.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, trace};

use crate::resource::{Attributes, ResourceKind};

use super::{ObservedResource, Provider, ProviderContext, ProviderError, ResourceRequest};

type TableKey = (ResourceKind, String);

/// Operation recorded in the call log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
  Get,
  List,
  Create,
  Update,
  Delete,
}

impl CallKind {
  pub fn is_mutation(&self) -> bool {
    matches!(self, CallKind::Create | CallKind::Update | CallKind::Delete)
  }
}

/// A recorded provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCall {
  pub op: CallKind,
  pub kind: ResourceKind,
  /// Empty for `List`.
  pub key: String,
}

#[derive(Debug, Clone, Copy)]
enum Fault {
  Transient { remaining: u32 },
  Permanent,
}

/// Local provider.
#[derive(Debug, Default)]
pub struct LocalProvider {
  table: Mutex<BTreeMap<TableKey, ObservedResource>>,
  calls: Mutex<Vec<ProviderCall>>,
  faults: Mutex<BTreeMap<TableKey, Fault>>,
  latency: Mutex<BTreeMap<TableKey, Duration>>,
  path: Option<PathBuf>,
  /// Held from snapshot to rename so writes land in mutation order.
  persist_lock: Mutex<()>,
  enforce_apis: bool,
  generation: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LocalProvider {
  /// An empty, in-memory provider.
  pub fn new() -> Self {
    Self::default()
  }

  /// A provider persisted at `path`, loading any existing table.
  pub fn open(path: &Path) -> Result<Self, ProviderError> {
    let records: Vec<ObservedResource> = match fs::read_to_string(path) {
      Ok(content) => serde_json::from_str(&content)
        .map_err(|e| ProviderError::permanent(format!("corrupt provider table {}: {}", path.display(), e)))?,
      Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
      Err(e) => {
        return Err(ProviderError::permanent(format!(
          "failed to read provider table {}: {}",
          path.display(),
          e
        )));
      }
    };
    debug!(path = %path.display(), resources = records.len(), "opened local provider");

    let provider = Self {
      path: Some(path.to_path_buf()),
      ..Self::default()
    };
    {
      let mut table = lock(&provider.table);
      for record in records {
        table.insert((record.kind, record.key.clone()), record);
      }
    }
    Ok(provider)
  }

  /// Refuse to provision a kind until its prerequisite service APIs exist.
  pub fn with_api_enforcement(mut self) -> Self {
    self.enforce_apis = true;
    self
  }

  /// Insert a resource directly, as if something else had created it.
  pub fn seed(&self, resource: ObservedResource) {
    lock(&self.table).insert((resource.kind, resource.key.clone()), resource);
  }

  /// Remove a resource out of band.
  pub fn remove(&self, kind: ResourceKind, key: &str) -> Option<ObservedResource> {
    lock(&self.table).remove(&(kind, key.to_string()))
  }

  /// Current record for a resource.
  pub fn record(&self, kind: ResourceKind, key: &str) -> Option<ObservedResource> {
    lock(&self.table).get(&(kind, key.to_string())).cloned()
  }

  /// Every stored resource, ordered by kind and key.
  pub fn resources(&self) -> Vec<ObservedResource> {
    lock(&self.table).values().cloned().collect()
  }

  pub fn calls(&self) -> Vec<ProviderCall> {
    lock(&self.calls).clone()
  }

  /// Recorded create, update and delete calls.
  pub fn mutations(&self) -> Vec<ProviderCall> {
    lock(&self.calls).iter().filter(|c| c.op.is_mutation()).cloned().collect()
  }

  pub fn clear_calls(&self) {
    lock(&self.calls).clear();
  }

  /// Fail the next `times` mutations of a resource with a transient error.
  pub fn fail_transient(&self, kind: ResourceKind, key: &str, times: u32) {
    lock(&self.faults).insert((kind, key.to_string()), Fault::Transient { remaining: times });
  }

  /// Fail every mutation of a resource with a permanent error.
  pub fn fail_permanent(&self, kind: ResourceKind, key: &str) {
    lock(&self.faults).insert((kind, key.to_string()), Fault::Permanent);
  }

  pub fn clear_faults(&self) {
    lock(&self.faults).clear();
  }

  /// Delay every mutation of a resource.
  pub fn set_latency(&self, kind: ResourceKind, key: &str, latency: Duration) {
    lock(&self.latency).insert((kind, key.to_string()), latency);
  }

  fn log(&self, op: CallKind, kind: ResourceKind, key: &str) {
    trace!(?op, %kind, key, "provider call");
    lock(&self.calls).push(ProviderCall {
      op,
      kind,
      key: key.to_string(),
    });
  }

  /// Apply injected latency and faults for a mutation.
  async fn before_mutation(&self, kind: ResourceKind, key: &str) -> Result<(), ProviderError> {
    let table_key = (kind, key.to_string());
    let delay = lock(&self.latency).get(&table_key).copied();
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }

    let mut faults = lock(&self.faults);
    match faults.get_mut(&table_key) {
      Some(Fault::Permanent) => Err(ProviderError::permanent(format!("injected failure for {} {}", kind, key))),
      Some(Fault::Transient { remaining }) if *remaining > 0 => {
        *remaining -= 1;
        Err(ProviderError::transient(format!("injected transient failure for {} {}", kind, key)))
      }
      _ => Ok(()),
    }
  }

  fn check_apis(&self, ctx: &ProviderContext, kind: ResourceKind) -> Result<(), ProviderError> {
    if !self.enforce_apis {
      return Ok(());
    }
    let table = lock(&self.table);
    for service in kind.required_services() {
      if !table.contains_key(&(ResourceKind::ApiToggle, service.to_string())) {
        return Err(ProviderError::permanent(format!(
          "{} has not been enabled in project {}",
          service, ctx.project
        )));
      }
    }
    Ok(())
  }

  fn materialize(&self, ctx: &ProviderContext, request: &ResourceRequest) -> ObservedResource {
    let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
    let mut attributes = request.attributes.clone();
    attributes.insert("etag".to_string(), Value::from(generation.to_string()));
    ObservedResource {
      kind: request.kind,
      key: request.key.clone(),
      attributes,
      outputs: outputs(ctx, request),
    }
  }

  fn persist(&self) -> Result<(), ProviderError> {
    let Some(path) = &self.path else {
      return Ok(());
    };
    let _guard = lock(&self.persist_lock);
    let records = self.resources();
    let write = || -> io::Result<()> {
      let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
      };
      fs::create_dir_all(dir)?;
      let content = serde_json::to_string_pretty(&records).map_err(io::Error::other)?;
      let mut temp = NamedTempFile::new_in(dir)?;
      temp.write_all(content.as_bytes())?;
      temp.persist(path).map_err(|e| e.error)?;
      Ok(())
    };
    write().map_err(|e| ProviderError::permanent(format!("failed to persist provider table: {}", e)))
  }
}

/// Values the platform reports back after provisioning.
fn outputs(ctx: &ProviderContext, request: &ResourceRequest) -> Attributes {
  let mut out = Attributes::new();
  let attr = |name: &str| request.attributes.get(name).and_then(Value::as_str);
  match request.kind {
    ResourceKind::FunctionDeployment => {
      let region = attr("region").unwrap_or(&ctx.region);
      out.insert(
        "uri".to_string(),
        Value::from(format!("https://{}-{}.cloudfunctions.net/{}", region, ctx.project, request.key)),
      );
    }
    ResourceKind::ServiceAccount => {
      out.insert("email".to_string(), Value::from(request.key.as_str()));
    }
    ResourceKind::Bucket => {
      out.insert("url".to_string(), Value::from(format!("gs://{}", request.key)));
    }
    ResourceKind::ArtifactObject => {
      if let (Some(bucket), Some(object)) = (attr("bucket"), attr("object")) {
        out.insert("url".to_string(), Value::from(format!("gs://{}/{}", bucket, object)));
      }
    }
    ResourceKind::EventTrigger => {
      let region = attr("region").unwrap_or(&ctx.region);
      out.insert(
        "name".to_string(),
        Value::from(format!(
          "projects/{}/locations/{}/triggers/{}",
          ctx.project, region, request.key
        )),
      );
    }
    ResourceKind::ApiToggle | ResourceKind::Binding => {}
  }
  out
}

#[async_trait]
impl Provider for LocalProvider {
  async fn get(
    &self,
    _ctx: &ProviderContext,
    kind: ResourceKind,
    key: &str,
  ) -> Result<Option<ObservedResource>, ProviderError> {
    self.log(CallKind::Get, kind, key);
    Ok(self.record(kind, key))
  }

  async fn list(&self, _ctx: &ProviderContext, kind: ResourceKind) -> Result<Vec<ObservedResource>, ProviderError> {
    self.log(CallKind::List, kind, "");
    Ok(lock(&self.table).values().filter(|r| r.kind == kind).cloned().collect())
  }

  async fn create(&self, ctx: &ProviderContext, request: &ResourceRequest) -> Result<ObservedResource, ProviderError> {
    self.log(CallKind::Create, request.kind, &request.key);
    self.before_mutation(request.kind, &request.key).await?;
    self.check_apis(ctx, request.kind)?;

    let observed = self.materialize(ctx, request);
    {
      let mut table = lock(&self.table);
      let table_key = (request.kind, request.key.clone());
      if table.contains_key(&table_key) {
        return Err(ProviderError::permanent(format!(
          "{} {} already exists",
          request.kind, request.key
        )));
      }
      table.insert(table_key, observed.clone());
    }
    self.persist()?;
    debug!(kind = %request.kind, key = %request.key, "created");
    Ok(observed)
  }

  async fn update(&self, ctx: &ProviderContext, request: &ResourceRequest) -> Result<ObservedResource, ProviderError> {
    self.log(CallKind::Update, request.kind, &request.key);
    self.before_mutation(request.kind, &request.key).await?;
    self.check_apis(ctx, request.kind)?;

    let observed = self.materialize(ctx, request);
    {
      let mut table = lock(&self.table);
      let Some(slot) = table.get_mut(&(request.kind, request.key.clone())) else {
        return Err(ProviderError::permanent(format!("{} {} not found", request.kind, request.key)));
      };
      *slot = observed.clone();
    }
    self.persist()?;
    debug!(kind = %request.kind, key = %request.key, "updated");
    Ok(observed)
  }

  async fn delete(&self, _ctx: &ProviderContext, kind: ResourceKind, key: &str) -> Result<(), ProviderError> {
    self.log(CallKind::Delete, kind, key);
    self.before_mutation(kind, key).await?;
    if lock(&self.table).remove(&(kind, key.to_string())).is_none() {
      debug!(%kind, key, "delete of absent resource");
    }
    self.persist()?;
    debug!(%kind, key, "deleted");
    Ok(())
  }
}
