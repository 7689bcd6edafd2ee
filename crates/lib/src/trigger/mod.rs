//! Event trigger configuration.
//!
//! Compiles a human-friendly trigger specification (a source bucket and a
//! glob-like object pattern) into the ordered filter list of an event
//! subscription:
//!
//! 1. `bucket` **equals** the source bucket
//! 2. `subject` **path-pattern-matches**
//!    `/projects/_/buckets/{bucket}/objects/{pattern}`
//!
//! Filters are AND-ed. `*` in a pattern matches within a single path segment,
//! so `*.xlsx` fires only for top-level objects and `reports/*.xlsx` only for
//! objects directly inside `reports/`. `*` is the only wildcard accepted.

use std::collections::BTreeMap;

use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::DEFAULT_OBJECT_PATTERN;
use crate::resource::AttrValue;

/// Event attribute carrying the bucket name.
pub const BUCKET_ATTRIBUTE: &str = "bucket";

/// Event attribute carrying the object path.
pub const SUBJECT_ATTRIBUTE: &str = "subject";

const PATH_MATCH: MatchOptions = MatchOptions {
  case_sensitive: true,
  require_literal_separator: true,
  require_literal_leading_dot: false,
};

/// Errors produced while compiling a trigger.
#[derive(Debug, Error, PartialEq)]
pub enum TriggerError {
  #[error("invalid object pattern {pattern:?}: {reason}")]
  PatternSyntax { pattern: String, reason: String },

  #[error("invalid source bucket {bucket:?}: {reason}")]
  InvalidBucket { bucket: String, reason: String },
}

/// How a filter compares an event attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
  Equals,
  PathPatternMatch,
}

impl std::fmt::Display for FilterOperator {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      FilterOperator::Equals => f.write_str("equals"),
      FilterOperator::PathPatternMatch => f.write_str("match-path-pattern"),
    }
  }
}

/// A single event filter predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
  pub attribute: String,
  pub operator: FilterOperator,
  pub value: String,
}

impl EventFilter {
  pub fn new(attribute: &str, operator: FilterOperator, value: impl Into<String>) -> Self {
    Self {
      attribute: attribute.to_string(),
      operator,
      value: value.into(),
    }
  }

  /// Evaluate against a set of event attributes. A missing attribute never
  /// matches.
  pub fn matches(&self, event: &BTreeMap<&str, String>) -> bool {
    let Some(actual) = event.get(self.attribute.as_str()) else {
      return false;
    };
    match self.operator {
      FilterOperator::Equals => actual == &self.value,
      FilterOperator::PathPatternMatch => Pattern::new(&self.value)
        .map(|p| p.matches_with(actual, PATH_MATCH))
        .unwrap_or(false),
    }
  }

  pub fn to_attr(&self) -> AttrValue {
    let mut map = BTreeMap::new();
    map.insert("attribute".to_string(), AttrValue::from(self.attribute.as_str()));
    map.insert("operator".to_string(), AttrValue::from(self.operator.to_string()));
    map.insert("value".to_string(), AttrValue::from(self.value.as_str()));
    AttrValue::Map(map)
  }
}

/// Redelivery behaviour for failed function invocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicy {
  #[default]
  None,
  Retry,
}

impl std::fmt::Display for RetryPolicy {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      RetryPolicy::None => f.write_str("do-not-retry"),
      RetryPolicy::Retry => f.write_str("retry"),
    }
  }
}

/// A compiled event subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventTrigger {
  pub region: String,
  pub event_type: String,
  pub retry_policy: RetryPolicy,
  pub invoker_principal: String,
  pub filters: Vec<EventFilter>,
}

impl EventTrigger {
  /// Whether an object finalized in `bucket` under `object_name` would fire
  /// this trigger.
  pub fn matches(&self, bucket: &str, object_name: &str) -> bool {
    let mut event = BTreeMap::new();
    event.insert(BUCKET_ATTRIBUTE, bucket.to_string());
    event.insert(SUBJECT_ATTRIBUTE, object_subject(bucket, object_name));
    self.filters.iter().all(|f| f.matches(&event))
  }
}

/// Trigger input as written by users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerSpec {
  pub source_bucket: String,
  #[serde(default)]
  pub object_pattern: Option<String>,
}

impl TriggerSpec {
  pub fn pattern(&self) -> &str {
    self.object_pattern.as_deref().unwrap_or(DEFAULT_OBJECT_PATTERN)
  }

  pub fn compile(&self) -> Result<Vec<EventFilter>, TriggerError> {
    compile_filters(&self.source_bucket, self.object_pattern.as_deref())
  }
}

/// The event subject for an object path.
pub fn object_subject(bucket: &str, object: &str) -> String {
  format!("/projects/_/buckets/{}/objects/{}", bucket, object)
}

/// Compile a bucket and optional object pattern into the two ordered filters.
pub fn compile_filters(source_bucket: &str, object_pattern: Option<&str>) -> Result<Vec<EventFilter>, TriggerError> {
  validate_bucket(source_bucket)?;
  let pattern = object_pattern.unwrap_or(DEFAULT_OBJECT_PATTERN);
  validate_pattern(pattern)?;

  Ok(vec![
    EventFilter::new(BUCKET_ATTRIBUTE, FilterOperator::Equals, source_bucket),
    EventFilter::new(
      SUBJECT_ATTRIBUTE,
      FilterOperator::PathPatternMatch,
      object_subject(source_bucket, pattern),
    ),
  ])
}

fn validate_bucket(bucket: &str) -> Result<(), TriggerError> {
  let invalid = |reason: &str| TriggerError::InvalidBucket {
    bucket: bucket.to_string(),
    reason: reason.to_string(),
  };
  if bucket.is_empty() {
    return Err(invalid("empty"));
  }
  if bucket.contains('/') {
    return Err(invalid("contains a path separator"));
  }
  if bucket.contains(['*', '?', '[', ']']) {
    return Err(invalid("contains pattern characters"));
  }
  Ok(())
}

fn validate_pattern(pattern: &str) -> Result<(), TriggerError> {
  let invalid = |reason: String| TriggerError::PatternSyntax {
    pattern: pattern.to_string(),
    reason,
  };

  if pattern.is_empty() {
    return Err(invalid("pattern is empty".to_string()));
  }
  if pattern.starts_with('/') {
    return Err(invalid("pattern must be relative to the bucket".to_string()));
  }
  if pattern.ends_with('/') {
    return Err(invalid("pattern must name objects, not a folder".to_string()));
  }
  if pattern.split('/').any(str::is_empty) {
    return Err(invalid("pattern has an empty path segment".to_string()));
  }
  if pattern.contains("**") {
    return Err(invalid("multi-level wildcards are not supported".to_string()));
  }
  // The platform's path-pattern operator only knows `*`.
  if let Some(c) = pattern.chars().find(|c| matches!(c, '?' | '[' | ']')) {
    return Err(invalid(format!("unsupported wildcard `{}`; only `*` is allowed", c)));
  }
  Pattern::new(pattern).map_err(|e| invalid(e.msg.to_string()))?;
  Ok(())
}
