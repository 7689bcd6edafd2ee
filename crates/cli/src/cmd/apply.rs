//! Implementation of the `stratus apply` command.
//!
//! This command reconciles the provider with a desired-state file and saves
//! the resulting run state.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use stratus_lib::artifact::StorageKey;
use stratus_lib::execute::{ApplyOptions, ExecuteConfig, RetryConfig, apply};
use stratus_lib::provider::Provider;
use stratus_lib::state::StateStore;

use super::plan::print_plan;
use super::{load_desired, open_provider, runtime};
use crate::output::{format_duration, print_error, print_info, print_json, print_outcome, print_stat, print_success};

#[derive(Debug, Args)]
pub struct ApplyArgs {
  /// Path to the desired-state file
  pub file: std::path::PathBuf,

  /// Show the plan without executing it
  #[arg(long)]
  pub dry_run: bool,

  /// Maximum number of provider actions in flight
  #[arg(long)]
  pub parallelism: Option<usize>,

  /// Upper bound for a single action, retries included (e.g. "90s", "10m")
  #[arg(long, value_parser = humantime::parse_duration)]
  pub action_timeout: Option<Duration>,

  /// Stop starting new actions after this long (e.g. "15m")
  #[arg(long, value_parser = humantime::parse_duration)]
  pub deadline: Option<Duration>,

  /// Attempts per action for transient provider errors
  #[arg(long)]
  pub max_attempts: Option<u32>,
}

impl ApplyArgs {
  fn options(&self) -> ApplyOptions {
    let defaults = ExecuteConfig::default();
    ApplyOptions {
      execute: ExecuteConfig {
        parallelism: self.parallelism.unwrap_or(defaults.parallelism),
        action_timeout: self.action_timeout.unwrap_or(defaults.action_timeout),
        deadline: self.deadline,
        retry: RetryConfig {
          max_attempts: self.max_attempts.unwrap_or(defaults.retry.max_attempts),
          ..defaults.retry
        },
      },
      dry_run: self.dry_run,
      ..ApplyOptions::default()
    }
  }
}

/// Execute the apply command.
///
/// Prints the per-resource report and the run outputs. Returns an error when
/// any resource failed, was skipped or was cancelled.
pub fn cmd_apply(args: &ApplyArgs, json: bool) -> Result<()> {
  let (desired, base_dir) = load_desired(&args.file)?;
  let provider = open_provider(&desired.project)?;
  let store = StateStore::for_project(&desired.project);
  let options = args.options();

  let rt = runtime()?;
  let cancel = CancellationToken::new();
  let token = cancel.clone();
  rt.spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      warn!("interrupted, waiting for in-flight actions");
      token.cancel();
    }
  });

  let started = Instant::now();
  let provider: Arc<dyn Provider> = provider;
  let result = rt
    .block_on(apply(&desired, &base_dir, provider, &store, &options, &cancel))
    .context("Apply failed")?;
  let elapsed = started.elapsed();

  if json {
    print_json(&serde_json::json!({
      "plan": result.plan,
      "report": result.report,
      "outputs": result.outputs,
    }))?;
  } else if let Some(report) = &result.report {
    println!("Apply for {}:", desired.project);
    for id in &report.completion_order {
      if let Some(outcome) = report.outcomes.get(id) {
        print_outcome(id.as_str(), &outcome.status);
      }
    }
    println!();
    print_outputs(result.outputs.function_uri.as_deref(), result.outputs.storage_key.as_ref());
    print_stat("Elapsed", &format_duration(elapsed));
  } else {
    print_plan(&result.plan, false)?;
    println!();
    print_info("Dry run: nothing was executed.");
  }

  if let Some(report) = &result.report {
    if !report.is_success() {
      let failed = report.failed().len();
      let skipped = report.skipped().len() + report.cancelled().len();
      if !json {
        print_error(&format!("Apply incomplete: {} failed, {} skipped", failed, skipped));
      }
      bail!("{} resource(s) failed and {} were skipped", failed, skipped);
    }
    if !json {
      print_success("Apply complete!");
    }
  }

  info!(path = %store.path().display(), "state saved");
  Ok(())
}

fn print_outputs(function_uri: Option<&str>, storage_key: Option<&StorageKey>) {
  if let Some(uri) = function_uri {
    print_stat("Function", uri);
  }
  if let Some(key) = storage_key {
    print_stat("Storage key", key.as_str());
  }
}
