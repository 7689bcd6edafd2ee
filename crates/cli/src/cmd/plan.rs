//! Implementation of the `stratus plan` command.
//!
//! This command lowers a desired-state file, observes the provider and prints
//! the action each resource would take. Nothing is mutated.

use std::path::Path;

use anyhow::{Context, Result};

use stratus_lib::execute::{ApplyError, apply::DEFAULT_PRINCIPAL, prepare};
use stratus_lib::plan::{Plan, PlanError};
use stratus_lib::state::StateStore;

use super::{load_desired, open_provider, runtime};
use crate::output::{print_info, print_json, print_planned, print_stat, print_warning};

pub fn cmd_plan(file: &Path, json: bool) -> Result<()> {
  let (desired, base_dir) = load_desired(file)?;
  let provider = open_provider(&desired.project)?;
  let store = StateStore::for_project(&desired.project);

  let rt = runtime()?;
  let prepared = rt.block_on(prepare(&desired, &base_dir, provider.as_ref(), DEFAULT_PRINCIPAL, &store));

  match prepared {
    Ok(prepared) => {
      print_plan(&prepared.plan, json)?;
      Ok(())
    }
    Err(ApplyError::Plan(PlanError::ProtectedResource { ids, plan })) => {
      print_plan(&plan, json)?;
      Err(PlanError::ProtectedResource { ids, plan }).context("Planning failed")
    }
    Err(e) => Err(e).context("Planning failed"),
  }
}

pub(crate) fn print_plan(plan: &Plan, json: bool) -> Result<()> {
  if json {
    return print_json(plan);
  }

  println!("Plan for {}:", plan.project);
  for entry in &plan.actions {
    print_planned(entry);
  }
  for id in &plan.dropped {
    print_warning(&format!("{} no longer exists and will be forgotten", id));
  }

  println!();
  for (action, count) in plan.summary() {
    print_stat(&action, &count.to_string());
  }
  if plan.is_converged() {
    print_info("No changes. Everything is up to date.");
  }
  Ok(())
}
