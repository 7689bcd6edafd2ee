//! Status command implementation.
//!
//! Displays the persisted run state for one project, or every project with
//! saved state.

use std::fs;

use anyhow::{Context, Result};

use stratus_lib::platform::paths::state_dir;
use stratus_lib::state::{RunState, StateStore};

use crate::output::{self, print_info, print_json, print_stat, print_success};

pub fn cmd_status(project: Option<&str>, verbose: bool, json: bool) -> Result<()> {
  let projects = match project {
    Some(project) => vec![project.to_string()],
    None => saved_projects()?,
  };

  let mut states = Vec::new();
  for project in &projects {
    let store = StateStore::for_project(project);
    if !store.path().exists() {
      continue;
    }
    let state = store
      .load(project)
      .with_context(|| format!("Failed to load state: {}", store.path().display()))?;
    states.push(state);
  }

  if json {
    return print_json(&states);
  }

  if states.is_empty() {
    print_info("No saved state found. Run 'stratus apply' to create some.");
    return Ok(());
  }

  for state in &states {
    print_state(state, verbose);
  }
  Ok(())
}

fn saved_projects() -> Result<Vec<String>> {
  let dir = state_dir();
  let entries = match fs::read_dir(&dir) {
    Ok(entries) => entries,
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
    Err(e) => return Err(e).with_context(|| format!("Failed to read state directory: {}", dir.display())),
  };

  let mut projects: Vec<String> = entries
    .filter_map(|entry| entry.ok())
    .map(|entry| entry.path())
    .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
    .filter_map(|path| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
    .collect();
  projects.sort();
  Ok(projects)
}

fn print_state(state: &RunState, verbose: bool) {
  print_success(&format!("Project: {}", state.project));
  print_stat("Updated", &state.updated_at.to_string());
  print_stat("Resources", &state.resources.len().to_string());

  for (id, record) in &state.resources {
    println!("  {} {} ({}, {})", output::symbols::INFO, id, record.kind, record.ownership);
    if verbose {
      for (name, value) in &record.outputs {
        println!("      {} {}", name, value);
      }
    }
  }
  println!();
}
