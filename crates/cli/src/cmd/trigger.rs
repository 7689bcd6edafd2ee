//! Implementation of the `stratus trigger` command.
//!
//! Compiles the trigger section of a desired-state file into its event
//! filters and optionally checks whether an object name would fire it.

use std::path::Path;

use anyhow::{Context, Result};

use stratus_lib::desired::DesiredState;

use crate::output::{print_info, print_json, print_stat, print_success, print_warning, symbols};

pub fn cmd_trigger(file: &Path, test: Option<&str>, json: bool) -> Result<()> {
  let desired =
    DesiredState::load(file).with_context(|| format!("Failed to load desired state: {}", file.display()))?;
  let compiled = desired.compile_trigger().context("Failed to compile trigger")?;
  let (Some(trigger), Some(config)) = (compiled, desired.trigger.as_ref()) else {
    if json {
      return print_json(&serde_json::Value::Null);
    }
    print_info("No trigger declared.");
    return Ok(());
  };

  let fires = test.map(|object| trigger.matches(&config.source_bucket, object));

  if json {
    return print_json(&serde_json::json!({
      "trigger": trigger,
      "test": test.map(|object| serde_json::json!({ "object": object, "fires": fires })),
    }));
  }

  print_stat("Region", &trigger.region);
  print_stat("Event type", &trigger.event_type);
  print_stat("Retry policy", &trigger.retry_policy.to_string());
  print_stat("Invoker", &trigger.invoker_principal);
  println!("  Filters:");
  for filter in &trigger.filters {
    println!(
      "    {} {} {} {}",
      symbols::INFO,
      filter.attribute,
      filter.operator,
      filter.value
    );
  }

  if let (Some(object), Some(fires)) = (test, fires) {
    println!();
    if fires {
      print_success(&format!("{} fires the trigger", object));
    } else {
      print_warning(&format!("{} does not fire the trigger", object));
    }
  }
  Ok(())
}
