//! CLI output formatting utilities.
//!
//! Provides consistent formatting for terminal output including colored status
//! messages, plan and report lines, and Unicode symbols.

use std::time::Duration;

use anyhow::Context;
use owo_colors::{OwoColorize, Stream};

use stratus_lib::execute::ResourceStatus;
use stratus_lib::plan::{Action, PlannedAction};

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
  pub const ARROW: &str = "→";
  pub const ADD: &str = "+";
  pub const MODIFY: &str = "~";
  pub const REMOVE: &str = "-";
  pub const KEEP: &str = "=";
  pub const REFUSE: &str = "!";
}

pub fn format_duration(duration: Duration) -> String {
  let secs = duration.as_secs();
  let millis = duration.subsec_millis();

  if secs >= 60 {
    let mins = secs / 60;
    let remaining_secs = secs % 60;
    format!("{}m {}s", mins, remaining_secs)
  } else if secs > 0 {
    format!("{}.{:02}s", secs, millis / 10)
  } else {
    format!("{}ms", millis)
  }
}

pub fn action_symbol(action: Action) -> &'static str {
  match action {
    Action::Create => symbols::ADD,
    Action::Update => symbols::MODIFY,
    Action::NoOp => symbols::KEEP,
    Action::Delete => symbols::REMOVE,
    Action::RefuseDelete => symbols::REFUSE,
  }
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

pub fn print_warning(message: &str) {
  eprintln!(
    "{} {}",
    symbols::WARNING.if_supports_color(Stream::Stderr, |s| s.yellow()),
    message.if_supports_color(Stream::Stderr, |s| s.yellow())
  );
}

pub fn print_info(message: &str) {
  println!(
    "{} {}",
    symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()),
    message
  );
}

pub fn print_stat(label: &str, value: &str) {
  println!(
    "  {}: {}",
    label.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    value
  );
}

/// One plan line: symbol, id, kind and reason.
pub fn print_planned(entry: &PlannedAction) {
  let symbol = action_symbol(entry.action);
  let symbol = match entry.action {
    Action::Create => symbol.if_supports_color(Stream::Stdout, |s| s.green()).to_string(),
    Action::Update => symbol.if_supports_color(Stream::Stdout, |s| s.yellow()).to_string(),
    Action::Delete | Action::RefuseDelete => symbol.if_supports_color(Stream::Stdout, |s| s.red()).to_string(),
    Action::NoOp => symbol.if_supports_color(Stream::Stdout, |s| s.dimmed()).to_string(),
  };
  println!(
    "  {} {} {} {}",
    symbol,
    entry.id,
    format!("({})", entry.kind).if_supports_color(Stream::Stdout, |s| s.dimmed()),
    entry.reason
  );
}

/// One report line: symbol, id and final status.
pub fn print_outcome(id: &str, status: &ResourceStatus) {
  let symbol = match status {
    ResourceStatus::Failed { .. } => symbols::ERROR.if_supports_color(Stream::Stdout, |s| s.red()).to_string(),
    ResourceStatus::Skipped { .. } | ResourceStatus::Cancelled => symbols::WARNING
      .if_supports_color(Stream::Stdout, |s| s.yellow())
      .to_string(),
    _ => symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()).to_string(),
  };
  println!("  {} {} {} {}", symbol, id, symbols::ARROW, status);
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}
