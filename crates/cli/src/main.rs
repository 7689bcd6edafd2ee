mod cmd;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cmd::ApplyArgs;

/// stratus - Declarative provisioning reconciler
#[derive(Parser)]
#[command(name = "stratus")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Print machine-readable JSON instead of text
  #[arg(long, global = true)]
  json: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Show what a run would change
  Plan {
    /// Path to the desired-state file
    file: PathBuf,
  },

  /// Reconcile the provider with a desired-state file
  Apply(ApplyArgs),

  /// Show the saved run state
  Status {
    /// Only show this project
    project: Option<String>,
  },

  /// Print the content hash and storage key of an artifact source
  Fingerprint {
    /// File or directory to fingerprint
    path: PathBuf,
  },

  /// Print the compiled event trigger of a desired-state file
  Trigger {
    /// Path to the desired-state file
    file: PathBuf,

    /// Object name to test against the trigger's filters
    #[arg(long)]
    test: Option<String>,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "warn" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  match cli.command {
    Commands::Plan { file } => cmd::cmd_plan(&file, cli.json),
    Commands::Apply(args) => cmd::cmd_apply(&args, cli.json),
    Commands::Status { project } => cmd::cmd_status(project.as_deref(), cli.verbose, cli.json),
    Commands::Fingerprint { path } => cmd::cmd_fingerprint(&path, cli.json),
    Commands::Trigger { file, test } => cmd::cmd_trigger(&file, test.as_deref(), cli.json),
  }
}
