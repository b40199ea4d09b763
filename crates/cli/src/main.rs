mod cmd;
mod output;
mod prompts;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use aggon_lib::consts::CONFIG_FILENAME;

use cmd::{GenerationsCommand, GlobalArgs, StoreCommand};
use output::OutputFormat;

/// aggon - declarative WoW addon manager
#[derive(Parser)]
#[command(name = "aggon")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Path to the declarative config
  #[arg(short, long, global = true, default_value = CONFIG_FILENAME)]
  config: PathBuf,

  /// Profile to apply on top of the config
  #[arg(short, long, global = true)]
  profile: Option<String>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Write a starter config and create the state directories
  Init,

  /// Show what a switch would change (dry-run)
  Plan {
    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Realize the config as a new generation
  Switch {
    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Re-activate an earlier generation
  Rollback {
    /// Generation to roll back to (default: the last complete one before current)
    id: Option<u64>,

    /// Activate the target even if its apply did not complete
    #[arg(long, requires = "id")]
    force: bool,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Manage generations
  #[command(subcommand)]
  Generations(GenerationsCommand),

  /// Inspect the content store
  #[command(subcommand)]
  Store(StoreCommand),

  /// Prune old generations, then unreferenced store content
  Gc {
    /// Number of recent generations to keep (default: settings.backup_generations)
    #[arg(long)]
    keep: Option<usize>,

    /// Preview what would be removed without actually removing it
    #[arg(long)]
    dry_run: bool,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Show the current generation
  Status {
    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "warn" };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let args = GlobalArgs {
    config: cli.config,
    profile: cli.profile,
    verbose: cli.verbose,
  };

  match cli.command {
    Commands::Init => cmd::cmd_init(&args.config),
    Commands::Plan { output } => cmd::cmd_plan(&args, output),
    Commands::Switch { output } => cmd::cmd_switch(&args, output),
    Commands::Rollback { id, force, output } => cmd::cmd_rollback(&args, id, force, output),
    Commands::Generations(command) => cmd::cmd_generations(&args, command),
    Commands::Store(command) => cmd::cmd_store(&args, command),
    Commands::Gc { keep, dry_run, output } => cmd::cmd_gc(&args, keep, dry_run, output),
    Commands::Status { output } => cmd::cmd_status(&args, output),
  }
}
