//! Implementation of the `aggon init` command.
//!
//! Writes a starter `aggon-declarative.json` and creates the store and
//! generation directories its settings point at.

use std::path::Path;

use anyhow::{Context, Result};
use owo_colors::OwoColorize;

use aggon_lib::init::init_config;

use crate::output::symbols;

/// Execute the init command.
///
/// # Errors
///
/// Returns an error if the config file already exists or the state
/// directories cannot be created.
pub fn cmd_init(config_path: &Path) -> Result<()> {
  let result = init_config(config_path).context("Failed to initialize configuration")?;

  println!(
    "{} {}",
    symbols::SUCCESS.green(),
    "Initialized aggon configuration!".green().bold()
  );
  println!();
  println!(
    "  {} Config:      {}",
    symbols::INFO.cyan(),
    result.config_path.display()
  );
  println!(
    "  {} Store:       {}",
    symbols::INFO.cyan(),
    result.store_dir.display()
  );
  println!(
    "  {} Generations: {}",
    symbols::INFO.cyan(),
    result.generations_dir.display()
  );
  println!();
  println!("{}", "Next steps:".bold());
  println!(
    "  1. Edit {} to point at your WoW installations and addons",
    result.config_path.display().to_string().cyan()
  );
  println!("  2. Run: {}", "aggon plan".cyan());
  println!("  3. Run: {}", "aggon switch".cyan());

  Ok(())
}
