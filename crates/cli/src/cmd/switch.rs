//! Implementation of the `aggon switch` command.
//!
//! Plans the config, fetches what is missing, re-links every addon and
//! records a new generation. The generation only becomes current when every
//! step succeeded; otherwise the previous one stays active.

use anyhow::{Context, Result, bail};
use tracing::info;

use aggon_lib::reconcile::{CancelFlag, ReconcileResult};

use crate::cmd::plan::print_plan;
use crate::cmd::{GlobalArgs, Workspace, block_on_cancellable};
use crate::output::{OutputFormat, format_duration, print_error, print_json, print_stat, print_success};

pub fn cmd_switch(args: &GlobalArgs, output: OutputFormat) -> Result<()> {
  let workspace = Workspace::load(args)?;
  let _lock = workspace.lock("switch")?;

  let cancel = CancelFlag::new();
  let reconciler = workspace.reconciler(cancel.clone());
  let plan = reconciler.plan(&workspace.config).context("Failed to build plan")?;

  if !output.is_json() {
    print_plan(&plan, args.verbose);
    println!();
  }

  let result = block_on_cancellable(&cancel, reconciler.apply(&plan))?.context("Switch failed")?;
  info!(generation = result.generation, success = result.success, "switch finished");

  report(&result, output, "Switched to generation")
}

/// Print a reconcile result and turn an unsuccessful one into an error.
pub fn report(result: &ReconcileResult, output: OutputFormat, verb: &str) -> Result<()> {
  if output.is_json() {
    print_json(result)?;
  } else if result.success {
    print_success(&format!("{} {}", verb, result.generation));
    print_stat("Downloaded", &result.downloaded.to_string());
    print_stat("Linked", &result.installed.to_string());
    print_stat("Duration", &format_duration(result.duration));
  } else {
    print_error(&format!(
      "Generation {} was recorded but not activated",
      result.generation
    ));
    for issue in &result.errors {
      print_error(&format!("  {}", issue));
    }
  }

  if !result.success {
    bail!("{} error(s); the previous generation is still active", result.errors.len());
  }
  Ok(())
}
