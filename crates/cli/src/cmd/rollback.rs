//! Implementation of the `aggon rollback` command.

use anyhow::{Context, Result};

use aggon_lib::reconcile::CancelFlag;

use crate::cmd::switch::report;
use crate::cmd::{GlobalArgs, Workspace, block_on_cancellable};
use crate::output::OutputFormat;

/// Re-activate generation `target`, or the last complete one before the current generation.
pub fn cmd_rollback(args: &GlobalArgs, target: Option<u64>, force: bool, output: OutputFormat) -> Result<()> {
  let workspace = Workspace::load_or_default(args)?;
  let _lock = workspace.lock("rollback")?;

  let cancel = CancelFlag::new();
  let reconciler = workspace.reconciler(cancel.clone());
  let result = match target {
    Some(id) if force => block_on_cancellable(&cancel, reconciler.force_rollback(id))?,
    _ => block_on_cancellable(&cancel, reconciler.rollback(target))?,
  }
  .context("Rollback failed")?;

  report(&result, output, "Rolled back to generation")
}
