//! Implementation of the `aggon plan` command.
//!
//! Shows what `aggon switch` would change without touching the store,
//! the AddOns directories or the generations.

use anyhow::{Context, Result};
use owo_colors::{OwoColorize, Stream};

use aggon_lib::reconcile::{BuildPlan, CancelFlag, Operation, OperationKind};

use crate::cmd::{GlobalArgs, Workspace};
use crate::output::{OutputFormat, operation_symbol, print_info, print_json, print_success, symbols, truncate_hash};

pub fn cmd_plan(args: &GlobalArgs, output: OutputFormat) -> Result<()> {
  let workspace = Workspace::load(args)?;
  let plan = workspace
    .reconciler(CancelFlag::new())
    .plan(&workspace.config)
    .context("Failed to build plan")?;

  if output.is_json() {
    return print_json(&plan);
  }

  print_plan(&plan, args.verbose);
  Ok(())
}

/// Render a plan grouped by installation. Unchanged addons only show with `verbose`.
pub fn print_plan(plan: &BuildPlan, verbose: bool) {
  match plan.current_generation {
    Some(id) => print_info(&format!("Planning against generation {}", id)),
    None => print_info("No current generation; everything will be installed"),
  }

  for (name, install) in &plan.installations {
    let shown: Vec<&Operation> = install
      .operations
      .iter()
      .filter(|op| verbose || op.kind != OperationKind::Symlink)
      .collect();
    if shown.is_empty() {
      continue;
    }

    println!();
    println!(
      "{} {}",
      name.if_supports_color(Stream::Stdout, |s| s.bold()),
      install.path.display().if_supports_color(Stream::Stdout, |s| s.dimmed())
    );
    for op in shown {
      println!("  {} {}{}", operation_symbol(op.kind), op.addon, describe_change(op));
    }
  }

  if !plan.downloads.is_empty() {
    println!();
    println!("{}", "Downloads:".if_supports_color(Stream::Stdout, |s| s.bold()));
    for download in &plan.downloads {
      let expected = download
        .expected
        .as_deref()
        .map(|hash| format!(" ({})", truncate_hash(hash)))
        .unwrap_or_default();
      println!("  {} {}{}", symbols::ARROW, download.source.url, expected);
    }
  }

  println!();
  if plan.is_noop() {
    print_success(&format!(
      "No changes. {} addon(s) up to date.",
      plan.count(OperationKind::Symlink)
    ));
  } else {
    println!(
      "Plan: {} to install, {} to update, {} to uninstall, {} unchanged.",
      plan.count(OperationKind::Install),
      plan.count(OperationKind::Update),
      plan.count(OperationKind::Uninstall),
      plan.count(OperationKind::Symlink)
    );
  }
}

fn describe_change(op: &Operation) -> String {
  match (op.kind, op.from.as_deref(), op.to.as_deref()) {
    (OperationKind::Update, Some(from), Some(to)) if from != to => format!(
      " {} {} {}",
      truncate_hash(from),
      symbols::ARROW,
      truncate_hash(to)
    ),
    (OperationKind::Install | OperationKind::Update, _, Some(to)) if !to.is_empty() => {
      format!(" {}", truncate_hash(to))
    }
    _ => String::new(),
  }
}
