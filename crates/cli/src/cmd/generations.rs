use std::time::Duration;

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;
use tracing::{debug, info};

use aggon_lib::generation::Generation;
use aggon_lib::util::fs::unix_now;

use crate::cmd::{GlobalArgs, Workspace};
use crate::output::{
  OutputFormat, format_timestamp, print_error, print_info, print_json, print_success, print_warning, truncate_hash,
};
use crate::prompts::confirm;

#[derive(Subcommand, Debug)]
pub enum GenerationsCommand {
  /// List all generations (`--verbose` adds descriptions and addon counts)
  List {
    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Show details of a specific generation (`--verbose` lists every addon)
  Show {
    /// Generation ID to show
    id: u64,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Delete generations
  Delete {
    /// Generation IDs to delete
    ids: Vec<u64>,

    /// Delete generations older than this duration (e.g., "7d", "24h", "2w")
    #[arg(long, value_parser = humantime::parse_duration)]
    older_than: Option<Duration>,

    /// Preview what would be deleted without actually deleting
    #[arg(long)]
    dry_run: bool,

    /// Skip confirmation prompt
    #[arg(long)]
    force: bool,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Prune old generations, keeping the current one and the most recent ones
  Gc {
    /// Number of recent generations to keep (default: settings.backup_generations)
    #[arg(long)]
    keep: Option<usize>,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },
}

#[derive(Debug, Serialize)]
struct DeleteResult {
  deleted: Vec<u64>,
  failed: Vec<DeleteFailure>,
  skipped_current: Option<u64>,
  dry_run: bool,
}

#[derive(Debug, Serialize)]
struct DeleteFailure {
  id: u64,
  error: String,
}

#[derive(Debug, Serialize)]
struct GenerationListItem {
  id: u64,
  timestamp: u64,
  is_current: bool,
  complete: bool,
  description: String,
  state_hash: String,
  addon_count: usize,
}

impl GenerationListItem {
  fn new(generation: &Generation, current: Option<u64>) -> Self {
    Self {
      id: generation.id,
      timestamp: generation.timestamp,
      is_current: current == Some(generation.id),
      complete: generation.complete,
      description: generation.description.clone(),
      state_hash: generation.state_hash.clone(),
      addon_count: generation.addon_count(),
    }
  }
}

pub fn cmd_generations(args: &GlobalArgs, command: GenerationsCommand) -> Result<()> {
  let workspace = Workspace::load_or_default(args)?;
  match command {
    GenerationsCommand::List { output } => cmd_list(&workspace, args.verbose, output),
    GenerationsCommand::Show { id, output } => cmd_show(&workspace, id, args.verbose, output),
    GenerationsCommand::Delete {
      ids,
      older_than,
      dry_run,
      force,
      output,
    } => cmd_delete(&workspace, ids, older_than, dry_run, force, output),
    GenerationsCommand::Gc { keep, output } => cmd_prune(&workspace, keep, output),
  }
}

fn cmd_list(workspace: &Workspace, verbose: bool, output: OutputFormat) -> Result<()> {
  let mut generations = workspace.generations.list()?;
  let current_id = workspace.generations.current_id()?;

  generations.reverse();

  if output.is_json() {
    #[derive(Serialize)]
    struct ListOutput {
      generations: Vec<GenerationListItem>,
      current: Option<u64>,
    }

    print_json(&ListOutput {
      generations: generations
        .iter()
        .map(|g| GenerationListItem::new(g, current_id))
        .collect(),
      current: current_id,
    })?;
    return Ok(());
  }

  if generations.is_empty() {
    print_info("No generations found");
    return Ok(());
  }

  for generation in &generations {
    let current_marker = match (current_id == Some(generation.id), generation.complete) {
      (true, _) => " (current)",
      (false, false) => " (incomplete)",
      (false, true) => "",
    };
    let timestamp = format_timestamp(generation.timestamp);

    if verbose {
      let counts: Vec<String> = generation
        .installations
        .iter()
        .map(|(name, state)| format!("{}: {}", name, state.addons.len()))
        .collect();
      println!(
        "{}{} - {} [{}] {} ({})",
        generation.id,
        current_marker,
        timestamp,
        truncate_hash(&generation.state_hash),
        generation.description,
        counts.join(", ")
      );
    } else {
      println!("{}{} - {}", generation.id, current_marker, timestamp);
    }
  }

  print_info(&format!("{} generation(s) total", generations.len()));
  Ok(())
}

fn cmd_show(workspace: &Workspace, id: u64, verbose: bool, output: OutputFormat) -> Result<()> {
  let generation = workspace.generations.get(id)?;
  let is_current = workspace.generations.current_id()? == Some(id);

  if output.is_json() {
    #[derive(Serialize)]
    struct ShowOutput<'a> {
      is_current: bool,
      #[serde(flatten)]
      generation: &'a Generation,
    }

    print_json(&ShowOutput {
      is_current,
      generation: &generation,
    })?;
    return Ok(());
  }

  let current_marker = if is_current { " (current)" } else { "" };
  println!("Generation:  {}{}", generation.id, current_marker);
  println!("Created:     {}", format_timestamp(generation.timestamp));
  println!("State hash:  {}", generation.state_hash);
  if !generation.description.is_empty() {
    println!("Description: {}", generation.description);
  }
  println!("Addons:      {}", generation.addon_count());

  for (name, state) in &generation.installations {
    println!("\n{} ({}): {} addon(s)", name, state.path.display(), state.addons.len());
    if verbose {
      for addon in state.addons.values() {
        let version = if addon.version.is_empty() {
          String::new()
        } else {
          format!(" {}", addon.version)
        };
        println!("  {}{} ({})", addon.id, version, truncate_hash(addon.hash.as_str()));
      }
    }
  }

  Ok(())
}

fn cmd_delete(
  workspace: &Workspace,
  ids: Vec<u64>,
  older_than: Option<Duration>,
  dry_run: bool,
  force: bool,
  output: OutputFormat,
) -> Result<()> {
  let mut candidates = ids;
  let current_id = workspace.generations.current_id()?;

  if let Some(duration) = older_than {
    let cutoff = unix_now().saturating_sub(duration.as_secs());
    for generation in workspace.generations.list()? {
      if generation.timestamp < cutoff && !candidates.contains(&generation.id) {
        candidates.push(generation.id);
      }
    }
  }

  let empty = |skipped_current: Option<u64>| DeleteResult {
    deleted: vec![],
    failed: vec![],
    skipped_current,
    dry_run,
  };

  if candidates.is_empty() {
    if output.is_json() {
      print_json(&empty(None))?;
    } else {
      print_info("No generations to delete");
    }
    return Ok(());
  }

  let mut skipped_current = None;
  if let Some(current) = current_id
    && candidates.contains(&current)
  {
    skipped_current = Some(current);
    candidates.retain(|id| *id != current);
  }

  if candidates.is_empty() {
    if output.is_json() {
      print_json(&empty(skipped_current))?;
    } else {
      print_warning("Cannot delete the current generation. Roll back or switch first.");
    }
    return Ok(());
  }

  if !output.is_json() {
    if dry_run {
      print_info("Dry run - the following generations would be deleted:");
    } else {
      println!("The following generations will be deleted:");
    }
    for id in &candidates {
      println!("  {}", id);
    }
    if let Some(current) = skipped_current {
      print_warning(&format!("Skipping current generation: {}", current));
    }
  }

  if dry_run {
    if output.is_json() {
      print_json(&DeleteResult {
        deleted: candidates,
        failed: vec![],
        skipped_current,
        dry_run: true,
      })?;
    } else {
      print_info("Dry run - no changes made");
    }
    return Ok(());
  }

  if !confirm(&format!("Delete {} generation(s)?", candidates.len()), force)? {
    if output.is_json() {
      print_json(&empty(skipped_current))?;
    } else {
      print_info("Cancelled");
    }
    return Ok(());
  }

  let _lock = workspace.lock("generations delete")?;

  let mut deleted = Vec::new();
  let mut failed = Vec::new();

  for id in candidates {
    debug!(generation = id, "deleting generation");
    match workspace.generations.delete(id) {
      Ok(()) => {
        info!(generation = id, "deleted generation");
        deleted.push(id);
      }
      Err(e) => {
        debug!(generation = id, error = %e, "failed to delete generation");
        failed.push(DeleteFailure {
          id,
          error: e.to_string(),
        });
      }
    }
  }

  if output.is_json() {
    print_json(&DeleteResult {
      deleted,
      failed,
      skipped_current,
      dry_run: false,
    })?;
  } else {
    if !deleted.is_empty() {
      print_success(&format!("Deleted {} generation(s)", deleted.len()));
    }
    for f in &failed {
      print_error(&format!("Failed to delete {}: {}", f.id, f.error));
    }
  }

  Ok(())
}

fn cmd_prune(workspace: &Workspace, keep: Option<usize>, output: OutputFormat) -> Result<()> {
  let keep = keep.unwrap_or(workspace.config.settings.backup_generations);
  let _lock = workspace.lock("generations gc")?;
  let deleted = workspace.generations.garbage_collect(keep)?;

  if output.is_json() {
    #[derive(Serialize)]
    struct PruneOutput {
      keep: usize,
      deleted: Vec<u64>,
    }
    return print_json(&PruneOutput { keep, deleted });
  }

  if deleted.is_empty() {
    print_info("No generations to prune");
  } else {
    print_success(&format!(
      "Pruned {} generation(s): {}",
      deleted.len(),
      deleted.iter().map(u64::to_string).collect::<Vec<_>>().join(", ")
    ));
  }
  Ok(())
}
