//! Inspect and sweep the content-addressed store.

use anyhow::Result;
use clap::Subcommand;

use aggon_lib::store::{EntryKind, StoreEntry};

use crate::cmd::{GlobalArgs, Workspace};
use crate::output::{
  OutputFormat, format_bytes, format_timestamp, print_info, print_json, print_stat, print_success, truncate_hash,
};

#[derive(Subcommand, Debug)]
pub enum StoreCommand {
  /// List stored content
  List {
    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Remove content no generation references
  Gc {
    /// Preview what would be removed without actually removing it
    #[arg(long)]
    dry_run: bool,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },
}

pub fn cmd_store(args: &GlobalArgs, command: StoreCommand) -> Result<()> {
  let workspace = Workspace::load_or_default(args)?;
  match command {
    StoreCommand::List { output } => cmd_list(&workspace, output),
    StoreCommand::Gc { dry_run, output } => cmd_sweep(&workspace, dry_run, output),
  }
}

fn cmd_list(workspace: &Workspace, output: OutputFormat) -> Result<()> {
  let mut entries: Vec<StoreEntry> = workspace.store.list_entries().collect();
  entries.sort_by_key(|entry| entry.created_at);

  if output.is_json() {
    return print_json(&entries);
  }

  if entries.is_empty() {
    print_info("Store is empty");
    return Ok(());
  }

  for entry in &entries {
    let kind = match entry.kind {
      EntryKind::Blob => "blob",
      EntryKind::Tree => "tree",
    };
    let source = if entry.source_url.is_empty() {
      String::new()
    } else {
      format!(" {}", entry.source_url)
    };
    println!(
      "{} {} {:>9} {}{}",
      truncate_hash(entry.hash.as_str()),
      kind,
      format_bytes(entry.size),
      format_timestamp(entry.created_at),
      source
    );
  }

  let total: u64 = entries.iter().map(|entry| entry.size).sum();
  print_info(&format!("{} entries, {}", entries.len(), format_bytes(total)));
  Ok(())
}

fn cmd_sweep(workspace: &Workspace, dry_run: bool, output: OutputFormat) -> Result<()> {
  let _lock = workspace.lock("store gc")?;
  let live = workspace.generations.reachable_hashes()?;
  let stats = workspace.store.garbage_collect(&live, dry_run)?;

  if output.is_json() {
    return print_json(&stats);
  }

  if dry_run {
    print_info("Dry run - no changes made");
  } else {
    print_success("Store sweep complete!");
  }
  print_stat("Entries scanned", &stats.entries_scanned.to_string());
  print_stat("Entries removed", &stats.entries_deleted.to_string());
  print_stat("Space freed", &format_bytes(stats.bytes_freed));
  Ok(())
}
