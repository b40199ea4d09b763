use std::time::Instant;

use anyhow::Result;

use aggon_lib::gc::collect_garbage;

use crate::cmd::{GlobalArgs, Workspace};
use crate::output::{OutputFormat, format_bytes, format_duration, print_info, print_json, print_stat, print_success};

pub fn cmd_gc(args: &GlobalArgs, keep: Option<usize>, dry_run: bool, output: OutputFormat) -> Result<()> {
  let start = Instant::now();
  let workspace = Workspace::load_or_default(args)?;
  let keep = keep.unwrap_or(workspace.config.settings.backup_generations);

  let _lock = workspace.lock("gc")?;

  let result = collect_garbage(&workspace.store, &workspace.generations, keep, dry_run)?;

  if output.is_json() {
    print_json(&result)?;
  } else {
    println!();
    if dry_run {
      print_info("Dry run - no changes made");
    } else {
      print_success("Garbage collection complete!");
    }
    print_stat("Generations removed", &result.generations_deleted.len().to_string());
    print_stat("Store entries removed", &result.store.entries_deleted.to_string());
    print_stat("Space freed", &format_bytes(result.bytes_freed()));
    print_stat("Duration", &format_duration(start.elapsed()));
    if args.verbose {
      for path in result.deleted_paths() {
        println!("  {}", path.display());
      }
    }
  }

  Ok(())
}
