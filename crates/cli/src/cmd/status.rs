//! Status command implementation.
//!
//! Summarizes the current generation, checks that its links are still in
//! place and reports store usage.

use anyhow::Result;
use serde::Serialize;

use aggon_lib::generation::Generation;
use aggon_lib::util::fs::is_link;

use crate::cmd::{GlobalArgs, Workspace};
use crate::output::{
  OutputFormat, format_bytes, format_timestamp, print_info, print_json, print_stat, print_success, print_warning,
  symbols, truncate_hash,
};

#[derive(Debug, Serialize)]
struct InstallationStatus {
  name: String,
  path: String,
  addons: usize,
  missing_links: Vec<String>,
}

#[derive(Debug, Serialize)]
struct StatusOutput {
  generation: u64,
  timestamp: u64,
  state_hash: String,
  description: String,
  installations: Vec<InstallationStatus>,
  store_entries: usize,
  store_usage_bytes: u64,
}

pub fn cmd_status(args: &GlobalArgs, output: OutputFormat) -> Result<()> {
  let workspace = Workspace::load_or_default(args)?;

  let Some(generation) = workspace.generations.current()? else {
    if output.is_json() {
      return print_json(&serde_json::Value::Null);
    }
    print_info("No current generation. Run 'aggon switch' to create one.");
    return Ok(());
  };

  let (store_entries, store_usage_bytes) = workspace
    .store
    .list_entries()
    .fold((0, 0), |(count, bytes), entry| (count + 1, bytes + entry.size));

  let status = StatusOutput {
    generation: generation.id,
    timestamp: generation.timestamp,
    state_hash: generation.state_hash.clone(),
    description: generation.description.clone(),
    installations: installation_status(&generation),
    store_entries,
    store_usage_bytes,
  };

  if output.is_json() {
    return print_json(&status);
  }

  print_success(&format!("Current generation: {}", status.generation));
  print_stat("Created", &format_timestamp(status.timestamp));
  print_stat("State hash", truncate_hash(&status.state_hash));
  if !status.description.is_empty() {
    print_stat("Description", &status.description);
  }

  for install in &status.installations {
    println!();
    println!("{} ({})", install.name, install.path);
    print_stat("Addons", &install.addons.to_string());
    for missing in &install.missing_links {
      print_warning(&format!("  link missing: {}", missing));
    }
    if args.verbose
      && let Some(state) = generation.installations.get(&install.name)
    {
      for addon in state.addons.values() {
        println!("  {} {} ({})", symbols::INFO, addon.id, truncate_hash(addon.hash.as_str()));
      }
    }
  }

  println!();
  print_stat("Store entries", &status.store_entries.to_string());
  print_stat("Store usage", &format_bytes(status.store_usage_bytes));
  Ok(())
}

fn installation_status(generation: &Generation) -> Vec<InstallationStatus> {
  generation
    .installations
    .iter()
    .map(|(name, state)| InstallationStatus {
      name: name.clone(),
      path: state.path.display().to_string(),
      addons: state.addons.len(),
      missing_links: state
        .addons
        .values()
        .filter(|addon| !is_link(&addon.install_path))
        .map(|addon| addon.install_path.display().to_string())
        .collect(),
    })
    .collect()
}
