//! Numbered, immutable generations and the `current` pointer.
//!
//! # Layout
//!
//! ```text
//! {base}/generations/
//! ├── .lock                    # held while allocating an id
//! ├── 1-1718000000/
//! │   └── generation.json
//! ├── 2-1718000600/
//! │   └── generation.json
//! └── current -> 2-1718000600  # swapped atomically
//! ```
//!
//! Generations move through `Created` (written, not current), `Current`,
//! `Superseded` and finally `Deleted`. The current generation can never be
//! deleted, and the pointer only ever names a fully written directory.

mod types;

pub use types::{Generation, GenerationError, InstallationState, InstalledAddon};

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::DeclarativeConfig;
use crate::platform::paths::generations_root;
use crate::state_lock::StateLock;
use crate::util::fs::{create_link, read_link, remove_link, unix_now, write_json_atomic};
use crate::util::hash::ContentHash;

const GENERATIONS_DIR: &str = "generations";
const GENERATION_FILE: &str = "generation.json";
const CURRENT_LINK: &str = "current";

#[derive(Debug, Clone)]
pub struct GenerationManager {
  base: PathBuf,
}

impl GenerationManager {
  pub fn new(base: impl Into<PathBuf>) -> Self {
    Self { base: base.into() }
  }

  /// Manager at the platform default location (honors `AGGON_ROOT`).
  pub fn default_manager() -> Self {
    Self::new(generations_root())
  }

  pub fn base_path(&self) -> &Path {
    &self.base
  }

  /// Directory holding the generation directories.
  pub fn dir(&self) -> PathBuf {
    self.base.join(GENERATIONS_DIR)
  }

  fn current_link(&self) -> PathBuf {
    self.dir().join(CURRENT_LINK)
  }

  pub fn initialize(&self) -> Result<(), GenerationError> {
    let dir = self.dir();
    fs::create_dir_all(&dir).map_err(GenerationError::storage(&dir))
  }

  /// All generation directories, ascending by id.
  fn scan(&self) -> Result<Vec<(u64, PathBuf)>, GenerationError> {
    let dir = self.dir();
    let entries = match fs::read_dir(&dir) {
      Ok(entries) => entries,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
      Err(e) => return Err(GenerationError::Storage { path: dir, source: e }),
    };

    let mut found: Vec<(u64, PathBuf)> = entries
      .flatten()
      .filter_map(|entry| {
        let name = entry.file_name();
        let id = parse_dir_name(name.to_str()?)?;
        entry.file_type().ok()?.is_dir().then(|| (id, entry.path()))
      })
      .collect();
    found.sort_by_key(|(id, _)| *id);
    Ok(found)
  }

  /// Directory of generation `id`.
  pub fn generation_path(&self, id: u64) -> Result<PathBuf, GenerationError> {
    self
      .scan()?
      .into_iter()
      .find(|(found, _)| *found == id)
      .map(|(_, path)| path)
      .ok_or(GenerationError::NotFound(id))
  }

  /// Allocate the next id and durably write a new generation with empty
  /// installations. The new generation is not made current.
  pub fn create(&self, config: &DeclarativeConfig, description: &str) -> Result<Generation, GenerationError> {
    self.initialize()?;
    let dir = self.dir();
    let _lock = StateLock::wait_exclusive(&dir, "generation create")?;

    let id = self.scan()?.last().map(|(id, _)| id + 1).unwrap_or(1);
    let installations = BTreeMap::new();
    let generation = Generation {
      id,
      timestamp: unix_now(),
      config: config.clone(),
      state_hash: Generation::compute_state_hash(config, &installations)?,
      description: description.to_string(),
      installations,
      complete: false,
    };

    let staging = tempfile::Builder::new()
      .prefix(".staging-")
      .tempdir_in(&dir)
      .map_err(GenerationError::storage(&dir))?;
    let record = staging.path().join(GENERATION_FILE);
    write_json_atomic(&record, &generation).map_err(GenerationError::storage(&record))?;

    let final_dir = dir.join(format!("{}-{}", generation.id, generation.timestamp));
    let staged = staging.keep();
    if let Err(e) = fs::rename(&staged, &final_dir) {
      let _ = fs::remove_dir_all(&staged);
      return Err(GenerationError::Storage {
        path: final_dir,
        source: e,
      });
    }

    info!(id, path = %final_dir.display(), "created generation");
    Ok(generation)
  }

  /// Replace the installations of a generation that is not current.
  ///
  /// This is the only write a generation receives after `create`, made by
  /// apply before promotion.
  pub fn record_installations(
    &self,
    generation: &mut Generation,
    installations: BTreeMap<String, InstallationState>,
  ) -> Result<(), GenerationError> {
    if self.current_id()? == Some(generation.id) {
      return Err(GenerationError::InvariantViolation(format!(
        "generation {} is current and cannot be modified",
        generation.id
      )));
    }

    let record = self.generation_path(generation.id)?.join(GENERATION_FILE);
    generation.state_hash = Generation::compute_state_hash(&generation.config, &installations)?;
    generation.installations = installations;
    write_json_atomic(&record, generation).map_err(GenerationError::storage(&record))?;

    debug!(id = generation.id, addons = generation.addon_count(), "recorded installations");
    Ok(())
  }

  /// Load generation `id`.
  pub fn get(&self, id: u64) -> Result<Generation, GenerationError> {
    let path = self.generation_path(id)?;
    read_generation(&path.join(GENERATION_FILE))
  }

  /// Id named by the `current` pointer, without loading the record.
  pub fn current_id(&self) -> Result<Option<u64>, GenerationError> {
    match self.resolve_current()? {
      Some((id, _)) => Ok(Some(id)),
      None => Ok(None),
    }
  }

  fn resolve_current(&self) -> Result<Option<(u64, PathBuf)>, GenerationError> {
    let link = self.current_link();
    if fs::symlink_metadata(&link).is_err() {
      return Ok(None);
    }

    let corrupt = |message: &str| GenerationError::Corrupt {
      path: link.clone(),
      message: message.to_string(),
    };

    let target = read_link(&link).ok_or_else(|| corrupt("current pointer is not a link"))?;
    let name = target
      .file_name()
      .and_then(|n| n.to_str())
      .ok_or_else(|| corrupt("current pointer has no target name"))?;
    let id = parse_dir_name(name).ok_or_else(|| corrupt("current pointer names an invalid generation"))?;

    let dir = self.dir().join(name);
    if !dir.is_dir() {
      return Err(corrupt("current pointer names a missing generation"));
    }
    Ok(Some((id, dir)))
  }

  /// Load the current generation.
  pub fn get_current(&self) -> Result<Generation, GenerationError> {
    let (_, dir) = self.resolve_current()?.ok_or(GenerationError::NoCurrent)?;
    read_generation(&dir.join(GENERATION_FILE)).map_err(|e| match e {
      GenerationError::Corrupt { .. } => e,
      other => GenerationError::Corrupt {
        path: dir.clone(),
        message: other.to_string(),
      },
    })
  }

  /// Load the current generation, treating "none yet" as `None`.
  pub fn current(&self) -> Result<Option<Generation>, GenerationError> {
    match self.get_current() {
      Ok(generation) => Ok(Some(generation)),
      Err(GenerationError::NoCurrent) => Ok(None),
      Err(e) => Err(e),
    }
  }

  /// Point `current` at generation `id` with a single atomic rename.
  pub fn set_current(&self, id: u64) -> Result<(), GenerationError> {
    let path = self.generation_path(id)?;
    read_generation(&path.join(GENERATION_FILE))?;

    let name = path
      .file_name()
      .map(PathBuf::from)
      .ok_or_else(|| GenerationError::Corrupt {
        path: path.clone(),
        message: "generation directory has no name".to_string(),
      })?;

    let dir = self.dir();
    let temp_link = dir.join(format!(".current-{}-{}", std::process::id(), unix_now()));
    if fs::symlink_metadata(&temp_link).is_ok() {
      remove_link(&temp_link).map_err(GenerationError::storage(&temp_link))?;
    }
    create_link(&name, &temp_link, true).map_err(GenerationError::storage(&temp_link))?;

    let link = self.current_link();
    if let Err(e) = replace_link(&temp_link, &link) {
      let _ = remove_link(&temp_link);
      return Err(GenerationError::Storage { path: link, source: e });
    }

    info!(id, "set current generation");
    Ok(())
  }

  /// All readable generations, ascending by id. Unreadable ones are skipped.
  pub fn list(&self) -> Result<Vec<Generation>, GenerationError> {
    let mut generations = Vec::new();
    for (id, path) in self.scan()? {
      match read_generation(&path.join(GENERATION_FILE)) {
        Ok(generation) => generations.push(generation),
        Err(e) => warn!(id, error = %e, "skipping unreadable generation"),
      }
    }
    Ok(generations)
  }

  /// Remove generation `id`. The current generation cannot be deleted.
  pub fn delete(&self, id: u64) -> Result<(), GenerationError> {
    if self.current_id()? == Some(id) {
      return Err(GenerationError::InvariantViolation(format!(
        "generation {} is current and cannot be deleted",
        id
      )));
    }

    let path = self.generation_path(id)?;
    fs::remove_dir_all(&path).map_err(GenerationError::storage(&path))?;
    info!(id, "deleted generation");
    Ok(())
  }

  /// Ids that `garbage_collect(keep)` would delete.
  pub fn gc_candidates(&self, keep: usize) -> Result<Vec<u64>, GenerationError> {
    let ids: Vec<u64> = self.scan()?.into_iter().map(|(id, _)| id).collect();
    let current = self.current_id()?;

    let retained: BTreeSet<u64> = ids.iter().rev().take(keep).copied().chain(current).collect();
    Ok(ids.into_iter().filter(|id| !retained.contains(id)).collect())
  }

  /// Keep the current generation and the `keep` most recent; delete the rest.
  pub fn garbage_collect(&self, keep: usize) -> Result<Vec<u64>, GenerationError> {
    let mut deleted = Vec::new();
    for id in self.gc_candidates(keep)? {
      match self.delete(id) {
        Ok(()) => deleted.push(id),
        Err(GenerationError::InvariantViolation(msg)) => debug!(id, %msg, "skipping current generation"),
        Err(e) => return Err(e),
      }
    }
    info!(deleted = deleted.len(), keep, "generation garbage collection complete");
    Ok(deleted)
  }

  /// Union of content hashes referenced by any existing generation.
  pub fn reachable_hashes(&self) -> Result<HashSet<ContentHash>, GenerationError> {
    let mut live = HashSet::new();
    for generation in self.list()? {
      live.extend(generation.content_hashes());
    }
    debug!(count = live.len(), "collected reachable content hashes");
    Ok(live)
  }
}

/// Parse `{id}-{timestamp}`.
fn parse_dir_name(name: &str) -> Option<u64> {
  let (id, timestamp) = name.split_once('-')?;
  timestamp.parse::<u64>().ok()?;
  id.parse::<u64>().ok().filter(|id| *id > 0)
}

fn read_generation(path: &Path) -> Result<Generation, GenerationError> {
  let content = fs::read_to_string(path).map_err(|e| GenerationError::Corrupt {
    path: path.to_path_buf(),
    message: e.to_string(),
  })?;
  serde_json::from_str(&content).map_err(|e| GenerationError::Corrupt {
    path: path.to_path_buf(),
    message: e.to_string(),
  })
}

#[cfg(unix)]
fn replace_link(from: &Path, to: &Path) -> io::Result<()> {
  fs::rename(from, to)
}

#[cfg(windows)]
fn replace_link(from: &Path, to: &Path) -> io::Result<()> {
  // Directory links cannot be renamed over each other on Windows.
  if fs::symlink_metadata(to).is_ok() {
    remove_link(to)?;
  }
  fs::rename(from, to)
}
