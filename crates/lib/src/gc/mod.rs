//! Garbage collection: prune old generations, then unreferenced store content.

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::generation::{GenerationError, GenerationManager};
use crate::store::{Store, StoreError, StoreGcStats};

#[derive(Debug, Error)]
pub enum GcError {
  #[error(transparent)]
  Generation(#[from] GenerationError),

  #[error(transparent)]
  Store(#[from] StoreError),
}

#[derive(Debug, Default, Serialize)]
pub struct GcResult {
  pub dry_run: bool,
  /// Generations deleted (or that would be, in a dry run).
  pub generations_deleted: Vec<u64>,
  pub store: StoreGcStats,
}

impl GcResult {
  pub fn bytes_freed(&self) -> u64 {
    self.store.bytes_freed
  }

  pub fn deleted_paths(&self) -> &[PathBuf] {
    &self.store.deleted_paths
  }
}

/// Keep the current generation and the `keep` most recent ones, then sweep
/// store content no remaining generation references.
///
/// In a dry run nothing is deleted. Content referenced only by the
/// generations that would go is still counted as live.
pub fn collect_garbage(
  store: &Store,
  generations: &GenerationManager,
  keep: usize,
  dry_run: bool,
) -> Result<GcResult, GcError> {
  let generations_deleted = if dry_run {
    generations.gc_candidates(keep)?
  } else {
    generations.garbage_collect(keep)?
  };

  let live = generations.reachable_hashes()?;
  let store_stats = store.garbage_collect(&live, dry_run)?;

  info!(
    dry_run,
    generations = generations_deleted.len(),
    entries = store_stats.entries_deleted,
    bytes = store_stats.bytes_freed,
    "garbage collection complete"
  );

  Ok(GcResult {
    dry_run,
    generations_deleted,
    store: store_stats,
  })
}
