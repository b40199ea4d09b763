use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::hash::ContentHash;

/// What a store entry holds on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
  /// A single immutable file holding the exact fetched bytes.
  Blob,
  /// A directory unpacked from an archive blob.
  Tree,
}

/// Metadata record for one stored content hash.
///
/// Only `accessed_at` and the source fields change after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreEntry {
  pub hash: ContentHash,
  pub size: u64,
  pub kind: EntryKind,
  #[serde(default)]
  pub source_url: String,
  #[serde(default)]
  pub source_ref: String,
  pub created_at: u64,
  pub accessed_at: u64,
  pub path: PathBuf,
}

/// Provenance recorded alongside new content.
#[derive(Debug, Clone, Default)]
pub struct AddHint {
  pub source_url: String,
  pub source_ref: String,
}

impl AddHint {
  pub fn new(source_url: impl Into<String>, source_ref: impl Into<String>) -> Self {
    Self {
      source_url: source_url.into(),
      source_ref: source_ref.into(),
    }
  }
}

/// Outcome of a store sweep.
#[derive(Debug, Default, Clone, Serialize)]
pub struct StoreGcStats {
  pub entries_scanned: usize,
  pub entries_deleted: usize,
  pub bytes_freed: u64,
  pub index_entries_removed: usize,
  pub staging_removed: usize,
  pub deleted: Vec<ContentHash>,
  pub deleted_paths: Vec<PathBuf>,
}

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("store entry not found: {0}")]
  NotFound(String),

  #[error("store entry {0} is an unpacked tree, not a blob")]
  NotABlob(ContentHash),

  #[error("invalid content hash: {0:?}")]
  InvalidHash(String),

  #[error("I/O error at '{path}': {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("corrupt store record '{path}': {source}")]
  Corrupt {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("failed to unpack archive {hash}: {message}")]
  Archive { hash: ContentHash, message: String },

  #[error("archive {hash} contains an entry outside its root: {entry}")]
  UnsafeEntry { hash: ContentHash, entry: String },

  #[error("failed to hash unpacked tree: {0}")]
  TreeHash(#[from] crate::util::hash::DirHashError),
}

impl StoreError {
  pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> StoreError {
    let path = path.into();
    move |source| StoreError::Io { path, source }
  }
}
