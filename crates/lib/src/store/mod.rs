//! Content-addressed store for fetched addon artifacts.
//!
//! Content is keyed only by its SHA-256 digest, so identical bytes collapse to
//! one entry regardless of where they were fetched from. Entries are never
//! modified after publication; only garbage collection removes them.
//!
//! # Layout
//!
//! ```text
//! {base}/
//! ├── store/
//! │   └── {hash[0:2]}/
//! │       └── {hash[2:]}        # blob file or unpacked tree directory
//! ├── metadata/
//! │   └── {hash}.json           # StoreEntry
//! ├── index/
//! │   └── {descriptor}.json     # descriptor -> content mapping
//! └── tmp/                      # staging on the same filesystem
//! ```

mod index;
mod types;
mod unpack;

pub use index::DescriptorRecord;
pub use types::{AddHint, EntryKind, StoreEntry, StoreError, StoreGcStats};

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::platform::paths::store_root;
use crate::util::fs::{canonical, create_link, is_link, relative_path, remove_link, unix_now, write_json_atomic};
use crate::util::hash::{ContentHash, HashingReader};

const OBJECTS_DIR: &str = "store";
const METADATA_DIR: &str = "metadata";
const INDEX_DIR: &str = "index";
const TMP_DIR: &str = "tmp";

/// Staging files younger than this are assumed to belong to an in-flight add.
const STALE_STAGING_SECS: u64 = 60 * 60;

/// Handle to an on-disk content store.
#[derive(Debug, Clone)]
pub struct Store {
  base: PathBuf,
}

impl Store {
  pub fn new(base: impl Into<PathBuf>) -> Self {
    Self { base: base.into() }
  }

  /// Store at the platform default location (honors `AGGON_ROOT`).
  pub fn default_store() -> Self {
    Self::new(store_root())
  }

  pub fn base_path(&self) -> &Path {
    &self.base
  }

  fn objects_dir(&self) -> PathBuf {
    self.base.join(OBJECTS_DIR)
  }

  fn metadata_dir(&self) -> PathBuf {
    self.base.join(METADATA_DIR)
  }

  fn index_dir(&self) -> PathBuf {
    self.base.join(INDEX_DIR)
  }

  fn tmp_dir(&self) -> PathBuf {
    self.base.join(TMP_DIR)
  }

  /// Create the store layout. Idempotent.
  pub fn initialize(&self) -> Result<(), StoreError> {
    for dir in [self.objects_dir(), self.metadata_dir(), self.index_dir(), self.tmp_dir()] {
      fs::create_dir_all(&dir).map_err(StoreError::io(&dir))?;
    }
    Ok(())
  }

  /// Path of the content for `hash`, fanned out by the first two hex characters.
  pub fn content_path(&self, hash: &ContentHash) -> PathBuf {
    let (prefix, rest) = hash.0.split_at(2.min(hash.0.len()));
    self.objects_dir().join(prefix).join(rest)
  }

  fn metadata_path(&self, hash: &ContentHash) -> PathBuf {
    self.metadata_dir().join(format!("{}.json", hash))
  }

  fn validate(hash: &ContentHash) -> Result<(), StoreError> {
    if ContentHash::is_valid(hash.as_str()) {
      Ok(())
    } else {
      Err(StoreError::InvalidHash(hash.0.clone()))
    }
  }

  /// Stream `reader` into the store and return its content hash.
  ///
  /// Bytes are written to a staging file while being hashed and then renamed
  /// into place, so a failure never leaves a partial entry. Adding content that
  /// is already present refreshes `accessed_at` and the supplied metadata.
  pub fn add<R: Read>(&self, reader: R, hint: &AddHint) -> Result<ContentHash, StoreError> {
    self.initialize()?;

    let tmp_dir = self.tmp_dir();
    let mut staged = tempfile::Builder::new()
      .prefix("blob-")
      .tempfile_in(&tmp_dir)
      .map_err(StoreError::io(&tmp_dir))?;

    let mut hashing = HashingReader::new(reader);
    io::copy(&mut hashing, staged.as_file_mut()).map_err(StoreError::io(staged.path()))?;
    staged.as_file().sync_all().map_err(StoreError::io(staged.path()))?;
    let (hash, size) = hashing.finish();

    let dest = self.content_path(&hash);
    if dest.exists() {
      debug!(hash = %hash, "content already stored");
      drop(staged);
      self.refresh_entry(&hash, EntryKind::Blob, size, hint)?;
      return Ok(hash);
    }

    if let Some(parent) = dest.parent() {
      fs::create_dir_all(parent).map_err(StoreError::io(parent))?;
    }
    staged.persist(&dest).map_err(|e| StoreError::Io {
      path: dest.clone(),
      source: e.error,
    })?;

    self.refresh_entry(&hash, EntryKind::Blob, size, hint)?;
    info!(hash = %hash, size, url = %hint.source_url, "added blob to store");
    Ok(hash)
  }

  /// Write or update the metadata record for `hash`.
  fn refresh_entry(&self, hash: &ContentHash, kind: EntryKind, size: u64, hint: &AddHint) -> Result<StoreEntry, StoreError> {
    let now = unix_now();
    let mut entry = match self.get_metadata(hash) {
      Ok(existing) => existing,
      Err(_) => StoreEntry {
        hash: hash.clone(),
        size,
        kind,
        source_url: String::new(),
        source_ref: String::new(),
        created_at: now,
        accessed_at: now,
        path: self.content_path(hash),
      },
    };

    entry.accessed_at = now;
    if !hint.source_url.is_empty() {
      entry.source_url = hint.source_url.clone();
    }
    if !hint.source_ref.is_empty() {
      entry.source_ref = hint.source_ref.clone();
    }

    let path = self.metadata_path(hash);
    write_json_atomic(&path, &entry).map_err(StoreError::io(&path))?;
    Ok(entry)
  }

  fn touch(&self, hash: &ContentHash) {
    match self.get_metadata(hash) {
      Ok(mut entry) => {
        entry.accessed_at = unix_now();
        let path = self.metadata_path(hash);
        if let Err(e) = write_json_atomic(&path, &entry) {
          warn!(hash = %hash, error = %e, "failed to update access time");
        }
      }
      Err(e) => warn!(hash = %hash, error = %e, "no metadata for stored content"),
    }
  }

  /// Open a stored blob for reading and record the access.
  pub fn get(&self, hash: &ContentHash) -> Result<File, StoreError> {
    Self::validate(hash)?;
    let path = self.content_path(hash);

    let meta = match fs::symlink_metadata(&path) {
      Ok(meta) => meta,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(StoreError::NotFound(hash.0.clone())),
      Err(e) => return Err(StoreError::Io { path, source: e }),
    };
    if meta.is_dir() {
      return Err(StoreError::NotABlob(hash.clone()));
    }

    let file = File::open(&path).map_err(StoreError::io(&path))?;
    self.touch(hash);
    Ok(file)
  }

  /// Whether content for `hash` is present. Has no side effects.
  pub fn exists(&self, hash: &ContentHash) -> bool {
    ContentHash::is_valid(hash.as_str()) && self.content_path(hash).exists()
  }

  /// Activate stored content at `target_path` through a symlink.
  ///
  /// Whatever occupies `target_path` is replaced if it is a link or a file.
  /// A real directory is only replaced when empty.
  pub fn link(&self, hash: &ContentHash, target_path: &Path) -> Result<(), StoreError> {
    Self::validate(hash)?;
    let content = self.content_path(hash);
    if !content.exists() {
      return Err(StoreError::NotFound(hash.0.clone()));
    }

    let parent = target_path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(StoreError::io(parent))?;

    if is_link(target_path) {
      remove_link(target_path).map_err(StoreError::io(target_path))?;
    } else if let Ok(meta) = fs::symlink_metadata(target_path) {
      if meta.is_dir() {
        fs::remove_dir(target_path).map_err(StoreError::io(target_path))?;
      } else {
        fs::remove_file(target_path).map_err(StoreError::io(target_path))?;
      }
    }

    let content = canonical(&content);
    let link_target = relative_path(&canonical(parent), &content).unwrap_or_else(|| content.clone());
    create_link(&link_target, target_path, content.is_dir()).map_err(StoreError::io(target_path))?;

    debug!(hash = %hash, link = %target_path.display(), target = %link_target.display(), "linked store content");
    Ok(())
  }

  /// Load the metadata record for `hash`.
  pub fn get_metadata(&self, hash: &ContentHash) -> Result<StoreEntry, StoreError> {
    Self::validate(hash)?;
    let path = self.metadata_path(hash);
    let content = match fs::read_to_string(&path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(StoreError::NotFound(hash.0.clone())),
      Err(e) => return Err(StoreError::Io { path, source: e }),
    };
    serde_json::from_str(&content).map_err(|source| StoreError::Corrupt { path, source })
  }

  /// Lazily iterate every recorded entry.
  ///
  /// Each call starts a fresh walk of the metadata directory; unreadable
  /// records are skipped.
  pub fn list_entries(&self) -> Entries {
    Entries {
      inner: fs::read_dir(self.metadata_dir()).ok(),
    }
  }

  /// Remove every entry whose hash is not in `live`.
  ///
  /// Descriptor mappings pointing at removed content and abandoned staging
  /// files go with it. With `dry_run` nothing is deleted.
  pub fn garbage_collect(&self, live: &HashSet<ContentHash>, dry_run: bool) -> Result<StoreGcStats, StoreError> {
    let mut stats = StoreGcStats::default();

    let objects = self.objects_dir();
    if objects.exists() {
      for prefix in fs::read_dir(&objects).map_err(StoreError::io(&objects))?.flatten() {
        let prefix_path = prefix.path();
        let Some(prefix_name) = prefix_path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
          continue;
        };
        if !prefix_path.is_dir() {
          continue;
        }

        for item in fs::read_dir(&prefix_path).map_err(StoreError::io(&prefix_path))?.flatten() {
          let path = item.path();
          let Some(rest) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
          };
          let hash = ContentHash(format!("{}{}", prefix_name, rest));
          stats.entries_scanned += 1;

          if live.contains(&hash) {
            continue;
          }

          let size = disk_usage(&path);
          if !dry_run {
            let removed = if path.is_dir() {
              fs::remove_dir_all(&path)
            } else {
              fs::remove_file(&path)
            };
            if let Err(e) = removed {
              warn!(path = %path.display(), error = %e, "failed to delete store entry");
              continue;
            }
            let meta = self.metadata_path(&hash);
            if let Err(e) = fs::remove_file(&meta)
              && e.kind() != io::ErrorKind::NotFound
            {
              warn!(path = %meta.display(), error = %e, "failed to delete store metadata");
            }
          }

          debug!(hash = %hash, size, dry_run, "removing unreferenced store entry");
          stats.entries_deleted += 1;
          stats.bytes_freed += size;
          stats.deleted.push(hash);
          stats.deleted_paths.push(path);
        }

        if !dry_run {
          // Only succeeds once the fan-out directory is empty.
          let _ = fs::remove_dir(&prefix_path);
        }
      }
    }

    self.sweep_orphan_metadata(dry_run)?;
    stats.index_entries_removed = self.sweep_index(&stats.deleted, dry_run)?;
    stats.staging_removed = self.sweep_staging(dry_run)?;

    info!(
      deleted = stats.entries_deleted,
      bytes_freed = stats.bytes_freed,
      dry_run,
      "store garbage collection complete"
    );
    Ok(stats)
  }

  fn sweep_orphan_metadata(&self, dry_run: bool) -> Result<(), StoreError> {
    if dry_run {
      return Ok(());
    }
    for entry in self.list_entries() {
      if !self.content_path(&entry.hash).exists() {
        let path = self.metadata_path(&entry.hash);
        debug!(hash = %entry.hash, "removing metadata without content");
        let _ = fs::remove_file(path);
      }
    }
    Ok(())
  }

  fn sweep_staging(&self, dry_run: bool) -> Result<usize, StoreError> {
    let tmp = self.tmp_dir();
    let Ok(items) = fs::read_dir(&tmp) else {
      return Ok(0);
    };

    let now = std::time::SystemTime::now();
    let mut removed = 0;
    for item in items.flatten() {
      let path = item.path();
      let age = item
        .metadata()
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| now.duration_since(modified).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0);
      if age < STALE_STAGING_SECS {
        continue;
      }

      removed += 1;
      if dry_run {
        continue;
      }
      let result = if path.is_dir() {
        fs::remove_dir_all(&path)
      } else {
        fs::remove_file(&path)
      };
      if let Err(e) = result {
        warn!(path = %path.display(), error = %e, "failed to delete staging file");
      }
    }
    Ok(removed)
  }
}

/// Iterator over recorded [`StoreEntry`] values.
pub struct Entries {
  inner: Option<fs::ReadDir>,
}

impl Iterator for Entries {
  type Item = StoreEntry;

  fn next(&mut self) -> Option<StoreEntry> {
    let dir = self.inner.as_mut()?;
    for item in dir.by_ref() {
      let Ok(item) = item else { continue };
      let path = item.path();
      if path.extension().and_then(|e| e.to_str()) != Some("json") {
        continue;
      }
      match fs::read_to_string(&path).map(|c| serde_json::from_str::<StoreEntry>(&c)) {
        Ok(Ok(entry)) => return Some(entry),
        Ok(Err(e)) => warn!(path = %path.display(), error = %e, "skipping unparseable store record"),
        Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable store record"),
      }
    }
    None
  }
}

/// Bytes used by a file or directory tree.
pub(crate) fn disk_usage(path: &Path) -> u64 {
  WalkDir::new(path)
    .into_iter()
    .filter_map(|e| e.ok())
    .filter(|e| e.file_type().is_file())
    .filter_map(|e| e.metadata().ok())
    .map(|m| m.len())
    .sum()
}
