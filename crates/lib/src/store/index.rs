//! Descriptor index: remembers which content a source descriptor produced.
//!
//! Planning uses it to resolve an addon's target without fetching. The content
//! hash stays authoritative; a mapping whose content is gone resolves to nothing.

use std::fs;
use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{Store, StoreError};
use crate::util::fs::{unix_now, write_json_atomic};
use crate::util::hash::ContentHash;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorRecord {
  pub descriptor: String,
  pub hash: ContentHash,
  pub recorded_at: u64,
}

fn valid_descriptor(descriptor: &str) -> bool {
  !descriptor.is_empty() && descriptor.len() <= 64 && descriptor.bytes().all(|b| b.is_ascii_hexdigit())
}

impl Store {
  fn index_path(&self, descriptor: &str) -> PathBuf {
    self.index_dir().join(format!("{}.json", descriptor))
  }

  /// Remember that `descriptor` realized to `hash`.
  pub fn record_descriptor(&self, descriptor: &str, hash: &ContentHash) -> Result<(), StoreError> {
    if !valid_descriptor(descriptor) {
      return Err(StoreError::InvalidHash(descriptor.to_string()));
    }
    let record = DescriptorRecord {
      descriptor: descriptor.to_string(),
      hash: hash.clone(),
      recorded_at: unix_now(),
    };
    let path = self.index_path(descriptor);
    write_json_atomic(&path, &record).map_err(StoreError::io(&path))?;
    debug!(descriptor, hash = %hash, "recorded descriptor mapping");
    Ok(())
  }

  /// Content hash previously realized from `descriptor`, if still stored.
  pub fn resolve_descriptor(&self, descriptor: &str) -> Option<ContentHash> {
    if !valid_descriptor(descriptor) {
      return None;
    }
    let content = fs::read_to_string(self.index_path(descriptor)).ok()?;
    let record: DescriptorRecord = match serde_json::from_str(&content) {
      Ok(record) => record,
      Err(e) => {
        warn!(descriptor, error = %e, "ignoring unparseable descriptor mapping");
        return None;
      }
    };
    self.exists(&record.hash).then_some(record.hash)
  }

  /// Drop mappings whose content was deleted (or no longer exists).
  pub(super) fn sweep_index(&self, deleted: &[ContentHash], dry_run: bool) -> Result<usize, StoreError> {
    let dir = self.index_dir();
    let items = match fs::read_dir(&dir) {
      Ok(items) => items,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
      Err(e) => return Err(StoreError::Io { path: dir, source: e }),
    };

    let mut removed = 0;
    for item in items.flatten() {
      let path = item.path();
      let stale = match fs::read_to_string(&path)
        .ok()
        .and_then(|c| serde_json::from_str::<DescriptorRecord>(&c).ok())
      {
        Some(record) => deleted.contains(&record.hash) || (!dry_run && !self.exists(&record.hash)),
        None => true,
      };
      if !stale {
        continue;
      }
      removed += 1;
      if !dry_run && let Err(e) = fs::remove_file(&path) {
        warn!(path = %path.display(), error = %e, "failed to delete descriptor mapping");
      }
    }
    Ok(removed)
  }
}
