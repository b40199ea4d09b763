//! SHA-256 helpers for the content store and generation records.
//!
//! - [`ContentHash`]: full 64-character digest identifying stored content
//! - [`short_hash`]: truncated digest of a serializable value (descriptors, state)
//! - [`hash_directory`]: deterministic digest of an unpacked tree

use std::fs;
use std::io::{self, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::consts::SHORT_HASH_LEN;

/// Full lowercase hex SHA-256 digest of stored content.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(pub String);

impl ContentHash {
  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// Returns true if `s` looks like a full SHA-256 hex digest.
  pub fn is_valid(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
  }
}

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl From<&str> for ContentHash {
  fn from(s: &str) -> Self {
    ContentHash(s.to_string())
  }
}

/// Streaming SHA-256 over anything that implements [`Read`].
pub struct HashingReader<R> {
  inner: R,
  hasher: Sha256,
  bytes: u64,
}

impl<R: Read> HashingReader<R> {
  pub fn new(inner: R) -> Self {
    Self {
      inner,
      hasher: Sha256::new(),
      bytes: 0,
    }
  }

  /// Consume the reader, returning the digest and number of bytes read.
  pub fn finish(self) -> (ContentHash, u64) {
    (ContentHash(hex::encode(self.hasher.finalize())), self.bytes)
  }
}

impl<R: Read> Read for HashingReader<R> {
  fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
    let n = self.inner.read(buf)?;
    self.hasher.update(&buf[..n]);
    self.bytes += n as u64;
    Ok(n)
  }
}

/// Truncated SHA-256 of the JSON serialization of `value`.
///
/// Callers must use ordered maps so the serialization is canonical.
pub fn short_hash<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
  let serialized = serde_json::to_vec(value)?;
  let full = hash_bytes(&serialized);
  Ok(full.0[..SHORT_HASH_LEN].to_string())
}

/// Error during directory hashing.
#[derive(Debug, thiserror::Error)]
pub enum DirHashError {
  #[error("failed to walk directory: {0}")]
  WalkDir(#[from] walkdir::Error),

  #[error("failed to read {path}: {source}")]
  Read {
    path: String,
    #[source]
    source: io::Error,
  },
}

/// Compute a deterministic hash of a directory's contents.
///
/// File contents, directory structure and symlink targets take part; timestamps
/// and permissions do not. Relative paths are joined with `/` on every platform.
pub fn hash_directory(path: &Path) -> Result<ContentHash, DirHashError> {
  let mut lines: Vec<String> = Vec::new();

  for entry in WalkDir::new(path).sort_by_file_name() {
    let entry = entry?;
    let entry_path = entry.path();

    let rel = match entry_path.strip_prefix(path) {
      Ok(rel) if !rel.as_os_str().is_empty() => rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/"),
      _ => continue,
    };

    let file_type = entry.file_type();
    if file_type.is_file() {
      lines.push(format!("F:{}:{}", rel, hash_file(entry_path)?));
    } else if file_type.is_dir() {
      lines.push(format!("D:{}", rel));
    } else if file_type.is_symlink() {
      let target = fs::read_link(entry_path).map_err(|source| DirHashError::Read {
        path: entry_path.display().to_string(),
        source,
      })?;
      lines.push(format!("L:{}:{}", rel, hash_bytes(target.to_string_lossy().as_bytes())));
    }
  }

  lines.sort();

  let mut hasher = Sha256::new();
  for line in lines {
    hasher.update(line.as_bytes());
    hasher.update(b"\n");
  }

  Ok(ContentHash(hex::encode(hasher.finalize())))
}

/// Hash a file's contents.
pub fn hash_file(path: &Path) -> Result<ContentHash, DirHashError> {
  let file = fs::File::open(path).map_err(|source| DirHashError::Read {
    path: path.display().to_string(),
    source,
  })?;

  let mut reader = HashingReader::new(file);
  io::copy(&mut reader, &mut io::sink()).map_err(|source| DirHashError::Read {
    path: path.display().to_string(),
    source,
  })?;

  Ok(reader.finish().0)
}

/// Hash arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
  ContentHash(hex::encode(Sha256::digest(data)))
}
