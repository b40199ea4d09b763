//! Unpacking zip blobs into tree entries.

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::{AddHint, EntryKind, Store, StoreError, disk_usage};
use crate::util::hash::{ContentHash, hash_directory};

const ZIP_MAGIC: [u8; 4] = [b'P', b'K', 0x03, 0x04];
const ZIP_EMPTY_MAGIC: [u8; 4] = [b'P', b'K', 0x05, 0x06];

/// Whether an archive path should be dropped according to `ignore`.
///
/// A pattern matches when it equals the file name, equals the relative path,
/// or occurs anywhere in the relative path.
pub fn is_ignored(relative: &str, ignore: &[String]) -> bool {
  let file_name = relative.rsplit('/').next().unwrap_or(relative);
  ignore
    .iter()
    .filter(|p| !p.is_empty())
    .any(|p| file_name == p || relative == p || relative.contains(p.as_str()))
}

impl Store {
  /// Whether the blob for `hash` is a zip archive.
  pub fn is_archive(&self, hash: &ContentHash) -> Result<bool, StoreError> {
    let path = self.content_path(hash);
    if path.is_dir() {
      return Ok(false);
    }
    let mut file = self.get(hash)?;
    let mut magic = [0u8; 4];
    match file.read_exact(&mut magic) {
      Ok(()) => Ok(magic == ZIP_MAGIC || magic == ZIP_EMPTY_MAGIC),
      Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
      Err(e) => Err(StoreError::Io { path, source: e }),
    }
  }

  /// Unpack the zip blob `archive` and store the result as a tree entry.
  ///
  /// A single root folder shared by every entry is stripped. Directories,
  /// dot-files and entries matching `ignore` are skipped. The tree is hashed
  /// in a staging directory and renamed into place.
  pub fn add_tree(&self, archive: &ContentHash, ignore: &[String], hint: &AddHint) -> Result<ContentHash, StoreError> {
    self.initialize()?;
    let file = self.get(archive)?;

    let tmp_dir = self.tmp_dir();
    let staging = tempfile::Builder::new()
      .prefix("tree-")
      .tempdir_in(&tmp_dir)
      .map_err(StoreError::io(&tmp_dir))?;

    let written = extract_zip(file, staging.path(), archive, ignore)?;
    let hash = hash_directory(staging.path())?;
    let dest = self.content_path(&hash);

    if dest.exists() {
      debug!(archive = %archive, tree = %hash, "tree already stored");
      self.refresh_entry(&hash, EntryKind::Tree, disk_usage(&dest), hint)?;
      return Ok(hash);
    }

    if let Some(parent) = dest.parent() {
      fs::create_dir_all(parent).map_err(StoreError::io(parent))?;
    }
    let staged = staging.keep();
    if let Err(e) = fs::rename(&staged, &dest) {
      let _ = fs::remove_dir_all(&staged);
      if !dest.exists() {
        return Err(StoreError::Io { path: dest, source: e });
      }
      debug!(tree = %hash, "tree published concurrently");
    }

    self.refresh_entry(&hash, EntryKind::Tree, disk_usage(&dest), hint)?;
    info!(archive = %archive, tree = %hash, files = written, "unpacked archive into store");
    Ok(hash)
  }
}

/// Common first path component shared by every entry, if any.
fn common_root<R: Read + io::Seek>(zip: &zip::ZipArchive<R>) -> Option<String> {
  let mut root: Option<&str> = None;
  for name in zip.file_names() {
    let (first, _) = name.split_once('/')?;
    if first.is_empty() {
      return None;
    }
    match root {
      None => root = Some(first),
      Some(r) if r == first => {}
      Some(_) => return None,
    }
  }
  root.map(str::to_string)
}

fn extract_zip(file: File, dest: &Path, archive: &ContentHash, ignore: &[String]) -> Result<usize, StoreError> {
  let archive_err = |e: zip::result::ZipError| StoreError::Archive {
    hash: archive.clone(),
    message: e.to_string(),
  };

  let mut zip = zip::ZipArchive::new(BufReader::new(file)).map_err(archive_err)?;
  let root = common_root(&zip);
  let mut written = 0;

  for i in 0..zip.len() {
    let mut entry = zip.by_index(i).map_err(archive_err)?;
    let name = entry.name().to_string();
    if entry.is_dir() {
      continue;
    }

    let enclosed = entry.enclosed_name().ok_or_else(|| StoreError::UnsafeEntry {
      hash: archive.clone(),
      entry: name.clone(),
    })?;

    let relative: PathBuf = match &root {
      Some(root) => enclosed.strip_prefix(root).map(Path::to_path_buf).unwrap_or(enclosed),
      None => enclosed,
    };
    if relative.as_os_str().is_empty() {
      continue;
    }

    let relative_str = relative
      .components()
      .map(|c| c.as_os_str().to_string_lossy())
      .collect::<Vec<_>>()
      .join("/");
    let file_name = relative_str.rsplit('/').next().unwrap_or(&relative_str);
    if file_name.starts_with('.') || is_ignored(&relative_str, ignore) {
      debug!(entry = %relative_str, "skipping archive entry");
      continue;
    }

    let out_path = dest.join(&relative);
    if let Some(parent) = out_path.parent() {
      fs::create_dir_all(parent).map_err(StoreError::io(parent))?;
    }
    let mut out = File::create(&out_path).map_err(StoreError::io(&out_path))?;
    io::copy(&mut entry, &mut out).map_err(StoreError::io(&out_path))?;
    written += 1;
  }

  Ok(written)
}
