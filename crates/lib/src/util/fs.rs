//! Filesystem helpers shared by the store and generation manager.
//!
//! Links are created with relative targets when both ends share a root so a
//! state directory can be moved without breaking installations.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

/// Current time as Unix seconds.
pub fn unix_now() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_secs())
    .unwrap_or(0)
}

/// Serialize `value` as pretty JSON and atomically replace `path`.
///
/// The temp file lives next to the destination so the rename stays on one
/// filesystem.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
  let parent = path.parent().unwrap_or_else(|| Path::new("."));
  fs::create_dir_all(parent)?;

  let content = serde_json::to_vec_pretty(value).map_err(io::Error::other)?;
  let mut temp = tempfile::NamedTempFile::new_in(parent)?;
  io::Write::write_all(&mut temp, &content)?;
  temp.as_file().sync_all()?;
  temp.persist(path).map_err(|e| e.error)?;
  Ok(())
}

/// Compute the path of `to` relative to the directory `from_dir`.
///
/// Returns `None` when the two paths do not share a root (different drives).
pub fn relative_path(from_dir: &Path, to: &Path) -> Option<PathBuf> {
  let from: Vec<Component> = from_dir.components().collect();
  let to_parts: Vec<Component> = to.components().collect();

  if from.first() != to_parts.first() {
    return None;
  }

  let common = from.iter().zip(to_parts.iter()).take_while(|(a, b)| a == b).count();

  let mut rel = PathBuf::new();
  for _ in common..from.len() {
    rel.push("..");
  }
  for part in &to_parts[common..] {
    rel.push(part.as_os_str());
  }
  Some(rel)
}

/// Canonicalize without the `\\?\` prefix on Windows.
///
/// Falls back to the path as given when it does not exist yet.
pub fn canonical(path: &Path) -> PathBuf {
  dunce::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Returns true if `path` is a symlink (or junction on Windows).
pub fn is_link(path: &Path) -> bool {
  match fs::symlink_metadata(path) {
    Ok(meta) if meta.file_type().is_symlink() => true,
    #[cfg(windows)]
    Ok(_) => junction::exists(path).unwrap_or(false),
    _ => false,
  }
}

/// Read the target of a symlink or junction.
pub fn read_link(path: &Path) -> Option<PathBuf> {
  if let Ok(target) = fs::read_link(path) {
    return Some(target);
  }
  #[cfg(windows)]
  if let Ok(target) = junction::get_target(path) {
    return Some(target);
  }
  None
}

/// Remove a link without following it.
pub fn remove_link(path: &Path) -> io::Result<()> {
  #[cfg(windows)]
  {
    // Directory symlinks and junctions are removed as directories on Windows.
    if fs::remove_dir(path).is_ok() {
      return Ok(());
    }
  }
  fs::remove_file(path)
}

/// Create a symlink at `link` pointing at `target`.
///
/// `target` may be relative to `link`'s parent directory. `is_dir` selects the
/// link flavour on Windows.
#[cfg(unix)]
pub fn create_link(target: &Path, link: &Path, _is_dir: bool) -> io::Result<()> {
  std::os::unix::fs::symlink(target, link)
}

/// Create a symlink at `link` pointing at `target`.
///
/// Directory targets fall back to a junction when symlinks need privileges
/// the process lacks.
#[cfg(windows)]
pub fn create_link(target: &Path, link: &Path, is_dir: bool) -> io::Result<()> {
  if !is_dir {
    return std::os::windows::fs::symlink_file(target, link);
  }

  if std::os::windows::fs::symlink_dir(target, link).is_ok() {
    return Ok(());
  }

  let absolute = if target.is_relative() {
    link.parent().map(|p| p.join(target)).unwrap_or_else(|| target.to_path_buf())
  } else {
    target.to_path_buf()
  };
  let absolute = dunce::canonicalize(&absolute)?;
  tracing::debug!(target = %absolute.display(), link = %link.display(), "falling back to junction");
  junction::create(&absolute, link)
}
