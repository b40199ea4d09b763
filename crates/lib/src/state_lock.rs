//! File-based locking for mutual exclusion over a state directory.
//!
//! The CLI takes a non-blocking lock on the state root for commands that
//! mutate it; the generation manager takes a blocking exclusive lock while it
//! allocates an id.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::fs::unix_now;

pub const LOCK_FILENAME: &str = ".lock";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
  Shared,
  Exclusive,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LockMetadata {
  pub version: u32,
  pub pid: u32,
  pub started_at_unix: u64,
  pub command: String,
  pub dir: PathBuf,
}

#[derive(Debug, Error)]
pub enum StateLockError {
  #[error(
    "State is locked by another process: {command} (PID {pid}, started {started_at})\n\
     If you're sure no aggon process is running, remove the lock file:\n  {lock_path}"
  )]
  Contention {
    command: String,
    pid: u32,
    started_at: String,
    lock_path: PathBuf,
  },

  #[error(
    "State is locked (could not read lock metadata)\n\
     If you're sure no aggon process is running, remove the lock file:\n  {lock_path}"
  )]
  ContentionUnknown { lock_path: PathBuf },

  #[error("Failed to create state directory: {0}")]
  CreateDir(#[source] io::Error),

  #[error("Failed to open lock file: {0}")]
  OpenFile(#[source] io::Error),

  #[error("Failed to write lock metadata: {0}")]
  WriteMetadata(#[source] io::Error),

  #[error("Failed to acquire lock: {0}")]
  LockFailed(#[source] io::Error),
}

/// A held lock on `{dir}/.lock`, released on drop.
pub struct StateLock {
  file: File,
  lock_path: PathBuf,
}

impl StateLock {
  /// Try to lock `dir` without waiting.
  pub fn acquire(dir: &Path, mode: LockMode, command: &str) -> Result<Self, StateLockError> {
    let (file, lock_path) = open_lock_file(dir)?;

    if let Err(err) = lock_file(&file, mode, false) {
      if err.kind() == io::ErrorKind::WouldBlock {
        return Err(Self::read_contention_error(&lock_path));
      }
      return Err(StateLockError::LockFailed(err));
    }

    if mode == LockMode::Exclusive {
      Self::write_metadata(&file, command, dir)?;
    }

    Ok(StateLock { file, lock_path })
  }

  /// Lock `dir` exclusively, waiting for other holders to release it.
  pub fn wait_exclusive(dir: &Path, command: &str) -> Result<Self, StateLockError> {
    let (file, lock_path) = open_lock_file(dir)?;
    lock_file(&file, LockMode::Exclusive, true).map_err(StateLockError::LockFailed)?;
    Self::write_metadata(&file, command, dir)?;
    Ok(StateLock { file, lock_path })
  }

  /// Reads the lock metadata from the held file handle.
  ///
  /// Windows locks are mandatory, so a second handle could not read it.
  pub fn read_metadata(&self) -> io::Result<LockMetadata> {
    use std::io::{Seek, SeekFrom};

    let mut file = &self.file;
    file.seek(SeekFrom::Start(0))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    serde_json::from_str(&contents).map_err(io::Error::other)
  }

  fn write_metadata(file: &File, command: &str, dir: &Path) -> Result<(), StateLockError> {
    let metadata = LockMetadata {
      version: 1,
      pid: std::process::id(),
      started_at_unix: unix_now(),
      command: command.to_string(),
      dir: dir.to_path_buf(),
    };

    file.set_len(0).map_err(StateLockError::WriteMetadata)?;
    let mut writer = io::BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, &metadata)
      .map_err(|e| StateLockError::WriteMetadata(io::Error::other(e)))?;
    writer.flush().map_err(StateLockError::WriteMetadata)?;

    Ok(())
  }

  fn read_contention_error(lock_path: &Path) -> StateLockError {
    if let Ok(mut file) = File::open(lock_path) {
      let mut contents = String::new();
      if file.read_to_string(&mut contents).is_ok()
        && let Ok(metadata) = serde_json::from_str::<LockMetadata>(&contents)
      {
        let started_at = humanize_age(metadata.started_at_unix);

        return StateLockError::Contention {
          command: metadata.command,
          pid: metadata.pid,
          started_at,
          lock_path: lock_path.to_path_buf(),
        };
      }
    }

    StateLockError::ContentionUnknown {
      lock_path: lock_path.to_path_buf(),
    }
  }

  pub fn lock_path(&self) -> &Path {
    &self.lock_path
  }
}

fn humanize_age(started_at: u64) -> String {
  let age = unix_now().saturating_sub(started_at);
  format!("{}s ago", age)
}

fn open_lock_file(dir: &Path) -> Result<(File, PathBuf), StateLockError> {
  std::fs::create_dir_all(dir).map_err(StateLockError::CreateDir)?;
  let lock_path = dir.join(LOCK_FILENAME);

  let file = OpenOptions::new()
    .read(true)
    .write(true)
    .create(true)
    .truncate(false)
    .open(&lock_path)
    .map_err(StateLockError::OpenFile)?;

  Ok((file, lock_path))
}

#[cfg(unix)]
fn lock_file(file: &File, mode: LockMode, blocking: bool) -> io::Result<()> {
  use rustix::fs::{FlockOperation, flock};
  use std::os::unix::io::AsFd;

  let operation = match (mode, blocking) {
    (LockMode::Shared, false) => FlockOperation::NonBlockingLockShared,
    (LockMode::Exclusive, false) => FlockOperation::NonBlockingLockExclusive,
    (LockMode::Shared, true) => FlockOperation::LockShared,
    (LockMode::Exclusive, true) => FlockOperation::LockExclusive,
  };

  flock(file.as_fd(), operation).map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}

#[cfg(windows)]
fn lock_file(file: &File, mode: LockMode, blocking: bool) -> io::Result<()> {
  use std::os::windows::io::AsRawHandle;
  use windows_sys::Win32::Foundation::HANDLE;
  use windows_sys::Win32::Storage::FileSystem::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, LockFileEx};

  let handle = file.as_raw_handle() as HANDLE;
  let mut flags = if blocking { 0 } else { LOCKFILE_FAIL_IMMEDIATELY };
  if mode == LockMode::Exclusive {
    flags |= LOCKFILE_EXCLUSIVE_LOCK;
  }

  // SAFETY: OVERLAPPED is a plain data struct that is valid when zero-initialized.
  // LockFileEx is safe to call with a valid file handle and zeroed OVERLAPPED.
  let result = unsafe {
    let mut overlapped = std::mem::zeroed();
    LockFileEx(handle, flags, 0, 1, 0, &mut overlapped)
  };

  if result == 0 {
    let err = io::Error::last_os_error();
    // ERROR_LOCK_VIOLATION
    if err.raw_os_error() == Some(33) {
      return Err(io::Error::from(io::ErrorKind::WouldBlock));
    }
    Err(err)
  } else {
    Ok(())
  }
}
