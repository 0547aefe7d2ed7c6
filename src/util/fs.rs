//! Durable file writes and advisory locks.

use crate::error::Result;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Write `bytes` to `path` via a synced temp file and rename, so readers
/// never observe a partial file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent)?;
  }

  let temp_path = temp_file_path(path);
  let mut file = OpenOptions::new()
    .create(true)
    .truncate(true)
    .write(true)
    .open(&temp_path)?;
  file.write_all(bytes)?;
  file.sync_all()?;
  fs::rename(&temp_path, path)?;
  sync_parent_dir(path.parent())?;
  Ok(())
}

pub fn temp_file_path(path: &Path) -> PathBuf {
  match path.extension().and_then(|extension| extension.to_str()) {
    Some(extension) => path.with_extension(format!("{extension}.tmp")),
    None => path.with_extension("tmp"),
  }
}

/// Run `f` while holding an exclusive lock on `lock_path`.
pub fn with_exclusive_lock<T>(lock_path: &Path, f: impl FnOnce() -> Result<T>) -> Result<T> {
  let lock_file = open_lock_file(lock_path)?;
  lock_file.lock_exclusive()?;

  let result = f();
  let unlock_result = fs2::FileExt::unlock(&lock_file);
  match (result, unlock_result) {
    (Ok(value), Ok(())) => Ok(value),
    (Ok(_), Err(error)) => Err(error.into()),
    (Err(error), _) => Err(error),
  }
}

/// Take a non-blocking exclusive lock held for as long as the returned file
/// lives. `Ok(None)` means another process holds it.
pub fn try_hold_lock(lock_path: &Path) -> Result<Option<File>> {
  let lock_file = open_lock_file(lock_path)?;
  match lock_file.try_lock_exclusive() {
    Ok(()) => Ok(Some(lock_file)),
    Err(error) if error.kind() == fs2::lock_contended_error().kind() => Ok(None),
    Err(error) => Err(error.into()),
  }
}

fn open_lock_file(lock_path: &Path) -> Result<File> {
  if let Some(parent) = lock_path.parent() {
    fs::create_dir_all(parent)?;
  }
  Ok(
    OpenOptions::new()
      .create(true)
      .truncate(false)
      .read(true)
      .write(true)
      .open(lock_path)?,
  )
}

fn sync_parent_dir(parent: Option<&Path>) -> Result<()> {
  #[cfg(unix)]
  {
    if let Some(parent) = parent {
      File::open(parent)?.sync_all()?;
    }
  }

  #[cfg(not(unix))]
  {
    let _ = parent;
  }

  Ok(())
}
