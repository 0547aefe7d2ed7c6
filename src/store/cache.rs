//! Per-log heads cache.
//!
//! Each log address gets one small JSON envelope recording the heads a
//! session last saw. Several sessions of the same log may update it, so
//! writes merge with what is already there instead of overwriting.

use crate::error::{LogMeshError, Result};
use crate::types::{EntryHash, LogAddress};
use crate::util::fs::{with_exclusive_lock, write_atomic};
use hashbrown::HashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const HEADS_DIR_NAME: &str = "heads";
const HEADS_LOCK_FILE_NAME: &str = "heads.lock";
const HEADS_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HeadsEnvelope {
  version: u32,
  address: LogAddress,
  #[serde(default)]
  heads: Vec<EntryHash>,
}

#[derive(Debug)]
enum Backing {
  Memory(Mutex<HashMap<LogAddress, Vec<EntryHash>>>),
  Disk(PathBuf),
}

#[derive(Debug)]
pub struct HeadsCache {
  backing: Backing,
}

impl HeadsCache {
  pub fn memory() -> Self {
    Self {
      backing: Backing::Memory(Mutex::new(HashMap::new())),
    }
  }

  pub fn open(directory: impl AsRef<Path>) -> Result<Self> {
    let root = directory.as_ref().join(HEADS_DIR_NAME);
    fs::create_dir_all(&root)?;
    Ok(Self {
      backing: Backing::Disk(root),
    })
  }

  /// Heads last recorded for `address`; empty for a log never written here.
  pub fn load(&self, address: &LogAddress) -> Result<Vec<EntryHash>> {
    match &self.backing {
      Backing::Memory(map) => Ok(map.lock().get(address).cloned().unwrap_or_default()),
      Backing::Disk(root) => with_exclusive_lock(&root.join(HEADS_LOCK_FILE_NAME), || {
        read_heads_file(&heads_file_path(root, address), address)
      }),
    }
  }

  /// Record `heads` for `address`. Previously cached heads for which
  /// `known` returns false are kept: they come from another session and the
  /// caller has not seen them yet.
  pub fn update(
    &self,
    address: &LogAddress,
    heads: &[EntryHash],
    known: impl Fn(&EntryHash) -> bool,
  ) -> Result<()> {
    match &self.backing {
      Backing::Memory(map) => {
        let mut map = map.lock();
        let existing = map.get(address).cloned().unwrap_or_default();
        map.insert(address.clone(), merge_heads(heads, existing, known));
        Ok(())
      }
      Backing::Disk(root) => with_exclusive_lock(&root.join(HEADS_LOCK_FILE_NAME), || {
        let path = heads_file_path(root, address);
        let existing = read_heads_file(&path, address)?;
        write_heads_file(&path, address, merge_heads(heads, existing, known))
      }),
    }
  }
}

fn merge_heads(
  heads: &[EntryHash],
  existing: Vec<EntryHash>,
  known: impl Fn(&EntryHash) -> bool,
) -> Vec<EntryHash> {
  let mut merged = heads.to_vec();
  for head in existing {
    if !known(&head) && !merged.contains(&head) {
      merged.push(head);
    }
  }
  merged.sort();
  merged
}

fn heads_file_path(root: &Path, address: &LogAddress) -> PathBuf {
  root.join(format!("{}.json", address.root()))
}

fn read_heads_file(path: &Path, address: &LogAddress) -> Result<Vec<EntryHash>> {
  if !path.exists() {
    return Ok(Vec::new());
  }

  let bytes = fs::read(path)?;
  let envelope: HeadsEnvelope = serde_json::from_slice(&bytes)
    .map_err(|error| LogMeshError::Serialization(format!("decode heads envelope: {error}")))?;

  if envelope.version != HEADS_VERSION {
    return Err(LogMeshError::VersionMismatch {
      required: envelope.version,
      current: HEADS_VERSION,
    });
  }
  if envelope.address != *address {
    return Err(LogMeshError::InvalidAddress(format!(
      "heads cache for {} found at path of {}",
      envelope.address, address
    )));
  }

  Ok(envelope.heads)
}

fn write_heads_file(path: &Path, address: &LogAddress, heads: Vec<EntryHash>) -> Result<()> {
  let envelope = HeadsEnvelope {
    version: HEADS_VERSION,
    address: address.clone(),
    heads,
  };
  let bytes = serde_json::to_vec(&envelope)
    .map_err(|error| LogMeshError::Serialization(format!("encode heads envelope: {error}")))?;
  write_atomic(path, &bytes)
}
