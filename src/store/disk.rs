//! Block store on local disk.
//!
//! Layout: `<root>/blocks/<first two hex chars>/<full hex hash>`. Each block
//! file holds the raw bytes; reads re-hash and reject files whose content no
//! longer matches their name.

use super::ContentStore;
use crate::error::{LogMeshError, Result};
use crate::types::EntryHash;
use crate::util::fs::write_atomic;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const BLOCKS_DIR_NAME: &str = "blocks";

#[derive(Debug, Clone)]
pub struct DiskContentStore {
  root: PathBuf,
}

impl DiskContentStore {
  pub fn open(root: impl AsRef<Path>) -> Result<Self> {
    let root = root.as_ref().join(BLOCKS_DIR_NAME);
    fs::create_dir_all(&root)?;
    Ok(Self { root })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn block_path(&self, hash: &EntryHash) -> PathBuf {
    let name = hash.to_string();
    self.root.join(&name[..2]).join(name)
  }
}

impl ContentStore for DiskContentStore {
  fn put(&self, bytes: &[u8]) -> Result<EntryHash> {
    let hash = EntryHash::digest(bytes);
    let path = self.block_path(&hash);
    if path.exists() {
      return Ok(hash);
    }
    match write_atomic(&path, bytes) {
      Ok(()) => Ok(hash),
      // Lost a race with a concurrent writer of the same block.
      Err(_) if path.exists() => Ok(hash),
      Err(error) => Err(error),
    }
  }

  fn get(&self, hash: &EntryHash) -> Result<Option<Vec<u8>>> {
    let bytes = match fs::read(self.block_path(hash)) {
      Ok(bytes) => bytes,
      Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
      Err(error) => return Err(error.into()),
    };

    if EntryHash::digest(&bytes) != *hash {
      return Err(LogMeshError::CorruptBlock(*hash));
    }
    Ok(Some(bytes))
  }

  fn has(&self, hash: &EntryHash) -> Result<bool> {
    Ok(self.block_path(hash).is_file())
  }

  fn len(&self) -> Result<usize> {
    let mut count = 0;
    for shard in fs::read_dir(&self.root)? {
      let shard = shard?;
      if !shard.file_type()?.is_dir() {
        continue;
      }
      for block in fs::read_dir(shard.path())? {
        let block = block?;
        let is_block = block
          .file_name()
          .to_str()
          .is_some_and(|name| name.len() == 64 && !name.ends_with(".tmp"));
        if is_block {
          count += 1;
        }
      }
    }
    Ok(count)
  }
}
