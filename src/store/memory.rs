//! In-memory block store for ephemeral nodes and tests.

use super::ContentStore;
use crate::error::Result;
use crate::types::EntryHash;
use hashbrown::HashMap;
use parking_lot::RwLock;

#[derive(Debug, Default)]
pub struct MemoryContentStore {
  blocks: RwLock<HashMap<EntryHash, Vec<u8>>>,
}

impl MemoryContentStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl ContentStore for MemoryContentStore {
  fn put(&self, bytes: &[u8]) -> Result<EntryHash> {
    let hash = EntryHash::digest(bytes);
    self
      .blocks
      .write()
      .entry(hash)
      .or_insert_with(|| bytes.to_vec());
    Ok(hash)
  }

  fn get(&self, hash: &EntryHash) -> Result<Option<Vec<u8>>> {
    Ok(self.blocks.read().get(hash).cloned())
  }

  fn has(&self, hash: &EntryHash) -> Result<bool> {
    Ok(self.blocks.read().contains_key(hash))
  }

  fn len(&self) -> Result<usize> {
    Ok(self.blocks.read().len())
  }
}

#[cfg(test)]
mod tests {
  use super::MemoryContentStore;
  use crate::store::ContentStore;
  use crate::types::EntryHash;

  #[test]
  fn put_is_idempotent_and_content_addressed() {
    let store = MemoryContentStore::new();
    let first = store.put(b"payload").expect("put");
    let second = store.put(b"payload").expect("put again");

    assert_eq!(first, second);
    assert_eq!(first, EntryHash::digest(b"payload"));
    assert_eq!(store.len().expect("len"), 1);
    assert_eq!(store.get(&first).expect("get"), Some(b"payload".to_vec()));
    assert!(!store.has(&EntryHash::digest(b"other")).expect("has"));
  }
}
