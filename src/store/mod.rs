//! Content-addressed block storage and the per-log heads cache.
//!
//! Blocks are immutable and keyed by the blake3 hash of their bytes. The
//! heads cache is the only mutable record: it remembers where each log's
//! causal history ended so `load` can start from there.

pub mod cache;
pub mod disk;
pub mod memory;

pub use cache::HeadsCache;
pub use disk::DiskContentStore;
pub use memory::MemoryContentStore;

use crate::error::Result;
use crate::types::EntryHash;

/// Local block store of a peer node.
pub trait ContentStore: Send + Sync {
  /// Store `bytes` and return their content hash. Storing the same bytes
  /// twice is a no-op.
  fn put(&self, bytes: &[u8]) -> Result<EntryHash>;

  /// Fetch a block, `Ok(None)` when it is not held locally.
  fn get(&self, hash: &EntryHash) -> Result<Option<Vec<u8>>>;

  fn has(&self, hash: &EntryHash) -> Result<bool> {
    Ok(self.get(hash)?.is_some())
  }

  /// Number of blocks held.
  fn len(&self) -> Result<usize>;

  fn is_empty(&self) -> Result<bool> {
    Ok(self.len()? == 0)
  }
}
