//! In-memory materialized view of one log.
//!
//! Merge is set union: entries are immutable and keyed by hash, so folding
//! the same entry twice is a no-op and insertion order does not matter. An
//! entry is a head while no known entry lists it in `next`.

use super::entry::Entry;
use crate::error::{LogMeshError, Result};
use crate::types::EntryHash;
use hashbrown::{HashMap, HashSet};
use std::collections::BTreeSet;

/// Ordering and bounds for [`Oplog::entries`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IteratorOptions {
  /// Keep only the newest `limit` entries.
  pub limit: Option<usize>,
  /// Newest first instead of oldest first.
  pub reverse: bool,
}

impl IteratorOptions {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn limit(mut self, limit: usize) -> Self {
    self.limit = Some(limit);
    self
  }

  pub fn reverse(mut self, reverse: bool) -> Self {
    self.reverse = reverse;
    self
  }
}

#[derive(Debug, Clone)]
pub struct Oplog {
  log_id: EntryHash,
  entries: HashMap<EntryHash, Entry>,
  referenced: HashSet<EntryHash>,
  heads: BTreeSet<EntryHash>,
  clock: u64,
}

impl Oplog {
  pub fn new(log_id: EntryHash) -> Self {
    Self {
      log_id,
      entries: HashMap::new(),
      referenced: HashSet::new(),
      heads: BTreeSet::new(),
      clock: 0,
    }
  }

  pub fn log_id(&self) -> EntryHash {
    self.log_id
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn contains(&self, hash: &EntryHash) -> bool {
    self.entries.contains_key(hash)
  }

  pub fn get(&self, hash: &EntryHash) -> Option<&Entry> {
    self.entries.get(hash)
  }

  /// Current heads, sorted.
  pub fn heads(&self) -> Vec<EntryHash> {
    self.heads.iter().copied().collect()
  }

  /// Highest Lamport time seen.
  pub fn clock(&self) -> u64 {
    self.clock
  }

  /// Fold `entry` into the view. Returns `false` if it was already known.
  pub fn insert(&mut self, entry: Entry) -> Result<bool> {
    if entry.log_id != self.log_id {
      return Err(LogMeshError::InvalidEntry(format!(
        "entry {} belongs to log {}, not {}",
        entry.hash.short(),
        entry.log_id.short(),
        self.log_id.short()
      )));
    }
    if self.entries.contains_key(&entry.hash) {
      return Ok(false);
    }

    for predecessor in &entry.next {
      self.referenced.insert(*predecessor);
      self.heads.remove(predecessor);
    }
    if !self.referenced.contains(&entry.hash) {
      self.heads.insert(entry.hash);
    }
    self.clock = self.clock.max(entry.clock);
    self.entries.insert(entry.hash, entry);
    Ok(true)
  }

  /// Entries in causal display order: Lamport time, then author, then hash.
  pub fn entries(&self, options: IteratorOptions) -> Vec<Entry> {
    let mut ordered: Vec<&Entry> = self.entries.values().collect();
    ordered.sort_by(|left, right| {
      left
        .clock
        .cmp(&right.clock)
        .then_with(|| left.identity.cmp(&right.identity))
        .then_with(|| left.hash.cmp(&right.hash))
    });

    if let Some(limit) = options.limit {
      let skip = ordered.len().saturating_sub(limit);
      ordered.drain(..skip);
    }
    if options.reverse {
      ordered.reverse();
    }

    ordered.into_iter().cloned().collect()
  }
}
