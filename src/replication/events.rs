//! Lifecycle notifications emitted by a log session.

use crate::types::{EntryHash, LogAddress, PeerIdentity};
use serde::{Deserialize, Serialize};
use std::fmt;

/// `(current, total)` counter pair for load and replication progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Progress {
  pub current: u64,
  pub total: u64,
}

impl Progress {
  pub const fn new(current: u64, total: u64) -> Self {
    Self { current, total }
  }

  pub fn is_complete(&self) -> bool {
    self.current >= self.total
  }
}

impl fmt::Display for Progress {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.current, self.total)
  }
}

/// One notification from a log session. Delivery is ordered within a
/// category but not across categories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
  PeerConnected {
    peer: PeerIdentity,
  },
  PeerDisconnected {
    peer: PeerIdentity,
  },
  /// A peer sent its heads directly after meeting on the log's topic.
  PeerExchanged {
    peer: PeerIdentity,
    address: LogAddress,
    heads: Vec<EntryHash>,
  },
  /// A peer started sending entries we do not have.
  Replicate {
    address: LogAddress,
    peer: PeerIdentity,
  },
  ReplicateProgress {
    address: LogAddress,
    peer: PeerIdentity,
    hash: EntryHash,
    progress: Progress,
  },
  /// The peer's entries have all been fetched and merged.
  Replicated {
    address: LogAddress,
    peer: PeerIdentity,
    length: u64,
  },
  Load {
    address: LogAddress,
  },
  LoadProgress {
    address: LogAddress,
    hash: EntryHash,
    progress: Progress,
  },
  /// Load finished; `entries` seeds the load progress.
  Ready {
    address: LogAddress,
    heads: Vec<EntryHash>,
    entries: u64,
  },
  /// An entry was accepted, locally or from a peer.
  Write {
    address: LogAddress,
    entry: EntryHash,
    heads: Vec<EntryHash>,
  },
  Closed {
    address: LogAddress,
  },
}

impl LogEvent {
  /// Category name, matching the conventional event names of the log
  /// protocol (`"replicate.progress"` and so on).
  pub fn name(&self) -> &'static str {
    match self {
      LogEvent::PeerConnected { .. } => "peer",
      LogEvent::PeerDisconnected { .. } => "peer.disconnected",
      LogEvent::PeerExchanged { .. } => "peer.exchanged",
      LogEvent::Replicate { .. } => "replicate",
      LogEvent::ReplicateProgress { .. } => "replicate.progress",
      LogEvent::Replicated { .. } => "replicated",
      LogEvent::Load { .. } => "load",
      LogEvent::LoadProgress { .. } => "load.progress",
      LogEvent::Ready { .. } => "ready",
      LogEvent::Write { .. } => "write",
      LogEvent::Closed { .. } => "closed",
    }
  }

  pub fn address(&self) -> Option<&LogAddress> {
    match self {
      LogEvent::PeerConnected { .. } | LogEvent::PeerDisconnected { .. } => None,
      LogEvent::PeerExchanged { address, .. }
      | LogEvent::Replicate { address, .. }
      | LogEvent::ReplicateProgress { address, .. }
      | LogEvent::Replicated { address, .. }
      | LogEvent::Load { address }
      | LogEvent::LoadProgress { address, .. }
      | LogEvent::Ready { address, .. }
      | LogEvent::Write { address, .. }
      | LogEvent::Closed { address } => Some(address),
    }
  }
}
