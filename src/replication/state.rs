//! Replication lifecycle state and the fold that drives it.
//!
//! `ReplicationState::apply` is the only mutation path. Events that do not
//! fit the current state are rejected as [`AnomalousNotification`]s and leave
//! the state untouched apart from the anomaly counter.

use super::events::{LogEvent, Progress};
use crate::types::{EntryHash, LogAddress, PeerIdentity};
use indexmap::IndexSet;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LifecycleState {
  #[default]
  Created,
  Loading,
  Ready,
  Replicating,
  Closed,
}

impl fmt::Display for LifecycleState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      LifecycleState::Created => "created",
      LifecycleState::Loading => "loading",
      LifecycleState::Ready => "ready",
      LifecycleState::Replicating => "replicating",
      LifecycleState::Closed => "closed",
    };
    f.write_str(name)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnomalyKind {
  /// The event is not valid in the current lifecycle state.
  InvalidTransition,
  /// A progress counter went backwards.
  RegressingProgress,
  /// Progress or completion for a replication session that is not open.
  UnknownSession,
  /// A peer event for a peer that never connected.
  UnknownPeer,
  /// A write whose head set omits the written entry.
  MalformedWrite,
  /// The monitor fell behind and events were dropped before reaching it.
  MissedEvents,
}

impl fmt::Display for AnomalyKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      AnomalyKind::InvalidTransition => "invalid transition",
      AnomalyKind::RegressingProgress => "regressing progress",
      AnomalyKind::UnknownSession => "unknown session",
      AnomalyKind::UnknownPeer => "unknown peer",
      AnomalyKind::MalformedWrite => "malformed write",
      AnomalyKind::MissedEvents => "missed events",
    };
    f.write_str(name)
  }
}

/// An event the monitor refused to apply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("anomalous {event} notification ({kind}): {detail}")]
pub struct AnomalousNotification {
  pub kind: AnomalyKind,
  pub event: &'static str,
  pub detail: String,
}

impl AnomalousNotification {
  fn new(kind: AnomalyKind, event: &LogEvent, detail: impl Into<String>) -> Self {
    Self {
      kind,
      event: event.name(),
      detail: detail.into(),
    }
  }
}

/// What happened to an event that was not anomalous.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
  Changed,
  /// Arrived after `Closed`; ignored.
  Discarded,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicationState {
  pub lifecycle: LifecycleState,
  pub connected_peers: BTreeSet<PeerIdentity>,
  pub exchanged_peers: BTreeSet<PeerIdentity>,
  pub last_replicated_hash: Option<EntryHash>,
  pub load_progress: Progress,
  /// Open replication sessions and their latest progress.
  pub sessions: BTreeMap<(LogAddress, PeerIdentity), Progress>,
  /// Every head ever reported by a write, in first-seen order.
  pub last_write_heads: IndexSet<EntryHash>,
  pub anomalies: u64,
  pub last_anomaly: Option<AnomalousNotification>,
  /// Events dropped between a log and this state.
  pub missed_events: u64,
}

impl ReplicationState {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn is_closed(&self) -> bool {
    self.lifecycle == LifecycleState::Closed
  }

  /// Min current and max total across open sessions, or `None` when no
  /// replication is in flight.
  pub fn aggregate_progress(&self) -> Option<Progress> {
    let mut sessions = self.sessions.values();
    let first = *sessions.next()?;
    Some(sessions.fold(first, |acc, progress| {
      Progress::new(acc.current.min(progress.current), acc.total.max(progress.total))
    }))
  }

  pub fn session_progress(&self, address: &LogAddress, peer: &PeerIdentity) -> Option<Progress> {
    self.sessions.get(&(address.clone(), *peer)).copied()
  }

  /// Record a rejected event.
  pub fn record_anomaly(&mut self, anomaly: AnomalousNotification) {
    self.anomalies += 1;
    self.last_anomaly = Some(anomaly);
  }

  /// Account for `skipped` events that never arrived. Ignored once closed.
  pub fn record_missed(&mut self, skipped: u64) -> Applied {
    if self.is_closed() {
      return Applied::Discarded;
    }
    self.missed_events = self.missed_events.saturating_add(skipped);
    self.record_anomaly(AnomalousNotification {
      kind: AnomalyKind::MissedEvents,
      event: "lagged",
      detail: format!("{skipped} events dropped"),
    });
    Applied::Changed
  }

  pub fn apply(&mut self, event: &LogEvent) -> Result<Applied, AnomalousNotification> {
    if self.is_closed() {
      return Ok(Applied::Discarded);
    }

    match event {
      LogEvent::PeerConnected { peer } => {
        self.connected_peers.insert(*peer);
      }
      LogEvent::PeerDisconnected { peer } => {
        if !self.connected_peers.remove(peer) {
          return Err(AnomalousNotification::new(
            AnomalyKind::UnknownPeer,
            event,
            format!("peer {} was not connected", peer.short()),
          ));
        }
      }
      LogEvent::PeerExchanged { peer, .. } => {
        if !self.connected_peers.contains(peer) {
          return Err(AnomalousNotification::new(
            AnomalyKind::UnknownPeer,
            event,
            format!("heads from unconnected peer {}", peer.short()),
          ));
        }
        self.exchanged_peers.insert(*peer);
      }
      LogEvent::Load { .. } => {
        self.expect_lifecycle(event, &[LifecycleState::Created, LifecycleState::Ready])?;
        self.lifecycle = LifecycleState::Loading;
        self.load_progress = Progress::default();
      }
      LogEvent::LoadProgress { progress, .. } => {
        self.expect_lifecycle(event, &[LifecycleState::Loading])?;
        if progress.current < self.load_progress.current {
          return Err(AnomalousNotification::new(
            AnomalyKind::RegressingProgress,
            event,
            format!("load progress {} after {}", progress, self.load_progress),
          ));
        }
        self.load_progress = *progress;
      }
      LogEvent::Ready { entries, .. } => {
        self.expect_lifecycle(event, &[LifecycleState::Loading])?;
        self.lifecycle = LifecycleState::Ready;
        self.load_progress = Progress::new(*entries, *entries);
      }
      LogEvent::Replicate { address, peer } => {
        self.expect_lifecycle(event, &[LifecycleState::Ready, LifecycleState::Replicating])?;
        self.lifecycle = LifecycleState::Replicating;
        self
          .sessions
          .entry((address.clone(), *peer))
          .or_default();
      }
      LogEvent::ReplicateProgress {
        address,
        peer,
        hash,
        progress,
      } => {
        let Some(stored) = self.sessions.get_mut(&(address.clone(), *peer)) else {
          return Err(AnomalousNotification::new(
            AnomalyKind::UnknownSession,
            event,
            format!("no replication open with {} on {}", peer.short(), address),
          ));
        };
        if progress.current < stored.current {
          return Err(AnomalousNotification::new(
            AnomalyKind::RegressingProgress,
            event,
            format!("peer {} progress {} after {}", peer.short(), progress, stored),
          ));
        }
        *stored = *progress;
        self.last_replicated_hash = Some(*hash);
        self.load_progress = Progress::new(
          self.load_progress.current.max(progress.current),
          self.load_progress.total.max(progress.total),
        );
      }
      LogEvent::Replicated { address, peer, .. } => {
        if self.sessions.remove(&(address.clone(), *peer)).is_none() {
          return Err(AnomalousNotification::new(
            AnomalyKind::UnknownSession,
            event,
            format!("no replication open with {} on {}", peer.short(), address),
          ));
        }
        if self.sessions.is_empty() && self.lifecycle == LifecycleState::Replicating {
          self.lifecycle = LifecycleState::Ready;
        }
      }
      LogEvent::Write { entry, heads, .. } => {
        if !heads.contains(entry) {
          return Err(AnomalousNotification::new(
            AnomalyKind::MalformedWrite,
            event,
            format!("heads do not include written entry {}", entry.short()),
          ));
        }
        self.last_write_heads.extend(heads.iter().copied());
      }
      LogEvent::Closed { .. } => {
        self.lifecycle = LifecycleState::Closed;
        self.sessions.clear();
      }
    }

    Ok(Applied::Changed)
  }

  fn expect_lifecycle(
    &self,
    event: &LogEvent,
    allowed: &[LifecycleState],
  ) -> Result<(), AnomalousNotification> {
    if allowed.contains(&self.lifecycle) {
      Ok(())
    } else {
      Err(AnomalousNotification::new(
        AnomalyKind::InvalidTransition,
        event,
        format!("not valid while {}", self.lifecycle),
      ))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::{AnomalyKind, Applied, LifecycleState, ReplicationState};
  use crate::replication::{LogEvent, Progress};
  use crate::types::{EntryHash, LogAddress, LogName, PeerIdentity};

  fn address() -> LogAddress {
    LogAddress::new(EntryHash::digest(b"manifest"), LogName::new("alpha").expect("name"))
  }

  fn ready_state() -> ReplicationState {
    let mut state = ReplicationState::new();
    state
      .apply(&LogEvent::Load { address: address() })
      .expect("load");
    state
      .apply(&LogEvent::Ready {
        address: address(),
        heads: Vec::new(),
        entries: 2,
      })
      .expect("ready");
    state
  }

  fn progress(peer: PeerIdentity, current: u64, total: u64) -> LogEvent {
    LogEvent::ReplicateProgress {
      address: address(),
      peer,
      hash: EntryHash::digest(&current.to_le_bytes()),
      progress: Progress::new(current, total),
    }
  }

  #[test]
  fn load_cycle_seeds_progress() {
    let state = ready_state();
    assert_eq!(state.lifecycle, LifecycleState::Ready);
    assert_eq!(state.load_progress, Progress::new(2, 2));
  }

  #[test]
  fn regressing_replication_progress_is_rejected() {
    let peer = PeerIdentity::random();
    let mut state = ready_state();
    state
      .apply(&LogEvent::Replicate {
        address: address(),
        peer,
      })
      .expect("replicate");
    state.apply(&progress(peer, 3, 10)).expect("forward");

    let anomaly = state.apply(&progress(peer, 2, 10)).expect_err("regression");
    assert_eq!(anomaly.kind, AnomalyKind::RegressingProgress);
    assert_eq!(anomaly.event, "replicate.progress");
    assert_eq!(state.session_progress(&address(), &peer), Some(Progress::new(3, 10)));
    assert_eq!(state.load_progress, Progress::new(3, 10));
  }

  #[test]
  fn sessions_aggregate_and_close() {
    let (a, b) = (PeerIdentity::random(), PeerIdentity::random());
    let mut state = ready_state();
    for peer in [a, b] {
      state
        .apply(&LogEvent::Replicate {
          address: address(),
          peer,
        })
        .expect("replicate");
    }
    state.apply(&progress(a, 5, 8)).expect("a");
    state.apply(&progress(b, 3, 12)).expect("b");
    assert_eq!(state.lifecycle, LifecycleState::Replicating);
    assert_eq!(state.aggregate_progress(), Some(Progress::new(3, 12)));

    state
      .apply(&LogEvent::Replicated {
        address: address(),
        peer: a,
        length: 8,
      })
      .expect("a done");
    assert_eq!(state.lifecycle, LifecycleState::Replicating);
    state
      .apply(&LogEvent::Replicated {
        address: address(),
        peer: b,
        length: 12,
      })
      .expect("b done");
    assert_eq!(state.lifecycle, LifecycleState::Ready);
    assert_eq!(state.aggregate_progress(), None);
  }

  #[test]
  fn out_of_order_events_are_anomalous() {
    let peer = PeerIdentity::random();
    let mut state = ReplicationState::new();

    let anomaly = state
      .apply(&LogEvent::Replicate {
        address: address(),
        peer,
      })
      .expect_err("replicate before ready");
    assert_eq!(anomaly.kind, AnomalyKind::InvalidTransition);
    assert_eq!(state.lifecycle, LifecycleState::Created);

    let anomaly = state.apply(&progress(peer, 1, 1)).expect_err("no session");
    assert_eq!(anomaly.kind, AnomalyKind::UnknownSession);

    let anomaly = state
      .apply(&LogEvent::PeerExchanged {
        peer,
        address: address(),
        heads: Vec::new(),
      })
      .expect_err("unconnected");
    assert_eq!(anomaly.kind, AnomalyKind::UnknownPeer);
    assert!(state.exchanged_peers.is_empty());
  }

  #[test]
  fn peer_events_leave_lifecycle_alone() {
    let peer = PeerIdentity::random();
    let mut state = ready_state();
    state.apply(&LogEvent::PeerConnected { peer }).expect("connect");
    state
      .apply(&LogEvent::PeerExchanged {
        peer,
        address: address(),
        heads: Vec::new(),
      })
      .expect("exchange");
    state.apply(&LogEvent::PeerDisconnected { peer }).expect("disconnect");

    assert_eq!(state.lifecycle, LifecycleState::Ready);
    assert!(state.connected_peers.is_empty());
    assert!(state.exchanged_peers.contains(&peer));
  }

  #[test]
  fn writes_union_heads_and_check_membership() {
    let (x, y) = (EntryHash::digest(b"x"), EntryHash::digest(b"y"));
    let mut state = ReplicationState::new();
    state
      .apply(&LogEvent::Write {
        address: address(),
        entry: x,
        heads: vec![x],
      })
      .expect("x");
    state
      .apply(&LogEvent::Write {
        address: address(),
        entry: y,
        heads: vec![y],
      })
      .expect("y");
    assert_eq!(state.last_write_heads.iter().copied().collect::<Vec<_>>(), vec![x, y]);

    let anomaly = state
      .apply(&LogEvent::Write {
        address: address(),
        entry: EntryHash::digest(b"z"),
        heads: vec![x],
      })
      .expect_err("malformed");
    assert_eq!(anomaly.kind, AnomalyKind::MalformedWrite);
  }

  #[test]
  fn closed_state_discards_everything() {
    let mut state = ready_state();
    state
      .apply(&LogEvent::Closed { address: address() })
      .expect("close");
    let before = state.clone();

    let outcome = state
      .apply(&LogEvent::Load { address: address() })
      .expect("discarded");
    assert_eq!(outcome, Applied::Discarded);
    let outcome = state
      .apply(&LogEvent::PeerConnected {
        peer: PeerIdentity::random(),
      })
      .expect("discarded");
    assert_eq!(outcome, Applied::Discarded);
    assert_eq!(state, before);
  }

  #[test]
  fn missed_events_count_as_anomalies_until_closed() {
    let mut state = ready_state();
    assert_eq!(state.record_missed(7), Applied::Changed);
    assert_eq!(state.record_missed(3), Applied::Changed);
    assert_eq!(state.missed_events, 10);
    assert_eq!(state.anomalies, 2);
    assert_eq!(state.lifecycle, LifecycleState::Ready);
    assert_eq!(
      state.last_anomaly.as_ref().map(|anomaly| anomaly.kind),
      Some(AnomalyKind::MissedEvents)
    );

    state
      .apply(&LogEvent::Closed { address: address() })
      .expect("close");
    assert_eq!(state.record_missed(5), Applied::Discarded);
    assert_eq!(state.missed_events, 10);
  }
}
