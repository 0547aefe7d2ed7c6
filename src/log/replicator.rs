//! Per-session replication task.
//!
//! Listens on the log's pubsub topic, swaps heads with peers as they join,
//! and pulls in entries behind any heads it has not seen. The task holds a
//! weak reference so dropping every handle ends it.

use super::entry::Entry;
use super::handle::HandleInner;
use crate::error::Result;
use crate::net::{PubsubMessage, Subscription};
use crate::replication::{LogEvent, Progress};
use crate::types::{EntryHash, PeerIdentity};
use hashbrown::HashSet;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;

pub(super) fn spawn(
  inner: Weak<HandleInner>,
  cancel: CancellationToken,
  mut subscription: Subscription,
) {
  tokio::spawn(async move {
    loop {
      let message = tokio::select! {
        _ = cancel.cancelled() => break,
        message = subscription.receiver.recv() => match message {
          Some(message) => message,
          None => break,
        },
      };

      let Some(inner) = inner.upgrade() else {
        break;
      };
      if let Err(error) = handle_message(&inner, message).await {
        tracing::warn!(session = inner.session, %error, "replication message failed");
      }
    }
    tracing::debug!(topic = %subscription.topic, "replication task stopped");
  });
}

async fn handle_message(inner: &Arc<HandleInner>, message: PubsubMessage) -> Result<()> {
  match message {
    PubsubMessage::Joined { peer } => {
      inner.emit(LogEvent::PeerConnected { peer });
      let heads = inner.oplog.lock().await.heads();
      inner.node.pubsub_send(
        &inner.address.topic(),
        &peer,
        PubsubMessage::Heads {
          from: inner.identity(),
          heads,
          exchange: true,
        },
      );
      Ok(())
    }
    PubsubMessage::Left { peer } => {
      inner.emit(LogEvent::PeerDisconnected { peer });
      Ok(())
    }
    PubsubMessage::Heads {
      from,
      heads,
      exchange,
    } => {
      if exchange {
        inner.emit(LogEvent::PeerExchanged {
          peer: from,
          address: inner.address.clone(),
          heads: heads.clone(),
        });
      }
      replicate(inner, from, heads).await
    }
  }
}

/// Fetch everything behind `heads` that this session lacks and merge it.
/// Once `Replicate` is out, `Replicated` follows unless the session closed,
/// so a failed fetch still ends the monitor's session.
async fn replicate(inner: &Arc<HandleInner>, peer: PeerIdentity, heads: Vec<EntryHash>) -> Result<()> {
  let (missing, base) = {
    let oplog = inner.oplog.lock().await;
    let missing: VecDeque<EntryHash> = heads
      .into_iter()
      .filter(|hash| !oplog.contains(hash))
      .collect();
    (missing, oplog.len() as u64)
  };
  if missing.is_empty() {
    return Ok(());
  }

  let address = inner.address.clone();
  inner.emit(LogEvent::Replicate {
    address: address.clone(),
    peer,
  });

  let merged = fetch_and_merge(inner, peer, missing, base).await;
  if matches!(merged, Ok(Outcome::Cancelled)) {
    return Ok(());
  }

  let length = inner.oplog.lock().await.len() as u64;
  inner.emit(LogEvent::Replicated {
    address,
    peer,
    length,
  });
  merged.map(|_| ())
}

enum Outcome {
  Merged,
  Cancelled,
}

async fn fetch_and_merge(
  inner: &Arc<HandleInner>,
  peer: PeerIdentity,
  mut queue: VecDeque<EntryHash>,
  base: u64,
) -> Result<Outcome> {
  let address = &inner.address;
  let mut seen: HashSet<EntryHash> = HashSet::new();
  let mut fetched: Vec<Entry> = Vec::new();

  while let Some(hash) = queue.pop_front() {
    if inner.cancel.is_cancelled() {
      return Ok(Outcome::Cancelled);
    }
    if !seen.insert(hash) {
      continue;
    }

    let Some(bytes) = inner.node.fetch_block(&hash).await? else {
      tracing::warn!(session = inner.session, peer = %peer.short(), entry = %hash.short(), "entry unavailable on the network");
      continue;
    };
    let entry = Entry::decode(&bytes)?;
    if entry.log_id != address.root() {
      tracing::warn!(session = inner.session, peer = %peer.short(), entry = %hash.short(), "peer sent entry of another log");
      continue;
    }

    {
      let oplog = inner.oplog.lock().await;
      for predecessor in &entry.next {
        if !oplog.contains(predecessor) && !seen.contains(predecessor) {
          queue.push_back(*predecessor);
        }
      }
    }
    fetched.push(entry);

    let current = base + fetched.len() as u64;
    inner.emit(LogEvent::ReplicateProgress {
      address: address.clone(),
      peer,
      hash,
      progress: Progress::new(current, current + queue.len() as u64),
    });
  }

  // Lamport clocks order every entry after its predecessors.
  fetched.sort_by(|left, right| {
    left
      .clock
      .cmp(&right.clock)
      .then_with(|| left.hash.cmp(&right.hash))
  });

  let mut oplog = inner.oplog.lock().await;
  if inner.cancel.is_cancelled() {
    return Ok(Outcome::Cancelled);
  }
  for entry in fetched {
    let hash = entry.hash;
    if oplog.insert(entry)? {
      inner.emit(LogEvent::Write {
        address: address.clone(),
        entry: hash,
        heads: oplog.heads(),
      });
    }
  }
  let heads = oplog.heads();
  inner.record_heads(&oplog, heads).await?;
  Ok(Outcome::Merged)
}
