use super::PeerEvent;
use crate::error::{LogMeshError, Result};
use crate::store::ContentStore;
use crate::types::{EntryHash, PeerIdentity};
use hashbrown::HashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

/// Message delivered to a pubsub subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PubsubMessage {
  /// A different peer subscribed to the topic.
  Joined { peer: PeerIdentity },
  /// A peer dropped its last subscription to the topic.
  Left { peer: PeerIdentity },
  /// Heads sent by another session. `exchange` marks the direct swap
  /// performed when two peers meet on a topic.
  Heads {
    from: PeerIdentity,
    heads: Vec<EntryHash>,
    exchange: bool,
  },
}

/// Receiving half of a topic subscription.
#[derive(Debug)]
pub struct Subscription {
  pub id: u64,
  pub topic: String,
  pub receiver: mpsc::UnboundedReceiver<PubsubMessage>,
}

struct PeerSlot {
  store: Arc<dyn ContentStore>,
  events: broadcast::Sender<PeerEvent>,
}

struct Subscriber {
  id: u64,
  peer: PeerIdentity,
  sender: mpsc::UnboundedSender<PubsubMessage>,
}

#[derive(Default)]
struct SwarmInner {
  peers: RwLock<HashMap<PeerIdentity, PeerSlot>>,
  topics: RwLock<HashMap<String, Vec<Subscriber>>>,
  next_subscription: AtomicU64,
}

/// Shared network all nodes of one process attach to. Cheap to clone.
#[derive(Clone, Default)]
pub struct Swarm {
  inner: Arc<SwarmInner>,
}

impl std::fmt::Debug for Swarm {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Swarm")
      .field("peers", &self.inner.peers.read().len())
      .field("topics", &self.inner.topics.read().len())
      .finish()
  }
}

impl Swarm {
  pub fn new() -> Self {
    Self::default()
  }

  /// Bring `peer` online. Every node already online learns about it and it
  /// learns about each of them.
  pub(crate) fn join(
    &self,
    peer: PeerIdentity,
    store: Arc<dyn ContentStore>,
    events: broadcast::Sender<PeerEvent>,
  ) -> Result<()> {
    let mut peers = self.inner.peers.write();
    if peers.contains_key(&peer) {
      return Err(LogMeshError::Internal(format!(
        "peer {} is already online",
        peer.short()
      )));
    }

    for (other, slot) in peers.iter() {
      let _ = slot.events.send(PeerEvent::Connected(peer));
      let _ = events.send(PeerEvent::Connected(*other));
    }
    peers.insert(peer, PeerSlot { store, events });
    tracing::debug!(peer = %peer.short(), online = peers.len(), "peer joined swarm");
    Ok(())
  }

  /// Take `peer` offline, dropping every subscription it holds.
  pub(crate) fn leave(&self, peer: &PeerIdentity) {
    let subscriptions: Vec<(String, u64)> = {
      let topics = self.inner.topics.read();
      topics
        .iter()
        .flat_map(|(topic, subscribers)| {
          subscribers
            .iter()
            .filter(|subscriber| subscriber.peer == *peer)
            .map(|subscriber| (topic.clone(), subscriber.id))
            .collect::<Vec<_>>()
        })
        .collect()
    };
    for (topic, id) in subscriptions {
      self.unsubscribe(&topic, id);
    }

    let mut peers = self.inner.peers.write();
    if peers.remove(peer).is_none() {
      return;
    }
    for slot in peers.values() {
      let _ = slot.events.send(PeerEvent::Disconnected(*peer));
    }
    tracing::debug!(peer = %peer.short(), online = peers.len(), "peer left swarm");
  }

  /// Peers currently online other than `peer`.
  pub fn peers_of(&self, peer: &PeerIdentity) -> Vec<PeerIdentity> {
    let mut peers: Vec<PeerIdentity> = self
      .inner
      .peers
      .read()
      .keys()
      .filter(|other| *other != peer)
      .copied()
      .collect();
    peers.sort();
    peers
  }

  pub fn is_online(&self, peer: &PeerIdentity) -> bool {
    self.inner.peers.read().contains_key(peer)
  }

  /// Subscribe one session of `peer` to `topic`.
  pub(crate) fn subscribe(&self, peer: PeerIdentity, topic: &str) -> Result<Subscription> {
    if !self.is_online(&peer) {
      return Err(LogMeshError::NodeStopped);
    }

    let id = self.inner.next_subscription.fetch_add(1, Ordering::Relaxed);
    let (sender, receiver) = mpsc::unbounded_channel();

    let mut topics = self.inner.topics.write();
    let subscribers = topics.entry(topic.to_string()).or_default();
    let peer_already_present = subscribers.iter().any(|subscriber| subscriber.peer == peer);

    if !peer_already_present {
      let mut announced = Vec::new();
      for subscriber in subscribers.iter() {
        let _ = subscriber.sender.send(PubsubMessage::Joined { peer });
        if !announced.contains(&subscriber.peer) {
          announced.push(subscriber.peer);
          let _ = sender.send(PubsubMessage::Joined {
            peer: subscriber.peer,
          });
        }
      }
    }

    subscribers.push(Subscriber { id, peer, sender });
    tracing::debug!(peer = %peer.short(), topic, subscription = id, "subscribed");

    Ok(Subscription {
      id,
      topic: topic.to_string(),
      receiver,
    })
  }

  pub(crate) fn unsubscribe(&self, topic: &str, id: u64) {
    let mut topics = self.inner.topics.write();
    let Some(subscribers) = topics.get_mut(topic) else {
      return;
    };
    let Some(position) = subscribers.iter().position(|subscriber| subscriber.id == id) else {
      return;
    };

    let removed = subscribers.remove(position);
    let peer_still_present = subscribers
      .iter()
      .any(|subscriber| subscriber.peer == removed.peer);
    if !peer_still_present {
      for subscriber in subscribers.iter() {
        let _ = subscriber.sender.send(PubsubMessage::Left { peer: removed.peer });
      }
    }
    if subscribers.is_empty() {
      topics.remove(topic);
    }
    tracing::debug!(peer = %removed.peer.short(), topic, subscription = id, "unsubscribed");
  }

  /// Deliver to every subscription on `topic` except the sender's own.
  pub(crate) fn publish(&self, topic: &str, from_subscription: u64, message: PubsubMessage) {
    let topics = self.inner.topics.read();
    if let Some(subscribers) = topics.get(topic) {
      for subscriber in subscribers
        .iter()
        .filter(|subscriber| subscriber.id != from_subscription)
      {
        let _ = subscriber.sender.send(message.clone());
      }
    }
  }

  /// Deliver to the subscriptions `to` holds on `topic`.
  pub(crate) fn send_to(&self, topic: &str, to: &PeerIdentity, message: PubsubMessage) {
    let topics = self.inner.topics.read();
    if let Some(subscribers) = topics.get(topic) {
      for subscriber in subscribers
        .iter()
        .filter(|subscriber| subscriber.peer == *to)
      {
        let _ = subscriber.sender.send(message.clone());
      }
    }
  }

  /// Topics `peer` has at least one subscription on.
  pub fn topics_of(&self, peer: &PeerIdentity) -> Vec<String> {
    let mut topics: Vec<String> = self
      .inner
      .topics
      .read()
      .iter()
      .filter(|(_, subscribers)| subscribers.iter().any(|subscriber| subscriber.peer == *peer))
      .map(|(topic, _)| topic.clone())
      .collect();
    topics.sort();
    topics
  }

  /// Ask every other online peer for a block. Peers whose store fails are
  /// skipped; the lookup only fails when no peer can be asked at all.
  pub(crate) fn fetch_block(
    &self,
    requester: &PeerIdentity,
    hash: &EntryHash,
  ) -> Result<Option<Vec<u8>>> {
    let stores: Vec<(PeerIdentity, Arc<dyn ContentStore>)> = self
      .inner
      .peers
      .read()
      .iter()
      .filter(|(peer, _)| *peer != requester)
      .map(|(peer, slot)| (*peer, Arc::clone(&slot.store)))
      .collect();

    let mut failures = 0usize;
    for (peer, store) in &stores {
      match store.get(hash) {
        Ok(Some(bytes)) => return Ok(Some(bytes)),
        Ok(None) => {}
        Err(error) => {
          failures += 1;
          tracing::warn!(peer = %peer.short(), block = %hash.short(), %error, "peer block lookup failed");
        }
      }
    }

    if !stores.is_empty() && failures == stores.len() {
      return Err(LogMeshError::ResolutionFailed(format!(
        "all {} peers failed to answer for block {}",
        failures,
        hash.short()
      )));
    }
    Ok(None)
  }
}

#[cfg(test)]
mod tests {
  use super::{PubsubMessage, Swarm};
  use crate::net::PeerEvent;
  use crate::store::{ContentStore, MemoryContentStore};
  use crate::types::PeerIdentity;
  use std::sync::Arc;
  use tokio::sync::broadcast;

  fn online(swarm: &Swarm) -> (PeerIdentity, Arc<MemoryContentStore>, broadcast::Receiver<PeerEvent>) {
    let peer = PeerIdentity::random();
    let store = Arc::new(MemoryContentStore::new());
    let (events, receiver) = broadcast::channel(16);
    swarm.join(peer, store.clone(), events).expect("join");
    (peer, store, receiver)
  }

  #[test]
  fn peers_learn_about_each_other() {
    let swarm = Swarm::new();
    let (a, _, mut a_events) = online(&swarm);
    let (b, _, mut b_events) = online(&swarm);

    assert_eq!(a_events.try_recv().expect("a event"), PeerEvent::Connected(b));
    assert_eq!(b_events.try_recv().expect("b event"), PeerEvent::Connected(a));

    swarm.leave(&b);
    assert_eq!(a_events.try_recv().expect("a event"), PeerEvent::Disconnected(b));
    assert_eq!(swarm.peers_of(&a), Vec::<PeerIdentity>::new());
  }

  #[test]
  fn joins_are_announced_once_per_distinct_peer() {
    let swarm = Swarm::new();
    let (a, _, _) = online(&swarm);
    let (b, _, _) = online(&swarm);

    let mut a1 = swarm.subscribe(a, "topic").expect("a1");
    let mut a2 = swarm.subscribe(a, "topic").expect("a2");
    assert!(a1.receiver.try_recv().is_err());

    let mut b1 = swarm.subscribe(b, "topic").expect("b1");
    assert_eq!(b1.receiver.try_recv().expect("join"), PubsubMessage::Joined { peer: a });
    assert!(b1.receiver.try_recv().is_err());
    assert_eq!(a1.receiver.try_recv().expect("join"), PubsubMessage::Joined { peer: b });
    assert_eq!(a2.receiver.try_recv().expect("join"), PubsubMessage::Joined { peer: b });

    swarm.publish(
      "topic",
      a1.id,
      PubsubMessage::Heads {
        from: a,
        heads: Vec::new(),
        exchange: false,
      },
    );
    assert!(a1.receiver.try_recv().is_err());
    assert!(matches!(a2.receiver.try_recv(), Ok(PubsubMessage::Heads { .. })));
    assert!(matches!(b1.receiver.try_recv(), Ok(PubsubMessage::Heads { .. })));

    swarm.unsubscribe("topic", b1.id);
    assert_eq!(a1.receiver.try_recv().expect("left"), PubsubMessage::Left { peer: b });
    assert_eq!(swarm.topics_of(&a), vec!["topic".to_string()]);
    assert!(swarm.topics_of(&b).is_empty());
  }

  #[test]
  fn blocks_are_fetched_from_peers() {
    let swarm = Swarm::new();
    let (a, _, _) = online(&swarm);
    let (_, b_store, _) = online(&swarm);
    let hash = b_store.put(b"block").expect("put");

    assert_eq!(swarm.fetch_block(&a, &hash).expect("fetch"), Some(b"block".to_vec()));
  }
}
