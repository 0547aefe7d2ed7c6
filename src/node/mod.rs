//! Peer node handle.
//!
//! A [`PeerNode`] is the network-attached capability everything else hangs
//! off: a stable identity, a local block store, pubsub access and a stream
//! of peer connectivity changes.

mod identity;

use crate::config::NodeOptions;
use crate::constants::PEER_EVENT_CHANNEL_CAPACITY;
use crate::error::{LogMeshError, Result};
use crate::net::{PeerEvent, PubsubMessage, Subscription, Swarm};
use crate::store::{ContentStore, DiskContentStore, MemoryContentStore};
use crate::types::{EntryHash, PeerIdentity};
use crate::util::fs::try_hold_lock;
use crate::util::task::run_blocking;
use std::fs::File;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

const REPO_LOCK_FILE_NAME: &str = "repo.lock";

pub struct PeerNode {
  identity: PeerIdentity,
  options: NodeOptions,
  swarm: Swarm,
  store: Arc<dyn ContentStore>,
  peer_events: broadcast::Sender<PeerEvent>,
  running: AtomicBool,
  _repo_lock: Option<File>,
}

impl std::fmt::Debug for PeerNode {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("PeerNode")
      .field("identity", &self.identity)
      .field("repo_dir", &self.options.repo_dir)
      .field("running", &self.is_running())
      .finish()
  }
}

impl PeerNode {
  /// Start a node and bring it online on `swarm`. With a repo directory the
  /// identity and blocks persist there and the directory is locked for the
  /// node's lifetime.
  pub fn start(options: NodeOptions, swarm: &Swarm) -> Result<Arc<Self>> {
    match options.repo_dir.clone() {
      Some(repo_dir) => {
        std::fs::create_dir_all(&repo_dir)?;
        let lock = try_hold_lock(&repo_dir.join(REPO_LOCK_FILE_NAME))?
          .ok_or_else(|| LogMeshError::RepoLocked(repo_dir.display().to_string()))?;
        let identity = identity::load_or_generate(&repo_dir)?;
        let store: Arc<dyn ContentStore> = Arc::new(DiskContentStore::open(&repo_dir)?);
        Self::start_inner(identity, options, swarm, store, Some(lock))
      }
      None => Self::start_inner(
        PeerIdentity::random(),
        options,
        swarm,
        Arc::new(MemoryContentStore::new()),
        None,
      ),
    }
  }

  /// Start an ephemeral node backed by a caller-supplied block store.
  pub fn start_with_store(
    options: NodeOptions,
    swarm: &Swarm,
    store: Arc<dyn ContentStore>,
  ) -> Result<Arc<Self>> {
    Self::start_inner(PeerIdentity::random(), options, swarm, store, None)
  }

  fn start_inner(
    identity: PeerIdentity,
    options: NodeOptions,
    swarm: &Swarm,
    store: Arc<dyn ContentStore>,
    repo_lock: Option<File>,
  ) -> Result<Arc<Self>> {
    let (peer_events, _) = broadcast::channel(PEER_EVENT_CHANNEL_CAPACITY);
    swarm.join(identity, Arc::clone(&store), peer_events.clone())?;

    tracing::info!(
      identity = %identity,
      addresses = ?options.swarm_addresses,
      relay = options.relay_enabled,
      "node started"
    );

    Ok(Arc::new(Self {
      identity,
      options,
      swarm: swarm.clone(),
      store,
      peer_events,
      running: AtomicBool::new(true),
      _repo_lock: repo_lock,
    }))
  }

  pub fn identity(&self) -> PeerIdentity {
    self.identity
  }

  pub fn options(&self) -> &NodeOptions {
    &self.options
  }

  /// Transport addresses the node was configured with.
  pub fn addresses(&self) -> &[String] {
    &self.options.swarm_addresses
  }

  pub fn content_store(&self) -> Arc<dyn ContentStore> {
    Arc::clone(&self.store)
  }

  /// Connectivity changes from now on.
  pub fn subscribe_peer_events(&self) -> broadcast::Receiver<PeerEvent> {
    self.peer_events.subscribe()
  }

  pub fn connected_peers(&self) -> Vec<PeerIdentity> {
    self.swarm.peers_of(&self.identity)
  }

  pub fn is_running(&self) -> bool {
    self.running.load(Ordering::Acquire)
  }

  fn ensure_running(&self) -> Result<()> {
    if self.is_running() {
      Ok(())
    } else {
      Err(LogMeshError::NodeStopped)
    }
  }

  /// Whether a block is held locally or by any connected peer. Bounded by
  /// the node's network timeout.
  pub async fn has_block(&self, hash: &EntryHash) -> Result<bool> {
    Ok(self.fetch_block(hash).await?.is_some())
  }

  /// Fetch a block from the local store, falling back to peers. Blocks
  /// found on the network are stored locally before returning.
  pub async fn fetch_block(&self, hash: &EntryHash) -> Result<Option<Vec<u8>>> {
    self.ensure_running()?;

    let store = Arc::clone(&self.store);
    let swarm = self.swarm.clone();
    let identity = self.identity;
    let hash = *hash;
    let lookup = run_blocking("block lookup", move || -> Result<Option<Vec<u8>>> {
      if let Some(bytes) = store.get(&hash)? {
        return Ok(Some(bytes));
      }
      match swarm.fetch_block(&identity, &hash)? {
        Some(bytes) => {
          store.put(&bytes)?;
          Ok(Some(bytes))
        }
        None => Ok(None),
      }
    });

    match tokio::time::timeout(self.options.network_timeout, lookup).await {
      Ok(result) => result,
      Err(_) => Err(LogMeshError::ResolutionFailed(format!(
        "block lookup for {} timed out after {:?}",
        hash.short(),
        self.options.network_timeout
      ))),
    }
  }

  pub fn pubsub_subscribe(&self, topic: &str) -> Result<Subscription> {
    self.ensure_running()?;
    self.swarm.subscribe(self.identity, topic)
  }

  pub fn pubsub_unsubscribe(&self, topic: &str, subscription: u64) {
    self.swarm.unsubscribe(topic, subscription);
  }

  pub fn pubsub_publish(&self, topic: &str, subscription: u64, message: PubsubMessage) {
    if self.is_running() {
      self.swarm.publish(topic, subscription, message);
    }
  }

  pub fn pubsub_send(&self, topic: &str, to: &PeerIdentity, message: PubsubMessage) {
    if self.is_running() {
      self.swarm.send_to(topic, to, message);
    }
  }

  /// Topics this node is subscribed to.
  pub fn pubsub_topics(&self) -> Vec<String> {
    self.swarm.topics_of(&self.identity)
  }

  /// Go offline. Idempotent.
  pub fn stop(&self) {
    if self.running.swap(false, Ordering::AcqRel) {
      self.swarm.leave(&self.identity);
      tracing::info!(identity = %self.identity.short(), "node stopped");
    }
  }
}

impl Drop for PeerNode {
  fn drop(&mut self) {
    self.stop();
  }
}

#[cfg(test)]
mod tests {
  use super::PeerNode;
  use crate::config::NodeOptions;
  use crate::error::LogMeshError;
  use crate::net::{PeerEvent, Swarm};
  use crate::store::ContentStore;

  #[tokio::test]
  async fn repo_identity_persists_and_repo_is_exclusive() {
    let dir = tempfile::tempdir().expect("tempdir");
    let swarm = Swarm::new();
    let options = NodeOptions::new().repo_dir(dir.path());

    let first = PeerNode::start(options.clone(), &swarm).expect("start");
    let identity = first.identity();
    assert!(matches!(
      PeerNode::start(options.clone(), &Swarm::new()),
      Err(LogMeshError::RepoLocked(_))
    ));
    first.stop();
    drop(first);

    let second = PeerNode::start(options, &swarm).expect("restart");
    assert_eq!(second.identity(), identity);
  }

  #[tokio::test]
  async fn peer_events_and_remote_blocks() {
    let swarm = Swarm::new();
    let a = PeerNode::start(NodeOptions::new(), &swarm).expect("a");
    let mut a_events = a.subscribe_peer_events();
    let b = PeerNode::start(NodeOptions::new(), &swarm).expect("b");

    assert_eq!(a_events.recv().await.expect("event"), PeerEvent::Connected(b.identity()));
    assert_eq!(a.connected_peers(), vec![b.identity()]);

    let hash = b.content_store().put(b"remote").expect("put");
    assert!(a.has_block(&hash).await.expect("has"));
    assert!(a.content_store().has(&hash).expect("cached locally"));

    b.stop();
    assert_eq!(
      a_events.recv().await.expect("event"),
      PeerEvent::Disconnected(b.identity())
    );
    assert!(matches!(b.fetch_block(&hash).await, Err(LogMeshError::NodeStopped)));
  }
}
