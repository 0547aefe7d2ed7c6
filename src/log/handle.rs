//! Live log sessions.

use super::entry::Entry;
use super::manifest::LogManifest;
use super::oplog::{IteratorOptions, Oplog};
use super::replicator;
use crate::constants::LOG_EVENT_CHANNEL_CAPACITY;
use crate::error::{LogMeshError, Result};
use crate::net::PubsubMessage;
use crate::node::PeerNode;
use crate::replication::{LogEvent, Progress};
use crate::store::{ContentStore, HeadsCache};
use crate::types::{EntryHash, LogAddress, PeerIdentity};
use crate::util::task::run_blocking;
use hashbrown::HashSet;
use parking_lot::Mutex as SyncMutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

pub(super) struct HandleInner {
  pub(super) session: u64,
  pub(super) address: LogAddress,
  pub(super) manifest: LogManifest,
  pub(super) node: Arc<PeerNode>,
  pub(super) cache: Arc<HeadsCache>,
  /// Held for the whole of every mutation so appends see a stable head set.
  pub(super) oplog: Mutex<Oplog>,
  events: broadcast::Sender<LogEvent>,
  closed: AtomicBool,
  pub(super) cancel: CancellationToken,
  pub(super) subscription: SyncMutex<Option<u64>>,
}

impl HandleInner {
  pub(super) fn emit(&self, event: LogEvent) {
    tracing::debug!(session = self.session, event = event.name(), ?event, "log event");
    let _ = self.events.send(event);
  }

  pub(super) fn is_closed(&self) -> bool {
    self.closed.load(Ordering::Acquire)
  }

  pub(super) fn identity(&self) -> PeerIdentity {
    self.node.identity()
  }

  /// Persist `heads` as this session's view of the log. Cached heads that
  /// `oplog` has never seen belong to other sessions and are kept, including
  /// any written between the read and the update.
  pub(super) async fn record_heads(&self, oplog: &Oplog, heads: Vec<EntryHash>) -> Result<()> {
    let cache = Arc::clone(&self.cache);
    let address = self.address.clone();
    let cached = run_blocking("heads read", move || cache.load(&address)).await?;
    let known: HashSet<EntryHash> = cached
      .into_iter()
      .filter(|head| oplog.contains(head))
      .collect();

    let cache = Arc::clone(&self.cache);
    let address = self.address.clone();
    run_blocking("heads write", move || {
      cache.update(&address, &heads, |head| known.contains(head))
    })
    .await
  }

  fn shutdown(&self) -> bool {
    if self.closed.swap(true, Ordering::AcqRel) {
      return false;
    }
    self.cancel.cancel();
    if let Some(subscription) = self.subscription.lock().take() {
      self
        .node
        .pubsub_unsubscribe(&self.address.topic(), subscription);
    }
    true
  }
}

impl Drop for HandleInner {
  fn drop(&mut self) {
    self.shutdown();
  }
}

/// A live session over one log. Clones share the session; attaching again
/// creates an independent one.
#[derive(Clone)]
pub struct LogHandle {
  inner: Arc<HandleInner>,
}

impl std::fmt::Debug for LogHandle {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("LogHandle")
      .field("session", &self.inner.session)
      .field("address", &self.inner.address)
      .field("closed", &self.inner.is_closed())
      .finish()
  }
}

impl LogHandle {
  pub(super) fn new(
    manifest: LogManifest,
    address: LogAddress,
    node: Arc<PeerNode>,
    cache: Arc<HeadsCache>,
  ) -> Self {
    let (events, _) = broadcast::channel(LOG_EVENT_CHANNEL_CAPACITY);
    let session = NEXT_SESSION.fetch_add(1, Ordering::Relaxed);
    tracing::debug!(session, %address, "log session opened");

    Self {
      inner: Arc::new(HandleInner {
        session,
        oplog: Mutex::new(Oplog::new(address.root())),
        address,
        manifest,
        node,
        cache,
        events,
        closed: AtomicBool::new(false),
        cancel: CancellationToken::new(),
        subscription: SyncMutex::new(None),
      }),
    }
  }

  pub fn address(&self) -> &LogAddress {
    &self.inner.address
  }

  pub fn manifest(&self) -> &LogManifest {
    &self.inner.manifest
  }

  pub fn identity(&self) -> PeerIdentity {
    self.inner.identity()
  }

  pub fn session(&self) -> u64 {
    self.inner.session
  }

  pub fn is_closed(&self) -> bool {
    self.inner.is_closed()
  }

  /// Receive this session's events from now on. Dropping the receiver
  /// de-registers it.
  pub fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
    self.inner.events.subscribe()
  }

  /// Token cancelled when the session closes.
  pub fn closed_token(&self) -> CancellationToken {
    self.inner.cancel.clone()
  }

  fn ensure_open(&self) -> Result<()> {
    if self.inner.is_closed() {
      Err(LogMeshError::LogClosed(self.inner.address.to_string()))
    } else {
      Ok(())
    }
  }

  /// Rebuild the view from the cached heads, then join the log's topic so
  /// peers can exchange heads with this session. `Ready` follows `Load` even
  /// when loading fails part way; the view then holds what was loaded.
  pub async fn load(&self) -> Result<()> {
    self.ensure_open()?;
    let address = self.inner.address.clone();
    self.inner.emit(LogEvent::Load {
      address: address.clone(),
    });

    let mut oplog = self.inner.oplog.lock().await;
    let loaded = self.load_entries(&mut oplog).await;
    if let Err(error) = &loaded {
      tracing::warn!(session = self.inner.session, %address, %error, "load stopped early");
    }
    self.inner.emit(LogEvent::Ready {
      address,
      heads: oplog.heads(),
      entries: oplog.len() as u64,
    });
    drop(oplog);

    loaded?;
    self.start_replication()
  }

  async fn load_entries(&self, oplog: &mut Oplog) -> Result<()> {
    let cache = Arc::clone(&self.inner.cache);
    let address = self.inner.address.clone();
    let cached_heads = run_blocking("heads read", move || cache.load(&address)).await?;
    let mut queue: VecDeque<EntryHash> = cached_heads.into_iter().collect();
    let mut loaded = 0u64;

    while let Some(hash) = queue.pop_front() {
      if oplog.contains(&hash) {
        continue;
      }
      let Some(bytes) = self.inner.node.fetch_block(&hash).await? else {
        tracing::warn!(session = self.inner.session, entry = %hash.short(), "cached entry missing from store");
        continue;
      };
      let entry = Entry::decode(&bytes)?;
      for predecessor in &entry.next {
        if !oplog.contains(predecessor) && !queue.contains(predecessor) {
          queue.push_back(*predecessor);
        }
      }
      oplog.insert(entry)?;
      loaded += 1;

      self.inner.emit(LogEvent::LoadProgress {
        address: self.inner.address.clone(),
        hash,
        progress: Progress::new(loaded, loaded + queue.len() as u64),
      });
    }
    Ok(())
  }

  fn start_replication(&self) -> Result<()> {
    let mut slot = self.inner.subscription.lock();
    if slot.is_some() {
      return Ok(());
    }

    let subscription = self.inner.node.pubsub_subscribe(&self.inner.address.topic())?;
    *slot = Some(subscription.id);
    drop(slot);

    replicator::spawn(Arc::downgrade(&self.inner), self.inner.cancel.clone(), subscription);
    Ok(())
  }

  /// Append `payload` as a new entry whose predecessors are the current
  /// heads. Returns once the entry is in the local store; peers learn about
  /// it asynchronously. The access policy is not consulted here: it only
  /// feeds the address.
  pub async fn append(&self, payload: impl Into<Vec<u8>>) -> Result<EntryHash> {
    self.ensure_open()?;
    let payload = payload.into();
    let identity = self.inner.identity();

    let mut oplog = self.inner.oplog.lock().await;
    self.ensure_open()?;

    let (entry, bytes) = Entry::create(
      oplog.log_id(),
      identity,
      oplog.clock() + 1,
      oplog.heads(),
      payload,
    )?;
    let hash = entry.hash;

    let store = self.inner.node.content_store();
    run_blocking("entry write", move || store.put(&bytes))
      .await
      .map_err(|error| LogMeshError::AppendFailed(format!("store entry {}: {error}", hash.short())))?;

    // Every current head is a predecessor, so the new entry becomes the only
    // head. Recording it before insertion keeps a failed append out of the view.
    self
      .inner
      .record_heads(&oplog, vec![hash])
      .await
      .map_err(|error| LogMeshError::AppendFailed(format!("record heads: {error}")))?;
    oplog.insert(entry)?;

    let heads = oplog.heads();
    self.inner.emit(LogEvent::Write {
      address: self.inner.address.clone(),
      entry: hash,
      heads: heads.clone(),
    });
    drop(oplog);

    let subscription = *self.inner.subscription.lock();
    if let Some(subscription) = subscription {
      self.inner.node.pubsub_publish(
        &self.inner.address.topic(),
        subscription,
        PubsubMessage::Heads {
          from: identity,
          heads,
          exchange: false,
        },
      );
    }

    Ok(hash)
  }

  pub async fn entries(&self, options: IteratorOptions) -> Vec<Entry> {
    self.inner.oplog.lock().await.entries(options)
  }

  pub async fn get(&self, hash: &EntryHash) -> Option<Entry> {
    self.inner.oplog.lock().await.get(hash).cloned()
  }

  pub async fn heads(&self) -> Vec<EntryHash> {
    self.inner.oplog.lock().await.heads()
  }

  pub async fn len(&self) -> usize {
    self.inner.oplog.lock().await.len()
  }

  pub async fn is_empty(&self) -> bool {
    self.len().await == 0
  }

  /// Close the session: stop replication, leave the topic and emit
  /// `Closed`. In-flight merges finish first. Idempotent.
  pub fn close(&self) {
    if self.inner.shutdown() {
      self.inner.emit(LogEvent::Closed {
        address: self.inner.address.clone(),
      });
      tracing::debug!(session = self.inner.session, address = %self.inner.address, "log session closed");
    }
  }
}
