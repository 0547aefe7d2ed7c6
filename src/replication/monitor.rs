//! Replication monitor actor.
//!
//! One tokio task owns the [`ReplicationState`]. Events and snapshot queries
//! share a single command channel, so a snapshot always reflects every event
//! sent before it. After each change the actor publishes the new state on a
//! `watch` channel for readers that only need the latest view.

use super::events::LogEvent;
use super::state::{Applied, ReplicationState};
use crate::constants::MONITOR_CHANNEL_CAPACITY;
use crate::error::{LogMeshError, Result};
use crate::log::LogHandle;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// Commands sent to the monitor actor
enum MonitorCmd {
  Event(LogEvent),
  /// The forwarder's subscription lagged and dropped `skipped` events.
  Missed {
    skipped: u64,
  },
  Snapshot {
    resp: oneshot::Sender<ReplicationState>,
  },
}

/// Handle to a running monitor. Clones talk to the same actor; the actor
/// stops once every clone and every attachment is gone.
#[derive(Clone)]
pub struct ReplicationMonitor {
  commands: mpsc::Sender<MonitorCmd>,
  state: watch::Receiver<ReplicationState>,
}

impl std::fmt::Debug for ReplicationMonitor {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ReplicationMonitor")
      .field("lifecycle", &self.state.borrow().lifecycle)
      .finish()
  }
}

impl ReplicationMonitor {
  /// Start the actor on the current tokio runtime.
  pub fn spawn() -> Self {
    let (commands, receiver) = mpsc::channel(MONITOR_CHANNEL_CAPACITY);
    let (publisher, state) = watch::channel(ReplicationState::new());
    tokio::spawn(run(receiver, publisher));
    Self { commands, state }
  }

  /// Queue one event for the actor.
  pub async fn notify(&self, event: LogEvent) -> Result<()> {
    self
      .commands
      .send(MonitorCmd::Event(event))
      .await
      .map_err(|_| LogMeshError::MonitorStopped)
  }

  /// State after every event queued so far has been applied.
  pub async fn snapshot(&self) -> Result<ReplicationState> {
    let (resp, rx) = oneshot::channel();
    self
      .commands
      .send(MonitorCmd::Snapshot { resp })
      .await
      .map_err(|_| LogMeshError::MonitorStopped)?;
    rx.await.map_err(|_| LogMeshError::MonitorStopped)
  }

  /// Latest published state without waiting on the actor.
  pub fn state(&self) -> ReplicationState {
    self.state.borrow().clone()
  }

  pub fn subscribe_state(&self) -> watch::Receiver<ReplicationState> {
    self.state.clone()
  }

  /// Wait until the published state satisfies `predicate`, for at most
  /// `deadline`.
  pub async fn wait_for<F>(&self, mut predicate: F, deadline: Duration) -> Result<ReplicationState>
  where
    F: FnMut(&ReplicationState) -> bool,
  {
    let mut state = self.state.clone();
    let waited = tokio::time::timeout(deadline, async {
      state
        .wait_for(|current| predicate(current))
        .await
        .map(|current| (*current).clone())
    })
    .await;

    match waited {
      Ok(Ok(state)) => Ok(state),
      Ok(Err(_)) => Err(LogMeshError::MonitorStopped),
      Err(_) => Err(LogMeshError::Timeout(deadline)),
    }
  }

  /// Forward every event `handle` emits from now on into this monitor. The
  /// forwarder drops its subscription when the handle closes or the monitor
  /// stops.
  pub fn attach(&self, handle: &LogHandle) -> JoinHandle<()> {
    let mut events = handle.subscribe();
    let commands = self.commands.clone();
    let session = handle.session();

    tokio::spawn(async move {
      loop {
        let event = match events.recv().await {
          Ok(event) => event,
          Err(RecvError::Lagged(skipped)) => {
            tracing::debug!(session, skipped, "log events dropped before forwarding");
            if commands.send(MonitorCmd::Missed { skipped }).await.is_err() {
              break;
            }
            continue;
          }
          Err(RecvError::Closed) => break,
        };

        let closed = matches!(event, LogEvent::Closed { .. });
        if commands.send(MonitorCmd::Event(event)).await.is_err() {
          break;
        }
        if closed {
          break;
        }
      }
      tracing::debug!(session, "monitor detached from log");
    })
  }
}

async fn run(mut commands: mpsc::Receiver<MonitorCmd>, publisher: watch::Sender<ReplicationState>) {
  let mut state = ReplicationState::new();

  while let Some(command) = commands.recv().await {
    match command {
      MonitorCmd::Event(event) => {
        match state.apply(&event) {
          Ok(Applied::Changed) => {
            tracing::trace!(event = event.name(), lifecycle = %state.lifecycle, "monitor applied event");
          }
          Ok(Applied::Discarded) => {
            tracing::debug!(event = event.name(), "event after close discarded");
            continue;
          }
          Err(anomaly) => {
            tracing::warn!(kind = %anomaly.kind, event = anomaly.event, detail = %anomaly.detail, "anomalous notification");
            state.record_anomaly(anomaly);
          }
        }
        publisher.send_replace(state.clone());
      }
      MonitorCmd::Missed { skipped } => {
        if state.record_missed(skipped) == Applied::Discarded {
          continue;
        }
        tracing::warn!(skipped, "monitor fell behind log events");
        publisher.send_replace(state.clone());
      }
      MonitorCmd::Snapshot { resp } => {
        let _ = resp.send(state.clone());
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::{MonitorCmd, ReplicationMonitor};
  use crate::replication::{AnomalyKind, LifecycleState, LogEvent, Progress};
  use crate::types::{EntryHash, LogAddress, LogName, PeerIdentity};
  use std::time::Duration;

  fn address() -> LogAddress {
    LogAddress::new(EntryHash::digest(b"manifest"), LogName::new("alpha").expect("name"))
  }

  #[tokio::test]
  async fn anomalies_are_counted_not_propagated() {
    let monitor = ReplicationMonitor::spawn();
    let peer = PeerIdentity::random();

    monitor.notify(LogEvent::Load { address: address() }).await.expect("load");
    monitor
      .notify(LogEvent::Ready {
        address: address(),
        heads: Vec::new(),
        entries: 0,
      })
      .await
      .expect("ready");
    monitor
      .notify(LogEvent::Replicate {
        address: address(),
        peer,
      })
      .await
      .expect("replicate");
    for current in [3, 2] {
      monitor
        .notify(LogEvent::ReplicateProgress {
          address: address(),
          peer,
          hash: EntryHash::digest(&[current as u8]),
          progress: Progress::new(current, 10),
        })
        .await
        .expect("progress");
    }

    let state = monitor.snapshot().await.expect("snapshot");
    assert_eq!(state.lifecycle, LifecycleState::Replicating);
    assert_eq!(state.anomalies, 1);
    assert_eq!(
      state.last_anomaly.as_ref().map(|anomaly| anomaly.kind),
      Some(AnomalyKind::RegressingProgress)
    );
    assert_eq!(state.session_progress(&address(), &peer), Some(Progress::new(3, 10)));
  }

  #[tokio::test]
  async fn wait_for_sees_published_state_and_times_out() {
    let monitor = ReplicationMonitor::spawn();
    monitor.notify(LogEvent::Load { address: address() }).await.expect("load");

    let state = monitor
      .wait_for(|state| state.lifecycle == LifecycleState::Loading, Duration::from_secs(5))
      .await
      .expect("loading");
    assert_eq!(state.lifecycle, LifecycleState::Loading);

    assert!(monitor
      .wait_for(|state| state.lifecycle == LifecycleState::Ready, Duration::from_millis(20))
      .await
      .is_err());
  }

  #[tokio::test]
  async fn lagged_forwarder_reports_missed_events() {
    let monitor = ReplicationMonitor::spawn();
    monitor.notify(LogEvent::Load { address: address() }).await.expect("load");
    monitor
      .commands
      .send(MonitorCmd::Missed { skipped: 12 })
      .await
      .map_err(|_| "monitor stopped")
      .expect("missed");

    let state = monitor.snapshot().await.expect("snapshot");
    assert_eq!(state.lifecycle, LifecycleState::Loading);
    assert_eq!(state.missed_events, 12);
    assert_eq!(state.anomalies, 1);
    assert_eq!(
      state.last_anomaly.as_ref().map(|anomaly| anomaly.kind),
      Some(AnomalyKind::MissedEvents)
    );
  }
}
