use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use logmesh::replication::LifecycleState;
use logmesh::store::{ContentStore, MemoryContentStore};
use logmesh::{
  CreateOptions, EntryHash, LogCoordinator, LogEvent, LogLibrary, LogName, LogOptions, LogType,
  NodeOptions, PeerNode, ReplicationMonitor, Resolution, Swarm,
};

const DEADLINE: Duration = Duration::from_secs(10);

fn coordinator(swarm: &Swarm) -> LogCoordinator {
  let node = PeerNode::start(NodeOptions::new(), swarm).expect("start node");
  LogCoordinator::new(LogLibrary::new(node, LogOptions::new()).expect("library"))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn writes_from_two_peers_reach_both_monitors() {
  let swarm = Swarm::new();
  let alpha = LogName::new("alpha").expect("name");
  let options = CreateOptions::new();

  let a = coordinator(&swarm);
  let handle_a = a
    .attach(&alpha, &Resolution::Unresolved, LogType::EventLog, &options)
    .await
    .expect("create on a");
  let monitor_a = ReplicationMonitor::spawn();
  monitor_a.attach(&handle_a);
  handle_a.load().await.expect("load a");

  let b = coordinator(&swarm);
  let resolution = b
    .resolve(&alpha, LogType::EventLog, &options)
    .await
    .expect("resolve on b");
  assert_eq!(resolution.address(), Some(handle_a.address()));
  let handle_b = b
    .attach(&alpha, &resolution, LogType::EventLog, &options)
    .await
    .expect("open on b");
  let monitor_b = ReplicationMonitor::spawn();
  monitor_b.attach(&handle_b);
  handle_b.load().await.expect("load b");

  let from_a = handle_a.append("from-a").await.expect("append a");
  let from_b = handle_b.append("from-b").await.expect("append b");

  for monitor in [&monitor_a, &monitor_b] {
    let state = monitor
      .wait_for(
        |state| {
          state.last_write_heads.contains(&from_a) && state.last_write_heads.contains(&from_b)
        },
        DEADLINE,
      )
      .await
      .expect("both writes observed");
    assert_eq!(state.anomalies, 0, "unexpected anomaly: {:?}", state.last_anomaly);
  }

  let state_a = monitor_a
    .wait_for(|state| state.lifecycle == LifecycleState::Ready, DEADLINE)
    .await
    .expect("replication settles");
  assert!(state_a.connected_peers.contains(&handle_b.identity()));
  assert!(state_a.exchanged_peers.contains(&handle_b.identity()));

  assert_eq!(handle_a.len().await, 2);
  assert_eq!(handle_b.len().await, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn two_sessions_in_one_node_converge() {
  let swarm = Swarm::new();
  let coordinator = coordinator(&swarm);
  let alpha = LogName::new("alpha").expect("name");
  let options = CreateOptions::new();

  let first = coordinator
    .attach(&alpha, &Resolution::Unresolved, LogType::EventLog, &options)
    .await
    .expect("create");
  let resolution = Resolution::Resolved(first.address().clone());
  let second = coordinator
    .attach(&alpha, &resolution, LogType::EventLog, &options)
    .await
    .expect("second session");
  assert_ne!(first.session(), second.session());

  let monitor = ReplicationMonitor::spawn();
  monitor.attach(&second);
  first.load().await.expect("load first");
  second.load().await.expect("load second");

  let hash = first.append("shared").await.expect("append");
  monitor
    .wait_for(|state| state.last_write_heads.contains(&hash), DEADLINE)
    .await
    .expect("second session sees the entry");
  assert_eq!(second.get(&hash).await.map(|entry| entry.payload), Some(b"shared".to_vec()));

  first.close();
  assert!(second.append("still open").await.is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn late_joiner_replicates_existing_history() {
  let swarm = Swarm::new();
  let alpha = LogName::new("history").expect("name");
  let options = CreateOptions::new();

  let a = coordinator(&swarm);
  let handle_a = a
    .attach(&alpha, &Resolution::Unresolved, LogType::EventLog, &options)
    .await
    .expect("create");
  handle_a.load().await.expect("load a");
  for index in 0..5 {
    handle_a.append(format!("entry-{index}")).await.expect("append");
  }

  let b = coordinator(&swarm);
  let handle_b = b
    .attach(
      &alpha,
      &Resolution::Resolved(handle_a.address().clone()),
      LogType::EventLog,
      &options,
    )
    .await
    .expect("open");
  let monitor_b = ReplicationMonitor::spawn();
  monitor_b.attach(&handle_b);
  handle_b.load().await.expect("load b");

  let state = monitor_b
    .wait_for(
      |state| state.lifecycle == LifecycleState::Ready && state.last_write_heads.len() == 5,
      DEADLINE,
    )
    .await
    .expect("history replicated");
  assert_eq!(state.load_progress.current, 5);
  assert_eq!(state.anomalies, 0);

  let payloads: Vec<Vec<u8>> = handle_b
    .entries(Default::default())
    .await
    .into_iter()
    .map(|entry| entry.payload)
    .collect();
  let expected: Vec<Vec<u8>> = (0..5).map(|index| format!("entry-{index}").into_bytes()).collect();
  assert_eq!(payloads, expected);
}

/// Memory store whose writes start failing on request.
#[derive(Default)]
struct FlakyStore {
  blocks: MemoryContentStore,
  fail_puts: AtomicBool,
}

impl ContentStore for FlakyStore {
  fn put(&self, bytes: &[u8]) -> logmesh::Result<EntryHash> {
    if self.fail_puts.load(Ordering::SeqCst) {
      return Err(std::io::Error::other("disk full").into());
    }
    self.blocks.put(bytes)
  }

  fn get(&self, hash: &EntryHash) -> logmesh::Result<Option<Vec<u8>>> {
    self.blocks.get(hash)
  }

  fn len(&self) -> logmesh::Result<usize> {
    self.blocks.len()
  }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_fetch_still_ends_the_replication_session() {
  let swarm = Swarm::new();
  let alpha = LogName::new("alpha").expect("name");
  let options = CreateOptions::new();

  let a = coordinator(&swarm);
  let handle_a = a
    .attach(&alpha, &Resolution::Unresolved, LogType::EventLog, &options)
    .await
    .expect("create on a");
  handle_a.load().await.expect("load a");

  let store = Arc::new(FlakyStore::default());
  let node = PeerNode::start_with_store(NodeOptions::new(), &swarm, store.clone()).expect("start b");
  let b = LogCoordinator::new(LogLibrary::new(node, LogOptions::new()).expect("library"));
  let handle_b = b
    .attach(
      &alpha,
      &Resolution::Resolved(handle_a.address().clone()),
      LogType::EventLog,
      &options,
    )
    .await
    .expect("open on b");
  let mut events = handle_b.subscribe();
  handle_b.load().await.expect("load b");

  store.fail_puts.store(true, Ordering::SeqCst);
  handle_a.append("unreachable").await.expect("append a");

  let monitor = ReplicationMonitor::spawn();
  let mut seen = Vec::new();
  tokio::time::timeout(DEADLINE, async {
    loop {
      let event = events.recv().await.expect("event");
      seen.push(event.name());
      let finished = matches!(event, LogEvent::Replicated { .. });
      monitor.notify(event).await.expect("notify");
      if finished {
        break;
      }
    }
  })
  .await
  .expect("replicated after failure");

  assert!(seen.contains(&"replicate"));
  let state = monitor.snapshot().await.expect("snapshot");
  assert_eq!(state.lifecycle, LifecycleState::Ready);
  assert!(state.sessions.is_empty());
  assert_eq!(state.anomalies, 0, "unexpected anomaly: {:?}", state.last_anomaly);
  assert!(handle_b.is_empty().await);
}
