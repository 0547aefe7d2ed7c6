use logmesh::net::PeerEvent;
use logmesh::util::random::random_log_name;
use logmesh::{
  AppConfig, CreateOptions, LogCoordinator, LogEvent, LogLibrary, LogType, PeerNode,
  ReplicationMonitor, RetryPolicy, Swarm,
};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  match run().await {
    Ok(()) => ExitCode::SUCCESS,
    Err(error) => {
      tracing::error!(%error, "logmesh failed");
      ExitCode::from(1)
    }
  }
}

async fn run() -> logmesh::Result<()> {
  let config = AppConfig::from_env()?;
  let swarm = Swarm::new();
  let node = PeerNode::start(config.node_options(), &swarm)?;
  tracing::info!(identity = %node.identity(), "node identity");
  for address in node.addresses() {
    tracing::info!(%address, "listening");
  }

  let mut peer_events = node.subscribe_peer_events();
  tokio::spawn(async move {
    while let Ok(event) = peer_events.recv().await {
      match event {
        PeerEvent::Connected(peer) => tracing::info!(%peer, "peer connected"),
        PeerEvent::Disconnected(peer) => tracing::info!(%peer, "peer disconnected"),
      }
    }
  });

  let coordinator = LogCoordinator::new(LogLibrary::new(node.clone(), config.log_options())?);
  let name = random_log_name();
  let handle = coordinator
    .open_or_create(
      &name,
      LogType::EventLog,
      &CreateOptions::new(),
      RetryPolicy::default(),
    )
    .await?;
  tracing::info!(address = %handle.address(), "log address");

  let monitor = ReplicationMonitor::spawn();
  monitor.attach(&handle);

  let mut events = handle.subscribe();
  tokio::spawn(async move {
    while let Ok(event) = events.recv().await {
      tracing::info!(event = event.name(), "log event");
      if matches!(event, LogEvent::Closed { .. }) {
        break;
      }
    }
  });

  handle.load().await?;
  let hash = coordinator.append(&handle, "test").await?;
  tracing::info!(entry = %hash, "appended");
  tracing::info!(topics = ?node.pubsub_topics(), "pubsub subscriptions");
  tracing::info!("Monitoring changes...");

  tokio::signal::ctrl_c().await?;
  tracing::info!("shutting down");
  handle.close();
  node.stop();
  Ok(())
}
