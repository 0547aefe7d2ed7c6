//! Option structs for nodes and logs.
//!
//! There is no configuration file: callers build options in code, and the
//! binary takes its two knobs from the environment.

use crate::constants::{
  DEFAULT_DATA_DIR, DEFAULT_NETWORK_TIMEOUT, DEFAULT_SWARM_ADDRESSES, ENV_DATA_DIR,
  ENV_NETWORK_TIMEOUT_MS, LOG_DIR_NAME, NODE_DIR_NAME,
};
use crate::error::{LogMeshError, Result};
use crate::types::AccessPolicy;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Options for starting a [`crate::node::PeerNode`].
#[derive(Debug, Clone)]
pub struct NodeOptions {
  /// Repository directory for identity and blocks. `None` keeps everything
  /// in memory and draws a fresh identity.
  pub repo_dir: Option<PathBuf>,
  /// Transport addresses, passed to the transport untouched.
  pub swarm_addresses: Vec<String>,
  /// Allow relaying traffic for other peers.
  pub relay_enabled: bool,
  /// Upper bound on any single network lookup.
  pub network_timeout: Duration,
}

impl Default for NodeOptions {
  fn default() -> Self {
    Self {
      repo_dir: None,
      swarm_addresses: DEFAULT_SWARM_ADDRESSES
        .iter()
        .map(|address| address.to_string())
        .collect(),
      relay_enabled: true,
      network_timeout: DEFAULT_NETWORK_TIMEOUT,
    }
  }
}

impl NodeOptions {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn repo_dir(mut self, path: impl AsRef<Path>) -> Self {
    self.repo_dir = Some(path.as_ref().to_path_buf());
    self
  }

  pub fn swarm_addresses(mut self, addresses: impl IntoIterator<Item = impl Into<String>>) -> Self {
    self.swarm_addresses = addresses.into_iter().map(Into::into).collect();
    self
  }

  pub fn relay_enabled(mut self, value: bool) -> Self {
    self.relay_enabled = value;
    self
  }

  pub fn network_timeout(mut self, timeout: Duration) -> Self {
    self.network_timeout = timeout;
    self
  }
}

/// Options for a [`crate::log::LogLibrary`].
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
  /// Directory for the heads cache. `None` keeps it in memory.
  pub directory: Option<PathBuf>,
}

impl LogOptions {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn directory(mut self, path: impl AsRef<Path>) -> Self {
    self.directory = Some(path.as_ref().to_path_buf());
    self
  }
}

/// Options that become part of a log's manifest, and therefore its address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateOptions {
  pub access_policy: AccessPolicy,
}

impl CreateOptions {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn access_policy(mut self, policy: AccessPolicy) -> Self {
    self.access_policy = policy;
    self
  }
}

/// Process-level settings for the `logmesh` binary.
#[derive(Debug, Clone)]
pub struct AppConfig {
  pub data_dir: PathBuf,
  pub network_timeout: Duration,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      data_dir: PathBuf::from(DEFAULT_DATA_DIR),
      network_timeout: DEFAULT_NETWORK_TIMEOUT,
    }
  }
}

impl AppConfig {
  /// Defaults overridden by `LOGMESH_DATA_DIR` and
  /// `LOGMESH_NETWORK_TIMEOUT_MS`.
  pub fn from_env() -> Result<Self> {
    Self::from_lookup(|key| std::env::var(key).ok())
  }

  fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
    let mut config = Self::default();

    if let Some(dir) = lookup(ENV_DATA_DIR).filter(|value| !value.is_empty()) {
      config.data_dir = PathBuf::from(dir);
    }

    if let Some(raw) = lookup(ENV_NETWORK_TIMEOUT_MS) {
      let millis = raw.trim().parse::<u64>().map_err(|_| {
        LogMeshError::Internal(format!("{ENV_NETWORK_TIMEOUT_MS} must be an integer: {raw}"))
      })?;
      config.network_timeout = Duration::from_millis(millis);
    }

    Ok(config)
  }

  pub fn node_options(&self) -> NodeOptions {
    NodeOptions::new()
      .repo_dir(self.data_dir.join(NODE_DIR_NAME))
      .network_timeout(self.network_timeout)
  }

  pub fn log_options(&self) -> LogOptions {
    LogOptions::new().directory(self.data_dir.join(LOG_DIR_NAME))
  }
}
