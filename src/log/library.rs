use super::handle::LogHandle;
use super::manifest::LogManifest;
use crate::config::{CreateOptions, LogOptions};
use crate::error::{LogMeshError, Result};
use crate::node::PeerNode;
use crate::store::{ContentStore, HeadsCache};
use crate::types::{LogAddress, LogName, LogType};
use crate::util::task::run_blocking;
use std::sync::Arc;

/// Entry point to the log library for one node.
pub struct LogLibrary {
  node: Arc<PeerNode>,
  cache: Arc<HeadsCache>,
  options: LogOptions,
}

impl std::fmt::Debug for LogLibrary {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("LogLibrary")
      .field("identity", &self.node.identity())
      .field("directory", &self.options.directory)
      .finish()
  }
}

impl LogLibrary {
  pub fn new(node: Arc<PeerNode>, options: LogOptions) -> Result<Self> {
    let cache = match options.directory.as_ref() {
      Some(directory) => HeadsCache::open(directory)?,
      None => HeadsCache::memory(),
    };
    Ok(Self {
      node,
      cache: Arc::new(cache),
      options,
    })
  }

  pub fn node(&self) -> &Arc<PeerNode> {
    &self.node
  }

  pub fn options(&self) -> &LogOptions {
    &self.options
  }

  pub fn manifest_for(name: &LogName, log_type: LogType, options: &CreateOptions) -> LogManifest {
    LogManifest::new(name.clone(), log_type, options.access_policy.clone())
  }

  /// Address a log with these parameters has or would have. Pure; touches
  /// neither storage nor network.
  pub fn determine_address(
    &self,
    name: &LogName,
    log_type: LogType,
    options: &CreateOptions,
  ) -> Result<LogAddress> {
    Self::manifest_for(name, log_type, options).address()
  }

  /// Manifest behind `address`, looked up locally and then on the network.
  pub async fn find_manifest(&self, address: &LogAddress) -> Result<Option<LogManifest>> {
    let Some(bytes) = self.node.fetch_block(&address.root()).await? else {
      return Ok(None);
    };

    let manifest = LogManifest::decode(&bytes)?;
    if manifest.name != *address.name() {
      return Err(LogMeshError::InvalidAddress(format!(
        "{address} names {} but its manifest names {}",
        address.name(),
        manifest.name
      )));
    }
    Ok(Some(manifest))
  }

  /// Store the manifest for a new log and open a session on it.
  pub async fn create(
    &self,
    name: &LogName,
    log_type: LogType,
    options: &CreateOptions,
  ) -> Result<LogHandle> {
    if !log_type.is_append_only() {
      return Err(LogMeshError::UnsupportedLogType(log_type));
    }

    let manifest = Self::manifest_for(name, log_type, options);
    let bytes = manifest.encode()?;
    let store = self.node.content_store();
    let root = run_blocking("manifest write", move || store.put(&bytes)).await?;
    let address = LogAddress::new(root, name.clone());

    tracing::info!(%address, %log_type, "created log");
    Ok(LogHandle::new(
      manifest,
      address,
      Arc::clone(&self.node),
      Arc::clone(&self.cache),
    ))
  }

  /// Open an existing log. The stored type must match `expected`.
  pub async fn open(&self, address: &LogAddress, expected: LogType) -> Result<LogHandle> {
    let manifest = self
      .find_manifest(address)
      .await?
      .ok_or(LogMeshError::BlockNotFound(address.root()))?;

    if manifest.log_type != expected {
      return Err(LogMeshError::TypeMismatch {
        expected,
        actual: manifest.log_type,
      });
    }
    if !manifest.log_type.is_append_only() {
      return Err(LogMeshError::UnsupportedLogType(manifest.log_type));
    }

    tracing::info!(%address, log_type = %manifest.log_type, "opened log");
    Ok(LogHandle::new(
      manifest,
      address.clone(),
      Arc::clone(&self.node),
      Arc::clone(&self.cache),
    ))
  }
}
