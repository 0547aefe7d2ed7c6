//! Error types for logmesh.

use crate::types::{EntryHash, LogType};
use thiserror::Error;

/// Errors surfaced by the node, log library and coordinator.
///
/// Anomalous replication notifications never surface here; the monitor
/// absorbs them (see [`crate::replication::AnomalousNotification`]).
#[derive(Debug, Error)]
pub enum LogMeshError {
  /// Lookup failed on the network or in the local store. Retryable.
  #[error("address resolution failed: {0}")]
  ResolutionFailed(String),

  /// The stored log type differs from the type the caller expects. Fatal.
  #[error("log type mismatch: expected {expected}, address holds {actual}")]
  TypeMismatch { expected: LogType, actual: LogType },

  /// Create/open failed on storage or network. Retryable.
  #[error("attach failed: {0}")]
  AttachFailed(String),

  /// Local storage rejected the entry.
  #[error("append failed: {0}")]
  AppendFailed(String),

  #[error("log is closed: {0}")]
  LogClosed(String),

  #[error("unsupported log type: {0}")]
  UnsupportedLogType(LogType),

  #[error("invalid log address: {0}")]
  InvalidAddress(String),

  #[error("invalid entry: {0}")]
  InvalidEntry(String),

  #[error("block not found: {0}")]
  BlockNotFound(EntryHash),

  #[error("block failed integrity check: {0}")]
  CorruptBlock(EntryHash),

  #[error("checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
  CrcMismatch { stored: u32, computed: u32 },

  #[error("format version mismatch: found {required}, supported {current}")]
  VersionMismatch { required: u32, current: u32 },

  #[error("serialization error: {0}")]
  Serialization(String),

  #[error("peer node is stopped")]
  NodeStopped,

  #[error("replication monitor is stopped")]
  MonitorStopped,

  #[error("timed out after {0:?}")]
  Timeout(std::time::Duration),

  #[error("repository is locked by another node: {0}")]
  RepoLocked(String),

  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),

  #[error("internal error: {0}")]
  Internal(String),
}

impl LogMeshError {
  /// Whether retrying the failed operation (with backoff) can succeed.
  pub fn is_retryable(&self) -> bool {
    matches!(
      self,
      LogMeshError::ResolutionFailed(_) | LogMeshError::AttachFailed(_)
    )
  }
}

pub type Result<T> = std::result::Result<T, LogMeshError>;
