//! Resolve, attach and append.
//!
//! The coordinator is the thin policy layer over [`LogLibrary`]: it decides
//! whether a named log already exists, attaches to it or creates it, and maps
//! collaborator failures onto the caller-facing error taxonomy.

use crate::config::CreateOptions;
use crate::error::{LogMeshError, Result};
use crate::log::{LogHandle, LogLibrary};
use crate::types::{EntryHash, LogName, LogType, Resolution};
use std::time::Duration;

/// Backoff schedule for [`LogCoordinator::open_or_create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  /// Total attempts, including the first.
  pub attempts: u32,
  /// Delay before the second attempt; doubles after each failure.
  pub base_delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      attempts: 3,
      base_delay: Duration::from_millis(200),
    }
  }
}

impl RetryPolicy {
  pub fn new(attempts: u32, base_delay: Duration) -> Self {
    Self {
      attempts,
      base_delay,
    }
  }

  /// A single attempt.
  pub fn none() -> Self {
    Self::new(1, Duration::ZERO)
  }

  fn delay_after(&self, failed_attempts: u32) -> Duration {
    let exponent = failed_attempts.saturating_sub(1).min(16);
    self.base_delay.saturating_mul(1u32 << exponent)
  }
}

#[derive(Debug)]
pub struct LogCoordinator {
  library: LogLibrary,
}

impl LogCoordinator {
  pub fn new(library: LogLibrary) -> Self {
    Self { library }
  }

  pub fn library(&self) -> &LogLibrary {
    &self.library
  }

  /// Look up the log `(name, log_type, options)` would live at. Never creates
  /// anything. Lookup failures are `ResolutionFailed`, which is distinct from
  /// a clean `Unresolved`.
  pub async fn resolve(
    &self,
    name: &LogName,
    log_type: LogType,
    options: &CreateOptions,
  ) -> Result<Resolution> {
    let address = self
      .library
      .determine_address(name, log_type, options)
      .map_err(|error| LogMeshError::ResolutionFailed(error.to_string()))?;

    let found = self
      .library
      .node()
      .has_block(&address.root())
      .await
      .map_err(|error| match error {
        LogMeshError::ResolutionFailed(_) => error,
        other => LogMeshError::ResolutionFailed(format!("lookup {address}: {other}")),
      })?;

    if found {
      tracing::debug!(%address, "log resolved");
      Ok(Resolution::Resolved(address))
    } else {
      tracing::debug!(%address, "log not found");
      Ok(Resolution::Unresolved)
    }
  }

  /// Obtain a live handle: open the resolved log, or create one when the
  /// resolution came back empty.
  pub async fn attach(
    &self,
    name: &LogName,
    resolution: &Resolution,
    log_type: LogType,
    options: &CreateOptions,
  ) -> Result<LogHandle> {
    let attached = match resolution {
      Resolution::Resolved(address) => {
        if address.name() != name {
          return Err(LogMeshError::InvalidAddress(format!(
            "{address} does not name log {name}"
          )));
        }
        self.library.open(address, log_type).await
      }
      Resolution::Unresolved => self.library.create(name, log_type, options).await,
    };

    attached.map_err(|error| match error {
      LogMeshError::TypeMismatch { .. }
      | LogMeshError::InvalidAddress(_)
      | LogMeshError::UnsupportedLogType(_)
      | LogMeshError::AttachFailed(_) => error,
      other => LogMeshError::AttachFailed(other.to_string()),
    })
  }

  /// Append `payload` to `handle`. Returns once the entry is stored locally.
  pub async fn append(&self, handle: &LogHandle, payload: impl Into<Vec<u8>>) -> Result<EntryHash> {
    let hash = handle.append(payload).await?;
    tracing::debug!(address = %handle.address(), entry = %hash.short(), "appended");
    Ok(hash)
  }

  /// Resolve then attach, retrying retryable failures with exponential
  /// backoff.
  pub async fn open_or_create(
    &self,
    name: &LogName,
    log_type: LogType,
    options: &CreateOptions,
    retry: RetryPolicy,
  ) -> Result<LogHandle> {
    let attempts = retry.attempts.max(1);
    let mut attempt = 1;

    loop {
      let outcome = match self.resolve(name, log_type, options).await {
        Ok(resolution) => self.attach(name, &resolution, log_type, options).await,
        Err(error) => Err(error),
      };

      match outcome {
        Ok(handle) => {
          tracing::info!(address = %handle.address(), attempt, "log attached");
          return Ok(handle);
        }
        Err(error) if error.is_retryable() && attempt < attempts => {
          let delay = retry.delay_after(attempt);
          tracing::warn!(%name, attempt, ?delay, %error, "attach failed, retrying");
          tokio::time::sleep(delay).await;
          attempt += 1;
        }
        Err(error) => {
          tracing::error!(%name, attempt, %error, "attach failed");
          return Err(error);
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::RetryPolicy;
  use std::time::Duration;

  #[test]
  fn backoff_doubles() {
    let policy = RetryPolicy::new(4, Duration::from_millis(10));
    assert_eq!(policy.delay_after(1), Duration::from_millis(10));
    assert_eq!(policy.delay_after(2), Duration::from_millis(20));
    assert_eq!(policy.delay_after(3), Duration::from_millis(40));
    assert_eq!(RetryPolicy::none().delay_after(1), Duration::ZERO);
  }
}
