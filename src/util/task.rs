//! Moving synchronous disk work off the async workers.

use crate::error::{LogMeshError, Result};

/// Run `f` on the blocking pool and flatten the join error into
/// [`LogMeshError::Internal`].
pub async fn run_blocking<T, F>(what: &'static str, f: F) -> Result<T>
where
  T: Send + 'static,
  F: FnOnce() -> Result<T> + Send + 'static,
{
  tokio::task::spawn_blocking(f)
    .await
    .map_err(|error| LogMeshError::Internal(format!("{what} task failed: {error}")))?
}
