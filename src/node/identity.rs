//! Persisted node identity.

use crate::error::{LogMeshError, Result};
use crate::types::PeerIdentity;
use crate::util::fs::write_atomic;
use std::fs;
use std::path::Path;

const IDENTITY_FILE_NAME: &str = "identity";

/// Reuse the identity stored in `repo_dir`, or mint and store a new one.
pub(super) fn load_or_generate(repo_dir: &Path) -> Result<PeerIdentity> {
  let path = repo_dir.join(IDENTITY_FILE_NAME);
  if path.exists() {
    let raw = fs::read_to_string(&path)?;
    return raw.trim().parse::<PeerIdentity>().map_err(|error| {
      LogMeshError::Internal(format!("identity file {} is invalid: {error}", path.display()))
    });
  }

  let identity = PeerIdentity::random();
  write_atomic(&path, identity.to_string().as_bytes())?;
  tracing::info!(identity = %identity.short(), "generated node identity");
  Ok(identity)
}

#[cfg(test)]
mod tests {
  use super::load_or_generate;

  #[test]
  fn generated_identity_is_reused() {
    let dir = tempfile::tempdir().expect("tempdir");
    let first = load_or_generate(dir.path()).expect("generate");
    let second = load_or_generate(dir.path()).expect("load");
    assert_eq!(first, second);
  }

  #[test]
  fn garbage_identity_file_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("identity"), "not-hex").expect("write");
    assert!(load_or_generate(dir.path()).is_err());
  }
}
