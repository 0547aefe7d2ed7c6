//! Log manifests.
//!
//! A manifest fixes a log's name, type and access policy. It is stored as a
//! block; the block's hash is the root of the log's address, so none of the
//! three can change once the address exists.

use crate::error::{LogMeshError, Result};
use crate::types::{AccessPolicy, EntryHash, LogAddress, LogName, LogType};
use crate::util::crc::crc32;
use serde::{Deserialize, Serialize};

pub const MANIFEST_ENVELOPE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogManifest {
  pub name: LogName,
  pub log_type: LogType,
  pub access_policy: AccessPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ManifestEnvelope {
  version: u32,
  payload_crc32: u32,
  manifest: LogManifest,
}

impl LogManifest {
  pub fn new(name: LogName, log_type: LogType, access_policy: AccessPolicy) -> Self {
    Self {
      name,
      log_type,
      access_policy,
    }
  }

  /// Encoded block. Identical manifests always encode to identical bytes.
  pub fn encode(&self) -> Result<Vec<u8>> {
    let payload = encode_payload(self)?;
    let envelope = ManifestEnvelope {
      version: MANIFEST_ENVELOPE_VERSION,
      payload_crc32: crc32(&payload),
      manifest: self.clone(),
    };

    serde_json::to_vec(&envelope).map_err(|error| {
      LogMeshError::Serialization(format!("encode log manifest envelope: {error}"))
    })
  }

  pub fn decode(bytes: &[u8]) -> Result<Self> {
    let envelope: ManifestEnvelope = serde_json::from_slice(bytes).map_err(|error| {
      LogMeshError::Serialization(format!("decode log manifest envelope: {error}"))
    })?;

    if envelope.version != MANIFEST_ENVELOPE_VERSION {
      return Err(LogMeshError::VersionMismatch {
        required: envelope.version,
        current: MANIFEST_ENVELOPE_VERSION,
      });
    }

    let computed = crc32(&encode_payload(&envelope.manifest)?);
    if computed != envelope.payload_crc32 {
      return Err(LogMeshError::CrcMismatch {
        stored: envelope.payload_crc32,
        computed,
      });
    }

    Ok(envelope.manifest)
  }

  /// Address this manifest is stored under.
  pub fn address(&self) -> Result<LogAddress> {
    Ok(LogAddress::new(
      EntryHash::digest(&self.encode()?),
      self.name.clone(),
    ))
  }
}

fn encode_payload(manifest: &LogManifest) -> Result<Vec<u8>> {
  serde_json::to_vec(manifest).map_err(|error| {
    LogMeshError::Serialization(format!("encode log manifest payload: {error}"))
  })
}
