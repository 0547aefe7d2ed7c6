//! Core identifiers: peers, logs, addresses, entry hashes.

use crate::constants::{ADDRESS_PROTOCOL, ANY_WRITER};
use crate::error::{LogMeshError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Identity of a running node. Immutable for the lifetime of the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct PeerIdentity([u8; 32]);

impl PeerIdentity {
  pub const fn from_bytes(bytes: [u8; 32]) -> Self {
    Self(bytes)
  }

  pub fn random() -> Self {
    Self(rand::random())
  }

  pub fn as_bytes(&self) -> &[u8; 32] {
    &self.0
  }

  /// First eight hex characters, for log lines.
  pub fn short(&self) -> String {
    hex::encode(&self.0[..4])
  }
}

impl fmt::Display for PeerIdentity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", hex::encode(self.0))
  }
}

impl FromStr for PeerIdentity {
  type Err = LogMeshError;

  fn from_str(raw: &str) -> Result<Self> {
    decode_hex32(raw, "peer identity").map(Self)
  }
}

impl From<PeerIdentity> for String {
  fn from(value: PeerIdentity) -> Self {
    value.to_string()
  }
}

impl TryFrom<String> for PeerIdentity {
  type Error = LogMeshError;

  fn try_from(value: String) -> Result<Self> {
    value.parse()
  }
}

/// Content hash of an entry or block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct EntryHash([u8; 32]);

impl EntryHash {
  pub const fn from_bytes(bytes: [u8; 32]) -> Self {
    Self(bytes)
  }

  /// Hash arbitrary bytes into a content address.
  pub fn digest(bytes: &[u8]) -> Self {
    Self(*blake3::hash(bytes).as_bytes())
  }

  pub fn as_bytes(&self) -> &[u8; 32] {
    &self.0
  }

  pub fn short(&self) -> String {
    hex::encode(&self.0[..4])
  }
}

impl fmt::Display for EntryHash {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", hex::encode(self.0))
  }
}

impl FromStr for EntryHash {
  type Err = LogMeshError;

  fn from_str(raw: &str) -> Result<Self> {
    decode_hex32(raw, "entry hash").map(Self)
  }
}

impl From<EntryHash> for String {
  fn from(value: EntryHash) -> Self {
    value.to_string()
  }
}

impl TryFrom<String> for EntryHash {
  type Error = LogMeshError;

  fn try_from(value: String) -> Result<Self> {
    value.parse()
  }
}

/// Human-chosen log name. Not globally unique.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct LogName(String);

impl LogName {
  pub fn new(name: impl Into<String>) -> Result<Self> {
    let name = name.into();
    if name.is_empty() {
      return Err(LogMeshError::InvalidAddress("log name is empty".to_string()));
    }
    if name.contains('/') {
      return Err(LogMeshError::InvalidAddress(format!(
        "log name must not contain '/': {name}"
      )));
    }
    Ok(Self(name))
  }

  /// Names produced by [`crate::util::random`] never need validation.
  pub(crate) fn from_generated(name: String) -> Self {
    debug_assert!(!name.is_empty() && !name.contains('/'));
    Self(name)
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for LogName {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl FromStr for LogName {
  type Err = LogMeshError;

  fn from_str(raw: &str) -> Result<Self> {
    Self::new(raw)
  }
}

impl From<LogName> for String {
  fn from(value: LogName) -> Self {
    value.0
  }
}

impl TryFrom<String> for LogName {
  type Error = LogMeshError;

  fn try_from(value: String) -> Result<Self> {
    Self::new(value)
  }
}

/// Kind of log a manifest declares. Only [`LogType::EventLog`] is opened by
/// this crate; the others exist so foreign manifests are recognised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogType {
  #[default]
  EventLog,
  Feed,
  KeyValue,
  DocStore,
  Counter,
}

impl LogType {
  pub fn is_append_only(&self) -> bool {
    matches!(self, LogType::EventLog)
  }
}

impl fmt::Display for LogType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let value = match self {
      LogType::EventLog => "eventlog",
      LogType::Feed => "feed",
      LogType::KeyValue => "keyvalue",
      LogType::DocStore => "docstore",
      LogType::Counter => "counter",
    };
    write!(f, "{value}")
  }
}

impl FromStr for LogType {
  type Err = LogMeshError;

  fn from_str(raw: &str) -> Result<Self> {
    match raw {
      "eventlog" => Ok(Self::EventLog),
      "feed" => Ok(Self::Feed),
      "keyvalue" => Ok(Self::KeyValue),
      "docstore" => Ok(Self::DocStore),
      "counter" => Ok(Self::Counter),
      _ => Err(LogMeshError::InvalidAddress(format!("unknown log type: {raw}"))),
    }
  }
}

/// Principals allowed to append. `"*"` admits anyone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccessPolicy {
  pub write: BTreeSet<String>,
}

impl AccessPolicy {
  /// Anyone may append.
  pub fn open() -> Self {
    Self {
      write: BTreeSet::from([ANY_WRITER.to_string()]),
    }
  }

  pub fn restricted(writers: impl IntoIterator<Item = PeerIdentity>) -> Self {
    Self {
      write: writers.into_iter().map(|peer| peer.to_string()).collect(),
    }
  }
}

impl Default for AccessPolicy {
  fn default() -> Self {
    Self::open()
  }
}

/// Content-derived address of one log instance:
/// `/logmesh/<manifest hash>/<name>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct LogAddress {
  root: EntryHash,
  name: LogName,
}

impl LogAddress {
  pub fn new(root: EntryHash, name: LogName) -> Self {
    Self { root, name }
  }

  /// Hash of the manifest block this address points at.
  pub fn root(&self) -> EntryHash {
    self.root
  }

  pub fn name(&self) -> &LogName {
    &self.name
  }

  /// Pubsub topic peers meet on for this log.
  pub fn topic(&self) -> String {
    self.to_string()
  }
}

impl fmt::Display for LogAddress {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "/{}/{}/{}", ADDRESS_PROTOCOL, self.root, self.name)
  }
}

impl FromStr for LogAddress {
  type Err = LogMeshError;

  fn from_str(raw: &str) -> Result<Self> {
    let mut parts = raw.split('/');

    if parts.next() != Some("") {
      return Err(LogMeshError::InvalidAddress(format!(
        "address must start with '/': {raw}"
      )));
    }
    if parts.next() != Some(ADDRESS_PROTOCOL) {
      return Err(LogMeshError::InvalidAddress(format!(
        "address protocol must be {ADDRESS_PROTOCOL}: {raw}"
      )));
    }

    let root = parts
      .next()
      .ok_or_else(|| LogMeshError::InvalidAddress(format!("address root missing: {raw}")))?
      .parse::<EntryHash>()?;
    let name = LogName::new(
      parts
        .next()
        .ok_or_else(|| LogMeshError::InvalidAddress(format!("address name missing: {raw}")))?,
    )?;

    if parts.next().is_some() {
      return Err(LogMeshError::InvalidAddress(format!(
        "address has trailing components: {raw}"
      )));
    }

    Ok(Self::new(root, name))
  }
}

impl From<LogAddress> for String {
  fn from(value: LogAddress) -> Self {
    value.to_string()
  }
}

impl TryFrom<String> for LogAddress {
  type Error = LogMeshError;

  fn try_from(value: String) -> Result<Self> {
    value.parse()
  }
}

/// Outcome of address resolution. `Unresolved` is not an error: it means
/// "create new".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
  Resolved(LogAddress),
  Unresolved,
}

impl Resolution {
  pub fn address(&self) -> Option<&LogAddress> {
    match self {
      Resolution::Resolved(address) => Some(address),
      Resolution::Unresolved => None,
    }
  }

  pub fn is_resolved(&self) -> bool {
    matches!(self, Resolution::Resolved(_))
  }
}

fn decode_hex32(raw: &str, component: &'static str) -> Result<[u8; 32]> {
  if raw.len() != 64 || !raw.bytes().all(|byte| byte.is_ascii_hexdigit()) {
    return Err(LogMeshError::InvalidAddress(format!(
      "invalid {component}: {raw}"
    )));
  }

  let mut bytes = [0u8; 32];
  hex::decode_to_slice(raw, &mut bytes)
    .map_err(|error| LogMeshError::InvalidAddress(format!("invalid {component}: {error}")))?;
  Ok(bytes)
}
