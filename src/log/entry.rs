//! Log entries and their binary frame.
//!
//! Frame layout (little endian):
//! `"LME1" | log id (32) | identity (32) | clock u64 | next count u32 |
//! next hashes (32 each) | payload len u32 | payload`.
//! An entry's hash is the blake3 hash of its frame.

use crate::error::{LogMeshError, Result};
use crate::types::{EntryHash, PeerIdentity};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};

const ENTRY_FRAME_MAGIC: &[u8; 4] = b"LME1";
const ENTRY_FIXED_BYTES: usize = 4 + 32 + 32 + 8 + 4 + 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
  pub hash: EntryHash,
  /// Root hash of the log's address; entries never cross logs.
  pub log_id: EntryHash,
  pub identity: PeerIdentity,
  /// Lamport time: one past the highest clock among `next`.
  pub clock: u64,
  /// Causal predecessors, sorted.
  pub next: Vec<EntryHash>,
  pub payload: Vec<u8>,
}

impl Entry {
  /// Build an entry and its encoded frame.
  pub fn create(
    log_id: EntryHash,
    identity: PeerIdentity,
    clock: u64,
    mut next: Vec<EntryHash>,
    payload: Vec<u8>,
  ) -> Result<(Self, Vec<u8>)> {
    next.sort();
    next.dedup();
    let bytes = encode_entry_frame(&log_id, &identity, clock, &next, &payload)?;
    let entry = Self {
      hash: EntryHash::digest(&bytes),
      log_id,
      identity,
      clock,
      next,
      payload,
    };
    Ok((entry, bytes))
  }

  pub fn decode(bytes: &[u8]) -> Result<Self> {
    decode_entry_frame(bytes)
  }
}

fn encode_entry_frame(
  log_id: &EntryHash,
  identity: &PeerIdentity,
  clock: u64,
  next: &[EntryHash],
  payload: &[u8],
) -> Result<Vec<u8>> {
  let next_count = u32::try_from(next.len())
    .map_err(|_| LogMeshError::InvalidEntry(format!("too many predecessors: {}", next.len())))?;
  let payload_len = u32::try_from(payload.len())
    .map_err(|_| LogMeshError::InvalidEntry(format!("entry payload too large: {}", payload.len())))?;

  let mut bytes = Vec::with_capacity(ENTRY_FIXED_BYTES + next.len() * 32 + payload.len());
  bytes.extend_from_slice(ENTRY_FRAME_MAGIC);
  bytes.extend_from_slice(log_id.as_bytes());
  bytes.extend_from_slice(identity.as_bytes());
  bytes.extend_from_slice(&clock.to_le_bytes());
  bytes.extend_from_slice(&next_count.to_le_bytes());
  for hash in next {
    bytes.extend_from_slice(hash.as_bytes());
  }
  bytes.extend_from_slice(&payload_len.to_le_bytes());
  bytes.extend_from_slice(payload);
  Ok(bytes)
}

fn decode_entry_frame(bytes: &[u8]) -> Result<Entry> {
  if bytes.len() < ENTRY_FIXED_BYTES {
    return Err(LogMeshError::InvalidEntry("entry frame too short".to_string()));
  }

  if &bytes[..4] != ENTRY_FRAME_MAGIC {
    return Err(LogMeshError::InvalidEntry(
      "entry frame has invalid magic".to_string(),
    ));
  }

  let truncated = |_| LogMeshError::InvalidEntry("entry frame truncated".to_string());
  let mut cursor = Cursor::new(&bytes[4..]);

  let log_id = EntryHash::from_bytes(read_hash(&mut cursor).map_err(truncated)?);
  let identity = PeerIdentity::from_bytes(read_hash(&mut cursor).map_err(truncated)?);
  let clock = cursor.read_u64::<LittleEndian>().map_err(truncated)?;
  let next_count = cursor.read_u32::<LittleEndian>().map_err(truncated)? as usize;

  if next_count.saturating_mul(32) > bytes.len() {
    return Err(LogMeshError::InvalidEntry(format!(
      "entry frame claims {next_count} predecessors"
    )));
  }
  let mut next = Vec::with_capacity(next_count);
  for _ in 0..next_count {
    next.push(EntryHash::from_bytes(read_hash(&mut cursor).map_err(truncated)?));
  }

  let payload_len = cursor.read_u32::<LittleEndian>().map_err(truncated)? as usize;
  if payload_len > bytes.len() {
    return Err(LogMeshError::InvalidEntry(
      "entry frame truncated".to_string(),
    ));
  }
  let mut payload = vec![0; payload_len];
  cursor.read_exact(&mut payload).map_err(truncated)?;

  if cursor.position() as usize != bytes.len() - 4 {
    return Err(LogMeshError::InvalidEntry(
      "entry frame contains unexpected trailing bytes".to_string(),
    ));
  }

  Ok(Entry {
    hash: EntryHash::digest(bytes),
    log_id,
    identity,
    clock,
    next,
    payload,
  })
}

fn read_hash(cursor: &mut Cursor<&[u8]>) -> std::io::Result<[u8; 32]> {
  let mut hash = [0u8; 32];
  cursor.read_exact(&mut hash)?;
  Ok(hash)
}
