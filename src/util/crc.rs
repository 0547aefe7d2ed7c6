//! CRC32 checksums for on-disk envelopes.

pub fn crc32(bytes: &[u8]) -> u32 {
  let mut hasher = crc32fast::Hasher::new();
  hasher.update(bytes);
  hasher.finalize()
}
