//! Random log names.

use crate::constants::{LOG_NAME_CHARSET, RANDOM_LOG_NAME_LEN};
use crate::types::LogName;
use rand::Rng;

/// Draw a fresh alphanumeric log name of `length` characters.
pub fn random_log_name_with_len(length: usize) -> LogName {
  let mut rng = rand::thread_rng();
  let name: String = (0..length.max(1))
    .map(|_| LOG_NAME_CHARSET[rng.gen_range(0..LOG_NAME_CHARSET.len())] as char)
    .collect();
  LogName::from_generated(name)
}

pub fn random_log_name() -> LogName {
  random_log_name_with_len(RANDOM_LOG_NAME_LEN)
}
