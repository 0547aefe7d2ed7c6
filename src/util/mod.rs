//! Small helpers shared across modules.

pub mod crc;
pub mod fs;
pub mod random;
pub mod task;
