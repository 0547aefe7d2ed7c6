//! Append-only log library.
//!
//! Entries form a hash-linked DAG stored as blocks in the node's content
//! store. [`LogLibrary`] derives addresses and creates or opens logs;
//! [`LogHandle`] is a live session with its own materialized view.

pub mod entry;
mod handle;
mod library;
pub mod manifest;
pub mod oplog;
mod replicator;

pub use entry::Entry;
pub use handle::LogHandle;
pub use library::LogLibrary;
pub use manifest::LogManifest;
pub use oplog::{IteratorOptions, Oplog};
