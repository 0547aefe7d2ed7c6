//! logmesh
//!
//! Resolve, attach to and observe replicated append-only logs hosted on a
//! peer node.
//!
//! # Layout
//!
//! - [`net`]: in-process swarm carrying pubsub and block exchange
//! - [`node`]: peer node with identity, block store and pubsub access
//! - [`store`]: content-addressed block stores and the heads cache
//! - [`log`]: entry DAG, manifests and live log sessions
//! - [`replication`]: lifecycle events and the monitor that folds them
//! - [`coordinator`]: resolve, attach and append

pub mod config;
pub mod constants;
pub mod coordinator;
pub mod error;
pub mod log;
pub mod net;
pub mod node;
pub mod replication;
pub mod store;
pub mod types;
pub mod util;

pub use config::{AppConfig, CreateOptions, LogOptions, NodeOptions};
pub use coordinator::{LogCoordinator, RetryPolicy};
pub use error::{LogMeshError, Result};
pub use log::{LogHandle, LogLibrary};
pub use net::Swarm;
pub use node::PeerNode;
pub use replication::{LogEvent, ReplicationMonitor, ReplicationState};
pub use types::{AccessPolicy, EntryHash, LogAddress, LogName, LogType, PeerIdentity, Resolution};
