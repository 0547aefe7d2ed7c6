//! In-process network fabric.
//!
//! [`Swarm`] stands in for the peer-to-peer transport: it knows which nodes
//! are online, routes pubsub messages between log sessions, and lets a node
//! fetch blocks held by its peers. Transport addresses never reach it.

mod swarm;

pub use swarm::{PubsubMessage, Subscription, Swarm};

use crate::types::PeerIdentity;

/// Connectivity change observed by a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerEvent {
  Connected(PeerIdentity),
  Disconnected(PeerIdentity),
}
