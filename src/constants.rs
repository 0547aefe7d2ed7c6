//! Shared constants.

use std::time::Duration;

/// First path component of every log address.
pub const ADDRESS_PROTOCOL: &str = "logmesh";

/// Writer principal that admits any identity.
pub const ANY_WRITER: &str = "*";

/// Default data directory layout, relative to the working directory.
pub const DEFAULT_DATA_DIR: &str = "./.data";
pub const NODE_DIR_NAME: &str = "node";
pub const LOG_DIR_NAME: &str = "log";

/// Swarm addresses handed to the transport untouched.
pub const DEFAULT_SWARM_ADDRESSES: &[&str] = &[
  "/dns4/wrtc-star1.par.dwebops.pub/tcp/443/wss/p2p-webrtc-star",
  "/dns4/wrtc-star2.sjc.dwebops.pub/tcp/443/wss/p2p-webrtc-star",
  "/dns4/webrtc-star.discovery.libp2p.io/tcp/443/wss/p2p-webrtc-star/",
];

pub const DEFAULT_NETWORK_TIMEOUT: Duration = Duration::from_secs(30);

/// Random log names are drawn from this alphabet.
pub const LOG_NAME_CHARSET: &[u8] =
  b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
pub const RANDOM_LOG_NAME_LEN: usize = 10;

/// Channel capacities.
pub const LOG_EVENT_CHANNEL_CAPACITY: usize = 1024;
pub const MONITOR_CHANNEL_CAPACITY: usize = 1024;
pub const PEER_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Environment overrides read by [`crate::config::AppConfig::from_env`].
pub const ENV_DATA_DIR: &str = "LOGMESH_DATA_DIR";
pub const ENV_NETWORK_TIMEOUT_MS: &str = "LOGMESH_NETWORK_TIMEOUT_MS";
