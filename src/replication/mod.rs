//! Replication lifecycle observation.
//!
//! Log sessions emit [`LogEvent`]s; a [`ReplicationMonitor`] folds them into
//! a [`ReplicationState`] that callers can snapshot or wait on.

mod events;
mod monitor;
mod state;

pub use events::{LogEvent, Progress};
pub use monitor::ReplicationMonitor;
pub use state::{
  AnomalousNotification, AnomalyKind, Applied, LifecycleState, ReplicationState,
};
