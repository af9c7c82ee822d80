//! Replication engine: position diff, master tracking, child fan-out.

mod config;
mod diff;
mod executor;
mod tracker;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{ReplicationConfig, VanishedPolicy};
pub use diff::diff;
pub use executor::{ChildConnection, ReplicationExecutor, ReplicationReport};
pub use tracker::MasterTracker;
