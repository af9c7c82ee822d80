//! Replication settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What to do when a master position disappears from the position list
/// entirely between two polls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VanishedPolicy {
    /// Close the vanished quantity on children, except for delivery
    /// products (CNC, MTF), which leave the list when they settle
    #[default]
    Close,
    /// Emit nothing; children keep the position
    Ignore,
}

/// Configuration for the replication engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Upper bound on any single broker call (position fetch, order placement)
    pub request_timeout: Duration,

    /// Handling of positions that vanish from the master's list
    pub vanished_positions: VanishedPolicy,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(15),
            vanished_positions: VanishedPolicy::Close,
        }
    }
}
