//! Master account tracker: owns the position baseline and computes per-poll deltas.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::broker::BrokerClient;
use crate::error::FetchError;
use crate::models::{PositionSnapshot, TradeSignal};

use super::{diff, ReplicationConfig};

/// Watches the master account for position changes.
///
/// The baseline is taken once at construction, so positions that already
/// existed before startup are never replicated; only later changes are.
pub struct MasterTracker {
    master: Arc<dyn BrokerClient>,
    config: ReplicationConfig,
    baseline: PositionSnapshot,
}

impl MasterTracker {
    /// Fetch the initial baseline from the master account.
    pub async fn new(
        master: Arc<dyn BrokerClient>,
        config: ReplicationConfig,
    ) -> Result<Self, FetchError> {
        let baseline = fetch_snapshot(master.as_ref(), config.request_timeout).await?;

        info!(
            broker = %master.name(),
            positions = baseline.len(),
            open = baseline.open_count(),
            "Master baseline established"
        );

        Ok(Self::with_baseline(master, config, baseline))
    }

    /// Start from a known baseline instead of fetching one.
    pub fn with_baseline(
        master: Arc<dyn BrokerClient>,
        config: ReplicationConfig,
        baseline: PositionSnapshot,
    ) -> Self {
        Self {
            master,
            config,
            baseline,
        }
    }

    /// Fetch a fresh snapshot and return the signals that move the old
    /// baseline to it. The baseline is replaced only when the fetch succeeds.
    pub async fn poll(&mut self) -> Result<Vec<TradeSignal>, FetchError> {
        let current = fetch_snapshot(self.master.as_ref(), self.config.request_timeout).await?;
        let signals = diff(&self.baseline, &current, self.config.vanished_positions);

        debug!(
            positions = current.len(),
            signals = signals.len(),
            "Master positions polled"
        );

        self.baseline = current;
        Ok(signals)
    }

    #[cfg(test)]
    pub fn baseline(&self) -> &PositionSnapshot {
        &self.baseline
    }
}

/// Fetch positions with an upper bound on how long the broker may take.
async fn fetch_snapshot(
    client: &dyn BrokerClient,
    timeout: Duration,
) -> Result<PositionSnapshot, FetchError> {
    let positions = tokio::time::timeout(timeout, client.get_positions())
        .await
        .map_err(|_| FetchError::Timeout(timeout))??;

    Ok(PositionSnapshot::from_positions(positions))
}
