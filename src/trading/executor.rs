//! Replication executor: fans signals out to every child account.
//!
//! Each child runs as an independent future; signals for one child are
//! placed strictly in order. A failed (child, signal) pair is logged and
//! recorded, then replication carries on with the next signal and with the
//! other children. Nothing is retried or rolled back.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, error, info};

use crate::broker::BrokerClient;
use crate::error::OrderError;
use crate::models::{OrderId, TradeSignal};

/// A child account and the broker session used to trade it.
#[derive(Clone)]
pub struct ChildConnection {
    pub account_id: String,
    pub client: Arc<dyn BrokerClient>,
}

impl ChildConnection {
    pub fn new(account_id: impl Into<String>, client: Arc<dyn BrokerClient>) -> Self {
        Self {
            account_id: account_id.into(),
            client,
        }
    }
}

impl std::fmt::Debug for ChildConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChildConnection")
            .field("account_id", &self.account_id)
            .field("broker", &self.client.name())
            .finish()
    }
}

/// Result of replicating one signal onto one child.
#[derive(Debug)]
pub struct ReplicationOutcome {
    pub account_id: String,
    pub signal: TradeSignal,
    pub result: Result<OrderId, OrderError>,
}

impl ReplicationOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Every (child, signal) outcome of one `apply` call, grouped by child in
/// the order children were given and by signal within each child.
#[derive(Debug, Default)]
pub struct ReplicationReport {
    outcomes: Vec<ReplicationOutcome>,
}

impl ReplicationReport {
    #[cfg(test)]
    pub fn outcomes(&self) -> &[ReplicationOutcome] {
        &self.outcomes
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn is_clean(&self) -> bool {
        self.outcomes.iter().all(ReplicationOutcome::is_success)
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    #[cfg(test)]
    pub fn for_account<'a>(
        &'a self,
        account_id: &'a str,
    ) -> impl Iterator<Item = &'a ReplicationOutcome> + 'a {
        self.outcomes.iter().filter(move |o| o.account_id == account_id)
    }
}

/// Applies trade signals to child accounts.
#[derive(Debug, Clone)]
pub struct ReplicationExecutor {
    order_timeout: Duration,
}

impl ReplicationExecutor {
    pub fn new(order_timeout: Duration) -> Self {
        Self { order_timeout }
    }

    /// Place every signal on every child. Returns once all children are done.
    pub async fn apply(
        &self,
        signals: &[TradeSignal],
        children: &[ChildConnection],
    ) -> ReplicationReport {
        if signals.is_empty() || children.is_empty() {
            return ReplicationReport::default();
        }

        let runs = children
            .iter()
            .map(|child| self.apply_to_child(signals, child));
        let outcomes = join_all(runs).await.into_iter().flatten().collect();

        ReplicationReport { outcomes }
    }

    async fn apply_to_child(
        &self,
        signals: &[TradeSignal],
        child: &ChildConnection,
    ) -> Vec<ReplicationOutcome> {
        info!(
            account = %child.account_id,
            count = signals.len(),
            "Replicating trades to child account"
        );

        let mut outcomes = Vec::with_capacity(signals.len());
        for signal in signals {
            let result = self.place(child, signal).await;

            match &result {
                Ok(order_id) => {
                    info!(
                        account = %child.account_id,
                        order_id = %order_id,
                        signal = %signal,
                        "Order placed"
                    );
                }
                Err(e) => {
                    error!(
                        account = %child.account_id,
                        symbol = %signal.symbol,
                        quantity = signal.quantity,
                        direction = %signal.direction,
                        product = %signal.product,
                        error = %e,
                        "Failed to replicate trade"
                    );
                }
            }

            outcomes.push(ReplicationOutcome {
                account_id: child.account_id.clone(),
                signal: signal.clone(),
                result,
            });
        }

        outcomes
    }

    async fn place(&self, child: &ChildConnection, signal: &TradeSignal) -> Result<OrderId, OrderError> {
        debug!(account = %child.account_id, signal = %signal, "Placing order");

        let order = signal.to_order();
        match tokio::time::timeout(self.order_timeout, child.client.place_order(&order)).await {
            Ok(result) => result,
            Err(_) => Err(OrderError::Timeout(self.order_timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Direction;
    use crate::trading::testing::RecordingChild;

    fn signal(symbol: &str, quantity: u64, direction: Direction) -> TradeSignal {
        TradeSignal::market(symbol, quantity, direction, "CNC").unwrap()
    }

    fn executor() -> ReplicationExecutor {
        ReplicationExecutor::new(Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_every_child_receives_every_signal_in_order() {
        let a = RecordingChild::new();
        let b = RecordingChild::new();
        let children = vec![
            ChildConnection::new("CHILD_A", a.clone()),
            ChildConnection::new("CHILD_B", b.clone()),
        ];
        let signals = vec![
            signal("INFY", 15, Direction::Sell),
            signal("TCS", 10, Direction::Buy),
        ];

        let report = executor().apply(&signals, &children).await;

        assert!(report.is_clean());
        assert_eq!(report.succeeded(), 4);
        for child in [&a, &b] {
            assert_eq!(
                child.orders(),
                vec![
                    ("INFY".to_string(), 15, Direction::Sell, "CNC".to_string()),
                    ("TCS".to_string(), 10, Direction::Buy, "CNC".to_string()),
                ]
            );
        }
    }

    #[tokio::test]
    async fn test_failure_is_isolated_per_child_and_signal() {
        // Scenario D: one child rejects a signal, the other processes everything
        let healthy = RecordingChild::new();
        let flaky = RecordingChild::failing_on(&["SBIN"]);
        let children = vec![
            ChildConnection::new("FLAKY", flaky.clone()),
            ChildConnection::new("HEALTHY", healthy.clone()),
        ];
        let signals = vec![
            signal("ITC", 1, Direction::Buy),
            signal("SBIN", 2, Direction::Buy),
            signal("TCS", 3, Direction::Sell),
        ];

        let report = executor().apply(&signals, &children).await;

        assert_eq!(report.failed(), 1);
        assert_eq!(report.succeeded(), 5);
        assert_eq!(healthy.orders().len(), 3);

        // The failing child still attempted the signals after the failure
        assert_eq!(flaky.attempts(), 3);
        let flaky_results: Vec<bool> = report.for_account("FLAKY").map(|o| o.is_success()).collect();
        assert_eq!(flaky_results, vec![true, false, true]);
        assert!(report.for_account("HEALTHY").all(|o| o.is_success()));
    }

    #[tokio::test]
    async fn test_slow_child_times_out_without_blocking_others() {
        let slow = RecordingChild::delayed(Duration::from_secs(5));
        let fast = RecordingChild::new();
        let children = vec![
            ChildConnection::new("SLOW", slow.clone()),
            ChildConnection::new("FAST", fast.clone()),
        ];
        let signals = vec![signal("TCS", 1, Direction::Buy)];

        let report = executor().apply(&signals, &children).await;

        let slow_outcome: Vec<_> = report.for_account("SLOW").collect();
        assert!(matches!(slow_outcome[0].result, Err(OrderError::Timeout(_))));
        assert_eq!(fast.orders().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_inputs_make_no_calls() {
        let child = RecordingChild::new();
        let children = vec![ChildConnection::new("CHILD", child.clone())];

        let report = executor().apply(&[], &children).await;
        assert!(report.is_empty());
        assert_eq!(child.attempts(), 0);

        let report = executor().apply(&[signal("TCS", 1, Direction::Buy)], &[]).await;
        assert!(report.is_empty());
    }

    #[tokio::test]
    async fn test_report_groups_by_child_order() {
        let children = vec![
            ChildConnection::new("FIRST", RecordingChild::new()),
            ChildConnection::new("SECOND", RecordingChild::new()),
        ];
        let signals = vec![signal("A", 1, Direction::Buy), signal("B", 1, Direction::Buy)];

        let report = executor().apply(&signals, &children).await;
        let order: Vec<(&str, &str)> = report
            .outcomes()
            .iter()
            .map(|o| (o.account_id.as_str(), o.signal.symbol.as_str()))
            .collect();

        assert_eq!(
            order,
            vec![("FIRST", "A"), ("FIRST", "B"), ("SECOND", "A"), ("SECOND", "B")]
        );
    }
}
