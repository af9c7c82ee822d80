//! In-memory brokers for exercising the replication engine.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::broker::{AuthRequest, BrokerClient, Session};
use crate::error::{AuthError, FetchError, OrderError};
use crate::models::{Direction, Holding, OrderId, OrderRequest, Position};

/// Master broker that replays a scripted sequence of position fetches.
///
/// Once the script runs out, the last successful position list repeats.
pub struct ScriptedMaster {
    script: Mutex<VecDeque<Result<Vec<Position>, FetchError>>>,
    last: Mutex<Vec<Position>>,
    delay: Option<Duration>,
    fetches: AtomicUsize,
}

impl ScriptedMaster {
    pub fn new(script: Vec<Result<Vec<Position>, FetchError>>) -> Arc<Self> {
        Arc::new(Self::build(script, None))
    }

    pub fn delayed(script: Vec<Result<Vec<Position>, FetchError>>, delay: Duration) -> Arc<Self> {
        Arc::new(Self::build(script, Some(delay)))
    }

    fn build(script: Vec<Result<Vec<Position>, FetchError>>, delay: Option<Duration>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(Vec::new()),
            delay,
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrokerClient for ScriptedMaster {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn authenticate(&self, _: &AuthRequest) -> Result<Session, AuthError> {
        Err(AuthError::MissingRequestToken)
    }

    async fn deauthenticate(&self) -> Result<(), AuthError> {
        Ok(())
    }

    async fn place_order(&self, order: &OrderRequest<'_>) -> Result<OrderId, OrderError> {
        Err(OrderError::UnknownInstrument(order.symbol.to_string()))
    }

    async fn get_positions(&self) -> Result<Vec<Position>, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(positions)) => {
                *self.last.lock().unwrap() = positions.clone();
                Ok(positions)
            }
            Some(Err(e)) => Err(e),
            None => Ok(self.last.lock().unwrap().clone()),
        }
    }

    async fn get_holdings(&self) -> Result<Vec<Holding>, FetchError> {
        Ok(Vec::new())
    }
}

pub type RecordedOrder = (String, u64, Direction, String);

/// Child broker that records every accepted order.
pub struct RecordingChild {
    orders: Mutex<Vec<RecordedOrder>>,
    failing_symbols: HashSet<String>,
    delay: Option<Duration>,
    attempts: AtomicUsize,
}

impl RecordingChild {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::build(&[], None))
    }

    /// Rejects every order for the given symbols.
    pub fn failing_on(symbols: &[&str]) -> Arc<Self> {
        Arc::new(Self::build(symbols, None))
    }

    pub fn delayed(delay: Duration) -> Arc<Self> {
        Arc::new(Self::build(&[], Some(delay)))
    }

    fn build(symbols: &[&str], delay: Option<Duration>) -> Self {
        Self {
            orders: Mutex::new(Vec::new()),
            failing_symbols: symbols.iter().map(|s| s.to_string()).collect(),
            delay,
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn orders(&self) -> Vec<RecordedOrder> {
        self.orders.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrokerClient for RecordingChild {
    fn name(&self) -> &str {
        "recording"
    }

    async fn authenticate(&self, _: &AuthRequest) -> Result<Session, AuthError> {
        Err(AuthError::MissingRequestToken)
    }

    async fn deauthenticate(&self) -> Result<(), AuthError> {
        Ok(())
    }

    async fn place_order(&self, order: &OrderRequest<'_>) -> Result<OrderId, OrderError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing_symbols.contains(order.symbol) {
            return Err(OrderError::Rejected {
                status: 400,
                message: "insufficient funds".to_string(),
            });
        }

        self.orders.lock().unwrap().push((
            order.symbol.to_string(),
            order.quantity,
            order.direction,
            order.product.to_string(),
        ));
        Ok(OrderId(format!("order-{attempt}")))
    }

    async fn get_positions(&self) -> Result<Vec<Position>, FetchError> {
        Ok(Vec::new())
    }

    async fn get_holdings(&self) -> Result<Vec<Holding>, FetchError> {
        Ok(Vec::new())
    }
}
