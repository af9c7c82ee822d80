//! Dry-run wrapper: reads go to the real broker, orders are only logged.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::error::{AuthError, FetchError, OrderError};
use crate::models::{Holding, OrderId, OrderRequest, Position};

use super::{AuthRequest, BrokerClient, Session};

pub struct DryRunBroker {
    inner: Arc<dyn BrokerClient>,
}

impl DryRunBroker {
    pub fn new(inner: Arc<dyn BrokerClient>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl BrokerClient for DryRunBroker {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn authenticate(&self, request: &AuthRequest) -> Result<Session, AuthError> {
        self.inner.authenticate(request).await
    }

    async fn deauthenticate(&self) -> Result<(), AuthError> {
        self.inner.deauthenticate().await
    }

    async fn place_order(&self, order: &OrderRequest<'_>) -> Result<OrderId, OrderError> {
        let order_id = format!("dry-run-{}", uuid::Uuid::new_v4().simple());
        info!(
            broker = %self.inner.name(),
            symbol = %order.symbol,
            quantity = order.quantity,
            direction = %order.direction,
            order_type = %order.order_type,
            product = %order.product,
            order_id = %order_id,
            "[DRY RUN] Would place order"
        );
        Ok(OrderId(order_id))
    }

    async fn get_positions(&self) -> Result<Vec<Position>, FetchError> {
        self.inner.get_positions().await
    }

    async fn get_holdings(&self) -> Result<Vec<Holding>, FetchError> {
        self.inner.get_holdings().await
    }
}
