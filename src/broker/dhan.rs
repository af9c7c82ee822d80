//! DhanHQ v2 adapter.
//!
//! Dhan uses a long-lived static access token, so there is no login flow.
//! Orders address instruments by security id, resolved through the cached
//! [`InstrumentMaster`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::error::{AuthError, ConfigError, FetchError, OrderError};
use crate::models::{Holding, OrderId, OrderRequest, Position};

use super::instruments::InstrumentMaster;
use super::{http_client, parse_json, send, ApiFailure, AuthRequest, BrokerClient, Session};

pub const DHAN_API_URL: &str = "https://api.dhan.co/v2";
const DEFAULT_EXCHANGE_SEGMENT: &str = "NSE_EQ";

#[derive(Debug, Clone)]
pub struct DhanCredentials {
    pub client_id: String,
    pub access_token: String,
}

/// DhanHQ REST client.
pub struct DhanClient {
    http: Client,
    base_url: String,
    client_id: String,
    access_token: String,
    exchange_segment: String,
    instruments: InstrumentMaster,
}

/// Some Dhan endpoints return a bare list, older ones wrap it in `data`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DhanList<T> {
    Bare(Vec<T>),
    Wrapped {
        #[serde(default = "Vec::new")]
        data: Vec<T>,
    },
}

impl<T> DhanList<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            DhanList::Bare(items) => items,
            DhanList::Wrapped { data } => data,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DhanPosition {
    trading_symbol: String,
    net_qty: i64,
    product_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DhanHolding {
    trading_symbol: String,
    #[serde(default)]
    exchange: Option<String>,
    total_qty: i64,
    avg_cost_price: Decimal,
    #[serde(default)]
    last_traded_price: Option<Decimal>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DhanOrderPayload<'a> {
    dhan_client_id: &'a str,
    correlation_id: String,
    transaction_type: &'a str,
    exchange_segment: &'a str,
    product_type: &'a str,
    order_type: &'a str,
    validity: &'a str,
    security_id: &'a str,
    quantity: u64,
    price: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DhanOrderAck {
    order_id: String,
    #[serde(default)]
    order_status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DhanErrorBody {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

impl DhanClient {
    pub fn new(credentials: DhanCredentials, timeout: Duration) -> Result<Self, ConfigError> {
        Ok(Self {
            http: http_client(timeout)?,
            base_url: DHAN_API_URL.to_string(),
            client_id: credentials.client_id,
            access_token: credentials.access_token,
            exchange_segment: DEFAULT_EXCHANGE_SEGMENT.to_string(),
            instruments: InstrumentMaster::default(),
        })
    }

    /// Override the API host (for testing).
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Exchange segment orders are routed to (default NSE_EQ).
    pub fn with_exchange_segment(mut self, segment: String) -> Self {
        self.exchange_segment = segment;
        self
    }

    #[cfg(test)]
    pub fn with_instruments(mut self, instruments: InstrumentMaster) -> Self {
        self.instruments = instruments;
        self
    }

    /// Download the instrument master for this client's exchange.
    ///
    /// A failed download leaves the map empty: positions still work, orders
    /// fail with `UnknownInstrument`.
    pub async fn load_instruments(&mut self, url: &str) {
        let exchange = self.exchange_segment.split('_').next().map(str::to_string);
        match InstrumentMaster::fetch(&self.http, url, exchange.as_deref()).await {
            Ok(master) => {
                info!(instruments = master.len(), "Dhan instruments cached");
                self.instruments = master;
            }
            Err(e) => {
                error!(error = %e, "Could not load Dhan instrument master");
            }
        }
    }

    #[cfg(test)]
    pub fn instruments(&self) -> &InstrumentMaster {
        &self.instruments
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiFailure> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "Dhan GET");

        let request = self
            .http
            .get(&url)
            .header("access-token", &self.access_token)
            .header("client-id", &self.client_id)
            .header("Accept", "application/json");

        let (status, body) = send(request).await?;
        decode_response(status, &body)
    }
}

fn decode_response<T: DeserializeOwned>(status: StatusCode, body: &str) -> Result<T, ApiFailure> {
    if !status.is_success() {
        let message = match serde_json::from_str::<DhanErrorBody>(body) {
            Ok(DhanErrorBody {
                error_code: Some(code),
                error_message: Some(msg),
            }) => format!("{code}: {msg}"),
            Ok(DhanErrorBody {
                error_message: Some(msg),
                ..
            }) => msg,
            _ => super::truncate(body, 200).to_string(),
        };
        return Err(ApiFailure::Rejected {
            status: status.as_u16(),
            message,
        });
    }
    parse_json(body)
}

/// Dhan product codes for products named the Kite way.
fn dhan_product(product: &str) -> &str {
    match product {
        "MIS" => "INTRADAY",
        "NRML" => "MARGIN",
        other => other,
    }
}

#[async_trait]
impl BrokerClient for DhanClient {
    fn name(&self) -> &str {
        "dhan"
    }

    async fn authenticate(&self, _request: &AuthRequest) -> Result<Session, AuthError> {
        info!("Dhan uses a static access token, no login step required");
        Ok(Session {
            access_token: self.access_token.clone(),
            user_id: Some(self.client_id.clone()),
        })
    }

    async fn deauthenticate(&self) -> Result<(), AuthError> {
        info!("Dhan uses a static access token, no logout step required");
        Ok(())
    }

    async fn place_order(&self, order: &OrderRequest<'_>) -> Result<OrderId, OrderError> {
        let security_id = self
            .instruments
            .security_id(order.symbol)
            .ok_or_else(|| OrderError::UnknownInstrument(order.symbol.to_string()))?;

        let payload = DhanOrderPayload {
            dhan_client_id: &self.client_id,
            correlation_id: uuid::Uuid::new_v4().simple().to_string(),
            transaction_type: order.direction.as_str(),
            exchange_segment: &self.exchange_segment,
            product_type: dhan_product(order.product),
            order_type: order.order_type.as_str(),
            validity: "DAY",
            security_id,
            quantity: order.quantity,
            price: 0,
        };

        let url = format!("{}/orders", self.base_url);
        let request = self
            .http
            .post(&url)
            .header("access-token", &self.access_token)
            .header("client-id", &self.client_id)
            .json(&payload);

        let (status, body) = send(request).await?;
        let ack: DhanOrderAck = decode_response(status, &body)?;

        info!(
            order_id = %ack.order_id,
            status = ?ack.order_status,
            correlation_id = %payload.correlation_id,
            symbol = %order.symbol,
            "Dhan order placed"
        );
        Ok(OrderId(ack.order_id))
    }

    async fn get_positions(&self) -> Result<Vec<Position>, FetchError> {
        let positions: DhanList<DhanPosition> = self.get("/positions").await?;

        Ok(positions
            .into_vec()
            .into_iter()
            .map(|p| Position::new(p.trading_symbol, p.net_qty, p.product_type))
            .collect())
    }

    async fn get_holdings(&self) -> Result<Vec<Holding>, FetchError> {
        let holdings: DhanList<DhanHolding> = self.get("/holdings").await?;

        Ok(holdings
            .into_vec()
            .into_iter()
            .map(|h| Holding {
                symbol: h.trading_symbol,
                quantity: h.total_qty,
                average_price: h.avg_cost_price,
                last_price: h.last_traded_price,
                exchange: h.exchange,
            })
            .collect())
    }
}
