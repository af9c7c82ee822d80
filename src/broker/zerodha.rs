//! Zerodha Kite Connect v3 adapter.
//!
//! Kite authenticates with an OAuth-style redirect: the user logs in through
//! the browser, Kite redirects back with a one-time `request_token`, and the
//! token is exchanged (with a SHA-256 checksum of key, token and secret) for
//! an `access_token` that is valid for the trading day.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{AuthError, ConfigError, FetchError, OrderError};
use crate::models::{Holding, OrderId, OrderRequest, Position};

use super::{http_client, parse_json, send, ApiFailure, AuthRequest, BrokerClient, Session};

pub const KITE_API_URL: &str = "https://api.kite.trade";
pub const KITE_LOGIN_URL: &str = "https://kite.zerodha.com/connect/login";
const KITE_VERSION: &str = "3";
const DEFAULT_EXCHANGE: &str = "NSE";

/// Credentials for one Kite Connect app/user pair.
#[derive(Debug, Clone)]
pub struct ZerodhaCredentials {
    pub api_key: String,
    /// Only needed to exchange a request token for a session
    pub api_secret: Option<String>,
    pub access_token: Option<String>,
}

/// Kite Connect REST client.
pub struct ZerodhaClient {
    http: Client,
    base_url: String,
    api_key: String,
    api_secret: Option<String>,
    access_token: RwLock<Option<String>>,
    exchange: String,
}

/// Kite wraps every response in `{status, data}` or `{status, message, error_type}`.
#[derive(Debug, Deserialize)]
struct KiteEnvelope<T> {
    status: String,
    data: Option<T>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct KitePositions {
    #[serde(default)]
    net: Vec<KitePosition>,
}

#[derive(Debug, Deserialize)]
struct KitePosition {
    tradingsymbol: String,
    quantity: i64,
    product: String,
}

#[derive(Debug, Deserialize)]
struct KiteHolding {
    tradingsymbol: String,
    #[serde(default)]
    exchange: Option<String>,
    quantity: i64,
    #[serde(default)]
    t1_quantity: i64,
    average_price: Decimal,
    #[serde(default)]
    last_price: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct KiteOrderAck {
    order_id: String,
}

#[derive(Debug, Deserialize)]
struct KiteSession {
    access_token: String,
    #[serde(default)]
    user_id: Option<String>,
}

impl ZerodhaClient {
    pub fn new(credentials: ZerodhaCredentials, timeout: Duration) -> Result<Self, ConfigError> {
        Ok(Self {
            http: http_client(timeout)?,
            base_url: KITE_API_URL.to_string(),
            api_key: credentials.api_key,
            api_secret: credentials.api_secret,
            access_token: RwLock::new(credentials.access_token),
            exchange: DEFAULT_EXCHANGE.to_string(),
        })
    }

    /// Override the API host (for testing).
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Exchange orders are routed to (default NSE).
    pub fn with_exchange(mut self, exchange: String) -> Self {
        self.exchange = exchange;
        self
    }

    /// Browser URL the user opens to start a Kite login.
    pub fn login_url(&self) -> String {
        format!("{}?v={}&api_key={}", KITE_LOGIN_URL, KITE_VERSION, self.api_key)
    }

    async fn authorization(&self) -> String {
        let token = self.access_token.read().await;
        format!("token {}:{}", self.api_key, token.as_deref().unwrap_or_default())
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiFailure> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "Kite GET");

        let request = self
            .http
            .get(&url)
            .header("X-Kite-Version", KITE_VERSION)
            .header("Authorization", self.authorization().await);

        let (status, body) = send(request).await?;
        decode_envelope(status, &body)
    }
}

/// Session checksum: hex SHA-256 of `api_key + request_token + api_secret`.
pub fn session_checksum(api_key: &str, request_token: &str, api_secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_key.as_bytes());
    hasher.update(request_token.as_bytes());
    hasher.update(api_secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Pull the `request_token` out of the URL Kite redirected the browser to.
///
/// A bare token (no URL syntax) is accepted as-is.
pub fn extract_request_token(redirect: &str) -> Option<String> {
    let redirect = redirect.trim();
    if redirect.is_empty() {
        return None;
    }

    match Url::parse(redirect) {
        Ok(url) => url
            .query_pairs()
            .find(|(k, _)| k == "request_token")
            .map(|(_, v)| v.into_owned())
            .filter(|v| !v.is_empty()),
        Err(_) if !redirect.contains(['=', '?', '/', '&']) => Some(redirect.to_string()),
        Err(_) => None,
    }
}

/// Decode a Kite envelope, turning error envelopes and HTTP failures into rejections.
fn decode_envelope<T: DeserializeOwned>(status: StatusCode, body: &str) -> Result<T, ApiFailure> {
    let envelope: KiteEnvelope<T> = match parse_json(body) {
        Ok(envelope) => envelope,
        Err(_) if !status.is_success() => {
            return Err(ApiFailure::Rejected {
                status: status.as_u16(),
                message: super::truncate(body, 200).to_string(),
            })
        }
        Err(e) => return Err(e),
    };

    if !status.is_success() || envelope.status != "success" {
        let message = match (envelope.error_type, envelope.message) {
            (Some(kind), Some(msg)) => format!("{kind}: {msg}"),
            (None, Some(msg)) => msg,
            (Some(kind), None) => kind,
            (None, None) => format!("status '{}'", envelope.status),
        };
        return Err(ApiFailure::Rejected {
            status: status.as_u16(),
            message,
        });
    }

    envelope
        .data
        .ok_or_else(|| ApiFailure::Malformed("success envelope without data".to_string()))
}

/// Kite product codes for products named the Dhan way.
fn kite_product(product: &str) -> &str {
    match product {
        "INTRADAY" => "MIS",
        "MARGIN" => "NRML",
        other => other,
    }
}

#[async_trait]
impl BrokerClient for ZerodhaClient {
    fn name(&self) -> &str {
        "zerodha"
    }

    async fn authenticate(&self, request: &AuthRequest) -> Result<Session, AuthError> {
        let request_token = request
            .request_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingRequestToken)?;
        let api_secret = self
            .api_secret
            .as_deref()
            .ok_or(AuthError::MissingCredential("api_secret"))?;

        let checksum = session_checksum(&self.api_key, request_token, api_secret);
        let url = format!("{}/session/token", self.base_url);

        let http_request = self
            .http
            .post(&url)
            .header("X-Kite-Version", KITE_VERSION)
            .form(&[
                ("api_key", self.api_key.as_str()),
                ("request_token", request_token),
                ("checksum", checksum.as_str()),
            ]);

        let (status, body) = send(http_request).await?;
        let session: KiteSession = decode_envelope(status, &body)?;

        *self.access_token.write().await = Some(session.access_token.clone());
        info!(user_id = ?session.user_id, "Generated new Kite session");

        Ok(Session {
            access_token: session.access_token,
            user_id: session.user_id,
        })
    }

    async fn deauthenticate(&self) -> Result<(), AuthError> {
        let token = self.access_token.read().await.clone().unwrap_or_default();
        let url = format!("{}/session/token", self.base_url);

        let request = self
            .http
            .delete(&url)
            .header("X-Kite-Version", KITE_VERSION)
            .query(&[("api_key", self.api_key.as_str()), ("access_token", token.as_str())]);

        let (status, body) = send(request).await?;
        let _: serde_json::Value = decode_envelope(status, &body)?;

        *self.access_token.write().await = None;
        info!("Kite session invalidated");
        Ok(())
    }

    async fn place_order(&self, order: &OrderRequest<'_>) -> Result<OrderId, OrderError> {
        let url = format!("{}/orders/regular", self.base_url);
        let quantity = order.quantity.to_string();

        let request = self
            .http
            .post(&url)
            .header("X-Kite-Version", KITE_VERSION)
            .header("Authorization", self.authorization().await)
            .form(&[
                ("tradingsymbol", order.symbol),
                ("exchange", self.exchange.as_str()),
                ("transaction_type", order.direction.as_str()),
                ("order_type", order.order_type.as_str()),
                ("quantity", quantity.as_str()),
                ("product", kite_product(order.product)),
                ("validity", "DAY"),
            ]);

        let (status, body) = send(request).await?;
        let ack: KiteOrderAck = decode_envelope(status, &body)?;

        info!(order_id = %ack.order_id, symbol = %order.symbol, "Kite order placed");
        Ok(OrderId(ack.order_id))
    }

    async fn get_positions(&self) -> Result<Vec<Position>, FetchError> {
        let positions: KitePositions = self.get("/portfolio/positions").await?;

        Ok(positions
            .net
            .into_iter()
            .map(|p| Position::new(p.tradingsymbol, p.quantity, p.product))
            .collect())
    }

    async fn get_holdings(&self) -> Result<Vec<Holding>, FetchError> {
        let holdings: Vec<KiteHolding> = self.get("/portfolio/holdings").await?;

        Ok(holdings
            .into_iter()
            .map(|h| Holding {
                symbol: h.tradingsymbol,
                quantity: h.quantity + h.t1_quantity,
                average_price: h.average_price,
                last_price: h.last_price,
                exchange: h.exchange,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_checksum() {
        // sha256("abc") split across the three inputs
        assert_eq!(
            session_checksum("a", "b", "c"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_extract_request_token() {
        let url = "https://127.0.0.1/?action=login&type=login&status=success&request_token=XyZ123";
        assert_eq!(extract_request_token(url), Some("XyZ123".to_string()));

        assert_eq!(extract_request_token("  XyZ123 \n"), Some("XyZ123".to_string()));
        assert_eq!(extract_request_token("https://127.0.0.1/?status=success"), None);
        assert_eq!(extract_request_token(""), None);
    }

    #[test]
    fn test_decode_positions_envelope() {
        let body = r#"{
            "status": "success",
            "data": {
                "net": [
                    {"tradingsymbol": "RELIANCE", "exchange": "NSE", "product": "CNC", "quantity": 10, "average_price": 2450.5},
                    {"tradingsymbol": "INFY", "exchange": "NSE", "product": "MIS", "quantity": -5}
                ],
                "day": []
            }
        }"#;

        let positions: KitePositions = decode_envelope(StatusCode::OK, body).unwrap();
        assert_eq!(positions.net.len(), 2);
        assert_eq!(positions.net[1].tradingsymbol, "INFY");
        assert_eq!(positions.net[1].quantity, -5);
    }

    #[test]
    fn test_decode_error_envelope() {
        let body = r#"{"status": "error", "message": "Incorrect `api_key` or `access_token`.", "error_type": "TokenException"}"#;

        let result: Result<KitePositions, _> = decode_envelope(StatusCode::FORBIDDEN, body);
        match result {
            Err(ApiFailure::Rejected { status, message }) => {
                assert_eq!(status, 403);
                assert!(message.starts_with("TokenException"));
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_non_json_failure() {
        let result: Result<KitePositions, _> =
            decode_envelope(StatusCode::BAD_GATEWAY, "<html>bad gateway</html>");
        assert!(matches!(result, Err(ApiFailure::Rejected { status: 502, .. })));

        let result: Result<KitePositions, _> = decode_envelope(StatusCode::OK, "not json");
        assert!(matches!(result, Err(ApiFailure::Malformed(_))));
    }

    #[test]
    fn test_login_url() {
        let client = ZerodhaClient::new(
            ZerodhaCredentials {
                api_key: "key123".to_string(),
                api_secret: None,
                access_token: None,
            },
            Duration::from_secs(5),
        )
        .unwrap();

        assert_eq!(
            client.login_url(),
            "https://kite.zerodha.com/connect/login?v=3&api_key=key123"
        );
    }

    #[test]
    fn test_kite_product_mapping() {
        assert_eq!(kite_product("INTRADAY"), "MIS");
        assert_eq!(kite_product("MARGIN"), "NRML");
        assert_eq!(kite_product("CNC"), "CNC");
    }
}
