//! Broker adapters behind a single capability trait.
//!
//! The replication core only talks to [`BrokerClient`]; each brokerage gets
//! one implementing type that owns its HTTP session and wire formats.

mod dhan;
mod dry_run;
mod instruments;
mod zerodha;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use crate::config::{AccountConfig, BrokerKind};
use crate::error::{AuthError, ConfigError, FetchError, OrderError};
use crate::models::{Holding, OrderId, OrderRequest, Position};

pub use dhan::{DhanClient, DhanCredentials};
pub use dry_run::DryRunBroker;
pub use instruments::DHAN_SCRIP_MASTER_URL;
pub use zerodha::{extract_request_token, ZerodhaClient, ZerodhaCredentials};

/// Inputs for establishing a broker session.
#[derive(Debug, Clone, Default)]
pub struct AuthRequest {
    /// One-time token handed back by an OAuth-style login redirect
    pub request_token: Option<String>,
}

/// A freshly established broker session.
#[derive(Debug, Clone)]
pub struct Session {
    pub access_token: String,
    pub user_id: Option<String>,
}

/// Capability set every brokerage adapter provides.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Short broker label for logs.
    fn name(&self) -> &str;

    async fn authenticate(&self, request: &AuthRequest) -> Result<Session, AuthError>;

    async fn deauthenticate(&self) -> Result<(), AuthError>;

    async fn place_order(&self, order: &OrderRequest<'_>) -> Result<OrderId, OrderError>;

    /// Current net positions, one record per symbol as far as the broker allows.
    async fn get_positions(&self) -> Result<Vec<Position>, FetchError>;

    async fn get_holdings(&self) -> Result<Vec<Holding>, FetchError>;
}

/// Build the adapter for a configured account.
pub async fn connect(
    account: &AccountConfig,
    request_timeout: Duration,
) -> Result<Arc<dyn BrokerClient>, ConfigError> {
    let client: Arc<dyn BrokerClient> = match account.broker {
        BrokerKind::Zerodha => {
            let credentials = ZerodhaCredentials {
                api_key: account.require("api_key")?,
                api_secret: account.credential("api_secret"),
                access_token: Some(account.require("access_token")?),
            };
            let mut client = ZerodhaClient::new(credentials, request_timeout)?;
            if let Some(exchange) = &account.exchange {
                client = client.with_exchange(exchange.clone());
            }
            if let Some(url) = &account.base_url {
                client = client.with_base_url(url.clone());
            }
            Arc::new(client)
        }
        BrokerKind::Dhan => {
            let credentials = DhanCredentials {
                client_id: account.require("client_id")?,
                access_token: account.require("access_token")?,
            };
            let mut client = DhanClient::new(credentials, request_timeout)?;
            if let Some(segment) = &account.exchange_segment {
                client = client.with_exchange_segment(segment.clone());
            }
            if let Some(url) = &account.base_url {
                client = client.with_base_url(url.clone());
            }
            let instruments_url = account
                .instruments_url
                .as_deref()
                .unwrap_or(DHAN_SCRIP_MASTER_URL);
            client.load_instruments(instruments_url).await;
            Arc::new(client)
        }
    };
    Ok(client)
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, ConfigError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ConfigError::Invalid(format!("failed to create HTTP client: {e}")))
}

/// Failure of one broker HTTP exchange, before it is classified by call site.
#[derive(Debug)]
pub(crate) enum ApiFailure {
    Transport(reqwest::Error),
    Rejected { status: u16, message: String },
    Malformed(String),
}

impl From<reqwest::Error> for ApiFailure {
    fn from(e: reqwest::Error) -> Self {
        ApiFailure::Transport(e)
    }
}

impl From<ApiFailure> for FetchError {
    fn from(f: ApiFailure) -> Self {
        match f {
            ApiFailure::Transport(e) => FetchError::Transport(e),
            ApiFailure::Rejected { status, message } => FetchError::Rejected { status, message },
            ApiFailure::Malformed(m) => FetchError::Malformed(m),
        }
    }
}

impl From<ApiFailure> for OrderError {
    fn from(f: ApiFailure) -> Self {
        match f {
            ApiFailure::Transport(e) => OrderError::Transport(e),
            ApiFailure::Rejected { status, message } => OrderError::Rejected { status, message },
            ApiFailure::Malformed(m) => OrderError::Malformed(m),
        }
    }
}

impl From<ApiFailure> for AuthError {
    fn from(f: ApiFailure) -> Self {
        match f {
            ApiFailure::Transport(e) => AuthError::Transport(e),
            ApiFailure::Rejected { status, message } => AuthError::Rejected { status, message },
            ApiFailure::Malformed(m) => AuthError::Malformed(m),
        }
    }
}

/// Send a request and hand back status plus raw body.
pub(crate) async fn send(request: reqwest::RequestBuilder) -> Result<(StatusCode, String), ApiFailure> {
    let response = request.send().await?;
    let status = response.status();
    let body = response.text().await?;
    Ok((status, body))
}

pub(crate) fn parse_json<T: DeserializeOwned>(body: &str) -> Result<T, ApiFailure> {
    serde_json::from_str(body).map_err(|e| ApiFailure::Malformed(format!("{e}: {}", truncate(body, 200))))
}

pub(crate) fn truncate(s: &str, max_len: usize) -> &str {
    match s.char_indices().nth(max_len) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
