//! Error kinds surfaced by broker adapters and startup configuration.
//!
//! Fetch and order failures are recoverable: the poll loop logs them and
//! keeps going. Configuration failures are fatal before the loop starts.

use std::time::Duration;

use thiserror::Error;

/// Retrieving positions or holdings from a broker failed.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("broker rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Placing a single order failed.
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("order rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("no instrument id known for symbol '{0}'")]
    UnknownInstrument(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Session creation or teardown failed.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("a request_token is required to generate a new session")]
    MissingRequestToken,

    #[error("'{0}' is required to generate a new session")]
    MissingCredential(&'static str),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("authentication rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Startup configuration is unusable.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("no master account configured")]
    NoMaster,

    #[error("multiple master accounts configured: {0:?}")]
    MultipleMasters(Vec<String>),

    #[error("account '{0}' is defined more than once")]
    DuplicateAccount(String),

    #[error("account '{account}' is missing required field '{field}'")]
    MissingCredential { account: String, field: String },

    #[error("no account named '{0}'")]
    UnknownAccount(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
