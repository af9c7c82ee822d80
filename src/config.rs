//! Application configuration: polling cadence, retry policy, and the
//! roster of master/child accounts.
//!
//! Loaded from a TOML file, then overlaid with `COPYTRADE__*` environment
//! variables. Credentials missing from the file are looked up in the
//! environment as `{ACCOUNT_NAME}_{FIELD}`, so secrets can live in `.env`.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::error::ConfigError;
use crate::trading::{ReplicationConfig, VanishedPolicy};

pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";
const ENV_PREFIX: &str = "COPYTRADE";

/// Supported brokerages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerKind {
    Zerodha,
    Dhan,
}

impl BrokerKind {
    /// Credential fields an account of this kind needs to trade.
    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            BrokerKind::Zerodha => &["api_key", "access_token"],
            BrokerKind::Dhan => &["client_id", "access_token"],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountRole {
    Master,
    Child,
}

/// One named account section.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    pub name: String,
    pub broker: BrokerKind,
    pub role: AccountRole,

    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_secret: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,

    /// Zerodha exchange for orders (default NSE)
    #[serde(default)]
    pub exchange: Option<String>,
    /// Dhan exchange segment for orders (default NSE_EQ)
    #[serde(default)]
    pub exchange_segment: Option<String>,
    /// API host override
    #[serde(default)]
    pub base_url: Option<String>,
    /// Dhan instrument master CSV override
    #[serde(default)]
    pub instruments_url: Option<String>,
}

impl AccountConfig {
    fn file_value(&self, field: &str) -> Option<&str> {
        match field {
            "api_key" => self.api_key.as_deref(),
            "api_secret" => self.api_secret.as_deref(),
            "access_token" => self.access_token.as_deref(),
            "client_id" => self.client_id.as_deref(),
            _ => None,
        }
    }

    /// Environment variable consulted when `field` is absent from the file.
    pub fn env_key(&self, field: &str) -> String {
        format!("{}_{}", self.name, field).to_uppercase()
    }

    /// Credential value from the file, falling back to `lookup(env_key)`.
    /// Blank values count as missing.
    pub fn credential_with<F>(&self, field: &str, lookup: F) -> Option<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.file_value(field)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .or_else(|| lookup(&self.env_key(field)).map(|v| v.trim().to_string()))
            .filter(|v| !v.is_empty())
    }

    pub fn credential(&self, field: &str) -> Option<String> {
        self.credential_with(field, |key| std::env::var(key).ok())
    }

    pub fn require(&self, field: &str) -> Result<String, ConfigError> {
        self.credential(field)
            .ok_or_else(|| ConfigError::MissingCredential {
                account: self.name.clone(),
                field: field.to_string(),
            })
    }

    fn check_credentials<F>(&self, lookup: &F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        for field in self.broker.required_fields() {
            if self.credential_with(field, lookup).is_none() {
                return Err(ConfigError::MissingCredential {
                    account: self.name.clone(),
                    field: field.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Root configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Pause between the end of one cycle and the start of the next
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Bound on every broker call
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub vanished_positions: VanishedPolicy,

    /// Consecutive failed polls before the loop backs off for the cooldown
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    #[serde(default = "default_failure_cooldown_secs")]
    pub failure_cooldown_secs: u64,

    /// Log child orders instead of sending them
    #[serde(default)]
    pub dry_run: bool,

    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_max_consecutive_failures() -> u32 {
    5
}

fn default_failure_cooldown_secs() -> u64 {
    60
}

/// Validated account split: exactly one master plus any number of children.
#[derive(Debug, Clone)]
pub struct AccountRoster {
    pub master: AccountConfig,
    pub children: Vec<AccountConfig>,
}

impl AppConfig {
    /// Load from a TOML file plus `COPYTRADE__*` environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Parse TOML text without consulting files or the environment.
    #[cfg(test)]
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn replication(&self) -> ReplicationConfig {
        ReplicationConfig {
            request_timeout: self.request_timeout(),
            vanished_positions: self.vanished_positions,
        }
    }

    pub fn account(&self, name: &str) -> Result<&AccountConfig, ConfigError> {
        self.accounts
            .iter()
            .find(|a| a.name == name)
            .ok_or_else(|| ConfigError::UnknownAccount(name.to_string()))
    }

    /// Validate the roster, reading missing credentials from the process environment.
    pub fn roster(&self) -> Result<AccountRoster, ConfigError> {
        self.roster_with(|key| std::env::var(key).ok())
    }

    /// Validate the roster with an explicit credential lookup.
    pub fn roster_with<F>(&self, lookup: F) -> Result<AccountRoster, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid("poll_interval_secs must be greater than 0".to_string()));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid("request_timeout_secs must be greater than 0".to_string()));
        }

        let mut seen = HashSet::new();
        for account in &self.accounts {
            if !seen.insert(account.name.as_str()) {
                return Err(ConfigError::DuplicateAccount(account.name.clone()));
            }
        }

        let (masters, children): (Vec<_>, Vec<_>) = self
            .accounts
            .iter()
            .cloned()
            .partition(|a| a.role == AccountRole::Master);

        let master = match masters.len() {
            0 => return Err(ConfigError::NoMaster),
            1 => masters.into_iter().next().ok_or(ConfigError::NoMaster)?,
            _ => {
                return Err(ConfigError::MultipleMasters(
                    masters.into_iter().map(|a| a.name).collect(),
                ))
            }
        };

        master.check_credentials(&lookup)?;
        for child in &children {
            child.check_credentials(&lookup)?;
        }

        if children.is_empty() {
            warn!("No child accounts configured; trades will be detected but not copied");
        }

        Ok(AccountRoster { master, children })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
poll_interval_secs = 5
vanished_positions = "ignore"

[[accounts]]
name = "ZERODHA_MASTER"
broker = "zerodha"
role = "master"
api_key = "kite_key"
api_secret = "kite_secret"
access_token = "kite_token"

[[accounts]]
name = "DHAN_CHILD_1"
broker = "dhan"
role = "child"
client_id = "1000000001"
access_token = "dhan_token"
exchange_segment = "BSE_EQ"
"#;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_parse_sample() {
        let config = AppConfig::from_toml_str(SAMPLE).unwrap();

        assert_eq!(config.poll_interval_secs, 5);
        assert_eq!(config.request_timeout_secs, 15);
        assert_eq!(config.vanished_positions, VanishedPolicy::Ignore);
        assert_eq!(config.max_consecutive_failures, 5);
        assert!(!config.dry_run);
        assert_eq!(config.accounts.len(), 2);
        assert_eq!(config.accounts[1].broker, BrokerKind::Dhan);
        assert_eq!(config.accounts[1].exchange_segment.as_deref(), Some("BSE_EQ"));

        let roster = config.roster_with(no_env).unwrap();
        assert_eq!(roster.master.name, "ZERODHA_MASTER");
        assert_eq!(roster.children.len(), 1);
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_toml_str("").unwrap();

        assert_eq!(config.poll_interval_secs, 10);
        assert_eq!(config.vanished_positions, VanishedPolicy::Close);
        assert_eq!(config.replication().request_timeout, Duration::from_secs(15));
    }

    #[test]
    fn test_no_master_is_fatal() {
        let config = AppConfig::from_toml_str(
            r#"
[[accounts]]
name = "DHAN_CHILD"
broker = "dhan"
role = "child"
client_id = "1"
access_token = "t"
"#,
        )
        .unwrap();

        assert!(matches!(config.roster_with(no_env), Err(ConfigError::NoMaster)));
    }

    #[test]
    fn test_two_masters_are_rejected() {
        let config = AppConfig::from_toml_str(
            r#"
[[accounts]]
name = "A_MASTER"
broker = "dhan"
role = "master"
client_id = "1"
access_token = "t"

[[accounts]]
name = "B_MASTER"
broker = "dhan"
role = "master"
client_id = "2"
access_token = "t"
"#,
        )
        .unwrap();

        match config.roster_with(no_env) {
            Err(ConfigError::MultipleMasters(names)) => assert_eq!(names, vec!["A_MASTER", "B_MASTER"]),
            other => panic!("expected MultipleMasters, got {:?}", other),
        }
    }

    #[test]
    fn test_master_without_children_is_allowed() {
        let config = AppConfig::from_toml_str(
            r#"
[[accounts]]
name = "ZERODHA_MASTER"
broker = "zerodha"
role = "master"
api_key = "k"
access_token = "t"
"#,
        )
        .unwrap();

        let roster = config.roster_with(no_env).unwrap();
        assert!(roster.children.is_empty());
    }

    #[test]
    fn test_missing_credential_is_reported() {
        let config = AppConfig::from_toml_str(
            r#"
[[accounts]]
name = "ZERODHA_MASTER"
broker = "zerodha"
role = "master"
api_key = "k"
access_token = "  "
"#,
        )
        .unwrap();

        match config.roster_with(no_env) {
            Err(ConfigError::MissingCredential { account, field }) => {
                assert_eq!(account, "ZERODHA_MASTER");
                assert_eq!(field, "access_token");
            }
            other => panic!("expected MissingCredential, got {:?}", other),
        }
    }

    #[test]
    fn test_credential_from_environment() {
        let config = AppConfig::from_toml_str(
            r#"
[[accounts]]
name = "Zerodha_Master"
broker = "zerodha"
role = "master"
api_key = "k"
"#,
        )
        .unwrap();

        let lookup = |key: &str| (key == "ZERODHA_MASTER_ACCESS_TOKEN").then(|| "env_token".to_string());
        assert!(config.roster_with(lookup).is_ok());

        let account = &config.accounts[0];
        assert_eq!(account.credential_with("access_token", lookup), Some("env_token".to_string()));
        assert_eq!(account.credential_with("api_key", lookup), Some("k".to_string()));
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let config = AppConfig::from_toml_str(
            r#"
[[accounts]]
name = "SAME"
broker = "dhan"
role = "master"
client_id = "1"
access_token = "t"

[[accounts]]
name = "SAME"
broker = "dhan"
role = "child"
client_id = "2"
access_token = "t"
"#,
        )
        .unwrap();

        assert!(matches!(config.roster_with(no_env), Err(ConfigError::DuplicateAccount(_))));
    }

    #[test]
    fn test_zero_interval_is_invalid() {
        let config = AppConfig::from_toml_str("poll_interval_secs = 0").unwrap();
        assert!(matches!(config.roster_with(no_env), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_account_lookup() {
        let config = AppConfig::from_toml_str(SAMPLE).unwrap();
        assert!(config.account("DHAN_CHILD_1").is_ok());
        assert!(matches!(config.account("NOPE"), Err(ConfigError::UnknownAccount(_))));
    }

    #[test]
    fn test_load_applies_environment_overrides() {
        let path = std::env::temp_dir().join(format!("copytrade-{}.toml", uuid::Uuid::new_v4().simple()));
        std::fs::write(&path, SAMPLE).unwrap();

        std::env::set_var("COPYTRADE__FAILURE_COOLDOWN_SECS", "90");
        std::env::set_var("COPYTRADE__DRY_RUN", "true");
        let loaded = AppConfig::load(&path);
        std::env::remove_var("COPYTRADE__FAILURE_COOLDOWN_SECS");
        std::env::remove_var("COPYTRADE__DRY_RUN");
        std::fs::remove_file(&path).unwrap();

        let config = loaded.unwrap();
        assert_eq!(config.failure_cooldown_secs, 90);
        assert!(config.dry_run);
        // Values only in the file are untouched
        assert_eq!(config.poll_interval_secs, 5);
        assert_eq!(config.vanished_positions, VanishedPolicy::Ignore);
        assert_eq!(config.accounts.len(), 2);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let path = std::env::temp_dir().join("copytrade-does-not-exist.toml");
        assert!(matches!(AppConfig::load(&path), Err(ConfigError::Load(_))));
    }
}
