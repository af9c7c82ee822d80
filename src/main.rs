//! Master/child copy-trading bot
//!
//! Watches the positions of one master brokerage account and mirrors every
//! change onto a set of child accounts at Zerodha (Kite Connect) or Dhan.

mod bot;
mod broker;
mod config;
mod error;
mod models;
mod trading;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::bot::{Bot, BotConfig};
use crate::broker::{
    extract_request_token, AuthRequest, BrokerClient, DryRunBroker, ZerodhaClient, ZerodhaCredentials,
};
use crate::config::{AppConfig, BrokerKind, DEFAULT_CONFIG_PATH};
use crate::models::PositionSnapshot;
use crate::trading::ChildConnection;

/// Position copy-trading bot CLI.
#[derive(Parser)]
#[command(name = "copytrade")]
#[command(about = "Mirror a master brokerage account's positions onto child accounts", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the replication loop
    Run {
        /// Polling interval in seconds (overrides the config file)
        #[arg(short, long)]
        interval: Option<u64>,

        /// Dry run (log child orders instead of sending them)
        #[arg(long)]
        dry_run: bool,
    },

    /// Create a Zerodha session and print the access token
    Login {
        /// Account name from the config file
        #[arg(short, long)]
        account: String,

        /// Redirect URL (or bare request token) from the Kite login page
        #[arg(short, long)]
        redirect_url: Option<String>,
    },

    /// Invalidate an account's session
    Logout {
        /// Account name from the config file
        #[arg(short, long)]
        account: String,
    },

    /// Show an account's current positions
    Positions {
        /// Account name from the config file
        #[arg(short, long)]
        account: String,
    },

    /// Show an account's holdings
    Holdings {
        /// Account name from the config file
        #[arg(short, long)]
        account: String,
    },

    /// Validate the configuration and show the account roster
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    let config = AppConfig::load(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;

    match cli.command {
        Commands::Run { interval, dry_run } => run(config, interval, dry_run).await?,
        Commands::Login {
            account,
            redirect_url,
        } => login(&config, &account, redirect_url).await?,
        Commands::Logout { account } => {
            let client = connect_account(&config, &account).await?;
            client.deauthenticate().await?;
            println!("Logged out of {} ({})", account, client.name());
        }
        Commands::Positions { account } => {
            let client = connect_account(&config, &account).await?;
            let positions = client.get_positions().await?;
            let snapshot = PositionSnapshot::from_positions(positions);

            println!("\n=== Positions: {} ({}) ===", account, client.name());
            if snapshot.is_empty() {
                println!("No positions.");
                return Ok(());
            }

            println!("\n{:<24} {:>10} {:<10}", "SYMBOL", "QTY", "PRODUCT");
            println!("{}", "-".repeat(46));
            for position in snapshot.iter() {
                println!(
                    "{:<24} {:>10} {:<10}",
                    truncate(&position.symbol, 24),
                    position.quantity,
                    position.product
                );
            }
            println!("\nOpen: {} of {}", snapshot.open_count(), snapshot.len());
        }
        Commands::Holdings { account } => {
            let client = connect_account(&config, &account).await?;
            let holdings = client.get_holdings().await?;

            println!("\n=== Holdings: {} ({}) ===", account, client.name());
            if holdings.is_empty() {
                println!("No holdings.");
                return Ok(());
            }

            println!(
                "\n{:<24} {:>8} {:>12} {:>12} {:>12}",
                "SYMBOL", "QTY", "AVG PRICE", "LTP", "P&L"
            );
            println!("{}", "-".repeat(72));
            for holding in &holdings {
                let ltp = holding
                    .last_price
                    .map(|p| format!("{:.2}", p))
                    .unwrap_or_else(|| "-".to_string());
                let pnl = holding
                    .unrealized_pnl()
                    .map(|p| format!("{:.2}", p))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<24} {:>8} {:>12.2} {:>12} {:>12}",
                    truncate(&holding.symbol, 24),
                    holding.quantity,
                    holding.average_price,
                    ltp,
                    pnl
                );
            }
        }
        Commands::CheckConfig => {
            let roster = config.roster()?;

            println!("\n=== Replication Configuration ===\n");
            println!("Poll Interval:        {}s", config.poll_interval_secs);
            println!("Request Timeout:      {}s", config.request_timeout_secs);
            println!("Vanished Positions:   {:?}", config.vanished_positions);
            println!("Failure Threshold:    {}", config.max_consecutive_failures);
            println!("Failure Cooldown:     {}s", config.failure_cooldown_secs);
            println!("Dry Run:              {}", config.dry_run);

            println!("\nMaster:");
            println!("  {:<24} {:?}", roster.master.name, roster.master.broker);
            println!("\nChildren ({}):", roster.children.len());
            for child in &roster.children {
                println!("  {:<24} {:?}", child.name, child.broker);
            }
            println!("\nConfiguration OK.");
        }
    }

    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    if std::env::var_os("RUST_LOG").is_some() {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(EnvFilter::from_default_env())
            .with_target(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
        return Ok(());
    }

    let log_level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

async fn run(mut config: AppConfig, interval: Option<u64>, dry_run: bool) -> Result<()> {
    if let Some(secs) = interval {
        config.poll_interval_secs = secs;
    }
    let dry_run = dry_run || config.dry_run;

    let roster = config.roster()?;
    let timeout = config.request_timeout();

    info!(
        master = %roster.master.name,
        children = roster.children.len(),
        interval = config.poll_interval_secs,
        dry_run = dry_run,
        "Starting copy-trading bot"
    );

    let master = broker::connect(&roster.master, timeout)
        .await
        .with_context(|| format!("failed to set up master account {}", roster.master.name))?;

    let mut children = Vec::with_capacity(roster.children.len());
    for account in &roster.children {
        let client = broker::connect(account, timeout)
            .await
            .with_context(|| format!("failed to set up child account {}", account.name))?;
        let client: std::sync::Arc<dyn BrokerClient> = if dry_run {
            std::sync::Arc::new(DryRunBroker::new(client))
        } else {
            client
        };
        children.push(ChildConnection::new(account.name.clone(), client));
    }

    println!("\n=== Copy-Trading Bot ===");
    println!("Master: {} ({})", roster.master.name, master.name());
    println!("Children: {}", children.len());
    println!("Polling interval: {}s", config.poll_interval_secs);
    println!("Mode: {}", if dry_run { "DRY RUN (no real orders)" } else { "LIVE TRADING" });
    println!("\nPress Ctrl+C to stop.\n");

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            return;
        }
        info!("Shutdown requested, finishing the current cycle");
        signal_token.cancel();
    });

    let mut bot = Bot::new(BotConfig::from(&config), master, children);
    let stats = bot.run(shutdown).await;

    println!("\n{}", stats);
    Ok(())
}

async fn connect_account(config: &AppConfig, name: &str) -> Result<std::sync::Arc<dyn BrokerClient>> {
    let account = config.account(name)?;
    let client = broker::connect(account, config.request_timeout())
        .await
        .with_context(|| format!("failed to set up account {}", name))?;
    Ok(client)
}

async fn login(config: &AppConfig, name: &str, redirect_url: Option<String>) -> Result<()> {
    let account = config.account(name)?;
    if account.broker != BrokerKind::Zerodha {
        bail!("{} uses {:?}; only Zerodha accounts need an interactive login", name, account.broker);
    }

    let credentials = ZerodhaCredentials {
        api_key: account.require("api_key")?,
        api_secret: Some(account.require("api_secret")?),
        access_token: None,
    };
    let mut client = ZerodhaClient::new(credentials, config.request_timeout())?;
    if let Some(url) = &account.base_url {
        client = client.with_base_url(url.clone());
    }

    let redirect = match redirect_url {
        Some(url) => url,
        None => {
            println!("\nOpen this URL in a browser and log in:\n\n  {}\n", client.login_url());
            println!("Paste the URL you were redirected to:");

            let mut line = String::new();
            tokio::io::BufReader::new(tokio::io::stdin())
                .read_line(&mut line)
                .await
                .context("failed to read redirect URL")?;
            line
        }
    };

    let request = AuthRequest {
        request_token: extract_request_token(&redirect),
    };
    let session = client.authenticate(&request).await?;

    info!(account = %name, user = ?session.user_id, "Kite session created");
    println!("\nAccess token for {}:\n\n  {}\n", name, session.access_token);
    println!(
        "Set `access_token` for this account in the config file or export {}.",
        account.env_key("access_token")
    );
    Ok(())
}

/// Shorten a string for table output.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
