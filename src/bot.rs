//! Bot runner: the supervised polling loop.
//!
//! Each cycle polls the master, then waits for the fan-out to every child to
//! finish before sleeping until the next cycle. Cancellation is only observed
//! between cycles, so a batch is never abandoned half-way across children.
//! Failed polls back off exponentially; a long failure streak opens a
//! breaker that pauses polling for a cooldown. The loop never exits on a
//! broker error.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broker::BrokerClient;
use crate::config::AppConfig;
use crate::error::FetchError;
use crate::trading::{
    ChildConnection, MasterTracker, ReplicationConfig, ReplicationExecutor, ReplicationReport,
};

/// Bot configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Pause between the end of one cycle and the start of the next
    pub poll_interval: Duration,

    /// Failed polls in a row before the breaker opens
    pub max_consecutive_failures: u32,

    /// Pause while the breaker is open; also caps the retry backoff
    pub failure_cooldown: Duration,

    pub replication: ReplicationConfig,
}

impl From<&AppConfig> for BotConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            max_consecutive_failures: config.max_consecutive_failures.max(1),
            failure_cooldown: Duration::from_secs(config.failure_cooldown_secs),
            replication: config.replication(),
        }
    }
}

/// Delay policy after failed polls.
struct FailurePolicy {
    streak: u32,
    threshold: u32,
    cooldown: Duration,
    backoff: ExponentialBackoff,
}

impl FailurePolicy {
    fn new(poll_interval: Duration, threshold: u32, cooldown: Duration) -> Self {
        let cap = cooldown.max(poll_interval);
        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(poll_interval)
            .with_multiplier(2.0)
            .with_randomization_factor(0.1)
            .with_max_interval(cap)
            .with_max_elapsed_time(None)
            .build();

        Self {
            streak: 0,
            threshold: threshold.max(1),
            cooldown: cap,
            backoff,
        }
    }

    fn on_success(&mut self) {
        if self.streak > 0 {
            info!(failures = self.streak, "Master polling recovered");
        }
        self.streak = 0;
        self.backoff.reset();
    }

    /// Record a failure and return how long to wait before the next attempt.
    fn on_failure(&mut self) -> Duration {
        self.streak = self.streak.saturating_add(1);

        if self.streak >= self.threshold {
            error!(
                failures = self.streak,
                cooldown_secs = self.cooldown.as_secs(),
                "Too many consecutive failures, pausing before retrying"
            );
            return self.cooldown;
        }

        self.backoff
            .next_backoff()
            .unwrap_or(self.cooldown)
            .min(self.cooldown)
    }

    fn streak(&self) -> u32 {
        self.streak
    }
}

/// Counters for one bot session.
#[derive(Debug, Clone, Default)]
pub struct BotStats {
    pub cycles: u64,
    pub failed_polls: u64,
    pub signals: u64,
    pub orders_placed: u64,
    pub orders_failed: u64,
    pub children: usize,
    pub started_at: DateTime<Utc>,
    pub last_trade_at: Option<DateTime<Utc>>,
}

impl BotStats {
    fn record(&mut self, signals: usize, report: &ReplicationReport) {
        self.signals += signals as u64;
        self.orders_placed += report.succeeded() as u64;
        self.orders_failed += report.failed() as u64;
        if signals > 0 {
            self.last_trade_at = Some(Utc::now());
        }
    }
}

impl fmt::Display for BotStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Replication Statistics ===")?;
        writeln!(f, "Running Since:   {}", self.started_at.format("%Y-%m-%d %H:%M:%S UTC"))?;
        match self.last_trade_at {
            Some(at) => writeln!(f, "Last Trade:      {}", at.format("%Y-%m-%d %H:%M:%S UTC"))?,
            None => writeln!(f, "Last Trade:      never")?,
        }
        writeln!(f, "Child Accounts:  {}", self.children)?;
        writeln!(f, "Poll Cycles:     {} (Failed: {})", self.cycles, self.failed_polls)?;
        writeln!(f, "Signals:         {}", self.signals)?;
        writeln!(
            f,
            "Orders:          {} (Placed: {}, Failed: {})",
            self.orders_placed + self.orders_failed,
            self.orders_placed,
            self.orders_failed
        )?;
        Ok(())
    }
}

/// Main bot runner.
pub struct Bot {
    config: BotConfig,
    master: Arc<dyn BrokerClient>,
    children: Vec<ChildConnection>,
    executor: ReplicationExecutor,
    policy: FailurePolicy,
    stats: BotStats,
}

impl Bot {
    pub fn new(config: BotConfig, master: Arc<dyn BrokerClient>, children: Vec<ChildConnection>) -> Self {
        if children.is_empty() {
            warn!("No child accounts; the bot will run but not copy any trades");
        }

        let executor = ReplicationExecutor::new(config.replication.request_timeout);
        let policy = FailurePolicy::new(
            config.poll_interval,
            config.max_consecutive_failures,
            config.failure_cooldown,
        );
        let stats = BotStats {
            children: children.len(),
            started_at: Utc::now(),
            ..Default::default()
        };

        Self {
            config,
            master,
            children,
            executor,
            policy,
            stats,
        }
    }

    /// Run until `shutdown` is cancelled. Returns the session statistics.
    pub async fn run(&mut self, shutdown: CancellationToken) -> BotStats {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs_f64(),
            children = self.children.len(),
            vanished = ?self.config.replication.vanished_positions,
            "Starting copy trading loop"
        );

        let Some(mut tracker) = self.establish_baseline(&shutdown).await else {
            info!("Shutdown requested before the master baseline was established");
            return self.stats.clone();
        };

        while !shutdown.is_cancelled() {
            let delay = match self.tick(&mut tracker).await {
                Ok(()) => {
                    self.policy.on_success();
                    self.config.poll_interval
                }
                Err(e) => {
                    self.stats.failed_polls += 1;
                    let delay = self.policy.on_failure();
                    warn!(
                        error = %e,
                        failures = self.policy.streak(),
                        retry_in_secs = delay.as_secs_f64(),
                        "Failed to poll master positions"
                    );
                    delay
                }
            };

            if !Self::pause(&shutdown, delay).await {
                break;
            }
        }

        info!("Copy trading loop stopped");
        self.stats.clone()
    }

    /// Fetch the initial master baseline, retrying until it succeeds or
    /// shutdown is requested.
    async fn establish_baseline(&mut self, shutdown: &CancellationToken) -> Option<MasterTracker> {
        loop {
            if shutdown.is_cancelled() {
                return None;
            }

            match MasterTracker::new(self.master.clone(), self.config.replication.clone()).await {
                Ok(tracker) => {
                    self.policy.on_success();
                    return Some(tracker);
                }
                Err(e) => {
                    self.stats.failed_polls += 1;
                    let delay = self.policy.on_failure();
                    warn!(
                        error = %e,
                        retry_in_secs = delay.as_secs_f64(),
                        "Could not fetch master baseline"
                    );
                    if !Self::pause(shutdown, delay).await {
                        return None;
                    }
                }
            }
        }
    }

    /// One poll-and-replicate cycle.
    async fn tick(&mut self, tracker: &mut MasterTracker) -> Result<(), FetchError> {
        debug!("Checking for new trades from master account");
        self.stats.cycles += 1;

        let signals = tracker.poll().await?;
        if signals.is_empty() {
            debug!("No new trades detected");
            return Ok(());
        }

        info!(count = signals.len(), "Found new trades, replicating to child accounts");
        let report = self.executor.apply(&signals, &self.children).await;

        if !report.is_clean() {
            warn!(
                placed = report.succeeded(),
                failed = report.failed(),
                "Replication batch finished with failures"
            );
        } else if !report.is_empty() {
            info!(placed = report.succeeded(), "Replication batch complete");
        }

        self.stats.record(signals.len(), &report);
        Ok(())
    }

    /// Sleep for `delay`; returns false if shutdown was requested meanwhile.
    async fn pause(shutdown: &CancellationToken, delay: Duration) -> bool {
        tokio::select! {
            _ = shutdown.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}
