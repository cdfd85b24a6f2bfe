//! Accounting service configuration

use std::time::Duration;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Environment prefix for configuration overrides (`TALLY_NATS_URL`, ...)
pub const ENV_PREFIX: &str = "TALLY";

/// Default configuration file, overridable by `TALLY_CONFIG`
pub const DEFAULT_CONFIG_FILE: &str = "tally.toml";

/// Accounting service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountingConfig {
    /// NATS server URL
    pub nats_url: String,
    /// Subject usage events are published on
    pub fee_request_subject: String,
    /// Subject low-balance alerts are published on
    pub notify_subject: String,
    /// Subject dead-lettered payloads are published on
    pub dead_letter_subject: String,
    /// Bounded wait for one batch fetch
    pub msg_fetch_timeout_secs: u64,
    /// Sink handoff bound; the supervisor pauses twice this between generations
    pub idle_interval_secs: u64,
    /// Pause after a failed connection attempt
    pub reconnect_delay_secs: u64,
    /// Credits charged per raw unit
    pub credit_per_unit: Decimal,
    /// Redis URL for the ledger; in-memory ledger when unset
    pub redis_url: Option<String>,
    /// Key prefix for the Redis ledger
    pub redis_prefix: String,
}

impl Default for AccountingConfig {
    fn default() -> Self {
        Self {
            nats_url: "nats://localhost:4222".to_string(),
            fee_request_subject: "accounting.fee.request".to_string(),
            notify_subject: "accounting.notify.nobalance".to_string(),
            dead_letter_subject: "accounting.fee.dlq".to_string(),
            msg_fetch_timeout_secs: 5,
            idle_interval_secs: crate::IDLE_INTERVAL.as_secs(),
            reconnect_delay_secs: crate::RECONNECT_DELAY.as_secs(),
            credit_per_unit: crate::credit::DEFAULT_CREDIT_PER_UNIT,
            redis_url: None,
            redis_prefix: "tally:ledger".to_string(),
        }
    }
}

impl AccountingConfig {
    /// Load configuration from `.env`, an optional TOML file and `TALLY_*` variables
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let path =
            std::env::var(format!("{}_CONFIG", ENV_PREFIX)).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());

        let settings = config::Config::builder()
            .add_source(config::File::with_name(&path).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .with_context(|| format!("failed to read configuration from {}", path))?;

        let cfg: Self = settings
            .try_deserialize()
            .context("invalid accounting configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.fee_request_subject.is_empty() {
            anyhow::bail!("fee_request_subject must not be empty");
        }
        if self.msg_fetch_timeout_secs == 0 {
            anyhow::bail!("msg_fetch_timeout_secs must be positive");
        }
        if self.credit_per_unit < Decimal::ZERO {
            anyhow::bail!("credit_per_unit cannot be negative");
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.msg_fetch_timeout_secs)
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_secs(self.idle_interval_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}
