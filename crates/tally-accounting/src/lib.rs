//! # Tally Accounting
//!
//! Usage-metering ledger consumer: pulls pay-per-use events from a durable
//! NATS JetStream subscription, posts them to the ledger exactly once per
//! event id, and raises low-balance alerts.
//!
//! ## Delivery Guarantees
//!
//! ```text
//! broker:  at-least-once delivery
//! ledger:  one statement per event id, committed with its balance delta
//! effect:  exactly-once billing
//! ```
//!
//! Alerts and dead letters travel over best-effort side channels that drop
//! on timeout instead of blocking billing.

pub mod config;
pub mod consumer;
pub mod credit;
pub mod metrics;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tally_common::{LedgerStatement, Result};

pub use config::AccountingConfig;
pub use consumer::{NatsConnector, Supervisor, SupervisorSettings};
pub use credit::CreditConverter;
pub use metrics::ConsumerMetrics;
pub use store::{LedgerHandles, MemoryLedger, RedisLedger};

use store::{AccountGuard, LedgerStore};

/// Messages requested per fetch
pub const FETCH_BATCH_SIZE: usize = 5;

/// Fetch failures before the subscription is reset
pub const MAX_FETCH_FAILURES: u32 = 10;

/// Provision-and-fetch rounds per connection
pub const PROVISION_ROUNDS: u32 = 5;

/// Processing attempts per message before dead-lettering
pub const MAX_ATTEMPTS: u32 = 3;

/// Bound on the downstream store calls of one attempt
pub const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

/// Sink handoff bound and supervisor pacing unit
pub const IDLE_INTERVAL: Duration = Duration::from_secs(10);

/// Pause after a failed broker connection
pub const RECONNECT_DELAY: Duration = Duration::from_secs(10);

/// Accounting service
pub struct Accounting {
    config: AccountingConfig,
    ledger: LedgerHandles,
    metrics: Arc<ConsumerMetrics>,
}

impl Accounting {
    /// Connect the configured ledger backend
    pub async fn new(config: AccountingConfig) -> Result<Self> {
        let ledger = match &config.redis_url {
            Some(url) => {
                LedgerHandles::from_backend(Arc::new(RedisLedger::new(url, &config.redis_prefix).await?))
            }
            None => {
                tracing::warn!("No redis_url configured, using the in-memory ledger");
                LedgerHandles::from_backend(Arc::new(MemoryLedger::new()))
            }
        };
        Ok(Self::with_ledger(config, ledger))
    }

    /// Create the service over an existing ledger
    pub fn with_ledger(config: AccountingConfig, ledger: LedgerHandles) -> Self {
        Self {
            config,
            ledger,
            metrics: Arc::new(ConsumerMetrics::new()),
        }
    }

    pub fn config(&self) -> &AccountingConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<ConsumerMetrics> {
        self.metrics.clone()
    }

    /// Build the NATS-backed consumer supervisor
    pub fn supervisor(&self) -> Supervisor<NatsConnector> {
        Supervisor::new(
            NatsConnector::new(&self.config.nats_url),
            SupervisorSettings::from_config(&self.config),
            self.ledger.clone(),
            CreditConverter::new(self.config.credit_per_unit),
            self.metrics.clone(),
        )
    }

    /// Current balance of a user
    pub async fn balance(&self, user_id: &str) -> Result<Decimal> {
        self.ledger.accounts.get_balance(user_id).await
    }

    /// A page of a user's statements within a time range
    pub async fn statements(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        page_size: usize,
        page: usize,
    ) -> Result<Vec<LedgerStatement>> {
        self.ledger
            .statements
            .list_by_user_and_time_range(user_id, start, end, page_size, page)
            .await
    }
}
