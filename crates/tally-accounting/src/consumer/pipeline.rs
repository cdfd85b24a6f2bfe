//! Message processing pipeline
//!
//! One call to [`MessageProcessor::process`] is one attempt at one message:
//! decode, audit, dedup, ensure account, convert, post, then check the
//! balance and raise a low-balance alert. Redelivered events are detected by
//! the statement lookup and succeed without side effects, which is what makes
//! at-least-once delivery safe to bill from.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tally_common::{Alert, LedgerStatement, Result, TallyError, UsageEvent};
use tracing::{debug, info, instrument, warn};

use super::sink::BoundedSink;
use crate::credit::CreditConverter;
use crate::metrics::ConsumerMetrics;
use crate::store::LedgerHandles;

/// Result of a successful attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// A statement was posted; balance is `None` if it could not be re-read
    Posted {
        statement: LedgerStatement,
        balance: Option<Decimal>,
    },
    /// The event had already been posted
    Duplicate,
}

/// Processes one message payload against the ledger
pub struct MessageProcessor {
    ledger: LedgerHandles,
    converter: CreditConverter,
    alerts: BoundedSink<Alert>,
    attempt_timeout: Duration,
    metrics: Arc<ConsumerMetrics>,
}

impl MessageProcessor {
    pub fn new(
        ledger: LedgerHandles,
        converter: CreditConverter,
        alerts: BoundedSink<Alert>,
        metrics: Arc<ConsumerMetrics>,
    ) -> Self {
        Self {
            ledger,
            converter,
            alerts,
            attempt_timeout: crate::ATTEMPT_TIMEOUT,
            metrics,
        }
    }

    /// Override the bound on downstream store calls
    pub fn with_attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }

    /// Run one attempt over a raw payload
    pub async fn process(&self, payload: &[u8]) -> Result<Outcome> {
        let event = UsageEvent::from_slice(payload)?;
        info!(event_id = %event.id, user_id = %event.user_id, scene = ?event.scene, "Usage event received");

        let posted = tokio::time::timeout(self.attempt_timeout, self.post(&event))
            .await
            .map_err(|_| {
                TallyError::Timeout(format!(
                    "posting event {} exceeded {:?}",
                    event.id, self.attempt_timeout
                ))
            })??;

        let Some(statement) = posted else {
            self.metrics.duplicate_events.inc();
            return Ok(Outcome::Duplicate);
        };
        self.metrics.statements_posted.inc();

        let balance = self.current_balance(&event.user_id).await;
        if let Some(balance) = balance {
            if balance <= Decimal::ZERO {
                self.raise_low_balance(&event, balance).await;
            }
        }

        Ok(Outcome::Posted { statement, balance })
    }

    /// Audit, dedup, ensure the account and post; `None` for a duplicate
    #[instrument(skip(self, event), fields(event_id = %event.id, user_id = %event.user_id))]
    async fn post(&self, event: &UsageEvent) -> Result<Option<LedgerStatement>> {
        // Audit rows are written on every attempt, duplicates included.
        self.ledger.events.record(event).await?;

        if self.ledger.statements.get_by_event_id(event.id).await?.is_some() {
            warn!("Duplicated event id, skipping");
            return Ok(None);
        }

        self.ledger.accounts.ensure_account(&event.user_id).await?;

        let extra = event.decode_extra()?;
        if event.scene.is_duration_billed() && extra.duration_units().is_none() {
            warn!(duration = %extra.duration, "Non-numeric customer_duration, recording zero consumption");
        }
        let amount = self.converter.amount_for(event);
        let statement = LedgerStatement::from_event(event, &extra, amount);

        self.ledger.statements.create(&statement, amount).await?;
        debug!(%amount, consumption = %statement.consumption, "Ledger posted");
        Ok(Some(statement))
    }

    async fn current_balance(&self, user_id: &str) -> Option<Decimal> {
        match tokio::time::timeout(self.attempt_timeout, self.ledger.accounts.get_balance(user_id)).await {
            Ok(Ok(balance)) => Some(balance),
            Ok(Err(e)) => {
                warn!(user_id, error = %e, "Failed to read balance after posting");
                None
            }
            Err(_) => {
                warn!(user_id, "Balance read timed out after posting");
                None
            }
        }
    }

    async fn raise_low_balance(&self, event: &UsageEvent, balance: Decimal) {
        match self.alerts.offer(Alert::lack_of_balance(event)).await {
            Ok(()) => {
                self.metrics.alerts_sent.inc();
                info!(event_id = %event.id, user_id = %event.user_id, %balance, "Low balance alert raised");
            }
            Err(rejected) => {
                self.metrics.alerts_dropped.inc();
                warn!(event_id = %event.id, user_id = %event.user_id, reason = %rejected, "Low balance alert dropped");
            }
        }
    }
}
