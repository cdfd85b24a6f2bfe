//! Pull loop with a consecutive-failure breaker

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use super::broker::{FetchError, MessageSource};
use super::retry::{Disposition, RetryController};
use crate::metrics::ConsumerMetrics;

/// Fetch loop tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchSettings {
    pub batch_size: usize,
    /// Bounded wait for a single fetch
    pub max_wait: Duration,
    /// Failures after which the loop gives up
    pub failure_threshold: u32,
}

impl FetchSettings {
    pub fn with_max_wait(max_wait: Duration) -> Self {
        Self {
            batch_size: crate::FETCH_BATCH_SIZE,
            max_wait,
            failure_threshold: crate::MAX_FETCH_FAILURES,
        }
    }
}

/// Totals for one run of the loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchReport {
    pub fetches: u64,
    pub failures: u32,
    pub acked: u64,
    pub dead_lettered: u64,
    pub left_for_redelivery: u64,
}

/// Sequential fetch-and-process loop over one message source
///
/// The failure counter belongs to the loop instance and is not reset by a
/// successful fetch: the loop gives up after `failure_threshold` failures
/// in total, successful batches in between notwithstanding.
pub struct FetchLoop<S> {
    source: S,
    settings: FetchSettings,
    failures: u32,
    metrics: Arc<ConsumerMetrics>,
}

impl<S: MessageSource> FetchLoop<S> {
    pub fn new(source: S, settings: FetchSettings, metrics: Arc<ConsumerMetrics>) -> Self {
        Self {
            source,
            settings,
            failures: 0,
            metrics,
        }
    }

    /// Pull and process until the failure threshold is reached
    pub async fn run(mut self, controller: &RetryController) -> FetchReport {
        let mut report = FetchReport::default();

        while self.failures < self.settings.failure_threshold {
            report.fetches += 1;
            let batch = match self
                .source
                .fetch(self.settings.batch_size, self.settings.max_wait)
                .await
            {
                Ok(batch) if batch.is_empty() => {
                    self.failures += 1;
                    self.metrics.fetch_failures.inc();
                    warn!(failures = self.failures, "Fetch returned an empty batch");
                    continue;
                }
                Ok(batch) => batch,
                Err(FetchError::Timeout) => continue,
                Err(e) => {
                    self.failures += 1;
                    self.metrics.fetch_failures.inc();
                    error!(failures = self.failures, error = %e, "Failed to fetch messages");
                    continue;
                }
            };

            debug!(size = batch.len(), "Fetched batch");
            for message in &batch {
                match controller.handle(message).await {
                    Disposition::Acked => report.acked += 1,
                    Disposition::DeadLettered => report.dead_lettered += 1,
                    Disposition::LeftForRedelivery => report.left_for_redelivery += 1,
                }
            }
        }

        report.failures = self.failures;
        warn!(failures = self.failures, "Fetch failure limit reached, resetting subscription");
        report
    }
}
