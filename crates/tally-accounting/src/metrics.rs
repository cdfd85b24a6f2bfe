//! Prometheus metrics for the ledger consumer

use prometheus::{IntCounter, Registry};

/// Counters for the consume-and-post pipeline
pub struct ConsumerMetrics {
    pub statements_posted: IntCounter,
    pub duplicate_events: IntCounter,
    pub failed_attempts: IntCounter,
    pub dead_lettered: IntCounter,
    pub left_for_redelivery: IntCounter,
    pub fetch_failures: IntCounter,
    pub alerts_sent: IntCounter,
    pub alerts_dropped: IntCounter,
    pub connection_generations: IntCounter,
}

impl ConsumerMetrics {
    pub fn new() -> Self {
        Self {
            statements_posted: counter(
                "tally_statements_posted_total",
                "Ledger statements posted",
            ),
            duplicate_events: counter(
                "tally_duplicate_events_total",
                "Redelivered events skipped by the idempotency check",
            ),
            failed_attempts: counter(
                "tally_failed_attempts_total",
                "Processing attempts that ended in an error",
            ),
            dead_lettered: counter(
                "tally_dead_lettered_total",
                "Messages handed to the dead-letter sink",
            ),
            left_for_redelivery: counter(
                "tally_left_for_redelivery_total",
                "Messages left un-acknowledged after a dead-letter handoff timeout",
            ),
            fetch_failures: counter(
                "tally_fetch_failures_total",
                "Batch fetches that failed or returned nothing",
            ),
            alerts_sent: counter("tally_alerts_sent_total", "Low-balance alerts handed off"),
            alerts_dropped: counter(
                "tally_alerts_dropped_total",
                "Low-balance alerts dropped on handoff timeout",
            ),
            connection_generations: counter(
                "tally_connection_generations_total",
                "Broker connections established by the supervisor",
            ),
        }
    }

    pub fn register(&self, registry: &Registry) -> prometheus::Result<()> {
        registry.register(Box::new(self.statements_posted.clone()))?;
        registry.register(Box::new(self.duplicate_events.clone()))?;
        registry.register(Box::new(self.failed_attempts.clone()))?;
        registry.register(Box::new(self.dead_lettered.clone()))?;
        registry.register(Box::new(self.left_for_redelivery.clone()))?;
        registry.register(Box::new(self.fetch_failures.clone()))?;
        registry.register(Box::new(self.alerts_sent.clone()))?;
        registry.register(Box::new(self.alerts_dropped.clone()))?;
        registry.register(Box::new(self.connection_generations.clone()))?;
        Ok(())
    }
}

impl Default for ConsumerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

// Names and help strings are static, so construction cannot fail.
fn counter(name: &str, help: &str) -> IntCounter {
    IntCounter::new(name, help).expect("static metric definition")
}
