//! Stream and durable consumer provisioning

use std::sync::Arc;

use tally_common::Result;
use tracing::{error, info, instrument, warn};

use super::broker::{BrokerConnection, SubscriptionSpec};
use super::fetch::{FetchLoop, FetchReport, FetchSettings};
use super::retry::RetryController;
use crate::metrics::ConsumerMetrics;

/// Sets up the durable subscription and drives the fetch loop over it
///
/// Each round provisions the stream and consumer, then runs a fresh fetch
/// loop until it gives up. A failed provisioning step also ends the round.
/// After `rounds` rounds control returns to the supervisor, which tears
/// the connection down.
pub struct Provisioner<C> {
    connection: Arc<C>,
    spec: SubscriptionSpec,
    fetch: FetchSettings,
    rounds: u32,
    metrics: Arc<ConsumerMetrics>,
}

/// Totals across all provisioning rounds
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionReport {
    pub rounds: u32,
    pub provision_failures: u32,
    pub fetch_reports: Vec<FetchReport>,
}

impl<C: BrokerConnection> Provisioner<C> {
    pub fn new(
        connection: Arc<C>,
        spec: SubscriptionSpec,
        fetch: FetchSettings,
        metrics: Arc<ConsumerMetrics>,
    ) -> Self {
        Self {
            connection,
            spec,
            fetch,
            rounds: crate::PROVISION_ROUNDS,
            metrics,
        }
    }

    /// Ensure the stream exists with the expected config, then bind the consumer
    #[instrument(skip(self), fields(stream = %self.spec.stream_name, consumer = %self.spec.consumer_name))]
    pub async fn provision(&self) -> Result<C::Source> {
        if let Err(e) = self.connection.create_stream(&self.spec).await {
            warn!(error = %e, "Failed to add stream, trying update");
            self.connection.update_stream(&self.spec).await.map_err(|e| {
                warn!(error = %e, "Failed to update stream");
                e
            })?;
        }

        let source = self.connection.create_consumer(&self.spec).await.map_err(|e| {
            error!(error = %e, "Failed to add consumer");
            e
        })?;
        info!(subject = %self.spec.subject, "Durable subscription ready");
        Ok(source)
    }

    /// Run up to `rounds` provision-and-fetch rounds
    pub async fn run(&self, controller: &RetryController) -> ProvisionReport {
        let mut report = ProvisionReport::default();

        for round in 1..=self.rounds {
            report.rounds = round;
            let source = match self.provision().await {
                Ok(source) => source,
                Err(e) => {
                    report.provision_failures += 1;
                    error!(round, error = %e, "Provisioning round failed");
                    continue;
                }
            };

            let fetch_report = FetchLoop::new(source, self.fetch, self.metrics.clone())
                .run(controller)
                .await;
            info!(round, fetches = fetch_report.fetches, acked = fetch_report.acked, "Fetch loop ended");
            report.fetch_reports.push(fetch_report);
        }

        warn!(rounds = report.rounds, "Provisioning rounds exhausted, reconnecting");
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::testing::{harness, ScriptedConnection};
    use crate::store::MemoryLedger;
    use std::time::Duration;

    fn provisioner(connection: ScriptedConnection) -> (Arc<ScriptedConnection>, Provisioner<ScriptedConnection>) {
        let connection = Arc::new(connection);
        let provisioner = Provisioner::new(
            connection.clone(),
            SubscriptionSpec::for_subject("accounting.fee.request"),
            FetchSettings::with_max_wait(Duration::from_millis(10)),
            Arc::new(ConsumerMetrics::new()),
        );
        (connection, provisioner)
    }

    #[tokio::test]
    async fn test_existing_stream_falls_back_to_update() {
        let (connection, provisioner) = provisioner(ScriptedConnection {
            create_stream_ok: false,
            ..ScriptedConnection::healthy()
        });

        assert!(provisioner.provision().await.is_ok());
        assert_eq!(
            connection.calls(),
            vec!["create_stream", "update_stream", "create_consumer"]
        );
    }

    #[tokio::test]
    async fn test_update_failure_skips_consumer() {
        let (connection, provisioner) = provisioner(ScriptedConnection {
            create_stream_ok: false,
            update_stream_ok: false,
            ..ScriptedConnection::healthy()
        });

        assert!(provisioner.provision().await.is_err());
        assert_eq!(connection.calls(), vec!["create_stream", "update_stream"]);
    }

    #[tokio::test]
    async fn test_runs_five_rounds() {
        let h = harness(MemoryLedger::new());
        let (connection, provisioner) = provisioner(ScriptedConnection::healthy());

        let report = provisioner.run(&h.controller).await;

        assert_eq!(report.rounds, 5);
        assert_eq!(report.provision_failures, 0);
        assert_eq!(report.fetch_reports.len(), 5);
        assert!(report.fetch_reports.iter().all(|r| r.failures == 10));
        let consumers = connection
            .calls()
            .into_iter()
            .filter(|c| *c == "create_consumer")
            .count();
        assert_eq!(consumers, 5);
    }

    #[tokio::test]
    async fn test_failed_rounds_still_count() {
        let h = harness(MemoryLedger::new());
        let (_connection, provisioner) = provisioner(ScriptedConnection {
            consumer_ok: false,
            ..ScriptedConnection::healthy()
        });

        let report = provisioner.run(&h.controller).await;

        assert_eq!(report.rounds, 5);
        assert_eq!(report.provision_failures, 5);
        assert!(report.fetch_reports.is_empty());
    }
}
