//! Connection supervisor
//!
//! The outer loop and the only self-healing path against broker outages.
//! Every iteration is one connection generation: connect, start both
//! sinks and the provision/fetch chain, wait for the chain to give up,
//! close, pause, repeat. Intervals are fixed so recovery latency stays
//! predictable.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{error, info, instrument, warn};

use super::broker::{BrokerConnection, Connector, SubscriptionSpec};
use super::fetch::FetchSettings;
use super::pipeline::MessageProcessor;
use super::provision::{ProvisionReport, Provisioner};
use super::retry::RetryController;
use super::sink::{BoundedSink, DeadLetterSink, NotificationSink};
use crate::config::AccountingConfig;
use crate::credit::CreditConverter;
use crate::metrics::ConsumerMetrics;
use crate::store::LedgerHandles;

/// Supervisor timing and routing
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorSettings {
    pub subscription: SubscriptionSpec,
    pub fetch: FetchSettings,
    pub notify_subject: String,
    pub dead_letter_subject: String,
    /// Sink handoff bound; generations are spaced by twice this
    pub idle_interval: Duration,
    /// Pause after a failed connection attempt
    pub reconnect_delay: Duration,
}

impl SupervisorSettings {
    pub fn from_config(config: &AccountingConfig) -> Self {
        Self {
            subscription: SubscriptionSpec::for_subject(&config.fee_request_subject),
            fetch: FetchSettings::with_max_wait(config.fetch_timeout()),
            notify_subject: config.notify_subject.clone(),
            dead_letter_subject: config.dead_letter_subject.clone(),
            idle_interval: config.idle_interval(),
            reconnect_delay: config.reconnect_delay(),
        }
    }
}

/// Owns the connection lifecycle of the ledger consumer
pub struct Supervisor<K> {
    connector: K,
    settings: SupervisorSettings,
    ledger: LedgerHandles,
    converter: CreditConverter,
    metrics: Arc<ConsumerMetrics>,
}

impl<K: Connector> Supervisor<K> {
    pub fn new(
        connector: K,
        settings: SupervisorSettings,
        ledger: LedgerHandles,
        converter: CreditConverter,
        metrics: Arc<ConsumerMetrics>,
    ) -> Self {
        Self {
            connector,
            settings,
            ledger,
            converter,
            metrics,
        }
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    /// Run connection generations forever
    pub async fn run(&self) {
        info!(subject = %self.settings.subscription.subject, "Ledger consumer supervisor started");
        loop {
            self.run_once().await;
        }
    }

    /// One connection attempt; `None` if the broker could not be reached
    pub async fn run_once(&self) -> Option<ProvisionReport> {
        let connection = match self.connector.connect().await {
            Ok(connection) => Arc::new(connection),
            Err(e) => {
                error!(error = %e, "Failed to connect to broker");
                tokio::time::sleep(self.settings.reconnect_delay).await;
                return None;
            }
        };

        self.metrics.connection_generations.inc();
        let report = self.run_generation(connection.clone()).await;

        connection.close().await;
        drop(connection);
        tokio::time::sleep(self.settings.idle_interval * 2).await;
        Some(report)
    }

    /// Run the sinks and the provision/fetch chain over one connection
    #[instrument(skip_all)]
    pub async fn run_generation(&self, connection: Arc<K::Connection>) -> ProvisionReport {
        let idle = self.settings.idle_interval;

        let (alerts, alert_rx) = BoundedSink::channel(idle);
        let (dead_letters, dead_letter_rx) = BoundedSink::channel(idle);
        let notify_task = tokio::spawn(
            NotificationSink::new(connection.clone(), self.settings.notify_subject.clone())
                .run(alert_rx),
        );
        let dead_letter_task = tokio::spawn(
            DeadLetterSink::new(connection.clone(), self.settings.dead_letter_subject.clone())
                .run(dead_letter_rx),
        );

        let processor = MessageProcessor::new(
            self.ledger.clone(),
            self.converter,
            alerts,
            self.metrics.clone(),
        );
        let controller = RetryController::new(processor, dead_letters, self.metrics.clone());
        let provisioner = Provisioner::new(
            connection,
            self.settings.subscription.clone(),
            self.settings.fetch,
            self.metrics.clone(),
        );

        let (done_tx, done_rx) = oneshot::channel();
        tokio::spawn(async move {
            let report = provisioner.run(&controller).await;
            // controller (and with it both sink senders) drops here
            drop(controller);
            let _ = done_tx.send(report);
        });

        let report = match done_rx.await {
            Ok(report) => report,
            Err(_) => {
                error!("Consumer chain ended without reporting");
                ProvisionReport::default()
            }
        };

        // Let the sinks drain what was already handed to them.
        for (name, task) in [("notification", notify_task), ("dead-letter", dead_letter_task)] {
            let abort = task.abort_handle();
            if tokio::time::timeout(idle, task).await.is_err() {
                warn!(sink = name, "Sink did not drain in time, aborting");
                abort.abort();
            }
        }

        report
    }
}
