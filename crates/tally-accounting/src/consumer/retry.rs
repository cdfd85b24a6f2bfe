//! Retry and acknowledgment controller

use std::sync::Arc;

use bytes::Bytes;
use tracing::{error, info, warn};

use super::broker::InboundMessage;
use super::pipeline::MessageProcessor;
use super::sink::BoundedSink;
use crate::metrics::ConsumerMetrics;

/// What happened to a message after the controller was done with it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Processed and acknowledged
    Acked,
    /// Retries exhausted, handed to the dead-letter sink and acknowledged
    DeadLettered,
    /// Retries exhausted and the dead-letter sink did not accept it;
    /// left un-acknowledged for the broker to redeliver
    LeftForRedelivery,
}

/// Runs the pipeline with bounded retries and settles the message
pub struct RetryController {
    processor: MessageProcessor,
    dead_letters: BoundedSink<Bytes>,
    max_attempts: u32,
    metrics: Arc<ConsumerMetrics>,
}

impl RetryController {
    pub fn new(
        processor: MessageProcessor,
        dead_letters: BoundedSink<Bytes>,
        metrics: Arc<ConsumerMetrics>,
    ) -> Self {
        Self {
            processor,
            dead_letters,
            max_attempts: crate::MAX_ATTEMPTS,
            metrics,
        }
    }

    /// Process one message to a final disposition
    pub async fn handle<M: InboundMessage>(&self, message: &M) -> Disposition {
        let mut last_error = None;

        for attempt in 1..=self.max_attempts {
            match self.processor.process(message.payload()).await {
                Ok(_) => {
                    last_error = None;
                    break;
                }
                Err(e) => {
                    self.metrics.failed_attempts.inc();
                    error!(attempt, subject = %message.subject(), error = %e, "Failed to handle message");
                    last_error = Some(e);
                }
            }
        }

        let Some(last_error) = last_error else {
            if let Err(e) = message.ack().await {
                warn!(error = %e, "Failed to ack processed message");
            }
            return Disposition::Acked;
        };

        let payload = Bytes::copy_from_slice(message.payload());
        match self.dead_letters.offer(payload).await {
            Ok(()) => {
                self.metrics.dead_lettered.inc();
                info!(attempts = self.max_attempts, error = %last_error, "Message dead-lettered");
                if let Err(e) = message.ack().await {
                    warn!(error = %e, "Failed to ack dead-lettered message");
                }
                Disposition::DeadLettered
            }
            Err(rejected) => {
                self.metrics.left_for_redelivery.inc();
                warn!(reason = %rejected, "Dead-letter handoff failed, leaving message for redelivery");
                Disposition::LeftForRedelivery
            }
        }
    }
}
