//! Best-effort side channels
//!
//! Both sinks are a capacity-1 queue drained by a dedicated task. Producers
//! wait at most the idle interval for the slot; if the drain task has not
//! made room by then the item is handed back and the producer decides what
//! dropping means. For alerts it means the alert is lost. For dead letters
//! it means the message stays un-acknowledged and the broker redelivers it.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tally_common::Alert;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tracing::{debug, info, warn};

use super::broker::Publisher;

/// Why a handoff did not go through
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SinkRejected {
    #[error("sink did not accept within the handoff bound")]
    TimedOut,

    #[error("sink is closed")]
    Closed,
}

/// Producer half of a bounded, drop-on-timeout queue
pub struct BoundedSink<T> {
    tx: mpsc::Sender<T>,
    handoff_timeout: Duration,
}

impl<T> Clone for BoundedSink<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            handoff_timeout: self.handoff_timeout,
        }
    }
}

impl<T: Send> BoundedSink<T> {
    /// Create the sink and the receiver its drain task reads from
    pub fn channel(handoff_timeout: Duration) -> (Self, mpsc::Receiver<T>) {
        let (tx, rx) = mpsc::channel(1);
        (Self { tx, handoff_timeout }, rx)
    }

    /// Hand an item over, waiting at most the handoff timeout
    pub async fn offer(&self, item: T) -> Result<(), SinkRejected> {
        self.tx
            .send_timeout(item, self.handoff_timeout)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => SinkRejected::TimedOut,
                SendTimeoutError::Closed(_) => SinkRejected::Closed,
            })
    }
}

/// Forwards low-balance alerts to the notification subject
pub struct NotificationSink<P> {
    publisher: Arc<P>,
    subject: String,
}

impl<P: Publisher> NotificationSink<P> {
    pub fn new(publisher: Arc<P>, subject: impl Into<String>) -> Self {
        Self {
            publisher,
            subject: subject.into(),
        }
    }

    /// Drain alerts until every producer is gone
    pub async fn run(self, mut alerts: mpsc::Receiver<Alert>) {
        info!(subject = %self.subject, "Notification sink started");
        while let Some(alert) = alerts.recv().await {
            let payload = match serde_json::to_vec(&alert) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(event_id = %alert.event_id, error = %e, "Failed to encode alert");
                    continue;
                }
            };
            match self.publisher.publish(&self.subject, Bytes::from(payload)).await {
                Ok(()) => debug!(event_id = %alert.event_id, user_id = %alert.user_id, "Alert published"),
                Err(e) => warn!(event_id = %alert.event_id, error = %e, "Failed to publish alert"),
            }
        }
        info!("Notification sink stopped");
    }
}

/// Forwards undecodable or unprocessable payloads to quarantine
pub struct DeadLetterSink<P> {
    publisher: Arc<P>,
    subject: String,
}

impl<P: Publisher> DeadLetterSink<P> {
    pub fn new(publisher: Arc<P>, subject: impl Into<String>) -> Self {
        Self {
            publisher,
            subject: subject.into(),
        }
    }

    /// Drain dead letters until every producer is gone
    pub async fn run(self, mut letters: mpsc::Receiver<Bytes>) {
        info!(subject = %self.subject, "Dead-letter sink started");
        while let Some(payload) = letters.recv().await {
            let len = payload.len();
            if let Err(e) = self.publisher.publish(&self.subject, payload).await {
                warn!(bytes = len, error = %e, "Failed to publish dead letter");
            } else {
                debug!(bytes = len, "Dead letter published");
            }
        }
        info!("Dead-letter sink stopped");
    }
}
