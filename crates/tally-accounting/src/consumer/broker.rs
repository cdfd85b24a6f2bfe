//! Broker seams
//!
//! The consumer is written against these traits; [`super::nats`] provides
//! the JetStream implementation.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tally_common::Result;
use thiserror::Error;

/// Stream name for usage events
pub const EVENT_STREAM_NAME: &str = "accountingEventStream";

/// Durable consumer name for the accounting server
pub const DURABLE_CONSUMER_NAME: &str = "accountingServerDurableConsumer";

/// Identity of the durable subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSpec {
    pub stream_name: String,
    pub consumer_name: String,
    pub subject: String,
}

impl SubscriptionSpec {
    /// Subscription on the fixed accounting stream and consumer
    pub fn for_subject(subject: impl Into<String>) -> Self {
        Self {
            stream_name: EVENT_STREAM_NAME.to_string(),
            consumer_name: DURABLE_CONSUMER_NAME.to_string(),
            subject: subject.into(),
        }
    }
}

/// Outcome of a failed batch fetch
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FetchError {
    /// Bounded wait elapsed with nothing to deliver
    #[error("fetch wait elapsed")]
    Timeout,

    #[error("fetch failed: {0}")]
    Broker(String),
}

/// Opens broker connections
#[async_trait]
pub trait Connector: Send + Sync {
    type Connection: BrokerConnection;

    async fn connect(&self) -> Result<Self::Connection>;
}

/// A live broker connection
#[async_trait]
pub trait BrokerConnection: Publisher + Send + Sync + 'static {
    type Source: MessageSource + 'static;

    /// Create the event stream
    async fn create_stream(&self, spec: &SubscriptionSpec) -> Result<()>;

    /// Update an existing event stream to the expected configuration
    async fn update_stream(&self, spec: &SubscriptionSpec) -> Result<()>;

    /// Create (or bind to) the durable pull consumer
    async fn create_consumer(&self, spec: &SubscriptionSpec) -> Result<Self::Source>;

    /// Flush pending publishes before the connection is released
    ///
    /// The underlying socket closes once the last handle to the connection
    /// is dropped.
    async fn close(&self);
}

/// Publishes side-channel payloads
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()>;
}

/// Pull-based batch source bound to a durable consumer
#[async_trait]
pub trait MessageSource: Send {
    type Message: InboundMessage + 'static;

    /// Fetch up to `batch` messages, waiting at most `max_wait`
    async fn fetch(
        &mut self,
        batch: usize,
        max_wait: Duration,
    ) -> std::result::Result<Vec<Self::Message>, FetchError>;
}

/// A delivered message awaiting acknowledgment
#[async_trait]
pub trait InboundMessage: Send + Sync {
    fn payload(&self) -> &[u8];

    fn subject(&self) -> String;

    async fn ack(&self) -> Result<()>;
}
