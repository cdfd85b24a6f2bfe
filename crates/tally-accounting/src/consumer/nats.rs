//! NATS JetStream broker adapter

use std::time::Duration;

use async_nats::jetstream::{
    self,
    consumer::{pull, AckPolicy, DeliverPolicy, PullConsumer},
    stream,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tally_common::{Result, TallyError};
use tracing::{debug, info, instrument, warn};

use super::broker::{
    BrokerConnection, Connector, FetchError, InboundMessage, MessageSource, Publisher,
    SubscriptionSpec,
};

/// Opens NATS connections
#[derive(Debug, Clone)]
pub struct NatsConnector {
    url: String,
}

impl NatsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for NatsConnector {
    type Connection = NatsConnection;

    #[instrument(skip(self), fields(url = %self.url))]
    async fn connect(&self) -> Result<NatsConnection> {
        let client = async_nats::connect(self.url.as_str())
            .await
            .map_err(|e| TallyError::Network(format!("Failed to connect to NATS: {}", e)))?;
        info!("Connected to NATS");

        let jetstream = jetstream::new(client.clone());
        Ok(NatsConnection { client, jetstream })
    }
}

/// Live NATS connection with its JetStream context
pub struct NatsConnection {
    client: async_nats::Client,
    jetstream: jetstream::Context,
}

fn stream_config(spec: &SubscriptionSpec) -> stream::Config {
    stream::Config {
        name: spec.stream_name.clone(),
        subjects: vec![spec.subject.clone()],
        max_consumers: -1,
        max_messages: -1,
        max_bytes: -1,
        ..Default::default()
    }
}

fn consumer_config(spec: &SubscriptionSpec) -> pull::Config {
    pull::Config {
        durable_name: Some(spec.consumer_name.clone()),
        ack_policy: AckPolicy::Explicit,
        deliver_policy: DeliverPolicy::All,
        filter_subject: spec.subject.clone(),
        ..Default::default()
    }
}

#[async_trait]
impl BrokerConnection for NatsConnection {
    type Source = NatsSource;

    async fn create_stream(&self, spec: &SubscriptionSpec) -> Result<()> {
        self.jetstream
            .create_stream(stream_config(spec))
            .await
            .map(|_| ())
            .map_err(|e| TallyError::Network(format!("create stream {}: {}", spec.stream_name, e)))
    }

    async fn update_stream(&self, spec: &SubscriptionSpec) -> Result<()> {
        self.jetstream
            .update_stream(stream_config(spec))
            .await
            .map(|_| ())
            .map_err(|e| TallyError::Network(format!("update stream {}: {}", spec.stream_name, e)))
    }

    async fn create_consumer(&self, spec: &SubscriptionSpec) -> Result<NatsSource> {
        let stream = self
            .jetstream
            .get_stream(&spec.stream_name)
            .await
            .map_err(|e| TallyError::Network(format!("get stream {}: {}", spec.stream_name, e)))?;

        let consumer: PullConsumer = stream
            .create_consumer(consumer_config(spec))
            .await
            .map_err(|e| {
                TallyError::Network(format!("create consumer {}: {}", spec.consumer_name, e))
            })?;

        Ok(NatsSource { consumer })
    }

    async fn close(&self) {
        if let Err(e) = self.client.flush().await {
            warn!(error = %e, "Failed to flush NATS connection on close");
        }
        debug!("NATS connection flushed");
    }
}

#[async_trait]
impl Publisher for NatsConnection {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()> {
        self.client
            .publish(subject.to_string(), payload)
            .await
            .map_err(|e| TallyError::Network(format!("publish to {}: {}", subject, e)))
    }
}

/// Pull consumer bound to the durable subscription
pub struct NatsSource {
    consumer: PullConsumer,
}

#[async_trait]
impl MessageSource for NatsSource {
    type Message = NatsMessage;

    async fn fetch(
        &mut self,
        batch: usize,
        max_wait: Duration,
    ) -> std::result::Result<Vec<NatsMessage>, FetchError> {
        let mut messages = self
            .consumer
            .fetch()
            .max_messages(batch)
            .expires(max_wait)
            .messages()
            .await
            .map_err(|e| FetchError::Broker(e.to_string()))?;

        let mut fetched = Vec::with_capacity(batch);
        while let Some(next) = messages.next().await {
            match next {
                Ok(message) => fetched.push(NatsMessage { inner: message }),
                // Hand over what already arrived; the rest is redelivered.
                Err(e) if !fetched.is_empty() => {
                    warn!(error = %e, received = fetched.len(), "Batch ended early");
                    break;
                }
                Err(e) => return Err(FetchError::Broker(e.to_string())),
            }
        }

        // The batch request expired without anything to deliver.
        if fetched.is_empty() {
            return Err(FetchError::Timeout);
        }
        Ok(fetched)
    }
}

/// JetStream message awaiting acknowledgment
pub struct NatsMessage {
    inner: jetstream::Message,
}

#[async_trait]
impl InboundMessage for NatsMessage {
    fn payload(&self) -> &[u8] {
        &self.inner.payload
    }

    fn subject(&self) -> String {
        self.inner.subject.to_string()
    }

    async fn ack(&self) -> Result<()> {
        self.inner
            .ack()
            .await
            .map_err(|e| TallyError::Network(format!("ack: {}", e)))
    }
}
