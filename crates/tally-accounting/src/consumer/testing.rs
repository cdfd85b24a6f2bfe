//! Scripted broker and store doubles for consumer unit tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tally_common::{Alert, Result, TallyError, UsageEvent};
use tokio::sync::mpsc;

use super::broker::{
    BrokerConnection, Connector, FetchError, InboundMessage, MessageSource, Publisher,
    SubscriptionSpec,
};
use super::pipeline::MessageProcessor;
use super::retry::RetryController;
use super::sink::BoundedSink;
use crate::credit::CreditConverter;
use crate::metrics::ConsumerMetrics;
use crate::store::{EventLog, LedgerHandles, MemoryLedger};

pub struct TestMessage {
    pub payload: Bytes,
    pub acks: Arc<AtomicUsize>,
}

impl TestMessage {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            acks: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn for_event(event: &UsageEvent) -> Self {
        Self::new(serde_json::to_vec(event).unwrap())
    }

    pub fn acks(&self) -> usize {
        self.acks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InboundMessage for TestMessage {
    fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn subject(&self) -> String {
        "test.subject".to_string()
    }

    async fn ack(&self) -> Result<()> {
        self.acks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub type FetchStep = std::result::Result<Vec<TestMessage>, FetchError>;

/// Replays scripted fetch results, then fails every fetch
pub struct ScriptedSource {
    steps: VecDeque<FetchStep>,
    pub fetches: Arc<AtomicUsize>,
}

impl ScriptedSource {
    pub fn new(steps: Vec<FetchStep>) -> Self {
        Self {
            steps: steps.into(),
            fetches: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl MessageSource for ScriptedSource {
    type Message = TestMessage;

    async fn fetch(
        &mut self,
        _batch: usize,
        _max_wait: Duration,
    ) -> std::result::Result<Vec<TestMessage>, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.steps
            .pop_front()
            .unwrap_or_else(|| Err(FetchError::Broker("script exhausted".into())))
    }
}

/// Raises its flag when dropped
#[derive(Default)]
pub struct ReleaseFlag(pub Option<Arc<AtomicBool>>);

impl Drop for ReleaseFlag {
    fn drop(&mut self) {
        if let Some(flag) = &self.0 {
            flag.store(true, Ordering::SeqCst);
        }
    }
}

/// Connection whose provisioning calls follow a script
#[derive(Default)]
pub struct ScriptedConnection {
    pub create_stream_ok: bool,
    pub update_stream_ok: bool,
    pub consumer_ok: bool,
    pub calls: Mutex<Vec<&'static str>>,
    pub published: Mutex<Vec<(String, Bytes)>>,
    /// Script for the first consumer created; later ones fail at once
    pub first_source: Mutex<Option<Vec<FetchStep>>>,
    pub released: ReleaseFlag,
}

impl ScriptedConnection {
    pub fn healthy() -> Self {
        Self {
            create_stream_ok: true,
            update_stream_ok: true,
            consumer_ok: true,
            ..Default::default()
        }
    }

    pub fn with_first_source(steps: Vec<FetchStep>) -> Self {
        let connection = Self::healthy();
        *connection.first_source.lock() = Some(steps);
        connection
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    pub fn published_to(&self, subject: &str) -> Vec<Bytes> {
        self.published
            .lock()
            .iter()
            .filter(|(s, _)| s == subject)
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

fn scripted(ok: bool, what: &str) -> Result<()> {
    if ok {
        Ok(())
    } else {
        Err(TallyError::Network(format!("{} refused", what)))
    }
}

#[async_trait]
impl BrokerConnection for ScriptedConnection {
    type Source = ScriptedSource;

    async fn create_stream(&self, _spec: &SubscriptionSpec) -> Result<()> {
        self.calls.lock().push("create_stream");
        scripted(self.create_stream_ok, "create stream")
    }

    async fn update_stream(&self, _spec: &SubscriptionSpec) -> Result<()> {
        self.calls.lock().push("update_stream");
        scripted(self.update_stream_ok, "update stream")
    }

    async fn create_consumer(&self, _spec: &SubscriptionSpec) -> Result<ScriptedSource> {
        self.calls.lock().push("create_consumer");
        scripted(self.consumer_ok, "create consumer")?;
        let steps = self.first_source.lock().take().unwrap_or_default();
        Ok(ScriptedSource::new(steps))
    }

    async fn close(&self) {
        self.calls.lock().push("close");
    }
}

#[async_trait]
impl Publisher for ScriptedConnection {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()> {
        self.published.lock().push((subject.to_string(), payload));
        Ok(())
    }
}

/// Connector that hands out healthy connections, or refuses every attempt
pub struct ScriptedConnector {
    pub reachable: bool,
    pub attempts: Arc<AtomicUsize>,
    /// Set once a handed-out connection has been dropped
    pub released: Arc<AtomicBool>,
}

impl ScriptedConnector {
    pub fn new(reachable: bool) -> Self {
        Self {
            reachable,
            attempts: Arc::new(AtomicUsize::new(0)),
            released: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    type Connection = ScriptedConnection;

    async fn connect(&self) -> Result<ScriptedConnection> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        scripted(self.reachable, "connect")?;
        Ok(ScriptedConnection {
            released: ReleaseFlag(Some(self.released.clone())),
            ..ScriptedConnection::healthy()
        })
    }
}

/// Audit log that always fails, counting calls
#[derive(Default)]
pub struct BrokenEventLog {
    pub calls: AtomicUsize,
}

#[async_trait]
impl EventLog for BrokenEventLog {
    async fn record(&self, _event: &UsageEvent) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(TallyError::Storage("audit log unavailable".into()))
    }
}

pub struct Harness {
    pub ledger: Arc<MemoryLedger>,
    pub controller: RetryController,
    pub alerts: mpsc::Receiver<Alert>,
    pub dead_letters: mpsc::Receiver<Bytes>,
    pub metrics: Arc<ConsumerMetrics>,
}

pub fn harness(ledger: MemoryLedger) -> Harness {
    let ledger = Arc::new(ledger);
    harness_with(ledger.clone(), LedgerHandles::from_backend(ledger))
}

pub fn harness_with(ledger: Arc<MemoryLedger>, handles: LedgerHandles) -> Harness {
    let metrics = Arc::new(ConsumerMetrics::new());
    let (alert_sink, alerts) = BoundedSink::channel(Duration::from_secs(10));
    let (dead_letter_sink, dead_letters) = BoundedSink::channel(Duration::from_secs(10));
    let processor = MessageProcessor::new(
        handles,
        CreditConverter::new(Decimal::new(1, 3)),
        alert_sink,
        metrics.clone(),
    );
    Harness {
        ledger,
        controller: RetryController::new(processor, dead_letter_sink, metrics.clone()),
        alerts,
        dead_letters,
        metrics,
    }
}
