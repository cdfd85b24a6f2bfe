//! Ledger consumer
//!
//! Consumes usage events from a durable broker subscription and posts them
//! to the ledger:
//!
//! ```text
//! Supervisor ─▶ Provisioner ─▶ FetchLoop ─▶ RetryController ─▶ MessageProcessor ─▶ Ledger
//!     │                                          │                    │
//!     ├─ DeadLetterSink ◀────────────────────────┘                    │
//!     └─ NotificationSink ◀───────────────────────────────────────────┘
//! ```
//!
//! Messages are processed strictly one at a time in delivery order.

pub mod broker;
pub mod fetch;
pub mod nats;
pub mod pipeline;
pub mod provision;
pub mod retry;
pub mod sink;
pub mod supervisor;

pub use broker::{
    BrokerConnection, Connector, FetchError, InboundMessage, MessageSource, Publisher,
    SubscriptionSpec, DURABLE_CONSUMER_NAME, EVENT_STREAM_NAME,
};
pub use fetch::{FetchLoop, FetchReport, FetchSettings};
pub use nats::{NatsConnection, NatsConnector};
pub use pipeline::{MessageProcessor, Outcome};
pub use provision::{ProvisionReport, Provisioner};
pub use retry::{Disposition, RetryController};
pub use sink::{BoundedSink, DeadLetterSink, NotificationSink, SinkRejected};
pub use supervisor::{Supervisor, SupervisorSettings};

#[cfg(test)]
pub(crate) mod testing;
