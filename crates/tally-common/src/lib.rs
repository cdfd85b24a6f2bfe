//! # Tally Common
//!
//! Shared types and errors for the Tally usage-metering ledger.
//!
//! ## Core Types
//!
//! - [`UsageEvent`]: inbound pay-per-use record, keyed by event id
//! - [`Scene`]: billing scene with a total ordinal mapping
//! - [`LedgerStatement`]: posted billing record, one per event
//! - [`UserAccount`]: per-user balance
//! - [`Alert`]: low-balance notification

pub mod error;
pub mod types;

// Re-export commonly used types at crate root
pub use error::{LedgerError, Result, TallyError};
pub use types::{
    event::{EventExtra, Scene, UsageEvent, ValueKind},
    ledger::{LedgerStatement, UserAccount},
    notify::{Alert, ReasonCode},
};

/// Tally version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
