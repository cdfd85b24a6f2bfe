//! Ledger storage
//!
//! The consumer talks to persistence through three narrow seams:
//! - [`LedgerStore`]: atomic statement + balance posting, lookups
//! - [`AccountGuard`]: lazy account creation and balance reads
//! - [`EventLog`]: append-only audit log of raw events
//!
//! Backends:
//! - [`MemoryLedger`]: single-process store, used in tests and local runs
//! - [`RedisLedger`]: Redis store posting through a Lua script

pub mod memory;
pub mod redis_ledger;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tally_common::{LedgerStatement, Result, UsageEvent};
use uuid::Uuid;

pub use self::memory::MemoryLedger;
pub use self::redis_ledger::RedisLedger;

/// Statement storage with transactional posting
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Insert the statement and apply `delta` to the user's balance atomically
    ///
    /// Fails with `LedgerError::DuplicateEvent` if a statement already
    /// exists for the event, and with `LedgerError::AccountNotFound` if the
    /// account was never created. Neither side is written on failure.
    async fn create(&self, statement: &LedgerStatement, delta: Decimal) -> Result<()>;

    /// Look up the statement posted for an event
    async fn get_by_event_id(&self, event_id: Uuid) -> Result<Option<LedgerStatement>>;

    /// Page through a user's statements by event date, `page` starting at 1
    async fn list_by_user_and_time_range(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        page_size: usize,
        page: usize,
    ) -> Result<Vec<LedgerStatement>>;
}

/// Account existence and balance reads
#[async_trait]
pub trait AccountGuard: Send + Sync {
    /// Create a zero-balance account if none exists
    async fn ensure_account(&self, user_id: &str) -> Result<()>;

    async fn get_balance(&self, user_id: &str) -> Result<Decimal>;
}

/// Append-only audit log of received events
#[async_trait]
pub trait EventLog: Send + Sync {
    async fn record(&self, event: &UsageEvent) -> Result<()>;
}

/// Handles to the three storage seams
#[derive(Clone)]
pub struct LedgerHandles {
    pub statements: Arc<dyn LedgerStore>,
    pub accounts: Arc<dyn AccountGuard>,
    pub events: Arc<dyn EventLog>,
}

impl LedgerHandles {
    /// Use one backend for all three seams
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: LedgerStore + AccountGuard + EventLog + 'static,
    {
        Self {
            statements: backend.clone(),
            accounts: backend.clone(),
            events: backend,
        }
    }
}

/// Offset of a 1-based page; page 0 is treated as page 1
pub(crate) fn page_offset(page_size: usize, page: usize) -> usize {
    page.saturating_sub(1).saturating_mul(page_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_offset() {
        assert_eq!(page_offset(10, 1), 0);
        assert_eq!(page_offset(10, 3), 20);
        assert_eq!(page_offset(10, 0), 0);
    }
}
