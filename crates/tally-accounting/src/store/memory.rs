//! In-memory ledger
//!
//! Keeps statements, balances and the audit log behind a single lock so a
//! posting is atomic with respect to every other reader and writer.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tally_common::{LedgerError, LedgerStatement, Result, UsageEvent, UserAccount};
use tracing::debug;
use uuid::Uuid;

use super::{page_offset, AccountGuard, EventLog, LedgerStore};

#[derive(Default)]
struct LedgerState {
    statements: HashMap<Uuid, LedgerStatement>,
    accounts: HashMap<String, UserAccount>,
    audit_log: Vec<UsageEvent>,
}

/// Single-process ledger backend
#[derive(Default)]
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an account with an opening balance
    pub fn with_account(self, user_id: impl Into<String>, balance: Decimal) -> Self {
        {
            let mut state = self.state.lock();
            let user_id = user_id.into();
            state.accounts.insert(
                user_id.clone(),
                UserAccount {
                    user_id,
                    balance,
                },
            );
        }
        self
    }

    /// Number of posted statements
    pub fn statement_count(&self) -> usize {
        self.state.lock().statements.len()
    }

    /// Snapshot of the audit log, oldest first
    pub fn audit_log(&self) -> Vec<UsageEvent> {
        self.state.lock().audit_log.clone()
    }

    pub fn account(&self, user_id: &str) -> Option<UserAccount> {
        self.state.lock().accounts.get(user_id).cloned()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn create(&self, statement: &LedgerStatement, delta: Decimal) -> Result<()> {
        let mut state = self.state.lock();

        if state.statements.contains_key(&statement.event_id) {
            return Err(LedgerError::DuplicateEvent(statement.event_id).into());
        }

        let account = state
            .accounts
            .get_mut(&statement.user_id)
            .ok_or_else(|| LedgerError::AccountNotFound(statement.user_id.clone()))?;
        let balance = account.balance.checked_add(delta).ok_or_else(|| {
            LedgerError::Backend(format!(
                "balance of {} overflows applying {}",
                statement.user_id, delta
            ))
        })?;
        account.balance = balance;

        state.statements.insert(statement.event_id, statement.clone());
        debug!(event_id = %statement.event_id, user_id = %statement.user_id, %delta, %balance, "Statement posted");
        Ok(())
    }

    async fn get_by_event_id(&self, event_id: Uuid) -> Result<Option<LedgerStatement>> {
        Ok(self.state.lock().statements.get(&event_id).cloned())
    }

    async fn list_by_user_and_time_range(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        page_size: usize,
        page: usize,
    ) -> Result<Vec<LedgerStatement>> {
        let state = self.state.lock();
        let mut matching: Vec<&LedgerStatement> = state
            .statements
            .values()
            .filter(|s| s.user_id == user_id && s.event_date >= start && s.event_date <= end)
            .collect();
        matching.sort_by_key(|s| (s.event_date, s.event_id));

        Ok(matching
            .into_iter()
            .skip(page_offset(page_size, page))
            .take(page_size)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AccountGuard for MemoryLedger {
    async fn ensure_account(&self, user_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        if !state.accounts.contains_key(user_id) {
            state
                .accounts
                .insert(user_id.to_string(), UserAccount::new(user_id));
            debug!(user_id, "Account created");
        }
        Ok(())
    }

    async fn get_balance(&self, user_id: &str) -> Result<Decimal> {
        self.state
            .lock()
            .accounts
            .get(user_id)
            .map(|a| a.balance)
            .ok_or_else(|| LedgerError::AccountNotFound(user_id.to_string()).into())
    }
}

#[async_trait]
impl EventLog for MemoryLedger {
    async fn record(&self, event: &UsageEvent) -> Result<()> {
        self.state.lock().audit_log.push(event.clone());
        Ok(())
    }
}
