//! Redis ledger
//!
//! Layout under the configured prefix:
//! - `{prefix}:statement:{event_id}`: statement JSON, the uniqueness key
//! - `{prefix}:balance:{user_id}`: balance in integer micro-credits
//! - `{prefix}:user:{user_id}:statements`: sorted set of event ids by event date
//! - `{prefix}:events`: audit log list
//!
//! Posting runs as a single Lua script. The balance increment runs before
//! any write, so a failing increment leaves nothing behind. Amounts must sit
//! on the micro-credit grid so the stored statement and the balance change
//! agree exactly.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{aio::ConnectionManager, AsyncCommands, Client, Script};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tally_common::{LedgerError, LedgerStatement, Result, TallyError, UsageEvent};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::{page_offset, AccountGuard, EventLog, LedgerStore};

/// Decimal places kept for balances
pub const BALANCE_SCALE: u32 = crate::credit::AMOUNT_SCALE;

const MINOR_UNITS_PER_CREDIT: i64 = 1_000_000;

// KEYS: statement, balance, user index
// ARGV: statement json, delta (minor units), score, event id
const POST_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return 0
end
if redis.call('EXISTS', KEYS[2]) == 0 then
    return -1
end
redis.call('INCRBY', KEYS[2], ARGV[2])
redis.call('SET', KEYS[1], ARGV[1])
redis.call('ZADD', KEYS[3], ARGV[3], ARGV[4])
return 1
"#;

/// Redis-backed ledger
pub struct RedisLedger {
    connection: ConnectionManager,
    prefix: String,
    post_script: Script,
}

impl RedisLedger {
    /// Connect to Redis
    pub async fn new(redis_url: &str, prefix: &str) -> Result<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| TallyError::Config(format!("Failed to create Redis client: {}", e)))?;

        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| TallyError::Storage(format!("Failed to connect to Redis: {}", e)))?;

        info!(prefix, "Connected to Redis ledger");

        Ok(Self {
            connection,
            prefix: prefix.to_string(),
            post_script: Script::new(POST_SCRIPT),
        })
    }

    fn statement_key(&self, event_id: Uuid) -> String {
        format!("{}:statement:{}", self.prefix, event_id)
    }

    fn balance_key(&self, user_id: &str) -> String {
        format!("{}:balance:{}", self.prefix, user_id)
    }

    fn user_index_key(&self, user_id: &str) -> String {
        format!("{}:user:{}:statements", self.prefix, user_id)
    }

    fn audit_key(&self) -> String {
        format!("{}:events", self.prefix)
    }
}

fn backend(context: &str, err: redis::RedisError) -> TallyError {
    LedgerError::Backend(format!("{}: {}", context, err)).into()
}

/// Convert a credit amount to integer micro-credits
pub fn to_minor_units(amount: Decimal) -> Result<i64> {
    amount
        .checked_mul(Decimal::from(MINOR_UNITS_PER_CREDIT))
        .and_then(|scaled| scaled.round().to_i64())
        .ok_or_else(|| TallyError::Storage(format!("amount {} out of range", amount)))
}

pub fn from_minor_units(minor: i64) -> Decimal {
    Decimal::new(minor, BALANCE_SCALE)
}

/// Micro-credits for an amount that must convert without rounding
pub fn exact_minor_units(amount: Decimal) -> Result<i64> {
    let minor = to_minor_units(amount)?;
    if from_minor_units(minor) != amount {
        return Err(LedgerError::Backend(format!(
            "amount {} has more than {} decimal places",
            amount, BALANCE_SCALE
        ))
        .into());
    }
    Ok(minor)
}

#[async_trait]
impl LedgerStore for RedisLedger {
    #[instrument(skip(self, statement), fields(event_id = %statement.event_id))]
    async fn create(&self, statement: &LedgerStatement, delta: Decimal) -> Result<()> {
        if statement.amount != delta {
            return Err(LedgerError::Backend(format!(
                "statement amount {} does not match delta {}",
                statement.amount, delta
            ))
            .into());
        }
        let delta_minor = exact_minor_units(delta)?;
        let json = serde_json::to_string(statement)?;
        let mut conn = self.connection.clone();

        let outcome: i64 = self
            .post_script
            .key(self.statement_key(statement.event_id))
            .key(self.balance_key(&statement.user_id))
            .key(self.user_index_key(&statement.user_id))
            .arg(json)
            .arg(delta_minor)
            .arg(statement.event_date.timestamp_millis())
            .arg(statement.event_id.to_string())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| backend("post script failed", e))?;

        match outcome {
            1 => {
                debug!(user_id = %statement.user_id, delta_minor, "Statement posted");
                Ok(())
            }
            0 => Err(LedgerError::DuplicateEvent(statement.event_id).into()),
            -1 => Err(LedgerError::AccountNotFound(statement.user_id.clone()).into()),
            other => Err(TallyError::Storage(format!(
                "unexpected post script result {}",
                other
            ))),
        }
    }

    async fn get_by_event_id(&self, event_id: Uuid) -> Result<Option<LedgerStatement>> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = conn
            .get(self.statement_key(event_id))
            .await
            .map_err(|e| backend("statement lookup failed", e))?;

        raw.map(|json| serde_json::from_str(&json).map_err(TallyError::from))
            .transpose()
    }

    async fn list_by_user_and_time_range(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        page_size: usize,
        page: usize,
    ) -> Result<Vec<LedgerStatement>> {
        if page_size == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.connection.clone();

        let ids: Vec<String> = conn
            .zrangebyscore_limit(
                self.user_index_key(user_id),
                start.timestamp_millis(),
                end.timestamp_millis(),
                page_offset(page_size, page) as isize,
                page_size as isize,
            )
            .await
            .map_err(|e| backend("statement index scan failed", e))?;

        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = ids
            .iter()
            .map(|id| format!("{}:statement:{}", self.prefix, id))
            .collect();
        let raw: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await
            .map_err(|e| backend("statement fetch failed", e))?;

        raw.into_iter()
            .flatten()
            .map(|json| serde_json::from_str(&json).map_err(TallyError::from))
            .collect()
    }
}

#[async_trait]
impl AccountGuard for RedisLedger {
    async fn ensure_account(&self, user_id: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        let created: bool = conn
            .set_nx(self.balance_key(user_id), 0i64)
            .await
            .map_err(|e| backend("account creation failed", e))?;
        if created {
            debug!(user_id, "Account created");
        }
        Ok(())
    }

    async fn get_balance(&self, user_id: &str) -> Result<Decimal> {
        let mut conn = self.connection.clone();
        let minor: Option<i64> = conn
            .get(self.balance_key(user_id))
            .await
            .map_err(|e| backend("balance read failed", e))?;

        minor
            .map(from_minor_units)
            .ok_or_else(|| LedgerError::AccountNotFound(user_id.to_string()).into())
    }
}

#[async_trait]
impl EventLog for RedisLedger {
    async fn record(&self, event: &UsageEvent) -> Result<()> {
        let json = serde_json::to_string(event)?;
        let mut conn = self.connection.clone();
        conn.rpush::<_, _, ()>(self.audit_key(), json)
            .await
            .map_err(|e| backend("audit append failed", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_minor_unit_conversion() {
        assert_eq!(to_minor_units(dec!(1)).unwrap(), 1_000_000);
        assert_eq!(to_minor_units(dec!(-0.25)).unwrap(), -250_000);
        assert_eq!(to_minor_units(dec!(0.0000004)).unwrap(), 0);
        assert_eq!(from_minor_units(-250_000), dec!(-0.25));
        assert_eq!(from_minor_units(to_minor_units(dec!(12.345678)).unwrap()), dec!(12.345678));
    }

    #[test]
    fn test_exact_minor_units_rejects_sub_micro_amounts() {
        assert_eq!(exact_minor_units(dec!(-1.234568)).unwrap(), -1_234_568);
        assert_eq!(exact_minor_units(dec!(0.000000)).unwrap(), 0);
        assert!(matches!(
            exact_minor_units(dec!(0.0000005)),
            Err(TallyError::Ledger(LedgerError::Backend(_)))
        ));
        assert!(exact_minor_units(dec!(-1.2345675)).is_err());
    }

    #[test]
    fn test_rounded_amounts_convert_exactly() {
        use crate::credit::CreditConverter;
        use tally_common::Scene;

        let converter = CreditConverter::default();
        for value in [dec!(0.0000005), dec!(-1.2345675), dec!(12.3456789)] {
            let event = UsageEvent::new("u-1", value, Scene::PortalCharge);
            let amount = converter.amount_for(&event);
            let minor = exact_minor_units(amount).unwrap();
            assert_eq!(from_minor_units(minor), amount);
        }
    }

    #[test]
    fn test_post_script_increments_before_writing() {
        let incr = POST_SCRIPT.find("INCRBY").unwrap();
        assert!(incr < POST_SCRIPT.find("'SET'").unwrap());
        assert!(incr < POST_SCRIPT.find("ZADD").unwrap());
    }

    #[test]
    fn test_minor_unit_overflow() {
        assert!(to_minor_units(Decimal::MAX).is_err());
    }
}
