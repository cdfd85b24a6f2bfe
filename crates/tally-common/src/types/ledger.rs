//! Ledger records - statements and account balances
//!
//! A statement is written exactly once per usage event. The event id is
//! the uniqueness key, and the statement is committed in the same
//! transaction as the balance delta it describes.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::event::{EventExtra, Scene, UsageEvent};

/// A posted billing record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerStatement {
    /// Originating event, unique across the ledger
    pub event_id: Uuid,
    pub user_id: String,
    /// Raw value as carried by the event
    pub value: Decimal,
    /// Monetary delta applied to the balance
    pub amount: Decimal,
    pub scene: Scene,
    pub operator_id: i64,
    pub customer_id: String,
    pub event_date: DateTime<Utc>,
    pub price: String,
    pub price_unit: String,
    /// Scene-derived consumption (units or duration)
    pub consumption: Decimal,
    /// Duration text as carried by the event
    #[serde(default)]
    pub duration: String,
    pub created_at: DateTime<Utc>,
}

impl LedgerStatement {
    /// Build the statement for an event whose monetary amount is known
    pub fn from_event(event: &UsageEvent, extra: &EventExtra, amount: Decimal) -> Self {
        Self {
            event_id: event.id,
            user_id: event.user_id.clone(),
            value: event.value,
            amount,
            scene: event.scene,
            operator_id: event.operator_id,
            customer_id: extra.customer_id.clone(),
            event_date: event.occurred_at,
            price: extra.unit_price.clone(),
            price_unit: extra.price_unit.clone(),
            consumption: event.scene.consumption(event.value, extra),
            duration: extra.duration.clone(),
            created_at: Utc::now(),
        }
    }
}

/// Per-user balance record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAccount {
    pub user_id: String,
    pub balance: Decimal,
}

impl UserAccount {
    /// Fresh account with zero balance
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            balance: Decimal::ZERO,
        }
    }

    /// Whether the balance has run out
    #[inline]
    pub fn is_exhausted(&self) -> bool {
        self.balance <= Decimal::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_statement_from_starship_event() {
        let event = UsageEvent::new("u-1", dec!(100), Scene::Starship).with_raw_units();
        let extra = EventExtra {
            customer_id: "c-9".to_string(),
            unit_price: "0.002".to_string(),
            price_unit: "token".to_string(),
            duration: String::new(),
        };

        let statement = LedgerStatement::from_event(&event, &extra, dec!(0.1));
        assert_eq!(statement.event_id, event.id);
        assert_eq!(statement.consumption, dec!(100));
        assert_eq!(statement.amount, dec!(0.1));
        assert_eq!(statement.customer_id, "c-9");
        assert_eq!(statement.price, "0.002");
        assert_eq!(statement.event_date, event.occurred_at);
    }

    #[test]
    fn test_statement_keeps_non_numeric_duration() {
        let event = UsageEvent::new("u-1", dec!(-2), Scene::ModelInference);
        let extra = EventExtra {
            duration: "1h".to_string(),
            ..Default::default()
        };

        let statement = LedgerStatement::from_event(&event, &extra, dec!(-2));
        assert_eq!(statement.consumption, Decimal::ZERO);
        assert_eq!(statement.duration, "1h");
        assert_eq!(statement.amount, dec!(-2));
    }

    #[test]
    fn test_new_account_is_exhausted() {
        let account = UserAccount::new("u-1");
        assert_eq!(account.balance, Decimal::ZERO);
        assert!(account.is_exhausted());
    }
}
