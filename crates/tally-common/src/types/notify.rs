//! Alerts sent back to event producers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::event::UsageEvent;

/// Why an alert was raised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum ReasonCode {
    Success,
    InvalidFormat,
    ChargeFail,
    /// Balance dropped to zero or below
    LackBalance,
    Duplicated,
    Other(i32),
}

impl From<i32> for ReasonCode {
    fn from(code: i32) -> Self {
        match code {
            0 => ReasonCode::Success,
            1 => ReasonCode::InvalidFormat,
            2 => ReasonCode::ChargeFail,
            3 => ReasonCode::LackBalance,
            4 => ReasonCode::Duplicated,
            other => ReasonCode::Other(other),
        }
    }
}

impl From<ReasonCode> for i32 {
    fn from(code: ReasonCode) -> Self {
        match code {
            ReasonCode::Success => 0,
            ReasonCode::InvalidFormat => 1,
            ReasonCode::ChargeFail => 2,
            ReasonCode::LackBalance => 3,
            ReasonCode::Duplicated => 4,
            ReasonCode::Other(other) => other,
        }
    }
}

/// Transient alert handed to the notification publisher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    #[serde(rename = "uuid")]
    pub event_id: Uuid,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub reason_code: ReasonCode,
    #[serde(rename = "reason_msg")]
    pub reason_message: String,
}

impl Alert {
    pub fn new(event: &UsageEvent, reason_code: ReasonCode, reason_message: impl Into<String>) -> Self {
        Self {
            event_id: event.id,
            user_id: event.user_id.clone(),
            created_at: Utc::now(),
            reason_code,
            reason_message: reason_message.into(),
        }
    }

    /// Alert for an account whose balance is exhausted
    pub fn lack_of_balance(event: &UsageEvent) -> Self {
        Self::new(event, ReasonCode::LackBalance, "insufficient funds")
    }
}
