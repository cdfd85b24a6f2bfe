//! Usage events - the inbound pay-per-use records
//!
//! Events are produced by metering agents elsewhere in the platform and are
//! immutable once emitted. The wire format is JSON:
//!
//! ```text
//! {"uuid", "user_id", "value", "value_type", "scene", "op_uid", "created_at", "extra"}
//! ```
//!
//! `extra` is itself a JSON-encoded string carrying customer and pricing
//! details, decoded on demand into [`EventExtra`].

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, TallyError};

/// How the event's `value` should be interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "i64", into = "i32")]
pub enum ValueKind {
    /// Value is already a monetary amount
    Monetary,
    /// Value is a raw unit count (e.g. tokens) to be converted
    RawUnit,
}

impl From<i64> for ValueKind {
    fn from(raw: i64) -> Self {
        match raw {
            1 => ValueKind::RawUnit,
            _ => ValueKind::Monetary,
        }
    }
}

impl From<ValueKind> for i32 {
    fn from(kind: ValueKind) -> Self {
        match kind {
            ValueKind::Monetary => 0,
            ValueKind::RawUnit => 1,
        }
    }
}

/// Billing scene an event was produced by
///
/// Carried on the wire as an integer ordinal. Ordinals this build does not
/// know about, including ones outside the 32-bit range, decode to
/// [`Scene::Unknown`] rather than failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "i32")]
pub enum Scene {
    /// System reserve
    Reserve,
    /// Portal recharge
    PortalCharge,
    /// Model inference endpoint (billed by duration)
    ModelInference,
    /// Hosted space (billed by duration)
    Space,
    /// Model finetune job (billed by duration)
    ModelFinetune,
    /// Starship (billed by token count)
    Starship,
    Unknown,
}

impl Scene {
    /// Total mapping from a wire ordinal
    pub fn from_ordinal(ordinal: i64) -> Self {
        match ordinal {
            0 => Scene::Reserve,
            1 => Scene::PortalCharge,
            10 => Scene::ModelInference,
            11 => Scene::Space,
            12 => Scene::ModelFinetune,
            20 => Scene::Starship,
            _ => Scene::Unknown,
        }
    }

    pub fn ordinal(&self) -> i32 {
        match self {
            Scene::Reserve => 0,
            Scene::PortalCharge => 1,
            Scene::ModelInference => 10,
            Scene::Space => 11,
            Scene::ModelFinetune => 12,
            Scene::Starship => 20,
            Scene::Unknown => 99,
        }
    }

    /// Whether consumption for this scene is measured as a duration
    pub fn is_duration_billed(&self) -> bool {
        matches!(
            self,
            Scene::ModelInference | Scene::Space | Scene::ModelFinetune
        )
    }

    /// Derive the consumption recorded on a ledger statement
    ///
    /// Starship records its raw unit count, duration-billed scenes record
    /// the duration carried in the extra payload, everything else records 0.
    /// A duration that is not a number records 0; the statement keeps the
    /// duration text as carried.
    pub fn consumption(&self, value: Decimal, extra: &EventExtra) -> Decimal {
        match self {
            Scene::Starship => value,
            s if s.is_duration_billed() => extra.duration_units().unwrap_or(Decimal::ZERO),
            _ => Decimal::ZERO,
        }
    }
}

impl From<i64> for Scene {
    fn from(ordinal: i64) -> Self {
        Scene::from_ordinal(ordinal)
    }
}

impl From<Scene> for i32 {
    fn from(scene: Scene) -> Self {
        scene.ordinal()
    }
}

/// A single metered usage event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEvent {
    /// Unique event ID, the idempotency key for ledger posting
    #[serde(rename = "uuid")]
    pub id: Uuid,
    pub user_id: String,
    /// Metered value, monetary or raw units depending on `value_kind`
    #[serde(with = "rust_decimal::serde::float")]
    pub value: Decimal,
    #[serde(rename = "value_type", default = "default_value_kind")]
    pub value_kind: ValueKind,
    #[serde(default = "default_scene")]
    pub scene: Scene,
    /// Operator that produced the event
    #[serde(rename = "op_uid", default)]
    pub operator_id: i64,
    #[serde(rename = "created_at")]
    pub occurred_at: DateTime<Utc>,
    /// JSON-encoded [`EventExtra`]
    #[serde(default)]
    pub extra: String,
}

fn default_value_kind() -> ValueKind {
    ValueKind::Monetary
}

fn default_scene() -> Scene {
    Scene::Reserve
}

impl UsageEvent {
    /// Create a monetary event for the given user
    pub fn new(user_id: impl Into<String>, value: Decimal, scene: Scene) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            value,
            value_kind: ValueKind::Monetary,
            scene,
            operator_id: 0,
            occurred_at: Utc::now(),
            extra: String::new(),
        }
    }

    /// Mark the value as a raw unit count
    pub fn with_raw_units(mut self) -> Self {
        self.value_kind = ValueKind::RawUnit;
        self
    }

    /// Attach an extra payload
    pub fn with_extra(mut self, extra: &EventExtra) -> Result<Self> {
        self.extra = serde_json::to_string(extra)?;
        Ok(self)
    }

    /// Decode an event from raw message bytes
    pub fn from_slice(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).map_err(|e| {
            TallyError::Payload(format!(
                "undecodable usage event {:?}: {}",
                String::from_utf8_lossy(payload),
                e
            ))
        })
    }

    /// Decode the extra payload; an empty string yields the default extra
    pub fn decode_extra(&self) -> Result<EventExtra> {
        if self.extra.trim().is_empty() {
            return Ok(EventExtra::default());
        }
        serde_json::from_str(&self.extra).map_err(|e| {
            TallyError::Payload(format!("undecodable extra for event {}: {}", self.id, e))
        })
    }
}

/// Customer and pricing details carried inside [`UsageEvent::extra`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventExtra {
    #[serde(default)]
    pub customer_id: String,
    #[serde(rename = "customer_price", default)]
    pub unit_price: String,
    #[serde(default)]
    pub price_unit: String,
    #[serde(rename = "customer_duration", default)]
    pub duration: String,
}

impl EventExtra {
    /// Duration carried by the event: 0 when absent, `None` when not numeric
    pub fn duration_units(&self) -> Option<Decimal> {
        let raw = self.duration.trim();
        if raw.is_empty() {
            return Some(Decimal::ZERO);
        }
        Decimal::from_str(raw).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_decode_wire_event() {
        let payload = br#"{
            "uuid": "6f1c3a52-1f0e-4c4e-9d43-8f7b1b2f2c11",
            "user_id": "u-42",
            "value": -12.5,
            "value_type": 0,
            "scene": 10,
            "op_uid": 7,
            "created_at": "2024-03-01T10:00:00Z",
            "extra": "{\"customer_id\":\"c-1\",\"customer_duration\":\"3600\"}"
        }"#;

        let event = UsageEvent::from_slice(payload).unwrap();
        assert_eq!(event.user_id, "u-42");
        assert_eq!(event.value, dec!(-12.5));
        assert_eq!(event.value_kind, ValueKind::Monetary);
        assert_eq!(event.scene, Scene::ModelInference);
        assert_eq!(event.operator_id, 7);

        let extra = event.decode_extra().unwrap();
        assert_eq!(extra.customer_id, "c-1");
        assert_eq!(extra.duration_units(), Some(dec!(3600)));
    }

    #[test]
    fn test_malformed_payload_is_payload_error() {
        let err = UsageEvent::from_slice(b"{not json").unwrap_err();
        assert!(matches!(err, TallyError::Payload(_)));
    }

    #[test]
    fn test_unknown_scene_ordinal() {
        assert_eq!(Scene::from_ordinal(42), Scene::Unknown);
        assert_eq!(Scene::from_ordinal(-1), Scene::Unknown);
        assert_eq!(Scene::from_ordinal(99), Scene::Unknown);

        let scene: Scene = serde_json::from_str("57").unwrap();
        assert_eq!(scene, Scene::Unknown);
        assert_eq!(scene.consumption(dec!(5), &EventExtra::default()), Decimal::ZERO);
    }

    #[test]
    fn test_out_of_range_ordinals_decode() {
        let payload = br#"{
            "uuid": "6f1c3a52-1f0e-4c4e-9d43-8f7b1b2f2c11",
            "user_id": "u-42",
            "value": 1.0,
            "value_type": -9223372036854775808,
            "scene": 4294967296,
            "created_at": "2024-03-01T10:00:00Z"
        }"#;

        let event = UsageEvent::from_slice(payload).unwrap();
        assert_eq!(event.scene, Scene::Unknown);
        assert_eq!(event.value_kind, ValueKind::Monetary);
    }

    #[test]
    fn test_missing_scene_is_reserve() {
        let payload = br#"{
            "uuid": "6f1c3a52-1f0e-4c4e-9d43-8f7b1b2f2c11",
            "user_id": "u-42",
            "value": 1.0,
            "created_at": "2024-03-01T10:00:00Z"
        }"#;

        let event = UsageEvent::from_slice(payload).unwrap();
        assert_eq!(event.scene, Scene::Reserve);
        assert_eq!(serde_json::to_value(event.scene).unwrap(), serde_json::json!(0));
    }

    #[test]
    fn test_scene_consumption() {
        let extra = EventExtra {
            duration: "3600".to_string(),
            ..Default::default()
        };

        assert_eq!(Scene::Starship.consumption(dec!(100), &extra), dec!(100));
        assert_eq!(Scene::ModelInference.consumption(dec!(1), &extra), dec!(3600));
        assert_eq!(Scene::Space.consumption(dec!(1), &extra), dec!(3600));
        assert_eq!(Scene::ModelFinetune.consumption(dec!(1), &extra), dec!(3600));
        assert_eq!(Scene::Reserve.consumption(dec!(1), &extra), Decimal::ZERO);
        assert_eq!(Scene::PortalCharge.consumption(dec!(1), &extra), Decimal::ZERO);
    }

    #[test]
    fn test_non_numeric_duration_consumes_zero() {
        let extra = EventExtra {
            duration: "1h".to_string(),
            ..Default::default()
        };
        assert_eq!(extra.duration_units(), None);
        assert_eq!(Scene::Space.consumption(dec!(1), &extra), Decimal::ZERO);
        assert_eq!(Scene::ModelFinetune.consumption(dec!(1), &extra), Decimal::ZERO);
    }

    #[test]
    fn test_value_kind_mapping() {
        assert_eq!(ValueKind::from(1), ValueKind::RawUnit);
        assert_eq!(ValueKind::from(0), ValueKind::Monetary);
        assert_eq!(ValueKind::from(7), ValueKind::Monetary);
    }

    #[test]
    fn test_empty_extra_defaults() {
        let event = UsageEvent::new("u-1", dec!(1), Scene::Reserve);
        assert_eq!(event.decode_extra().unwrap(), EventExtra::default());
    }
}
