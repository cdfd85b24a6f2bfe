//! Credit conversion
//!
//! Maps a metered value to the monetary amount applied to a balance.
//! Monetary events pass through unchanged; raw-unit events (token counts)
//! are truncated to whole units and charged at a fixed per-unit rate.

use rust_decimal::Decimal;
use tally_common::{UsageEvent, ValueKind};

/// Decimal places a ledger amount is kept to
pub const AMOUNT_SCALE: u32 = 6;

/// Default rate: 0.001 credits per raw unit
pub const DEFAULT_CREDIT_PER_UNIT: Decimal = Decimal::from_parts(1, 0, 0, false, 3);

/// Pure value-to-credit converter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CreditConverter {
    credit_per_unit: Decimal,
}

impl CreditConverter {
    pub fn new(credit_per_unit: Decimal) -> Self {
        Self { credit_per_unit }
    }

    pub fn credit_per_unit(&self) -> Decimal {
        self.credit_per_unit
    }

    /// Convert a raw value of the given kind
    pub fn convert(&self, value: Decimal, kind: ValueKind) -> Decimal {
        match kind {
            ValueKind::Monetary => value,
            ValueKind::RawUnit => value.trunc() * self.credit_per_unit,
        }
    }

    /// Amount an event moves the user's balance by, rounded to
    /// [`AMOUNT_SCALE`] places (half to even)
    #[inline]
    pub fn amount_for(&self, event: &UsageEvent) -> Decimal {
        self.convert(event.value, event.value_kind).round_dp(AMOUNT_SCALE)
    }
}

impl Default for CreditConverter {
    fn default() -> Self {
        Self::new(DEFAULT_CREDIT_PER_UNIT)
    }
}
