//! # Pricing Module
//!
//! Turns purchase/sale line items into line totals and a rounded grand total.
//!
//! ## Why Fixed-Point?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │  1500.005 has no exact binary representation, so an f64 sum can land  │
//! │  on either side of the .005 midpoint and round the wrong way.          │
//! │                                                                         │
//! │  With rust_decimal:                                                     │
//! │    3 × 1500.005 + 2 × 999.995 = 6500.005  → rounds to 6500.01           │
//! │                                                                         │
//! │  Across hundreds of line items the float error accumulates; decimal    │
//! │  arithmetic is exact for every price that can be typed in.             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Rounding
//! Line totals are kept exact. Only the grand total is rounded, to
//! [`MONEY_SCALE`] places, half away from zero.
//!
//! ## Usage
//! ```rust
//! use rust_decimal::Decimal;
//! use stockflow_core::pricing::{LineItem, PricingCalculator};
//!
//! let items = vec![
//!     LineItem::new("p-1", 3, Decimal::new(1500005, 3)),
//!     LineItem::new("p-2", 2, Decimal::new(999995, 3)),
//! ];
//! let priced = PricingCalculator::strict().price(&items).unwrap();
//! assert_eq!(priced.total, Decimal::new(650001, 2));
//! ```

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{CoreError, CoreResult};

/// Number of decimal places kept on stored totals.
pub const MONEY_SCALE: u32 = 2;

/// Rounds an amount to [`MONEY_SCALE`] places, half away from zero.
///
/// ```rust
/// use rust_decimal::Decimal;
/// use stockflow_core::pricing::round_money;
///
/// assert_eq!(round_money(Decimal::new(6500005, 3)), Decimal::new(650001, 2));
/// assert_eq!(round_money(Decimal::new(-25, 3)), Decimal::new(-3, 2));
/// ```
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

// =============================================================================
// Input / Output Types
// =============================================================================

/// One `(quantity, unit_price)` row to be priced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub product_id: String,
    pub quantity: i64,
    pub unit_price: Decimal,
}

impl LineItem {
    pub fn new(product_id: impl Into<String>, quantity: i64, unit_price: Decimal) -> Self {
        LineItem {
            product_id: product_id.into(),
            quantity,
            unit_price,
        }
    }
}

/// A line item that passed pricing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedLine {
    /// Position of the row in the caller's input.
    pub index: usize,
    pub product_id: String,
    pub quantity: i64,
    pub unit_price: Decimal,
    /// `quantity * unit_price`, exact.
    pub line_total: Decimal,
}

/// Result of pricing a list of line items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedTotal {
    pub lines: Vec<PricedLine>,
    /// Sum of line totals rounded to [`MONEY_SCALE`] places.
    pub total: Decimal,
    /// Input positions dropped under [`ZeroQuantityPolicy::SkipWithWarning`].
    pub skipped: Vec<usize>,
}

/// What to do with a zero-quantity row.
///
/// Negative quantities and negative prices are always rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZeroQuantityPolicy {
    /// Fail the whole request with `InvalidLineItem`.
    #[default]
    Reject,
    /// Log a warning and leave the row out.
    SkipWithWarning,
}

// =============================================================================
// Calculator
// =============================================================================

/// Pure line-item pricing.
///
/// ## User Workflow
/// ```text
/// CreatePurchase { items: [(3, 1500.005), (0, 10.00), (2, 999.995)] }
///      │
///      ▼
/// PricingCalculator::lenient().price() ← THIS TYPE
///      │
///      ├── row #1 skipped (zero quantity, warning logged)
///      │
///      ▼
/// lines = [4500.015, 1999.990]  total = 6500.01
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct PricingCalculator {
    zero_quantity: ZeroQuantityPolicy,
}

impl PricingCalculator {
    /// Creates a calculator with the given zero-quantity policy.
    pub const fn new(zero_quantity: ZeroQuantityPolicy) -> Self {
        PricingCalculator { zero_quantity }
    }

    /// Rejects zero-quantity rows (sales).
    pub const fn strict() -> Self {
        Self::new(ZeroQuantityPolicy::Reject)
    }

    /// Skips zero-quantity rows with a warning (purchases).
    pub const fn lenient() -> Self {
        Self::new(ZeroQuantityPolicy::SkipWithWarning)
    }

    /// Returns the configured zero-quantity policy.
    pub const fn zero_quantity_policy(&self) -> ZeroQuantityPolicy {
        self.zero_quantity
    }

    /// Prices the given rows.
    ///
    /// ## Errors
    /// * `InvalidLineItem` - negative quantity, negative price, zero quantity
    ///   under `Reject`, or an arithmetic overflow
    /// * `EmptyLineItems` - nothing left to price
    pub fn price(&self, items: &[LineItem]) -> CoreResult<PricedTotal> {
        let mut lines = Vec::with_capacity(items.len());
        let mut skipped = Vec::new();
        let mut sum = Decimal::ZERO;

        for (index, item) in items.iter().enumerate() {
            if item.quantity < 0 {
                return Err(CoreError::invalid_line(
                    index,
                    &item.product_id,
                    "quantity must be positive",
                ));
            }

            if item.quantity == 0 {
                match self.zero_quantity {
                    ZeroQuantityPolicy::Reject => {
                        return Err(CoreError::invalid_line(
                            index,
                            &item.product_id,
                            "quantity must be positive",
                        ));
                    }
                    ZeroQuantityPolicy::SkipWithWarning => {
                        warn!(
                            index,
                            product_id = %item.product_id,
                            "Skipping line item with zero quantity"
                        );
                        skipped.push(index);
                        continue;
                    }
                }
            }

            if item.unit_price < Decimal::ZERO {
                return Err(CoreError::invalid_line(
                    index,
                    &item.product_id,
                    "unit price must not be negative",
                ));
            }

            let line_total = Decimal::from(item.quantity)
                .checked_mul(item.unit_price)
                .ok_or_else(|| {
                    CoreError::invalid_line(index, &item.product_id, "line total overflows")
                })?;

            sum = sum.checked_add(line_total).ok_or_else(|| {
                CoreError::invalid_line(index, &item.product_id, "grand total overflows")
            })?;

            lines.push(PricedLine {
                index,
                product_id: item.product_id.clone(),
                quantity: item.quantity,
                unit_price: item.unit_price,
                line_total,
            });
        }

        if lines.is_empty() {
            return Err(CoreError::EmptyLineItems);
        }

        Ok(PricedTotal {
            lines,
            total: round_money(sum),
            skipped,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_half_away_from_zero_total() {
        let items = vec![
            LineItem::new("a", 3, dec!(1500.005)),
            LineItem::new("b", 2, dec!(999.995)),
        ];
        let priced = PricingCalculator::strict().price(&items).unwrap();

        assert_eq!(priced.lines[0].line_total, dec!(4500.015));
        assert_eq!(priced.lines[1].line_total, dec!(1999.990));
        assert_eq!(priced.total, dec!(6500.01));
        assert!(priced.skipped.is_empty());
    }

    #[test]
    fn test_many_small_lines_do_not_drift() {
        let items: Vec<LineItem> = (0..300)
            .map(|i| LineItem::new(format!("p-{i}"), 1, dec!(0.10)))
            .collect();
        let priced = PricingCalculator::strict().price(&items).unwrap();
        assert_eq!(priced.total, dec!(30.00));
    }

    #[test]
    fn test_zero_quantity_rejected_when_strict() {
        let items = vec![
            LineItem::new("a", 1, dec!(5)),
            LineItem::new("b", 0, dec!(5)),
        ];
        let err = PricingCalculator::strict().price(&items).unwrap_err();
        assert!(matches!(err, CoreError::InvalidLineItem { index: 1, .. }));
    }

    #[test]
    fn test_zero_quantity_skipped_when_lenient() {
        let items = vec![
            LineItem::new("a", 0, dec!(5)),
            LineItem::new("b", 2, dec!(2.50)),
        ];
        let priced = PricingCalculator::lenient().price(&items).unwrap();
        assert_eq!(priced.skipped, vec![0]);
        assert_eq!(priced.lines.len(), 1);
        assert_eq!(priced.lines[0].index, 1);
        assert_eq!(priced.total, dec!(5.00));
    }

    #[test]
    fn test_all_rows_skipped_is_empty() {
        let items = vec![LineItem::new("a", 0, dec!(5))];
        let err = PricingCalculator::lenient().price(&items).unwrap_err();
        assert!(matches!(err, CoreError::EmptyLineItems));

        let err = PricingCalculator::strict().price(&[]).unwrap_err();
        assert!(matches!(err, CoreError::EmptyLineItems));
    }

    #[test]
    fn test_negative_values_always_abort() {
        let negative_price = vec![LineItem::new("a", 1, dec!(-0.01))];
        assert!(PricingCalculator::lenient().price(&negative_price).is_err());

        let negative_qty = vec![LineItem::new("a", -2, dec!(1))];
        assert!(PricingCalculator::lenient().price(&negative_qty).is_err());
    }

    #[test]
    fn test_free_items_allowed() {
        let items = vec![LineItem::new("gift", 4, Decimal::ZERO)];
        let priced = PricingCalculator::strict().price(&items).unwrap();
        assert_eq!(priced.total, Decimal::ZERO);
    }

    #[test]
    fn test_round_money_negative_midpoint() {
        assert_eq!(round_money(dec!(-1.005)), dec!(-1.01));
        assert_eq!(round_money(dec!(2.004)), dec!(2.00));
    }
}
