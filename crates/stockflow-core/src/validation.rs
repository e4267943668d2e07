//! # Validation Module
//!
//! Input validation for ledger requests.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: THIS MODULE (before any I/O)                                 │
//! │  ├── Required ids, description length                                  │
//! │  └── Positive quantities, non-negative prices                          │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Guarded statements (stockflow-db)                            │
//! │  └── WHERE total_count >= ? on every decrease                          │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── CHECK (total_count >= 0)                                          │
//! │  └── UNIQUE / FOREIGN KEY constraints                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use stockflow_core::validation::{validate_quantity, validate_required};
//!
//! validate_required("company_id", "acme").unwrap();
//! validate_quantity(5).unwrap();
//! assert!(validate_quantity(0).is_err());
//! ```

use rust_decimal::Decimal;

use crate::error::ValidationError;
use crate::types::PaymentMethod;
use crate::{MAX_DESCRIPTION_LEN, MAX_LINE_ITEMS};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// String Validators
// =============================================================================

/// Rejects empty or whitespace-only values.
pub fn validate_required(field: &str, value: &str) -> ValidationResult<()> {
    if value.trim().is_empty() {
        return Err(ValidationError::required(field));
    }
    Ok(())
}

/// Descriptions may be empty but are capped at [`MAX_DESCRIPTION_LEN`].
pub fn validate_description(description: &str) -> ValidationResult<()> {
    if description.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(ValidationError::TooLong {
            field: "description".to_string(),
            max: MAX_DESCRIPTION_LEN,
        });
    }
    Ok(())
}

pub fn validate_payment_method(method: &PaymentMethod) -> ValidationResult<()> {
    if method.is_blank() {
        return Err(ValidationError::required("payment_method"));
    }
    Ok(())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Stock movements move at least one unit.
///
/// ## Example
/// ```rust
/// use stockflow_core::validation::validate_quantity;
///
/// assert!(validate_quantity(1).is_ok());
/// assert!(validate_quantity(0).is_err());
/// assert!(validate_quantity(-3).is_err());
/// ```
pub fn validate_quantity(quantity: i64) -> ValidationResult<()> {
    if quantity <= 0 {
        return Err(ValidationError::must_be_positive("quantity"));
    }
    Ok(())
}

/// Cash-flow amounts are zero or more; direction carries the sign.
pub fn validate_amount(amount: Decimal) -> ValidationResult<()> {
    if amount < Decimal::ZERO {
        return Err(ValidationError::MustNotBeNegative {
            field: "amount".to_string(),
        });
    }
    Ok(())
}

/// A request carries between 1 and [`MAX_LINE_ITEMS`] rows.
pub fn validate_line_count(count: usize) -> ValidationResult<()> {
    if count == 0 {
        return Err(ValidationError::required("items"));
    }
    if count > MAX_LINE_ITEMS {
        return Err(ValidationError::TooMany {
            field: "items".to_string(),
            max: MAX_LINE_ITEMS,
        });
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_validate_required() {
        assert!(validate_required("branch_id", "b-1").is_ok());
        assert!(validate_required("branch_id", "").is_err());
        assert!(validate_required("branch_id", " \t").is_err());
    }

    #[test]
    fn test_validate_description() {
        assert!(validate_description("").is_ok());
        assert!(validate_description(&"x".repeat(MAX_DESCRIPTION_LEN)).is_ok());
        assert!(validate_description(&"x".repeat(MAX_DESCRIPTION_LEN + 1)).is_err());
    }

    #[test]
    fn test_validate_amount() {
        assert!(validate_amount(dec!(0)).is_ok());
        assert!(validate_amount(dec!(12.50)).is_ok());
        assert!(matches!(
            validate_amount(dec!(-0.01)),
            Err(ValidationError::MustNotBeNegative { .. })
        ));
    }

    #[test]
    fn test_validate_line_count() {
        assert!(validate_line_count(0).is_err());
        assert!(validate_line_count(1).is_ok());
        assert!(validate_line_count(MAX_LINE_ITEMS).is_ok());
        assert!(validate_line_count(MAX_LINE_ITEMS + 1).is_err());
    }

    #[test]
    fn test_validate_payment_method() {
        assert!(validate_payment_method(&PaymentMethod::new("cash")).is_ok());
        assert!(validate_payment_method(&PaymentMethod::new("")).is_err());
    }
}
