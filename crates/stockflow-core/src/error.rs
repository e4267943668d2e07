//! # Error Types
//!
//! Domain-specific error types for stockflow-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  stockflow-core errors (this file)                                     │
//! │  ├── CoreError        - Pricing / line-item failures                   │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  stockflow-db errors (separate crate)                                  │
//! │  └── DbError          - Store failures, guarded-update rejections      │
//! │                                                                         │
//! │  stockflow-engine errors                                               │
//! │  └── LedgerError      - What callers of the services see               │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → LedgerError ← DbError             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A line item failed the pricing constraints.
    ///
    /// ## When This Occurs
    /// - quantity is zero (under `ZeroQuantityPolicy::Reject`) or negative
    /// - unit price is negative
    ///
    /// `index` is the position of the row in the caller's input list.
    #[error("Invalid line item #{index} (product {product_id}): {reason}")]
    InvalidLineItem {
        index: usize,
        product_id: String,
        reason: String,
    },

    /// No line item survived pricing.
    #[error("No priceable line items")]
    EmptyLineItems,

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Creates an InvalidLineItem error.
    pub fn invalid_line(
        index: usize,
        product_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        CoreError::InvalidLineItem {
            index,
            product_id: product_id.into(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised before any I/O happens.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    MustNotBeNegative { field: String },

    /// Invalid format (e.g., invalid UUID, invalid date range).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Two fields that must differ are equal.
    #[error("{field} must differ from {other}")]
    MustDiffer { field: String, other: String },

    /// A collection exceeds its allowed size.
    #[error("{field} must contain at most {max} entries")]
    TooMany { field: String, max: usize },
}

impl ValidationError {
    /// Creates a Required error for a field.
    pub fn required(field: impl Into<String>) -> Self {
        ValidationError::Required {
            field: field.into(),
        }
    }

    /// Creates a MustBePositive error for a field.
    pub fn must_be_positive(field: impl Into<String>) -> Self {
        ValidationError::MustBePositive {
            field: field.into(),
        }
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_line_message() {
        let err = CoreError::invalid_line(2, "p-1", "unit price is negative");
        assert_eq!(
            err.to_string(),
            "Invalid line item #2 (product p-1): unit price is negative"
        );
    }

    #[test]
    fn test_validation_error_messages() {
        assert_eq!(
            ValidationError::required("company_id").to_string(),
            "company_id is required"
        );
        assert_eq!(
            ValidationError::must_be_positive("quantity").to_string(),
            "quantity must be positive"
        );

        let err = ValidationError::MustDiffer {
            field: "to_branch_id".to_string(),
            other: "from_branch_id".to_string(),
        };
        assert_eq!(err.to_string(), "to_branch_id must differ from from_branch_id");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let core_err: CoreError = ValidationError::required("branch_id").into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
