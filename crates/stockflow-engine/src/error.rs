//! # Engine Error Types
//!
//! What callers of the purchase, sale and transfer services match on.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Ledger Error Categories                           │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Before I/O     │  │  Stock guard    │  │  Store                  │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  Validation     │  │  Insufficient   │  │  Transaction            │ │
//! │  │  NotFound       │  │    Stock        │  │  (rolled back)          │ │
//! │  │                 │  │  PartialUpdate  │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌───────────────────────────────────────────────────────────────────┐ │
//! │  │  PostCommitSideEffect (fan_out write mode only)                    │ │
//! │  │  header committed, then cash flow or stock failed for some items  │ │
//! │  └───────────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::Serialize;
use std::fmt;
use stockflow_core::{CoreError, ValidationError};
use stockflow_db::DbError;
use thiserror::Error;

/// Result type alias for engine operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Which post-commit step failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum SideEffectStep {
    CashFlow,
    Stock { product_id: String, quantity: i64 },
    /// Removing the header after its effects were reversed.
    Header,
}

impl fmt::Display for SideEffectStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SideEffectStep::CashFlow => write!(f, "cash flow"),
            SideEffectStep::Stock {
                product_id,
                quantity,
            } => write!(f, "stock {product_id} x{quantity}"),
            SideEffectStep::Header => write!(f, "header delete"),
        }
    }
}

/// One failed side effect after the header committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SideEffectFailure {
    #[serde(flatten)]
    pub step: SideEffectStep,
    pub reason: String,
}

impl SideEffectFailure {
    pub fn new(step: SideEffectStep, reason: impl fmt::Display) -> Self {
        SideEffectFailure {
            step,
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for SideEffectFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.step, self.reason)
    }
}

/// Engine error type.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Rejected before any I/O: quantity, price, scope, line count.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A guarded decrement matched no row.
    #[error("Insufficient stock for product {product_id}: available {available}, requested {requested}")]
    InsufficientStock {
        product_id: String,
        available: i64,
        requested: i64,
    },

    /// A batch stock statement did not update every product.
    #[error("Partial stock update: expected {expected} rows, updated {affected}")]
    PartialUpdate { expected: usize, affected: usize },

    /// Header or product missing in the caller's scope.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Store failure inside a transactional step; nothing was kept.
    #[error("Transaction failed: {0}")]
    Transaction(String),

    /// The header is stored but some side effects are not.
    ///
    /// Only the `fan_out` write mode returns this.
    #[error("Header {header_id} committed but {} side effect(s) failed: {}", .failures.len(), join_failures(.failures))]
    PostCommitSideEffect {
        header_id: String,
        failures: Vec<SideEffectFailure>,
    },
}

fn join_failures(failures: &[SideEffectFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl LedgerError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        LedgerError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// True when the caller's state may be partially applied.
    pub fn is_post_commit(&self) -> bool {
        matches!(self, LedgerError::PostCommitSideEffect { .. })
    }
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<DbError> for LedgerError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::InsufficientStock {
                product_id,
                available,
                requested,
            } => LedgerError::InsufficientStock {
                product_id,
                available,
                requested,
            },
            DbError::PartialUpdate { expected, affected } => {
                LedgerError::PartialUpdate { expected, affected }
            }
            DbError::NotFound { entity, id } => LedgerError::NotFound { entity, id },
            DbError::Validation(e) => LedgerError::Validation(e.to_string()),
            other => LedgerError::Transaction(other.to_string()),
        }
    }
}

impl From<CoreError> for LedgerError {
    fn from(err: CoreError) -> Self {
        LedgerError::Validation(err.to_string())
    }
}

impl From<ValidationError> for LedgerError {
    fn from(err: ValidationError) -> Self {
        LedgerError::Validation(err.to_string())
    }
}

// =============================================================================
// Configuration Errors
// =============================================================================

/// Errors raised while loading [`EngineConfig`](crate::config::EngineConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_errors_keep_their_category() {
        let err: LedgerError = DbError::InsufficientStock {
            product_id: "p1".into(),
            available: 2,
            requested: 5,
        }
        .into();
        assert!(matches!(
            err,
            LedgerError::InsufficientStock {
                available: 2,
                requested: 5,
                ..
            }
        ));

        let err: LedgerError = DbError::not_found("Sale", "s1").into();
        assert!(matches!(err, LedgerError::NotFound { .. }));

        let err: LedgerError = DbError::ForeignKeyViolation {
            message: "FOREIGN KEY constraint failed".into(),
        }
        .into();
        assert!(matches!(err, LedgerError::Transaction(_)));
    }

    #[test]
    fn test_core_errors_are_validation() {
        let err: LedgerError = CoreError::EmptyLineItems.into();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[test]
    fn test_post_commit_message_lists_failures() {
        let err = LedgerError::PostCommitSideEffect {
            header_id: "h1".into(),
            failures: vec![
                SideEffectFailure::new(
                    SideEffectStep::Stock {
                        product_id: "p1".into(),
                        quantity: 3,
                    },
                    "Insufficient stock",
                ),
                SideEffectFailure::new(SideEffectStep::CashFlow, "locked"),
            ],
        };
        let text = err.to_string();
        assert!(text.contains("h1"));
        assert!(text.contains("2 side effect(s)"));
        assert!(text.contains("stock p1 x3: Insufficient stock"));
        assert!(text.contains("cash flow: locked"));
        assert!(err.is_post_commit());
    }
}
