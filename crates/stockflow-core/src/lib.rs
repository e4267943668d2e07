//! # stockflow-core: Pure Domain Logic for the Stock Ledger
//!
//! Types, pricing and validation shared by the database layer and the
//! purchase / sale / transfer services. Nothing in here touches I/O.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Stockflow Architecture                           │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 stockflow-engine (services)                     │   │
//! │  │   PurchaseService  SaleService  TransferEngine  CashFlow        │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ stockflow-core (THIS CRATE) ★                   │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │  pricing  │  │   query   │  │ validation│  │   │
//! │  │   │  Product  │  │ LineItem  │  │  filters  │  │   rules   │  │   │
//! │  │   │  Transfer │  │ Decimal   │  │  paging   │  │  checks   │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 stockflow-db (Database Layer)                   │   │
//! │  │        Guarded stock updates, transfers, cash flow              │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Product, Purchase, Sale, Transfer, CashFlowEntry)
//! - [`pricing`] - Fixed-point line-item pricing
//! - [`query`] - List filters, pagination and statistic shapes
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation
//!
//! ## Example Usage
//!
//! ```rust
//! use rust_decimal::Decimal;
//! use stockflow_core::pricing::{LineItem, PricingCalculator};
//!
//! let priced = PricingCalculator::strict()
//!     .price(&[LineItem::new("p-1", 2, Decimal::new(1999, 2))])
//!     .unwrap();
//! assert_eq!(priced.total, Decimal::new(3998, 2));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod pricing;
pub mod query;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use pricing::{LineItem, PricedTotal, PricingCalculator, ZeroQuantityPolicy};
pub use query::*;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Category created at a destination branch to hold transferred products
/// that do not exist there yet.
pub const DEFAULT_TRANSFER_CATEGORY: &str = "Inter-branch transfer";

/// Maximum line items in one purchase, sale or transfer.
pub const MAX_LINE_ITEMS: usize = 1000;

/// Maximum length of a free-text description.
pub const MAX_DESCRIPTION_LEN: usize = 500;

/// Generates a new entity id.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
