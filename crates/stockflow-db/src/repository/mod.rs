//! # Repository Module
//!
//! Database repository implementations for the ledger.
//!
//! ## Two Entry Points Per Operation
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Pool vs Connection Functions                         │
//! │                                                                         │
//! │  db.stock().decrease(&scope, id, 3)        ← pool-level, autocommit    │
//! │       │                                                                 │
//! │       │  acquires a connection, then calls                              │
//! │       ▼                                                                 │
//! │  stock::decrease(&mut conn, &scope, id, 3) ← connection-level          │
//! │                                                                         │
//! │  Inside a transaction the connection-level function is called with     │
//! │  `&mut *tx`, so the statement joins the enclosing transaction:         │
//! │                                                                         │
//! │  let mut tx = db.begin().await?;                                       │
//! │  stock::decrease(&mut *tx, &source, id, 4).await?;                     │
//! │  stock::increase(&mut *tx, &dest, landed, 4).await?;                   │
//! │  tx.commit().await?;                                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`StockLedger`](stock::StockLedger) - Guarded count updates
//! - [`ProductRepository`](product::ProductRepository) - Products and categories
//! - [`PurchaseRepository`](purchase::PurchaseRepository) - Purchase headers and items
//! - [`SaleRepository`](sale::SaleRepository) - Sale headers and items
//! - [`TransferRepository`](transfer::TransferRepository) - Transfer audit rows
//! - [`CashFlowRepository`](cash_flow::CashFlowRepository) - Append-only cash flow
//! - [`StatisticsRepository`](statistics::StatisticsRepository) - Stock value, totals and rankings

pub mod cash_flow;
pub mod product;
pub mod purchase;
pub mod sale;
pub mod statistics;
pub mod stock;
pub mod transfer;

use rust_decimal::Decimal;
use sqlx::{QueryBuilder, Sqlite};
use std::str::FromStr;

use crate::error::{DbError, DbResult};
use stockflow_core::DateRange;

/// Parses a money column stored as TEXT.
pub(crate) fn parse_decimal(column: &str, value: &str) -> DbResult<Decimal> {
    Decimal::from_str(value).map_err(|_| DbError::invalid_decimal(column, value))
}

/// Appends `AND <column> >= ? AND <column> <= ?` for the set bounds.
pub(crate) fn push_date_range(qb: &mut QueryBuilder<'_, Sqlite>, column: &str, range: &DateRange) {
    if let Some(start) = range.start {
        qb.push(format!(" AND {column} >= ")).push_bind(start);
    }
    if let Some(end) = range.end {
        qb.push(format!(" AND {column} <= ")).push_bind(end);
    }
}

// =============================================================================
// Test Fixtures
// =============================================================================

#[cfg(test)]
pub(crate) mod fixtures {
    use rust_decimal::Decimal;
    use stockflow_core::{NewProduct, Product, Scope};

    use crate::{Database, DbConfig};

    pub async fn db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    pub fn scope() -> Scope {
        Scope::new("acme", "main")
    }

    pub async fn product(db: &Database, scope: &Scope, name: &str, count: i64) -> Product {
        db.products()
            .insert(&NewProduct {
                scope: scope.clone(),
                category_id: None,
                name: name.to_string(),
                bill_format: Some("pcs".to_string()),
                image_url: None,
                incoming_price: Decimal::new(1000, 2),
                standard_price: Decimal::new(1500, 2),
                initial_count: count,
                created_by: Some("tester".to_string()),
            })
            .await
            .unwrap()
    }
}
