//! # Stock Ledger
//!
//! The only code that changes `products.total_count` once a row exists.
//!
//! ## Guarded Updates
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Stock Update Strategy                                │
//! │                                                                         │
//! │  ❌ WRONG: read, compute, write back                                   │
//! │     SELECT total_count ...          → 5                                │
//! │     UPDATE products SET total_count = 2                                │
//! │     (a concurrent sale between the two statements is lost)             │
//! │                                                                         │
//! │  ✅ CORRECT: one conditional statement                                 │
//! │     UPDATE products SET total_count = total_count - 3                  │
//! │     WHERE id = ? AND total_count >= 3                                  │
//! │     RETURNING total_count                                              │
//! │                                                                         │
//! │  No row returned → either the product is missing or stock is short;    │
//! │  a follow-up read tells the two apart.                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Batches
//! `bulk_increase` / `bulk_decrease` merge duplicate product ids, then issue
//! one `CASE id WHEN ... THEN ...` statement inside a transaction (a
//! savepoint when the caller already holds one). If the statement touches
//! fewer rows than there are distinct products the batch is rolled back with
//! `PartialUpdate`.

use sqlx::{Connection, QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::error::{DbError, DbResult};
use stockflow_core::validation::{validate_quantity, validate_required};
use stockflow_core::{Scope, StockDelta, StockLevel};

// =============================================================================
// Connection-Level Functions
// =============================================================================

/// Reads the current count.
pub async fn get_count(conn: &mut SqliteConnection, scope: &Scope, product_id: &str) -> DbResult<i64> {
    let count: Option<i64> = sqlx::query_scalar(
        "SELECT total_count FROM products WHERE id = ?1 AND company_id = ?2 AND branch_id = ?3",
    )
    .bind(product_id)
    .bind(&scope.company_id)
    .bind(&scope.branch_id)
    .fetch_optional(&mut *conn)
    .await?;

    count.ok_or_else(|| DbError::not_found("Product", product_id))
}

/// `total_count = total_count + amount`; returns the new count.
pub async fn increase(
    conn: &mut SqliteConnection,
    scope: &Scope,
    product_id: &str,
    amount: i64,
) -> DbResult<i64> {
    validate_quantity(amount)?;
    debug!(product_id = %product_id, amount, scope = %scope, "Increasing stock");

    let count: Option<i64> = sqlx::query_scalar(
        r#"
        UPDATE products
        SET total_count = total_count + ?1
        WHERE id = ?2 AND company_id = ?3 AND branch_id = ?4
        RETURNING total_count
        "#,
    )
    .bind(amount)
    .bind(product_id)
    .bind(&scope.company_id)
    .bind(&scope.branch_id)
    .fetch_optional(&mut *conn)
    .await?;

    count.ok_or_else(|| DbError::not_found("Product", product_id))
}

/// `total_count = total_count - amount` only if `total_count >= amount`;
/// returns the new count.
///
/// ## Errors
/// * `InsufficientStock` - the guard rejected the update
/// * `NotFound` - no such product in the scope
pub async fn decrease(
    conn: &mut SqliteConnection,
    scope: &Scope,
    product_id: &str,
    amount: i64,
) -> DbResult<i64> {
    validate_quantity(amount)?;
    debug!(product_id = %product_id, amount, scope = %scope, "Decreasing stock");

    let count: Option<i64> = sqlx::query_scalar(
        r#"
        UPDATE products
        SET total_count = total_count - ?1
        WHERE id = ?2 AND company_id = ?3 AND branch_id = ?4 AND total_count >= ?1
        RETURNING total_count
        "#,
    )
    .bind(amount)
    .bind(product_id)
    .bind(&scope.company_id)
    .bind(&scope.branch_id)
    .fetch_optional(&mut *conn)
    .await?;

    match count {
        Some(count) => Ok(count),
        None => {
            let available = get_count(conn, scope, product_id).await?;
            warn!(
                product_id = %product_id,
                available,
                requested = amount,
                "Guarded decrement rejected"
            );
            Err(DbError::InsufficientStock {
                product_id: product_id.to_string(),
                available,
                requested: amount,
            })
        }
    }
}

/// `true` when the product has at least `amount` units. Read-only.
pub async fn check_available(
    conn: &mut SqliteConnection,
    scope: &Scope,
    product_id: &str,
    amount: i64,
) -> DbResult<bool> {
    validate_quantity(amount)?;
    let count = get_count(conn, scope, product_id).await?;
    Ok(count >= amount)
}

/// Sums quantities per product id. Ordered by id so statements are stable.
pub fn merge_deltas(items: &[StockDelta]) -> DbResult<BTreeMap<String, i64>> {
    let mut merged: BTreeMap<String, i64> = BTreeMap::new();
    for item in items {
        validate_required("product_id", &item.product_id)?;
        validate_quantity(item.quantity)?;
        let entry = merged.entry(item.product_id.clone()).or_insert(0);
        *entry = entry
            .checked_add(item.quantity)
            .ok_or_else(|| DbError::Internal(format!("quantity overflow for {}", item.product_id)))?;
    }
    Ok(merged)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Increase,
    Decrease,
}

/// Adds every delta in one statement; all or nothing.
pub async fn bulk_increase(
    conn: &mut SqliteConnection,
    scope: &Scope,
    items: &[StockDelta],
) -> DbResult<Vec<StockLevel>> {
    bulk_apply(conn, scope, items, Direction::Increase).await
}

/// Subtracts every delta in one guarded statement; all or nothing.
pub async fn bulk_decrease(
    conn: &mut SqliteConnection,
    scope: &Scope,
    items: &[StockDelta],
) -> DbResult<Vec<StockLevel>> {
    bulk_apply(conn, scope, items, Direction::Decrease).await
}

async fn bulk_apply(
    conn: &mut SqliteConnection,
    scope: &Scope,
    items: &[StockDelta],
    direction: Direction,
) -> DbResult<Vec<StockLevel>> {
    let merged = merge_deltas(items)?;
    if merged.is_empty() {
        return Ok(Vec::new());
    }

    let op = match direction {
        Direction::Increase => " + ",
        Direction::Decrease => " - ",
    };

    // UPDATE products
    // SET total_count = CASE id WHEN ? THEN total_count - ? ... END
    // WHERE company_id = ? AND branch_id = ? AND id IN (...)
    //   [AND total_count >= CASE id WHEN ? THEN ? ... END]
    // RETURNING id, total_count
    let mut qb: QueryBuilder<'_, Sqlite> =
        QueryBuilder::new("UPDATE products SET total_count = CASE id");
    for (product_id, quantity) in &merged {
        qb.push(" WHEN ")
            .push_bind(product_id.clone())
            .push(" THEN total_count")
            .push(op)
            .push_bind(*quantity);
    }
    qb.push(" END WHERE company_id = ")
        .push_bind(scope.company_id.clone())
        .push(" AND branch_id = ")
        .push_bind(scope.branch_id.clone())
        .push(" AND id IN (");
    {
        let mut ids = qb.separated(", ");
        for product_id in merged.keys() {
            ids.push_bind(product_id.clone());
        }
    }
    qb.push(")");
    if direction == Direction::Decrease {
        qb.push(" AND total_count >= CASE id");
        for (product_id, quantity) in &merged {
            qb.push(" WHEN ")
                .push_bind(product_id.clone())
                .push(" THEN ")
                .push_bind(*quantity);
        }
        qb.push(" END");
    }
    qb.push(" RETURNING id, total_count");

    debug!(
        scope = %scope,
        products = merged.len(),
        direction = ?direction,
        "Applying bulk stock update"
    );

    let mut tx = conn.begin().await?;

    let rows: Vec<(String, i64)> = qb.build_query_as().fetch_all(&mut *tx).await?;

    if rows.len() != merged.len() {
        warn!(
            expected = merged.len(),
            affected = rows.len(),
            "Bulk stock update incomplete, rolling back"
        );
        // Dropping `tx` rolls the statement back.
        return Err(DbError::PartialUpdate {
            expected: merged.len(),
            affected: rows.len(),
        });
    }

    tx.commit().await?;

    let mut levels: Vec<StockLevel> = rows
        .into_iter()
        .map(|(product_id, total_count)| StockLevel {
            product_id,
            total_count,
        })
        .collect();
    levels.sort_by(|a, b| a.product_id.cmp(&b.product_id));
    Ok(levels)
}

// =============================================================================
// Pool-Level Ledger
// =============================================================================

/// Pool-backed stock ledger. Each call runs in its own autocommit statement
/// (or its own transaction for batches).
///
/// ## Usage
/// ```rust,ignore
/// let ledger = db.stock();
/// let left = ledger.decrease(&scope, &product_id, 3).await?;
/// ```
#[derive(Debug, Clone)]
pub struct StockLedger {
    pool: SqlitePool,
}

impl StockLedger {
    /// Creates a new StockLedger.
    pub fn new(pool: SqlitePool) -> Self {
        StockLedger { pool }
    }

    pub async fn get_count(&self, scope: &Scope, product_id: &str) -> DbResult<i64> {
        let mut conn = self.pool.acquire().await?;
        get_count(&mut conn, scope, product_id).await
    }

    pub async fn increase(&self, scope: &Scope, product_id: &str, amount: i64) -> DbResult<i64> {
        let mut conn = self.pool.acquire().await?;
        increase(&mut conn, scope, product_id, amount).await
    }

    pub async fn decrease(&self, scope: &Scope, product_id: &str, amount: i64) -> DbResult<i64> {
        let mut conn = self.pool.acquire().await?;
        decrease(&mut conn, scope, product_id, amount).await
    }

    pub async fn check_available(
        &self,
        scope: &Scope,
        product_id: &str,
        amount: i64,
    ) -> DbResult<bool> {
        let mut conn = self.pool.acquire().await?;
        check_available(&mut conn, scope, product_id, amount).await
    }

    pub async fn bulk_increase(
        &self,
        scope: &Scope,
        items: &[StockDelta],
    ) -> DbResult<Vec<StockLevel>> {
        let mut conn = self.pool.acquire().await?;
        bulk_increase(&mut conn, scope, items).await
    }

    pub async fn bulk_decrease(
        &self,
        scope: &Scope,
        items: &[StockDelta],
    ) -> DbResult<Vec<StockLevel>> {
        let mut conn = self.pool.acquire().await?;
        bulk_decrease(&mut conn, scope, items).await
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::fixtures;
    use crate::{Database, DbConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_increase_and_decrease() {
        let db = fixtures::db().await;
        let scope = fixtures::scope();
        let p = fixtures::product(&db, &scope, "Sugar", 10).await;
        let ledger = db.stock();

        assert_eq!(ledger.increase(&scope, &p.id, 5).await.unwrap(), 15);
        assert_eq!(ledger.decrease(&scope, &p.id, 15).await.unwrap(), 0);
        assert_eq!(ledger.get_count(&scope, &p.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_decrease_beyond_stock_is_rejected() {
        let db = fixtures::db().await;
        let scope = fixtures::scope();
        let p = fixtures::product(&db, &scope, "Sugar", 6).await;

        let err = db.stock().decrease(&scope, &p.id, 7).await.unwrap_err();
        match err {
            DbError::InsufficientStock {
                available,
                requested,
                ..
            } => {
                assert_eq!(available, 6);
                assert_eq!(requested, 7);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(db.stock().get_count(&scope, &p.id).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_missing_product_is_not_found() {
        let db = fixtures::db().await;
        let scope = fixtures::scope();

        let err = db.stock().decrease(&scope, "nope", 1).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));

        let err = db.stock().increase(&scope, "nope", 1).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_other_branch_cannot_touch_stock() {
        let db = fixtures::db().await;
        let scope = fixtures::scope();
        let p = fixtures::product(&db, &scope, "Sugar", 6).await;

        let err = db
            .stock()
            .decrease(&scope.with_branch("north"), &p.id, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
        assert_eq!(db.stock().get_count(&scope, &p.id).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_non_positive_amount_rejected() {
        let db = fixtures::db().await;
        let scope = fixtures::scope();
        let p = fixtures::product(&db, &scope, "Sugar", 6).await;

        assert!(matches!(
            db.stock().increase(&scope, &p.id, 0).await,
            Err(DbError::Validation(_))
        ));
        assert!(matches!(
            db.stock().decrease(&scope, &p.id, -2).await,
            Err(DbError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_check_available() {
        let db = fixtures::db().await;
        let scope = fixtures::scope();
        let p = fixtures::product(&db, &scope, "Sugar", 3).await;

        assert!(db.stock().check_available(&scope, &p.id, 3).await.unwrap());
        assert!(!db.stock().check_available(&scope, &p.id, 4).await.unwrap());
    }

    #[tokio::test]
    async fn test_bulk_decrease_merges_duplicates() {
        let db = fixtures::db().await;
        let scope = fixtures::scope();
        let a = fixtures::product(&db, &scope, "A", 10).await;
        let b = fixtures::product(&db, &scope, "B", 5).await;

        let levels = db
            .stock()
            .bulk_decrease(
                &scope,
                &[
                    StockDelta::new(&a.id, 3),
                    StockDelta::new(&b.id, 5),
                    StockDelta::new(&a.id, 2),
                ],
            )
            .await
            .unwrap();

        assert_eq!(levels.len(), 2);
        assert_eq!(db.stock().get_count(&scope, &a.id).await.unwrap(), 5);
        assert_eq!(db.stock().get_count(&scope, &b.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_bulk_decrease_is_all_or_nothing() {
        let db = fixtures::db().await;
        let scope = fixtures::scope();
        let a = fixtures::product(&db, &scope, "A", 10).await;
        let b = fixtures::product(&db, &scope, "B", 1).await;

        let err = db
            .stock()
            .bulk_decrease(&scope, &[StockDelta::new(&a.id, 4), StockDelta::new(&b.id, 2)])
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DbError::PartialUpdate {
                expected: 2,
                affected: 1
            }
        ));
        assert_eq!(db.stock().get_count(&scope, &a.id).await.unwrap(), 10);
        assert_eq!(db.stock().get_count(&scope, &b.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_bulk_increase_unknown_product_rolls_back() {
        let db = fixtures::db().await;
        let scope = fixtures::scope();
        let a = fixtures::product(&db, &scope, "A", 1).await;

        let err = db
            .stock()
            .bulk_increase(&scope, &[StockDelta::new(&a.id, 4), StockDelta::new("ghost", 1)])
            .await
            .unwrap_err();

        assert!(matches!(err, DbError::PartialUpdate { .. }));
        assert_eq!(db.stock().get_count(&scope, &a.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_bulk_inside_outer_transaction_rolls_back_with_it() {
        let db = fixtures::db().await;
        let scope = fixtures::scope();
        let a = fixtures::product(&db, &scope, "A", 10).await;

        {
            let mut tx = db.begin().await.unwrap();
            bulk_increase(&mut *tx, &scope, &[StockDelta::new(&a.id, 5)])
                .await
                .unwrap();
            assert_eq!(get_count(&mut *tx, &scope, &a.id).await.unwrap(), 15);
            // dropped without commit
        }

        assert_eq!(db.stock().get_count(&scope, &a.id).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_concurrent_decrements_never_oversell() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(DbConfig::new(dir.path().join("ledger.db")).max_connections(8))
            .await
            .unwrap();
        let scope = fixtures::scope();
        let p = fixtures::product(&db, &scope, "Hot item", 10).await;

        let succeeded = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..20 {
            let ledger = db.stock();
            let scope = scope.clone();
            let id = p.id.clone();
            let succeeded = succeeded.clone();
            handles.push(tokio::spawn(async move {
                match ledger.decrease(&scope, &id, 1).await {
                    Ok(_) => {
                        succeeded.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(DbError::InsufficientStock { .. }) => {}
                    Err(other) => panic!("unexpected error: {other:?}"),
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(succeeded.load(Ordering::SeqCst), 10);
        assert_eq!(db.stock().get_count(&scope, &p.id).await.unwrap(), 0);
    }
}
