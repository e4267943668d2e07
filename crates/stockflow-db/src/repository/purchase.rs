//! # Purchase Repository
//!
//! Purchase headers and their items.
//!
//! Stock and cash flow are not touched here; the purchase service composes
//! these functions with the stock ledger and cash-flow repository, inside
//! one transaction or after commit depending on the write mode.

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::repository::{parse_decimal, push_date_range};
use stockflow_core::validation::{validate_description, validate_payment_method, validate_required};
use stockflow_core::{
    new_id, Listed, NewPurchase, PaymentMethod, PricedTotal, Purchase, PurchaseFilter,
    PurchaseItem, PurchasePatch, Scope,
};

const PURCHASE_COLUMNS: &str = "id, supplier_id, purchased_by, total_cost, payment_method, \
     description, company_id, branch_id, created_at";

// =============================================================================
// Row Mapping
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct PurchaseRow {
    id: String,
    supplier_id: String,
    purchased_by: String,
    total_cost: String,
    payment_method: String,
    description: Option<String>,
    company_id: String,
    branch_id: String,
    created_at: DateTime<Utc>,
}

impl PurchaseRow {
    fn into_purchase(self, items: Vec<PurchaseItem>) -> DbResult<Purchase> {
        Ok(Purchase {
            total_cost: parse_decimal("total_cost", &self.total_cost)?,
            id: self.id,
            supplier_id: self.supplier_id,
            purchased_by: self.purchased_by,
            payment_method: PaymentMethod::new(self.payment_method),
            description: self.description,
            company_id: self.company_id,
            branch_id: self.branch_id,
            created_at: self.created_at,
            items,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PurchaseItemRow {
    id: String,
    purchase_id: String,
    product_id: String,
    quantity: i64,
    purchase_price: String,
    total_price: String,
}

impl TryFrom<PurchaseItemRow> for PurchaseItem {
    type Error = DbError;

    fn try_from(row: PurchaseItemRow) -> DbResult<Self> {
        Ok(PurchaseItem {
            purchase_price: parse_decimal("purchase_price", &row.purchase_price)?,
            total_price: parse_decimal("total_price", &row.total_price)?,
            id: row.id,
            purchase_id: row.purchase_id,
            product_id: row.product_id,
            quantity: row.quantity,
        })
    }
}

// =============================================================================
// Connection-Level Functions
// =============================================================================

/// Inserts the header and one item per priced line.
///
/// `priced` must come from pricing `new.line_items()`; skipped rows are
/// not stored.
pub async fn insert_purchase(
    conn: &mut SqliteConnection,
    new: &NewPurchase,
    priced: &PricedTotal,
) -> DbResult<Purchase> {
    let id = new_id();
    debug!(
        id = %id,
        scope = %new.scope,
        total_cost = %priced.total,
        items = priced.lines.len(),
        "Inserting purchase"
    );

    let header: PurchaseRow = sqlx::query_as(&format!(
        r#"
        INSERT INTO purchases (
            id, supplier_id, purchased_by, total_cost, payment_method,
            description, company_id, branch_id, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        RETURNING {PURCHASE_COLUMNS}
        "#
    ))
    .bind(&id)
    .bind(&new.supplier_id)
    .bind(&new.purchased_by)
    .bind(priced.total.to_string())
    .bind(new.payment_method.as_str())
    .bind(&new.description)
    .bind(&new.scope.company_id)
    .bind(&new.scope.branch_id)
    .bind(Utc::now())
    .fetch_one(&mut *conn)
    .await?;

    let mut items = Vec::with_capacity(priced.lines.len());
    for line in &priced.lines {
        let row: PurchaseItemRow = sqlx::query_as(
            r#"
            INSERT INTO purchase_items (
                id, purchase_id, product_id, quantity, purchase_price,
                total_price, company_id, branch_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            RETURNING id, purchase_id, product_id, quantity, purchase_price, total_price
            "#,
        )
        .bind(new_id())
        .bind(&id)
        .bind(&line.product_id)
        .bind(line.quantity)
        .bind(line.unit_price.to_string())
        .bind(line.line_total.to_string())
        .bind(&new.scope.company_id)
        .bind(&new.scope.branch_id)
        .fetch_one(&mut *conn)
        .await?;
        items.push(PurchaseItem::try_from(row)?);
    }

    header.into_purchase(items)
}

async fn fetch_items(conn: &mut SqliteConnection, purchase_id: &str) -> DbResult<Vec<PurchaseItem>> {
    let rows: Vec<PurchaseItemRow> = sqlx::query_as(
        r#"
        SELECT id, purchase_id, product_id, quantity, purchase_price, total_price
        FROM purchase_items
        WHERE purchase_id = ?1
        ORDER BY rowid
        "#,
    )
    .bind(purchase_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter().map(PurchaseItem::try_from).collect()
}

/// Loads a purchase and its items inside the caller's scope.
pub async fn fetch_purchase(
    conn: &mut SqliteConnection,
    scope: &Scope,
    id: &str,
) -> DbResult<Option<Purchase>> {
    let header: Option<PurchaseRow> = sqlx::query_as(&format!(
        "SELECT {PURCHASE_COLUMNS} FROM purchases WHERE id = ?1 AND company_id = ?2 AND branch_id = ?3"
    ))
    .bind(id)
    .bind(&scope.company_id)
    .bind(&scope.branch_id)
    .fetch_optional(&mut *conn)
    .await?;

    match header {
        Some(header) => {
            let items = fetch_items(conn, &header.id).await?;
            Ok(Some(header.into_purchase(items)?))
        }
        None => Ok(None),
    }
}

/// Deletes the header and its items.
pub async fn delete_purchase(conn: &mut SqliteConnection, scope: &Scope, id: &str) -> DbResult<()> {
    debug!(id = %id, scope = %scope, "Deleting purchase");

    sqlx::query("DELETE FROM purchase_items WHERE purchase_id = ?1 AND company_id = ?2 AND branch_id = ?3")
        .bind(id)
        .bind(&scope.company_id)
        .bind(&scope.branch_id)
        .execute(&mut *conn)
        .await?;

    let result = sqlx::query("DELETE FROM purchases WHERE id = ?1 AND company_id = ?2 AND branch_id = ?3")
        .bind(id)
        .bind(&scope.company_id)
        .bind(&scope.branch_id)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::not_found("Purchase", id));
    }
    Ok(())
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for purchase database operations.
#[derive(Debug, Clone)]
pub struct PurchaseRepository {
    pool: SqlitePool,
}

impl PurchaseRepository {
    /// Creates a new PurchaseRepository.
    pub fn new(pool: SqlitePool) -> Self {
        PurchaseRepository { pool }
    }

    /// Gets a purchase with its items.
    pub async fn get(&self, scope: &Scope, id: &str) -> DbResult<Option<Purchase>> {
        let mut conn = self.pool.acquire().await?;
        fetch_purchase(&mut conn, scope, id).await
    }

    /// Lists purchases newest first, items included.
    pub async fn list(&self, filter: &PurchaseFilter) -> DbResult<Listed<Purchase>> {
        filter.validate()?;

        fn push_where(qb: &mut QueryBuilder<'_, Sqlite>, filter: &PurchaseFilter) {
            qb.push(" WHERE company_id = ")
                .push_bind(filter.scope.company_id.clone())
                .push(" AND branch_id = ")
                .push_bind(filter.scope.branch_id.clone());
            if let Some(supplier_id) = &filter.supplier_id {
                qb.push(" AND supplier_id = ").push_bind(supplier_id.clone());
            }
            if let Some(purchased_by) = &filter.purchased_by {
                qb.push(" AND purchased_by = ").push_bind(purchased_by.clone());
            }
            push_date_range(qb, "created_at", &filter.range);
        }

        let mut conn = self.pool.acquire().await?;

        let mut count_qb: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("SELECT COUNT(*) FROM purchases");
        push_where(&mut count_qb, filter);
        let total_count: i64 = count_qb.build_query_scalar().fetch_one(&mut *conn).await?;

        let mut qb: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new(format!("SELECT {PURCHASE_COLUMNS} FROM purchases"));
        push_where(&mut qb, filter);
        qb.push(" ORDER BY created_at DESC, id LIMIT ")
            .push_bind(filter.page.limit())
            .push(" OFFSET ")
            .push_bind(filter.page.offset());
        let headers: Vec<PurchaseRow> = qb.build_query_as().fetch_all(&mut *conn).await?;

        let mut items = Vec::with_capacity(headers.len());
        for header in headers {
            let lines = fetch_items(&mut conn, &header.id).await?;
            items.push(header.into_purchase(lines)?);
        }

        Ok(Listed { items, total_count })
    }

    /// Updates supplier, description and payment method.
    ///
    /// Quantities and prices are fixed once stored.
    pub async fn update(&self, scope: &Scope, id: &str, patch: &PurchasePatch) -> DbResult<Purchase> {
        if let Some(supplier_id) = &patch.supplier_id {
            validate_required("supplier_id", supplier_id)?;
        }
        if let Some(description) = &patch.description {
            validate_description(description)?;
        }
        if let Some(method) = &patch.payment_method {
            validate_payment_method(method)?;
        }

        debug!(id = %id, scope = %scope, "Updating purchase");

        let mut conn = self.pool.acquire().await?;
        let result = sqlx::query(
            r#"
            UPDATE purchases SET
                supplier_id = COALESCE(?1, supplier_id),
                description = COALESCE(?2, description),
                payment_method = COALESCE(?3, payment_method)
            WHERE id = ?4 AND company_id = ?5 AND branch_id = ?6
            "#,
        )
        .bind(&patch.supplier_id)
        .bind(&patch.description)
        .bind(patch.payment_method.as_ref().map(|m| m.as_str().to_string()))
        .bind(id)
        .bind(&scope.company_id)
        .bind(&scope.branch_id)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Purchase", id));
        }

        fetch_purchase(&mut conn, scope, id)
            .await?
            .ok_or_else(|| DbError::not_found("Purchase", id))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::fixtures;
    use crate::Database;
    use rust_decimal_macros::dec;
    use stockflow_core::{NewPurchaseItem, PricingCalculator};

    async fn store(db: &Database, scope: &Scope, product_id: &str, supplier: &str) -> Purchase {
        let new = NewPurchase {
            scope: scope.clone(),
            supplier_id: supplier.into(),
            purchased_by: "u1".into(),
            payment_method: PaymentMethod::new("cash"),
            description: Some("weekly restock".into()),
            items: vec![
                NewPurchaseItem {
                    product_id: product_id.into(),
                    quantity: 3,
                    purchase_price: dec!(1500.005),
                },
                NewPurchaseItem {
                    product_id: product_id.into(),
                    quantity: 0,
                    purchase_price: dec!(1),
                },
            ],
        };
        let priced = PricingCalculator::lenient().price(&new.line_items()).unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        insert_purchase(&mut conn, &new, &priced).await.unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_fetch() {
        let db = fixtures::db().await;
        let scope = fixtures::scope();
        let p = fixtures::product(&db, &scope, "Rice", 0).await;

        let stored = store(&db, &scope, &p.id, "s1").await;
        assert_eq!(stored.total_cost, dec!(4500.02));
        assert_eq!(stored.items.len(), 1);
        assert_eq!(stored.items[0].total_price, dec!(4500.015));

        let loaded = db.purchases().get(&scope, &stored.id).await.unwrap().unwrap();
        assert_eq!(loaded, stored);

        assert!(db
            .purchases()
            .get(&scope.with_branch("north"), &stored.id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_list_filters_by_supplier() {
        let db = fixtures::db().await;
        let scope = fixtures::scope();
        let p = fixtures::product(&db, &scope, "Rice", 0).await;
        store(&db, &scope, &p.id, "s1").await;
        store(&db, &scope, &p.id, "s2").await;
        store(&db, &scope, &p.id, "s2").await;

        let all = db.purchases().list(&PurchaseFilter::for_scope(scope.clone())).await.unwrap();
        assert_eq!(all.total_count, 3);

        let mut filter = PurchaseFilter::for_scope(scope);
        filter.supplier_id = Some("s2".into());
        let listed = db.purchases().list(&filter).await.unwrap();
        assert_eq!(listed.total_count, 2);
        assert!(listed.items.iter().all(|p| p.supplier_id == "s2" && p.items.len() == 1));
    }

    #[tokio::test]
    async fn test_update_only_touches_header_fields() {
        let db = fixtures::db().await;
        let scope = fixtures::scope();
        let p = fixtures::product(&db, &scope, "Rice", 0).await;
        let stored = store(&db, &scope, &p.id, "s1").await;

        let patch = PurchasePatch {
            supplier_id: Some("s9".into()),
            description: None,
            payment_method: Some(PaymentMethod::new("card")),
        };
        let updated = db.purchases().update(&scope, &stored.id, &patch).await.unwrap();

        assert_eq!(updated.supplier_id, "s9");
        assert_eq!(updated.payment_method.as_str(), "card");
        assert_eq!(updated.description.as_deref(), Some("weekly restock"));
        assert_eq!(updated.total_cost, stored.total_cost);
        assert_eq!(updated.items, stored.items);
    }

    #[tokio::test]
    async fn test_delete() {
        let db = fixtures::db().await;
        let scope = fixtures::scope();
        let p = fixtures::product(&db, &scope, "Rice", 0).await;
        let stored = store(&db, &scope, &p.id, "s1").await;

        let mut conn = db.pool().acquire().await.unwrap();
        delete_purchase(&mut conn, &scope, &stored.id).await.unwrap();
        assert!(fetch_purchase(&mut conn, &scope, &stored.id).await.unwrap().is_none());

        let err = delete_purchase(&mut conn, &scope, &stored.id).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }
}
