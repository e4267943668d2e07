//! # Sale Repository
//!
//! Sale headers and their items.
//!
//! ## Sale Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sale Lifecycle                                    │
//! │                                                                         │
//! │  1. CREATE                                                             │
//! │     └── insert_sale() → header + items (priced, strict)                │
//! │     └── stock decreased, income recorded (engine)                      │
//! │                                                                         │
//! │  2. (OPTIONAL) UPDATE                                                  │
//! │     └── update() → client / payment method only                        │
//! │                                                                         │
//! │  3. (OPTIONAL) DELETE                                                  │
//! │     └── expense recorded, stock restored (engine)                      │
//! │     └── delete_sale() → header + items removed                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::repository::{parse_decimal, push_date_range};
use stockflow_core::validation::{validate_payment_method, validate_required};
use stockflow_core::{
    new_id, Listed, NewSale, PaymentMethod, PricedTotal, Sale, SaleFilter, SaleItem, SalePatch,
    Scope,
};

const SALE_COLUMNS: &str =
    "id, client_id, sold_by, total_sale_price, payment_method, company_id, branch_id, created_at";

#[derive(Debug, sqlx::FromRow)]
struct SaleRow {
    id: String,
    client_id: String,
    sold_by: String,
    total_sale_price: String,
    payment_method: String,
    company_id: String,
    branch_id: String,
    created_at: DateTime<Utc>,
}

impl SaleRow {
    fn into_sale(self, items: Vec<SaleItem>) -> DbResult<Sale> {
        Ok(Sale {
            total_sale_price: parse_decimal("total_sale_price", &self.total_sale_price)?,
            id: self.id,
            client_id: self.client_id,
            sold_by: self.sold_by,
            payment_method: PaymentMethod::new(self.payment_method),
            company_id: self.company_id,
            branch_id: self.branch_id,
            created_at: self.created_at,
            items,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SaleItemRow {
    id: String,
    sale_id: String,
    product_id: String,
    quantity: i64,
    sale_price: String,
    total_price: String,
}

impl TryFrom<SaleItemRow> for SaleItem {
    type Error = DbError;

    fn try_from(row: SaleItemRow) -> DbResult<Self> {
        Ok(SaleItem {
            sale_price: parse_decimal("sale_price", &row.sale_price)?,
            total_price: parse_decimal("total_price", &row.total_price)?,
            id: row.id,
            sale_id: row.sale_id,
            product_id: row.product_id,
            quantity: row.quantity,
        })
    }
}

// =============================================================================
// Connection-Level Functions
// =============================================================================

/// Inserts the header and one item per priced line.
pub async fn insert_sale(
    conn: &mut SqliteConnection,
    new: &NewSale,
    priced: &PricedTotal,
) -> DbResult<Sale> {
    let id = new_id();
    debug!(
        id = %id,
        scope = %new.scope,
        total_sale_price = %priced.total,
        items = priced.lines.len(),
        "Inserting sale"
    );

    let header: SaleRow = sqlx::query_as(&format!(
        r#"
        INSERT INTO sales (
            id, client_id, sold_by, total_sale_price, payment_method,
            company_id, branch_id, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        RETURNING {SALE_COLUMNS}
        "#
    ))
    .bind(&id)
    .bind(&new.client_id)
    .bind(&new.sold_by)
    .bind(priced.total.to_string())
    .bind(new.payment_method.as_str())
    .bind(&new.scope.company_id)
    .bind(&new.scope.branch_id)
    .bind(Utc::now())
    .fetch_one(&mut *conn)
    .await?;

    let mut items = Vec::with_capacity(priced.lines.len());
    for line in &priced.lines {
        let row: SaleItemRow = sqlx::query_as(
            r#"
            INSERT INTO sales_items (
                id, sale_id, product_id, quantity, sale_price,
                total_price, company_id, branch_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            RETURNING id, sale_id, product_id, quantity, sale_price, total_price
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
        items.push(SaleItem::try_from(row)?);
    }

    header.into_sale(items)
}

async fn fetch_items(conn: &mut SqliteConnection, sale_id: &str) -> DbResult<Vec<SaleItem>> {
    let rows: Vec<SaleItemRow> = sqlx::query_as(
        r#"
        SELECT id, sale_id, product_id, quantity, sale_price, total_price
        FROM sales_items
        WHERE sale_id = ?1
        ORDER BY rowid
        "#,
    )
    .bind(sale_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter().map(SaleItem::try_from).collect()
}

/// Loads a sale and its items inside the caller's scope.
pub async fn fetch_sale(
    conn: &mut SqliteConnection,
    scope: &Scope,
    id: &str,
) -> DbResult<Option<Sale>> {
    let header: Option<SaleRow> = sqlx::query_as(&format!(
        "SELECT {SALE_COLUMNS} FROM sales WHERE id = ?1 AND company_id = ?2 AND branch_id = ?3"
    ))
    .bind(id)
    .bind(&scope.company_id)
    .bind(&scope.branch_id)
    .fetch_optional(&mut *conn)
    .await?;

    match header {
        Some(header) => {
            let items = fetch_items(conn, &header.id).await?;
            Ok(Some(header.into_sale(items)?))
        }
        None => Ok(None),
    }
}

/// Deletes the header and its items.
pub async fn delete_sale(conn: &mut SqliteConnection, scope: &Scope, id: &str) -> DbResult<()> {
    debug!(id = %id, scope = %scope, "Deleting sale");

    sqlx::query("DELETE FROM sales_items WHERE sale_id = ?1 AND company_id = ?2 AND branch_id = ?3")
        .bind(id)
        .bind(&scope.company_id)
        .bind(&scope.branch_id)
        .execute(&mut *conn)
        .await?;

    let result = sqlx::query("DELETE FROM sales WHERE id = ?1 AND company_id = ?2 AND branch_id = ?3")
        .bind(id)
        .bind(&scope.company_id)
        .bind(&scope.branch_id)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::not_found("Sale", id));
    }
    Ok(())
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for sale database operations.
#[derive(Debug, Clone)]
pub struct SaleRepository {
    pool: SqlitePool,
}

impl SaleRepository {
    /// Creates a new SaleRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SaleRepository { pool }
    }

    /// Gets a sale with its items.
    pub async fn get(&self, scope: &Scope, id: &str) -> DbResult<Option<Sale>> {
        let mut conn = self.pool.acquire().await?;
        fetch_sale(&mut conn, scope, id).await
    }

    /// Lists sales newest first, items included.
    pub async fn list(&self, filter: &SaleFilter) -> DbResult<Listed<Sale>> {
        filter.validate()?;

        fn push_where(qb: &mut QueryBuilder<'_, Sqlite>, filter: &SaleFilter) {
            qb.push(" WHERE company_id = ")
                .push_bind(filter.scope.company_id.clone())
                .push(" AND branch_id = ")
                .push_bind(filter.scope.branch_id.clone());
            if let Some(client_id) = &filter.client_id {
                qb.push(" AND client_id = ").push_bind(client_id.clone());
            }
            if let Some(sold_by) = &filter.sold_by {
                qb.push(" AND sold_by = ").push_bind(sold_by.clone());
            }
            push_date_range(qb, "created_at", &filter.range);
        }

        let mut conn = self.pool.acquire().await?;

        let mut count_qb: QueryBuilder<'_, Sqlite> = QueryBuilder::new("SELECT COUNT(*) FROM sales");
        push_where(&mut count_qb, filter);
        let total_count: i64 = count_qb.build_query_scalar().fetch_one(&mut *conn).await?;

        let mut qb: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new(format!("SELECT {SALE_COLUMNS} FROM sales"));
        push_where(&mut qb, filter);
        qb.push(" ORDER BY created_at DESC, id LIMIT ")
            .push_bind(filter.page.limit())
            .push(" OFFSET ")
            .push_bind(filter.page.offset());
        let headers: Vec<SaleRow> = qb.build_query_as().fetch_all(&mut *conn).await?;

        let mut items = Vec::with_capacity(headers.len());
        for header in headers {
            let lines = fetch_items(&mut conn, &header.id).await?;
            items.push(header.into_sale(lines)?);
        }

        Ok(Listed { items, total_count })
    }

    /// Updates client and payment method.
    pub async fn update(&self, scope: &Scope, id: &str, patch: &SalePatch) -> DbResult<Sale> {
        if let Some(client_id) = &patch.client_id {
            validate_required("client_id", client_id)?;
        }
        if let Some(method) = &patch.payment_method {
            validate_payment_method(method)?;
        }

        debug!(id = %id, scope = %scope, "Updating sale");

        let mut conn = self.pool.acquire().await?;
        let result = sqlx::query(
            r#"
            UPDATE sales SET
                client_id = COALESCE(?1, client_id),
                payment_method = COALESCE(?2, payment_method)
            WHERE id = ?3 AND company_id = ?4 AND branch_id = ?5
            "#,
        )
        .bind(&patch.client_id)
        .bind(patch.payment_method.as_ref().map(|m| m.as_str().to_string()))
        .bind(id)
        .bind(&scope.company_id)
        .bind(&scope.branch_id)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Sale", id));
        }

        fetch_sale(&mut conn, scope, id)
            .await?
            .ok_or_else(|| DbError::not_found("Sale", id))
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
    use stockflow_core::{NewSaleItem, PricingCalculator};

    async fn store(db: &Database, scope: &Scope, product_id: &str, client: &str) -> Sale {
        let new = NewSale {
            scope: scope.clone(),
            client_id: client.into(),
            sold_by: "cashier".into(),
            payment_method: PaymentMethod::new("cash"),
            items: vec![NewSaleItem {
                product_id: product_id.into(),
                quantity: 2,
                sale_price: dec!(999.995),
            }],
        };
        let priced = PricingCalculator::strict().price(&new.line_items()).unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        insert_sale(&mut conn, &new, &priced).await.unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_fetch() {
        let db = fixtures::db().await;
        let scope = fixtures::scope();
        let p = fixtures::product(&db, &scope, "Tea", 10).await;

        let stored = store(&db, &scope, &p.id, "c1").await;
        assert_eq!(stored.total_sale_price, dec!(1999.99));
        assert_eq!(stored.items[0].quantity, 2);

        let loaded = db.sales().get(&scope, &stored.id).await.unwrap().unwrap();
        assert_eq!(loaded, stored);
    }

    #[tokio::test]
    async fn test_unknown_product_is_rejected() {
        let db = fixtures::db().await;
        let scope = fixtures::scope();

        let new = NewSale {
            scope: scope.clone(),
            client_id: "c1".into(),
            sold_by: "cashier".into(),
            payment_method: PaymentMethod::new("cash"),
            items: vec![NewSaleItem {
                product_id: "ghost".into(),
                quantity: 1,
                sale_price: dec!(1),
            }],
        };
        let priced = PricingCalculator::strict().price(&new.line_items()).unwrap();
        let mut tx = db.begin().await.unwrap();
        let err = insert_sale(&mut *tx, &new, &priced).await.unwrap_err();
        assert!(matches!(err, DbError::ForeignKeyViolation { .. }));
    }

    #[tokio::test]
    async fn test_list_and_update() {
        let db = fixtures::db().await;
        let scope = fixtures::scope();
        let p = fixtures::product(&db, &scope, "Tea", 10).await;
        let first = store(&db, &scope, &p.id, "c1").await;
        store(&db, &scope, &p.id, "c2").await;

        let mut filter = SaleFilter::for_scope(scope.clone());
        filter.client_id = Some("c1".into());
        let listed = db.sales().list(&filter).await.unwrap();
        assert_eq!(listed.total_count, 1);
        assert_eq!(listed.items[0].id, first.id);

        let updated = db
            .sales()
            .update(
                &scope,
                &first.id,
                &SalePatch {
                    client_id: None,
                    payment_method: Some(PaymentMethod::new("USD")),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.client_id, "c1");
        assert_eq!(updated.payment_method.as_str(), "usd");

        let err = db
            .sales()
            .update(&scope.with_branch("north"), &first.id, &SalePatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_delete() {
        let db = fixtures::db().await;
        let scope = fixtures::scope();
        let p = fixtures::product(&db, &scope, "Tea", 10).await;
        let stored = store(&db, &scope, &p.id, "c1").await;

        let mut conn = db.pool().acquire().await.unwrap();
        delete_sale(&mut conn, &scope, &stored.id).await.unwrap();
        assert!(fetch_sale(&mut conn, &scope, &stored.id).await.unwrap().is_none());
    }
}
