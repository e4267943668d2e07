//! # Product Repository
//!
//! Products, categories, and the destination-side lookup used by transfers.
//!
//! ## Destination Lookup-or-Create
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                 Transfer lands on the destination branch                │
//! │                                                                         │
//! │  source product "Rice 5kg" @ branch A                                  │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  INSERT INTO products (... branch B, "Rice 5kg", count 0 ...)          │
//! │  ON CONFLICT (company_id, branch_id, name) DO NOTHING                  │
//! │       │                                                                 │
//! │       ├── no row at B yet  → new row copying name/prices/unit/image    │
//! │       └── row exists at B  → left untouched                            │
//! │       ▼                                                                 │
//! │  SELECT ... WHERE branch B AND name = "Rice 5kg"                       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  stock::increase(B row, qty)   ← the count moves in stock.rs only      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::repository::parse_decimal;
use stockflow_core::validation::{validate_amount, validate_required};
use stockflow_core::{new_id, Category, NewProduct, Product, Scope, ValidationError};

const PRODUCT_COLUMNS: &str = "id, category_id, name, bill_format, image_url, incoming_price, \
     standard_price, total_count, company_id, branch_id, created_by, created_at";

// =============================================================================
// Row Mapping
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct ProductRow {
    id: String,
    category_id: Option<String>,
    name: String,
    bill_format: Option<String>,
    image_url: Option<String>,
    incoming_price: String,
    standard_price: String,
    total_count: i64,
    company_id: String,
    branch_id: String,
    created_by: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<ProductRow> for Product {
    type Error = DbError;

    fn try_from(row: ProductRow) -> DbResult<Self> {
        Ok(Product {
            incoming_price: parse_decimal("incoming_price", &row.incoming_price)?,
            standard_price: parse_decimal("standard_price", &row.standard_price)?,
            id: row.id,
            category_id: row.category_id,
            name: row.name,
            bill_format: row.bill_format,
            image_url: row.image_url,
            total_count: row.total_count,
            company_id: row.company_id,
            branch_id: row.branch_id,
            created_by: row.created_by,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CategoryRow {
    id: String,
    name: String,
    company_id: String,
    branch_id: String,
    created_by: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<CategoryRow> for Category {
    fn from(row: CategoryRow) -> Self {
        Category {
            id: row.id,
            name: row.name,
            company_id: row.company_id,
            branch_id: row.branch_id,
            created_by: row.created_by,
            created_at: row.created_at,
        }
    }
}

// =============================================================================
// Connection-Level Functions
// =============================================================================

/// Loads a product inside the caller's scope.
pub async fn fetch_product(
    conn: &mut SqliteConnection,
    scope: &Scope,
    id: &str,
) -> DbResult<Option<Product>> {
    let row: Option<ProductRow> = sqlx::query_as(&format!(
        "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1 AND company_id = ?2 AND branch_id = ?3"
    ))
    .bind(id)
    .bind(&scope.company_id)
    .bind(&scope.branch_id)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(Product::try_from).transpose()
}

/// Inserts a product row.
pub async fn insert_product(conn: &mut SqliteConnection, new: &NewProduct) -> DbResult<Product> {
    new.scope.validate()?;
    validate_required("name", &new.name)?;
    validate_amount(new.incoming_price)?;
    validate_amount(new.standard_price)?;
    if new.initial_count < 0 {
        return Err(ValidationError::MustNotBeNegative {
            field: "initial_count".to_string(),
        }
        .into());
    }

    let id = new_id();
    debug!(id = %id, name = %new.name, scope = %new.scope, "Inserting product");

    let row: ProductRow = sqlx::query_as(&format!(
        r#"
        INSERT INTO products (
            id, category_id, name, bill_format, image_url,
            incoming_price, standard_price, total_count,
            company_id, branch_id, created_by, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        RETURNING {PRODUCT_COLUMNS}
        "#
    ))
    .bind(&id)
    .bind(&new.category_id)
    .bind(new.name.trim())
    .bind(&new.bill_format)
    .bind(&new.image_url)
    .bind(new.incoming_price.to_string())
    .bind(new.standard_price.to_string())
    .bind(new.initial_count)
    .bind(&new.scope.company_id)
    .bind(&new.scope.branch_id)
    .bind(&new.created_by)
    .bind(Utc::now())
    .fetch_one(&mut *conn)
    .await?;

    row.try_into()
}

/// Returns the category named `name` at the scope, creating it if absent.
///
/// `INSERT ... ON CONFLICT DO NOTHING` followed by a select, so two
/// concurrent callers end up with the same row.
pub async fn ensure_category(
    conn: &mut SqliteConnection,
    scope: &Scope,
    name: &str,
    created_by: Option<&str>,
) -> DbResult<Category> {
    validate_required("category name", name)?;

    sqlx::query(
        r#"
        INSERT INTO product_categories (id, name, company_id, branch_id, created_by, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT (company_id, branch_id, name) DO NOTHING
        "#,
    )
    .bind(new_id())
    .bind(name)
    .bind(&scope.company_id)
    .bind(&scope.branch_id)
    .bind(created_by)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;

    let row: CategoryRow = sqlx::query_as(
        r#"
        SELECT id, name, company_id, branch_id, created_by, created_at
        FROM product_categories
        WHERE company_id = ?1 AND branch_id = ?2 AND name = ?3
        "#,
    )
    .bind(&scope.company_id)
    .bind(&scope.branch_id)
    .bind(name)
    .fetch_one(&mut *conn)
    .await?;

    debug!(category_id = %row.id, name = %name, scope = %scope, "Category resolved");
    Ok(row.into())
}

/// Returns the product named like `template` at `dest`, creating it from
/// `template`'s metadata with a zero count if the branch has none.
///
/// An existing row keeps its own category, prices and count. Counts are
/// changed through [`stock`](super::stock) only.
pub async fn ensure_by_name(
    conn: &mut SqliteConnection,
    dest: &Scope,
    template: &Product,
    category_id: &str,
    created_by: &str,
) -> DbResult<Product> {
    debug!(name = %template.name, dest = %dest, "Ensuring destination product");

    sqlx::query(
        r#"
        INSERT INTO products (
            id, category_id, name, bill_format, image_url,
            incoming_price, standard_price, total_count,
            company_id, branch_id, created_by, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?9, ?10, ?11)
        ON CONFLICT (company_id, branch_id, name) DO NOTHING
        "#,
    )
    .bind(new_id())
    .bind(category_id)
    .bind(&template.name)
    .bind(&template.bill_format)
    .bind(&template.image_url)
    .bind(template.incoming_price.to_string())
    .bind(template.standard_price.to_string())
    .bind(&dest.company_id)
    .bind(&dest.branch_id)
    .bind(created_by)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;

    let row: ProductRow = sqlx::query_as(&format!(
        "SELECT {PRODUCT_COLUMNS} FROM products \
         WHERE company_id = ?1 AND branch_id = ?2 AND name = ?3"
    ))
    .bind(&dest.company_id)
    .bind(&dest.branch_id)
    .bind(&template.name)
    .fetch_one(&mut *conn)
    .await?;

    row.try_into()
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for products and categories.
#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
}

impl ProductRepository {
    /// Creates a new ProductRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ProductRepository { pool }
    }

    /// Registers a product with its opening stock.
    ///
    /// ## Returns
    /// * `Ok(Product)` - The stored row
    /// * `Err(DbError::UniqueViolation)` - Name already used at this branch
    pub async fn insert(&self, new: &NewProduct) -> DbResult<Product> {
        let mut conn = self.pool.acquire().await?;
        insert_product(&mut conn, new).await
    }

    /// Gets a product by id within the scope.
    pub async fn get(&self, scope: &Scope, id: &str) -> DbResult<Option<Product>> {
        let mut conn = self.pool.acquire().await?;
        fetch_product(&mut conn, scope, id).await
    }

    /// Gets a product by name within the scope.
    pub async fn get_by_name(&self, scope: &Scope, name: &str) -> DbResult<Option<Product>> {
        let row: Option<ProductRow> = sqlx::query_as(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE company_id = ?1 AND branch_id = ?2 AND name = ?3"
        ))
        .bind(&scope.company_id)
        .bind(&scope.branch_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Product::try_from).transpose()
    }

    /// Lists every product at the scope, by name.
    pub async fn list(&self, scope: &Scope) -> DbResult<Vec<Product>> {
        let rows: Vec<ProductRow> = sqlx::query_as(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE company_id = ?1 AND branch_id = ?2 ORDER BY name"
        ))
        .bind(&scope.company_id)
        .bind(&scope.branch_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Product::try_from).collect()
    }

    /// Sum of `total_count` for products named `name` across every branch
    /// of a company.
    pub async fn company_total(&self, company_id: &str, name: &str) -> DbResult<i64> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(total_count), 0) FROM products WHERE company_id = ?1 AND name = ?2",
        )
        .bind(company_id)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;

        Ok(total)
    }

    /// Returns the named category, creating it if absent.
    pub async fn ensure_category(
        &self,
        scope: &Scope,
        name: &str,
        created_by: Option<&str>,
    ) -> DbResult<Category> {
        let mut conn = self.pool.acquire().await?;
        ensure_category(&mut conn, scope, name, created_by).await
    }

    /// Lists categories at the scope.
    pub async fn list_categories(&self, scope: &Scope) -> DbResult<Vec<Category>> {
        let rows: Vec<CategoryRow> = sqlx::query_as(
            r#"
            SELECT id, name, company_id, branch_id, created_by, created_at
            FROM product_categories
            WHERE company_id = ?1 AND branch_id = ?2
            ORDER BY name
            "#,
        )
        .bind(&scope.company_id)
        .bind(&scope.branch_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Category::from).collect())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{fixtures, stock};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_insert_and_get() {
        let db = fixtures::db().await;
        let scope = fixtures::scope();
        let product = fixtures::product(&db, &scope, "Rice 5kg", 12).await;

        let loaded = db.products().get(&scope, &product.id).await.unwrap().unwrap();
        assert_eq!(loaded, product);
        assert_eq!(loaded.total_count, 12);
        assert_eq!(loaded.standard_price, dec!(15.00));
    }

    #[tokio::test]
    async fn test_get_outside_scope_is_none() {
        let db = fixtures::db().await;
        let scope = fixtures::scope();
        let product = fixtures::product(&db, &scope, "Rice 5kg", 1).await;

        let other_branch = scope.with_branch("north");
        assert!(db.products().get(&other_branch, &product.id).await.unwrap().is_none());

        let other_company = Scope::new("globex", "main");
        assert!(db.products().get(&other_company, &product.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let db = fixtures::db().await;
        let scope = fixtures::scope();
        fixtures::product(&db, &scope, "Tea", 1).await;

        let err = db
            .products()
            .insert(&NewProduct {
                scope: scope.clone(),
                category_id: None,
                name: "Tea".into(),
                bill_format: None,
                image_url: None,
                incoming_price: dec!(1),
                standard_price: dec!(2),
                initial_count: 0,
                created_by: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));
    }

    #[tokio::test]
    async fn test_ensure_category_is_idempotent() {
        let db = fixtures::db().await;
        let scope = fixtures::scope();

        let first = db.products().ensure_category(&scope, "Transfers", Some("u1")).await.unwrap();
        let second = db.products().ensure_category(&scope, "Transfers", None).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(db.products().list_categories(&scope).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_ensure_by_name_reuses_destination_row() {
        let db = fixtures::db().await;
        let source_scope = fixtures::scope();
        let dest = source_scope.with_branch("north");
        let source = fixtures::product(&db, &source_scope, "Flour", 10).await;

        let mut conn = db.pool().acquire().await.unwrap();
        let category = ensure_category(&mut conn, &dest, "Transfers", None).await.unwrap();

        let created = ensure_by_name(&mut conn, &dest, &source, &category.id, "u1")
            .await
            .unwrap();
        assert_ne!(created.id, source.id);
        assert_eq!(created.total_count, 0);
        assert_eq!(created.branch_id, "north");
        assert_eq!(created.standard_price, source.standard_price);
        assert_eq!(created.bill_format, source.bill_format);

        assert_eq!(stock::increase(&mut conn, &dest, &created.id, 4).await.unwrap(), 4);

        let again = ensure_by_name(&mut conn, &dest, &source, &category.id, "u1")
            .await
            .unwrap();
        assert_eq!(again.id, created.id);
        assert_eq!(again.total_count, 4);
        drop(conn);
        assert_eq!(db.products().list(&dest).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_negative_opening_stock_rejected() {
        let db = fixtures::db().await;
        let err = db
            .products()
            .insert(&NewProduct {
                scope: fixtures::scope(),
                category_id: None,
                name: "Salt".into(),
                bill_format: None,
                image_url: None,
                incoming_price: dec!(1),
                standard_price: dec!(1),
                initial_count: -1,
                created_by: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Validation(_)));
    }
}
