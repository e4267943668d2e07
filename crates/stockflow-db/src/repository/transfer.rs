//! # Transfer Repository
//!
//! Audit rows for inter-branch transfers: one `transfers` header and one
//! `transfer_products` row per moved line.
//!
//! The stock movement itself is orchestrated by the transfer engine, which
//! calls [`insert_transfer`] as the last step of its transaction.

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use crate::repository::push_date_range;
use stockflow_core::validation::validate_required;
use stockflow_core::{new_id, Listed, NewTransfer, Transfer, TransferFilter, TransferLine};

const TRANSFER_COLUMNS: &str =
    "id, transferred_by, from_branch_id, to_branch_id, description, company_id, created_at";

/// A line whose stock has already moved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovedLine {
    pub product_id: String,
    pub destination_product_id: String,
    pub quantity: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct TransferRow {
    id: String,
    transferred_by: String,
    from_branch_id: String,
    to_branch_id: String,
    description: Option<String>,
    company_id: String,
    created_at: DateTime<Utc>,
}

impl TransferRow {
    fn into_transfer(self, lines: Vec<TransferLine>) -> Transfer {
        Transfer {
            id: self.id,
            transferred_by: self.transferred_by,
            from_branch_id: self.from_branch_id,
            to_branch_id: self.to_branch_id,
            description: self.description,
            company_id: self.company_id,
            created_at: self.created_at,
            lines,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct LineRow {
    id: String,
    product_transfers_id: String,
    product_id: String,
    destination_product_id: String,
    quantity: i64,
}

impl From<LineRow> for TransferLine {
    fn from(row: LineRow) -> Self {
        TransferLine {
            id: row.id,
            transfer_id: row.product_transfers_id,
            product_id: row.product_id,
            destination_product_id: row.destination_product_id,
            quantity: row.quantity,
        }
    }
}

// =============================================================================
// Connection-Level Functions
// =============================================================================

/// Records the transfer header and its lines.
pub async fn insert_transfer(
    conn: &mut SqliteConnection,
    new: &NewTransfer,
    lines: &[MovedLine],
) -> DbResult<Transfer> {
    let id = new_id();
    debug!(
        id = %id,
        company_id = %new.company_id,
        from = %new.from_branch_id,
        to = %new.to_branch_id,
        lines = lines.len(),
        "Recording transfer"
    );

    let header: TransferRow = sqlx::query_as(&format!(
        r#"
        INSERT INTO transfers (
            id, transferred_by, from_branch_id, to_branch_id,
            description, company_id, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        RETURNING {TRANSFER_COLUMNS}
        "#
    ))
    .bind(&id)
    .bind(&new.transferred_by)
    .bind(&new.from_branch_id)
    .bind(&new.to_branch_id)
    .bind(&new.description)
    .bind(&new.company_id)
    .bind(Utc::now())
    .fetch_one(&mut *conn)
    .await?;

    let mut stored = Vec::with_capacity(lines.len());
    for line in lines {
        let row: LineRow = sqlx::query_as(
            r#"
            INSERT INTO transfer_products (
                id, product_transfers_id, product_id, destination_product_id, quantity
            ) VALUES (?1, ?2, ?3, ?4, ?5)
            RETURNING id, product_transfers_id, product_id, destination_product_id, quantity
            "#,
        )
        .bind(new_id())
        .bind(&id)
        .bind(&line.product_id)
        .bind(&line.destination_product_id)
        .bind(line.quantity)
        .fetch_one(&mut *conn)
        .await?;
        stored.push(TransferLine::from(row));
    }

    Ok(header.into_transfer(stored))
}

async fn fetch_lines(conn: &mut SqliteConnection, transfer_id: &str) -> DbResult<Vec<TransferLine>> {
    let rows: Vec<LineRow> = sqlx::query_as(
        r#"
        SELECT id, product_transfers_id, product_id, destination_product_id, quantity
        FROM transfer_products
        WHERE product_transfers_id = ?1
        ORDER BY rowid
        "#,
    )
    .bind(transfer_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows.into_iter().map(TransferLine::from).collect())
}

// =============================================================================
// Repository
// =============================================================================

/// Read access to recorded transfers.
#[derive(Debug, Clone)]
pub struct TransferRepository {
    pool: SqlitePool,
}

impl TransferRepository {
    /// Creates a new TransferRepository.
    pub fn new(pool: SqlitePool) -> Self {
        TransferRepository { pool }
    }

    /// Gets a transfer with its lines.
    pub async fn get(&self, company_id: &str, id: &str) -> DbResult<Option<Transfer>> {
        validate_required("company_id", company_id)?;
        let mut conn = self.pool.acquire().await?;

        let header: Option<TransferRow> = sqlx::query_as(&format!(
            "SELECT {TRANSFER_COLUMNS} FROM transfers WHERE id = ?1 AND company_id = ?2"
        ))
        .bind(id)
        .bind(company_id)
        .fetch_optional(&mut *conn)
        .await?;

        match header {
            Some(header) => {
                let lines = fetch_lines(&mut conn, &header.id).await?;
                Ok(Some(header.into_transfer(lines)))
            }
            None => Ok(None),
        }
    }

    /// Lists transfers newest first.
    pub async fn list(&self, filter: &TransferFilter) -> DbResult<Listed<Transfer>> {
        filter.validate()?;

        fn push_where(qb: &mut QueryBuilder<'_, Sqlite>, filter: &TransferFilter) {
            qb.push(" WHERE company_id = ")
                .push_bind(filter.company_id.clone());
            if let Some(branch_id) = &filter.branch_id {
                qb.push(" AND (from_branch_id = ")
                    .push_bind(branch_id.clone())
                    .push(" OR to_branch_id = ")
                    .push_bind(branch_id.clone())
                    .push(")");
            }
            if let Some(transferred_by) = &filter.transferred_by {
                qb.push(" AND transferred_by = ")
                    .push_bind(transferred_by.clone());
            }
            push_date_range(qb, "created_at", &filter.range);
        }

        let mut conn = self.pool.acquire().await?;

        let mut count_qb: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("SELECT COUNT(*) FROM transfers");
        push_where(&mut count_qb, filter);
        let total_count: i64 = count_qb.build_query_scalar().fetch_one(&mut *conn).await?;

        let mut qb: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new(format!("SELECT {TRANSFER_COLUMNS} FROM transfers"));
        push_where(&mut qb, filter);
        qb.push(" ORDER BY created_at DESC, id LIMIT ")
            .push_bind(filter.page.limit())
            .push(" OFFSET ")
            .push_bind(filter.page.offset());
        let headers: Vec<TransferRow> = qb.build_query_as().fetch_all(&mut *conn).await?;

        let mut items = Vec::with_capacity(headers.len());
        for header in headers {
            let lines = fetch_lines(&mut conn, &header.id).await?;
            items.push(header.into_transfer(lines));
        }

        debug!(count = items.len(), total_count, "Listed transfers");
        Ok(Listed { items, total_count })
    }

    /// Number of transfer headers for a company.
    pub async fn count(&self, company_id: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transfers WHERE company_id = ?1")
            .bind(company_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
