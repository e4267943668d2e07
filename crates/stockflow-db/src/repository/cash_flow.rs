//! # Cash-Flow Repository
//!
//! Append-only income/expense rows and the aggregates read from them.
//!
//! Rows are never updated or deleted. Reversing an operation means writing
//! another row in the opposite direction.
//!
//! Amounts are TEXT, so every total is summed in Rust with `Decimal`
//! instead of SQL `SUM` (which would go through floating point).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::repository::{parse_decimal, push_date_range};
use stockflow_core::{
    new_id, BranchIncome, BranchIncomeReport, CashFlowDirection, CashFlowEntry, CashFlowFilter,
    DateRange, Listed, NewCashFlowEntry, PaymentMethod, PaymentTotal, Scope,
};

const ENTRY_COLUMNS: &str = "id, user_id, amount, transaction_type, description, payment_method, \
     company_id, branch_id, transaction_date";

#[derive(Debug, sqlx::FromRow)]
struct EntryRow {
    id: String,
    user_id: String,
    amount: String,
    transaction_type: CashFlowDirection,
    description: String,
    payment_method: String,
    company_id: String,
    branch_id: String,
    transaction_date: DateTime<Utc>,
}

impl TryFrom<EntryRow> for CashFlowEntry {
    type Error = DbError;

    fn try_from(row: EntryRow) -> DbResult<Self> {
        Ok(CashFlowEntry {
            amount: parse_decimal("amount", &row.amount)?,
            id: row.id,
            user_id: row.user_id,
            direction: row.transaction_type,
            description: row.description,
            payment_method: PaymentMethod::new(row.payment_method),
            company_id: row.company_id,
            branch_id: row.branch_id,
            transaction_date: row.transaction_date,
        })
    }
}

// =============================================================================
// Connection-Level Functions
// =============================================================================

/// Appends one entry.
pub async fn insert_entry(
    conn: &mut SqliteConnection,
    direction: CashFlowDirection,
    entry: &NewCashFlowEntry,
) -> DbResult<CashFlowEntry> {
    entry.validate()?;

    let id = new_id();
    debug!(
        id = %id,
        direction = %direction,
        amount = %entry.amount,
        payment_method = %entry.payment_method,
        scope = %entry.scope,
        "Recording cash flow"
    );

    let row: EntryRow = sqlx::query_as(&format!(
        r#"
        INSERT INTO cash_flow (
            id, user_id, amount, transaction_type, description,
            payment_method, company_id, branch_id, transaction_date
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        RETURNING {ENTRY_COLUMNS}
        "#
    ))
    .bind(&id)
    .bind(&entry.user_id)
    .bind(entry.amount.to_string())
    .bind(direction)
    .bind(&entry.description)
    .bind(entry.payment_method.as_str())
    .bind(&entry.scope.company_id)
    .bind(&entry.scope.branch_id)
    .bind(Utc::now())
    .fetch_one(&mut *conn)
    .await?;

    row.try_into()
}

/// Adds each `(payment_method, amount)` into `totals`.
pub(crate) fn accumulate(
    totals: &mut BTreeMap<String, Decimal>,
    rows: Vec<(String, String)>,
    sign: Decimal,
) -> DbResult<()> {
    for (method, amount) in rows {
        let amount = parse_decimal("amount", &amount)?;
        *totals.entry(method).or_insert(Decimal::ZERO) += amount * sign;
    }
    Ok(())
}

pub(crate) fn into_payment_totals(totals: BTreeMap<String, Decimal>) -> Vec<PaymentTotal> {
    totals
        .into_iter()
        .map(|(method, total)| PaymentTotal {
            payment_method: PaymentMethod::new(method),
            total,
        })
        .collect()
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for cash-flow entries.
#[derive(Debug, Clone)]
pub struct CashFlowRepository {
    pool: SqlitePool,
}

impl CashFlowRepository {
    /// Creates a new CashFlowRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CashFlowRepository { pool }
    }

    /// Appends an income entry.
    pub async fn create_income(&self, entry: &NewCashFlowEntry) -> DbResult<CashFlowEntry> {
        let mut conn = self.pool.acquire().await?;
        insert_entry(&mut conn, CashFlowDirection::Income, entry).await
    }

    /// Appends an expense entry.
    pub async fn create_expense(&self, entry: &NewCashFlowEntry) -> DbResult<CashFlowEntry> {
        let mut conn = self.pool.acquire().await?;
        insert_entry(&mut conn, CashFlowDirection::Expense, entry).await
    }

    /// Lists entries newest first with the total match count.
    pub async fn list(&self, filter: &CashFlowFilter) -> DbResult<Listed<CashFlowEntry>> {
        filter.validate()?;

        fn push_where(qb: &mut QueryBuilder<'_, Sqlite>, filter: &CashFlowFilter) {
            qb.push(" WHERE company_id = ")
                .push_bind(filter.scope.company_id.clone())
                .push(" AND branch_id = ")
                .push_bind(filter.scope.branch_id.clone());
            if let Some(direction) = filter.direction {
                qb.push(" AND transaction_type = ").push_bind(direction);
            }
            if let Some(method) = &filter.payment_method {
                qb.push(" AND payment_method = ")
                    .push_bind(method.as_str().to_string());
            }
            if let Some(text) = &filter.description {
                qb.push(" AND description LIKE ")
                    .push_bind(format!("%{}%", text.trim()));
            }
            push_date_range(qb, "transaction_date", &filter.range);
        }

        let mut count_qb: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("SELECT COUNT(*) FROM cash_flow");
        push_where(&mut count_qb, filter);
        let total_count: i64 = count_qb.build_query_scalar().fetch_one(&self.pool).await?;

        let mut qb: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new(format!("SELECT {ENTRY_COLUMNS} FROM cash_flow"));
        push_where(&mut qb, filter);
        qb.push(" ORDER BY transaction_date DESC, id LIMIT ")
            .push_bind(filter.page.limit())
            .push(" OFFSET ")
            .push_bind(filter.page.offset());

        let rows: Vec<EntryRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        let items = rows
            .into_iter()
            .map(CashFlowEntry::try_from)
            .collect::<DbResult<Vec<_>>>()?;

        debug!(count = items.len(), total_count, "Listed cash flow");
        Ok(Listed { items, total_count })
    }

    async fn amounts(
        &self,
        company_id: &str,
        branch_id: Option<&str>,
        direction: CashFlowDirection,
        range: &DateRange,
    ) -> DbResult<Vec<(String, String, String)>> {
        range.validate()?;

        let mut qb: QueryBuilder<'_, Sqlite> = QueryBuilder::new(
            "SELECT branch_id, payment_method, amount FROM cash_flow WHERE company_id = ",
        );
        qb.push_bind(company_id.to_string())
            .push(" AND transaction_type = ")
            .push_bind(direction);
        if let Some(branch_id) = branch_id {
            qb.push(" AND branch_id = ").push_bind(branch_id.to_string());
        }
        push_date_range(&mut qb, "transaction_date", range);

        Ok(qb.build_query_as().fetch_all(&self.pool).await?)
    }

    /// Sum of one direction per payment method.
    async fn totals(
        &self,
        scope: &Scope,
        direction: CashFlowDirection,
        range: &DateRange,
    ) -> DbResult<Vec<PaymentTotal>> {
        scope.validate()?;
        let rows = self
            .amounts(&scope.company_id, Some(&scope.branch_id), direction, range)
            .await?;

        let mut totals = BTreeMap::new();
        accumulate(
            &mut totals,
            rows.into_iter().map(|(_, method, amount)| (method, amount)).collect(),
            Decimal::ONE,
        )?;
        Ok(into_payment_totals(totals))
    }

    /// Income per payment method.
    pub async fn total_income(&self, scope: &Scope, range: &DateRange) -> DbResult<Vec<PaymentTotal>> {
        self.totals(scope, CashFlowDirection::Income, range).await
    }

    /// Expense per payment method.
    pub async fn total_expense(&self, scope: &Scope, range: &DateRange) -> DbResult<Vec<PaymentTotal>> {
        self.totals(scope, CashFlowDirection::Expense, range).await
    }

    /// `income - expense` per payment method.
    pub async fn net_profit(&self, scope: &Scope, range: &DateRange) -> DbResult<Vec<PaymentTotal>> {
        scope.validate()?;
        let income = self
            .amounts(&scope.company_id, Some(&scope.branch_id), CashFlowDirection::Income, range)
            .await?;
        let expense = self
            .amounts(&scope.company_id, Some(&scope.branch_id), CashFlowDirection::Expense, range)
            .await?;

        let mut totals = BTreeMap::new();
        accumulate(
            &mut totals,
            income.into_iter().map(|(_, m, a)| (m, a)).collect(),
            Decimal::ONE,
        )?;
        accumulate(
            &mut totals,
            expense.into_iter().map(|(_, m, a)| (m, a)).collect(),
            Decimal::NEGATIVE_ONE,
        )?;
        Ok(into_payment_totals(totals))
    }

    /// Income of every branch of a company, by payment method.
    pub async fn branch_income(
        &self,
        company_id: &str,
        range: &DateRange,
    ) -> DbResult<BranchIncomeReport> {
        stockflow_core::validation::validate_required("company_id", company_id)?;
        let rows = self
            .amounts(company_id, None, CashFlowDirection::Income, range)
            .await?;

        let mut per_branch: BTreeMap<String, BTreeMap<String, Decimal>> = BTreeMap::new();
        let mut grand_total = Decimal::ZERO;
        for (branch_id, method, amount) in rows {
            let amount = parse_decimal("amount", &amount)?;
            grand_total += amount;
            *per_branch
                .entry(branch_id)
                .or_default()
                .entry(method)
                .or_insert(Decimal::ZERO) += amount;
        }

        let branches = per_branch
            .into_iter()
            .map(|(branch_id, totals)| {
                let total = totals.values().copied().sum::<Decimal>();
                BranchIncome {
                    branch_id,
                    by_payment_method: into_payment_totals(totals),
                    total,
                }
            })
            .collect();

        Ok(BranchIncomeReport {
            branches,
            total: grand_total,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
