//! # Statistics Repository
//!
//! Read-only aggregates over products, sales and purchases.
//!
//! ## Queries
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         StatisticsRepository                            │
//! │                                                                         │
//! │  stock_value       products        Σ standard_price × total_count       │
//! │  sold_totals       sales_items     Σ total_price per payment            │
//! │  purchased_totals  purchase_items  Σ total_price per payment            │
//! │  most_sold_by_day  sales_items     Σ quantity per UTC day               │
//! │  top_clients       sales           Σ total_sale_price per client        │
//! │  top_suppliers     purchases       Σ total_cost per supplier            │
//! │                                                                         │
//! │  SQL filters and fetches raw TEXT amounts; Rust parses them into       │
//! │  Decimal and does every sum, grouping and ranking.                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Deleted headers take their items with them, so reversed operations
//! drop out of every aggregate.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::cmp::Reverse;
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::DbResult;
use crate::repository::cash_flow::{accumulate, into_payment_totals};
use crate::repository::{parse_decimal, push_date_range};
use stockflow_core::{
    DailySales, DateRange, PartyTotal, PaymentTotal, ProductSales, RankingQuery, Scope,
    StockValue,
};

/// Appends the company filter and, when set, the branch filter.
fn push_ranking_scope(qb: &mut QueryBuilder<'_, Sqlite>, alias: &str, query: &RankingQuery) {
    qb.push(format!(" WHERE {alias}.company_id = "))
        .push_bind(query.company_id.clone());
    if let Some(branch_id) = &query.branch_id {
        qb.push(format!(" AND {alias}.branch_id = "))
            .push_bind(branch_id.clone());
    }
    push_date_range(qb, &format!("{alias}.created_at"), &query.range);
}

/// Sums `(party_id, amount)` rows and keeps the `limit` largest totals.
///
/// Ties are broken by party id so the order is stable.
fn rank_parties(rows: Vec<(String, String)>, field: &str, limit: u32) -> DbResult<Vec<PartyTotal>> {
    let mut per_party: BTreeMap<String, (Decimal, i64)> = BTreeMap::new();
    for (party_id, amount) in rows {
        let amount = parse_decimal(field, &amount)?;
        let entry = per_party.entry(party_id).or_insert((Decimal::ZERO, 0));
        entry.0 += amount;
        entry.1 += 1;
    }

    let mut ranked: Vec<PartyTotal> = per_party
        .into_iter()
        .map(|(party_id, (total, operations))| PartyTotal {
            party_id,
            total,
            operations,
        })
        .collect();
    ranked.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.party_id.cmp(&b.party_id)));
    ranked.truncate(limit as usize);
    Ok(ranked)
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for read-only ledger statistics.
#[derive(Debug, Clone)]
pub struct StatisticsRepository {
    pool: SqlitePool,
}

impl StatisticsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        StatisticsRepository { pool }
    }

    /// Value of the branch's stock at standard price, over products
    /// created within `range`.
    pub async fn stock_value(&self, scope: &Scope, range: &DateRange) -> DbResult<StockValue> {
        scope.validate()?;
        range.validate()?;

        let mut qb: QueryBuilder<'_, Sqlite> = QueryBuilder::new(
            "SELECT standard_price, total_count FROM products WHERE company_id = ",
        );
        qb.push_bind(scope.company_id.clone())
            .push(" AND branch_id = ")
            .push_bind(scope.branch_id.clone());
        push_date_range(&mut qb, "created_at", range);

        let rows: Vec<(String, i64)> = qb.build_query_as().fetch_all(&self.pool).await?;
        let mut total = Decimal::ZERO;
        for (price, count) in &rows {
            total += parse_decimal("standard_price", price)? * Decimal::from(*count);
        }

        debug!(scope = %scope, products = rows.len(), total = %total, "Stock value");
        Ok(StockValue {
            company_id: scope.company_id.clone(),
            branch_id: scope.branch_id.clone(),
            total,
        })
    }

    /// Sum of sale line totals per payment method.
    pub async fn sold_totals(&self, scope: &Scope, range: &DateRange) -> DbResult<Vec<PaymentTotal>> {
        self.line_totals("sales_items", "sales", "sale_id", scope, range)
            .await
    }

    /// Sum of purchase line totals per payment method.
    pub async fn purchased_totals(
        &self,
        scope: &Scope,
        range: &DateRange,
    ) -> DbResult<Vec<PaymentTotal>> {
        self.line_totals("purchase_items", "purchases", "purchase_id", scope, range)
            .await
    }

    async fn line_totals(
        &self,
        items: &str,
        headers: &str,
        header_key: &str,
        scope: &Scope,
        range: &DateRange,
    ) -> DbResult<Vec<PaymentTotal>> {
        scope.validate()?;
        range.validate()?;

        let mut qb: QueryBuilder<'_, Sqlite> = QueryBuilder::new(format!(
            "SELECT h.payment_method, i.total_price FROM {items} i \
             JOIN {headers} h ON i.{header_key} = h.id WHERE h.company_id = "
        ));
        qb.push_bind(scope.company_id.clone())
            .push(" AND h.branch_id = ")
            .push_bind(scope.branch_id.clone());
        push_date_range(&mut qb, "h.created_at", range);

        let rows: Vec<(String, String)> = qb.build_query_as().fetch_all(&self.pool).await?;
        debug!(table = items, scope = %scope, lines = rows.len(), "Line totals");

        let mut totals = BTreeMap::new();
        accumulate(&mut totals, rows, Decimal::ONE)?;
        Ok(into_payment_totals(totals))
    }

    /// Best-selling products of every UTC day in the range that had sales,
    /// oldest day first. Each day keeps its `limit` highest quantities.
    pub async fn most_sold_by_day(&self, query: &RankingQuery) -> DbResult<Vec<DailySales>> {
        query.validate()?;

        let mut qb: QueryBuilder<'_, Sqlite> = QueryBuilder::new(
            "SELECT s.created_at, si.product_id, p.name, si.quantity FROM sales_items si \
             JOIN sales s ON si.sale_id = s.id \
             JOIN products p ON si.product_id = p.id",
        );
        push_ranking_scope(&mut qb, "s", query);

        let rows: Vec<(DateTime<Utc>, String, String, i64)> =
            qb.build_query_as().fetch_all(&self.pool).await?;

        let mut per_day: BTreeMap<NaiveDate, BTreeMap<String, ProductSales>> = BTreeMap::new();
        for (sold_at, product_id, name, quantity) in rows {
            per_day
                .entry(sold_at.date_naive())
                .or_default()
                .entry(product_id.clone())
                .or_insert_with(|| ProductSales {
                    product_id,
                    name,
                    quantity: 0,
                })
                .quantity += quantity;
        }

        let days: Vec<DailySales> = per_day
            .into_iter()
            .map(|(day, products)| {
                let mut products: Vec<ProductSales> = products.into_values().collect();
                products.sort_by_key(|p| (Reverse(p.quantity), p.name.clone()));
                products.truncate(query.limit as usize);
                DailySales { day, products }
            })
            .collect();

        debug!(company_id = %query.company_id, days = days.len(), "Most sold by day");
        Ok(days)
    }

    /// Clients ranked by the total of their sales.
    pub async fn top_clients(&self, query: &RankingQuery) -> DbResult<Vec<PartyTotal>> {
        query.validate()?;

        let mut qb: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("SELECT s.client_id, s.total_sale_price FROM sales s");
        push_ranking_scope(&mut qb, "s", query);
        let rows: Vec<(String, String)> = qb.build_query_as().fetch_all(&self.pool).await?;

        rank_parties(rows, "total_sale_price", query.limit)
    }

    /// Suppliers ranked by the total cost of their purchases.
    pub async fn top_suppliers(&self, query: &RankingQuery) -> DbResult<Vec<PartyTotal>> {
        query.validate()?;

        let mut qb: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("SELECT p.supplier_id, p.total_cost FROM purchases p");
        push_ranking_scope(&mut qb, "p", query);
        let rows: Vec<(String, String)> = qb.build_query_as().fetch_all(&self.pool).await?;

        rank_parties(rows, "total_cost", query.limit)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
