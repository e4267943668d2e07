//! # Cash-Flow Recorder
//!
//! Appends the income/expense entry that accompanies every stock-moving
//! purchase or sale, and answers the aggregate queries.
//!
//! ## Event Mapping
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Event              Direction   Description                             │
//! │  ─────────────────  ─────────   ─────────────────────────────────────   │
//! │  PurchaseCreated    expense     "Purchase received <id>"                │
//! │  PurchaseDeleted    income      "Purchase reversed <id>"                │
//! │  SaleCreated        income      "Sale completed <id>"                   │
//! │  SaleDeleted        expense     "Sale reversed <id>"                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Entries are never edited or removed; a deletion appends the inverse.

use rust_decimal::Decimal;
use sqlx::SqliteConnection;
use stockflow_core::{
    BranchIncomeReport, CashFlowDirection, CashFlowEntry, CashFlowFilter, DateRange, Listed,
    NewCashFlowEntry, PaymentMethod, PaymentTotal, Scope,
};
use stockflow_db::repository::cash_flow::insert_entry;
use stockflow_db::Database;
use tracing::info;

use crate::error::LedgerResult;

/// The business event an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CashFlowEvent {
    PurchaseCreated,
    PurchaseDeleted,
    SaleCreated,
    SaleDeleted,
}

impl CashFlowEvent {
    pub const fn direction(self) -> CashFlowDirection {
        match self {
            CashFlowEvent::PurchaseCreated | CashFlowEvent::SaleDeleted => CashFlowDirection::Expense,
            CashFlowEvent::PurchaseDeleted | CashFlowEvent::SaleCreated => CashFlowDirection::Income,
        }
    }

    /// Fixed description with the header id appended.
    pub fn description(self, header_id: &str) -> String {
        let label = match self {
            CashFlowEvent::PurchaseCreated => "Purchase received",
            CashFlowEvent::PurchaseDeleted => "Purchase reversed",
            CashFlowEvent::SaleCreated => "Sale completed",
            CashFlowEvent::SaleDeleted => "Sale reversed",
        };
        format!("{label} {header_id}")
    }
}

/// What to record for one event.
#[derive(Debug, Clone)]
pub struct EventEntry<'a> {
    pub event: CashFlowEvent,
    pub header_id: &'a str,
    pub scope: Scope,
    pub user_id: &'a str,
    pub amount: Decimal,
    pub payment_method: &'a PaymentMethod,
}

impl EventEntry<'_> {
    fn to_new_entry(&self) -> NewCashFlowEntry {
        NewCashFlowEntry {
            scope: self.scope.clone(),
            user_id: self.user_id.to_string(),
            amount: self.amount,
            description: self.event.description(self.header_id),
            payment_method: self.payment_method.clone(),
        }
    }
}

/// Records an event entry on the caller's connection or transaction.
pub async fn record_event(
    conn: &mut SqliteConnection,
    entry: &EventEntry<'_>,
) -> LedgerResult<CashFlowEntry> {
    let stored = insert_entry(conn, entry.event.direction(), &entry.to_new_entry()).await?;
    info!(
        entry_id = %stored.id,
        header_id = %entry.header_id,
        direction = %stored.direction,
        amount = %stored.amount,
        "Cash flow recorded"
    );
    Ok(stored)
}

/// Pool-level cash-flow access.
#[derive(Debug, Clone)]
pub struct CashFlowRecorder {
    db: Database,
}

impl CashFlowRecorder {
    pub fn new(db: Database) -> Self {
        CashFlowRecorder { db }
    }

    /// Records an event entry in its own statement.
    pub async fn record(&self, entry: &EventEntry<'_>) -> LedgerResult<CashFlowEntry> {
        let mut conn = self.db.pool().acquire().await.map_err(stockflow_db::DbError::from)?;
        record_event(&mut conn, entry).await
    }

    pub async fn create_income(&self, entry: &NewCashFlowEntry) -> LedgerResult<CashFlowEntry> {
        Ok(self.db.cash_flow().create_income(entry).await?)
    }

    pub async fn create_expense(&self, entry: &NewCashFlowEntry) -> LedgerResult<CashFlowEntry> {
        Ok(self.db.cash_flow().create_expense(entry).await?)
    }

    pub async fn list(&self, filter: &CashFlowFilter) -> LedgerResult<Listed<CashFlowEntry>> {
        Ok(self.db.cash_flow().list(filter).await?)
    }

    pub async fn total_income(&self, scope: &Scope, range: &DateRange) -> LedgerResult<Vec<PaymentTotal>> {
        Ok(self.db.cash_flow().total_income(scope, range).await?)
    }

    pub async fn total_expense(&self, scope: &Scope, range: &DateRange) -> LedgerResult<Vec<PaymentTotal>> {
        Ok(self.db.cash_flow().total_expense(scope, range).await?)
    }

    /// Per payment method `income - expense`.
    pub async fn net_profit(&self, scope: &Scope, range: &DateRange) -> LedgerResult<Vec<PaymentTotal>> {
        Ok(self.db.cash_flow().net_profit(scope, range).await?)
    }

    pub async fn branch_income(
        &self,
        company_id: &str,
        range: &DateRange,
    ) -> LedgerResult<BranchIncomeReport> {
        Ok(self.db.cash_flow().branch_income(company_id, range).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use rust_decimal_macros::dec;

    #[test]
    fn test_event_directions() {
        assert_eq!(CashFlowEvent::PurchaseCreated.direction(), CashFlowDirection::Expense);
        assert_eq!(CashFlowEvent::PurchaseDeleted.direction(), CashFlowDirection::Income);
        assert_eq!(CashFlowEvent::SaleCreated.direction(), CashFlowDirection::Income);
        assert_eq!(CashFlowEvent::SaleDeleted.direction(), CashFlowDirection::Expense);
        assert_eq!(
            CashFlowEvent::SaleDeleted.description("s-1"),
            "Sale reversed s-1"
        );
    }

    #[tokio::test]
    async fn test_record_and_aggregate() {
        let db = testing::db().await;
        let recorder = CashFlowRecorder::new(db.clone());
        let scope = testing::scope();
        let cash = PaymentMethod::new("cash");

        recorder
            .record(&EventEntry {
                event: CashFlowEvent::SaleCreated,
                header_id: "s-1",
                scope: scope.clone(),
                user_id: "u1",
                amount: dec!(120.50),
                payment_method: &cash,
            })
            .await
            .unwrap();
        let expense = recorder
            .record(&EventEntry {
                event: CashFlowEvent::PurchaseCreated,
                header_id: "p-1",
                scope: scope.clone(),
                user_id: "u1",
                amount: dec!(20.25),
                payment_method: &cash,
            })
            .await
            .unwrap();
        assert_eq!(expense.direction, CashFlowDirection::Expense);
        assert_eq!(expense.description, "Purchase received p-1");

        let net = recorder.net_profit(&scope, &DateRange::default()).await.unwrap();
        assert_eq!(net.len(), 1);
        assert_eq!(net[0].total, dec!(100.25));

        let listed = recorder.list(&CashFlowFilter::for_scope(scope.clone())).await.unwrap();
        assert_eq!(listed.total_count, 2);
    }

    #[tokio::test]
    async fn test_negative_amount_rejected() {
        let db = testing::db().await;
        let recorder = CashFlowRecorder::new(db);
        let scope = testing::scope();
        let cash = PaymentMethod::new("cash");

        let err = recorder
            .record(&EventEntry {
                event: CashFlowEvent::SaleCreated,
                header_id: "s-1",
                scope: scope.clone(),
                user_id: "u1",
                amount: dec!(-1),
                payment_method: &cash,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, crate::LedgerError::Validation(_)));
    }
}
