//! # Sale Service
//!
//! Selling goods: price the lines strictly, store the sale, book the income,
//! take the stock out. Deleting a sale puts the stock back and books the
//! matching expense.
//!
//! ## Create Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          SaleService::create                            │
//! │                                                                         │
//! │  NewSale ──► validate ──► PricingCalculator::strict()                  │
//! │                             (zero quantity rejects the whole sale)     │
//! │       │                                                                 │
//! │       ├── transactional ──► BEGIN                                       │
//! │       │                       insert header + items                     │
//! │       │                       income entry                              │
//! │       │                       stock -= qty per product (guarded)        │
//! │       │                     COMMIT   (any shortfall rolls back all)     │
//! │       │                                                                 │
//! │       └── fan_out ────────► BEGIN; header + items; COMMIT               │
//! │                             income entry                                │
//! │                             stock -= qty per line (worker pool)         │
//! │                             shortfalls → PostCommitSideEffect           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use stockflow_core::{
    Listed, NewSale, PricedTotal, PricingCalculator, Sale, SaleFilter, SalePatch, Scope, StockDelta,
};
use stockflow_db::repository::sale::{delete_sale, fetch_sale, insert_sale};
use stockflow_db::repository::stock;
use stockflow_db::{Database, DbError};
use tracing::{error, info};

use crate::cash_flow::{record_event, CashFlowEvent, CashFlowRecorder, EventEntry};
use crate::config::WriteMode;
use crate::error::{LedgerError, LedgerResult, SideEffectFailure, SideEffectStep};
use crate::fanout::FanOut;
use crate::movement::{self, StockDirection};

/// Sale create/delete with paired cash flow and stock.
#[derive(Debug, Clone)]
pub struct SaleService {
    db: Database,
    mode: WriteMode,
    fan_out: FanOut,
    pricing: PricingCalculator,
}

impl SaleService {
    pub fn new(db: Database, mode: WriteMode, fan_out: FanOut) -> Self {
        SaleService {
            db,
            mode,
            fan_out,
            pricing: PricingCalculator::strict(),
        }
    }

    pub fn write_mode(&self) -> WriteMode {
        self.mode
    }

    /// Stores a sale and applies its cash flow and stock.
    ///
    /// ## Errors
    /// * `Validation` - bad header or line item (nothing stored)
    /// * `InsufficientStock` - transactional mode, some product is short
    /// * `PostCommitSideEffect` - fan-out mode, the header is stored but
    ///   some later step failed
    pub async fn create(&self, new: &NewSale) -> LedgerResult<Sale> {
        new.validate()?;
        let priced = self.pricing.price(&new.line_items())?;

        let sale = match self.mode {
            WriteMode::Transactional => self.create_transactional(new, &priced).await?,
            WriteMode::FanOut => self.create_fan_out(new, &priced).await?,
        };

        info!(
            id = %sale.id,
            scope = %new.scope,
            total_sale_price = %sale.total_sale_price,
            items = sale.items.len(),
            mode = %self.mode,
            "Sale created"
        );
        Ok(sale)
    }

    async fn create_transactional(&self, new: &NewSale, priced: &PricedTotal) -> LedgerResult<Sale> {
        let mut tx = self.db.begin().await?;

        let sale = insert_sale(&mut *tx, new, priced).await?;
        record_event(&mut *tx, &cash_entry(&sale, CashFlowEvent::SaleCreated)).await?;
        movement::apply_in_tx(
            &mut *tx,
            &new.scope,
            &movement::priced_deltas(priced),
            StockDirection::Decrease,
        )
        .await?;

        tx.commit().await.map_err(DbError::from)?;
        Ok(sale)
    }

    async fn create_fan_out(&self, new: &NewSale, priced: &PricedTotal) -> LedgerResult<Sale> {
        let mut tx = self.db.begin().await?;
        let sale = insert_sale(&mut *tx, new, priced).await?;
        tx.commit().await.map_err(DbError::from)?;

        let recorded = CashFlowRecorder::new(self.db.clone())
            .record(&cash_entry(&sale, CashFlowEvent::SaleCreated))
            .await;
        if let Err(e) = recorded {
            error!(id = %sale.id, error = %e, "Income entry failed after commit");
            return Err(LedgerError::PostCommitSideEffect {
                header_id: sale.id,
                failures: vec![SideEffectFailure::new(SideEffectStep::CashFlow, e)],
            });
        }

        let failures = movement::fan_out_stock(
            &self.db,
            self.fan_out,
            &new.scope,
            movement::priced_deltas(priced),
            StockDirection::Decrease,
        )
        .await;
        if !failures.is_empty() {
            return Err(LedgerError::PostCommitSideEffect {
                header_id: sale.id,
                failures,
            });
        }

        Ok(sale)
    }

    /// Deletes a sale, putting its stock back and booking the expense.
    pub async fn delete(&self, scope: &Scope, id: &str) -> LedgerResult<Sale> {
        scope.validate()?;

        let sale = match self.mode {
            WriteMode::Transactional => self.delete_transactional(scope, id).await?,
            WriteMode::FanOut => self.delete_fan_out(scope, id).await?,
        };

        info!(
            id = %sale.id,
            scope = %scope,
            total_sale_price = %sale.total_sale_price,
            mode = %self.mode,
            "Sale deleted"
        );
        Ok(sale)
    }

    async fn delete_transactional(&self, scope: &Scope, id: &str) -> LedgerResult<Sale> {
        let mut tx = self.db.begin_immediate().await?;

        let sale = fetch_sale(&mut *tx, scope, id)
            .await?
            .ok_or_else(|| LedgerError::not_found("Sale", id))?;
        let deltas = item_deltas(&sale);

        movement::ensure_exists(&mut *tx, scope, &deltas).await?;
        record_event(&mut *tx, &cash_entry(&sale, CashFlowEvent::SaleDeleted)).await?;
        stock::bulk_increase(&mut *tx, scope, &deltas).await?;
        delete_sale(&mut *tx, scope, id).await?;

        tx.commit().await.map_err(DbError::from)?;
        Ok(sale)
    }

    async fn delete_fan_out(&self, scope: &Scope, id: &str) -> LedgerResult<Sale> {
        let (sale, deltas) = {
            let mut conn = self.db.pool().acquire().await.map_err(DbError::from)?;
            let sale = fetch_sale(&mut conn, scope, id)
                .await?
                .ok_or_else(|| LedgerError::not_found("Sale", id))?;
            let deltas = item_deltas(&sale);
            movement::ensure_exists(&mut conn, scope, &deltas).await?;
            (sale, deltas)
        };

        CashFlowRecorder::new(self.db.clone())
            .record(&cash_entry(&sale, CashFlowEvent::SaleDeleted))
            .await?;

        if let Err(e) = self.db.stock().bulk_increase(scope, &deltas).await {
            let e = LedgerError::from(e);
            error!(id = %sale.id, error = %e, "Stock restore failed after expense entry");
            return Err(LedgerError::PostCommitSideEffect {
                header_id: sale.id,
                failures: movement::all_failed(&deltas, &e),
            });
        }

        let deleted = async {
            let mut tx = self.db.begin().await?;
            delete_sale(&mut *tx, scope, id).await?;
            tx.commit().await?;
            Ok::<(), DbError>(())
        }
        .await;
        if let Err(e) = deleted {
            error!(id = %sale.id, error = %e, "Header delete failed after stock restore");
            return Err(LedgerError::PostCommitSideEffect {
                header_id: sale.id,
                failures: vec![SideEffectFailure::new(SideEffectStep::Header, e)],
            });
        }

        Ok(sale)
    }

    pub async fn get(&self, scope: &Scope, id: &str) -> LedgerResult<Sale> {
        self.db
            .sales()
            .get(scope, id)
            .await?
            .ok_or_else(|| LedgerError::not_found("Sale", id))
    }

    pub async fn list(&self, filter: &SaleFilter) -> LedgerResult<Listed<Sale>> {
        Ok(self.db.sales().list(filter).await?)
    }

    /// Changes client or payment method.
    pub async fn update(&self, scope: &Scope, id: &str, patch: &SalePatch) -> LedgerResult<Sale> {
        if patch.is_empty() {
            return self.get(scope, id).await;
        }
        let sale = self.db.sales().update(scope, id, patch).await?;
        info!(id = %id, scope = %scope, "Sale updated");
        Ok(sale)
    }
}

fn item_deltas(sale: &Sale) -> Vec<StockDelta> {
    sale.items
        .iter()
        .map(|item| StockDelta::new(&item.product_id, item.quantity))
        .collect()
}

fn cash_entry(sale: &Sale, event: CashFlowEvent) -> EventEntry<'_> {
    EventEntry {
        event,
        header_id: &sale.id,
        scope: sale.scope(),
        user_id: &sale.sold_by,
        amount: sale.total_sale_price,
        payment_method: &sale.payment_method,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use stockflow_core::{CashFlowDirection, CashFlowFilter, NewSaleItem, PaymentMethod};
    use stockflow_db::DbConfig;

    fn sale_of(scope: &Scope, items: &[(&str, i64, Decimal)]) -> NewSale {
        NewSale {
            scope: scope.clone(),
            client_id: "walk-in".into(),
            sold_by: "cashier-1".into(),
            payment_method: PaymentMethod::new("cash"),
            items: items
                .iter()
                .map(|(id, quantity, price)| NewSaleItem {
                    product_id: id.to_string(),
                    quantity: *quantity,
                    sale_price: *price,
                })
                .collect(),
        }
    }

    fn service(db: &Database, mode: WriteMode) -> SaleService {
        SaleService::new(db.clone(), mode, FanOut::new(4))
    }

    async fn entry_count(db: &Database, scope: &Scope) -> i64 {
        db.cash_flow()
            .list(&CashFlowFilter::for_scope(scope.clone()))
            .await
            .unwrap()
            .total_count
    }

    #[tokio::test]
    async fn test_create_books_income_and_takes_stock() {
        let db = testing::db().await;
        let scope = testing::scope();
        let a = testing::product(&db, &scope, "A", 10).await;

        let sale = service(&db, WriteMode::Transactional)
            .create(&sale_of(&scope, &[(a.id.as_str(), 4, dec!(2.49))]))
            .await
            .unwrap();

        assert_eq!(sale.total_sale_price, dec!(9.96));
        assert_eq!(db.stock().get_count(&scope, &a.id).await.unwrap(), 6);

        let entries = db
            .cash_flow()
            .list(&CashFlowFilter::for_scope(scope.clone()))
            .await
            .unwrap();
        assert_eq!(entries.total_count, 1);
        assert_eq!(entries.items[0].direction, CashFlowDirection::Income);
        assert_eq!(entries.items[0].amount, dec!(9.96));
        assert_eq!(entries.items[0].user_id, "cashier-1");
    }

    #[tokio::test]
    async fn test_shortfall_rolls_back_whole_sale() {
        let db = testing::db().await;
        let scope = testing::scope();
        let a = testing::product(&db, &scope, "A", 10).await;
        let b = testing::product(&db, &scope, "B", 1).await;

        let err = service(&db, WriteMode::Transactional)
            .create(&sale_of(&scope, &[(a.id.as_str(), 3, dec!(1)), (b.id.as_str(), 2, dec!(1))]))
            .await
            .unwrap_err();

        match err {
            LedgerError::InsufficientStock {
                product_id,
                available,
                requested,
            } => {
                assert_eq!(product_id, b.id);
                assert_eq!(available, 1);
                assert_eq!(requested, 2);
            }
            other => panic!("expected InsufficientStock, got {other}"),
        }

        assert_eq!(db.stock().get_count(&scope, &a.id).await.unwrap(), 10);
        assert_eq!(db.stock().get_count(&scope, &b.id).await.unwrap(), 1);
        assert_eq!(entry_count(&db, &scope).await, 0);
        let sales = db.sales().list(&SaleFilter::for_scope(scope.clone())).await.unwrap();
        assert_eq!(sales.total_count, 0);
    }

    #[tokio::test]
    async fn test_fan_out_shortfall_keeps_header() {
        let db = testing::db().await;
        let scope = testing::scope();
        let a = testing::product(&db, &scope, "A", 10).await;
        let b = testing::product(&db, &scope, "B", 1).await;

        let err = service(&db, WriteMode::FanOut)
            .create(&sale_of(&scope, &[(a.id.as_str(), 3, dec!(1)), (b.id.as_str(), 2, dec!(1))]))
            .await
            .unwrap_err();

        assert!(err.is_post_commit());
        let LedgerError::PostCommitSideEffect { header_id, failures } = err else {
            panic!("expected PostCommitSideEffect");
        };
        assert_eq!(failures.len(), 1);
        assert_eq!(
            failures[0].step,
            SideEffectStep::Stock {
                product_id: b.id.clone(),
                quantity: 2
            }
        );

        assert!(db.sales().get(&scope, &header_id).await.unwrap().is_some());
        assert_eq!(db.stock().get_count(&scope, &a.id).await.unwrap(), 7);
        assert_eq!(db.stock().get_count(&scope, &b.id).await.unwrap(), 1);
        assert_eq!(entry_count(&db, &scope).await, 1);
    }

    #[tokio::test]
    async fn test_zero_quantity_rejected() {
        let db = testing::db().await;
        let scope = testing::scope();
        let a = testing::product(&db, &scope, "A", 10).await;

        let err = service(&db, WriteMode::Transactional)
            .create(&sale_of(&scope, &[(a.id.as_str(), 0, dec!(1))]))
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::Validation(_)));
        assert_eq!(db.stock().get_count(&scope, &a.id).await.unwrap(), 10);
        assert_eq!(entry_count(&db, &scope).await, 0);
    }

    #[tokio::test]
    async fn test_create_then_delete_restores_counts() {
        for mode in [WriteMode::Transactional, WriteMode::FanOut] {
            let db = testing::db().await;
            let scope = testing::scope();
            let a = testing::product(&db, &scope, "A", 10).await;
            let svc = service(&db, mode);

            let sale = svc
                .create(&sale_of(&scope, &[(a.id.as_str(), 2, dec!(5)), (a.id.as_str(), 3, dec!(5))]))
                .await
                .unwrap();
            assert_eq!(db.stock().get_count(&scope, &a.id).await.unwrap(), 5, "{mode}");

            let deleted = svc.delete(&scope, &sale.id).await.unwrap();
            assert_eq!(deleted.id, sale.id);
            assert_eq!(db.stock().get_count(&scope, &a.id).await.unwrap(), 10, "{mode}");
            assert!(db.sales().get(&scope, &sale.id).await.unwrap().is_none());

            let net = db
                .cash_flow()
                .net_profit(&scope, &Default::default())
                .await
                .unwrap();
            assert!(net.iter().all(|t| t.total.is_zero()), "{mode}: {net:?}");
        }
    }

    #[tokio::test]
    async fn test_delete_unknown_sale_is_not_found() {
        let db = testing::db().await;
        let scope = testing::scope();

        let err = service(&db, WriteMode::FanOut)
            .delete(&scope, "missing")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { .. }));
        assert_eq!(entry_count(&db, &scope).await, 0);
    }

    #[tokio::test]
    async fn test_update_client() {
        let db = testing::db().await;
        let scope = testing::scope();
        let a = testing::product(&db, &scope, "A", 3).await;
        let svc = service(&db, WriteMode::Transactional);

        let sale = svc
            .create(&sale_of(&scope, &[(a.id.as_str(), 1, dec!(5))]))
            .await
            .unwrap();
        let updated = svc
            .update(
                &scope,
                &sale.id,
                &SalePatch {
                    client_id: Some("client-9".into()),
                    payment_method: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.client_id, "client-9");
        assert_eq!(updated.total_sale_price, sale.total_sale_price);
        assert_eq!(db.stock().get_count(&scope, &a.id).await.unwrap(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sales_never_oversell() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(DbConfig::new(dir.path().join("ledger.db")).max_connections(8))
            .await
            .unwrap();
        let scope = testing::scope();
        let a = testing::product(&db, &scope, "A", 10).await;
        let svc = Arc::new(service(&db, WriteMode::Transactional));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let svc = svc.clone();
            let new = sale_of(&scope, &[(a.id.as_str(), 1, dec!(1))]);
            handles.push(tokio::spawn(async move { svc.create(&new).await }));
        }

        let mut ok = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(LedgerError::InsufficientStock { .. }) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(ok, 10);
        assert_eq!(db.stock().get_count(&scope, &a.id).await.unwrap(), 0);
        assert_eq!(entry_count(&db, &scope).await, 10);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_deletes_all_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(DbConfig::new(dir.path().join("ledger.db")).max_connections(8))
            .await
            .unwrap();
        let scope = testing::scope();
        let a = testing::product(&db, &scope, "A", 20).await;
        let svc = Arc::new(service(&db, WriteMode::Transactional));

        let mut ids = Vec::new();
        for _ in 0..20 {
            let sale = svc
                .create(&sale_of(&scope, &[(a.id.as_str(), 1, dec!(1))]))
                .await
                .unwrap();
            ids.push(sale.id);
        }
        assert_eq!(db.stock().get_count(&scope, &a.id).await.unwrap(), 0);

        let mut handles = Vec::new();
        for id in ids {
            let svc = svc.clone();
            let scope = scope.clone();
            handles.push(tokio::spawn(async move { svc.delete(&scope, &id).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(db.stock().get_count(&scope, &a.id).await.unwrap(), 20);
        assert_eq!(entry_count(&db, &scope).await, 40);
        let sales = db.sales().list(&SaleFilter::for_scope(scope.clone())).await.unwrap();
        assert_eq!(sales.total_count, 0);
    }
}
