//! # Purchase Service
//!
//! Receiving goods: price the lines, store the purchase, book the expense,
//! add the stock. Deleting a purchase undoes the stock and books the
//! matching income.
//!
//! ## Create Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        PurchaseService::create                          │
//! │                                                                         │
//! │  NewPurchase ──► validate ──► PricingCalculator::lenient()             │
//! │                                 (zero-quantity rows skipped + warned)  │
//! │       │                                                                 │
//! │       ├── transactional ──► BEGIN                                       │
//! │       │                       insert header + items                     │
//! │       │                       expense entry                             │
//! │       │                       stock += qty per product                  │
//! │       │                     COMMIT                                      │
//! │       │                                                                 │
//! │       └── fan_out ────────► BEGIN; header + items; COMMIT               │
//! │                             expense entry                               │
//! │                             stock += qty per line (worker pool)         │
//! │                             failures → PostCommitSideEffect             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Delete Flow
//! load → check every item can come back out of stock → income entry →
//! bulk decrease → delete header and items.

use stockflow_core::{
    Listed, NewPurchase, PricedTotal, PricingCalculator, Purchase, PurchaseFilter, PurchasePatch,
    Scope, StockDelta,
};
use stockflow_db::repository::purchase::{delete_purchase, fetch_purchase, insert_purchase};
use stockflow_db::repository::stock;
use stockflow_db::{Database, DbError};
use tracing::{error, info};

use crate::cash_flow::{record_event, CashFlowEvent, CashFlowRecorder, EventEntry};
use crate::config::WriteMode;
use crate::error::{LedgerError, LedgerResult, SideEffectFailure, SideEffectStep};
use crate::fanout::FanOut;
use crate::movement::{self, StockDirection};

/// Purchase create/delete with paired cash flow and stock.
#[derive(Debug, Clone)]
pub struct PurchaseService {
    db: Database,
    mode: WriteMode,
    fan_out: FanOut,
    pricing: PricingCalculator,
}

impl PurchaseService {
    pub fn new(db: Database, mode: WriteMode, fan_out: FanOut) -> Self {
        PurchaseService {
            db,
            mode,
            fan_out,
            pricing: PricingCalculator::lenient(),
        }
    }

    pub fn write_mode(&self) -> WriteMode {
        self.mode
    }

    /// Stores a purchase and applies its cash flow and stock.
    pub async fn create(&self, new: &NewPurchase) -> LedgerResult<Purchase> {
        new.validate()?;
        let priced = self.pricing.price(&new.line_items())?;

        let purchase = match self.mode {
            WriteMode::Transactional => self.create_transactional(new, &priced).await?,
            WriteMode::FanOut => self.create_fan_out(new, &priced).await?,
        };

        info!(
            id = %purchase.id,
            scope = %new.scope,
            total_cost = %purchase.total_cost,
            items = purchase.items.len(),
            skipped = priced.skipped.len(),
            mode = %self.mode,
            "Purchase created"
        );
        Ok(purchase)
    }

    async fn create_transactional(
        &self,
        new: &NewPurchase,
        priced: &PricedTotal,
    ) -> LedgerResult<Purchase> {
        let mut tx = self.db.begin().await?;

        let purchase = insert_purchase(&mut *tx, new, priced).await?;
        record_event(&mut *tx, &cash_entry(&purchase, CashFlowEvent::PurchaseCreated)).await?;
        movement::apply_in_tx(
            &mut *tx,
            &new.scope,
            &movement::priced_deltas(priced),
            StockDirection::Increase,
        )
        .await?;

        tx.commit().await.map_err(DbError::from)?;
        Ok(purchase)
    }

    async fn create_fan_out(&self, new: &NewPurchase, priced: &PricedTotal) -> LedgerResult<Purchase> {
        let mut tx = self.db.begin().await?;
        let purchase = insert_purchase(&mut *tx, new, priced).await?;
        tx.commit().await.map_err(DbError::from)?;

        let recorded = CashFlowRecorder::new(self.db.clone())
            .record(&cash_entry(&purchase, CashFlowEvent::PurchaseCreated))
            .await;
        if let Err(e) = recorded {
            error!(id = %purchase.id, error = %e, "Expense entry failed after commit");
            return Err(LedgerError::PostCommitSideEffect {
                header_id: purchase.id,
                failures: vec![SideEffectFailure::new(SideEffectStep::CashFlow, e)],
            });
        }

        let failures = movement::fan_out_stock(
            &self.db,
            self.fan_out,
            &new.scope,
            movement::priced_deltas(priced),
            StockDirection::Increase,
        )
        .await;
        if !failures.is_empty() {
            return Err(LedgerError::PostCommitSideEffect {
                header_id: purchase.id,
                failures,
            });
        }

        Ok(purchase)
    }

    /// Deletes a purchase, taking its stock back out and booking income.
    ///
    /// ## Errors
    /// * `NotFound` - no such purchase in the scope
    /// * `InsufficientStock` - some of the goods were already sold
    pub async fn delete(&self, scope: &Scope, id: &str) -> LedgerResult<Purchase> {
        scope.validate()?;

        let purchase = match self.mode {
            WriteMode::Transactional => self.delete_transactional(scope, id).await?,
            WriteMode::FanOut => self.delete_fan_out(scope, id).await?,
        };

        info!(
            id = %purchase.id,
            scope = %scope,
            total_cost = %purchase.total_cost,
            mode = %self.mode,
            "Purchase deleted"
        );
        Ok(purchase)
    }

    async fn delete_transactional(&self, scope: &Scope, id: &str) -> LedgerResult<Purchase> {
        let mut tx = self.db.begin_immediate().await?;

        let purchase = fetch_purchase(&mut *tx, scope, id)
            .await?
            .ok_or_else(|| LedgerError::not_found("Purchase", id))?;
        let deltas = item_deltas(&purchase);

        movement::ensure_available(&mut *tx, scope, &deltas).await?;
        record_event(&mut *tx, &cash_entry(&purchase, CashFlowEvent::PurchaseDeleted)).await?;
        stock::bulk_decrease(&mut *tx, scope, &deltas).await?;
        delete_purchase(&mut *tx, scope, id).await?;

        tx.commit().await.map_err(DbError::from)?;
        Ok(purchase)
    }

    async fn delete_fan_out(&self, scope: &Scope, id: &str) -> LedgerResult<Purchase> {
        let (purchase, deltas) = {
            let mut conn = self.db.pool().acquire().await.map_err(DbError::from)?;
            let purchase = fetch_purchase(&mut conn, scope, id)
                .await?
                .ok_or_else(|| LedgerError::not_found("Purchase", id))?;
            let deltas = item_deltas(&purchase);
            movement::ensure_available(&mut conn, scope, &deltas).await?;
            (purchase, deltas)
        };

        CashFlowRecorder::new(self.db.clone())
            .record(&cash_entry(&purchase, CashFlowEvent::PurchaseDeleted))
            .await?;

        if let Err(e) = self.db.stock().bulk_decrease(scope, &deltas).await {
            let e = LedgerError::from(e);
            error!(id = %purchase.id, error = %e, "Stock reversal failed after income entry");
            return Err(LedgerError::PostCommitSideEffect {
                header_id: purchase.id,
                failures: movement::all_failed(&deltas, &e),
            });
        }

        let deleted = async {
            let mut tx = self.db.begin().await?;
            delete_purchase(&mut *tx, scope, id).await?;
            tx.commit().await?;
            Ok::<(), DbError>(())
        }
        .await;
        if let Err(e) = deleted {
            error!(id = %purchase.id, error = %e, "Header delete failed after stock reversal");
            return Err(LedgerError::PostCommitSideEffect {
                header_id: purchase.id,
                failures: vec![SideEffectFailure::new(SideEffectStep::Header, e)],
            });
        }

        Ok(purchase)
    }

    /// Gets a purchase with its items.
    pub async fn get(&self, scope: &Scope, id: &str) -> LedgerResult<Purchase> {
        self.db
            .purchases()
            .get(scope, id)
            .await?
            .ok_or_else(|| LedgerError::not_found("Purchase", id))
    }

    pub async fn list(&self, filter: &PurchaseFilter) -> LedgerResult<Listed<Purchase>> {
        Ok(self.db.purchases().list(filter).await?)
    }

    /// Changes supplier, description or payment method. Quantities and
    /// prices cannot change; delete and recreate instead.
    pub async fn update(&self, scope: &Scope, id: &str, patch: &PurchasePatch) -> LedgerResult<Purchase> {
        if patch.is_empty() {
            return self.get(scope, id).await;
        }
        let purchase = self.db.purchases().update(scope, id, patch).await?;
        info!(id = %id, scope = %scope, "Purchase updated");
        Ok(purchase)
    }
}

fn item_deltas(purchase: &Purchase) -> Vec<StockDelta> {
    purchase
        .items
        .iter()
        .map(|item| StockDelta::new(&item.product_id, item.quantity))
        .collect()
}

fn cash_entry(purchase: &Purchase, event: CashFlowEvent) -> EventEntry<'_> {
    EventEntry {
        event,
        header_id: &purchase.id,
        scope: purchase.scope(),
        user_id: &purchase.purchased_by,
        amount: purchase.total_cost,
        payment_method: &purchase.payment_method,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
