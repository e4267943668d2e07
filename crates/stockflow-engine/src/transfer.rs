//! # Transfer Engine
//!
//! Moves stock between two branches of one company in a single transaction.
//!
//! ## Transaction Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     TransferEngine::transfer                            │
//! │                                                                         │
//! │  validate (items, quantities, branches differ)                         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  BEGIN ─────────────────────────────────────────────────────────────┐  │
//! │  │ 1. ensure transfer category at destination                       │  │
//! │  │ 2. guarded decrement at source, every line                       │  │
//! │  │ 3. find or create by name at destination, then increase          │  │
//! │  │ 4. transfers header + transfer_products lines                    │  │
//! │  COMMIT ◄───────────────────────────────────────────────────────────┘  │
//! │                                                                         │
//! │  Any `?` before COMMIT drops the transaction, which rolls back.        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use stockflow_core::{Listed, NewTransfer, Transfer, TransferFilter};
use stockflow_db::repository::product::{ensure_by_name, ensure_category, fetch_product};
use stockflow_db::repository::stock;
use stockflow_db::repository::transfer::insert_transfer;
use stockflow_db::{Database, DbError, MovedLine};
use tracing::{debug, info};

use crate::error::{LedgerError, LedgerResult};

/// Inter-branch stock transfers.
#[derive(Debug, Clone)]
pub struct TransferEngine {
    db: Database,
    category: String,
}

impl TransferEngine {
    /// `category` names the destination category for products the
    /// destination branch does not stock yet.
    pub fn new(db: Database, category: impl Into<String>) -> Self {
        TransferEngine {
            db,
            category: category.into(),
        }
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    /// Moves every line from the source branch to the destination branch.
    ///
    /// ## Errors
    /// * `Validation` - empty items, non-positive quantity, same branch
    /// * `InsufficientStock` - some source product is short (nothing moved)
    /// * `NotFound` - some product is not stocked at the source
    pub async fn transfer(&self, new: &NewTransfer) -> LedgerResult<Transfer> {
        new.validate()?;
        let source = new.source();
        let dest = new.destination();

        let mut tx = self.db.begin().await?;

        let category =
            ensure_category(&mut *tx, &dest, &self.category, Some(&new.transferred_by)).await?;

        for item in &new.items {
            stock::decrease(&mut *tx, &source, &item.product_id, item.quantity).await?;
        }

        let mut moved = Vec::with_capacity(new.items.len());
        for item in &new.items {
            let template = fetch_product(&mut *tx, &source, &item.product_id)
                .await?
                .ok_or_else(|| LedgerError::not_found("Product", &item.product_id))?;
            let landed =
                ensure_by_name(&mut *tx, &dest, &template, &category.id, &new.transferred_by)
                    .await?;
            stock::increase(&mut *tx, &dest, &landed.id, item.quantity).await?;
            debug!(
                product_id = %item.product_id,
                destination_product_id = %landed.id,
                quantity = item.quantity,
                "Line moved"
            );
            moved.push(MovedLine {
                product_id: item.product_id.clone(),
                destination_product_id: landed.id,
                quantity: item.quantity,
            });
        }

        let transfer = insert_transfer(&mut *tx, new, &moved).await?;
        tx.commit().await.map_err(DbError::from)?;

        info!(
            id = %transfer.id,
            company_id = %transfer.company_id,
            from = %transfer.from_branch_id,
            to = %transfer.to_branch_id,
            lines = transfer.lines.len(),
            "Transfer committed"
        );
        Ok(transfer)
    }

    pub async fn get(&self, company_id: &str, id: &str) -> LedgerResult<Transfer> {
        self.db
            .transfers()
            .get(company_id, id)
            .await?
            .ok_or_else(|| LedgerError::not_found("Transfer", id))
    }

    pub async fn list(&self, filter: &TransferFilter) -> LedgerResult<Listed<Transfer>> {
        Ok(self.db.transfers().list(filter).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use stockflow_core::{Scope, StockDelta, DEFAULT_TRANSFER_CATEGORY};

    fn engine(db: &Database) -> TransferEngine {
        TransferEngine::new(db.clone(), DEFAULT_TRANSFER_CATEGORY)
    }

    fn move_of(from: &str, to: &str, items: &[(&str, i64)]) -> NewTransfer {
        NewTransfer {
            company_id: "acme".into(),
            from_branch_id: from.into(),
            to_branch_id: to.into(),
            transferred_by: "u1".into(),
            description: Some("restock north".into()),
            items: items.iter().map(|(id, q)| StockDelta::new(*id, *q)).collect(),
        }
    }

    async fn dest_count(db: &Database, dest: &Scope, name: &str) -> Option<i64> {
        db.products()
            .get_by_name(dest, name)
            .await
            .unwrap()
            .map(|p| p.total_count)
    }

    #[tokio::test]
    async fn test_transfer_moves_stock_and_records_lines() {
        let db = testing::db().await;
        let main = testing::scope();
        let north = main.with_branch("north");
        let a = testing::product(&db, &main, "A", 10).await;

        let transfer = engine(&db)
            .transfer(&move_of("main", "north", &[(a.id.as_str(), 4)]))
            .await
            .unwrap();

        assert_eq!(db.stock().get_count(&main, &a.id).await.unwrap(), 6);
        assert_eq!(dest_count(&db, &north, "A").await, Some(4));
        assert_eq!(transfer.lines.len(), 1);
        assert_eq!(transfer.lines[0].quantity, 4);
        assert_eq!(transfer.lines[0].product_id, a.id);
        assert_eq!(db.transfers().count("acme").await.unwrap(), 1);

        let landed = db.products().get_by_name(&north, "A").await.unwrap().unwrap();
        assert_eq!(landed.id, transfer.lines[0].destination_product_id);
        assert_eq!(landed.standard_price, a.standard_price);
        assert_eq!(landed.bill_format, a.bill_format);

        let err = engine(&db)
            .transfer(&move_of("main", "north", &[(a.id.as_str(), 7)]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientStock {
                available: 6,
                requested: 7,
                ..
            }
        ));
        assert_eq!(db.stock().get_count(&main, &a.id).await.unwrap(), 6);
        assert_eq!(dest_count(&db, &north, "A").await, Some(4));
        assert_eq!(db.transfers().count("acme").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_company_total_is_conserved() {
        let db = testing::db().await;
        let main = testing::scope();
        let a = testing::product(&db, &main, "A", 10).await;
        let ledger = engine(&db);

        ledger.transfer(&move_of("main", "north", &[(a.id.as_str(), 3)])).await.unwrap();
        ledger.transfer(&move_of("main", "east", &[(a.id.as_str(), 5)])).await.unwrap();
        let north_a = db
            .products()
            .get_by_name(&main.with_branch("north"), "A")
            .await
            .unwrap()
            .unwrap();
        ledger
            .transfer(&move_of("north", "east", &[(north_a.id.as_str(), 2)]))
            .await
            .unwrap();
        let _ = ledger.transfer(&move_of("main", "north", &[(a.id.as_str(), 50)])).await;

        assert_eq!(db.products().company_total("acme", "A").await.unwrap(), 10);
        assert_eq!(dest_count(&db, &main.with_branch("east"), "A").await, Some(7));
    }

    #[tokio::test]
    async fn test_failing_line_leaves_no_trace() {
        let db = testing::db().await;
        let main = testing::scope();
        let north = main.with_branch("north");
        let a = testing::product(&db, &main, "A", 10).await;
        let b = testing::product(&db, &main, "B", 1).await;

        let err = engine(&db)
            .transfer(&move_of("main", "north", &[(a.id.as_str(), 4), (b.id.as_str(), 2)]))
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::InsufficientStock { .. }));
        assert_eq!(db.stock().get_count(&main, &a.id).await.unwrap(), 10);
        assert_eq!(db.stock().get_count(&main, &b.id).await.unwrap(), 1);
        assert!(db.products().list(&north).await.unwrap().is_empty());
        assert!(db.products().list_categories(&north).await.unwrap().is_empty());
        assert_eq!(db.transfers().count("acme").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_existing_destination_row_is_incremented() {
        let db = testing::db().await;
        let main = testing::scope();
        let north = main.with_branch("north");
        let a = testing::product(&db, &main, "A", 10).await;
        let north_a = testing::product(&db, &north, "A", 2).await;

        let transfer = engine(&db)
            .transfer(&move_of("main", "north", &[(a.id.as_str(), 3)]))
            .await
            .unwrap();

        assert_eq!(transfer.lines[0].destination_product_id, north_a.id);
        assert_eq!(db.stock().get_count(&north, &north_a.id).await.unwrap(), 5);
        assert_eq!(db.products().list(&north).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_before_any_io() {
        let db = testing::db().await;
        let main = testing::scope();
        let a = testing::product(&db, &main, "A", 10).await;
        let ledger = engine(&db);

        for bad in [
            move_of("main", "main", &[(a.id.as_str(), 1)]),
            move_of("main", "north", &[]),
            move_of("main", "north", &[(a.id.as_str(), 0)]),
            move_of("main", "north", &[(a.id.as_str(), -3)]),
        ] {
            let err = ledger.transfer(&bad).await.unwrap_err();
            assert!(matches!(err, LedgerError::Validation(_)), "{err}");
        }
        assert_eq!(db.stock().get_count(&main, &a.id).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_unknown_source_product_is_not_found() {
        let db = testing::db().await;

        let err = engine(&db)
            .transfer(&move_of("main", "north", &[("ghost", 1)]))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_get_and_list_by_branch() {
        let db = testing::db().await;
        let main = testing::scope();
        let a = testing::product(&db, &main, "A", 10).await;
        let ledger = engine(&db);

        let first = ledger.transfer(&move_of("main", "north", &[(a.id.as_str(), 1)])).await.unwrap();
        ledger.transfer(&move_of("main", "east", &[(a.id.as_str(), 1)])).await.unwrap();

        let fetched = ledger.get("acme", &first.id).await.unwrap();
        assert_eq!(fetched.id, first.id);
        assert_eq!(fetched.lines, first.lines);
        assert!(matches!(
            ledger.get("other-co", &first.id).await,
            Err(LedgerError::NotFound { .. })
        ));

        let mut filter = TransferFilter::for_company("acme");
        assert_eq!(ledger.list(&filter).await.unwrap().total_count, 2);
        filter.branch_id = Some("north".into());
        let north_only = ledger.list(&filter).await.unwrap();
        assert_eq!(north_only.total_count, 1);
        assert_eq!(north_only.items[0].id, first.id);
        filter.branch_id = Some("main".into());
        assert_eq!(ledger.list(&filter).await.unwrap().total_count, 2);
    }
}
