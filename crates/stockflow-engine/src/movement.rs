//! Stock-movement helpers shared by the purchase and sale services.

use sqlx::SqliteConnection;
use stockflow_core::pricing::PricedTotal;
use stockflow_core::{Scope, StockDelta};
use stockflow_db::repository::stock;
use stockflow_db::Database;
use tracing::{error, warn};

use crate::error::{LedgerError, LedgerResult, SideEffectFailure, SideEffectStep};
use crate::fanout::FanOut;

/// Which way a stock update moves the counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockDirection {
    Increase,
    Decrease,
}

/// One delta per priced line, in line order.
pub fn priced_deltas(priced: &PricedTotal) -> Vec<StockDelta> {
    priced
        .lines
        .iter()
        .map(|line| StockDelta::new(&line.product_id, line.quantity))
        .collect()
}

/// Applies every delta on the caller's transaction, one guarded statement
/// per distinct product so a shortfall names the product.
pub async fn apply_in_tx(
    conn: &mut SqliteConnection,
    scope: &Scope,
    deltas: &[StockDelta],
    direction: StockDirection,
) -> LedgerResult<()> {
    for (product_id, quantity) in stock::merge_deltas(deltas)? {
        match direction {
            StockDirection::Increase => stock::increase(conn, scope, &product_id, quantity).await?,
            StockDirection::Decrease => stock::decrease(conn, scope, &product_id, quantity).await?,
        };
    }
    Ok(())
}

/// Fails with `InsufficientStock` unless every product can give up its
/// (merged) quantity. Read-only.
pub async fn ensure_available(
    conn: &mut SqliteConnection,
    scope: &Scope,
    deltas: &[StockDelta],
) -> LedgerResult<()> {
    for (product_id, quantity) in stock::merge_deltas(deltas)? {
        if !stock::check_available(conn, scope, &product_id, quantity).await? {
            let available = stock::get_count(conn, scope, &product_id).await?;
            warn!(
                product_id = %product_id,
                available,
                requested = quantity,
                "Reversal would drive stock negative"
            );
            return Err(LedgerError::InsufficientStock {
                product_id,
                available,
                requested: quantity,
            });
        }
    }
    Ok(())
}

/// Fails with `NotFound` if any product is missing from the scope.
pub async fn ensure_exists(
    conn: &mut SqliteConnection,
    scope: &Scope,
    deltas: &[StockDelta],
) -> LedgerResult<()> {
    for product_id in stock::merge_deltas(deltas)?.keys() {
        stock::get_count(conn, scope, product_id).await?;
    }
    Ok(())
}

/// Runs one pool-level stock update per delta across the worker pool and
/// returns a failure for every delta that did not apply.
pub async fn fan_out_stock(
    db: &Database,
    fan_out: FanOut,
    scope: &Scope,
    deltas: Vec<StockDelta>,
    direction: StockDirection,
) -> Vec<SideEffectFailure> {
    let ledger = db.stock();
    let scope = scope.clone();

    let report = fan_out
        .run(deltas, move |delta: StockDelta| {
            let ledger = ledger.clone();
            let scope = scope.clone();
            async move {
                let result = match direction {
                    StockDirection::Increase => {
                        ledger.increase(&scope, &delta.product_id, delta.quantity).await
                    }
                    StockDirection::Decrease => {
                        ledger.decrease(&scope, &delta.product_id, delta.quantity).await
                    }
                };
                result.map_err(LedgerError::from)
            }
        })
        .await;

    report
        .failed
        .into_iter()
        .map(|(delta, e)| {
            error!(
                product_id = %delta.product_id,
                quantity = delta.quantity,
                error = %e,
                "Stock update failed after commit"
            );
            SideEffectFailure::new(
                SideEffectStep::Stock {
                    product_id: delta.product_id,
                    quantity: delta.quantity,
                },
                e,
            )
        })
        .collect()
}

/// Every delta marked failed with the same reason; used when a bulk
/// statement rolled back as a whole.
pub fn all_failed(deltas: &[StockDelta], reason: &LedgerError) -> Vec<SideEffectFailure> {
    deltas
        .iter()
        .map(|delta| {
            SideEffectFailure::new(
                SideEffectStep::Stock {
                    product_id: delta.product_id.clone(),
                    quantity: delta.quantity,
                },
                reason,
            )
        })
        .collect()
}
