//! # Batch Replay
//!
//! Applies a JSON batch of purchases, sales, transfers and deletions through
//! the ledger, then prints the net cash flow of every branch it touched.
//!
//! ## Usage
//! ```bash
//! cargo run -p stockflow-engine --bin stockflow-replay -- batch.json
//! cargo run -p stockflow-engine --bin stockflow-replay -- --config ./stockflow.toml batch.json
//! ```
//!
//! ## Batch Format
//! ```json
//! {
//!   "operations": [
//!     { "kind": "purchase", "scope": { "company_id": "acme", "branch_id": "main" },
//!       "supplier_id": "sup-1", "purchased_by": "u1", "payment_method": "cash",
//!       "items": [{ "product_id": "p-1", "quantity": 3, "purchase_price": "1500.005" }] },
//!     { "kind": "delete_purchase", "scope": { "company_id": "acme", "branch_id": "main" },
//!       "id": "#0" }
//!   ]
//! }
//! ```
//! An id of the form `#N` refers to the header created by operation `N`.

use anyhow::{bail, Context};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use stockflow_core::{DateRange, NewPurchase, NewSale, NewTransfer, Scope};
use stockflow_engine::{telemetry, EngineConfig, Ledger, LedgerError};

#[derive(Debug, Deserialize)]
struct Batch {
    operations: Vec<Operation>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Operation {
    Purchase(NewPurchase),
    Sale(NewSale),
    Transfer(NewTransfer),
    DeletePurchase { scope: Scope, id: String },
    DeleteSale { scope: Scope, id: String },
}

impl Operation {
    fn label(&self) -> &'static str {
        match self {
            Operation::Purchase(_) => "purchase",
            Operation::Sale(_) => "sale",
            Operation::Transfer(_) => "transfer",
            Operation::DeletePurchase { .. } => "delete purchase",
            Operation::DeleteSale { .. } => "delete sale",
        }
    }

    /// Branches whose cash flow or stock this operation changes.
    fn scopes(&self) -> Vec<Scope> {
        match self {
            Operation::Purchase(new) => vec![new.scope.clone()],
            Operation::Sale(new) => vec![new.scope.clone()],
            Operation::Transfer(new) => vec![new.source(), new.destination()],
            Operation::DeletePurchase { scope, .. } | Operation::DeleteSale { scope, .. } => {
                vec![scope.clone()]
            }
        }
    }
}

/// Resolves `#N` to the id created by operation `N`.
fn resolve(id: &str, created: &[Option<String>]) -> Result<String, LedgerError> {
    let Some(index) = id.strip_prefix('#') else {
        return Ok(id.to_string());
    };
    index
        .parse::<usize>()
        .ok()
        .and_then(|n| created.get(n).cloned().flatten())
        .ok_or_else(|| LedgerError::Validation(format!("reference {id} has no created header")))
}

async fn apply(
    ledger: &Ledger,
    op: &Operation,
    created: &[Option<String>],
) -> Result<(String, String), LedgerError> {
    match op {
        Operation::Purchase(new) => {
            let purchase = ledger.purchases().create(new).await?;
            let detail = format!("total {}", purchase.total_cost);
            Ok((purchase.id, detail))
        }
        Operation::Sale(new) => {
            let sale = ledger.sales().create(new).await?;
            let detail = format!("total {}", sale.total_sale_price);
            Ok((sale.id, detail))
        }
        Operation::Transfer(new) => {
            let transfer = ledger.transfers().transfer(new).await?;
            let detail = format!(
                "{} -> {}, {} line(s)",
                transfer.from_branch_id,
                transfer.to_branch_id,
                transfer.lines.len()
            );
            Ok((transfer.id, detail))
        }
        Operation::DeletePurchase { scope, id } => {
            let id = resolve(id, created)?;
            let purchase = ledger.purchases().delete(scope, &id).await?;
            Ok((purchase.id, format!("reversed {}", purchase.total_cost)))
        }
        Operation::DeleteSale { scope, id } => {
            let id = resolve(id, created)?;
            let sale = ledger.sales().delete(scope, &id).await?;
            Ok((sale.id, format!("reversed {}", sale.total_sale_price)))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();

    let mut config_path: Option<PathBuf> = None;
    let mut batch_path: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" if i + 1 < args.len() => {
                config_path = Some(PathBuf::from(&args[i + 1]));
                i += 1;
            }
            "--help" | "-h" => {
                println!("Stockflow Batch Replay");
                println!();
                println!("Usage: stockflow-replay [OPTIONS] <BATCH.json>");
                println!();
                println!("Options:");
                println!("  -c, --config <PATH>  Config file (default: ./stockflow.toml if present)");
                println!("  -h, --help           Show this help message");
                return Ok(());
            }
            other => batch_path = Some(PathBuf::from(other)),
        }
        i += 1;
    }

    let Some(batch_path) = batch_path else {
        bail!("missing batch file; see --help");
    };

    let config = EngineConfig::load(config_path.as_deref()).context("loading configuration")?;
    telemetry::init_tracing(&config.logging.filter);

    let raw = std::fs::read_to_string(&batch_path)
        .with_context(|| format!("reading {}", batch_path.display()))?;
    let batch: Batch = serde_json::from_str(&raw)
        .with_context(|| format!("parsing {}", batch_path.display()))?;

    let ledger = Ledger::open(&config).await.context("opening ledger")?;

    println!("Stockflow Batch Replay");
    println!("======================");
    println!("Database:   {}", config.database.path.display());
    println!("Write mode: {}", ledger.write_mode());
    println!("Operations: {}", batch.operations.len());
    println!();

    let mut created: Vec<Option<String>> = Vec::with_capacity(batch.operations.len());
    let mut touched: Vec<Scope> = Vec::new();
    let mut failed = 0usize;

    for (index, op) in batch.operations.iter().enumerate() {
        for scope in op.scopes() {
            if !touched.contains(&scope) {
                touched.push(scope);
            }
        }

        match apply(&ledger, op, &created).await {
            Ok((id, detail)) => {
                println!("  ✓ #{index} {} {id}: {detail}", op.label());
                created.push(Some(id));
            }
            Err(LedgerError::PostCommitSideEffect { header_id, failures }) => {
                failed += 1;
                println!(
                    "  ✗ #{index} {} {header_id}: committed with {} failed side effect(s)",
                    op.label(),
                    failures.len()
                );
                for failure in &failures {
                    println!("      - {failure}");
                }
                created.push(Some(header_id));
            }
            Err(e) => {
                failed += 1;
                println!("  ✗ #{index} {}: {e}", op.label());
                created.push(None);
            }
        }
    }

    println!();
    println!("Net cash flow");
    println!("-------------");
    let recorder = ledger.cash_flow();
    for scope in &touched {
        let totals = recorder.net_profit(scope, &DateRange::default()).await?;
        if totals.is_empty() {
            println!("  {scope}: no entries");
            continue;
        }
        for total in totals {
            println!("  {scope} [{}]: {}", total.payment_method, total.total);
        }
    }

    ledger.database().close().await;

    if failed > 0 {
        bail!("{failed} of {} operation(s) failed", batch.operations.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use stockflow_core::NewProduct;
    use stockflow_db::{Database, DbConfig};
    use stockflow_engine::LedgerSettings;

    const BATCH: &str = r##"{
        "operations": [
            { "kind": "purchase", "scope": { "company_id": "acme", "branch_id": "main" },
              "supplier_id": "sup-1", "purchased_by": "u1", "payment_method": "cash",
              "items": [{ "product_id": "PRODUCT", "quantity": 3, "purchase_price": "1500.005" }] },
            { "kind": "transfer", "company_id": "acme", "from_branch_id": "main",
              "to_branch_id": "north", "transferred_by": "u1",
              "items": [{ "product_id": "PRODUCT", "quantity": 1 }] },
            { "kind": "delete_purchase", "scope": { "company_id": "acme", "branch_id": "main" },
              "id": "#0" }
        ]
    }"##;

    fn created(ids: &[Option<&str>]) -> Vec<Option<String>> {
        ids.iter().map(|id| id.map(str::to_string)).collect()
    }

    #[test]
    fn test_resolve_back_reference() {
        let created = created(&[Some("p-1"), None, Some("s-9")]);

        assert_eq!(resolve("#0", &created).unwrap(), "p-1");
        assert_eq!(resolve("#2", &created).unwrap(), "s-9");
        assert_eq!(resolve("p-77", &created).unwrap(), "p-77");
    }

    #[test]
    fn test_resolve_rejects_missing_headers() {
        let created = created(&[Some("p-1"), None]);

        for bad in ["#1", "#2", "#-1", "#x", "#"] {
            let err = resolve(bad, &created).unwrap_err();
            assert!(matches!(err, LedgerError::Validation(_)), "{bad}: {err}");
        }
    }

    #[test]
    fn test_batch_parses_and_lists_touched_scopes() {
        let batch: Batch = serde_json::from_str(BATCH).unwrap();
        assert_eq!(batch.operations.len(), 3);

        let labels: Vec<&str> = batch.operations.iter().map(Operation::label).collect();
        assert_eq!(labels, vec!["purchase", "transfer", "delete purchase"]);

        let main = Scope::new("acme", "main");
        assert_eq!(batch.operations[0].scopes(), vec![main.clone()]);
        assert_eq!(
            batch.operations[1].scopes(),
            vec![main.clone(), Scope::new("acme", "north")]
        );
        assert_eq!(batch.operations[2].scopes(), vec![main]);
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let raw = r#"{ "operations": [{ "kind": "refund", "id": "x" }] }"#;
        assert!(serde_json::from_str::<Batch>(raw).is_err());
    }

    #[tokio::test]
    async fn test_apply_follows_back_references() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let ledger = Ledger::new(db.clone(), LedgerSettings::default());
        let main = Scope::new("acme", "main");
        let product = ledger
            .products()
            .insert(&NewProduct {
                scope: main.clone(),
                category_id: None,
                name: "Rice".into(),
                bill_format: None,
                image_url: None,
                incoming_price: Decimal::new(1000, 2),
                standard_price: Decimal::new(1500, 2),
                initial_count: 0,
                created_by: None,
            })
            .await
            .unwrap();

        let batch: Batch = serde_json::from_str(&BATCH.replace("PRODUCT", &product.id)).unwrap();
        let mut created: Vec<Option<String>> = Vec::new();
        let mut outcomes = Vec::new();
        for op in &batch.operations {
            let outcome = apply(&ledger, op, &created).await;
            created.push(outcome.as_ref().ok().map(|(id, _)| id.clone()));
            outcomes.push(outcome);
        }

        let (purchase_id, detail) = outcomes[0].as_ref().unwrap();
        assert_eq!(detail, "total 4500.02");
        assert!(outcomes[1].is_ok());
        // Two of the three purchased units are left; reversing needs all three.
        assert!(matches!(
            outcomes[2],
            Err(LedgerError::InsufficientStock {
                available: 2,
                requested: 3,
                ..
            })
        ));
        assert!(ledger.purchases().get(&main, purchase_id).await.is_ok());
        assert_eq!(ledger.stock().get_count(&main, &product.id).await.unwrap(), 2);
    }
}
