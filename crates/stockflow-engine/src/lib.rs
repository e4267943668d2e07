//! # stockflow-engine: Stock & Money Movement for Stockflow
//!
//! Purchases, sales and inter-branch transfers built on the stockflow-db
//! repositories. Every operation that moves stock also moves money (or, for
//! transfers, records an audit trail), and this crate keeps the two in step.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Ledger (facade)                                 │
//! │                                                                         │
//! │   EngineConfig ──► Database::new ──► Ledger { db, settings }            │
//! │                                                                         │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │PurchaseService │  │  SaleService   │  │   TransferEngine       │    │
//! │  │                │  │                │  │                        │    │
//! │  │ lenient pricing│  │ strict pricing │  │ one tx per transfer    │    │
//! │  │ expense + stock│  │ income − stock │  │ source − / dest +      │    │
//! │  └───────┬────────┘  └───────┬────────┘  └────────────────────────┘    │
//! │          │                   │                                          │
//! │          ▼                   ▼                                          │
//! │  ┌────────────────┐  ┌────────────────┐                                │
//! │  │CashFlowRecorder│  │ movement +     │                                │
//! │  │                │  │ FanOut pool    │                                │
//! │  └────────────────┘  └────────────────┘                                │
//! │                                                                         │
//! │  WRITE MODES:                                                          │
//! │  • transactional - header, cash flow and stock in one transaction      │
//! │  • fan_out - header commits first, then cash flow, then per-item       │
//! │    stock across a bounded worker pool; failures are reported as        │
//! │    PostCommitSideEffect with the committed header id                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`purchase`] - `PurchaseService`
//! - [`sale`] - `SaleService`
//! - [`transfer`] - `TransferEngine`
//! - [`cash_flow`] - `CashFlowRecorder` and the event → entry mapping
//! - [`movement`] - stock helpers shared by purchases and sales
//! - [`fanout`] - bounded Semaphore + JoinSet worker pool
//! - [`config`] - `EngineConfig` (TOML + `STOCKFLOW_*` env)
//! - [`telemetry`] - tracing-subscriber setup for binaries
//! - [`error`] - `LedgerError`, `ConfigError`
//!
//! ## Usage
//! ```rust,ignore
//! let config = EngineConfig::load(None)?;
//! let ledger = Ledger::open(&config).await?;
//! let sale = ledger.sales().create(&new_sale).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod cash_flow;
pub mod config;
pub mod error;
pub mod fanout;
pub mod movement;
pub mod purchase;
pub mod sale;
pub mod telemetry;
pub mod transfer;

// =============================================================================
// Re-exports
// =============================================================================

pub use cash_flow::{CashFlowEvent, CashFlowRecorder};
pub use config::{EngineConfig, LedgerSettings, WriteMode};
pub use error::{ConfigError, LedgerError, LedgerResult, SideEffectFailure, SideEffectStep};
pub use fanout::{FanOut, FanOutReport};
pub use purchase::PurchaseService;
pub use sale::SaleService;
pub use transfer::TransferEngine;

use stockflow_db::{Database, ProductRepository, StatisticsRepository, StockLedger};
use tracing::info;

// =============================================================================
// Ledger Facade
// =============================================================================

/// One database plus the ledger settings; hands out the services.
#[derive(Debug, Clone)]
pub struct Ledger {
    db: Database,
    settings: LedgerSettings,
}

impl Ledger {
    /// Opens (and migrates) the configured database.
    pub async fn open(config: &EngineConfig) -> LedgerResult<Self> {
        config
            .validate()
            .map_err(|e| LedgerError::Validation(e.to_string()))?;
        let db = Database::new(config.db_config()).await?;
        info!(
            path = %config.database.path.display(),
            write_mode = %config.ledger.write_mode,
            max_concurrency = config.ledger.max_concurrency,
            "Ledger opened"
        );
        Ok(Ledger::new(db, config.ledger.clone()))
    }

    pub fn new(db: Database, settings: LedgerSettings) -> Self {
        Ledger { db, settings }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn settings(&self) -> &LedgerSettings {
        &self.settings
    }

    pub fn write_mode(&self) -> WriteMode {
        self.settings.write_mode
    }

    fn fan_out(&self) -> FanOut {
        FanOut::new(self.settings.max_concurrency)
    }

    pub fn purchases(&self) -> PurchaseService {
        PurchaseService::new(self.db.clone(), self.write_mode(), self.fan_out())
    }

    pub fn sales(&self) -> SaleService {
        SaleService::new(self.db.clone(), self.write_mode(), self.fan_out())
    }

    pub fn transfers(&self) -> TransferEngine {
        TransferEngine::new(self.db.clone(), self.settings.transfer_category.clone())
    }

    pub fn cash_flow(&self) -> CashFlowRecorder {
        CashFlowRecorder::new(self.db.clone())
    }

    /// Direct stock-count access (`AddProduct`/`RemoveProduct`/`ProductCountChecker`).
    pub fn stock(&self) -> StockLedger {
        self.db.stock()
    }

    pub fn products(&self) -> ProductRepository {
        self.db.products()
    }

    pub fn statistics(&self) -> StatisticsRepository {
        self.db.statistics()
    }
}

// =============================================================================
// Test Fixtures
// =============================================================================

#[cfg(test)]
pub(crate) mod testing {
    use rust_decimal::Decimal;
    use stockflow_core::{NewProduct, Product, Scope};
    use stockflow_db::{Database, DbConfig};

    use crate::{Ledger, LedgerSettings, WriteMode};

    pub async fn db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    pub fn scope() -> Scope {
        Scope::new("acme", "main")
    }

    pub async fn product(db: &Database, scope: &Scope, name: &str, count: i64) -> Product {
        db.products()
            .insert(&NewProduct {
                scope: scope.clone(),
                category_id: None,
                name: name.to_string(),
                bill_format: Some("pcs".to_string()),
                image_url: None,
                incoming_price: Decimal::new(1000, 2),
                standard_price: Decimal::new(1500, 2),
                initial_count: count,
                created_by: Some("tester".to_string()),
            })
            .await
            .unwrap()
    }

    pub fn ledger(db: &Database, mode: WriteMode) -> Ledger {
        Ledger::new(
            db.clone(),
            LedgerSettings {
                write_mode: mode,
                ..LedgerSettings::default()
            },
        )
    }
}
