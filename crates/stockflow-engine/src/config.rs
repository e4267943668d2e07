//! # Engine Configuration
//!
//! Database, write-mode and logging settings for the engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     STOCKFLOW_DB_PATH=/var/lib/stockflow/ledger.db                     │
//! │     STOCKFLOW_WRITE_MODE=fan_out                                       │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     passed with --config, or ./stockflow.toml                          │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     transactional writes, 10 workers, ./stockflow.db                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [database]
//! path = "stockflow.db"
//! max_connections = 5
//!
//! [ledger]
//! write_mode = "transactional"   # transactional | fan_out
//! max_concurrency = 10
//! transfer_category = "Inter-branch transfer"
//!
//! [logging]
//! filter = "info"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use stockflow_core::DEFAULT_TRANSFER_CATEGORY;
use stockflow_db::DbConfig;
use tracing::{debug, info, warn};

use crate::error::ConfigError;

/// Highest accepted `ledger.max_concurrency`.
pub const MAX_CONCURRENCY_LIMIT: usize = 64;

/// Config file looked up when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "stockflow.toml";

// =============================================================================
// Write Mode
// =============================================================================

/// How purchase and sale side effects are applied.
///
/// ## Mode Comparison
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │                        Write Mode Behavior                              │
/// │                                                                         │
/// │  TRANSACTIONAL (Default)          │  FAN_OUT                           │
/// │  ───────────────────────          │  ───────                           │
/// │  BEGIN                            │  BEGIN; header + items; COMMIT     │
/// │    header + items                 │  cash-flow entry                   │
/// │    cash-flow entry                │  per-item stock update across      │
/// │    stock deltas                   │    the bounded worker pool         │
/// │  COMMIT                           │                                    │
/// │                                   │                                    │
/// │  any failure → nothing stored     │  failure after commit →            │
/// │                                   │    PostCommitSideEffect            │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    #[default]
    Transactional,
    FanOut,
}

impl std::fmt::Display for WriteMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteMode::Transactional => write!(f, "transactional"),
            WriteMode::FanOut => write!(f, "fan_out"),
        }
    }
}

impl std::str::FromStr for WriteMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "transactional" | "tx" => Ok(WriteMode::Transactional),
            "fan_out" | "fan-out" | "fanout" => Ok(WriteMode::FanOut),
            other => Err(ConfigError::Invalid(format!(
                "Unknown write mode: '{}'. Valid options: transactional, fan_out",
                other
            ))),
        }
    }
}

// =============================================================================
// Sections
// =============================================================================

/// `[database]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file, created if missing.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("stockflow.db")
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_db_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// `[ledger]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSettings {
    #[serde(default)]
    pub write_mode: WriteMode,

    /// Upper bound on concurrent per-item stock updates in `fan_out` mode.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Category created at the destination branch for transferred products.
    #[serde(default = "default_transfer_category")]
    pub transfer_category: String,
}

fn default_max_concurrency() -> usize {
    10
}

fn default_transfer_category() -> String {
    DEFAULT_TRANSFER_CATEGORY.to_string()
}

impl Default for LedgerSettings {
    fn default() -> Self {
        LedgerSettings {
            write_mode: WriteMode::default(),
            max_concurrency: default_max_concurrency(),
            transfer_category: default_transfer_category(),
        }
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_filter")]
    pub filter: String,
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        LoggingSettings {
            filter: default_filter(),
        }
    }
}

// =============================================================================
// Engine Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub ledger: LedgerSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

impl EngineConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (`path`, else `./stockflow.toml` when present)
    /// 3. Environment variables
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                info!(?path, "Loading engine config from file");
                Self::from_toml_str(&std::fs::read_to_string(path)?)?
            }
            None => {
                let fallback = Path::new(DEFAULT_CONFIG_FILE);
                if fallback.exists() {
                    info!(path = ?fallback, "Loading engine config from file");
                    Self::from_toml_str(&std::fs::read_to_string(fallback)?)?
                } else {
                    debug!("Config file not found, using defaults");
                    Self::default()
                }
            }
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Parses a TOML document; missing sections take their defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Renders the configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("database.path must not be empty".into()));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "database.max_connections must be greater than 0".into(),
            ));
        }

        if !(1..=MAX_CONCURRENCY_LIMIT).contains(&self.ledger.max_concurrency) {
            return Err(ConfigError::Invalid(format!(
                "ledger.max_concurrency must be between 1 and {}, got {}",
                MAX_CONCURRENCY_LIMIT, self.ledger.max_concurrency
            )));
        }

        if self.ledger.transfer_category.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "ledger.transfer_category must not be blank".into(),
            ));
        }

        Ok(())
    }

    /// Applies `STOCKFLOW_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides read through `lookup`.
    ///
    /// Unparseable numbers and modes are logged and ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("STOCKFLOW_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Some(max) = lookup("STOCKFLOW_DB_MAX_CONNECTIONS") {
            match max.parse::<u32>() {
                Ok(max) => self.database.max_connections = max,
                Err(_) => warn!(value = %max, "Ignoring invalid STOCKFLOW_DB_MAX_CONNECTIONS"),
            }
        }

        if let Some(mode) = lookup("STOCKFLOW_WRITE_MODE") {
            match mode.parse::<WriteMode>() {
                Ok(parsed) => {
                    debug!(mode = %parsed, "Overriding write mode from environment");
                    self.ledger.write_mode = parsed;
                }
                Err(e) => warn!(error = %e, "Ignoring STOCKFLOW_WRITE_MODE"),
            }
        }

        if let Some(limit) = lookup("STOCKFLOW_MAX_CONCURRENCY") {
            match limit.parse::<usize>() {
                Ok(limit) => self.ledger.max_concurrency = limit,
                Err(_) => warn!(value = %limit, "Ignoring invalid STOCKFLOW_MAX_CONCURRENCY"),
            }
        }

        if let Some(filter) = lookup("STOCKFLOW_LOG") {
            self.logging.filter = filter;
        }
    }

    /// Pool settings for [`stockflow_db::Database::new`].
    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(&self.database.path).max_connections(self.database.max_connections)
    }
}
