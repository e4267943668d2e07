//! # Tracing Setup
//!
//! Initializes the tracing subscriber for the engine binaries.
//!
//! ## Log Levels
//! - `RUST_LOG=debug` - Show every repository statement
//! - `RUST_LOG=stockflow_db=debug,stockflow_engine=info` - Per crate
//! - Default: `logging.filter` from [`EngineConfig`](crate::config::EngineConfig)

use tracing_subscriber::EnvFilter;

/// Builds the filter: `RUST_LOG` when set, else `default_filter`, else `info`.
pub fn env_filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global fmt subscriber.
///
/// A second call is a no-op, so tests and binaries can both call it.
pub fn init_tracing(default_filter: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_filter))
        .with_target(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_directive_falls_back() {
        // Must not panic on garbage.
        let _ = env_filter("stockflow=[=");
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init_tracing("warn");
        init_tracing("debug");
        tracing::info!("still running");
    }
}
