//! Logging setup.
//!
//! Engine records reach `tracing` through the engine log sink. Hosts without
//! a subscriber of their own call [`init_logging`] once at startup.

use dave_core::log;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::BridgeError;

/// Routes engine log records to `tracing`.
///
/// Returns false if a sink was already installed.
pub fn install_engine_sink() -> bool {
    log::set_log_sink(log::default_sink)
}

/// Installs a `fmt` subscriber filtered by `RUST_LOG`, or by `default_filter`
/// when unset, and routes engine records into it.
///
/// # Errors
///
/// Returns [`BridgeError::LoggingInit`] if a global subscriber is already set
/// or the filter does not parse.
pub fn init_logging(default_filter: &str) -> Result<(), BridgeError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_filter)
            .map_err(|e| BridgeError::LoggingInit(e.to_string()))?,
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .try_init()
        .map_err(|e| BridgeError::LoggingInit(e.to_string()))?;

    install_engine_sink();
    Ok(())
}
