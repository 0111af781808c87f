//! Process-wide tracing setup.
//!
//! Library code logs through `tracing` (and `log` in the db layer); only the
//! binary installs a subscriber.

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("A global tracing subscriber is already installed: {0}")]
    Subscriber(#[from] tracing::subscriber::SetGlobalDefaultError),

    #[error("Failed to bridge log records: {0}")]
    LogBridge(#[from] log::SetLoggerError),
}

/// `RUST_LOG` when set and valid, else the configured level, else `info`.
pub fn build_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global subscriber and routes `log` records into it.
pub fn init(config: &LoggingConfig) -> Result<(), LoggingError> {
    let json = config.json.then(|| fmt::layer().json().with_target(true));
    let text = (!config.json).then(|| fmt::layer().with_target(true));

    let subscriber = tracing_subscriber::registry()
        .with(build_filter(config))
        .with(json)
        .with(text);
    tracing::subscriber::set_global_default(subscriber)?;
    tracing_log::LogTracer::init()?;

    Ok(())
}
