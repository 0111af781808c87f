use std::path::PathBuf;
use std::sync::Arc;

use log::info;

use studygen::{
    load_config, logging, Broker, ChannelRegistry, ConfigError, Database, InMemoryBroker,
    Orchestrator, PublicUrlLocator, Service, ServiceOptions, StudygenError,
};

const CONFIG_ENV: &str = "STUDYGEN_CONFIG";

fn config_path() -> PathBuf {
    std::env::args_os()
        .nth(1)
        .or_else(|| std::env::var_os(CONFIG_ENV))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("studygen.json"))
}

#[tokio::main]
async fn main() -> Result<(), StudygenError> {
    let config = load_config(config_path())?;
    logging::init(&config.logging)?;

    info!("Starting studygen v{}", env!("CARGO_PKG_VERSION"));

    let db_path = config.database_path().ok_or(StudygenError::NoDatabasePath)?;
    let db = Database::open(&db_path)?;

    let registry = ChannelRegistry::from_config(&config.broker.channels).map_err(|e| {
        ConfigError::Validation {
            message: e.to_string(),
        }
    })?;
    let locator = Arc::new(PublicUrlLocator::new(&config.storage.public_base_url));
    let orchestrator = Arc::new(Orchestrator::new(db, Arc::new(registry), locator));

    let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new(config.broker.capacity));
    let service = Service::start(orchestrator, broker, ServiceOptions::from(&config));

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => log::error!("Failed to listen for shutdown signal: {}", e),
    }

    service.shutdown().await;
    Ok(())
}
