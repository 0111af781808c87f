pub mod loader;
pub mod schema;

pub use loader::{load_config, load_config_from_str};
pub use schema::{
    BrokerConfig, ChannelConfig, Config, DatabaseConfig, LoggingConfig, RelayConfig,
    StageChannels, StaleJobsConfig, StorageConfig, DATABASE_PATH_ENV,
};
