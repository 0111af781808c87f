pub mod broker;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod messages;
pub mod model;
pub mod orchestrator;
pub mod storage;

pub use broker::{Broker, ChannelRegistry, InMemoryBroker, OutboxRelay};
pub use config::{load_config, Config};
pub use db::Database;
pub use error::{
    ConfigError, GenerationError, PipelineError, Result, StudygenError, ValidationError,
};
pub use orchestrator::{Orchestrator, ResultOutcome, Service, ServiceOptions};
pub use storage::{FileLocator, PublicUrlLocator, StorageError};
