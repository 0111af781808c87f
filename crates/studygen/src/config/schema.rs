use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::model::Stage;

/// Environment variable overriding `database.path`.
pub const DATABASE_PATH_ENV: &str = "STUDYGEN_DATABASE_PATH";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub stale_jobs: StaleJobsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Database location: the env override, then the config file, then
    /// `~/.studygen/data/studygen.db`.
    pub fn database_path(&self) -> Option<PathBuf> {
        std::env::var_os(DATABASE_PATH_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(|| self.database.path.clone())
            .or_else(crate::db::default_database_path)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Base URL objects are reachable under, e.g. `http://minio:9000`.
    pub public_base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Buffered messages per in-memory channel.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default)]
    pub channels: ChannelConfig,
}

fn default_capacity() -> usize {
    1024
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            channels: ChannelConfig::default(),
        }
    }
}

/// Start and result channel of one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageChannels {
    pub start: String,
    pub result: String,
}

impl StageChannels {
    fn named(prefix: &str) -> Self {
        Self {
            start: format!("worker.{prefix}.job.start"),
            result: format!("worker.{prefix}.result"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default = "default_text_extraction")]
    pub text_extraction: StageChannels,
    #[serde(default = "default_summary_generation")]
    pub summary_generation: StageChannels,
    #[serde(default = "default_flashcard_generation")]
    pub flashcard_generation: StageChannels,
    #[serde(default = "default_aggregation")]
    pub aggregation: StageChannels,
    #[serde(default = "default_cancellation")]
    pub cancellation: String,
}

fn default_text_extraction() -> StageChannels {
    StageChannels::named("text.extraction")
}

fn default_summary_generation() -> StageChannels {
    StageChannels::named("summary.generation")
}

fn default_flashcard_generation() -> StageChannels {
    StageChannels::named("flashcard.generation")
}

fn default_aggregation() -> StageChannels {
    StageChannels::named("aggregation")
}

fn default_cancellation() -> String {
    "worker-cancellation".to_string()
}

impl ChannelConfig {
    pub fn for_stage(&self, stage: Stage) -> &StageChannels {
        match stage {
            Stage::TextExtraction => &self.text_extraction,
            Stage::SummaryGeneration => &self.summary_generation,
            Stage::FlashcardGeneration => &self.flashcard_generation,
            Stage::Aggregation => &self.aggregation,
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            text_extraction: default_text_extraction(),
            summary_generation: default_summary_generation(),
            flashcard_generation: default_flashcard_generation(),
            aggregation: default_aggregation(),
            cancellation: default_cancellation(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_batch_size() -> usize {
    64
}

fn default_poll_interval_ms() -> u64 {
    500
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Stuck-job detection. Disabled unless `timeout_secs` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaleJobsConfig {
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for StaleJobsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: None,
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}
