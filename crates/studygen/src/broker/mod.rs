//! Message transport between the orchestrator and the stage workers.
//!
//! The orchestrator only needs two things from a broker: publish bytes to a
//! named route, and receive bytes from one. Delivery is at-least-once; every
//! consumer is idempotent against duplicates.

mod memory;
mod relay;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex};

use crate::config::ChannelConfig;
use crate::model::Stage;

pub use memory::InMemoryBroker;
pub use relay::{OutboxRelay, RelayError};

/// How a route distributes messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Point-to-point work queue. A message needs a consumer to be accepted.
    Queue,
    /// Broadcast to whoever listens. Nobody listening is fine.
    FanOut,
}

/// A resolved channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Route {
    pub name: String,
    pub kind: ChannelKind,
}

impl Route {
    pub fn queue(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ChannelKind::Queue,
        }
    }

    pub fn fan_out(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ChannelKind::FanOut,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Channel name for {0} is empty")]
    EmptyName(String),

    #[error("Channel name '{0}' is used more than once")]
    DuplicateName(String),
}

#[derive(Debug, Clone)]
struct StageRoutes {
    start: Route,
    result: Route,
}

/// Every route the orchestrator uses, resolved once at startup.
#[derive(Debug, Clone)]
pub struct ChannelRegistry {
    text_extraction: StageRoutes,
    summary_generation: StageRoutes,
    flashcard_generation: StageRoutes,
    aggregation: StageRoutes,
    cancellation: Route,
}

impl ChannelRegistry {
    pub fn from_config(config: &ChannelConfig) -> Result<Self, RegistryError> {
        let mut seen = HashSet::new();
        let mut check = |label: String, name: &str| -> Result<(), RegistryError> {
            if name.trim().is_empty() {
                return Err(RegistryError::EmptyName(label));
            }
            if !seen.insert(name.to_string()) {
                return Err(RegistryError::DuplicateName(name.to_string()));
            }
            Ok(())
        };

        for stage in Stage::ALL {
            let channels = config.for_stage(stage);
            check(format!("{stage} start"), channels.start.as_str())?;
            check(format!("{stage} result"), channels.result.as_str())?;
        }
        check("cancellation".to_string(), config.cancellation.as_str())?;

        let routes = |stage: Stage| {
            let channels = config.for_stage(stage);
            StageRoutes {
                start: Route::queue(&channels.start),
                result: Route::queue(&channels.result),
            }
        };

        Ok(Self {
            text_extraction: routes(Stage::TextExtraction),
            summary_generation: routes(Stage::SummaryGeneration),
            flashcard_generation: routes(Stage::FlashcardGeneration),
            aggregation: routes(Stage::Aggregation),
            cancellation: Route::fan_out(&config.cancellation),
        })
    }

    fn routes(&self, stage: Stage) -> &StageRoutes {
        match stage {
            Stage::TextExtraction => &self.text_extraction,
            Stage::SummaryGeneration => &self.summary_generation,
            Stage::FlashcardGeneration => &self.flashcard_generation,
            Stage::Aggregation => &self.aggregation,
        }
    }

    /// Channel start messages for `stage` go to.
    pub fn start(&self, stage: Stage) -> &Route {
        &self.routes(stage).start
    }

    /// Channel workers of `stage` reply on.
    pub fn result(&self, stage: Stage) -> &Route {
        &self.routes(stage).result
    }

    pub fn cancellation(&self) -> &Route {
        &self.cancellation
    }

    /// Looks a route up by name, as stored in the outbox.
    pub fn route(&self, name: &str) -> Option<&Route> {
        Stage::ALL
            .iter()
            .flat_map(|&stage| [self.start(stage), self.result(stage)])
            .chain(std::iter::once(&self.cancellation))
            .find(|route| route.name == name)
    }
}

#[derive(Debug, Error)]
pub enum BrokerError {
    /// A queue message had nobody to take it; the send is not confirmed.
    #[error("No consumer on queue '{0}'")]
    NoSubscribers(String),
}

/// Shared end of a queue route. Competing consumers take turns on it.
pub type QueueReceiver = Arc<AsyncMutex<mpsc::Receiver<Vec<u8>>>>;

#[derive(Debug)]
enum Inbox {
    Queue(QueueReceiver),
    FanOut(broadcast::Receiver<Vec<u8>>),
}

/// Messages received from one route.
#[derive(Debug)]
pub struct Subscription {
    route: Route,
    inbox: Inbox,
}

impl Subscription {
    /// Takes messages off a queue. Each message goes to one subscriber.
    pub fn queue(route: Route, receiver: QueueReceiver) -> Self {
        Self {
            route,
            inbox: Inbox::Queue(receiver),
        }
    }

    /// Receives every message broadcast after subscribing.
    pub fn fan_out(route: Route, receiver: broadcast::Receiver<Vec<u8>>) -> Self {
        Self {
            route,
            inbox: Inbox::FanOut(receiver),
        }
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    /// Waits for the next message. Returns `None` once the channel closed.
    ///
    /// Queue messages are never skipped. A lagging fan-out listener loses the
    /// oldest notices, which only ever repeat an abort already recorded in
    /// the job store.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        match &mut self.inbox {
            Inbox::Queue(receiver) => receiver.lock().await.recv().await,
            Inbox::FanOut(receiver) => loop {
                match receiver.recv().await {
                    Ok(body) => return Some(body),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            channel = %self.route.name,
                            skipped,
                            "Broadcast listener lagged, notices dropped"
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            },
        }
    }
}

/// Transport seam. An AMQP client is a drop-in implementation.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Sends `body` to `route`. `Ok` means the broker accepted it.
    ///
    /// A full queue makes the sender wait rather than drop anything.
    async fn publish(&self, route: &Route, body: &[u8]) -> Result<(), BrokerError>;

    /// Starts receiving messages sent to `route` from now on.
    fn subscribe(&self, route: &Route) -> Subscription;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StageChannels;

    #[test]
    fn test_default_registry() {
        let registry = ChannelRegistry::from_config(&ChannelConfig::default()).unwrap();
        assert_eq!(
            registry.start(Stage::SummaryGeneration),
            &Route::queue("worker.summary.generation.job.start")
        );
        assert_eq!(
            registry.result(Stage::Aggregation).name,
            "worker.aggregation.result"
        );
        assert_eq!(registry.cancellation().kind, ChannelKind::FanOut);
        assert_eq!(
            registry.route("worker-cancellation"),
            Some(registry.cancellation())
        );
        assert!(registry.route("worker.unknown").is_none());
    }

    #[test]
    fn test_empty_name_rejected() {
        let config = ChannelConfig {
            cancellation: "  ".to_string(),
            ..ChannelConfig::default()
        };
        assert_eq!(
            ChannelRegistry::from_config(&config).unwrap_err(),
            RegistryError::EmptyName("cancellation".to_string())
        );
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let config = ChannelConfig {
            aggregation: StageChannels {
                start: "worker.aggregation.job.start".to_string(),
                result: "worker.summary.generation.result".to_string(),
            },
            ..ChannelConfig::default()
        };
        assert!(matches!(
            ChannelRegistry::from_config(&config),
            Err(RegistryError::DuplicateName(_))
        ));
    }
}
