//! Feeds one stage's result channel into the orchestrator.

use std::sync::Arc;

use tokio::sync::watch;

use super::{Orchestrator, ResultOutcome};
use crate::broker::{Broker, Subscription};
use crate::model::Stage;

pub struct ResultConsumer {
    orchestrator: Arc<Orchestrator>,
    stage: Stage,
    subscription: Subscription,
}

impl ResultConsumer {
    /// Subscribes immediately, so results sent after this returns are kept.
    pub fn new(orchestrator: Arc<Orchestrator>, stage: Stage, broker: &dyn Broker) -> Self {
        let subscription = broker.subscribe(orchestrator.registry().result(stage));
        Self {
            orchestrator,
            stage,
            subscription,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Processes one message off the async runtime.
    ///
    /// Returns `None` when the message was rejected.
    pub async fn handle(&self, body: Vec<u8>) -> Option<ResultOutcome> {
        let orchestrator = Arc::clone(&self.orchestrator);
        let stage = self.stage;
        match tokio::task::spawn_blocking(move || orchestrator.process_result(stage, &body)).await {
            Ok(Ok(outcome)) => Some(outcome),
            Ok(Err(e)) => {
                tracing::error!(stage = %stage, error = %e, "Rejected result message");
                None
            }
            Err(e) => {
                tracing::error!(stage = %stage, error = %e, "Result handler panicked");
                None
            }
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(stage = %self.stage, channel = %self.subscription.route().name, "Result consumer started");

        loop {
            tokio::select! {
                body = self.subscription.recv() => match body {
                    Some(body) => {
                        self.handle(body).await;
                    }
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!(stage = %self.stage, "Result consumer stopped");
    }
}
