//! Runtime wiring: relay, result consumers and the optional sweeper.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::{Orchestrator, ResultConsumer, StaleJobSweeper};
use crate::broker::{Broker, OutboxRelay};
use crate::config::Config;
use crate::model::Stage;

#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub relay_batch_size: usize,
    pub relay_poll_interval: Duration,
    /// Stale-job deadline; `None` disables the sweeper.
    pub stale_job_timeout: Option<Duration>,
    pub sweep_interval: Duration,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            relay_batch_size: 64,
            relay_poll_interval: Duration::from_millis(500),
            stale_job_timeout: None,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl From<&Config> for ServiceOptions {
    fn from(config: &Config) -> Self {
        Self {
            relay_batch_size: config.relay.batch_size,
            relay_poll_interval: Duration::from_millis(config.relay.poll_interval_ms),
            stale_job_timeout: config.stale_jobs.timeout_secs.map(Duration::from_secs),
            sweep_interval: Duration::from_secs(config.stale_jobs.sweep_interval_secs),
        }
    }
}

/// Running background tasks sharing one shutdown signal.
pub struct Service {
    orchestrator: Arc<Orchestrator>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Service {
    /// Spawns the consumers, the relay and, if configured, the sweeper.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        orchestrator: Arc<Orchestrator>,
        broker: Arc<dyn Broker>,
        options: ServiceOptions,
    ) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        // Consumers subscribe before the relay can publish anything.
        for stage in Stage::ALL {
            let consumer = ResultConsumer::new(Arc::clone(&orchestrator), stage, broker.as_ref());
            tasks.push(tokio::spawn(consumer.run(shutdown_rx.clone())));
        }

        let relay = OutboxRelay::new(
            orchestrator.db().clone(),
            Arc::clone(&broker),
            Arc::clone(orchestrator.registry()),
            Arc::clone(orchestrator.wakeup()),
        )
        .with_batch_size(options.relay_batch_size)
        .with_poll_interval(options.relay_poll_interval);
        tasks.push(tokio::spawn(relay.run(shutdown_rx.clone())));

        if let Some(timeout) = options.stale_job_timeout {
            let sweeper =
                StaleJobSweeper::new(Arc::clone(&orchestrator), timeout, options.sweep_interval);
            tasks.push(tokio::spawn(sweeper.run(shutdown_rx.clone())));
        }

        tracing::info!(tasks = tasks.len(), "Service started");
        Self {
            orchestrator,
            shutdown,
            tasks,
        }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Signals every task to stop and waits for them.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Background task ended abnormally");
            }
        }
        tracing::info!("Service stopped");
    }
}
