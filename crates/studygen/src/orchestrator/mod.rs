//! The generation pipeline.
//!
//! Every result is handled inside one immediate transaction. State lives only
//! in committed rows, so any number of orchestrators can share a database.
//! Start messages are written to the outbox in that same transaction and
//! published by the [`OutboxRelay`](crate::broker::OutboxRelay) after commit.

mod consumer;
mod dispatcher;
mod failure;
mod gate;
mod generation;
mod results;
mod service;
mod sweeper;

use std::sync::Arc;

use tokio::sync::Notify;

use crate::broker::ChannelRegistry;
use crate::db::Database;
use crate::storage::FileLocator;

pub use consumer::ResultConsumer;
pub use dispatcher::Dispatcher;
pub use failure::{FailureOutcome, ItemFailure};
pub use gate::GateDecision;
pub use results::ResultOutcome;
pub use service::{Service, ServiceOptions};
pub use sweeper::StaleJobSweeper;

pub struct Orchestrator {
    db: Database,
    registry: Arc<ChannelRegistry>,
    locator: Arc<dyn FileLocator>,
    wakeup: Arc<Notify>,
}

impl Orchestrator {
    pub fn new(
        db: Database,
        registry: Arc<ChannelRegistry>,
        locator: Arc<dyn FileLocator>,
    ) -> Self {
        Self {
            db,
            registry,
            locator,
            wakeup: Arc::new(Notify::new()),
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    /// Signalled after every commit that may have written outbox rows.
    pub fn wakeup(&self) -> &Arc<Notify> {
        &self.wakeup
    }

    fn notify_relay(&self) {
        self.wakeup.notify_one();
    }
}
