//! Publishes committed outbox rows.
//!
//! The relay is the only component that talks to the broker on the send
//! side. A row is deleted, and the job it starts marked IN_PROGRESS, only
//! after the broker accepted the message.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{watch, Notify};

use super::{Broker, BrokerError, ChannelRegistry};
use crate::db::{job_repo, outbox_repo, Database, DatabaseError};

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),
}

pub struct OutboxRelay {
    db: Database,
    broker: Arc<dyn Broker>,
    registry: Arc<ChannelRegistry>,
    wakeup: Arc<Notify>,
    batch_size: usize,
    poll_interval: Duration,
}

impl OutboxRelay {
    pub fn new(
        db: Database,
        broker: Arc<dyn Broker>,
        registry: Arc<ChannelRegistry>,
        wakeup: Arc<Notify>,
    ) -> Self {
        Self {
            db,
            broker,
            registry,
            wakeup,
            batch_size: 64,
            poll_interval: Duration::from_millis(500),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Publishes one batch in id order. Returns how many rows were sent.
    ///
    /// Stops at the first refused send so later rows never overtake it.
    pub async fn drain_once(&self) -> Result<usize, RelayError> {
        let batch = self
            .db
            .with_conn(|conn| outbox_repo::fetch_batch(conn, self.batch_size))?;

        let mut sent = 0;
        for entry in batch {
            let Some(route) = self.registry.route(&entry.channel) else {
                tracing::error!(
                    outbox_id = entry.id,
                    channel = %entry.channel,
                    job_id = ?entry.job_id,
                    "Outbox row targets an unknown channel, parking it"
                );
                self.db
                    .with_conn(|conn| outbox_repo::park(conn, entry.id, "unknown channel"))?;
                continue;
            };

            if let Err(e) = self.broker.publish(route, entry.payload.as_bytes()).await {
                tracing::warn!(
                    outbox_id = entry.id,
                    channel = %entry.channel,
                    attempts = entry.attempts + 1,
                    error = %e,
                    "Publish refused, will retry"
                );
                self.db
                    .with_conn(|conn| outbox_repo::record_failure(conn, entry.id, &e.to_string()))?;
                return Err(e.into());
            }

            self.db.with_tx(|tx| -> Result<(), DatabaseError> {
                outbox_repo::delete(tx, entry.id)?;
                if let Some(job_id) = entry.job_id {
                    job_repo::mark_dispatched(tx, job_id)?;
                }
                Ok(())
            })?;
            tracing::debug!(
                outbox_id = entry.id,
                channel = %entry.channel,
                job_id = ?entry.job_id,
                "Published"
            );
            sent += 1;
        }

        Ok(sent)
    }

    /// Drains until `shutdown` flips to `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            batch_size = self.batch_size,
            poll_ms = self.poll_interval.as_millis() as u64,
            "Outbox relay started"
        );

        loop {
            match self.drain_once().await {
                // A full batch likely means more rows are waiting.
                Ok(sent) if sent == self.batch_size => continue,
                Ok(_) => {}
                Err(RelayError::Broker(_)) => {}
                Err(e) => tracing::error!(error = %e, "Outbox relay failed to drain"),
            }

            tokio::select! {
                _ = self.wakeup.notified() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Outbox relay stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use crate::config::ChannelConfig;
    use crate::db::item_repo;
    use crate::model::{JobId, JobStatus, Stage};

    struct Fixture {
        db: Database,
        broker: InMemoryBroker,
        registry: Arc<ChannelRegistry>,
        relay: OutboxRelay,
        wakeup: Arc<Notify>,
    }

    fn fixture() -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let broker = InMemoryBroker::new(16);
        let registry = Arc::new(ChannelRegistry::from_config(&ChannelConfig::default()).unwrap());
        let wakeup = Arc::new(Notify::new());
        let relay = OutboxRelay::new(
            db.clone(),
            Arc::new(broker.clone()),
            Arc::clone(&registry),
            Arc::clone(&wakeup),
        )
        .with_poll_interval(Duration::from_millis(20));
        Fixture {
            db,
            broker,
            registry,
            relay,
            wakeup,
        }
    }

    fn enqueue_job(db: &Database, channel: &str, body: &str) -> JobId {
        db.with_tx(|tx| -> Result<JobId, DatabaseError> {
            let item = item_repo::insert(tx, "Relay")?;
            let job = job_repo::create(tx, Stage::SummaryGeneration, item.id, None, None)?;
            outbox_repo::enqueue(tx, channel, Some(job.id), body)?;
            Ok(job.id)
        })
        .unwrap()
    }

    fn job_status(db: &Database, id: JobId) -> JobStatus {
        db.with_conn(|conn| job_repo::find_by_id(conn, id))
            .unwrap()
            .unwrap()
            .status
    }

    #[tokio::test]
    async fn test_drain_publishes_and_marks_dispatched() {
        let f = fixture();
        let route = f.registry.start(Stage::SummaryGeneration).clone();
        let mut worker = f.broker.subscribe(&route);

        let job = enqueue_job(&f.db, &route.name, r#"{"n":1}"#);
        assert_eq!(job_status(&f.db, job), JobStatus::Pending);

        assert_eq!(f.relay.drain_once().await.unwrap(), 1);
        assert_eq!(worker.recv().await, Some(br#"{"n":1}"#.to_vec()));
        assert_eq!(job_status(&f.db, job), JobStatus::InProgress);
        assert_eq!(f.db.with_conn(|c| outbox_repo::count(c)).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_refused_send_keeps_row_and_order() {
        let f = fixture();
        let route = f.registry.start(Stage::SummaryGeneration).clone();
        let first = enqueue_job(&f.db, &route.name, "first");
        enqueue_job(&f.db, &route.name, "second");

        let err = f.relay.drain_once().await.unwrap_err();
        assert!(matches!(err, RelayError::Broker(BrokerError::NoSubscribers(_))));

        let rows = f.db.with_conn(|c| outbox_repo::fetch_batch(c, 10)).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].attempts, 1);
        assert_eq!(rows[1].attempts, 0);
        assert_eq!(job_status(&f.db, first), JobStatus::Pending);

        let mut worker = f.broker.subscribe(&route);
        assert_eq!(f.relay.drain_once().await.unwrap(), 2);
        assert_eq!(worker.recv().await, Some(b"first".to_vec()));
        assert_eq!(worker.recv().await, Some(b"second".to_vec()));
    }

    #[tokio::test]
    async fn test_broadcast_without_listeners_is_sent() {
        let f = fixture();
        let channel = f.registry.cancellation().name.clone();
        f.db.with_conn(|c| outbox_repo::enqueue(c, &channel, None, r#"{"item_id":1}"#))
            .unwrap();

        assert_eq!(f.relay.drain_once().await.unwrap(), 1);
        assert_eq!(f.db.with_conn(|c| outbox_repo::count(c)).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_channel_is_parked() {
        let f = fixture();
        let route = f.registry.start(Stage::SummaryGeneration).clone();
        let mut worker = f.broker.subscribe(&route);
        f.db.with_conn(|c| outbox_repo::enqueue(c, "nowhere", None, "lost"))
            .unwrap();
        enqueue_job(&f.db, &route.name, "ok");

        assert_eq!(f.relay.drain_once().await.unwrap(), 1);
        assert_eq!(worker.recv().await, Some(b"ok".to_vec()));
        assert_eq!(f.db.with_conn(|c| outbox_repo::count(c)).unwrap(), 0);
        let parked = f.db.with_conn(|c| outbox_repo::fetch_parked(c)).unwrap();
        assert_eq!(parked.len(), 1);
        assert_eq!(parked[0].last_error.as_deref(), Some("unknown channel"));
    }

    #[tokio::test]
    async fn test_parked_rows_do_not_block_later_ones() {
        let f = fixture();
        let relay = f.relay.with_batch_size(2);
        let route = f.registry.start(Stage::SummaryGeneration).clone();
        let mut worker = f.broker.subscribe(&route);
        for _ in 0..3 {
            f.db.with_conn(|c| outbox_repo::enqueue(c, "renamed.channel", None, "stale"))
                .unwrap();
        }
        enqueue_job(&f.db, &route.name, "fresh");

        assert_eq!(relay.drain_once().await.unwrap(), 0);
        assert_eq!(relay.drain_once().await.unwrap(), 1);
        assert_eq!(worker.recv().await, Some(b"fresh".to_vec()));
        assert_eq!(f.db.with_conn(|c| outbox_repo::fetch_parked(c)).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_run_wakes_on_notify_and_stops_on_shutdown() {
        let f = fixture();
        let route = f.registry.start(Stage::SummaryGeneration).clone();
        let mut worker = f.broker.subscribe(&route);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(f.relay.run(shutdown_rx));

        enqueue_job(&f.db, &route.name, "wake");
        f.wakeup.notify_one();

        let received = tokio::time::timeout(Duration::from_secs(5), worker.recv())
            .await
            .unwrap();
        assert_eq!(received, Some(b"wake".to_vec()));

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
