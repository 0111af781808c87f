//! Queues outbound messages in the caller's transaction.

use rusqlite::Connection;

use crate::broker::ChannelRegistry;
use crate::db::{outbox_repo, DatabaseError};
use crate::messages::{CancellationNotice, StartMessage};
use crate::model::ItemId;

/// Writes messages to the outbox of an open transaction.
///
/// Nothing reaches the broker before that transaction commits.
pub struct Dispatcher<'a> {
    conn: &'a Connection,
    registry: &'a ChannelRegistry,
}

impl<'a> Dispatcher<'a> {
    pub fn new(conn: &'a Connection, registry: &'a ChannelRegistry) -> Self {
        Self { conn, registry }
    }

    /// Queues a start message on its stage's start channel.
    pub fn dispatch<E>(&self, message: &StartMessage) -> Result<i64, E>
    where
        E: From<DatabaseError> + From<serde_json::Error>,
    {
        let route = self.registry.start(message.stage());
        let payload = serde_json::to_string(message)?;
        let id = outbox_repo::enqueue(self.conn, &route.name, Some(message.job_id()), &payload)?;
        tracing::debug!(
            stage = %message.stage(),
            job_id = %message.job_id(),
            outbox_id = id,
            "Queued start message"
        );
        Ok(id)
    }

    /// Queues the abort broadcast for an item.
    pub fn broadcast_cancellation<E>(&self, item_id: ItemId) -> Result<i64, E>
    where
        E: From<DatabaseError> + From<serde_json::Error>,
    {
        let payload = serde_json::to_string(&CancellationNotice { item_id })?;
        let route = self.registry.cancellation();
        Ok(outbox_repo::enqueue(self.conn, &route.name, None, &payload)?)
    }
}
