//! In-process broker: bounded queues for work, broadcast for notices.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex};

use super::{Broker, BrokerError, ChannelKind, QueueReceiver, Route, Subscription};

/// One queue route. The broker keeps a handle on the receiving end, so
/// buffered messages survive a consumer that goes away.
struct QueueChannel {
    sender: mpsc::Sender<Vec<u8>>,
    receiver: QueueReceiver,
}

impl QueueChannel {
    fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            sender,
            receiver: Arc::new(AsyncMutex::new(receiver)),
        }
    }

    /// Subscriptions holding the receiver, not counting the broker's own.
    fn consumers(&self) -> usize {
        Arc::strong_count(&self.receiver) - 1
    }
}

#[derive(Default)]
struct Channels {
    queues: HashMap<String, QueueChannel>,
    fan_outs: HashMap<String, broadcast::Sender<Vec<u8>>>,
}

/// Broker keeping one channel per route name.
///
/// Queue routes are bounded: once `capacity` messages wait, `publish` blocks
/// until a consumer takes one. Subscribers of a queue compete for messages.
#[derive(Clone)]
pub struct InMemoryBroker {
    channels: Arc<Mutex<Channels>>,
    capacity: usize,
}

impl InMemoryBroker {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(Mutex::new(Channels::default())),
            capacity: capacity.max(1),
        }
    }

    fn channels(&self) -> MutexGuard<'_, Channels> {
        self.channels.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn with_queue<T>(&self, name: &str, f: impl FnOnce(&QueueChannel) -> T) -> T {
        let mut channels = self.channels();
        let queue = channels
            .queues
            .entry(name.to_string())
            .or_insert_with(|| QueueChannel::new(self.capacity));
        f(queue)
    }

    fn fan_out(&self, name: &str) -> broadcast::Sender<Vec<u8>> {
        self.channels()
            .fan_outs
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Number of live subscribers on a route.
    pub fn subscriber_count(&self, name: &str) -> usize {
        let channels = self.channels();
        let queued = channels.queues.get(name).map_or(0, QueueChannel::consumers);
        let broadcast = channels.fan_outs.get(name).map_or(0, |tx| tx.receiver_count());
        queued + broadcast
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish(&self, route: &Route, body: &[u8]) -> Result<(), BrokerError> {
        match route.kind {
            ChannelKind::Queue => {
                let (sender, consumers) =
                    self.with_queue(&route.name, |q| (q.sender.clone(), q.consumers()));
                if consumers == 0 {
                    return Err(BrokerError::NoSubscribers(route.name.clone()));
                }
                // The broker holds the receiver, so the channel never closes.
                sender
                    .send(body.to_vec())
                    .await
                    .map_err(|_| BrokerError::NoSubscribers(route.name.clone()))
            }
            ChannelKind::FanOut => {
                if self.fan_out(&route.name).send(body.to_vec()).is_err() {
                    tracing::debug!(channel = %route.name, "Broadcast with no listeners");
                }
                Ok(())
            }
        }
    }

    fn subscribe(&self, route: &Route) -> Subscription {
        match route.kind {
            ChannelKind::Queue => {
                let receiver = self.with_queue(&route.name, |q| Arc::clone(&q.receiver));
                Subscription::queue(route.clone(), receiver)
            }
            ChannelKind::FanOut => {
                Subscription::fan_out(route.clone(), self.fan_out(&route.name).subscribe())
            }
        }
    }
}
