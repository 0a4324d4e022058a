use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::broadcast;
use tracing::{debug, error};

use huck_types::events::{ChangeRecord, FeedFrame, Topic};

/// A change record serialized once, shared by every connection that forwards it.
#[derive(Debug, Clone)]
pub struct FeedMessage {
    pub topic: Topic,
    pub json: Arc<str>,
}

/// Fans change records out to all connected feed clients.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Every connection receives every record and filters by its own topics
    broadcast_tx: broadcast::Sender<FeedMessage>,

    connections: AtomicUsize,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                connections: AtomicUsize::new(0),
            }),
        }
    }

    /// Subscribe to the record stream. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<FeedMessage> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Publish a change record to every connection subscribed to its topic.
    pub fn publish(&self, record: ChangeRecord) {
        let topic = record.topic;
        let json = match serde_json::to_string(&FeedFrame::Change(record)) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize change record for {}: {}", topic, e);
                return;
            }
        };
        let receivers = self
            .inner
            .broadcast_tx
            .send(FeedMessage {
                topic,
                json: json.into(),
            })
            .unwrap_or(0);
        debug!("Published change on {} to {} receivers", topic, receivers);
    }

    pub fn connection_opened(&self) -> usize {
        self.inner.connections.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn connection_closed(&self) -> usize {
        self.inner.connections.fetch_sub(1, Ordering::Relaxed).saturating_sub(1)
    }
}
