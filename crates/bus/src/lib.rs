//! Message bus abstraction used for entity-created notifications.
//!
//! [`MessageBus`] is the seam a real broker client plugs into. The workspace
//! ships [`InMemoryBus`], a process-local implementation backed by one
//! broadcast channel per topic.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{debug, info};
use uuid::Uuid;

const DEFAULT_TOPIC_CAPACITY: usize = 256;
const MAX_POLL_BATCH: usize = 64;

/// A message delivered to subscribers.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: Uuid,
    pub topic: String,
    pub key: String,
    pub payload: Vec<u8>,
    pub published_at: DateTime<Utc>,
}

/// Acknowledgement returned by a successful publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("message bus is closed")]
    Closed,
    #[error("subscriber lagged behind and skipped {0} messages")]
    Lagged(u64),
    #[error("publish failed: {0}")]
    Publish(String),
}

impl BusError {
    /// Whether a consumer should keep polling after this error.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Closed)
    }
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<Receipt, BusError>;

    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>, BusError>;

    /// Flushes pending work and stops every subscription.
    async fn close(&self);
}

#[async_trait]
pub trait Subscription: Send {
    fn topic(&self) -> &str;

    /// Waits up to `timeout` for at least one message and returns everything
    /// that is ready. An empty batch means the wait timed out.
    async fn poll(&mut self, timeout: Duration) -> Result<Vec<Message>, BusError>;
}

/// Process-local bus. Messages published while a topic has no subscribers
/// are dropped.
#[derive(Clone)]
pub struct InMemoryBus {
    inner: Arc<Inner>,
}

struct Inner {
    bootstrap_servers: String,
    consumer_group: String,
    capacity: usize,
    state: Mutex<BusState>,
}

#[derive(Default)]
struct BusState {
    closed: bool,
    topics: HashMap<String, Topic>,
}

struct Topic {
    sender: broadcast::Sender<Message>,
    next_offset: u64,
}

impl InMemoryBus {
    pub fn new(bootstrap_servers: impl Into<String>, consumer_group: impl Into<String>) -> Self {
        Self::with_capacity(bootstrap_servers, consumer_group, DEFAULT_TOPIC_CAPACITY)
    }

    pub fn with_capacity(
        bootstrap_servers: impl Into<String>,
        consumer_group: impl Into<String>,
        capacity: usize,
    ) -> Self {
        let bus = Self {
            inner: Arc::new(Inner {
                bootstrap_servers: bootstrap_servers.into(),
                consumer_group: consumer_group.into(),
                capacity: capacity.max(1),
                state: Mutex::new(BusState::default()),
            }),
        };
        info!(
            stage = "bus",
            bootstrap = %bus.inner.bootstrap_servers,
            group = %bus.inner.consumer_group,
            "in-memory message bus initialized"
        );
        bus
    }

    pub fn consumer_group(&self) -> &str {
        &self.inner.consumer_group
    }

    // Topic bookkeeping stays consistent across a panic, so a poisoned lock is reused.
    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl BusState {
    fn topic(&mut self, name: &str, capacity: usize) -> &mut Topic {
        self.topics.entry(name.to_string()).or_insert_with(|| {
            let (sender, _) = broadcast::channel(capacity);
            Topic {
                sender,
                next_offset: 0,
            }
        })
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<Receipt, BusError> {
        let mut state = self.lock();
        if state.closed {
            return Err(BusError::Closed);
        }
        let entry = state.topic(topic, self.inner.capacity);
        let offset = entry.next_offset;
        entry.next_offset += 1;

        let message = Message {
            id: Uuid::new_v4(),
            topic: topic.to_string(),
            key: key.to_string(),
            payload,
            published_at: Utc::now(),
        };
        let size = message.payload.len();
        match entry.sender.send(message) {
            Ok(receivers) => {
                debug!(stage = "bus", topic, key, offset, size, receivers, "message published")
            }
            Err(_) => debug!(stage = "bus", topic, key, offset, "no subscribers for topic"),
        }

        Ok(Receipt {
            topic: topic.to_string(),
            partition: 0,
            offset,
        })
    }

    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>, BusError> {
        let mut state = self.lock();
        if state.closed {
            return Err(BusError::Closed);
        }
        let receiver = state.topic(topic, self.inner.capacity).sender.subscribe();
        info!(stage = "bus", topic, group = %self.inner.consumer_group, "subscription started");
        Ok(Box::new(InMemorySubscription {
            topic: topic.to_string(),
            receiver,
        }))
    }

    async fn close(&self) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        // Dropping the senders ends every receiver once it drains.
        let topics = state.topics.len();
        state.topics.clear();
        info!(stage = "bus", topics, "message bus closed");
    }
}

struct InMemorySubscription {
    topic: String,
    receiver: broadcast::Receiver<Message>,
}

#[async_trait]
impl Subscription for InMemorySubscription {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Vec<Message>, BusError> {
        let first = match tokio::time::timeout(timeout, self.receiver.recv()).await {
            Err(_) => return Ok(Vec::new()),
            Ok(Err(RecvError::Closed)) => return Err(BusError::Closed),
            Ok(Err(RecvError::Lagged(skipped))) => return Err(BusError::Lagged(skipped)),
            Ok(Ok(message)) => message,
        };

        let mut batch = vec![first];
        while batch.len() < MAX_POLL_BATCH {
            match self.receiver.try_recv() {
                Ok(message) => batch.push(message),
                Err(TryRecvError::Lagged(skipped)) => return Err(BusError::Lagged(skipped)),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        Ok(batch)
    }
}
