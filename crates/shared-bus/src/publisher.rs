//! # Event Publisher
//!
//! Defines the publishing side of the event bus.

use crate::events::{topic_of, EventFilter};
use crate::subscriber::Subscription;
use crate::DEFAULT_CHANNEL_CAPACITY;
use async_trait::async_trait;
use shared_types::errors::RepositoryError;
use shared_types::events::DomainEvent;
use shared_types::Context;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Port through which a committed unit of work announces its events.
///
/// Called exactly once per successful commit with the full buffered list.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a batch of events.
    async fn publish(&self, ctx: &Context, events: Vec<DomainEvent>) -> Result<(), RepositoryError>;

    /// Total number of events published so far.
    fn events_published(&self) -> u64;
}

/// In-memory implementation of the event bus.
///
/// Uses `tokio::sync::broadcast` for multi-producer, multi-consumer semantics.
/// An event with no subscribers is dropped, not an error.
pub struct InMemoryEventBus {
    sender: broadcast::Sender<DomainEvent>,

    events_published: AtomicU64,

    /// Number of `publish` calls (batches).
    batches_published: AtomicU64,

    capacity: usize,
}

impl InMemoryEventBus {
    /// Create a new in-memory event bus with default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new in-memory event bus with specified capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            events_published: AtomicU64::new(0),
            batches_published: AtomicU64::new(0),
            capacity,
        }
    }

    /// Subscribe to events matching a filter.
    #[must_use]
    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        let receiver = self.sender.subscribe();
        debug!(topics = ?filter.topics, "New subscription created");
        Subscription::new(receiver, filter)
    }

    /// Live subscriptions; a dropped `Subscription` stops counting at once.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of batches delivered through `publish`.
    #[must_use]
    pub fn batches_published(&self) -> u64 {
        self.batches_published.load(Ordering::Relaxed)
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventBus {
    async fn publish(&self, ctx: &Context, events: Vec<DomainEvent>) -> Result<(), RepositoryError> {
        ctx.check()?;
        self.batches_published.fetch_add(1, Ordering::Relaxed);

        for event in events {
            let topic = topic_of(&event);
            let name = event.name();
            self.events_published.fetch_add(1, Ordering::Relaxed);

            match self.sender.send(event) {
                Ok(receivers) => {
                    debug!(topic = ?topic, event = name, receivers, "Event published");
                }
                Err(e) => {
                    warn!(topic = ?topic, event = name, error = %e, "Event dropped (no receivers)");
                }
            }
        }
        Ok(())
    }

    fn events_published(&self) -> u64 {
        self.events_published.load(Ordering::Relaxed)
    }
}
