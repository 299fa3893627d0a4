//! # Event Subscriber
//!
//! Defines the subscription side of the event bus.

use crate::events::EventFilter;
use shared_types::events::DomainEvent;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

/// Errors from subscription operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    /// The event bus was closed.
    #[error("Event bus closed")]
    Closed,
}

/// A subscription handle for receiving events.
///
/// When dropped, the subscription is automatically cleaned up.
pub struct Subscription {
    receiver: broadcast::Receiver<DomainEvent>,
    filter: EventFilter,
}

impl Subscription {
    pub(crate) fn new(receiver: broadcast::Receiver<DomainEvent>, filter: EventFilter) -> Self {
        Self { receiver, filter }
    }

    /// Receive the next event that matches the filter.
    ///
    /// Returns `None` once the bus is dropped.
    pub async fn recv(&mut self) -> Option<DomainEvent> {
        loop {
            let event = match self.receiver.recv().await {
                Ok(e) => e,
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    debug!(lagged = count, "Subscriber lagged, some events dropped");
                    continue;
                }
            };

            if self.filter.matches(&event) {
                return Some(event);
            }
        }
    }

    /// Try to receive the next matching event without blocking.
    pub fn try_recv(&mut self) -> Result<Option<DomainEvent>, SubscriptionError> {
        loop {
            let event = match self.receiver.try_recv() {
                Ok(e) => e,
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(SubscriptionError::Closed)
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            };

            if self.filter.matches(&event) {
                return Ok(Some(event));
            }
        }
    }

    /// Drain every matching event currently buffered.
    pub fn drain(&mut self) -> Vec<DomainEvent> {
        let mut out = Vec::new();
        while let Ok(Some(event)) = self.try_recv() {
            out.push(event);
        }
        out
    }

    #[must_use]
    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        debug!(topics = ?self.filter.topics, "Subscription dropped");
    }
}
