//! # Shared Bus - Domain Event Delivery
//!
//! The outbound side of a committed unit of work: buffered domain events are
//! handed to an [`EventPublisher`] exactly once per successful commit.
//!
//! ```text
//! ┌──────────────┐   commit ok    ┌──────────────┐   subscribe()   ┌────────────┐
//! │ Unit of Work │ ─────────────► │  Event Bus   │ ──────────────► │ Read model │
//! └──────────────┘  publish(all)  └──────────────┘                 └────────────┘
//! ```

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod events;
pub mod publisher;
pub mod subscriber;

pub use events::{topic_of, EventFilter, EventTopic};
pub use publisher::{EventPublisher, InMemoryEventBus};
pub use subscriber::{Subscription, SubscriptionError};

/// Maximum events to buffer per subscriber before lagging.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;
