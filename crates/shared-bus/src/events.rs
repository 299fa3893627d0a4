//! # Event Topics and Filters
//!
//! Routing metadata for the domain events that flow through the bus.

use serde::{Deserialize, Serialize};
use shared_types::entities::UserId;
use shared_types::events::{DomainEvent, DomainEventKind};

/// Event topic, derived from the aggregate kind the event is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventTopic {
    /// Wildcard: matches every event.
    All,
    Node,
    Edge,
    Category,
}

/// Topic for a domain event.
pub fn topic_of(event: &DomainEvent) -> EventTopic {
    match event.kind {
        DomainEventKind::NodeCreated { .. }
        | DomainEventKind::NodeUpdated { .. }
        | DomainEventKind::NodeDeleted { .. }
        | DomainEventKind::NodeArchived { .. }
        | DomainEventKind::NodeUnarchived { .. } => EventTopic::Node,
        DomainEventKind::EdgeCreated { .. } | DomainEventKind::EdgeDeleted { .. } => {
            EventTopic::Edge
        }
        DomainEventKind::CategoryCreated { .. } | DomainEventKind::CategoryDeleted { .. } => {
            EventTopic::Category
        }
    }
}

/// Subscription filter.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Topics to receive. Empty means all.
    pub topics: Vec<EventTopic>,
    /// Only events raised on behalf of this user.
    pub user_id: Option<UserId>,
}

impl EventFilter {
    /// Receive every event.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Receive events on the given topics.
    #[must_use]
    pub fn topics(topics: Vec<EventTopic>) -> Self {
        Self {
            topics,
            user_id: None,
        }
    }

    /// Restrict to a single user's events.
    #[must_use]
    pub fn for_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn matches(&self, event: &DomainEvent) -> bool {
        let topic_ok = self.topics.is_empty()
            || self.topics.contains(&EventTopic::All)
            || self.topics.contains(&topic_of(event));
        let user_ok = self
            .user_id
            .as_ref()
            .map_or(true, |user| user == &event.user_id);
        topic_ok && user_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::entities::{EdgeId, NodeId};

    fn node_event(user: &str) -> DomainEvent {
        DomainEvent::new(
            UserId::from(user),
            DomainEventKind::NodeCreated {
                node_id: NodeId::from("n1"),
            },
        )
    }

    #[test]
    fn test_topic_mapping() {
        assert_eq!(topic_of(&node_event("u1")), EventTopic::Node);
        let edge = DomainEvent::new(
            UserId::from("u1"),
            DomainEventKind::EdgeDeleted {
                edge_id: EdgeId::from("e1"),
            },
        );
        assert_eq!(topic_of(&edge), EventTopic::Edge);
    }

    #[test]
    fn test_filter_all() {
        assert!(EventFilter::all().matches(&node_event("u1")));
    }

    #[test]
    fn test_filter_by_topic_and_user() {
        let filter = EventFilter::topics(vec![EventTopic::Node]).for_user(UserId::from("u1"));
        assert!(filter.matches(&node_event("u1")));
        assert!(!filter.matches(&node_event("u2")));

        let edges_only = EventFilter::topics(vec![EventTopic::Edge]);
        assert!(!edges_only.matches(&node_event("u1")));
    }
}
