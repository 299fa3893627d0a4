//! # Domain Events
//!
//! Events buffered by a unit of work and published only after a
//! successful commit.

use crate::entities::{CategoryId, EdgeId, NodeId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What happened to which aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEventKind {
    NodeCreated { node_id: NodeId },
    NodeUpdated { node_id: NodeId, version: u64 },
    NodeDeleted { node_id: NodeId },
    NodeArchived { node_id: NodeId },
    NodeUnarchived { node_id: NodeId },
    EdgeCreated { edge_id: EdgeId, source_id: NodeId, target_id: NodeId },
    EdgeDeleted { edge_id: EdgeId },
    CategoryCreated { category_id: CategoryId },
    CategoryDeleted { category_id: CategoryId },
}

impl DomainEventKind {
    /// Stable dotted name, used as the bus topic.
    pub fn name(&self) -> &'static str {
        match self {
            DomainEventKind::NodeCreated { .. } => "node.created",
            DomainEventKind::NodeUpdated { .. } => "node.updated",
            DomainEventKind::NodeDeleted { .. } => "node.deleted",
            DomainEventKind::NodeArchived { .. } => "node.archived",
            DomainEventKind::NodeUnarchived { .. } => "node.unarchived",
            DomainEventKind::EdgeCreated { .. } => "edge.created",
            DomainEventKind::EdgeDeleted { .. } => "edge.deleted",
            DomainEventKind::CategoryCreated { .. } => "category.created",
            DomainEventKind::CategoryDeleted { .. } => "category.deleted",
        }
    }

    /// Identifier of the aggregate the event is about.
    pub fn aggregate_id(&self) -> &str {
        match self {
            DomainEventKind::NodeCreated { node_id }
            | DomainEventKind::NodeUpdated { node_id, .. }
            | DomainEventKind::NodeDeleted { node_id }
            | DomainEventKind::NodeArchived { node_id }
            | DomainEventKind::NodeUnarchived { node_id } => node_id.as_str(),
            DomainEventKind::EdgeCreated { edge_id, .. }
            | DomainEventKind::EdgeDeleted { edge_id } => edge_id.as_str(),
            DomainEventKind::CategoryCreated { category_id }
            | DomainEventKind::CategoryDeleted { category_id } => category_id.as_str(),
        }
    }
}

/// An event raised inside a unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub event_id: Uuid,
    pub user_id: UserId,
    pub kind: DomainEventKind,
    pub occurred_at: DateTime<Utc>,
}

impl DomainEvent {
    pub fn new(user_id: UserId, kind: DomainEventKind) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            user_id,
            kind,
            occurred_at: Utc::now(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}
