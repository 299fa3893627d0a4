//! # Partial Updates
//!
//! Tri-state field updates: a field is either left alone, set to a value,
//! or explicitly cleared. Avoids treating "not provided" and "zero value"
//! as the same thing.

use crate::entities::Node;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Update instruction for a single field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum Patch<T> {
    /// Leave the field unchanged.
    #[default]
    Unset,
    /// Replace the field with this value.
    Set(T),
    /// Reset the field to its empty value.
    Clear,
}

impl<T> Patch<T> {
    pub fn is_unset(&self) -> bool {
        matches!(self, Patch::Unset)
    }

    /// Apply to a field whose "cleared" value is `T::default()`.
    pub fn apply(self, field: &mut T)
    where
        T: Default,
    {
        match self {
            Patch::Unset => {}
            Patch::Set(value) => *field = value,
            Patch::Clear => *field = T::default(),
        }
    }

    /// Apply to an optional field (`Clear` sets `None`).
    pub fn apply_option(self, field: &mut Option<T>) {
        match self {
            Patch::Unset => {}
            Patch::Set(value) => *field = Some(value),
            Patch::Clear => *field = None,
        }
    }
}

impl<T> From<Option<T>> for Patch<T> {
    /// `Some` sets, `None` leaves the field alone.
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Patch::Set(v),
            None => Patch::Unset,
        }
    }
}

/// Partial update for a [`Node`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodePatch {
    #[serde(default)]
    pub content: Patch<String>,
    #[serde(default)]
    pub keywords: Patch<Vec<String>>,
    #[serde(default)]
    pub tags: Patch<Vec<String>>,
    #[serde(default)]
    pub metadata: Patch<BTreeMap<String, String>>,
    #[serde(default)]
    pub archived: Patch<bool>,
}

impl NodePatch {
    pub fn is_empty(&self) -> bool {
        self.content.is_unset()
            && self.keywords.is_unset()
            && self.tags.is_unset()
            && self.metadata.is_unset()
            && self.archived.is_unset()
    }

    /// Apply to `node`, touching `updated_at` only when something changed.
    ///
    /// The version is left to the optimistic-lock layer.
    pub fn apply_to(self, node: &mut Node) {
        if self.is_empty() {
            return;
        }
        self.content.apply(&mut node.content);
        self.keywords.apply(&mut node.keywords);
        self.tags.apply(&mut node.tags);
        self.metadata.apply(&mut node.metadata);
        self.archived.apply(&mut node.archived);
        node.updated_at = Utc::now();
    }
}
