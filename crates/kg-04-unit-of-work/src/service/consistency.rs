//! Consistency checks over one user's graph.
//!
//! Findings are collected, not thrown: [`ConsistencyChecker::check`] lists
//! every problem, and [`ConsistencyChecker::verify`] turns a non-empty list
//! into `RepositoryError::DataCorruption`.

use kg_01_query::QueryOptions;
use shared_types::{
    Context, CorruptionFinding, CorruptionKind, Edge, Node, NodeId, RepositoryError,
    RepositoryResult, UserId,
};
use std::collections::HashSet;
use tracing::{info, warn};

use crate::ports::RepositorySet;

pub const DEFAULT_MAX_KEYWORD_LENGTH: usize = 50;

const SCAN_PAGE_SIZE: u32 = 500;

#[derive(Debug, Clone)]
pub struct ConsistencyChecker {
    /// Every edge must have a counterpart in the opposite direction.
    pub bidirectional: bool,
    pub max_keyword_length: usize,
}

impl Default for ConsistencyChecker {
    fn default() -> Self {
        Self {
            bidirectional: false,
            max_keyword_length: DEFAULT_MAX_KEYWORD_LENGTH,
        }
    }
}

impl ConsistencyChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bidirectional(mut self, bidirectional: bool) -> Self {
        self.bidirectional = bidirectional;
        self
    }

    pub fn check(&self, nodes: &[Node], edges: &[Edge]) -> Vec<CorruptionFinding> {
        let mut findings = Vec::new();
        let node_ids: HashSet<&NodeId> = nodes.iter().map(|n| &n.id).collect();

        for edge in edges {
            for (end, id) in [("source", &edge.source_id), ("target", &edge.target_id)] {
                if !node_ids.contains(id) {
                    findings.push(CorruptionFinding {
                        kind: CorruptionKind::OrphanedEdge,
                        entity_id: edge.id.to_string(),
                        detail: format!("{end} node {id} does not exist"),
                    });
                }
            }
        }

        if self.bidirectional {
            let directions: HashSet<(&NodeId, &NodeId)> = edges
                .iter()
                .map(|e| (&e.source_id, &e.target_id))
                .collect();
            for edge in edges {
                if !directions.contains(&(&edge.target_id, &edge.source_id)) {
                    findings.push(CorruptionFinding {
                        kind: CorruptionKind::MissingReverseEdge,
                        entity_id: edge.id.to_string(),
                        detail: format!("no edge from {} to {}", edge.target_id, edge.source_id),
                    });
                }
            }
        }

        for node in nodes {
            for keyword in &node.keywords {
                if let Some(problem) = self.keyword_problem(keyword) {
                    findings.push(CorruptionFinding {
                        kind: CorruptionKind::InvalidKeyword,
                        entity_id: node.id.to_string(),
                        detail: format!("keyword {keyword:?} {problem}"),
                    });
                }
            }
        }

        findings
    }

    fn keyword_problem(&self, keyword: &str) -> Option<&'static str> {
        if keyword.trim().is_empty() {
            Some("is empty")
        } else if keyword.trim() != keyword {
            Some("has surrounding whitespace")
        } else if keyword.to_lowercase() != keyword {
            Some("is not lowercase")
        } else if keyword.chars().count() > self.max_keyword_length {
            Some("is too long")
        } else {
            None
        }
    }

    pub fn verify(&self, nodes: &[Node], edges: &[Edge]) -> RepositoryResult<()> {
        let findings = self.check(nodes, edges);
        if findings.is_empty() {
            Ok(())
        } else {
            Err(RepositoryError::DataCorruption { findings })
        }
    }

    /// Load every node and edge of `user_id`, archived ones included, and
    /// check them.
    pub async fn scan(
        &self,
        ctx: &Context,
        repositories: &RepositorySet,
        user_id: &UserId,
    ) -> RepositoryResult<Vec<CorruptionFinding>> {
        let mut nodes = Vec::new();
        let mut options = scan_options();
        loop {
            let page = repositories.nodes.find_by_user(ctx, user_id, &options).await?;
            nodes.extend(page.items);
            if !page.has_more {
                break;
            }
            options.cursor = Some(page.next_cursor);
        }

        let mut edges = Vec::new();
        let mut options = scan_options();
        loop {
            let page = repositories.edges.find_by_user(ctx, user_id, &options).await?;
            edges.extend(page.items);
            if !page.has_more {
                break;
            }
            options.cursor = Some(page.next_cursor);
        }

        let findings = self.check(&nodes, &edges);
        if findings.is_empty() {
            info!(user_id = %user_id, nodes = nodes.len(), edges = edges.len(), "Graph is consistent");
        } else {
            warn!(user_id = %user_id, findings = findings.len(), "Graph has inconsistencies");
        }
        Ok(findings)
    }
}

fn scan_options() -> QueryOptions {
    QueryOptions {
        limit: SCAN_PAGE_SIZE,
        include_archived: true,
        ..Default::default()
    }
}
