//! Optional pre-execution performance pass.
//!
//! Rewrites never change which entities a query matches.

use tracing::debug;

use super::builder::Query;
use super::options::ReadPreference;
use super::specification::Specification;

#[derive(Debug, Clone)]
pub struct QueryOptimizer {
    /// Limits above this are capped.
    pub max_limit: u32,
    /// Send sorted reads to a secondary.
    pub secondary_reads_for_sorted: bool,
    /// Reorder AND conjuncts by ascending selectivity.
    pub reorder_conjuncts: bool,
}

impl Default for QueryOptimizer {
    fn default() -> Self {
        Self {
            max_limit: 1_000,
            secondary_reads_for_sorted: true,
            reorder_conjuncts: true,
        }
    }
}

impl QueryOptimizer {
    pub fn optimize(&self, mut query: Query) -> Query {
        if query.limit > self.max_limit {
            debug!(requested = query.limit, cap = self.max_limit, "Capping query limit");
            query.limit = self.max_limit;
        }

        if self.secondary_reads_for_sorted
            && !query.sort.is_empty()
            && query.read_preference == ReadPreference::Primary
        {
            query.read_preference = ReadPreference::Secondary;
        }

        if self.reorder_conjuncts {
            query.specification = reorder_by_selectivity(&query.specification);
        }

        query
    }
}

/// Rebuild a top-level conjunction with the most selective conjunct first.
pub fn reorder_by_selectivity(spec: &Specification) -> Specification {
    let mut conjuncts = spec.conjuncts();
    if conjuncts.len() < 2 {
        return spec.clone();
    }
    conjuncts.sort_by(|a, b| a.selectivity().total_cmp(&b.selectivity()));
    conjuncts
        .into_iter()
        .fold(Specification::All, |acc, c| acc.and(c))
}
