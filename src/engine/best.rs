//! Deduplication of labeled candidate rows into the curated "best" set.
//!
//! Grouping is by strategy identity. Every label in a group survives onto
//! the single output row: selection picks the representative *metrics*,
//! never discards labels.

use std::cmp::Reverse;

use ordered_float::OrderedFloat;
use rustc_hash::FxHashMap;

use super::types::{MetricTypeLabel, PortfolioRow, StrategyId};

/// Collapse the candidate multiset to one row per strategy id.
///
/// The output row takes its metrics from the group's highest-score member
/// (ties resolve to the lexicographically smallest id) and carries the
/// concatenation of every label in the group, sorted by bucket priority
/// (Most < Mean < Median < Least) then alphabetically, with exact
/// duplicates removed. Output is ordered by score descending, ties by id
/// ascending.
pub fn deduplicate(rows: Vec<PortfolioRow>) -> Vec<PortfolioRow> {
    let mut groups: FxHashMap<StrategyId, Vec<PortfolioRow>> = FxHashMap::default();
    for row in rows {
        groups.entry(row.id.clone()).or_default().push(row);
    }

    let mut out: Vec<PortfolioRow> = groups
        .into_values()
        .map(|group| {
            let mut labels: Vec<MetricTypeLabel> = group
                .iter()
                .flat_map(|r| r.labels.iter().copied())
                .collect();
            labels.sort();
            labels.dedup();

            let mut representative = group
                .into_iter()
                .max_by(|a, b| {
                    a.metrics
                        .score
                        .partial_cmp(&b.metrics.score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| b.id.cmp(&a.id))
                })
                .expect("group is non-empty by construction");
            representative.labels = labels;
            representative
        })
        .collect();

    out.sort_by_key(|r| (Reverse(OrderedFloat(r.metrics.score)), r.id.clone()));
    out
}
