// src/classify/placement_filter.rs

use std::cmp::Ordering;

use crate::config::PlacementMode;
use crate::error::{QueryError, TreeSappError};
use crate::jplace::{PQuery, Placement};
use crate::tree_index::TreeIndex;

/// Higher LWR first, then higher likelihood, then lower edge number.
pub fn placement_order(a: &Placement, b: &Placement) -> Ordering {
    b.like_weight_ratio
        .total_cmp(&a.like_weight_ratio)
        .then_with(|| b.likelihood.total_cmp(&a.likelihood))
        .then_with(|| a.edge_num.cmp(&b.edge_num))
}

/// The placement reported for a query, whether or not it passed the threshold.
pub fn best_placement(placements: &[Placement]) -> Option<Placement> {
    placements.iter().copied().min_by(placement_order)
}

/// Apply the LWR threshold and the placement-parser policy.
/// Retained placements come back ordered best first, so element 0 always
/// supplies the reported edge, likelihood and LWR.
pub fn filter_placements(
    pquery: &PQuery,
    min_lwr: f64,
    mode: PlacementMode,
) -> Result<Vec<Placement>, QueryError> {
    let mut retained: Vec<Placement> = pquery
        .placements
        .iter()
        .copied()
        .filter(|p| p.like_weight_ratio >= min_lwr)
        .collect();

    if retained.is_empty() {
        return Err(QueryError::AllPlacementsBelowThreshold {
            count: pquery.placements.len(),
            threshold: min_lwr,
        });
    }

    retained.sort_by(placement_order);
    if mode == PlacementMode::Best {
        retained.truncate(1);
    }
    Ok(retained)
}

/// Union of the leaves subtended by every retained placement, sorted ascending.
/// An edge the tree does not know means the placements were made against another
/// tree, which is fatal.
pub fn expand_candidate_leaves(
    placements: &[Placement],
    index: &TreeIndex,
    code: &str,
    query: &str,
) -> Result<Vec<u32>, TreeSappError> {
    let mut leaves: Vec<u32> = Vec::new();
    for placement in placements {
        let below = index
            .leaves_below_edge(placement.edge_num)
            .ok_or_else(|| TreeSappError::UnknownEdge {
                code: code.to_string(),
                query: query.to_string(),
                edge: placement.edge_num,
            })?;
        leaves.extend_from_slice(below);
    }
    leaves.sort_unstable();
    leaves.dedup();
    Ok(leaves)
}
