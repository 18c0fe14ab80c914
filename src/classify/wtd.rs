// src/classify/wtd.rs

use std::cmp::Ordering;

use crate::taxdb::Lineage;

/// Distances are capped here and WTD is normalised by `2^MAX_DIST`.
pub const MAX_DIST: u32 = 7;

/// Per-query weighted taxonomic distance and its per-leaf components.
#[derive(Debug, Clone, PartialEq)]
pub struct TaxonomicDistance {
    pub wtd: f64,
    /// One entry per candidate lineage, same order
    pub distances: Vec<u32>,
    /// Leaves whose walk never met the consensus
    pub degenerate: usize,
}

/// Rank steps taken from the tips of `lineage` and `consensus` until the two
/// remaining prefixes are the same lineage. `None` when they never meet.
pub fn leaf_distance(lineage: &Lineage, consensus: &Lineage) -> Option<u32> {
    let mut query = lineage.ranks();
    let mut reference = consensus.ranks();
    let mut distance = 0u32;
    loop {
        if !query.is_empty() && query == reference {
            return Some(distance);
        }
        match (query.split_last(), reference.split_last()) {
            (Some((_, q_rest)), Some((_, r_rest))) => {
                // The longer side steps alone; equal lengths step together
                match query.len().cmp(&reference.len()) {
                    Ordering::Greater => query = q_rest,
                    Ordering::Less => reference = r_rest,
                    Ordering::Equal => {
                        query = q_rest;
                        reference = r_rest;
                    }
                }
                distance += 1;
            }
            _ => return None,
        }
    }
}

fn leaf_weight(distance: u32) -> f64 {
    if distance == 0 {
        0.0
    } else {
        2f64.powi(distance as i32)
    }
}

/// Round half-to-even at five decimals.
pub fn round_wtd(value: f64) -> f64 {
    (value * 1e5).round_ties_even() / 1e5
}

/// WTD of the candidate lineages against a non-empty consensus.
pub fn weighted_taxonomic_distance(lineages: &[Lineage], consensus: &Lineage) -> TaxonomicDistance {
    let mut degenerate = 0;
    let distances: Vec<u32> = lineages
        .iter()
        .map(|lineage| {
            let distance = leaf_distance(lineage, consensus).unwrap_or_else(|| {
                degenerate += 1;
                consensus.depth() as u32
            });
            distance.min(MAX_DIST)
        })
        .collect();

    if distances.is_empty() {
        return TaxonomicDistance {
            wtd: 0.0,
            distances,
            degenerate,
        };
    }

    let total: f64 = distances.iter().map(|&d| leaf_weight(d)).sum();
    let wtd = total / (distances.len() as f64 * 2f64.powi(MAX_DIST as i32));
    TaxonomicDistance {
        wtd: round_wtd(wtd),
        distances,
        degenerate,
    }
}
