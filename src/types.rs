//src/types.rs

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::QueryError;

/// Whether a query received a lineage.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryStatus {
    Classified,
    Unclassified(QueryError),
}

/// A structured representation of one row of the classification table.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedQuery {
    pub sample: String,
    pub query: String,
    /// Reference package name (the `Marker` column)
    pub marker: String,
    pub refpkg_code: String,
    /// Length of the fragment, when the query name carries its coordinates
    pub length: Option<u64>,
    /// Full consensus lineage, or the unresolved-ancestor message
    pub taxonomy: String,
    pub confident_taxonomy: String,
    pub abundance: f64,
    /// Edge of the best retained placement
    pub inode: Option<u32>,
    pub likelihood: Option<f64>,
    pub lwr: Option<f64>,
    pub wtd: Option<f64>,
    /// Per-leaf taxonomic distances, in candidate leaf order
    pub distances: Vec<u32>,
    pub candidate_leaves: Vec<u32>,
    pub retained_placements: usize,
    pub status: QueryStatus,
}

impl ClassifiedQuery {
    pub fn is_classified(&self) -> bool {
        self.status == QueryStatus::Classified
    }
}

/// Split `<contig>|<marker>|<start>_<end>` into the parent name and the fragment
/// coordinates. Names without a coordinate suffix give `None`.
pub fn parse_fragment_name(name: &str) -> Option<(&str, u64, u64)> {
    let (parent, coords) = name.rsplit_once('|')?;
    let (start, end) = coords.split_once('_')?;
    let start: u64 = start.parse().ok()?;
    let end: u64 = end.parse().ok()?;
    if end < start {
        return None;
    }
    Some((parent, start, end))
}

pub fn fragment_length(name: &str) -> Option<u64> {
    parse_fragment_name(name).map(|(_, start, end)| end - start + 1)
}

/// The query a fragment was cut from; the name itself when it is not a fragment.
pub fn parent_query(name: &str) -> &str {
    parse_fragment_name(name).map(|(parent, _, _)| parent).unwrap_or(name)
}

/// Cooperative cancellation flag, checked before each query starts.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
