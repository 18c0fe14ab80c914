pub mod classify_queries;
pub mod classify_query;
pub mod classify_stats;
pub mod consensus;
pub mod placement_filter;
pub mod wtd;

pub use classify_queries::{classify_queries, classify_queries_parallel};
pub use classify_query::{classify_query, QueryContext};
pub use classify_stats::ClassifyStats;
pub use consensus::{lowest_common_taxonomy, Consensus, ConsensusResult};
pub use wtd::{weighted_taxonomic_distance, TaxonomicDistance};
