// src/classify/classify_query.rs

use crate::abundance::AbundanceTable;
use crate::config::ClassifierConfig;
use crate::error::{ClassificationWarning, QueryError, TreeSappError};
use crate::jplace::{PQuery, Placement};
use crate::refpkg::{truncate_to_rank, ReferencePackage};
use crate::taxdb::Lineage;
use crate::tree_index::TreeIndex;
use crate::types::{fragment_length, ClassifiedQuery, QueryStatus};

use super::classify_stats::ClassifyStats;
use super::consensus::{lowest_common_taxonomy, Consensus};
use super::placement_filter::{best_placement, expand_candidate_leaves, filter_placements};
use super::wtd::{weighted_taxonomic_distance, MAX_DIST};

/// Read-only view of everything a worker needs to classify the queries of one package.
#[derive(Debug, Clone, Copy)]
pub struct QueryContext<'a> {
    pub package: &'a ReferencePackage,
    pub index: &'a TreeIndex,
    pub config: &'a ClassifierConfig,
    pub abundances: Option<&'a AbundanceTable>,
}

impl<'a> QueryContext<'a> {
    fn abundance_of(&self, pquery: &PQuery) -> f64 {
        let marker = &self.package.descriptor.name;
        self.abundances
            .and_then(|table| {
                table
                    .lookup(marker, &pquery.name)
                    .or_else(|| table.lookup(self.package.code(), &pquery.name))
            })
            .or(pquery.mass)
            .unwrap_or(1.0)
    }
}

fn report_placement(row: &mut ClassifiedQuery, placement: Option<Placement>) {
    if let Some(p) = placement {
        row.inode = Some(p.edge_num);
        row.likelihood = Some(p.likelihood);
        row.lwr = Some(p.like_weight_ratio);
    }
}

fn unclassified(mut row: ClassifiedQuery, error: QueryError, stats: &mut ClassifyStats) -> ClassifiedQuery {
    log::debug!("{} ({}) unclassified: {}", row.query, row.refpkg_code, error);
    stats.record_unclassified(&error);
    row.status = QueryStatus::Unclassified(error);
    row
}

/// Classify one placed query: threshold its placements, collect the lineages of
/// the leaves below them, collapse those to a consensus and score it.
///
/// Per-query failures come back as an unclassified row; only inconsistencies
/// between the placements and the reference package are errors.
pub fn classify_query(
    pquery: &PQuery,
    ctx: &QueryContext<'_>,
    stats: &mut ClassifyStats,
) -> Result<ClassifiedQuery, TreeSappError> {
    let code = ctx.package.code();
    let mut row = ClassifiedQuery {
        sample: ctx.config.sample_name.clone(),
        query: pquery.name.clone(),
        marker: ctx.package.descriptor.name.clone(),
        refpkg_code: code.to_string(),
        length: fragment_length(&pquery.name),
        taxonomy: String::new(),
        confident_taxonomy: String::new(),
        abundance: ctx.abundance_of(pquery),
        inode: None,
        likelihood: None,
        lwr: None,
        wtd: None,
        distances: Vec::new(),
        candidate_leaves: Vec::new(),
        retained_placements: 0,
        status: QueryStatus::Classified,
    };

    let retained = match filter_placements(pquery, ctx.config.min_lwr, ctx.config.placement_parser) {
        Ok(retained) => retained,
        Err(e) => {
            report_placement(&mut row, best_placement(&pquery.placements));
            return Ok(unclassified(row, e, stats));
        }
    };
    report_placement(&mut row, retained.first().copied());
    row.retained_placements = retained.len();

    let leaves = expand_candidate_leaves(&retained, ctx.index, code, &pquery.name)?;
    let mut lineages: Vec<Lineage> = Vec::with_capacity(leaves.len());
    for &leaf_id in &leaves {
        let leaf = ctx
            .package
            .taxonomy
            .get(leaf_id)
            .ok_or_else(|| TreeSappError::LeafSetMismatch {
                code: code.to_string(),
                reason: format!("leaf {} below edge {} has no taxonomy entry", leaf_id, row.inode.unwrap_or(0)),
            })?;
        let lineage = leaf.consensus_lineage();
        if !lineage.is_empty() {
            lineages.push(lineage);
        }
    }
    row.candidate_leaves = leaves;

    if lineages.is_empty() {
        return Ok(unclassified(row, QueryError::EmptyLineageSet, stats));
    }

    let result = lowest_common_taxonomy(&lineages, ctx.config.algorithm);
    if result.shallow > 0 {
        let detail = if result.informative == 0 {
            format!("all {} candidate lineages are too shallow to rank", lineages.len())
        } else {
            format!(
                "{} of {} candidate lineages too shallow, left out of the consensus",
                result.shallow,
                lineages.len()
            )
        };
        stats.record_warning(ClassificationWarning::ShallowLineage, code, &row.query, &detail);
    }
    match result.consensus {
        Consensus::Resolved { lineage, vote } => {
            log::trace!(
                "{} ({}): {} consensus '{}' with vote {:.3}",
                row.query,
                code,
                ctx.config.algorithm,
                lineage,
                vote
            );
            let rank = ctx.package.descriptor.lowest_confident_rank;
            if lineage.depth() < rank.ordinal() {
                stats.record_warning(
                    ClassificationWarning::BelowConfidentRank,
                    code,
                    &row.query,
                    &format!("consensus '{}' stops above {}", lineage, rank),
                );
            }

            let distance = weighted_taxonomic_distance(&lineages, &lineage);
            if distance.degenerate > 0 {
                stats.record_warning(
                    ClassificationWarning::DegenerateWtd,
                    code,
                    &row.query,
                    &format!(
                        "{} of {} lineages never meet '{}'",
                        distance.degenerate,
                        lineages.len(),
                        lineage
                    ),
                );
            }

            row.confident_taxonomy = truncate_to_rank(&lineage, rank).to_string();
            row.taxonomy = lineage.to_string();
            row.wtd = Some(distance.wtd);
            row.distances = distance.distances;
        }
        Consensus::Unresolved(message) => {
            stats.record_warning(
                ClassificationWarning::DegenerateWtd,
                code,
                &row.query,
                "no consensus lineage, WTD set to 1",
            );
            row.taxonomy = message;
            row.wtd = Some(1.0);
            row.distances = vec![MAX_DIST; lineages.len()];
        }
    }

    stats.record_classified();
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConsensusAlgorithm, PlacementMode};
    use crate::refpkg::{Rank, RefPkgDescriptor};
    use crate::taxdb::read_taxonomy;
    use std::path::Path;

    const TREE: &str = "((1:0.1{0},2:0.2{1}):0.3{2},(3:0.1{3},4:0.4{4}):0.2{5}):0.0{6};";
    const TAXONOMY: &str = "1\tA\td; p; c; o; f; g; s1
2\tB\td; p; c; o; f; g; s2
3\tC\td; p; c2; o2
4\tpartial leaf
";

    fn package(rank: Rank) -> ReferencePackage {
        let taxonomy = read_taxonomy(TAXONOMY.as_bytes(), Path::new("tax_ids_T.txt")).unwrap();
        let mut package = ReferencePackage::new(RefPkgDescriptor::new("T0001", "Test", rank), taxonomy);
        package.attach_tree(TREE).unwrap();
        package
    }

    fn pquery(name: &str, placements: &[(u32, f64, f64)]) -> PQuery {
        PQuery {
            name: name.to_string(),
            placements: placements
                .iter()
                .map(|&(edge_num, likelihood, like_weight_ratio)| Placement {
                    edge_num,
                    likelihood,
                    like_weight_ratio,
                    distal_length: None,
                    pendant_length: None,
                })
                .collect(),
            mass: None,
        }
    }

    fn run(pq: &PQuery, package: &ReferencePackage, config: &ClassifierConfig) -> (ClassifiedQuery, ClassifyStats) {
        let ctx = QueryContext {
            package,
            index: package.tree_index().unwrap(),
            config,
            abundances: None,
        };
        let mut stats = ClassifyStats::default();
        let row = classify_query(pq, &ctx, &mut stats).unwrap();
        (row, stats)
    }

    #[test]
    fn test_leaf_placement() {
        let package = package(Rank::Species);
        let config = ClassifierConfig::default();
        let (row, stats) = run(&pquery("q1", &[(0, -10.0, 1.0)]), &package, &config);
        assert!(row.is_classified());
        assert_eq!(row.candidate_leaves, vec![1]);
        assert_eq!(row.taxonomy, "d; p; c; o; f; g; s1");
        assert_eq!(row.confident_taxonomy, "d; p; c; o; f; g; s1");
        assert_eq!(row.wtd, Some(0.0));
        assert_eq!(row.inode, Some(0));
        assert_eq!(row.abundance, 1.0);
        assert_eq!(stats.classified, 1);
    }

    #[test]
    fn test_interior_placement_and_truncation() {
        let package = package(Rank::Families);
        let config = ClassifierConfig {
            algorithm: ConsensusAlgorithm::Megan,
            ..ClassifierConfig::default()
        };
        let (row, stats) = run(&pquery("q2", &[(2, -12.0, 1.0)]), &package, &config);
        assert_eq!(row.candidate_leaves, vec![1, 2]);
        assert_eq!(row.taxonomy, "d; p; c; o; f; g");
        assert_eq!(row.confident_taxonomy, "d; p; c; o; f");
        assert_eq!(row.distances, vec![1, 1]);
        assert_eq!(row.wtd, Some(0.01562));
        assert_eq!(stats.total_warnings(), 0);
    }

    #[test]
    fn test_below_threshold_reports_best_rejected() {
        let package = package(Rank::Species);
        let config = ClassifierConfig::default();
        let (row, stats) = run(&pquery("q3", &[(0, -10.0, 0.1), (1, -11.0, 0.1)]), &package, &config);
        assert!(!row.is_classified());
        assert_eq!(row.taxonomy, "");
        assert_eq!(row.inode, Some(0));
        assert_eq!(row.lwr, Some(0.1));
        assert_eq!(row.wtd, None);
        assert_eq!(stats.unclassified, 1);
        assert_eq!(stats.unclassified_reasons["AllPlacementsBelowThreshold"], 1);
    }

    #[test]
    fn test_leaf_without_lineage_uses_description() {
        let package = package(Rank::Species);
        let config = ClassifierConfig::default();
        // leaf 4's description is not a lineage of any depth worth ranking
        let (row, stats) = run(&pquery("q4", &[(4, -10.0, 1.0)]), &package, &config);
        assert!(row.is_classified());
        assert!(row.taxonomy.starts_with("Lowest common ancestor of: "));
        assert_eq!(row.confident_taxonomy, "");
        assert_eq!(row.wtd, Some(1.0));
        assert_eq!(stats.warning_count(ClassificationWarning::ShallowLineage), 1);
        assert_eq!(stats.warning_count(ClassificationWarning::DegenerateWtd), 1);
    }

    #[test]
    fn test_some_shallow_lineages_are_reported() {
        let package = package(Rank::Species);
        let config = ClassifierConfig::default();
        let (row, stats) = run(&pquery("q5", &[(5, -10.0, 1.0)]), &package, &config);
        assert!(row.is_classified());
        assert_eq!(row.candidate_leaves, vec![3, 4]);
        assert_eq!(row.taxonomy, "d; p; c2; o2");
        assert_eq!(stats.warning_count(ClassificationWarning::ShallowLineage), 1);
    }

    #[test]
    fn test_lca_mode_unions_leaves() {
        let package = package(Rank::Species);
        let config = ClassifierConfig {
            placement_parser: PlacementMode::Lca,
            algorithm: ConsensusAlgorithm::Megan,
            ..ClassifierConfig::default()
        };
        let (row, stats) = run(&pquery("q5", &[(0, -10.0, 0.6), (3, -11.0, 0.4)]), &package, &config);
        assert_eq!(row.retained_placements, 2);
        assert_eq!(row.candidate_leaves, vec![1, 3]);
        assert_eq!(row.inode, Some(0));
        assert_eq!(row.lwr, Some(0.6));
        assert_eq!(row.taxonomy, "d; p");
        assert_eq!(stats.warning_count(ClassificationWarning::BelowConfidentRank), 1);
    }

    #[test]
    fn test_unknown_edge_is_fatal() {
        let package = package(Rank::Species);
        let config = ClassifierConfig::default();
        let ctx = QueryContext {
            package: &package,
            index: package.tree_index().unwrap(),
            config: &config,
            abundances: None,
        };
        let mut stats = ClassifyStats::default();
        let err = classify_query(&pquery("q6", &[(99, -1.0, 1.0)]), &ctx, &mut stats).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::UnknownEdge);
    }

    #[test]
    fn test_abundance_precedence() {
        let package = package(Rank::Species);
        let config = ClassifierConfig::default();
        let mut table = AbundanceTable::default();
        table.insert("Test", "contig_1", 7.5);
        let ctx = QueryContext {
            package: &package,
            index: package.tree_index().unwrap(),
            config: &config,
            abundances: Some(&table),
        };
        let mut stats = ClassifyStats::default();

        let mut pq = pquery("contig_1|Test|1_90", &[(0, -10.0, 1.0)]);
        pq.mass = Some(2.0);
        let row = classify_query(&pq, &ctx, &mut stats).unwrap();
        assert_eq!(row.abundance, 7.5);
        assert_eq!(row.length, Some(90));

        pq.name = "contig_2".to_string();
        let row = classify_query(&pq, &ctx, &mut stats).unwrap();
        assert_eq!(row.abundance, 2.0);
        assert_eq!(row.length, None);
    }
}
