// src/classify/consensus.rs

use ahash::AHashMap;

use crate::config::ConsensusAlgorithm;
use crate::taxdb::Lineage;

/// Lineages shallower than this do not inform the consensus.
pub const MIN_INFORMATIVE_DEPTH: usize = 4;

pub const UNRESOLVED_PREFIX: &str = "Lowest common ancestor of: ";

/// The outcome of collapsing a lineage multiset.
#[derive(Debug, Clone, PartialEq)]
pub enum Consensus {
    Resolved {
        lineage: Lineage,
        /// Support for the deepest elected taxon (1.0 for MEGAN)
        vote: f64,
    },
    /// No informative lineage, or no agreement even at the domain.
    Unresolved(String),
}

impl Consensus {
    pub fn lineage(&self) -> Option<&Lineage> {
        match self {
            Consensus::Resolved { lineage, .. } => Some(lineage),
            Consensus::Unresolved(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConsensusResult {
    pub consensus: Consensus,
    /// Lineages dropped for being shallower than `MIN_INFORMATIVE_DEPTH`
    pub shallow: usize,
    /// Lineages that took part in the vote
    pub informative: usize,
}

/// One taxon of the lineage tree: the path of ranks from the root to it is the
/// lineage prefix it stands for.
#[derive(Debug, Clone)]
struct TaxonNode {
    taxon: String,
    parent: Option<usize>,
    /// Lineages passing through (or ending at) this taxon
    count: usize,
    children: Vec<usize>,
}

/// Flat table of the taxonomy induced by a set of lineages. Node 0 is the root.
#[derive(Debug)]
struct LineageTree {
    nodes: Vec<TaxonNode>,
    /// reach[r] = lineages of depth >= r
    reach: Vec<usize>,
}

impl LineageTree {
    fn build(lineages: &[&Lineage]) -> Self {
        let mut nodes = vec![TaxonNode {
            taxon: String::new(),
            parent: None,
            count: 0,
            children: Vec::new(),
        }];
        let mut index: AHashMap<(usize, &str), usize> = AHashMap::new();
        let max_depth = lineages.iter().map(|l| l.depth()).max().unwrap_or(0);
        let mut reach = vec![0usize; max_depth + 1];

        for &lineage in lineages {
            nodes[0].count += 1;
            reach[..=lineage.depth()].iter_mut().for_each(|r| *r += 1);

            let mut current = 0;
            for taxon in lineage.ranks() {
                let next = match index.get(&(current, taxon.as_str())) {
                    Some(&i) => i,
                    None => {
                        let i = nodes.len();
                        nodes.push(TaxonNode {
                            taxon: taxon.clone(),
                            parent: Some(current),
                            count: 0,
                            children: Vec::new(),
                        });
                        nodes[current].children.push(i);
                        index.insert((current, taxon.as_str()), i);
                        i
                    }
                };
                nodes[next].count += 1;
                current = next;
            }
        }

        // Child order must not depend on lineage order
        let names: Vec<String> = nodes.iter().map(|n| n.taxon.clone()).collect();
        for node in nodes.iter_mut() {
            node.children.sort_by(|&a, &b| names[a].cmp(&names[b]));
        }

        LineageTree { nodes, reach }
    }

    fn total(&self) -> usize {
        self.nodes[0].count
    }

    fn continuing(&self, node: usize) -> usize {
        self.nodes[node].children.iter().map(|&c| self.nodes[c].count).sum()
    }

    fn lineage_of(&self, mut node: usize) -> Lineage {
        let mut ranks = Vec::new();
        while let Some(parent) = self.nodes[node].parent {
            ranks.push(self.nodes[node].taxon.clone());
            node = parent;
        }
        ranks.reverse();
        Lineage::from_ranks(ranks)
    }

    /// Descend while every lineage continues into the same single child.
    fn megan(&self) -> usize {
        let mut node = 0;
        loop {
            match self.nodes[node].children.as_slice() {
                [only] if self.nodes[*only].count == self.total() => node = *only,
                _ => return node,
            }
        }
    }

    /// Descend while one child holds a strict majority of the lineages that
    /// reach its rank.
    fn lca_star(&self) -> (usize, f64) {
        let mut node = 0;
        let mut depth = 0;
        let mut vote = 1.0;
        loop {
            let reaching = match self.reach.get(depth + 1) {
                Some(&r) if r > 0 => r,
                _ => return (node, vote),
            };
            let winner = self.nodes[node]
                .children
                .iter()
                .copied()
                .find(|&c| 2 * self.nodes[c].count > reaching);
            match winner {
                Some(child) => {
                    vote = self.nodes[child].count as f64 / reaching as f64;
                    node = child;
                    depth += 1;
                }
                None => return (node, vote),
            }
        }
    }

    /// Start from the MEGAN nucleus and follow the child carrying more than half
    /// of the vote passed down from its parent. The returned vote is the product
    /// of the shares along the elected path.
    fn lcap(&self) -> (usize, f64) {
        let mut node = self.megan();
        let nucleus_vote = self.total() as f64 / self.nodes[node].count as f64;
        let threshold = nucleus_vote / 2.0;
        let mut accumulated = nucleus_vote;
        loop {
            let continuing = self.continuing(node);
            if continuing == 0 {
                return (node, accumulated);
            }
            let winner = self.nodes[node].children.iter().copied().find_map(|c| {
                let share = self.nodes[c].count as f64 / continuing as f64;
                (nucleus_vote * share > threshold).then_some((c, share))
            });
            match winner {
                Some((child, share)) => {
                    node = child;
                    accumulated *= share;
                }
                None => return (node, accumulated),
            }
        }
    }
}

/// Message reported when the lineages cannot be collapsed.
pub fn unresolved_message<'a>(lineages: impl IntoIterator<Item = &'a Lineage>) -> String {
    let listed: Vec<String> = lineages.into_iter().map(|l| l.to_string()).collect();
    format!("{}{}", UNRESOLVED_PREFIX, listed.join(", "))
}

/// Collapse the candidate lineages of a query into one consensus lineage.
pub fn lowest_common_taxonomy(lineages: &[Lineage], algorithm: ConsensusAlgorithm) -> ConsensusResult {
    let informative: Vec<&Lineage> = lineages
        .iter()
        .filter(|l| l.depth() >= MIN_INFORMATIVE_DEPTH)
        .collect();
    let shallow = lineages.len() - informative.len();

    if informative.is_empty() {
        return ConsensusResult {
            consensus: Consensus::Unresolved(unresolved_message(lineages)),
            shallow,
            informative: 0,
        };
    }

    let tree = LineageTree::build(&informative);
    let (node, vote) = match algorithm {
        ConsensusAlgorithm::Megan => (tree.megan(), 1.0),
        ConsensusAlgorithm::LcaStar => tree.lca_star(),
        ConsensusAlgorithm::LcaP => tree.lcap(),
    };

    let consensus = if node == 0 {
        Consensus::Unresolved(unresolved_message(informative.iter().copied()))
    } else {
        Consensus::Resolved {
            lineage: tree.lineage_of(node),
            vote,
        }
    };

    ConsensusResult {
        consensus,
        shallow,
        informative: informative.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lineages(raw: &[&str]) -> Vec<Lineage> {
        raw.iter().map(|l| Lineage::parse(l)).collect()
    }

    fn resolved(result: &ConsensusResult) -> String {
        result.consensus.lineage().expect("resolved").to_string()
    }

    #[test]
    fn test_identical_lineages() {
        let set = lineages(&["d; p; c; o; f; g; s1"]);
        for algorithm in [ConsensusAlgorithm::Megan, ConsensusAlgorithm::LcaStar, ConsensusAlgorithm::LcaP] {
            let result = lowest_common_taxonomy(&set, algorithm);
            assert_eq!(resolved(&result), "d; p; c; o; f; g; s1");
        }
    }

    #[test]
    fn test_megan_stops_at_first_disagreement() {
        let set = lineages(&["d; p; c; o; f; g; s1", "d; p; c; o; f; g; s2"]);
        let result = lowest_common_taxonomy(&set, ConsensusAlgorithm::Megan);
        assert_eq!(resolved(&result), "d; p; c; o; f; g");
    }

    #[test]
    fn test_megan_stops_where_a_lineage_ends() {
        let set = lineages(&["d; p; c; o; f; g; s1", "d; p; c; o"]);
        let result = lowest_common_taxonomy(&set, ConsensusAlgorithm::Megan);
        assert_eq!(resolved(&result), "d; p; c; o");
        // Truncated lineages do not count against the majority
        let result = lowest_common_taxonomy(&set, ConsensusAlgorithm::LcaStar);
        assert_eq!(resolved(&result), "d; p; c; o; f; g; s1");
    }

    #[test]
    fn test_lca_star_tolerates_a_dissenter() {
        let set = lineages(&[
            "d; p; c; o; f; G; s1",
            "d; p; c; o; f; G; s2",
            "d; p; c; o; f; G; s3",
            "d; p; c; o; f; G; s4",
            "d; p; x; y; z; H; s5",
        ]);
        let megan = lowest_common_taxonomy(&set, ConsensusAlgorithm::Megan);
        assert_eq!(resolved(&megan), "d; p");

        let star = lowest_common_taxonomy(&set, ConsensusAlgorithm::LcaStar);
        assert_eq!(resolved(&star), "d; p; c; o; f; G");

        let lcap = lowest_common_taxonomy(&set, ConsensusAlgorithm::LcaP);
        assert_eq!(resolved(&lcap), "d; p; c; o; f; G");
        match lcap.consensus {
            Consensus::Resolved { vote, .. } => assert!(vote > 0.5 && (vote - 0.8).abs() < 1e-12),
            _ => panic!("expected a resolved consensus"),
        }
    }

    #[test]
    fn test_lca_star_no_majority() {
        let set = lineages(&["d; p; c1; o", "d; p; c2; o", "d; p; c3; o"]);
        let star = lowest_common_taxonomy(&set, ConsensusAlgorithm::LcaStar);
        assert_eq!(resolved(&star), "d; p");
    }

    #[test]
    fn test_lca_star_majority_uses_full_prefix() {
        // Same genus name under different families is not the same taxon
        let set = lineages(&["d; p; c; o; f1; g", "d; p; c; o; f2; g", "d; p; c; o; f3; g"]);
        let star = lowest_common_taxonomy(&set, ConsensusAlgorithm::LcaStar);
        assert_eq!(resolved(&star), "d; p; c; o");
    }

    #[test]
    fn test_shallow_lineages_are_discarded() {
        let set = lineages(&["d; p; c; o; f", "d; p"]);
        let result = lowest_common_taxonomy(&set, ConsensusAlgorithm::Megan);
        assert_eq!(resolved(&result), "d; p; c; o; f");
        assert_eq!(result.shallow, 1);
        assert_eq!(result.informative, 1);
    }

    #[test]
    fn test_all_shallow_falls_back() {
        let set = lineages(&["d1; p1; c1", "d2; p2; c2"]);
        let result = lowest_common_taxonomy(&set, ConsensusAlgorithm::LcaStar);
        assert_eq!(
            result.consensus,
            Consensus::Unresolved("Lowest common ancestor of: d1; p1; c1, d2; p2; c2".to_string())
        );
        assert_eq!(result.shallow, 2);
    }

    #[test]
    fn test_no_domain_agreement_is_unresolved() {
        let set = lineages(&["d1; p; c; o", "d2; p; c; o"]);
        let result = lowest_common_taxonomy(&set, ConsensusAlgorithm::Megan);
        assert!(matches!(result.consensus, Consensus::Unresolved(_)));
    }

    #[test]
    fn test_order_independent() {
        let mut set = lineages(&[
            "d; p; c; o; f; g2; s",
            "d; p; c; o; f; g1; s",
            "d; p; c; o; f; g1; t",
        ]);
        let forward = lowest_common_taxonomy(&set, ConsensusAlgorithm::LcaP);
        set.reverse();
        let backward = lowest_common_taxonomy(&set, ConsensusAlgorithm::LcaP);
        assert_eq!(forward, backward);
        assert_eq!(resolved(&forward), "d; p; c; o; f; g1");
    }
}
