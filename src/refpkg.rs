//src/refpkg.rs

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::TreeSappError;
use crate::io::open_text_reader;
use crate::taxdb::{Lineage, TaxonomyStore};
use crate::tree_index::TreeIndex;

/// Taxonomic ranks, numbered from the domain (1) to the species (7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Rank {
    Kingdoms = 1,
    Phyla = 2,
    Classes = 3,
    Orders = 4,
    Families = 5,
    Genera = 6,
    Species = 7,
}

impl Rank {
    pub const ALL: [Rank; 7] = [
        Rank::Kingdoms,
        Rank::Phyla,
        Rank::Classes,
        Rank::Orders,
        Rank::Families,
        Rank::Genera,
        Rank::Species,
    ];

    pub fn ordinal(&self) -> usize {
        *self as usize
    }

    pub fn name(&self) -> &'static str {
        match self {
            Rank::Kingdoms => "Kingdoms",
            Rank::Phyla => "Phyla",
            Rank::Classes => "Classes",
            Rank::Orders => "Orders",
            Rank::Families => "Families",
            Rank::Genera => "Genera",
            Rank::Species => "Species",
        }
    }
}

impl FromStr for Rank {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Rank::ALL.iter().copied().find(|r| r.name() == s.trim()).ok_or(())
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Cut a lineage back to the deepest rank considered reliable for a package.
/// Shallower lineages come back unchanged; the result is never longer than the input.
pub fn truncate_to_rank(lineage: &Lineage, rank: Rank) -> Lineage {
    lineage.truncated(rank.ordinal())
}

/// One row of the build-parameters table. Only `code`, `name` and
/// `lowest_confident_rank` drive classification; the rest is carried as-is.
#[derive(Debug, Clone, PartialEq, Deserialize)]
struct DescriptorRecord {
    code: String,
    name: String,
    #[serde(default)]
    molecule: String,
    #[serde(default)]
    substitution_model: String,
    #[serde(default)]
    clustering_identity: String,
    #[serde(default)]
    num_reference_sequences: String,
    #[serde(default)]
    tree_tool: String,
    #[serde(default)]
    fit_params: String,
    lowest_confident_rank: String,
    #[serde(default)]
    last_updated: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefPkgDescriptor {
    pub code: String,
    pub name: String,
    pub molecule: String,
    pub substitution_model: String,
    pub lowest_confident_rank: Rank,
    /// Remaining columns, kept verbatim.
    pub extra: BTreeMap<&'static str, String>,
}

impl RefPkgDescriptor {
    pub fn new(code: &str, name: &str, lowest_confident_rank: Rank) -> Self {
        RefPkgDescriptor {
            code: code.to_string(),
            name: name.to_string(),
            molecule: String::new(),
            substitution_model: String::new(),
            lowest_confident_rank,
            extra: BTreeMap::new(),
        }
    }
}

impl TryFrom<DescriptorRecord> for RefPkgDescriptor {
    type Error = TreeSappError;

    fn try_from(rec: DescriptorRecord) -> Result<Self, Self::Error> {
        let rank = rec
            .lowest_confident_rank
            .parse::<Rank>()
            .map_err(|_| TreeSappError::UnknownConfidentRank {
                code: rec.code.clone(),
                rank: rec.lowest_confident_rank.clone(),
            })?;

        let mut extra = BTreeMap::new();
        extra.insert("clustering_identity", rec.clustering_identity);
        extra.insert("num_reference_sequences", rec.num_reference_sequences);
        extra.insert("tree_tool", rec.tree_tool);
        extra.insert("fit_params", rec.fit_params);
        extra.insert("last_updated", rec.last_updated);
        extra.insert("description", rec.description);

        Ok(RefPkgDescriptor {
            code: rec.code,
            name: rec.name,
            molecule: rec.molecule,
            substitution_model: rec.substitution_model,
            lowest_confident_rank: rank,
            extra,
        })
    }
}

/// Parses the build-parameters table:
/// ```text
/// code  name  molecule  substitution_model  clustering_identity  num_reference_sequences
/// tree_tool  fit_params  lowest_confident_rank  last_updated  description
/// ```
/// (tab-separated). `#` lines and a header row starting with `code` are skipped.
/// Returns descriptors keyed by package code.
pub fn parse_ref_build_params<P: AsRef<Path>>(
    filepath: P,
) -> Result<BTreeMap<String, RefPkgDescriptor>, TreeSappError> {
    let path = filepath.as_ref();
    let reader = open_text_reader(path)?;

    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .comment(Some(b'#'))
        .flexible(true)
        .quoting(false)
        .from_reader(reader);

    let mut descriptors = BTreeMap::new();
    for (idx, result) in rdr.records().enumerate() {
        let record = result.map_err(|e| {
            TreeSappError::Config(format!("{}: row {}: {}", path.display(), idx + 1, e))
        })?;
        if record.get(0).map(str::trim) == Some("code") {
            continue;
        }
        let row: DescriptorRecord = record.deserialize(None).map_err(|e| {
            TreeSappError::Config(format!("{}: row {}: {}", path.display(), idx + 1, e))
        })?;
        let descriptor = RefPkgDescriptor::try_from(row)?;
        if descriptors.contains_key(&descriptor.code) {
            return Err(TreeSappError::Config(format!(
                "{}: reference package code '{}' appears more than once",
                path.display(),
                descriptor.code
            )));
        }
        descriptors.insert(descriptor.code.clone(), descriptor);
    }

    log::debug!("Read {} reference package descriptors from {}", descriptors.len(), path.display());
    Ok(descriptors)
}

/// A reference package: owns its leaves and, once a placement file has been
/// attached, the index of its annotated tree. Read-only after `attach_tree`.
#[derive(Debug, Clone)]
pub struct ReferencePackage {
    pub descriptor: RefPkgDescriptor,
    pub taxonomy: TaxonomyStore,
    tree_index: Option<TreeIndex>,
}

impl ReferencePackage {
    pub fn new(descriptor: RefPkgDescriptor, taxonomy: TaxonomyStore) -> Self {
        ReferencePackage {
            descriptor,
            taxonomy,
            tree_index: None,
        }
    }

    pub fn code(&self) -> &str {
        &self.descriptor.code
    }

    pub fn tree_index(&self) -> Option<&TreeIndex> {
        self.tree_index.as_ref()
    }

    /// Index `tree` and check it against the taxonomy. The first tree becomes the
    /// package's tree; later trees (from other placement batches) must index to
    /// exactly the same edges and subtrees.
    pub fn attach_tree(&mut self, tree: &str) -> Result<(), TreeSappError> {
        let index = TreeIndex::build(tree, &self.descriptor.code)?;
        index.verify_leaf_universe(&self.taxonomy.leaf_ids(), &self.descriptor.code)?;

        match &self.tree_index {
            Some(existing) if !existing.same_topology(&index) => Err(TreeSappError::LeafSetMismatch {
                code: self.descriptor.code.clone(),
                reason: "placement batches were computed against different reference trees"
                    .to_string(),
            }),
            Some(_) => Ok(()),
            None => {
                log::debug!(
                    "Indexed tree of {}: {} leaves, {} edges",
                    self.descriptor.code,
                    index.leaf_count(),
                    index.edge_count()
                );
                self.tree_index = Some(index);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const HEADER: &str = "code\tname\tmolecule\tsubstitution_model\tclustering_identity\tnum_reference_sequences\ttree_tool\tfit_params\tlowest_confident_rank\tlast_updated\tdescription\n";

    fn write_params(body: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ref_build_parameters.tsv");
        std::fs::write(&path, format!("{}{}", HEADER, body)).unwrap();
        (dir, path)
    }

    #[test]
    fn test_rank_parse_and_truncate() {
        assert_eq!("Families".parse::<Rank>(), Ok(Rank::Families));
        assert!("Family".parse::<Rank>().is_err());
        let l = Lineage::parse("d; p; c; o; f; g; s1");
        assert_eq!(truncate_to_rank(&l, Rank::Families).to_string(), "d; p; c; o; f");
        assert_eq!(truncate_to_rank(&l, Rank::Species), l);
        let shallow = Lineage::parse("d; p");
        assert_eq!(truncate_to_rank(&shallow, Rank::Genera), shallow);
    }

    #[test]
    fn test_truncation_idempotent() {
        let l = Lineage::parse("d; p; c; o; f; g; s1");
        for rank in Rank::ALL {
            let once = truncate_to_rank(&l, rank);
            assert_eq!(truncate_to_rank(&once, rank), once);
            assert!(once.depth() <= l.depth());
        }
    }

    #[test]
    fn test_parse_ref_build_params() {
        let (_dir, path) = write_params(
            "# disabled package\nM0701\tMcrA\tprot\tLG+G4\t97\t214\tRAxML\t\tFamilies\t2019-01-01\tmethyl-coenzyme M reductase\n\
             M0702\tMcrB\tprot\tLG\t97\t180\tRAxML\t\tGenera\t2019-01-01\t\n",
        );
        let params = parse_ref_build_params(&path).unwrap();
        assert_eq!(params.len(), 2);
        let mcra = &params["M0701"];
        assert_eq!(mcra.name, "McrA");
        assert_eq!(mcra.substitution_model, "LG+G4");
        assert_eq!(mcra.lowest_confident_rank, Rank::Families);
        assert_eq!(mcra.extra["tree_tool"], "RAxML");
        assert_eq!(params["M0702"].lowest_confident_rank, Rank::Genera);
    }

    #[test]
    fn test_unknown_confident_rank_is_fatal() {
        let (_dir, path) = write_params("M0701\tMcrA\tprot\tLG\t97\t214\tRAxML\t\tTribes\t2019\t\n");
        let err = parse_ref_build_params(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownConfidentRank);
        assert!(err.to_string().contains("M0701"));
    }

    #[test]
    fn test_duplicate_codes_rejected() {
        let (_dir, path) = write_params(
            "M0701\tMcrA\tprot\tLG\t97\t214\tRAxML\t\tGenera\t2019\t\n\
             M0701\tMcrA2\tprot\tLG\t97\t214\tRAxML\t\tGenera\t2019\t\n",
        );
        assert_eq!(parse_ref_build_params(&path).unwrap_err().kind(), ErrorKind::Config);
    }
}
