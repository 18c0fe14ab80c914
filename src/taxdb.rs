//src/taxdb.rs

use std::fmt;
use std::io::BufRead;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::TreeSappError;
use crate::io::open_text_reader;

pub const LINEAGE_SEPARATOR: &str = "; ";

static DOMAIN_PREFIX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-p]__").unwrap());
static NON_STANDARD_RANK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i) group| cluster| complex").unwrap());
static MULTI_SPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r" {2,}").unwrap());

/// Removes superfluous ranks and decorations that make lineage comparisons unreliable.
///
/// ```
/// use treesapp_rs::taxdb::clean_lineage;
/// assert_eq!(
///     clean_lineage("cellular organisms; d__Bacteria; Proteobacteria; delta/epsilon subdivisions; Deltaproteobacteria;"),
///     "Bacteria; Proteobacteria; Deltaproteobacteria"
/// );
/// ```
pub fn clean_lineage(raw: &str) -> String {
    let lineage = raw
        .replace("cellular organisms; ", "")
        .replace("delta/epsilon subdivisions; ", "")
        .replace("(miscellaneous)", "");

    let ranks: Vec<String> = lineage
        .split(';')
        .map(|token| {
            let token = MULTI_SPACE_RE.replace_all(token.trim(), " ");
            DOMAIN_PREFIX_RE.replace(&token, "").trim().to_string()
        })
        .filter(|token| !token.is_empty())
        .filter(|token| !NON_STANDARD_RANK_RE.is_match(token))
        .collect();

    ranks.join(LINEAGE_SEPARATOR)
}

/// An ordered list of rank labels, domain first. Always held in cleaned form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Lineage {
    ranks: Vec<String>,
}

impl Lineage {
    /// Clean and split a lineage string.
    pub fn parse(raw: &str) -> Self {
        let cleaned = clean_lineage(raw);
        Lineage::from_clean(&cleaned)
    }

    fn from_clean(cleaned: &str) -> Self {
        let ranks = if cleaned.is_empty() {
            Vec::new()
        } else {
            cleaned.split(LINEAGE_SEPARATOR).map(str::to_string).collect()
        };
        Lineage { ranks }
    }

    pub fn from_ranks<S: Into<String>>(ranks: impl IntoIterator<Item = S>) -> Self {
        Lineage {
            ranks: ranks.into_iter().map(Into::into).collect(),
        }
    }

    pub fn depth(&self) -> usize {
        self.ranks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }

    pub fn ranks(&self) -> &[String] {
        &self.ranks
    }

    /// The taxon at a 1-based rank ordinal.
    pub fn rank(&self, ordinal: usize) -> Option<&str> {
        if ordinal == 0 {
            return None;
        }
        self.ranks.get(ordinal - 1).map(String::as_str)
    }

    /// The first `depth` ranks (or the whole lineage if it is shallower).
    pub fn truncated(&self, depth: usize) -> Lineage {
        Lineage {
            ranks: self.ranks.iter().take(depth).cloned().collect(),
        }
    }

    pub fn is_prefix_of(&self, other: &Lineage) -> bool {
        self.depth() <= other.depth() && other.ranks[..self.depth()] == self.ranks[..]
    }
}

impl fmt::Display for Lineage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.ranks.join(LINEAGE_SEPARATOR))
    }
}

/// One reference sequence (a tip of the reference tree).
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceLeaf {
    pub leaf_id: u32,
    pub description: String,
    pub lineage: Lineage,
    pub is_complete: bool,
}

impl ReferenceLeaf {
    /// The lineage used for consensus: the leaf's own lineage, or its cleaned
    /// description when the reference carries no lineage.
    pub fn consensus_lineage(&self) -> Lineage {
        if self.is_complete {
            self.lineage.clone()
        } else {
            Lineage::parse(&self.description)
        }
    }
}

/// All leaves of one reference package, indexed by leaf id.
#[derive(Debug, Clone, Default)]
pub struct TaxonomyStore {
    leaves: Vec<ReferenceLeaf>,
}

impl TaxonomyStore {
    pub fn from_leaves(mut leaves: Vec<ReferenceLeaf>) -> Self {
        leaves.sort_by_key(|l| l.leaf_id);
        TaxonomyStore { leaves }
    }

    pub fn get(&self, leaf_id: u32) -> Option<&ReferenceLeaf> {
        self.leaves
            .binary_search_by_key(&leaf_id, |l| l.leaf_id)
            .ok()
            .map(|i| &self.leaves[i])
    }

    pub fn leaves(&self) -> &[ReferenceLeaf] {
        &self.leaves
    }

    /// Sorted leaf ids.
    pub fn leaf_ids(&self) -> Vec<u32> {
        self.leaves.iter().map(|l| l.leaf_id).collect()
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }
}

/// Parses a taxonomy file in the format:
/// ```text
/// <leaf_id>\t<description>[\t<lineage>]
/// ```
/// Lines starting with '#' and blank lines are skipped.
pub fn parse_taxonomy<P: AsRef<Path>>(filepath: P) -> Result<TaxonomyStore, TreeSappError> {
    let path = filepath.as_ref();
    let reader = open_text_reader(path)?;
    read_taxonomy(reader, path)
}

pub fn read_taxonomy<R: BufRead>(reader: R, path: &Path) -> Result<TaxonomyStore, TreeSappError> {
    let mut leaves: Vec<ReferenceLeaf> = Vec::new();

    for (idx, line_result) in reader.lines().enumerate() {
        let line_no = idx + 1;
        let line = line_result.map_err(|e| TreeSappError::io(path, e))?;
        let line = line.trim_end();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() < 2 || parts.len() > 3 {
            return Err(TreeSappError::BadTaxonomyLine {
                path: path.to_path_buf(),
                line: line_no,
                found: parts.len(),
            });
        }

        let leaf_str = parts[0].trim();
        let leaf_id = match leaf_str.parse::<u32>() {
            Ok(id) if id >= 1 => id,
            _ => {
                return Err(TreeSappError::BadLeafId {
                    path: path.to_path_buf(),
                    line: line_no,
                    value: leaf_str.to_string(),
                })
            }
        };

        let lineage = parts.get(2).map(|s| Lineage::parse(s)).unwrap_or_default();
        leaves.push(ReferenceLeaf {
            leaf_id,
            description: parts[1].trim().to_string(),
            is_complete: !lineage.is_empty(),
            lineage,
        });
    }

    let store = TaxonomyStore::from_leaves(leaves);
    if let Some(dup) = store.leaves.windows(2).find(|w| w[0].leaf_id == w[1].leaf_id) {
        return Err(TreeSappError::BadLeafId {
            path: path.to_path_buf(),
            line: 0,
            value: format!("{} (duplicate)", dup[0].leaf_id),
        });
    }

    log::debug!("Loaded {} reference leaves from {}", store.len(), path.display());
    Ok(store)
}
