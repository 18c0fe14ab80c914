//src/config.rs

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TreeSappError;

/// How the placements of a query are reduced before consensus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlacementMode {
    /// Keep only the highest-LWR placement.
    #[default]
    Best,
    /// Keep every placement that passes the LWR threshold.
    Lca,
}

/// Consensus strategy for collapsing candidate lineages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ConsensusAlgorithm {
    #[serde(rename = "megan", alias = "MEGAN")]
    Megan,
    #[default]
    #[serde(rename = "lca*", alias = "LCA*")]
    LcaStar,
    #[serde(rename = "lcap", alias = "LCAp")]
    LcaP,
}

impl FromStr for PlacementMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "best" => Ok(PlacementMode::Best),
            "lca" => Ok(PlacementMode::Lca),
            other => Err(format!("unknown placement parser '{}', expected 'best' or 'lca'", other)),
        }
    }
}

impl FromStr for ConsensusAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "megan" => Ok(ConsensusAlgorithm::Megan),
            "lca*" | "lcastar" => Ok(ConsensusAlgorithm::LcaStar),
            "lcap" => Ok(ConsensusAlgorithm::LcaP),
            other => Err(format!(
                "unknown consensus algorithm '{}', expected 'megan', 'lca*' or 'lcap'",
                other
            )),
        }
    }
}

impl fmt::Display for ConsensusAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConsensusAlgorithm::Megan => "MEGAN",
            ConsensusAlgorithm::LcaStar => "LCA*",
            ConsensusAlgorithm::LcaP => "LCAp",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Written into the `Sample` column.
    pub sample_name: String,
    /// Placements with a smaller LWR are discarded.
    pub min_lwr: f64,
    pub placement_parser: PlacementMode,
    pub algorithm: ConsensusAlgorithm,
    /// Collapse fragments of one parent query to the longest.
    pub dedup_fragments: bool,
    /// Worker threads; the global rayon pool when unset.
    pub threads: Option<usize>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        ClassifierConfig {
            sample_name: "sample".to_string(),
            min_lwr: 0.2,
            placement_parser: PlacementMode::Best,
            algorithm: ConsensusAlgorithm::LcaStar,
            dedup_fragments: true,
            threads: None,
        }
    }
}

impl ClassifierConfig {
    /// Read a JSON config. Keys left out keep their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, TreeSappError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| TreeSappError::io(path, e))?;
        let config: ClassifierConfig = serde_json::from_str(&text)
            .map_err(|e| TreeSappError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), TreeSappError> {
        if !(0.0..=1.0).contains(&self.min_lwr) {
            return Err(TreeSappError::Config(format!(
                "min_lwr must lie in [0, 1], got {}",
                self.min_lwr
            )));
        }
        if self.threads == Some(0) {
            return Err(TreeSappError::Config("threads must be at least 1".to_string()));
        }
        if self.sample_name.contains('\t') || self.sample_name.contains('\n') {
            return Err(TreeSappError::Config(
                "sample_name may not contain tabs or newlines".to_string(),
            ));
        }
        Ok(())
    }
}
