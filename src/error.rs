//src/error.rs

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Fatal errors. Any of these aborts the run and no classification table is written.
#[derive(Error, Debug)]
pub enum TreeSappError {
    #[error("{path}:{line}: expected 2 or 3 tab-separated fields, found {found}")]
    BadTaxonomyLine {
        path: PathBuf,
        line: usize,
        found: usize,
    },
    #[error("{path}:{line}: leaf identifier '{value}' is not a positive integer")]
    BadLeafId {
        path: PathBuf,
        line: usize,
        value: String,
    },
    #[error("{path}: malformed placement file: {reason}")]
    MalformedPlacementFile { path: PathBuf, reason: String },
    #[error("{path}: required placement field '{field}' is missing from 'fields'")]
    MissingField { path: PathBuf, field: String },
    #[error("malformed tree for reference package {code} at byte {offset}: {reason}")]
    MalformedTree {
        code: String,
        offset: usize,
        reason: String,
    },
    #[error("edge {edge} of query '{query}' does not exist in the tree of reference package {code}")]
    UnknownEdge {
        code: String,
        query: String,
        edge: u32,
    },
    #[error("leaf set mismatch for reference package {code}: {reason}")]
    LeafSetMismatch { code: String, reason: String },
    #[error("reference package {code}: unknown lowest confident rank '{rank}'")]
    UnknownConfidentRank { code: String, rank: String },
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("configuration error: {0}")]
    Config(String),
}

/// Stable, machine-readable identity of a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    BadTaxonomyLine,
    BadLeafId,
    MalformedPlacementFile,
    MissingField,
    MalformedTree,
    UnknownEdge,
    LeafSetMismatch,
    UnknownConfidentRank,
    Io,
    Config,
}

impl ErrorKind {
    pub fn identifier(&self) -> &'static str {
        match self {
            ErrorKind::BadTaxonomyLine => "BadTaxonomyLine",
            ErrorKind::BadLeafId => "BadLeafId",
            ErrorKind::MalformedPlacementFile => "MalformedPlacementFile",
            ErrorKind::MissingField => "MissingField",
            ErrorKind::MalformedTree => "MalformedTree",
            ErrorKind::UnknownEdge => "UnknownEdge",
            ErrorKind::LeafSetMismatch => "LeafSetMismatch",
            ErrorKind::UnknownConfidentRank => "UnknownConfidentRank",
            ErrorKind::Io => "Io",
            ErrorKind::Config => "Config",
        }
    }

    /// Process exit status used by the CLI, distinct per kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorKind::Io => 2,
            ErrorKind::Config => 3,
            ErrorKind::BadTaxonomyLine => 10,
            ErrorKind::BadLeafId => 11,
            ErrorKind::MalformedPlacementFile => 12,
            ErrorKind::MissingField => 13,
            ErrorKind::MalformedTree => 14,
            ErrorKind::UnknownEdge => 15,
            ErrorKind::LeafSetMismatch => 16,
            ErrorKind::UnknownConfidentRank => 17,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.identifier())
    }
}

impl TreeSappError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TreeSappError::BadTaxonomyLine { .. } => ErrorKind::BadTaxonomyLine,
            TreeSappError::BadLeafId { .. } => ErrorKind::BadLeafId,
            TreeSappError::MalformedPlacementFile { .. } => ErrorKind::MalformedPlacementFile,
            TreeSappError::MissingField { .. } => ErrorKind::MissingField,
            TreeSappError::MalformedTree { .. } => ErrorKind::MalformedTree,
            TreeSappError::UnknownEdge { .. } => ErrorKind::UnknownEdge,
            TreeSappError::LeafSetMismatch { .. } => ErrorKind::LeafSetMismatch,
            TreeSappError::UnknownConfidentRank { .. } => ErrorKind::UnknownConfidentRank,
            TreeSappError::Io { .. } => ErrorKind::Io,
            TreeSappError::Config(_) => ErrorKind::Config,
        }
    }

    pub fn io<P: AsRef<Path>>(path: P, source: std::io::Error) -> Self {
        TreeSappError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

/// Per-query failures. These are recovered inside the query pipeline: the query
/// is reported as unclassified and counted against its reference package.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error("all {count} placements fall below the minimum LWR of {threshold}")]
    AllPlacementsBelowThreshold { count: usize, threshold: f64 },
    #[error("none of the candidate leaves carry a lineage")]
    EmptyLineageSet,
}

impl QueryError {
    pub fn identifier(&self) -> &'static str {
        match self {
            QueryError::AllPlacementsBelowThreshold { .. } => "AllPlacementsBelowThreshold",
            QueryError::EmptyLineageSet => "EmptyLineageSet",
        }
    }
}

/// Non-fatal conditions; logged with the query and package, never suppress output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ClassificationWarning {
    ShallowLineage,
    DegenerateWtd,
    BelowConfidentRank,
    DuplicateFragment,
}

impl ClassificationWarning {
    pub fn identifier(&self) -> &'static str {
        match self {
            ClassificationWarning::ShallowLineage => "ShallowLineage",
            ClassificationWarning::DegenerateWtd => "DegenerateWTD",
            ClassificationWarning::BelowConfidentRank => "BelowConfidentRank",
            ClassificationWarning::DuplicateFragment => "DuplicateFragment",
        }
    }
}

impl fmt::Display for ClassificationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.identifier())
    }
}
