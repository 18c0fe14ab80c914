//src/jplace.rs

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TreeSappError;
use crate::io::open_text_reader;

pub const EDGE_NUM: &str = "edge_num";
pub const LIKELIHOOD: &str = "likelihood";
pub const LIKE_WEIGHT_RATIO: &str = "like_weight_ratio";
pub const DISTAL_LENGTH: &str = "distal_length";
pub const PENDANT_LENGTH: &str = "pendant_length";

/// The jplace document as written by placement tools. Kept verbatim so it can
/// be written back out unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JPlace {
    pub tree: String,
    pub placements: Vec<PlacementRecord>,
    pub fields: Vec<String>,
    pub version: Value,
    pub metadata: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementRecord {
    pub p: Vec<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<NameField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nm: Option<Vec<(String, f64)>>,
}

/// `n` is a list of names in jplace v3 but a bare string in older files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NameField {
    One(String),
    Many(Vec<String>),
}

impl JPlace {
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<(), TreeSappError> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| TreeSappError::io(path, e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self).map_err(|e| {
            TreeSappError::io(path, std::io::Error::new(std::io::ErrorKind::Other, e))
        })?;
        writer
            .write_all(b"\n")
            .and_then(|_| writer.flush())
            .map_err(|e| TreeSappError::io(path, e))
    }
}

/// Positions of the placement tuple slots, resolved once from `fields`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldIndex {
    pub edge_num: usize,
    pub likelihood: usize,
    pub like_weight_ratio: usize,
    pub distal_length: Option<usize>,
    pub pendant_length: Option<usize>,
    pub width: usize,
}

impl FieldIndex {
    pub fn resolve(fields: &[String], path: &Path) -> Result<Self, TreeSappError> {
        let position = |name: &str| fields.iter().position(|f| f == name);
        let required = |name: &str| {
            position(name).ok_or_else(|| TreeSappError::MissingField {
                path: path.to_path_buf(),
                field: name.to_string(),
            })
        };
        Ok(FieldIndex {
            edge_num: required(EDGE_NUM)?,
            likelihood: required(LIKELIHOOD)?,
            like_weight_ratio: required(LIKE_WEIGHT_RATIO)?,
            distal_length: position(DISTAL_LENGTH),
            pendant_length: position(PENDANT_LENGTH),
            width: fields.len(),
        })
    }
}

/// A single placement of a query on one edge of the reference tree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub edge_num: u32,
    pub likelihood: f64,
    pub like_weight_ratio: f64,
    pub distal_length: Option<f64>,
    pub pendant_length: Option<f64>,
}

impl Placement {
    fn from_cells(cells: &[Value], idx: &FieldIndex) -> Result<Self, String> {
        if cells.len() != idx.width {
            return Err(format!(
                "placement has {} values but 'fields' names {}",
                cells.len(),
                idx.width
            ));
        }
        let number = |i: usize, name: &str| {
            cells[i]
                .as_f64()
                .ok_or_else(|| format!("'{}' value {} is not a number", name, cells[i]))
        };
        let edge = number(idx.edge_num, EDGE_NUM)?;
        if edge < 0.0 || edge.fract() != 0.0 || edge > u32::MAX as f64 {
            return Err(format!("'{}' value {} is not an edge number", EDGE_NUM, edge));
        }
        Ok(Placement {
            edge_num: edge as u32,
            likelihood: number(idx.likelihood, LIKELIHOOD)?,
            like_weight_ratio: number(idx.like_weight_ratio, LIKE_WEIGHT_RATIO)?,
            distal_length: idx.distal_length.and_then(|i| cells[i].as_f64()),
            pendant_length: idx.pendant_length.and_then(|i| cells[i].as_f64()),
        })
    }
}

/// One placed query and every placement reported for it.
#[derive(Debug, Clone, PartialEq)]
pub struct PQuery {
    pub name: String,
    pub placements: Vec<Placement>,
    /// Pass-through weight from an `nm` entry.
    pub mass: Option<f64>,
}

/// A parsed placement file, ready for classification.
#[derive(Debug, Clone)]
pub struct PlacementBatch {
    pub path: PathBuf,
    pub tree: String,
    pub fields: FieldIndex,
    pub pqueries: Vec<PQuery>,
    pub raw: JPlace,
}

pub fn read_jplace<P: AsRef<Path>>(filepath: P) -> Result<PlacementBatch, TreeSappError> {
    let path = filepath.as_ref();
    let mut text = String::new();
    open_text_reader(path)?
        .read_to_string(&mut text)
        .map_err(|e| TreeSappError::io(path, e))?;
    parse_jplace(&text, path)
}

pub fn parse_jplace(text: &str, path: &Path) -> Result<PlacementBatch, TreeSappError> {
    let malformed = |reason: String| TreeSappError::MalformedPlacementFile {
        path: path.to_path_buf(),
        reason,
    };

    let raw: JPlace = serde_json::from_str(text).map_err(|e| malformed(e.to_string()))?;
    let fields = FieldIndex::resolve(&raw.fields, path)?;

    let mut pqueries = Vec::new();
    for (i, record) in raw.placements.iter().enumerate() {
        let placements = record
            .p
            .iter()
            .map(|cells| Placement::from_cells(cells, &fields))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|reason| malformed(format!("placements[{}]: {}", i, reason)))?;

        // Multi-name records expand into one query per name sharing the placements
        match (&record.nm, &record.n) {
            (Some(named), _) => {
                for (name, mass) in named {
                    pqueries.push(PQuery {
                        name: name.clone(),
                        placements: placements.clone(),
                        mass: Some(*mass),
                    });
                }
            }
            (None, Some(NameField::One(name))) => pqueries.push(PQuery {
                name: name.clone(),
                placements,
                mass: None,
            }),
            (None, Some(NameField::Many(names))) => {
                for name in names {
                    pqueries.push(PQuery {
                        name: name.clone(),
                        placements: placements.clone(),
                        mass: None,
                    });
                }
            }
            (None, None) => {
                return Err(malformed(format!("placements[{}] has neither 'n' nor 'nm'", i)));
            }
        }
    }

    log::debug!("Parsed {} pqueries from {}", pqueries.len(), path.display());
    Ok(PlacementBatch {
        path: path.to_path_buf(),
        tree: raw.tree.clone(),
        fields,
        pqueries,
        raw,
    })
}
