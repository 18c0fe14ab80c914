//src/abundance.rs

use std::path::Path;

use ahash::AHashMap;

use crate::error::TreeSappError;
use crate::io::open_text_reader;

/// Per-marker abundance of each contig, read from a `contig|marker,value` table.
#[derive(Debug, Clone, Default)]
pub struct AbundanceTable {
    values: AHashMap<String, AHashMap<String, f64>>,
}

impl AbundanceTable {
    pub fn insert(&mut self, marker: &str, contig: &str, value: f64) {
        self.values
            .entry(marker.to_string())
            .or_default()
            .insert(contig.to_string(), value);
    }

    /// Abundance of the contig a query came from. The contig is the part of the
    /// query name before the first `|`.
    pub fn lookup(&self, marker: &str, query: &str) -> Option<f64> {
        let contig = query.split('|').next().unwrap_or(query);
        self.values.get(marker)?.get(contig).copied()
    }

    pub fn len(&self) -> usize {
        self.values.values().map(|m| m.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Read an abundance table. Rows with a non-positive value are skipped.
pub fn read_abundance_table<P: AsRef<Path>>(filepath: P) -> Result<AbundanceTable, TreeSappError> {
    let path = filepath.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .from_reader(open_text_reader(path)?);

    let bad_row = |line: u64, reason: String| {
        TreeSappError::Config(format!("{}:{}: {}", path.display(), line, reason))
    };

    let mut table = AbundanceTable::default();
    for record in reader.records() {
        let record = record.map_err(|e| TreeSappError::Config(format!("{}: {}", path.display(), e)))?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        if record.len() != 2 {
            return Err(bad_row(line, format!("expected 2 fields, found {}", record.len())));
        }
        let (contig, marker) = record[0]
            .split_once('|')
            .ok_or_else(|| bad_row(line, format!("'{}' is not contig|marker", &record[0])))?;
        let value: f64 = record[1]
            .parse()
            .map_err(|_| bad_row(line, format!("'{}' is not a number", &record[1])))?;
        if value > 0.0 {
            table.insert(marker, contig, value);
        }
    }

    log::debug!("Read {} abundance values from {}", table.len(), path.display());
    Ok(table)
}
