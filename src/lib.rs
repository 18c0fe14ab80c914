// src/lib.rs
pub mod abundance;
pub mod classify;
pub mod config;
pub mod emitter;
pub mod error;
pub mod io;
pub mod jplace;
pub mod refpkg;
pub mod taxdb;
pub mod tree_index;
pub mod types;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use crate::abundance::{read_abundance_table, AbundanceTable};
use crate::classify::{classify_queries_parallel, ClassifyStats, QueryContext};
use crate::config::ClassifierConfig;
use crate::emitter::{csv_error, dedup_rows, sort_rows, write_classification_table};
use crate::error::TreeSappError;
use crate::jplace::{read_jplace, PlacementBatch};
use crate::refpkg::{parse_ref_build_params, RefPkgDescriptor, ReferencePackage};
use crate::taxdb::parse_taxonomy;
use crate::types::{CancellationToken, ClassifiedQuery};

/// A reference package together with the placement files computed against it.
#[derive(Debug, Clone)]
pub struct PackageInput {
    pub package: ReferencePackage,
    pub batches: Vec<PlacementBatch>,
}

/// Classification rows plus per-package counters. The table text is only built
/// when asked for.
#[derive(Debug, Clone, Default)]
pub struct ClassificationResults {
    /// One row per query, ordered by package code then query name
    pub rows: Vec<ClassifiedQuery>,
    /// Counters keyed by reference package code
    pub stats: BTreeMap<String, ClassifyStats>,
}

impl ClassificationResults {
    /// Generate the classification table text on demand
    pub fn get_classification_table(&self) -> String {
        let mut buffer = Vec::new();
        match write_classification_table(&self.rows, &mut buffer) {
            Ok(()) => String::from_utf8_lossy(&buffer).into_owned(),
            Err(e) => {
                log::error!("Failed to generate classification table: {}", e);
                String::new()
            }
        }
    }

    pub fn write_classification_table<P: AsRef<Path>>(&self, path: P) -> Result<(), TreeSappError> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| TreeSappError::io(path, e))?;
        write_classification_table(&self.rows, BufWriter::new(file)).map_err(|e| csv_error(path, e))
    }

    pub fn classified_count(&self) -> usize {
        self.rows.iter().filter(|r| r.is_classified()).count()
    }

    pub fn unclassified_count(&self) -> usize {
        self.rows.len() - self.classified_count()
    }
}

/// Build a reference package from its descriptor and taxonomy file.
pub fn load_reference_package<P: AsRef<Path>>(
    descriptor: RefPkgDescriptor,
    taxonomy_path: P,
) -> Result<ReferencePackage, TreeSappError> {
    let taxonomy = parse_taxonomy(taxonomy_path)?;
    Ok(ReferencePackage::new(descriptor, taxonomy))
}

/// Classify every placed query of every package.
///
/// Packages are processed in code order; the queries of a package are spread
/// over the rayon pool (a dedicated pool when `config.threads` is set).
pub fn classify_placements(
    config: &ClassifierConfig,
    inputs: Vec<PackageInput>,
    abundances: Option<&AbundanceTable>,
    cancel: &CancellationToken,
) -> Result<ClassificationResults, TreeSappError> {
    config.validate()?;
    match config.threads {
        Some(threads) => {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .map_err(|e| TreeSappError::Config(format!("cannot start {} worker threads: {}", threads, e)))?;
            pool.install(|| classify_packages(config, inputs, abundances, cancel))
        }
        None => classify_packages(config, inputs, abundances, cancel),
    }
}

fn classify_packages(
    config: &ClassifierConfig,
    mut inputs: Vec<PackageInput>,
    abundances: Option<&AbundanceTable>,
    cancel: &CancellationToken,
) -> Result<ClassificationResults, TreeSappError> {
    inputs.sort_by(|a, b| a.package.code().cmp(b.package.code()));
    if let Some(pair) = inputs.windows(2).find(|w| w[0].package.code() == w[1].package.code()) {
        return Err(TreeSappError::Config(format!(
            "reference package {} was supplied twice",
            pair[0].package.code()
        )));
    }

    let mut rows: Vec<ClassifiedQuery> = Vec::new();
    let mut stats: BTreeMap<String, ClassifyStats> = BTreeMap::new();

    for input in inputs {
        let mut package = input.package;
        let code = package.code().to_string();
        for batch in &input.batches {
            package.attach_tree(&batch.tree)?;
        }
        let Some(index) = package.tree_index() else {
            log::warn!("{}: no placement files, nothing to classify", code);
            stats.insert(code, ClassifyStats::default());
            continue;
        };

        let ctx = QueryContext {
            package: &package,
            index,
            config,
            abundances,
        };
        let mut package_stats = ClassifyStats::default();
        for batch in &input.batches {
            log::debug!("{}: classifying {} queries from {}", code, batch.pqueries.len(), batch.path.display());
            let (mut batch_rows, batch_stats) = classify_queries_parallel(&batch.pqueries, &ctx, cancel)?;
            rows.append(&mut batch_rows);
            package_stats.merge(batch_stats);
        }
        stats.insert(code, package_stats);
    }

    rows = dedup_rows(rows, &mut stats, config.dedup_fragments);
    sort_rows(&mut rows);
    for (code, package_stats) in &stats {
        package_stats.log_summary(code);
    }

    Ok(ClassificationResults { rows, stats })
}

/// File locations for a complete run.
#[derive(Debug, Clone, Default)]
pub struct RunInputs {
    /// Build-parameters table describing the reference packages
    pub ref_build_params: PathBuf,
    /// Directory holding `tax_ids_<name>.txt` for each package
    pub taxonomy_dir: PathBuf,
    /// Placement files, each tagged with the code (or name) of its package
    pub placements: Vec<(String, PathBuf)>,
    pub abundance: Option<PathBuf>,
}

pub fn taxonomy_file_name(descriptor: &RefPkgDescriptor) -> String {
    format!("tax_ids_{}.txt", descriptor.name)
}

/// Load everything named by `inputs` and classify it.
pub fn classify_from_files(
    config: &ClassifierConfig,
    inputs: &RunInputs,
    cancel: &CancellationToken,
) -> Result<ClassificationResults, TreeSappError> {
    let descriptors = parse_ref_build_params(&inputs.ref_build_params)?;

    let mut batches: BTreeMap<String, Vec<PlacementBatch>> = BTreeMap::new();
    for (key, path) in &inputs.placements {
        let descriptor = descriptors
            .get(key)
            .or_else(|| descriptors.values().find(|d| &d.name == key))
            .ok_or_else(|| {
                TreeSappError::Config(format!(
                    "{} is assigned to '{}', which is not in {}",
                    path.display(),
                    key,
                    inputs.ref_build_params.display()
                ))
            })?;
        batches
            .entry(descriptor.code.clone())
            .or_default()
            .push(read_jplace(path)?);
    }

    let mut packages = Vec::with_capacity(batches.len());
    for (code, package_batches) in batches {
        let Some(descriptor) = descriptors.get(&code) else {
            continue;
        };
        let taxonomy_path = inputs.taxonomy_dir.join(taxonomy_file_name(descriptor));
        let package = load_reference_package(descriptor.clone(), &taxonomy_path)?;
        log::info!(
            "Loaded {} ({}): {} reference leaves, {} placement files",
            code,
            descriptor.name,
            package.taxonomy.len(),
            package_batches.len()
        );
        packages.push(PackageInput {
            package,
            batches: package_batches,
        });
    }

    let abundances = inputs.abundance.as_ref().map(read_abundance_table).transpose()?;
    classify_placements(config, packages, abundances.as_ref(), cancel)
}
