// src/classify/classify_queries.rs

use rayon::prelude::*;

use super::classify_query::{classify_query, QueryContext};
use super::classify_stats::ClassifyStats;
use crate::error::TreeSappError;
use crate::jplace::PQuery;
use crate::types::{CancellationToken, ClassifiedQuery};

type PartialResults = (Vec<ClassifiedQuery>, ClassifyStats);

/// Parallel classification of every query placed on one reference package.
///
/// Each worker folds into its own rows and counters; the partial results are
/// merged in input order. The cancellation flag is checked before a query is
/// started, so every row that exists is complete.
pub fn classify_queries_parallel(
    pqueries: &[PQuery],
    ctx: &QueryContext<'_>,
    cancel: &CancellationToken,
) -> Result<PartialResults, TreeSappError> {
    pqueries
        .par_iter()
        .try_fold(
            || (Vec::with_capacity(256), ClassifyStats::default()),
            |mut acc: PartialResults, pquery| {
                if cancel.is_cancelled() {
                    acc.1.skipped += 1;
                    return Ok(acc);
                }
                let row = classify_query(pquery, ctx, &mut acc.1)?;
                acc.0.push(row);
                Ok(acc)
            },
        )
        .try_reduce(
            || (Vec::new(), ClassifyStats::default()),
            |a, b| Ok(merge_partial_results(a, b)),
        )
}

/// Merges two partial classification results from different threads.
fn merge_partial_results(mut a: PartialResults, mut b: PartialResults) -> PartialResults {
    a.0.append(&mut b.0);
    a.1.merge(b.1);
    a
}

/// Same as `classify_queries_parallel`, on the calling thread.
pub fn classify_queries(
    pqueries: &[PQuery],
    ctx: &QueryContext<'_>,
    cancel: &CancellationToken,
) -> Result<PartialResults, TreeSappError> {
    let mut rows = Vec::with_capacity(pqueries.len());
    let mut stats = ClassifyStats::default();
    for pquery in pqueries {
        if cancel.is_cancelled() {
            stats.skipped += 1;
            continue;
        }
        rows.push(classify_query(pquery, ctx, &mut stats)?);
    }
    Ok((rows, stats))
}
