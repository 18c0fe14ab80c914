// src/classify/classify_stats.rs

use std::collections::BTreeMap;

use crate::error::{ClassificationWarning, QueryError};
use crate::types::QueryStatus;

/// Counters kept per reference package while its queries are classified.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct ClassifyStats {
    pub classified: usize,
    pub unclassified: usize,
    /// Queries never started because the run was cancelled
    pub skipped: usize,
    /// Unclassified queries keyed by the failure identifier
    pub unclassified_reasons: BTreeMap<&'static str, usize>,
    pub warnings: BTreeMap<ClassificationWarning, usize>,
}

impl ClassifyStats {
    pub fn record_classified(&mut self) {
        self.classified += 1;
    }

    pub fn record_unclassified(&mut self, error: &QueryError) {
        self.unclassified += 1;
        *self.unclassified_reasons.entry(error.identifier()).or_insert(0) += 1;
    }

    /// Take back the count of a row that was later dropped from the output.
    pub fn forget_row(&mut self, status: &QueryStatus) {
        match status {
            QueryStatus::Classified => self.classified = self.classified.saturating_sub(1),
            QueryStatus::Unclassified(error) => {
                self.unclassified = self.unclassified.saturating_sub(1);
                if let Some(count) = self.unclassified_reasons.get_mut(error.identifier()) {
                    *count -= 1;
                    if *count == 0 {
                        self.unclassified_reasons.remove(error.identifier());
                    }
                }
            }
        }
    }

    /// Count a warning and log it against the query and package.
    pub fn record_warning(&mut self, warning: ClassificationWarning, code: &str, query: &str, detail: &str) {
        log::warn!("{}: {} ({}) {}", warning, query, code, detail);
        *self.warnings.entry(warning).or_insert(0) += 1;
    }

    pub fn warning_count(&self, warning: ClassificationWarning) -> usize {
        self.warnings.get(&warning).copied().unwrap_or(0)
    }

    pub fn total_warnings(&self) -> usize {
        self.warnings.values().sum()
    }

    /// Number of queries that produced a row.
    pub fn processed(&self) -> usize {
        self.classified + self.unclassified
    }

    pub fn merge(&mut self, other: ClassifyStats) {
        self.classified += other.classified;
        self.unclassified += other.unclassified;
        self.skipped += other.skipped;
        for (reason, count) in other.unclassified_reasons {
            *self.unclassified_reasons.entry(reason).or_insert(0) += count;
        }
        for (warning, count) in other.warnings {
            *self.warnings.entry(warning).or_insert(0) += count;
        }
    }

    pub fn log_summary(&self, code: &str) {
        log::info!(
            "{}: {} queries classified, {} unclassified, {} warnings{}",
            code,
            self.classified,
            self.unclassified,
            self.total_warnings(),
            if self.skipped > 0 {
                format!(", {} skipped after cancellation", self.skipped)
            } else {
                String::new()
            }
        );
        for (reason, count) in &self.unclassified_reasons {
            log::debug!("{}: {} x {}", code, count, reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge() {
        let mut a = ClassifyStats::default();
        a.record_classified();
        a.record_unclassified(&QueryError::EmptyLineageSet);
        a.record_warning(ClassificationWarning::DegenerateWtd, "T", "q1", "");

        let mut b = ClassifyStats::default();
        b.record_unclassified(&QueryError::AllPlacementsBelowThreshold {
            count: 2,
            threshold: 0.2,
        });
        b.record_unclassified(&QueryError::EmptyLineageSet);
        b.record_warning(ClassificationWarning::DegenerateWtd, "T", "q2", "");
        b.skipped = 3;

        a.merge(b);
        assert_eq!(a.classified, 1);
        assert_eq!(a.unclassified, 3);
        assert_eq!(a.skipped, 3);
        assert_eq!(a.processed(), 4);
        assert_eq!(a.unclassified_reasons["EmptyLineageSet"], 2);
        assert_eq!(a.unclassified_reasons["AllPlacementsBelowThreshold"], 1);
        assert_eq!(a.warning_count(ClassificationWarning::DegenerateWtd), 2);
        assert_eq!(a.warning_count(ClassificationWarning::ShallowLineage), 0);
    }

    #[test]
    fn test_forget_row() {
        let mut stats = ClassifyStats::default();
        stats.record_classified();
        stats.record_classified();
        stats.record_unclassified(&QueryError::EmptyLineageSet);

        stats.forget_row(&QueryStatus::Classified);
        stats.forget_row(&QueryStatus::Unclassified(QueryError::EmptyLineageSet));
        assert_eq!(stats.classified, 1);
        assert_eq!(stats.unclassified, 0);
        assert!(stats.unclassified_reasons.is_empty());
    }
}
