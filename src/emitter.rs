//src/emitter.rs

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::io::Write;

use crate::classify::ClassifyStats;
use crate::error::{ClassificationWarning, TreeSappError};
use crate::types::{parent_query, ClassifiedQuery};

pub const CLASSIFICATION_TABLE: &str = "marker_contig_map.tsv";

pub const HEADER: [&str; 11] = [
    "Sample",
    "Query",
    "Marker",
    "Length",
    "Taxonomy",
    "Confident_Taxonomy",
    "Abundance",
    "iNode",
    "LWR",
    "EvoDist",
    "Distances",
];

/// Fixed-point text with at least `digits` significant figures, never in
/// exponent notation.
pub fn format_significant(value: f64, digits: usize) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    if value == 0.0 {
        return format!("{:.*}", digits, 0.0);
    }
    let magnitude = value.abs().log10().floor() as i64;
    let decimals = (digits as i64 - 1 - magnitude).max(0) as usize;
    format!("{:.*}", decimals, value)
}

/// The columns of one table row, in `HEADER` order.
pub fn row_fields(row: &ClassifiedQuery) -> [String; 11] {
    let optional = |v: Option<String>| v.unwrap_or_default();
    [
        row.sample.clone(),
        row.query.clone(),
        row.marker.clone(),
        optional(row.length.map(|l| l.to_string())),
        row.taxonomy.clone(),
        row.confident_taxonomy.clone(),
        row.abundance.to_string(),
        optional(row.inode.map(|e| e.to_string())),
        optional(row.lwr.map(|v| format_significant(v, 4))),
        optional(row.wtd.map(|v| format_significant(v, 4))),
        row.distances
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(","),
    ]
}

/// Rows ordered by package code, then query name.
pub fn sort_rows(rows: &mut [ClassifiedQuery]) {
    rows.sort_by(|a, b| {
        a.refpkg_code
            .cmp(&b.refpkg_code)
            .then_with(|| a.query.cmp(&b.query))
    });
}

/// Preferred row first: classified, then longer, then higher LWR, then name.
fn fragment_preference(a: &ClassifiedQuery, b: &ClassifiedQuery) -> Ordering {
    b.is_classified()
        .cmp(&a.is_classified())
        .then_with(|| b.length.unwrap_or(0).cmp(&a.length.unwrap_or(0)))
        .then_with(|| {
            b.lwr
                .unwrap_or(f64::NEG_INFINITY)
                .total_cmp(&a.lwr.unwrap_or(f64::NEG_INFINITY))
        })
        .then_with(|| a.query.cmp(&b.query))
}

fn dedup_key(row: &ClassifiedQuery, merge_fragments: bool) -> &str {
    if merge_fragments {
        parent_query(&row.query)
    } else {
        &row.query
    }
}

/// Keep one row per query name and package. With `merge_fragments`, fragments
/// of the same parent query count as one query too. Every dropped row is
/// reported as a `DuplicateFragment` warning against its package and taken
/// back out of that package's counters.
pub fn dedup_rows(
    mut rows: Vec<ClassifiedQuery>,
    stats: &mut BTreeMap<String, ClassifyStats>,
    merge_fragments: bool,
) -> Vec<ClassifiedQuery> {
    rows.sort_by(|a, b| {
        a.refpkg_code
            .cmp(&b.refpkg_code)
            .then_with(|| dedup_key(a, merge_fragments).cmp(dedup_key(b, merge_fragments)))
            .then_with(|| fragment_preference(a, b))
    });

    let mut kept: Vec<ClassifiedQuery> = Vec::with_capacity(rows.len());
    for row in rows {
        if let Some(last) = kept.last() {
            if last.refpkg_code == row.refpkg_code
                && dedup_key(last, merge_fragments) == dedup_key(&row, merge_fragments)
            {
                let package_stats = stats.entry(row.refpkg_code.clone()).or_default();
                package_stats.forget_row(&row.status);
                package_stats.record_warning(
                    ClassificationWarning::DuplicateFragment,
                    &row.refpkg_code,
                    &row.query,
                    &format!("dropped in favour of {}", last.query),
                );
                continue;
            }
        }
        kept.push(row);
    }
    kept
}

/// Write the header and one line per row, tab separated and unquoted.
pub fn write_classification_table<W: Write>(rows: &[ClassifiedQuery], writer: W) -> Result<(), csv::Error> {
    let mut out = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .quote_style(csv::QuoteStyle::Never)
        .has_headers(false)
        .from_writer(writer);
    out.write_record(HEADER)?;
    for row in rows {
        out.write_record(row_fields(row))?;
    }
    out.flush()?;
    Ok(())
}

pub(crate) fn csv_error(path: &std::path::Path, e: csv::Error) -> TreeSappError {
    match e.into_kind() {
        csv::ErrorKind::Io(source) => TreeSappError::io(path, source),
        other => TreeSappError::Config(format!("{}: {:?}", path.display(), other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueryError;
    use crate::types::QueryStatus;

    fn row(query: &str, code: &str) -> ClassifiedQuery {
        ClassifiedQuery {
            sample: "sample".to_string(),
            query: query.to_string(),
            marker: "McrA".to_string(),
            refpkg_code: code.to_string(),
            length: crate::types::fragment_length(query),
            taxonomy: "d; p; c; o; f; g".to_string(),
            confident_taxonomy: "d; p; c; o; f".to_string(),
            abundance: 1.0,
            inode: Some(2),
            likelihood: Some(-12.0),
            lwr: Some(1.0),
            wtd: Some(0.01562),
            distances: vec![1, 1],
            candidate_leaves: vec![1, 2],
            retained_placements: 1,
            status: QueryStatus::Classified,
        }
    }

    #[test]
    fn test_format_significant() {
        assert_eq!(format_significant(1.0, 4), "1.000");
        assert_eq!(format_significant(0.6, 4), "0.6000");
        assert_eq!(format_significant(0.01562, 4), "0.01562");
        assert_eq!(format_significant(0.0, 4), "0.0000");
        assert_eq!(format_significant(123456.7, 4), "123457");
        assert_eq!(format_significant(0.00001236, 4), "0.00001236");
    }

    #[test]
    fn test_table_text() {
        let mut unclassified = row("q3", "M0701");
        unclassified.taxonomy.clear();
        unclassified.confident_taxonomy.clear();
        unclassified.wtd = None;
        unclassified.distances.clear();
        unclassified.lwr = Some(0.15);
        unclassified.inode = Some(0);
        unclassified.status = QueryStatus::Unclassified(QueryError::EmptyLineageSet);

        let mut buffer = Vec::new();
        write_classification_table(&[row("q2", "M0701"), unclassified], &mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "Sample\tQuery\tMarker\tLength\tTaxonomy\tConfident_Taxonomy\tAbundance\tiNode\tLWR\tEvoDist\tDistances"
        );
        assert_eq!(
            lines[1],
            "sample\tq2\tMcrA\t\td; p; c; o; f; g\td; p; c; o; f\t1\t2\t1.000\t0.01562\t1,1"
        );
        assert_eq!(lines[2], "sample\tq3\tMcrA\t\t\t\t1\t0\t0.1500\t\t");
    }

    #[test]
    fn test_dedup_keeps_longest_fragment() {
        let rows = vec![
            row("contig_1|McrA|1_100", "M0701"),
            row("contig_1|McrA|1_300", "M0701"),
            row("contig_1|McrA|1_300", "M0702"),
            row("contig_2|McrA|5_50", "M0701"),
        ];
        let mut stats: BTreeMap<String, ClassifyStats> = BTreeMap::new();
        for r in &rows {
            stats.entry(r.refpkg_code.clone()).or_default().record_classified();
        }
        let mut kept = dedup_rows(rows, &mut stats, true);
        sort_rows(&mut kept);
        let names: Vec<(&str, &str)> = kept
            .iter()
            .map(|r| (r.refpkg_code.as_str(), r.query.as_str()))
            .collect();
        assert_eq!(
            names,
            vec![
                ("M0701", "contig_1|McrA|1_300"),
                ("M0701", "contig_2|McrA|5_50"),
                ("M0702", "contig_1|McrA|1_300"),
            ]
        );
        assert_eq!(stats["M0701"].warning_count(ClassificationWarning::DuplicateFragment), 1);
        assert_eq!(stats["M0701"].classified, 2);
        assert_eq!(stats["M0702"].classified, 1);
        assert_eq!(stats["M0702"].total_warnings(), 0);
    }

    #[test]
    fn test_dedup_collapses_repeated_names() {
        let mut weaker = row("q1", "M0701");
        weaker.lwr = Some(0.4);
        let rows = vec![weaker, row("q1", "M0701")];
        let mut stats = BTreeMap::new();
        let kept = dedup_rows(rows, &mut stats, false);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].lwr, Some(1.0));
    }

    #[test]
    fn test_fragments_survive_without_merging() {
        let rows = vec![
            row("contig_1|McrA|1_100", "M0701"),
            row("contig_1|McrA|1_300", "M0701"),
            row("contig_1|McrA|1_300", "M0701"),
        ];
        let mut stats = BTreeMap::new();
        let kept = dedup_rows(rows, &mut stats, false);
        assert_eq!(kept.len(), 2);
        assert_eq!(stats["M0701"].warning_count(ClassificationWarning::DuplicateFragment), 1);
    }

    #[test]
    fn test_classified_fragment_beats_longer_unclassified() {
        let mut longer = row("contig_1|McrA|1_900", "M0701");
        longer.status = QueryStatus::Unclassified(QueryError::EmptyLineageSet);
        let rows = vec![longer, row("contig_1|McrA|1_300", "M0701")];
        let mut stats = BTreeMap::new();
        let kept = dedup_rows(rows, &mut stats, true);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].query, "contig_1|McrA|1_300");
    }
}
