//! Per-run reports: the filter loss report, the read tracking table and a
//! plain-text run summary.

use crate::io::{self, OutputError};
use crate::pipeline::aggregate::TrackRow;
use crate::pipeline::processor::RunSummary;
use crate::pipeline::qc::{loss_report, FilterStats};
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Serialize)]
struct FilterReportRow<'a> {
    sample: &'a str,
    reads_in: u64,
    reads_out: u64,
    loss_fraction: f64,
}

/// Writes the filter loss report: samples with at least `min_reads` pairs
/// before and after filtering, highest loss first.
pub fn write_filter_report(
    stats: &[FilterStats],
    min_reads: u64,
    path: &Path,
) -> Result<usize, OutputError> {
    let report = loss_report(stats, min_reads);
    let rows: Vec<FilterReportRow> = report
        .iter()
        .map(|s| FilterReportRow {
            sample: &s.sample,
            reads_in: s.reads_in,
            reads_out: s.reads_out,
            loss_fraction: s.loss_fraction(),
        })
        .collect();
    io::write_csv_rows(&rows, path)?;
    Ok(rows.len())
}

/// Writes the per-sample read tracking table.
pub fn write_track(rows: &[TrackRow], path: &Path) -> Result<(), OutputError> {
    io::write_csv_rows(rows, path)
}

/// Generate a human-readable summary of a processed run.
pub fn generate_report(summary: &RunSummary) -> String {
    let mut report = String::new();

    report.push_str(&format!("Run Report: {} ({})\n", summary.run_id, summary.tag));
    report.push_str("=================================================\n\n");

    report.push_str("Read Counts:\n");
    report.push_str(&format!("  Samples: {}\n", summary.samples));
    report.push_str(&format!("  Input read pairs: {}\n", summary.reads_in));
    report.push_str(&format!(
        "  Passed filtering: {} ({:.2}%)\n",
        summary.reads_filtered,
        percent(summary.reads_filtered, summary.reads_in)
    ));
    report.push_str(&format!(
        "  Merged into contigs: {} ({:.2}%)\n",
        summary.reads_merged,
        percent(summary.reads_merged, summary.reads_in)
    ));
    report.push_str(&format!("  Sequence variants: {}\n\n", summary.sequences));

    if summary.low_yield.is_empty() {
        report.push_str("Low-yield samples: none\n");
    } else {
        report.push_str(&format!("Low-yield samples ({}):\n", summary.low_yield.len()));
        for sample in &summary.low_yield {
            report.push_str(&format!("  {}\n", sample));
        }
    }

    if !summary.failed.is_empty() {
        report.push_str(&format!("Failed samples ({}):\n", summary.failed.len()));
        for (sample, reason) in &summary.failed {
            report.push_str(&format!("  {}: {}\n", sample, reason));
        }
    }

    report.push_str("----\n");
    report.push_str(&format!("Table: {}\n", summary.table_path.display()));
    report
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        100.0 * part as f64 / whole as f64
    }
}
