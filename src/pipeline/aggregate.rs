//! Run aggregation: folding per-sample outcomes into the run table.

use crate::count_table::{AbundanceTable, TableError};
use crate::pipeline::denoise::SampleOutcome;
use crate::pipeline::qc::FilterStats;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Sample id as stored in a run table.
pub fn tagged_sample(sample: &str, tag: &str) -> String {
    format!("{}_{}", sample, tag)
}

/// Builds the run's abundance table from its ordered sample outcomes.
///
/// Every outcome becomes a row, so samples that filtered to nothing or
/// failed to merge appear with all-zero counts.
pub fn aggregate_run(outcomes: &[SampleOutcome], tag: &str) -> Result<AbundanceTable, TableError> {
    let table = AbundanceTable::from_samples(
        outcomes
            .iter()
            .map(|o| (tagged_sample(&o.sample, tag), &o.contigs.contigs)),
    )?;
    let (samples, sequences) = table.dimensions();
    info!(
        "Run table {}: {} samples, {} sequences, {} reads",
        tag,
        samples,
        sequences,
        table.total()
    );
    Ok(table)
}

/// Reads surviving each step for one sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRow {
    pub sample: String,
    pub input: u64,
    pub filtered: u64,
    pub denoised_forward: u64,
    pub denoised_reverse: u64,
    pub merged: u64,
    pub note: String,
}

/// Joins filter counts and denoise outcomes by sample name.
pub fn track_rows(filter_stats: &[FilterStats], outcomes: &[SampleOutcome]) -> Vec<TrackRow> {
    let input: HashMap<&str, u64> = filter_stats
        .iter()
        .map(|s| (s.sample.as_str(), s.reads_in))
        .collect();

    outcomes
        .iter()
        .map(|o| TrackRow {
            sample: o.sample.clone(),
            input: input.get(o.sample.as_str()).copied().unwrap_or(0),
            filtered: o.filtered_reads,
            denoised_forward: o.denoised_forward,
            denoised_reverse: o.denoised_reverse,
            merged: o.merged_reads(),
            note: o.failure.clone().unwrap_or_default(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::denoise::ContigSet;

    fn outcome(sample: &str, contigs: &[(&str, u64)]) -> SampleOutcome {
        SampleOutcome {
            sample: sample.to_string(),
            filtered_reads: contigs.iter().map(|(_, n)| n).sum(),
            contigs: ContigSet {
                contigs: contigs.iter().map(|(s, n)| (s.to_string(), *n)).collect(),
                ..ContigSet::default()
            },
            ..SampleOutcome::default()
        }
    }

    #[test]
    fn fold_tags_samples_and_keeps_empty_rows() {
        let outcomes = vec![
            outcome("A", &[("ACGT", 10), ("TTTT", 2)]),
            outcome("C", &[]),
        ];
        let table = aggregate_run(&outcomes, "MIRA1").unwrap();

        let samples: Vec<&str> = table.samples().iter().map(String::as_str).collect();
        assert_eq!(samples, vec!["A_MIRA1", "C_MIRA1"]);
        assert_eq!(table.get("A_MIRA1", "ACGT"), Some(10));
        assert_eq!(table.get("C_MIRA1", "ACGT"), Some(0));
        assert_eq!(table.sample_totals(), vec![12, 0]);
    }

    #[test]
    fn identical_sequences_share_a_column() {
        let outcomes = vec![outcome("A", &[("ACGT", 3)]), outcome("B", &[("ACGT", 4)])];
        let table = aggregate_run(&outcomes, "r").unwrap();
        assert_eq!(table.dimensions(), (2, 1));
    }

    #[test]
    fn track_rows_join_filter_counts() {
        let stats = vec![FilterStats {
            sample: "A".to_string(),
            reads_in: 50,
            reads_out: 12,
        }];
        let mut failed = outcome("B", &[]);
        failed.failure = Some("Merge failure: no overlap".to_string());
        let rows = track_rows(&stats, &[outcome("A", &[("ACGT", 12)]), failed]);

        assert_eq!(rows[0].input, 50);
        assert_eq!(rows[0].merged, 12);
        assert_eq!(rows[1].input, 0);
        assert!(rows[1].note.contains("no overlap"));
    }
}
