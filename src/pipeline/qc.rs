//! Quality filtering of paired reads.
//!
//! Each read is truncated and checked against fixed thresholds; a pair is
//! written to the filtered output only when both mates pass. Samples are
//! filtered in parallel, each into its own pair of output files, so the
//! stage can be re-run and produces the same files for the same input.

use crate::bio::kmers::KmerScreen;
use crate::bio::{count_ambiguous, phred, phred_error_probability};
use crate::config::FilterParams;
use crate::io::fastq::{next_record, open_reader, read_fasta, FastqError, FastqRecord, FastqWriter};
use crate::pipeline::resolver::{Run, SamplePair};
use log::{debug, info, warn};
use needletail::FastxReader;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// K-mer size used to recognise control reads.
pub const CONTROL_K: usize = 16;
/// Shared k-mers needed before a read counts as control.
pub const CONTROL_MIN_HITS: usize = 2;

#[derive(Error, Debug)]
pub enum FilterError {
    #[error("FASTQ error: {0}")]
    Fastq(#[from] FastqError),

    #[error("Sample {sample}: forward file has {forward} reads, reverse has {reverse}")]
    UnequalMates {
        sample: String,
        forward: u64,
        reverse: u64,
    },

    #[error("Control reference {0} contains no usable sequence")]
    EmptyControl(String),

    #[error("Control removal is enabled but no control reference is configured")]
    MissingControl,
}

/// Why a read was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    TooShort,
    Ambiguous,
    LowQuality,
    ExpectedErrors,
    Control,
}

/// Thresholds applied to the reads of one direction.
#[derive(Debug, Clone, Copy)]
pub struct ReadFilter<'a> {
    pub trunc_len: usize,
    pub trunc_q: u8,
    pub max_n: usize,
    pub min_q: u8,
    pub max_ee: f64,
    pub control: Option<&'a KmerScreen>,
}

impl ReadFilter<'_> {
    /// Returns the trimmed read, or why it was discarded.
    pub fn apply(&self, record: &FastqRecord) -> Result<FastqRecord, Rejection> {
        let mut end = record
            .quality
            .iter()
            .position(|&q| phred(q) <= self.trunc_q)
            .unwrap_or(record.len());

        if self.trunc_len > 0 {
            if end < self.trunc_len {
                return Err(Rejection::TooShort);
            }
            end = self.trunc_len;
        } else if end == 0 {
            return Err(Rejection::TooShort);
        }

        let sequence = &record.sequence[..end];
        let quality = &record.quality[..end];

        if count_ambiguous(sequence) > self.max_n {
            return Err(Rejection::Ambiguous);
        }
        if quality.iter().any(|&q| phred(q) < self.min_q) {
            return Err(Rejection::LowQuality);
        }
        let expected_errors: f64 = quality
            .iter()
            .map(|&q| phred_error_probability(f64::from(phred(q))))
            .sum();
        if expected_errors > self.max_ee {
            return Err(Rejection::ExpectedErrors);
        }
        if let Some(screen) = self.control {
            if screen.matches(sequence, CONTROL_MIN_HITS) {
                return Err(Rejection::Control);
            }
        }

        Ok(FastqRecord::new(record.id.clone(), sequence, quality))
    }
}

/// Read counts of one filtered sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterStats {
    pub sample: String,
    pub reads_in: u64,
    pub reads_out: u64,
}

impl FilterStats {
    /// Fraction of input pairs removed by filtering.
    pub fn loss_fraction(&self) -> f64 {
        if self.reads_in == 0 {
            0.0
        } else {
            1.0 - self.reads_out as f64 / self.reads_in as f64
        }
    }
}

/// The configured filter, with the control screen loaded once.
pub struct FilterStage<'a> {
    params: &'a FilterParams,
    control: Option<KmerScreen>,
}

impl<'a> FilterStage<'a> {
    pub fn new(params: &'a FilterParams) -> Result<Self, FilterError> {
        let control = match (&params.control_reference, params.remove_control) {
            (Some(path), true) => Some(load_control(path)?),
            (None, true) => return Err(FilterError::MissingControl),
            _ => None,
        };
        Ok(FilterStage { params, control })
    }

    fn direction_filter(&self, trunc_len: usize, max_ee: f64) -> ReadFilter<'_> {
        ReadFilter {
            trunc_len,
            trunc_q: self.params.trunc_q,
            max_n: self.params.max_n,
            min_q: self.params.min_q,
            max_ee,
            control: self.control.as_ref(),
        }
    }

    /// Filters one sample into its filtered output files.
    pub fn filter_pair(&self, pair: &SamplePair) -> Result<FilterStats, FilterError> {
        let forward_filter =
            self.direction_filter(self.params.trunc_len_forward, self.params.max_ee_forward);
        let reverse_filter =
            self.direction_filter(self.params.trunc_len_reverse, self.params.max_ee_reverse);

        let mut forward_reader = open_reader(&pair.forward)?;
        let mut reverse_reader = open_reader(&pair.reverse)?;
        let mut forward_out = FastqWriter::create(&pair.filtered_forward)?;
        let mut reverse_out = FastqWriter::create(&pair.filtered_reverse)?;

        let mut stats = FilterStats {
            sample: pair.name.clone(),
            reads_in: 0,
            reads_out: 0,
        };

        loop {
            let fwd = pull(&mut forward_reader, &pair.forward).transpose()?;
            let rev = pull(&mut reverse_reader, &pair.reverse).transpose()?;
            let (fwd, rev) = match (fwd, rev) {
                (Some(f), Some(r)) => (f, r),
                (None, None) => break,
                (f, r) => {
                    // One file ran out first; count what remains for the error.
                    let extra_fwd = u64::from(f.is_some()) + count_rest(&mut forward_reader, &pair.forward)?;
                    let extra_rev = u64::from(r.is_some()) + count_rest(&mut reverse_reader, &pair.reverse)?;
                    return Err(FilterError::UnequalMates {
                        sample: pair.name.clone(),
                        forward: stats.reads_in + extra_fwd,
                        reverse: stats.reads_in + extra_rev,
                    });
                }
            };
            stats.reads_in += 1;

            if let (Ok(f), Ok(r)) = (forward_filter.apply(&fwd), reverse_filter.apply(&rev)) {
                forward_out.write_record(&f)?;
                reverse_out.write_record(&r)?;
                stats.reads_out += 1;
            }
        }

        forward_out.finish()?;
        reverse_out.finish()?;

        debug!(
            "{}: {} of {} read pairs passed filtering",
            pair.name, stats.reads_out, stats.reads_in
        );
        if stats.reads_out < self.params.min_report_reads {
            warn!(
                "{}: low yield after filtering ({} read pairs)",
                pair.name, stats.reads_out
            );
        }
        Ok(stats)
    }

    /// Filters every sample of a run in parallel. Results keep sample order.
    pub fn filter_run(&self, run: &Run) -> Result<Vec<FilterStats>, FilterError> {
        info!(
            "Run {}: filtering {} samples into {}",
            run.run_id,
            run.samples.len(),
            run.filtered_dir.display()
        );
        let stats = run
            .samples
            .par_iter()
            .map(|pair| self.filter_pair(pair))
            .collect::<Result<Vec<_>, _>>()?;

        let reads_in: u64 = stats.iter().map(|s| s.reads_in).sum();
        let reads_out: u64 = stats.iter().map(|s| s.reads_out).sum();
        info!(
            "Run {}: {} of {} read pairs passed filtering",
            run.run_id, reads_out, reads_in
        );
        Ok(stats)
    }
}

fn pull(
    reader: &mut Option<Box<dyn FastxReader>>,
    path: &Path,
) -> Option<Result<FastqRecord, FastqError>> {
    next_record(reader.as_mut()?.as_mut(), path)
}

fn count_rest(reader: &mut Option<Box<dyn FastxReader>>, path: &Path) -> Result<u64, FastqError> {
    let mut n = 0;
    while let Some(record) = pull(reader, path) {
        record?;
        n += 1;
    }
    Ok(n)
}

fn load_control(path: &Path) -> Result<KmerScreen, FilterError> {
    let entries = read_fasta(path)?;
    let screen = KmerScreen::new(entries.iter().map(|(_, seq)| seq.as_slice()), CONTROL_K);
    if screen.is_empty() {
        return Err(FilterError::EmptyControl(path.display().to_string()));
    }
    info!(
        "Loaded {} control sequences from {}",
        entries.len(),
        path.display()
    );
    Ok(screen)
}

/// Samples to report on: those with at least `min_reads` pairs both before
/// and after filtering, highest loss first. Low-yield samples are left out.
pub fn loss_report(stats: &[FilterStats], min_reads: u64) -> Vec<FilterStats> {
    let mut report: Vec<FilterStats> = stats
        .iter()
        .filter(|s| s.reads_in >= min_reads && s.reads_out >= min_reads.max(1))
        .cloned()
        .collect();
    report.sort_by(|a, b| {
        b.loss_fraction()
            .total_cmp(&a.loss_fraction())
            .then_with(|| a.sample.cmp(&b.sample))
    });
    report
}
