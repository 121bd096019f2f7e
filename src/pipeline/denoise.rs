//! Per-sample denoise-and-merge stage.
//!
//! Error models are learned once per run and direction. Samples are then
//! processed one at a time: only the current sample's reads and
//! dereplicated sequences are in memory, and each sample produces an
//! immutable [`SampleOutcome`].

use crate::denoise::{ContigSet, DenoiseEngine, DenoiseError, ErrorModel, VariantCall};
use crate::io::fastq::{read_fastq, FastqRecord};
use crate::pipeline::resolver::{Run, SamplePair};
use crate::pipeline::ProcessingError;
use log::{debug, info, warn};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Forward => "forward",
            Direction::Reverse => "reverse",
        }
    }

    fn filtered_path<'a>(&self, pair: &'a SamplePair) -> &'a Path {
        match self {
            Direction::Forward => &pair.filtered_forward,
            Direction::Reverse => &pair.filtered_reverse,
        }
    }
}

/// Forward and reverse error models of one run.
#[derive(Debug, Clone)]
pub struct RunErrorModels {
    pub forward: ErrorModel,
    pub reverse: ErrorModel,
}

/// Result of denoising one sample.
#[derive(Debug, Clone, Default)]
pub struct SampleOutcome {
    pub sample: String,
    /// Read pairs in the filtered files.
    pub filtered_reads: u64,
    pub denoised_forward: u64,
    pub denoised_reverse: u64,
    pub contigs: ContigSet,
    /// Why the sample contributed nothing, if it failed.
    pub failure: Option<String>,
}

impl SampleOutcome {
    fn empty(sample: &str, filtered_reads: u64) -> Self {
        SampleOutcome {
            sample: sample.to_string(),
            filtered_reads,
            ..SampleOutcome::default()
        }
    }

    pub fn merged_reads(&self) -> u64 {
        self.contigs.merged_reads()
    }
}

/// Learns the error model of one direction from the run's filtered reads.
///
/// Samples are dereplicated in order until `max_bases` bases have been
/// collected. Samples without reads are skipped; `None` means the whole
/// run filtered to nothing.
pub fn learn_direction<E>(
    engine: &E,
    run: &Run,
    direction: Direction,
    max_bases: u64,
) -> Result<Option<ErrorModel>, ProcessingError>
where
    E: DenoiseEngine + ?Sized,
{
    let mut dereps = Vec::new();
    let mut bases = 0u64;

    for pair in &run.samples {
        let reads = read_fastq(direction.filtered_path(pair))?;
        if reads.is_empty() {
            debug!("{}: no {} reads for error learning", pair.name, direction.as_str());
            continue;
        }
        let derep = engine.dereplicate(&reads);
        bases += derep.total_bases();
        dereps.push(derep);
        if bases >= max_bases {
            break;
        }
    }

    if dereps.is_empty() {
        warn!(
            "Run {}: no {} reads left after filtering",
            run.run_id,
            direction.as_str()
        );
        return Ok(None);
    }

    info!(
        "Run {}: learning {} error model from {} bases in {} samples",
        run.run_id,
        direction.as_str(),
        bases,
        dereps.len()
    );
    Ok(Some(engine.learn_error_model(&dereps)?))
}

/// Learns both error models of a run.
pub fn learn_error_models<E>(
    engine: &E,
    run: &Run,
    max_bases: u64,
) -> Result<Option<RunErrorModels>, ProcessingError>
where
    E: DenoiseEngine + ?Sized,
{
    let forward = learn_direction(engine, run, Direction::Forward, max_bases)?;
    let reverse = learn_direction(engine, run, Direction::Reverse, max_bases)?;
    Ok(match (forward, reverse) {
        (Some(forward), Some(reverse)) => Some(RunErrorModels { forward, reverse }),
        _ => None,
    })
}

fn denoise_reads<E>(
    engine: &E,
    forward: &[FastqRecord],
    reverse: &[FastqRecord],
    models: &RunErrorModels,
) -> Result<(VariantCall, VariantCall, ContigSet), DenoiseError>
where
    E: DenoiseEngine + ?Sized,
{
    let call_forward = {
        let derep = engine.dereplicate(forward);
        engine.infer_variants(&derep, &models.forward)?
    };
    let call_reverse = {
        let derep = engine.dereplicate(reverse);
        engine.infer_variants(&derep, &models.reverse)?
    };
    let contigs = engine.merge_pairs(&call_forward, &call_reverse)?;
    Ok((call_forward, call_reverse, contigs))
}

/// Denoises and merges one sample.
///
/// Failures confined to the sample (merging, inference) are logged and
/// give an empty outcome carrying the reason. Read errors are returned.
pub fn denoise_sample<E>(
    engine: &E,
    pair: &SamplePair,
    models: Option<&RunErrorModels>,
) -> Result<SampleOutcome, ProcessingError>
where
    E: DenoiseEngine + ?Sized,
{
    let forward = read_fastq(&pair.filtered_forward)?;
    let reverse = read_fastq(&pair.filtered_reverse)?;
    let filtered_reads = forward.len().max(reverse.len()) as u64;

    let models = match models {
        Some(models) if !forward.is_empty() && !reverse.is_empty() => models,
        _ => {
            debug!("{}: no filtered reads, skipping denoising", pair.name);
            return Ok(SampleOutcome::empty(&pair.name, filtered_reads));
        }
    };

    match denoise_reads(engine, &forward, &reverse, models) {
        Ok((call_forward, call_reverse, contigs)) => {
            debug!(
                "{}: {} forward and {} reverse variants, {} contigs",
                pair.name,
                call_forward.variants.len(),
                call_reverse.variants.len(),
                contigs.contigs.len()
            );
            Ok(SampleOutcome {
                sample: pair.name.clone(),
                filtered_reads,
                denoised_forward: call_forward.assigned_reads(),
                denoised_reverse: call_reverse.assigned_reads(),
                contigs,
                failure: None,
            })
        }
        Err(e) if e.is_sample_local() => {
            warn!("{}: {}; sample contributes no reads", pair.name, e);
            Ok(SampleOutcome {
                failure: Some(e.to_string()),
                ..SampleOutcome::empty(&pair.name, filtered_reads)
            })
        }
        Err(e) => Err(e.into()),
    }
}

/// Runs the stage over every sample of a run, one sample at a time.
pub fn denoise_run<E>(
    engine: &E,
    run: &Run,
    error_model_max_bases: u64,
) -> Result<Vec<SampleOutcome>, ProcessingError>
where
    E: DenoiseEngine + ?Sized,
{
    let models = learn_error_models(engine, run, error_model_max_bases)?;

    let mut outcomes = Vec::with_capacity(run.samples.len());
    for pair in &run.samples {
        outcomes.push(denoise_sample(engine, pair, models.as_ref())?);
    }

    let failed = outcomes.iter().filter(|o| o.failure.is_some()).count();
    info!(
        "Run {}: denoised {} samples ({} failed)",
        run.run_id,
        outcomes.len(),
        failed
    );
    Ok(outcomes)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::bio::{reverse_complement, SpeciesReference, TaxonomyReference, TaxonomyTable};
    use crate::count_table::AbundanceTable;
    use crate::denoise::{DerepSet, NativeEngine};
    use crate::io::fastq::tests::write_fastq_gz;
    use tempfile::tempdir;

    pub(crate) const AMPLICON: &[u8] = b"ACGTTGCAAGGCTTAACCGGTTAAGCTTGC";

    /// Forward and reverse 25 bp reads of the test amplicon.
    pub(crate) fn amplicon_reads(n: usize) -> (Vec<FastqRecord>, Vec<FastqRecord>) {
        let rc = reverse_complement(AMPLICON);
        let forward = (0..n)
            .map(|i| FastqRecord::new(format!("p{}", i), &AMPLICON[..25], &[b'I'; 25]))
            .collect();
        let reverse = (0..n)
            .map(|i| FastqRecord::new(format!("p{}", i), &rc[..25], &[b'I'; 25]))
            .collect();
        (forward, reverse)
    }

    pub(crate) fn filtered_run(dir: &Path, samples: &[(&str, usize)]) -> Run {
        let pairs = samples
            .iter()
            .map(|(name, n)| {
                let pair = SamplePair {
                    name: name.to_string(),
                    forward: dir.join(format!("{}_1.fastq.gz", name)),
                    reverse: dir.join(format!("{}_2.fastq.gz", name)),
                    filtered_forward: dir.join(format!("{}_F_filt.fastq.gz", name)),
                    filtered_reverse: dir.join(format!("{}_R_filt.fastq.gz", name)),
                };
                let (fwd, rev) = amplicon_reads(*n);
                write_fastq_gz(&pair.filtered_forward, &fwd);
                write_fastq_gz(&pair.filtered_reverse, &rev);
                pair
            })
            .collect();
        Run {
            run_id: "MIRA1".to_string(),
            lane: "L001".to_string(),
            tag: "MIRA1".to_string(),
            input_dir: dir.to_path_buf(),
            output_dir: dir.to_path_buf(),
            filtered_dir: dir.to_path_buf(),
            samples: pairs,
        }
    }

    /// Native engine whose merge fails for samples with a given read count.
    struct FailingMerge {
        inner: NativeEngine,
        fail_reads: usize,
    }

    impl DenoiseEngine for FailingMerge {
        fn dereplicate(&self, reads: &[FastqRecord]) -> DerepSet {
            self.inner.dereplicate(reads)
        }

        fn learn_error_model(&self, samples: &[DerepSet]) -> Result<ErrorModel, DenoiseError> {
            self.inner.learn_error_model(samples)
        }

        fn infer_variants(
            &self,
            derep: &DerepSet,
            model: &ErrorModel,
        ) -> Result<VariantCall, DenoiseError> {
            self.inner.infer_variants(derep, model)
        }

        fn merge_pairs(
            &self,
            forward: &VariantCall,
            reverse: &VariantCall,
        ) -> Result<ContigSet, DenoiseError> {
            if forward.read_assignment.len() == self.fail_reads {
                return Err(DenoiseError::MergeFailure("no overlap".to_string()));
            }
            self.inner.merge_pairs(forward, reverse)
        }

        fn remove_chimeras(&self, table: &AbundanceTable) -> AbundanceTable {
            self.inner.remove_chimeras(table)
        }

        fn assign_taxonomy(
            &self,
            table: &AbundanceTable,
            reference: &TaxonomyReference,
            species: Option<&SpeciesReference>,
        ) -> TaxonomyTable {
            self.inner.assign_taxonomy(table, reference, species)
        }
    }

    #[test]
    fn denoises_and_merges_amplicon() {
        let dir = tempdir().unwrap();
        let run = filtered_run(dir.path(), &[("A", 30)]);

        let outcomes = denoise_run(&NativeEngine::default(), &run, 1_000_000).unwrap();
        assert_eq!(outcomes.len(), 1);
        let a = &outcomes[0];
        assert_eq!(a.filtered_reads, 30);
        assert_eq!(a.denoised_forward, 30);
        assert_eq!(a.denoised_reverse, 30);
        assert_eq!(a.merged_reads(), 30);
        assert_eq!(
            a.contigs.contigs.get(std::str::from_utf8(AMPLICON).unwrap()),
            Some(&30)
        );
        assert!(a.failure.is_none());
    }

    #[test]
    fn zero_read_sample_yields_empty_outcome() {
        let dir = tempdir().unwrap();
        let run = filtered_run(dir.path(), &[("A", 30), ("C", 0)]);

        let outcomes = denoise_run(&NativeEngine::default(), &run, 1_000_000).unwrap();
        assert_eq!(outcomes[1].sample, "C");
        assert_eq!(outcomes[1].filtered_reads, 0);
        assert!(outcomes[1].contigs.is_empty());
        assert!(outcomes[1].failure.is_none());
    }

    #[test]
    fn all_empty_run_does_not_learn_models() {
        let dir = tempdir().unwrap();
        let run = filtered_run(dir.path(), &[("C", 0)]);

        let engine = NativeEngine::default();
        assert!(learn_error_models(&engine, &run, 1_000_000).unwrap().is_none());
        let outcomes = denoise_run(&engine, &run, 1_000_000).unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].merged_reads(), 0);
    }

    #[test]
    fn merge_failure_is_isolated_to_its_sample() {
        let dir = tempdir().unwrap();
        let run = filtered_run(dir.path(), &[("A", 30), ("B", 7), ("D", 12)]);
        let engine = FailingMerge {
            inner: NativeEngine::default(),
            fail_reads: 7,
        };

        let outcomes = denoise_run(&engine, &run, 1_000_000).unwrap();
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].merged_reads(), 30);
        assert!(outcomes[1].failure.is_some());
        assert_eq!(outcomes[1].merged_reads(), 0);
        assert_eq!(outcomes[1].filtered_reads, 7);
        assert_eq!(outcomes[2].merged_reads(), 12);
    }

    #[test]
    fn error_learning_stops_at_base_budget() {
        let dir = tempdir().unwrap();
        let run = filtered_run(dir.path(), &[("A", 30), ("B", 30)]);
        // The first sample alone holds 750 bases.
        let model = learn_direction(&NativeEngine::default(), &run, Direction::Forward, 500)
            .unwrap()
            .unwrap();
        assert_eq!(model.observed_bases(), 750);
    }
}
