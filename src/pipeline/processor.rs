//! Run orchestration: each run from raw reads to its abundance table, the
//! cross-run merge, and the metadata summaries.

use crate::config::{PipelineConfig, RunConfig};
use crate::denoise::{DenoiseEngine, NativeEngine};
use crate::io;
use crate::metadata::{self, MappingEntry, MetadataIndex};
use crate::pipeline::aggregate::{aggregate_run, tagged_sample, track_rows};
use crate::pipeline::denoise::denoise_run;
use crate::pipeline::merge::{load_merged, merge_runs, persist_merged, MergedPaths, MergedTables, References};
use crate::pipeline::qc::FilterStage;
use crate::pipeline::report::{write_filter_report, write_track};
use crate::pipeline::resolver::{resolve_run, seqtab_path};
use crate::pipeline::ProcessingError;
use crate::stats;
use crate::visualization::SummaryPlotter;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Instant;

/// Outcome of processing one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub tag: String,
    pub samples: usize,
    pub reads_in: u64,
    pub reads_filtered: u64,
    pub reads_merged: u64,
    pub sequences: usize,
    /// Samples with fewer filtered reads than the report threshold.
    pub low_yield: Vec<String>,
    /// Samples whose denoising failed, with the reason.
    pub failed: Vec<(String, String)>,
    pub table_path: PathBuf,
}

/// What the summary step produced.
#[derive(Debug, Clone)]
pub struct SummaryOutputs {
    pub records: usize,
    pub unmatched: Vec<String>,
    pub figures: Vec<PathBuf>,
}

/// Drives the pipeline stages with one configuration and denoising engine.
pub struct RunProcessor<E = NativeEngine> {
    config: PipelineConfig,
    engine: E,
}

impl RunProcessor<NativeEngine> {
    /// Create a processor using the built-in engine configured from `config`.
    pub fn new(config: PipelineConfig) -> Self {
        let engine = NativeEngine::new(
            config.denoise.clone(),
            config.chimera.clone(),
            config.taxonomy.clone(),
        );
        RunProcessor { config, engine }
    }
}

impl<E: DenoiseEngine> RunProcessor<E> {
    pub fn with_engine(config: PipelineConfig, engine: E) -> Self {
        RunProcessor { config, engine }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Looks up a configured run by id.
    pub fn run_config(&self, run_id: &str) -> Result<&RunConfig, ProcessingError> {
        self.config
            .runs
            .iter()
            .find(|r| r.run_id == run_id)
            .ok_or_else(|| ProcessingError::UnknownRun(run_id.to_string()))
    }

    /// Processes one run from raw reads to its persisted abundance table.
    ///
    /// Writes `filter_report.csv`, `seqtab.json`, `seqtab.csv` and
    /// `track.csv` into the run's output directory.
    pub fn process_run(&self, run_config: &RunConfig) -> Result<RunSummary, ProcessingError> {
        let start = Instant::now();
        let config = &self.config;

        let run = resolve_run(&config.data_dir, &config.out_dir, run_config, &config.pairing)?;

        let stage = FilterStage::new(&config.filter)?;
        let filter_stats = stage.filter_run(&run)?;
        let reported = write_filter_report(
            &filter_stats,
            config.filter.min_report_reads,
            &run.filter_report_path(),
        )?;
        debug!("Run {}: {} samples in the filter report", run.run_id, reported);

        let outcomes = denoise_run(&self.engine, &run, config.denoise.error_model_max_bases)?;
        let table = aggregate_run(&outcomes, &run.tag)?;

        io::save_json(&table, &run.seqtab_path())?;
        io::write_count_table(&table, &run.seqtab_csv_path())?;
        write_track(&track_rows(&filter_stats, &outcomes), &run.track_path())?;

        let summary = RunSummary {
            run_id: run.run_id.clone(),
            tag: run.tag.clone(),
            samples: run.samples.len(),
            reads_in: filter_stats.iter().map(|s| s.reads_in).sum(),
            reads_filtered: filter_stats.iter().map(|s| s.reads_out).sum(),
            reads_merged: table.total(),
            sequences: table.sequences().len(),
            low_yield: filter_stats
                .iter()
                .filter(|s| s.reads_out < config.filter.min_report_reads)
                .map(|s| s.sample.clone())
                .collect(),
            failed: outcomes
                .iter()
                .filter_map(|o| o.failure.clone().map(|f| (o.sample.clone(), f)))
                .collect(),
            table_path: run.seqtab_path(),
        };

        info!(
            "Run {} finished in {:.1}s: {} sequences from {} merged reads",
            summary.run_id,
            start.elapsed().as_secs_f64(),
            summary.sequences,
            summary.reads_merged
        );
        Ok(summary)
    }

    /// Merges the saved tables of the given runs and assigns taxonomy.
    pub fn merge(&self, run_ids: &[String]) -> Result<MergedTables, ProcessingError> {
        if run_ids.is_empty() {
            return Err(ProcessingError::NoRuns);
        }

        let mut tables = Vec::with_capacity(run_ids.len());
        for run_id in run_ids {
            let path = seqtab_path(&self.config.out_dir, run_id);
            if !path.exists() {
                return Err(ProcessingError::MissingRunTable {
                    run_id: run_id.clone(),
                    path,
                });
            }
            tables.push(io::load_table(&path)?);
        }

        let references = References::load(&self.config.taxonomy)?;
        let merged = merge_runs(&self.engine, &tables, references.as_ref())?;
        persist_merged(&merged, &MergedPaths::new(&self.config.out_dir))?;
        Ok(merged)
    }

    /// Joins the merged table with sample metadata and writes the summary
    /// tables and figures.
    pub fn summarize(&self) -> Result<SummaryOutputs, ProcessingError> {
        let config = &self.config;
        let merged = load_merged(&MergedPaths::new(&config.out_dir))?;

        let mut mappings: Vec<(String, MappingEntry)> = Vec::new();
        for run in &config.runs {
            let Some(path) = &run.mapping_file else {
                warn!("Run {} has no mapping file", run.run_id);
                continue;
            };
            for entry in metadata::load_mapping(path)? {
                mappings.push((tagged_sample(&entry.sample, run.tag()), entry));
            }
        }
        let tracking = match &config.tracking_file {
            Some(path) => metadata::load_tracking(path)?,
            None => {
                warn!("No tracking file configured; subjects and study days are unknown");
                Vec::new()
            }
        };

        let index = MetadataIndex::build(&mappings, &tracking);
        let joined = metadata::join_table(&merged.table, &index);

        let summary_dir = config.out_dir.join("summary");
        io::write_csv_rows(&joined.records, &summary_dir.join("aggregated_records.csv"))?;
        io::write_lines(&joined.unmatched, &summary_dir.join("unmatched_samples.txt"))?;

        let summary = &config.summary;
        let detections = stats::detections(&joined.records, &summary.specimen_types);
        let pileup = stats::subject_pileup(&detections);
        let earliest = stats::earliest_detection(&detections, summary.study_day_cap);
        stats::write_subject_pileup(&pileup, &summary_dir.join("subject_pileup.csv"))?;
        stats::write_earliest_detection(&earliest, &summary_dir.join("earliest_detection.csv"))?;

        let plotter = SummaryPlotter::new(
            &config.figures_dir(),
            summary.plot_width,
            summary.plot_height,
        )?;
        let figures = plotter.render_all(&pileup, &earliest, summary)?;

        Ok(SummaryOutputs {
            records: joined.records.len(),
            unmatched: joined.unmatched,
            figures,
        })
    }

    /// Processes every configured run, merges them and writes the summaries.
    pub fn run_all(&self) -> Result<Vec<RunSummary>, ProcessingError> {
        if self.config.runs.is_empty() {
            return Err(ProcessingError::NoRuns);
        }
        let summaries = self
            .config
            .runs
            .iter()
            .map(|run| self.process_run(run))
            .collect::<Result<Vec<_>, _>>()?;

        let run_ids: Vec<String> = self.config.runs.iter().map(|r| r.run_id.clone()).collect();
        self.merge(&run_ids)?;
        self.summarize()?;
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::fastq::tests::write_fastq_gz;
    use crate::pipeline::denoise::tests::{amplicon_reads, AMPLICON};
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    fn write_lane(root: &Path, samples: &[(&str, usize)]) {
        let lane = root.join("data").join("MIRA1").join("L001");
        fs::create_dir_all(&lane).unwrap();
        for (name, n) in samples {
            let (fwd, rev) = amplicon_reads(*n);
            write_fastq_gz(&lane.join(format!("{}_1.fastq.gz", name)), &fwd);
            write_fastq_gz(&lane.join(format!("{}_2.fastq.gz", name)), &rev);
        }
    }

    fn test_config(root: &Path) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.data_dir = root.join("data");
        config.out_dir = root.join("out");
        config.threads = 1;
        config.filter.trunc_len_forward = 25;
        config.filter.trunc_len_reverse = 25;
        config.filter.min_report_reads = 10;
        let control = root.join("phix.fasta");
        fs::write(&control, format!(">phiX\n{}\n", "GATC".repeat(15))).unwrap();
        config.filter.control_reference = Some(control);
        config.runs = vec![RunConfig {
            run_id: "MIRA1".to_string(),
            lane: "L001".to_string(),
            tag: None,
            mapping_file: Some(root.join("mapping.tsv")),
        }];
        config.tracking_file = Some(root.join("tracking.csv"));
        config
    }

    #[test]
    fn test_process_run_keeps_empty_samples() {
        let dir = tempdir().unwrap();
        write_lane(dir.path(), &[("A", 30), ("C", 0)]);
        let processor = RunProcessor::new(test_config(dir.path()));

        let summary = processor.process_run(&processor.config().runs[0]).unwrap();
        assert_eq!(summary.samples, 2);
        assert_eq!(summary.reads_in, 30);
        assert_eq!(summary.reads_merged, 30);
        assert_eq!(summary.sequences, 1);
        assert_eq!(summary.low_yield, vec!["C".to_string()]);

        let table = io::load_table(&summary.table_path).unwrap();
        let amplicon = std::str::from_utf8(AMPLICON).unwrap();
        assert_eq!(table.get("A_MIRA1", amplicon), Some(30));
        assert_eq!(table.get("C_MIRA1", amplicon), Some(0));

        let report = fs::read_to_string(dir.path().join("out/MIRA1/filter_report.csv")).unwrap();
        assert!(report.contains("A,30,30,"));
        assert!(!report.contains("C,"));
        assert!(dir.path().join("out/MIRA1/track.csv").exists());
    }

    #[test]
    fn test_merge_requires_processed_runs() {
        let dir = tempdir().unwrap();
        let processor = RunProcessor::with_engine(test_config(dir.path()), NativeEngine::default());
        assert!(matches!(
            processor.merge(&["MIRA1".to_string()]),
            Err(ProcessingError::MissingRunTable { .. })
        ));
        assert!(matches!(
            processor.run_config("MIRA9"),
            Err(ProcessingError::UnknownRun(_))
        ));
    }

    #[test]
    fn test_run_all_end_to_end() {
        let dir = tempdir().unwrap();
        write_lane(dir.path(), &[("A", 30), ("B", 20), ("C", 0)]);
        fs::write(
            dir.path().join("mapping.tsv"),
            "sample\tspecimen_id\tspecimen_type\nA\tSP-1\tsputum\nB\tSP-2\tsputum\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("tracking.csv"),
            "subject_id,specimen_id,collection_date,specimen_type\nP1,SP-1,2021-01-01,Sputum\nP1,SP-2,2021-01-11,Sputum\n",
        )
        .unwrap();
        let processor = RunProcessor::new(test_config(dir.path()));

        let summaries = processor.run_all().unwrap();
        assert_eq!(summaries.len(), 1);

        let out = dir.path().join("out");
        assert!(out.join("merged/seqtab_nochim.json").exists());
        assert!(out.join("merged/asvs.fasta").exists());
        let unmatched = fs::read_to_string(out.join("summary/unmatched_samples.txt")).unwrap();
        assert_eq!(unmatched.trim(), "C_MIRA1");

        let pileup = fs::read_to_string(out.join("summary/subject_pileup.csv")).unwrap();
        assert!(pileup.contains("sputum,1,1"));
        let earliest = fs::read_to_string(out.join("summary/earliest_detection.csv")).unwrap();
        assert!(earliest.contains("sputum,0,1"));

        for figure in [
            "subject_pileup_all.svg",
            "subject_pileup_over_cutoff.svg",
            "earliest_detection_all.svg",
            "earliest_detection_after_day0.svg",
        ] {
            assert!(out.join("figures").join(figure).exists());
        }

        let outputs = processor.summarize().unwrap();
        assert_eq!(outputs.records, 3);
    }
}
