//! Pipeline configuration.
//!
//! Every tunable constant of the pipeline lives here. A configuration can be
//! loaded from a JSON file; any section that is missing falls back to its
//! defaults, and command-line flags override the loaded values.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid value: {0}")]
    Invalid(String),
}

/// Top-level configuration for all pipeline stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Root directory holding `<run_id>/<lane>/` read folders.
    pub data_dir: PathBuf,
    /// Root directory for all pipeline outputs.
    pub out_dir: PathBuf,
    /// Directory for summary figures. Defaults to `<out_dir>/figures`.
    pub figures_dir: Option<PathBuf>,
    /// Worker threads for filtering and taxonomy assignment.
    pub threads: usize,
    /// Sequencing runs processed by the `all` command.
    pub runs: Vec<RunConfig>,
    /// Specimen-tracking extract shared by all runs.
    pub tracking_file: Option<PathBuf>,
    pub pairing: PairingParams,
    pub filter: FilterParams,
    pub denoise: DenoiseParams,
    pub chimera: ChimeraParams,
    pub taxonomy: TaxonomyParams,
    pub summary: SummaryParams,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            data_dir: PathBuf::from("data"),
            out_dir: PathBuf::from("results"),
            figures_dir: None,
            threads: 4,
            runs: Vec::new(),
            tracking_file: None,
            pairing: PairingParams::default(),
            filter: FilterParams::default(),
            denoise: DenoiseParams::default(),
            chimera: ChimeraParams::default(),
            taxonomy: TaxonomyParams::default(),
            summary: SummaryParams::default(),
        }
    }
}

impl PipelineConfig {
    /// Loads a configuration from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: PipelineConfig =
            serde_json::from_reader(BufReader::new(file)).map_err(|source| {
                ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                }
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threads == 0 {
            return Err(ConfigError::Invalid("threads must be at least 1".to_string()));
        }
        if self.pairing.forward_suffix == self.pairing.reverse_suffix {
            return Err(ConfigError::Invalid(
                "forward and reverse suffixes must differ".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.chimera.min_sample_fraction) {
            return Err(ConfigError::Invalid(format!(
                "min_sample_fraction must be within [0, 1], got {}",
                self.chimera.min_sample_fraction
            )));
        }
        if self.taxonomy.kmer_size == 0 || self.taxonomy.kmer_size > 16 {
            return Err(ConfigError::Invalid(format!(
                "taxonomy kmer_size must be within 1..=16, got {}",
                self.taxonomy.kmer_size
            )));
        }
        if self.summary.plot_width == 0 || self.summary.plot_height == 0 {
            return Err(ConfigError::Invalid("plot size must be non-zero".to_string()));
        }
        if self.filter.remove_control && self.filter.control_reference.is_none() {
            return Err(ConfigError::Invalid(
                "remove_control needs filter.control_reference (a phiX FASTA) or remove_control: false"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Directory figures are written to.
    pub fn figures_dir(&self) -> PathBuf {
        self.figures_dir
            .clone()
            .unwrap_or_else(|| self.out_dir.join("figures"))
    }
}

/// One sequencing run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub run_id: String,
    pub lane: String,
    /// Suffix appended to sample names; defaults to the run id.
    #[serde(default)]
    pub tag: Option<String>,
    /// Per-run mapping of sample names to specimens.
    #[serde(default)]
    pub mapping_file: Option<PathBuf>,
}

impl RunConfig {
    pub fn tag(&self) -> &str {
        self.tag.as_deref().unwrap_or(&self.run_id)
    }
}

/// How forward and reverse read files are recognised and paired.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PairingParams {
    pub forward_suffix: String,
    pub reverse_suffix: String,
    /// Skip unmatched files instead of failing the run.
    pub allow_orphans: bool,
}

impl Default for PairingParams {
    fn default() -> Self {
        PairingParams {
            forward_suffix: "_1.fastq.gz".to_string(),
            reverse_suffix: "_2.fastq.gz".to_string(),
            allow_orphans: false,
        }
    }
}

/// Read trimming and filtering thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterParams {
    /// Forward read truncation length (0 disables truncation).
    pub trunc_len_forward: usize,
    /// Reverse read truncation length (0 disables truncation).
    pub trunc_len_reverse: usize,
    pub max_n: usize,
    pub max_ee_forward: f64,
    pub max_ee_reverse: f64,
    /// Reads are truncated at the first base with quality at or below this.
    pub trunc_q: u8,
    /// Reads with any base below this quality are discarded.
    pub min_q: u8,
    /// Remove reads matching the control reference.
    pub remove_control: bool,
    /// FASTA of control sequences (e.g. phiX).
    pub control_reference: Option<PathBuf>,
    /// Samples with fewer input reads are left out of the loss report.
    pub min_report_reads: u64,
}

impl Default for FilterParams {
    fn default() -> Self {
        FilterParams {
            trunc_len_forward: 240,
            trunc_len_reverse: 160,
            max_n: 0,
            max_ee_forward: 2.0,
            max_ee_reverse: 2.0,
            trunc_q: 2,
            min_q: 0,
            remove_control: true,
            control_reference: None,
            min_report_reads: 1000,
        }
    }
}

/// Parameters of the denoising and pair-merging stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DenoiseParams {
    /// Bases read per direction before the error model is learned.
    pub error_model_max_bases: u64,
    /// Abundance p-value below which a sequence is a new variant.
    pub omega_a: f64,
    /// Minimum abundance for a variant with no plausible parent.
    pub min_abundance: u64,
    /// Largest Hamming distance at which a variant may explain another.
    pub max_distance: usize,
    pub min_overlap: usize,
    pub max_mismatch: usize,
}

impl Default for DenoiseParams {
    fn default() -> Self {
        DenoiseParams {
            error_model_max_bases: 100_000_000,
            omega_a: 1e-40,
            min_abundance: 2,
            max_distance: 10,
            min_overlap: 12,
            max_mismatch: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChimeraMethod {
    /// Flag per sample, remove when flagged in enough samples.
    Consensus,
    /// Flag on abundances pooled over all samples.
    Pooled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChimeraParams {
    pub method: ChimeraMethod,
    pub min_fold_parent_over_abundance: f64,
    pub min_parent_abundance: u64,
    pub min_sample_fraction: f64,
    pub ignore_n_negatives: usize,
}

impl Default for ChimeraParams {
    fn default() -> Self {
        ChimeraParams {
            method: ChimeraMethod::Consensus,
            min_fold_parent_over_abundance: 1.5,
            min_parent_abundance: 2,
            min_sample_fraction: 0.9,
            ignore_n_negatives: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaxonomyParams {
    /// Genus-level training FASTA (`>Kingdom;Phylum;...;Genus;`).
    pub reference: Option<PathBuf>,
    /// Species-level FASTA (`>id Genus species`).
    pub species_reference: Option<PathBuf>,
    pub kmer_size: usize,
    pub bootstraps: usize,
    /// Minimum bootstrap support (percent) to keep a rank.
    pub min_boot: u32,
    pub seed: u64,
}

impl Default for TaxonomyParams {
    fn default() -> Self {
        TaxonomyParams {
            reference: None,
            species_reference: None,
            kmer_size: 8,
            bootstraps: 100,
            min_boot: 50,
            seed: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryParams {
    /// Specimen types kept for the summaries.
    pub specimen_types: Vec<String>,
    /// Buckets above this distinct-subject count get their own plot.
    pub subject_cutoff: u32,
    /// Earliest-detection days above this are clamped to it.
    pub study_day_cap: u32,
    pub subject_pileup_y_max: u64,
    pub subject_pileup_cutoff_y_max: u64,
    pub earliest_detection_y_max: u64,
    pub earliest_detection_late_y_max: u64,
    pub plot_width: u32,
    pub plot_height: u32,
}

impl Default for SummaryParams {
    fn default() -> Self {
        SummaryParams {
            specimen_types: vec![
                "oral_swab".to_string(),
                "stool_swab".to_string(),
                "sputum".to_string(),
            ],
            subject_cutoff: 10,
            study_day_cap: 200,
            subject_pileup_y_max: 3000,
            subject_pileup_cutoff_y_max: 50,
            earliest_detection_y_max: 3000,
            earliest_detection_late_y_max: 200,
            plot_width: 1200,
            plot_height: 500,
        }
    }
}
