//! Pipeline stages and their orchestration.

pub mod aggregate;
pub mod denoise;
pub mod merge;
pub mod processor;
pub mod qc;
pub mod report;
pub mod resolver;

use crate::bio::classifier::TaxonomyError;
use crate::config::ConfigError;
use crate::count_table::TableError;
use crate::denoise::DenoiseError;
use crate::io::fastq::FastqError;
use crate::io::OutputError;
use crate::metadata::MetadataError;
use crate::visualization::VisualizationError;
use std::path::PathBuf;
use thiserror::Error;

pub use processor::{RunProcessor, RunSummary};
pub use report::generate_report;

#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("Pairing error: {0}")]
    Pairing(#[from] resolver::PairingError),

    #[error("Filter error: {0}")]
    Filter(#[from] qc::FilterError),

    #[error("FASTQ error: {0}")]
    Fastq(#[from] FastqError),

    #[error("Denoise error: {0}")]
    Denoise(#[from] DenoiseError),

    #[error("Table error: {0}")]
    Table(#[from] TableError),

    #[error("Output error: {0}")]
    Output(#[from] OutputError),

    #[error("Taxonomy error: {0}")]
    Taxonomy(#[from] TaxonomyError),

    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("Plotting error: {0}")]
    Visualization(#[from] VisualizationError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("No table for run {run_id} at {path}; process the run first")]
    MissingRunTable { run_id: String, path: PathBuf },

    #[error("Run {0} is not in the configuration")]
    UnknownRun(String),

    #[error("No runs selected")]
    NoRuns,
}
