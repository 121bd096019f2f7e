use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use std::path::PathBuf;

use crate::config::PipelineConfig;
use crate::pipeline::{generate_report, RunProcessor};

#[derive(Parser, Debug)]
#[command(author, version, about = "Amplicon sequence variant pipeline", long_about = None)]
pub struct Cli {
    /// Pipeline configuration (JSON). Defaults are used when omitted.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Number of worker threads (overrides the configuration)
    #[arg(short, long, global = true)]
    pub threads: Option<usize>,

    /// Root directory of the raw reads (overrides the configuration)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Root directory of all outputs (overrides the configuration)
    #[arg(short, long, global = true)]
    pub out_dir: Option<PathBuf>,

    /// Log debug messages
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Filter, denoise and tabulate runs
    Run {
        /// Run ids to process; all configured runs when omitted
        #[arg(short, long = "run")]
        runs: Vec<String>,
    },

    /// Merge processed runs, remove chimeras and assign taxonomy
    Merge {
        /// Run ids to merge; all configured runs when omitted
        #[arg(short, long = "run")]
        runs: Vec<String>,
    },

    /// Join the merged table with metadata and draw the summary figures
    Summarize,

    /// Run every step for every configured run
    All,
}

impl Cli {
    /// Loads the configuration and applies the command-line overrides.
    pub fn load_config(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_path(path)
                .with_context(|| format!("loading configuration {}", path.display()))?,
            None => PipelineConfig::default(),
        };
        if let Some(threads) = self.threads {
            config.threads = threads;
        }
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(dir) = &self.out_dir {
            config.out_dir = dir.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

fn selected_runs(config: &PipelineConfig, runs: Vec<String>) -> Vec<String> {
    if runs.is_empty() {
        config.runs.iter().map(|r| r.run_id.clone()).collect()
    } else {
        runs
    }
}

/// Main entry point for CLI
pub fn run_cli(command: Commands, config: PipelineConfig) -> Result<()> {
    let processor = RunProcessor::new(config);

    match command {
        Commands::Run { runs } => {
            for run_id in selected_runs(processor.config(), runs) {
                let run = processor.run_config(&run_id)?;
                let summary = processor
                    .process_run(run)
                    .with_context(|| format!("processing run {}", run_id))?;
                println!("{}", generate_report(&summary));
            }
        }

        Commands::Merge { runs } => {
            let run_ids = selected_runs(processor.config(), runs);
            let merged = processor.merge(&run_ids)?;
            let (samples, sequences) = merged.table.dimensions();
            println!(
                "Merged {} runs: {} samples, {} sequences after chimera removal",
                run_ids.len(),
                samples,
                sequences
            );
        }

        Commands::Summarize => {
            let outputs = processor.summarize()?;
            println!(
                "Joined {} records ({} samples without metadata)",
                outputs.records,
                outputs.unmatched.len()
            );
            for figure in &outputs.figures {
                println!("Generated figure: {}", figure.display());
            }
        }

        Commands::All => {
            let summaries = processor.run_all()?;
            for summary in &summaries {
                println!("{}", generate_report(summary));
            }
            info!("All {} runs processed, merged and summarized", summaries.len());
        }
    }

    Ok(())
}
