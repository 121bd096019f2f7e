//! Main entry point for the amplicon_asv application.
//!
//! Turns paired-end 16S amplicon reads from several sequencing runs into
//! amplicon sequence variants:
//! 1. Pair the FASTQ files of each run and filter the reads.
//! 2. Denoise each sample and merge read pairs into contigs.
//! 3. Tabulate each run, then merge the runs and remove chimeras.
//! 4. Assign taxonomy to the remaining sequences.
//! 5. Join with specimen metadata and draw summary figures.

mod bio;
mod cli;
mod config;
mod count_table;
mod denoise;
mod io;
mod metadata;
mod pipeline;
mod stats;
mod visualization;

use anyhow::Result;
use clap::Parser;
use cli::{run_cli, Cli};
use env_logger::Env;
use log::{error, info};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_level)).init();

    let config = cli.load_config()?;
    rayon::ThreadPoolBuilder::new()
        .num_threads(config.threads)
        .build_global()?;
    info!("Using {} threads.", config.threads);

    if let Err(e) = run_cli(cli.command, config) {
        error!("{:#}", e);
        return Err(e);
    }

    info!("Finished successfully.");
    Ok(())
}
