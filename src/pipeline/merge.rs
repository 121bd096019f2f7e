//! Cross-run merging, chimera removal and taxonomy assignment.

use crate::bio::classifier::TaxonomyError;
use crate::bio::{SpeciesReference, TaxonomyReference, TaxonomyTable};
use crate::config::TaxonomyParams;
use crate::count_table::AbundanceTable;
use crate::denoise::DenoiseEngine;
use crate::io::{self, OutputError};
use crate::pipeline::ProcessingError;
use log::{info, warn};
use std::path::{Path, PathBuf};

/// Reference databases for taxonomy assignment.
pub struct References {
    pub genus: TaxonomyReference,
    pub species: Option<SpeciesReference>,
}

impl References {
    /// Loads the configured references; `None` when no genus reference is set.
    pub fn load(params: &TaxonomyParams) -> Result<Option<Self>, TaxonomyError> {
        let Some(path) = &params.reference else {
            warn!("No taxonomy reference configured; skipping taxonomy assignment");
            return Ok(None);
        };
        let genus = TaxonomyReference::from_fasta(path, params.kmer_size)?;
        let species = params
            .species_reference
            .as_ref()
            .map(SpeciesReference::from_fasta)
            .transpose()?;
        Ok(Some(References { genus, species }))
    }
}

/// The chimera-free global table and its taxonomy.
#[derive(Debug, Clone)]
pub struct MergedTables {
    pub table: AbundanceTable,
    pub taxonomy: Option<TaxonomyTable>,
}

/// Output locations of the merged tables.
#[derive(Debug, Clone)]
pub struct MergedPaths {
    pub dir: PathBuf,
}

impl MergedPaths {
    pub fn new(out_root: &Path) -> Self {
        MergedPaths {
            dir: out_root.join("merged"),
        }
    }

    pub fn table(&self) -> PathBuf {
        self.dir.join("seqtab_nochim.json")
    }

    pub fn table_csv(&self) -> PathBuf {
        self.dir.join("seqtab_nochim.csv")
    }

    pub fn taxonomy(&self) -> PathBuf {
        self.dir.join("taxa.json")
    }

    pub fn taxonomy_tsv(&self) -> PathBuf {
        self.dir.join("taxa.tsv")
    }

    pub fn fasta(&self) -> PathBuf {
        self.dir.join("asvs.fasta")
    }
}

/// Unions the run tables, removes chimeras and assigns taxonomy.
pub fn merge_runs<E>(
    engine: &E,
    run_tables: &[AbundanceTable],
    references: Option<&References>,
) -> Result<MergedTables, ProcessingError>
where
    E: DenoiseEngine + ?Sized,
{
    let combined = AbundanceTable::union(run_tables)?;
    info!(
        "Combined {} run tables: {} samples, {} sequences",
        run_tables.len(),
        combined.samples().len(),
        combined.sequences().len()
    );

    let table = engine.remove_chimeras(&combined);
    let taxonomy = references
        .map(|refs| engine.assign_taxonomy(&table, &refs.genus, refs.species.as_ref()));

    Ok(MergedTables { table, taxonomy })
}

/// Writes the merged table, its exports and the taxonomy, if any.
pub fn persist_merged(merged: &MergedTables, paths: &MergedPaths) -> Result<(), OutputError> {
    io::save_json(&merged.table, &paths.table())?;
    io::write_count_table(&merged.table, &paths.table_csv())?;
    io::write_asv_fasta(&merged.table, &paths.fasta())?;
    match &merged.taxonomy {
        Some(taxonomy) => {
            io::save_json(taxonomy, &paths.taxonomy())?;
            io::write_taxonomy_tsv(taxonomy, &merged.table, &paths.taxonomy_tsv())?;
        }
        None => {
            io::remove_stale(&paths.taxonomy())?;
            io::remove_stale(&paths.taxonomy_tsv())?;
        }
    }
    info!("Merged tables written to {}", paths.dir.display());
    Ok(())
}

/// Reloads the merged table and taxonomy written by [`persist_merged`].
pub fn load_merged(paths: &MergedPaths) -> Result<MergedTables, OutputError> {
    let table = io::load_table(&paths.table())?;
    let taxonomy_path = paths.taxonomy();
    let taxonomy = if taxonomy_path.exists() {
        Some(io::load_json(&taxonomy_path)?)
    } else {
        None
    };
    Ok(MergedTables { table, taxonomy })
}
