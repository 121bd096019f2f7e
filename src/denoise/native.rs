//! The in-process denoising engine.

use crate::bio::{SpeciesReference, TaxonomicLevel, TaxonomyReference, TaxonomyTable};
use crate::config::{ChimeraParams, DenoiseParams, TaxonomyParams};
use crate::count_table::AbundanceTable;
use crate::denoise::error_model::MIN_OBSERVATIONS;
use crate::denoise::{
    chimera, derep, infer, merge, ContigSet, DenoiseEngine, DenoiseError, DerepSet, ErrorModel,
    VariantCall,
};
use crate::io::fastq::FastqRecord;
use log::info;

/// Denoising engine implemented in this crate.
#[derive(Debug, Clone, Default)]
pub struct NativeEngine {
    pub denoise: DenoiseParams,
    pub chimera: ChimeraParams,
    pub taxonomy: TaxonomyParams,
}

impl NativeEngine {
    pub fn new(denoise: DenoiseParams, chimera: ChimeraParams, taxonomy: TaxonomyParams) -> Self {
        NativeEngine {
            denoise,
            chimera,
            taxonomy,
        }
    }
}

impl DenoiseEngine for NativeEngine {
    fn dereplicate(&self, reads: &[FastqRecord]) -> DerepSet {
        derep::dereplicate(reads)
    }

    fn learn_error_model(&self, samples: &[DerepSet]) -> Result<ErrorModel, DenoiseError> {
        ErrorModel::learn(samples, MIN_OBSERVATIONS)
    }

    fn infer_variants(
        &self,
        derep: &DerepSet,
        model: &ErrorModel,
    ) -> Result<VariantCall, DenoiseError> {
        infer::infer_variants(derep, model, &self.denoise)
    }

    fn merge_pairs(
        &self,
        forward: &VariantCall,
        reverse: &VariantCall,
    ) -> Result<ContigSet, DenoiseError> {
        merge::merge_pairs(forward, reverse, &self.denoise)
    }

    fn remove_chimeras(&self, table: &AbundanceTable) -> AbundanceTable {
        chimera::remove_chimeras(table, &self.chimera)
    }

    fn assign_taxonomy(
        &self,
        table: &AbundanceTable,
        reference: &TaxonomyReference,
        species: Option<&SpeciesReference>,
    ) -> TaxonomyTable {
        let sequences: Vec<&str> = table.sequences().iter().map(String::as_str).collect();
        let lineages = reference.assign_all(
            &sequences,
            self.taxonomy.bootstraps,
            self.taxonomy.min_boot,
            self.taxonomy.seed,
        );

        let mut result = TaxonomyTable::default();
        for (sequence, mut lineage) in sequences.into_iter().zip(lineages) {
            let species_name = match (species, lineage.get_level(TaxonomicLevel::Genus)) {
                (Some(species_ref), Some(genus)) => species_ref.assign(sequence.as_bytes(), genus),
                _ => None,
            };
            if let Some(name) = species_name {
                lineage.set_level(TaxonomicLevel::Species, name);
            }
            result.assignments.insert(sequence.to_string(), lineage);
        }

        info!(
            "Assigned {} of {} sequences to genus, {} to species",
            result.assigned_at(TaxonomicLevel::Genus),
            result.len(),
            result.assigned_at(TaxonomicLevel::Species)
        );
        result
    }
}
