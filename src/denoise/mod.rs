//! Denoising interface.
//!
//! The pipeline never calls a statistical algorithm directly; it talks to a
//! [`DenoiseEngine`]. Everything the per-run and cross-run stages need from
//! the engine (dereplication, error-model learning, variant inference, pair
//! merging, chimera removal and taxonomy assignment) is expressed through
//! the trait and the plain data types below. [`NativeEngine`] is the
//! implementation shipped with the binary.

pub mod chimera;
pub mod derep;
pub mod error_model;
pub mod infer;
pub mod merge;
pub mod native;

pub use error_model::ErrorModel;
pub use native::NativeEngine;

use crate::bio::{SpeciesReference, TaxonomyReference, TaxonomyTable};
use crate::count_table::AbundanceTable;
use crate::io::fastq::FastqRecord;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DenoiseError {
    #[error("Merge failure: {0}")]
    MergeFailure(String),

    #[error("Variant inference failed: {0}")]
    Inference(String),

    #[error("Error model could not be learned: {0}")]
    ErrorModel(String),
}

impl DenoiseError {
    /// Failures confined to a single sample; the run carries on without it.
    pub fn is_sample_local(&self) -> bool {
        matches!(self, DenoiseError::MergeFailure(_) | DenoiseError::Inference(_))
    }
}

/// One distinct read sequence with its abundance.
#[derive(Debug, Clone, PartialEq)]
pub struct UniqueSequence {
    pub sequence: Vec<u8>,
    pub abundance: u64,
    /// Mean Phred score at each position across the collapsed reads.
    pub quality: Vec<f64>,
}

/// Dereplicated reads of one sample and direction.
#[derive(Debug, Clone, Default)]
pub struct DerepSet {
    /// Sorted by abundance (descending), then by sequence.
    pub uniques: Vec<UniqueSequence>,
    /// Read index → index into `uniques`.
    pub read_map: Vec<usize>,
}

impl DerepSet {
    pub fn read_count(&self) -> usize {
        self.read_map.len()
    }

    pub fn total_bases(&self) -> u64 {
        self.uniques
            .iter()
            .map(|u| u.abundance * u.sequence.len() as u64)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.read_map.is_empty()
    }
}

/// An inferred biological sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub sequence: Vec<u8>,
    /// Reads assigned to this variant.
    pub abundance: u64,
}

/// Variants inferred for one sample and direction.
#[derive(Debug, Clone, Default)]
pub struct VariantCall {
    pub variants: Vec<Variant>,
    /// Read index → variant index; `None` for reads no variant explains.
    pub read_assignment: Vec<Option<usize>>,
}

impl VariantCall {
    /// Number of reads assigned to some variant.
    pub fn assigned_reads(&self) -> u64 {
        self.variants.iter().map(|v| v.abundance).sum()
    }
}

/// Merged forward/reverse contigs of one sample.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContigSet {
    /// Contig sequence → read pairs supporting it.
    pub contigs: IndexMap<String, u64>,
    /// Read pairs where both mates were assigned to a variant.
    pub pairs_offered: u64,
    /// Offered pairs whose variants did not overlap.
    pub pairs_rejected: u64,
}

impl ContigSet {
    pub fn merged_reads(&self) -> u64 {
        self.contigs.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.contigs.is_empty()
    }
}

/// Capabilities the pipeline needs from a denoising library.
///
/// Implementations must be shareable across threads; the pipeline only
/// ever calls them with immutable inputs.
pub trait DenoiseEngine: Sync {
    /// Collapses identical reads.
    fn dereplicate(&self, reads: &[FastqRecord]) -> DerepSet;

    /// Learns a per-direction error model from a run's dereplicated reads.
    fn learn_error_model(&self, samples: &[DerepSet]) -> Result<ErrorModel, DenoiseError>;

    /// Infers true sequence variants of one sample.
    fn infer_variants(
        &self,
        derep: &DerepSet,
        model: &ErrorModel,
    ) -> Result<VariantCall, DenoiseError>;

    /// Merges forward and reverse calls of one sample into contigs.
    fn merge_pairs(
        &self,
        forward: &VariantCall,
        reverse: &VariantCall,
    ) -> Result<ContigSet, DenoiseError>;

    /// Returns the table without chimeric sequences.
    fn remove_chimeras(&self, table: &AbundanceTable) -> AbundanceTable;

    /// Assigns a lineage to every sequence of the table.
    fn assign_taxonomy(
        &self,
        table: &AbundanceTable,
        reference: &TaxonomyReference,
        species: Option<&SpeciesReference>,
    ) -> TaxonomyTable;
}
