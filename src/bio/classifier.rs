//! Naive Bayesian k-mer taxonomy classifier and exact species matching.
//!
//! The classifier follows the RDP approach: every reference genus gets a
//! k-mer word profile, a query is assigned to the genus maximising the
//! summed log word probabilities, and bootstrap replicates over random
//! eighths of the query's k-mers give per-rank confidence. Species are then
//! resolved separately by exact containment in a species-level reference.

use crate::bio::kmers::{distinct_kmers, MAX_K};
use crate::bio::taxonomy::{parse_lineage, TaxonomicLevel, TaxonomicLineage};
use crate::io::fastq::{read_fasta, FastqError};
use ::bio::pattern_matching::horspool::Horspool;
use indexmap::IndexMap;
use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TaxonomyError {
    #[error("Reference error: {0}")]
    Fastq(#[from] FastqError),

    #[error("No usable reference sequences in {0}")]
    EmptyReference(PathBuf),

    #[error("Invalid k-mer size {0}")]
    InvalidKmerSize(usize),
}

/// Result of classifying one query.
#[derive(Debug, Clone)]
pub struct GenusCall {
    /// Index of the best-scoring genus in the reference.
    pub genus: usize,
    /// Bootstrap support per rank, in percent, kingdom first.
    pub support: Vec<u32>,
}

/// Genus-level k-mer profiles built from a training FASTA.
#[derive(Debug)]
pub struct TaxonomyReference {
    k: usize,
    genera: Vec<TaxonomicLineage>,
    /// ln(M_g + 1) for each genus, M_g = references in the genus.
    log_sizes: Vec<f64>,
    /// k-mer → (genus, ln(m + P(w)) - ln P(w)) for genera containing it.
    index: HashMap<u32, Vec<(u32, f32)>>,
}

impl TaxonomyReference {
    /// Loads a training FASTA whose headers are `Kingdom;Phylum;...;Genus;`.
    pub fn from_fasta(path: impl AsRef<Path>, k: usize) -> Result<Self, TaxonomyError> {
        let path = path.as_ref();
        let entries = read_fasta(path)?;
        let reference = Self::build(
            entries
                .iter()
                .map(|(header, seq)| (header.as_str(), seq.as_slice())),
            k,
        )?;
        if reference.genera.is_empty() {
            return Err(TaxonomyError::EmptyReference(path.to_path_buf()));
        }
        info!(
            "Loaded taxonomy reference {} ({} genera)",
            path.display(),
            reference.genus_count()
        );
        Ok(reference)
    }

    /// Builds k-mer profiles from (lineage header, sequence) pairs.
    pub fn build<'a>(
        entries: impl IntoIterator<Item = (&'a str, &'a [u8])>,
        k: usize,
    ) -> Result<Self, TaxonomyError> {
        if k == 0 || k > MAX_K {
            return Err(TaxonomyError::InvalidKmerSize(k));
        }

        let mut genus_keys: IndexMap<String, TaxonomicLineage> = IndexMap::new();
        let mut genus_sizes: Vec<u32> = Vec::new();
        // k-mer → (genus → number of references in the genus containing it)
        let mut word_genus: HashMap<u32, HashMap<u32, u32>> = HashMap::new();
        let mut word_refs: HashMap<u32, u32> = HashMap::new();
        let mut n_refs = 0u32;

        for (header, sequence) in entries {
            let mut lineage = parse_lineage(header);
            lineage.truncate_from(TaxonomicLevel::Species);
            if lineage.is_empty() {
                warn!("Skipping reference with empty lineage: {}", header);
                continue;
            }
            let key = lineage.to_lineage_string();
            let (genus, _) = genus_keys.insert_full(key, lineage);
            let genus = genus as u32;
            if genus as usize == genus_sizes.len() {
                genus_sizes.push(0);
            }
            genus_sizes[genus as usize] += 1;
            n_refs += 1;

            for kmer in distinct_kmers(sequence, k) {
                *word_refs.entry(kmer).or_insert(0) += 1;
                *word_genus.entry(kmer).or_default().entry(genus).or_insert(0) += 1;
            }
        }

        let n = f64::from(n_refs);
        let index = word_genus
            .into_iter()
            .map(|(kmer, per_genus)| {
                let prior = (f64::from(word_refs[&kmer]) + 0.5) / (n + 1.0);
                let mut entries: Vec<(u32, f32)> = per_genus
                    .into_iter()
                    .map(|(genus, m)| {
                        let delta = (f64::from(m) + prior).ln() - prior.ln();
                        (genus, delta as f32)
                    })
                    .collect();
                entries.sort_unstable_by_key(|&(genus, _)| genus);
                (kmer, entries)
            })
            .collect();

        Ok(TaxonomyReference {
            k,
            genera: genus_keys.into_values().collect(),
            log_sizes: genus_sizes
                .iter()
                .map(|&size| (f64::from(size) + 1.0).ln())
                .collect(),
            index,
        })
    }

    pub fn genus_count(&self) -> usize {
        self.genera.len()
    }

    pub fn genus_lineage(&self, genus: usize) -> &TaxonomicLineage {
        &self.genera[genus]
    }

    /// Best genus for a multiset of query k-mers. Ties go to the genus
    /// listed first in the reference.
    fn best_genus(&self, kmers: &[u32]) -> usize {
        let n = kmers.len() as f64;
        let mut scores: Vec<f64> = self.log_sizes.iter().map(|&ls| -n * ls).collect();
        for kmer in kmers {
            if let Some(entries) = self.index.get(kmer) {
                for &(genus, delta) in entries {
                    scores[genus as usize] += f64::from(delta);
                }
            }
        }
        let mut best = 0;
        for (genus, &score) in scores.iter().enumerate() {
            if score > scores[best] {
                best = genus;
            }
        }
        best
    }

    /// Classifies one sequence with `bootstraps` replicates.
    ///
    /// Returns `None` when the sequence has no valid k-mer.
    pub fn classify(&self, sequence: &[u8], bootstraps: usize, rng: &mut StdRng) -> Option<GenusCall> {
        let kmers = distinct_kmers(sequence, self.k);
        if kmers.is_empty() || self.genera.is_empty() {
            return None;
        }
        let best = self.best_genus(&kmers);
        let best_lineage = &self.genera[best];
        let levels = TaxonomicLevel::all_levels();
        let mut agree = vec![0u32; levels.len()];

        let subsample = (kmers.len() / 8).max(1);
        let mut draw = Vec::with_capacity(subsample);
        for _ in 0..bootstraps {
            draw.clear();
            draw.extend((0..subsample).map(|_| kmers[rng.random_range(0..kmers.len())]));
            let lineage = &self.genera[self.best_genus(&draw)];
            for (i, level) in levels.iter().enumerate() {
                match (best_lineage.get_level(*level), lineage.get_level(*level)) {
                    (Some(a), Some(b)) if a == b => agree[i] += 1,
                    // Ranks below the first disagreement cannot agree either.
                    _ => break,
                }
            }
        }

        let support = agree
            .iter()
            .map(|&count| {
                if bootstraps == 0 {
                    100
                } else {
                    (count as usize * 100 / bootstraps) as u32
                }
            })
            .collect();
        Some(GenusCall {
            genus: best,
            support,
        })
    }

    /// Assigns lineages to many sequences in parallel.
    ///
    /// Ranks whose bootstrap support falls below `min_boot` are dropped,
    /// together with every rank beneath them. Each sequence uses its own
    /// RNG derived from `seed` and its position, so results do not depend
    /// on thread scheduling.
    pub fn assign_all(
        &self,
        sequences: &[&str],
        bootstraps: usize,
        min_boot: u32,
        seed: u64,
    ) -> Vec<TaxonomicLineage> {
        sequences
            .par_iter()
            .enumerate()
            .map(|(i, sequence)| {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(i as u64));
                let Some(call) = self.classify(sequence.as_bytes(), bootstraps, &mut rng) else {
                    return TaxonomicLineage::new();
                };
                let mut lineage = self.genera[call.genus].clone();
                let levels = TaxonomicLevel::all_levels();
                if let Some(pos) = call.support.iter().position(|&s| s < min_boot) {
                    lineage.truncate_from(levels[pos]);
                }
                lineage
            })
            .collect()
    }
}

/// Species-level reference for exact-match species assignment.
#[derive(Debug, Default)]
pub struct SpeciesReference {
    entries: Vec<SpeciesEntry>,
}

#[derive(Debug)]
struct SpeciesEntry {
    sequence: Vec<u8>,
    genus: String,
    species: String,
}

impl SpeciesReference {
    /// Loads a FASTA whose headers are `<id> <Genus> <species>`.
    pub fn from_fasta(path: impl AsRef<Path>) -> Result<Self, TaxonomyError> {
        let path = path.as_ref();
        let entries = read_fasta(path)?;
        let reference = Self::build(
            entries
                .iter()
                .map(|(header, seq)| (header.as_str(), seq.as_slice())),
        );
        if reference.entries.is_empty() {
            return Err(TaxonomyError::EmptyReference(path.to_path_buf()));
        }
        info!(
            "Loaded species reference {} ({} sequences)",
            path.display(),
            reference.entries.len()
        );
        Ok(reference)
    }

    pub fn build<'a>(entries: impl IntoIterator<Item = (&'a str, &'a [u8])>) -> Self {
        let entries = entries
            .into_iter()
            .filter_map(|(header, sequence)| {
                let mut fields = header.split_whitespace().skip(1);
                match (fields.next(), fields.next()) {
                    (Some(genus), Some(species)) => Some(SpeciesEntry {
                        sequence: sequence.to_ascii_uppercase(),
                        genus: genus.to_string(),
                        species: species.to_string(),
                    }),
                    _ => {
                        warn!("Skipping species reference with malformed header: {}", header);
                        None
                    }
                }
            })
            .collect();
        SpeciesReference { entries }
    }

    /// Species epithet for `sequence`, if it is contained in references of
    /// exactly one species whose genus agrees with `genus`.
    ///
    /// Compound genus names such as `Escherichia/Shigella` agree with any
    /// of their parts.
    pub fn assign(&self, sequence: &[u8], genus: &str) -> Option<String> {
        if sequence.is_empty() {
            return None;
        }
        let query = sequence.to_ascii_uppercase();
        let searcher = Horspool::new(&query);
        let genus_matches = |candidate: &str| genus == candidate || genus.split('/').any(|g| g == candidate);

        let mut hit: Option<&str> = None;
        for entry in &self.entries {
            if entry.sequence.len() < query.len() || !genus_matches(&entry.genus) {
                continue;
            }
            if searcher.find_all(&entry.sequence).next().is_some() {
                match hit {
                    Some(species) if species != entry.species => return None,
                    _ => hit = Some(&entry.species),
                }
            }
        }
        hit.map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREP: &[u8] = b"GATGAACGCTGGCGGCGTGCCTAATACATGCAAGTAGAACGCTGAAGAGAGGAGCTTGCTCTTCTTGGATGAGTTGCGAACGGGTGAGTAACGCGTAGGTAACCTGCC";
    const ECOLI: &[u8] = b"ATTGAACGCTGGCGGCAGGCCTAACACATGCAAGTCGAACGGTAACAGGAAGAAGCTTGCTTCTTTGCTGACGAGTGGCGGACGGGTGAGTAATGTCTGGGAAACTGCC";

    fn reference() -> TaxonomyReference {
        TaxonomyReference::build(
            [
                (
                    "Bacteria;Firmicutes;Bacilli;Lactobacillales;Streptococcaceae;Streptococcus;",
                    STREP,
                ),
                (
                    "Bacteria;Proteobacteria;Gammaproteobacteria;Enterobacterales;Enterobacteriaceae;Escherichia/Shigella;",
                    ECOLI,
                ),
            ],
            8,
        )
        .unwrap()
    }

    #[test]
    fn test_build_rejects_bad_k() {
        assert!(TaxonomyReference::build([("Bacteria;", STREP)], 0).is_err());
        assert!(TaxonomyReference::build([("Bacteria;", STREP)], 17).is_err());
    }

    #[test]
    fn test_classify_exact_reference_fragment() {
        let reference = reference();
        assert_eq!(reference.genus_count(), 2);
        let mut rng = StdRng::seed_from_u64(1);
        let call = reference.classify(&ECOLI[5..100], 100, &mut rng).unwrap();
        assert_eq!(
            reference.genus_lineage(call.genus).get_level(TaxonomicLevel::Genus),
            Some("Escherichia/Shigella")
        );
        assert_eq!(call.support[0], 100);
    }

    #[test]
    fn test_assign_all_is_deterministic() {
        let reference = reference();
        let strep = String::from_utf8(STREP[10..90].to_vec()).unwrap();
        let queries = vec![strep.as_str(), "NNNNNNNN"];
        let first = reference.assign_all(&queries, 100, 50, 7);
        let second = reference.assign_all(&queries, 100, 50, 7);
        assert_eq!(first, second);
        assert_eq!(first[0].get_level(TaxonomicLevel::Genus), Some("Streptococcus"));
        assert!(first[1].is_empty());
    }

    #[test]
    fn test_species_requires_unique_agreeing_hit() {
        let species = SpeciesReference::build([
            ("r1 Escherichia coli", ECOLI),
            ("r2 Streptococcus mitis", STREP),
            ("r3 Streptococcus oralis", STREP),
            ("malformed", STREP),
        ]);
        assert_eq!(
            species.assign(&ECOLI[10..80], "Escherichia/Shigella"),
            Some("coli".to_string())
        );
        // Genus disagrees.
        assert_eq!(species.assign(&ECOLI[10..80], "Streptococcus"), None);
        // Two species share the sequence.
        assert_eq!(species.assign(&STREP[10..80], "Streptococcus"), None);
    }
}
