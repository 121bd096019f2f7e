//! Per-quality substitution error model.
//!
//! A unique sequence that differs at a single position from a strictly more
//! abundant unique is counted as an error at that position's quality score.
//! Rates are the ratio of such errors to all bases observed at that score.
//! Scores with too few observations fall back to the nominal Phred rate.

use crate::bio::phred_error_probability;
use crate::denoise::{DenoiseError, DerepSet};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Highest Phred score tracked; higher scores share its rate.
pub const MAX_QUAL: usize = 41;

/// Bases needed at a quality score before its learned rate is trusted.
pub const MIN_OBSERVATIONS: u64 = 1000;

const MIN_RATE: f64 = 1e-7;
const MAX_RATE: f64 = 0.25;

const BASES: [u8; 4] = [b'A', b'C', b'G', b'T'];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorModel {
    /// Substitution probability indexed by Phred score.
    rates: Vec<f64>,
    /// Bases observed at each score while learning.
    observations: Vec<u64>,
}

impl ErrorModel {
    /// Model that uses the nominal Phred error probability at every score.
    pub fn phred() -> Self {
        let rates = (0..=MAX_QUAL)
            .map(|q| phred_error_probability(q as f64).clamp(MIN_RATE, MAX_RATE))
            .collect();
        ErrorModel {
            rates,
            observations: vec![0; MAX_QUAL + 1],
        }
    }

    /// Learns substitution rates from dereplicated samples.
    ///
    /// # Arguments
    ///
    /// * `samples` - Dereplicated reads of one direction.
    /// * `min_observations` - Bases needed at a score to replace its nominal rate.
    pub fn learn(samples: &[DerepSet], min_observations: u64) -> Result<Self, DenoiseError> {
        let mut errors = vec![0u64; MAX_QUAL + 1];
        let mut totals = vec![0u64; MAX_QUAL + 1];

        for derep in samples {
            let abundance: HashMap<&[u8], u64> = derep
                .uniques
                .iter()
                .map(|u| (u.sequence.as_slice(), u.abundance))
                .collect();

            for unique in &derep.uniques {
                let mut probe = unique.sequence.clone();
                for (pos, &mean_q) in unique.quality.iter().enumerate() {
                    let q = quality_index(mean_q);
                    totals[q] += unique.abundance;

                    let original = probe[pos];
                    let explained = BASES.iter().filter(|&&b| b != original).any(|&b| {
                        probe[pos] = b;
                        abundance
                            .get(probe.as_slice())
                            .is_some_and(|&a| a > unique.abundance)
                    });
                    probe[pos] = original;

                    if explained {
                        errors[q] += unique.abundance;
                    }
                }
            }
        }

        let observed: u64 = totals.iter().sum();
        if observed == 0 {
            return Err(DenoiseError::ErrorModel(
                "no bases available to learn from".to_string(),
            ));
        }

        let mut model = ErrorModel::phred();
        let mut learned = 0;
        for q in 0..=MAX_QUAL {
            if totals[q] >= min_observations {
                model.rates[q] = (errors[q] as f64 / totals[q] as f64).clamp(MIN_RATE, MAX_RATE);
                learned += 1;
            }
        }
        model.observations = totals;

        info!(
            "Learned error rates for {} of {} quality scores from {} bases",
            learned,
            MAX_QUAL + 1,
            observed
        );
        debug!("Error rates by quality: {:?}", model.rates);
        Ok(model)
    }

    /// Substitution probability for a (possibly averaged) quality score.
    pub fn substitution_rate(&self, quality: f64) -> f64 {
        self.rates[quality_index(quality)]
    }

    pub fn rates(&self) -> &[f64] {
        &self.rates
    }

    /// Total bases seen while learning.
    pub fn observed_bases(&self) -> u64 {
        self.observations.iter().sum()
    }
}

fn quality_index(quality: f64) -> usize {
    if quality.is_finite() {
        (quality.round().max(0.0) as usize).min(MAX_QUAL)
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use crate::denoise::derep::dereplicate;
    use crate::io::fastq::FastqRecord;

    fn reads(seq: &[u8], q: u8, n: usize) -> Vec<FastqRecord> {
        (0..n)
            .map(|i| FastqRecord::new(format!("r{}", i), seq, &vec![33 + q; seq.len()]))
            .collect()
    }

    #[test]
    fn phred_model_matches_nominal_rates() {
        let model = ErrorModel::phred();
        assert_relative_eq!(model.substitution_rate(20.0), 0.01, epsilon = 1e-12);
        assert_relative_eq!(model.substitution_rate(0.0), MAX_RATE, epsilon = 1e-12);
        assert_eq!(model.substitution_rate(60.0), model.substitution_rate(41.0));
    }

    #[test]
    fn learns_rate_from_one_off_neighbours() {
        // 99 correct reads and one read with a substitution, all at Q30.
        let mut records = reads(b"ACGTACGTAC", 30, 99);
        records.extend(reads(b"ACGTTCGTAC", 30, 1));
        let derep = dereplicate(&records);

        let model = ErrorModel::learn(&[derep], 10).unwrap();
        // One substituted base out of 1000 observed at Q30.
        assert_relative_eq!(model.substitution_rate(30.0), 0.001, epsilon = 1e-12);
        assert_eq!(model.observed_bases(), 1000);
        // Unobserved scores keep the nominal rate.
        assert_relative_eq!(model.substitution_rate(20.0), 0.01, epsilon = 1e-12);
        assert_relative_eq!(model.substitution_rate(10.0), 0.1, epsilon = 1e-12);
    }

    #[test]
    fn sparse_scores_fall_back_to_phred() {
        let derep = dereplicate(&reads(b"ACGT", 30, 5));
        let model = ErrorModel::learn(&[derep], MIN_OBSERVATIONS).unwrap();
        assert_eq!(model.rates(), ErrorModel::phred().rates());
    }

    #[test]
    fn empty_input_is_an_error() {
        assert!(ErrorModel::learn(&[], 10).is_err());
    }
}
