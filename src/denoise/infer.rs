//! Sample inference: partitioning unique sequences into true variants.
//!
//! Uniques are visited from most to least abundant. Each is compared with
//! the variants accepted so far; the variant expected to produce it most
//! often by substitution error is its candidate parent. When the observed
//! abundance is far too high to be explained by errors from that parent
//! (Poisson abundance p-value below `omega_a`) the unique becomes a new
//! variant, otherwise its reads are absorbed by the parent.

use crate::config::DenoiseParams;
use crate::bio::hamming_within;
use crate::denoise::{DenoiseError, DerepSet, ErrorModel, UniqueSequence, Variant, VariantCall};
use log::debug;
use statrs::distribution::{DiscreteCDF, Poisson};

struct Cluster {
    /// Index of the unique that founded the cluster.
    center: usize,
    abundance: u64,
}

/// Infers the variants of one dereplicated sample.
pub fn infer_variants(
    derep: &DerepSet,
    model: &ErrorModel,
    params: &DenoiseParams,
) -> Result<VariantCall, DenoiseError> {
    let mut clusters: Vec<Cluster> = Vec::new();
    let mut unique_assignment: Vec<Option<usize>> = vec![None; derep.uniques.len()];

    for (ui, unique) in derep.uniques.iter().enumerate() {
        let parent = clusters
            .iter()
            .enumerate()
            .filter_map(|(ci, cluster)| {
                let center = &derep.uniques[cluster.center];
                hamming_within(&center.sequence, &unique.sequence, params.max_distance)?;
                Some((ci, expected_errors(cluster.abundance, center, unique, model)))
            })
            .max_by(|a, b| a.1.total_cmp(&b.1));

        let assignment = match parent {
            Some((ci, lambda)) => {
                let p = abundance_p_value(unique.abundance, lambda)?;
                if p < params.omega_a {
                    None
                } else {
                    Some(ci)
                }
            }
            None if unique.abundance >= params.min_abundance => None,
            None => {
                // Rare and unlike anything accepted so far.
                continue;
            }
        };

        let ci = match assignment {
            Some(ci) => {
                clusters[ci].abundance += unique.abundance;
                ci
            }
            None => {
                clusters.push(Cluster {
                    center: ui,
                    abundance: unique.abundance,
                });
                clusters.len() - 1
            }
        };
        unique_assignment[ui] = Some(ci);
    }

    let variants: Vec<Variant> = clusters
        .iter()
        .map(|c| Variant {
            sequence: derep.uniques[c.center].sequence.clone(),
            abundance: c.abundance,
        })
        .collect();
    let read_assignment = derep
        .read_map
        .iter()
        .map(|&ui| unique_assignment[ui])
        .collect();

    debug!(
        "Inferred {} variants from {} uniques",
        variants.len(),
        derep.uniques.len()
    );
    Ok(VariantCall {
        variants,
        read_assignment,
    })
}

/// Expected number of reads of `child` produced by errors from a parent
/// cluster of the given abundance.
fn expected_errors(
    parent_abundance: u64,
    parent: &UniqueSequence,
    child: &UniqueSequence,
    model: &ErrorModel,
) -> f64 {
    let mut log_lambda = (parent_abundance as f64).ln();
    for ((&p, &c), &q) in parent.sequence.iter().zip(&child.sequence).zip(&child.quality) {
        let rate = model.substitution_rate(q);
        log_lambda += if p == c {
            (1.0 - rate).ln()
        } else {
            (rate / 3.0).ln()
        };
    }
    log_lambda.exp()
}

/// Probability of seeing at least `abundance` copies, given at least one,
/// when `lambda` are expected.
fn abundance_p_value(abundance: u64, lambda: f64) -> Result<f64, DenoiseError> {
    if abundance <= 1 {
        return Ok(1.0);
    }
    if !(lambda > 0.0) || !lambda.is_finite() {
        return Ok(0.0);
    }
    let poisson = Poisson::new(lambda).map_err(|e| DenoiseError::Inference(e.to_string()))?;
    let at_least_one = -(-lambda).exp_m1();
    if at_least_one <= 0.0 {
        return Ok(0.0);
    }
    Ok(poisson.sf(abundance - 1) / at_least_one)
}
