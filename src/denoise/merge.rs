//! Paired-end merging of denoised forward and reverse variants.

use crate::bio::reverse_complement;
use crate::config::DenoiseParams;
use crate::denoise::{ContigSet, DenoiseError, VariantCall};
use indexmap::IndexMap;
use log::debug;

/// Joins forward and reverse variant calls of one sample.
///
/// Reads are re-paired by index. Each pair whose mates were both assigned
/// to a variant is merged through the longest overlap between the forward
/// variant and the reverse-complemented reverse variant.
///
/// # Errors
///
/// Returns `DenoiseError::MergeFailure` when the two directions hold a
/// different number of reads, or when pairs were offered but none merged.
pub fn merge_pairs(
    forward: &VariantCall,
    reverse: &VariantCall,
    params: &DenoiseParams,
) -> Result<ContigSet, DenoiseError> {
    if forward.read_assignment.len() != reverse.read_assignment.len() {
        return Err(DenoiseError::MergeFailure(format!(
            "forward has {} reads but reverse has {}",
            forward.read_assignment.len(),
            reverse.read_assignment.len()
        )));
    }

    let mut pair_counts: IndexMap<(usize, usize), u64> = IndexMap::new();
    for (f, r) in forward.read_assignment.iter().zip(&reverse.read_assignment) {
        if let (Some(f), Some(r)) = (f, r) {
            *pair_counts.entry((*f, *r)).or_insert(0) += 1;
        }
    }

    let reverse_rc: Vec<Vec<u8>> = reverse
        .variants
        .iter()
        .map(|v| reverse_complement(&v.sequence))
        .collect();

    let mut result = ContigSet::default();
    for ((f, r), n) in pair_counts {
        result.pairs_offered += n;
        match overlap_merge(
            &forward.variants[f].sequence,
            &reverse_rc[r],
            params.min_overlap,
            params.max_mismatch,
        ) {
            Some(contig) => {
                let contig = String::from_utf8_lossy(&contig).into_owned();
                *result.contigs.entry(contig).or_insert(0) += n;
            }
            None => result.pairs_rejected += n,
        }
    }

    if result.pairs_offered > 0 && result.contigs.is_empty() {
        return Err(DenoiseError::MergeFailure(format!(
            "none of {} read pairs overlapped by at least {} bases",
            result.pairs_offered, params.min_overlap
        )));
    }

    result.contigs.sort_by(|a_seq, a_n, b_seq, b_n| b_n.cmp(a_n).then_with(|| a_seq.cmp(b_seq)));
    debug!(
        "Merged {} of {} read pairs into {} contigs",
        result.merged_reads(),
        result.pairs_offered,
        result.contigs.len()
    );
    Ok(result)
}

/// Merges a forward sequence with a reverse-complemented mate.
///
/// The longest overlap of at least `min_overlap` bases with no more than
/// `max_mismatch` mismatches wins. The contig is the forward sequence
/// followed by the part of the mate extending past it.
pub fn overlap_merge(
    forward: &[u8],
    mate_rc: &[u8],
    min_overlap: usize,
    max_mismatch: usize,
) -> Option<Vec<u8>> {
    let longest = forward.len().min(mate_rc.len());
    (min_overlap.max(1)..=longest).rev().find_map(|overlap| {
        let mismatches = forward[forward.len() - overlap..]
            .iter()
            .zip(&mate_rc[..overlap])
            .filter(|(a, b)| a != b)
            .count();
        (mismatches <= max_mismatch).then(|| {
            let mut contig = forward.to_vec();
            contig.extend_from_slice(&mate_rc[overlap..]);
            contig
        })
    })
}
