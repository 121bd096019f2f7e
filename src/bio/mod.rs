//! Bioinformatics utilities module.
//!
//! Groups sequence-level helpers, k-mer encoding, taxonomic lineages and the
//! k-mer taxonomy classifier used by the cross-run merger.

pub mod classifier;
pub mod kmers;
pub mod taxonomy;

pub use classifier::{SpeciesReference, TaxonomyReference};
pub use taxonomy::{TaxonomicLevel, TaxonomicLineage, TaxonomyTable};

/// Checks if a byte represents a valid DNA base (A, C, G, T).
/// Case-insensitive.
pub fn is_valid_base(base: u8) -> bool {
    matches!(base.to_ascii_uppercase(), b'A' | b'C' | b'G' | b'T')
}

/// Counts ambiguous bases (anything that is not A, C, G or T).
pub fn count_ambiguous(seq: &[u8]) -> usize {
    seq.iter().filter(|&&b| !is_valid_base(b)).count()
}

/// Calculates the reverse complement of a DNA sequence.
pub fn reverse_complement(dna: &[u8]) -> Vec<u8> {
    ::bio::alphabets::dna::revcomp(dna.to_ascii_uppercase())
}

/// Phred score of a Sanger-encoded quality byte.
#[inline]
pub fn phred(qual: u8) -> u8 {
    qual.saturating_sub(33)
}

/// Probability that a base call with the given Phred score is wrong.
#[inline]
pub fn phred_error_probability(q: f64) -> f64 {
    10f64.powf(-q / 10.0)
}

/// Number of mismatching positions, stopping early once `limit` is exceeded.
///
/// Returns `None` for sequences of different length or when the distance
/// is larger than `limit`.
pub fn hamming_within(a: &[u8], b: &[u8], limit: usize) -> Option<usize> {
    if a.len() != b.len() {
        return None;
    }
    let mut distance = 0;
    for (x, y) in a.iter().zip(b) {
        if x != y {
            distance += 1;
            if distance > limit {
                return None;
            }
        }
    }
    Some(distance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_is_valid_base_standard() {
        assert!(is_valid_base(b'A'));
        assert!(is_valid_base(b'c'));
        assert!(is_valid_base(b'G'));
        assert!(is_valid_base(b't'));
        assert!(!is_valid_base(b'N'));
        assert!(!is_valid_base(b'X'));
    }

    #[test]
    fn test_count_ambiguous() {
        assert_eq!(count_ambiguous(b"ACGTN"), 1);
        assert_eq!(count_ambiguous(b"NNRY"), 4);
        assert_eq!(count_ambiguous(b""), 0);
    }

    #[test]
    fn test_reverse_complement_simple() {
        assert_eq!(reverse_complement(b"ACGT"), b"ACGT");
        assert_eq!(reverse_complement(b"AAAA"), b"TTTT");
        assert_eq!(reverse_complement(b"GATTACA"), b"TGTAATC");
        assert_eq!(reverse_complement(b"aCgT"), b"ACGT");
    }

    #[test]
    fn test_phred_error_probability() {
        assert_relative_eq!(phred_error_probability(10.0), 0.1, epsilon = 1e-12);
        assert_relative_eq!(phred_error_probability(20.0), 0.01, epsilon = 1e-12);
        assert_eq!(phred(b'I'), 40);
        assert_eq!(phred(b'#'), 2);
    }

    #[test]
    fn test_hamming_within() {
        assert_eq!(hamming_within(b"ACGT", b"ACGT", 0), Some(0));
        assert_eq!(hamming_within(b"ACGT", b"ACCT", 1), Some(1));
        assert_eq!(hamming_within(b"ACGT", b"TGCA", 2), None);
        assert_eq!(hamming_within(b"ACGT", b"ACG", 5), None);
    }
}
