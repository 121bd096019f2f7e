//! K-mer encoding utilities.
//!
//! K-mers are packed two bits per base into a `u32`, which limits `k` to 16.
//! K-mers spanning an ambiguous base are skipped. Both the taxonomy
//! classifier and the control-sequence read filter are built on these.

use crate::bio;
use std::collections::HashSet;

/// Largest k that fits the packed representation.
pub const MAX_K: usize = 16;

#[inline]
fn encode_base(base: u8) -> Option<u32> {
    match base.to_ascii_uppercase() {
        b'A' => Some(0),
        b'C' => Some(1),
        b'G' => Some(2),
        b'T' => Some(3),
        _ => None,
    }
}

/// An iterator over packed k-mers of a sequence, in order of position.
pub struct KmerIter<'a> {
    sequence: &'a [u8],
    k: usize,
    pos: usize,
    current: u32,
    valid: usize,
    mask: u32,
}

impl<'a> KmerIter<'a> {
    pub fn new(sequence: &'a [u8], k: usize) -> Self {
        assert!(k > 0 && k <= MAX_K, "k must be within 1..=16");
        let mask = if k == MAX_K {
            u32::MAX
        } else {
            (1u32 << (2 * k)) - 1
        };
        KmerIter {
            sequence,
            k,
            pos: 0,
            current: 0,
            valid: 0,
            mask,
        }
    }
}

impl Iterator for KmerIter<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<Self::Item> {
        while self.pos < self.sequence.len() {
            let base = self.sequence[self.pos];
            self.pos += 1;
            match encode_base(base) {
                Some(code) => {
                    self.current = ((self.current << 2) | code) & self.mask;
                    self.valid += 1;
                    if self.valid >= self.k {
                        return Some(self.current);
                    }
                }
                None => {
                    self.valid = 0;
                    self.current = 0;
                }
            }
        }
        None
    }
}

/// Distinct k-mers of a sequence, sorted.
pub fn distinct_kmers(sequence: &[u8], k: usize) -> Vec<u32> {
    let mut kmers: Vec<u32> = KmerIter::new(sequence, k).collect();
    kmers.sort_unstable();
    kmers.dedup();
    kmers
}

/// A set of k-mers drawn from both strands of a reference collection,
/// used to recognise reads from control spike-ins.
#[derive(Debug, Clone, Default)]
pub struct KmerScreen {
    k: usize,
    kmers: HashSet<u32>,
}

impl KmerScreen {
    pub fn new<'a>(sequences: impl IntoIterator<Item = &'a [u8]>, k: usize) -> Self {
        let mut kmers = HashSet::new();
        for seq in sequences {
            kmers.extend(KmerIter::new(seq, k));
            kmers.extend(KmerIter::new(&bio::reverse_complement(seq), k));
        }
        KmerScreen { k, kmers }
    }

    pub fn is_empty(&self) -> bool {
        self.kmers.is_empty()
    }

    /// Number of positions in `read` whose k-mer occurs in the screen.
    pub fn hits(&self, read: &[u8]) -> usize {
        KmerIter::new(read, self.k)
            .filter(|kmer| self.kmers.contains(kmer))
            .count()
    }

    /// True when at least `min_hits` k-mers of the read are in the screen.
    pub fn matches(&self, read: &[u8], min_hits: usize) -> bool {
        !self.kmers.is_empty() && self.hits(read) >= min_hits
    }
}
