//! Dereplication: unique sequence collapsing with abundance tracking.
//!
//! Each unique sequence is kept once with the number of reads carrying it
//! and the mean quality at each position. The read → unique mapping is
//! retained so forward and reverse mates can be re-paired after denoising.

use crate::bio::phred;
use crate::denoise::{DerepSet, UniqueSequence};
use crate::io::fastq::FastqRecord;
use std::collections::HashMap;

/// Dereplicate a collection of FASTQ records.
///
/// Sequences are compared case-insensitively. The output is sorted by
/// abundance (descending), then by sequence, so the most abundant unique
/// always comes first.
pub fn dereplicate(records: &[FastqRecord]) -> DerepSet {
    let mut index: HashMap<Vec<u8>, usize> = HashMap::new();
    let mut uniques: Vec<UniqueSequence> = Vec::new();
    let mut first_map = Vec::with_capacity(records.len());

    for record in records {
        let key = record.sequence.to_ascii_uppercase();
        let idx = *index.entry(key).or_insert_with_key(|key| {
            uniques.push(UniqueSequence {
                sequence: key.clone(),
                abundance: 0,
                quality: vec![0.0; key.len()],
            });
            uniques.len() - 1
        });
        let unique = &mut uniques[idx];
        unique.abundance += 1;
        for (sum, &q) in unique.quality.iter_mut().zip(&record.quality) {
            *sum += f64::from(phred(q));
        }
        first_map.push(idx);
    }

    for unique in &mut uniques {
        let n = unique.abundance as f64;
        unique.quality.iter_mut().for_each(|q| *q /= n);
    }

    let mut order: Vec<usize> = (0..uniques.len()).collect();
    order.sort_by(|&a, &b| {
        uniques[b]
            .abundance
            .cmp(&uniques[a].abundance)
            .then_with(|| uniques[a].sequence.cmp(&uniques[b].sequence))
    });
    let mut rank = vec![0; uniques.len()];
    for (new, &old) in order.iter().enumerate() {
        rank[old] = new;
    }

    let mut slots: Vec<Option<UniqueSequence>> = uniques.into_iter().map(Some).collect();
    let uniques = order
        .iter()
        .filter_map(|&old| slots[old].take())
        .collect();
    let read_map = first_map.into_iter().map(|old| rank[old]).collect();

    DerepSet { uniques, read_map }
}
