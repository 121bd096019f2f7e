//! Bimera detection and removal.
//!
//! A sequence is a bimera when its left part is an exact match to one more
//! abundant sequence and its right part to another. Sequences are flagged
//! per sample (or on pooled abundances) and removed from the table.

use crate::config::{ChimeraMethod, ChimeraParams};
use crate::count_table::AbundanceTable;
use log::info;

fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

fn common_suffix(a: &[u8], b: &[u8]) -> usize {
    a.iter()
        .rev()
        .zip(b.iter().rev())
        .take_while(|(x, y)| x == y)
        .count()
}

/// True if `query` can be built from a prefix of one parent joined to a
/// suffix of a different parent.
///
/// Parents that already contain the whole query as a prefix or suffix are
/// ignored; they are not two-parent explanations.
pub fn is_bimera(query: &[u8], parents: &[&[u8]]) -> bool {
    let len = query.len();
    // Best and second-best (length, parent) for each side.
    let mut left: [(usize, usize); 2] = [(0, usize::MAX); 2];
    let mut right: [(usize, usize); 2] = [(0, usize::MAX); 2];

    for (idx, parent) in parents.iter().enumerate() {
        let l = common_prefix(query, parent);
        let r = common_suffix(query, parent);
        if l >= len || r >= len {
            continue;
        }
        push_best(&mut left, (l, idx));
        push_best(&mut right, (r, idx));
    }

    left.iter().any(|&(l, li)| {
        right
            .iter()
            .any(|&(r, ri)| li != usize::MAX && ri != usize::MAX && li != ri && l + r >= len)
    })
}

fn push_best(best: &mut [(usize, usize); 2], candidate: (usize, usize)) {
    if candidate.0 > best[0].0 || best[0].1 == usize::MAX {
        best[1] = best[0];
        best[0] = candidate;
    } else if candidate.0 > best[1].0 || best[1].1 == usize::MAX {
        best[1] = candidate;
    }
}

/// Flags chimeric sequence columns of a table.
pub fn flag_chimeras(table: &AbundanceTable, params: &ChimeraParams) -> Vec<bool> {
    match params.method {
        ChimeraMethod::Consensus => flag_consensus(table, params),
        ChimeraMethod::Pooled => flag_pooled(table, params),
    }
}

fn parents_of<'a>(
    query: usize,
    abundances: &[u64],
    sequences: &'a [&'a [u8]],
    params: &ChimeraParams,
) -> Vec<&'a [u8]> {
    let min_parent = (params.min_fold_parent_over_abundance * abundances[query] as f64)
        .max(params.min_parent_abundance as f64);
    abundances
        .iter()
        .enumerate()
        .filter(|&(idx, &n)| idx != query && n > 0 && n as f64 >= min_parent)
        .map(|(idx, _)| sequences[idx])
        .collect()
}

fn flag_consensus(table: &AbundanceTable, params: &ChimeraParams) -> Vec<bool> {
    let sequences: Vec<&[u8]> = table.sequences().iter().map(|s| s.as_bytes()).collect();
    let mut flagged = vec![0usize; sequences.len()];
    let mut present = vec![0usize; sequences.len()];

    for row in table.counts().rows() {
        let abundances = row.to_vec();
        for (query, &n) in abundances.iter().enumerate() {
            if n == 0 {
                continue;
            }
            present[query] += 1;
            let parents = parents_of(query, &abundances, &sequences, params);
            if parents.len() >= 2 && is_bimera(sequences[query], &parents) {
                flagged[query] += 1;
            }
        }
    }

    flagged
        .iter()
        .zip(&present)
        .map(|(&nflag, &nsam)| {
            let ignored = params.ignore_n_negatives.min(nsam - nflag);
            nflag > 0 && nflag as f64 >= (nsam - ignored) as f64 * params.min_sample_fraction
        })
        .collect()
}

fn flag_pooled(table: &AbundanceTable, params: &ChimeraParams) -> Vec<bool> {
    let sequences: Vec<&[u8]> = table.sequences().iter().map(|s| s.as_bytes()).collect();
    let totals = table.sequence_totals();
    (0..sequences.len())
        .map(|query| {
            let parents = parents_of(query, &totals, &sequences, params);
            parents.len() >= 2 && is_bimera(sequences[query], &parents)
        })
        .collect()
}

/// Returns the table without chimeric sequences.
pub fn remove_chimeras(table: &AbundanceTable, params: &ChimeraParams) -> AbundanceTable {
    let flags = flag_chimeras(table, params);
    let removed = flags.iter().filter(|&&f| f).count();
    let cleaned = table.filter_sequences(|idx, _| !flags[idx]);

    let total = table.total();
    let kept = cleaned.total();
    info!(
        "Identified {} bimeras out of {} input sequences ({:.2}% of reads kept)",
        removed,
        table.sequences().len(),
        if total > 0 {
            100.0 * kept as f64 / total as f64
        } else {
            100.0
        }
    );
    cleaned
}
