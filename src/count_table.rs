//! Sample × sequence abundance tables.
//!
//! Rows are samples, columns are exact sequence variants. Columns are kept
//! ordered by total abundance (descending, ties broken by sequence), so the
//! same data always produces the same table regardless of input order.

use indexmap::{IndexMap, IndexSet};
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TableError {
    #[error("Sample {0} appears more than once")]
    DuplicateSample(String),

    #[error(
        "Count matrix is {rows}x{cols} but the table names {samples} samples and {sequences} sequences"
    )]
    Shape {
        rows: usize,
        cols: usize,
        samples: usize,
        sequences: usize,
    },
}

/// A count table of samples by sequence variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbundanceTable {
    samples: IndexSet<String>,
    sequences: IndexSet<String>,
    /// Counts, samples × sequences.
    counts: Array2<u64>,
}

impl AbundanceTable {
    /// Creates a new, empty table.
    pub fn new() -> Self {
        AbundanceTable {
            samples: IndexSet::new(),
            sequences: IndexSet::new(),
            counts: Array2::zeros((0, 0)),
        }
    }

    /// Builds a table from per-sample sequence counts.
    ///
    /// Samples keep the order they are given in. A sample with no counts
    /// still gets an all-zero row.
    ///
    /// # Errors
    ///
    /// Returns `TableError::DuplicateSample` if a sample name repeats.
    pub fn from_samples<'a, I>(rows: I) -> Result<Self, TableError>
    where
        I: IntoIterator<Item = (String, &'a IndexMap<String, u64>)>,
    {
        let mut samples = IndexSet::new();
        let mut entries = Vec::new();
        let mut totals: IndexMap<&str, u64> = IndexMap::new();

        for (sample, counts) in rows {
            if !samples.insert(sample.clone()) {
                return Err(TableError::DuplicateSample(sample));
            }
            for (sequence, &n) in counts {
                if n > 0 {
                    *totals.entry(sequence.as_str()).or_insert(0) += n;
                }
            }
            entries.push(counts);
        }

        let sequences = ordered_sequences(totals);
        let mut matrix: Array2<u64> = Array2::zeros((samples.len(), sequences.len()));
        for (row, counts) in entries.into_iter().enumerate() {
            for (sequence, &n) in counts {
                if let Some(col) = sequences.get_index_of(sequence.as_str()) {
                    matrix[[row, col]] += n;
                }
            }
        }

        Ok(AbundanceTable {
            samples,
            sequences,
            counts: matrix,
        })
    }

    /// Combines tables over disjoint sample sets.
    ///
    /// Sequences are unioned; a sample gets zero for sequences only seen in
    /// other tables.
    pub fn union(tables: &[AbundanceTable]) -> Result<Self, TableError> {
        let mut samples = IndexSet::new();
        let mut totals: IndexMap<&str, u64> = IndexMap::new();

        for table in tables {
            for sample in &table.samples {
                if !samples.insert(sample.clone()) {
                    return Err(TableError::DuplicateSample(sample.clone()));
                }
            }
            for (col, total) in table.sequence_totals().into_iter().enumerate() {
                *totals.entry(table.sequences[col].as_str()).or_insert(0) += total;
            }
        }

        let sequences = ordered_sequences(totals);
        let mut matrix: Array2<u64> = Array2::zeros((samples.len(), sequences.len()));
        let mut row_offset = 0;
        for table in tables {
            for (col, sequence) in table.sequences.iter().enumerate() {
                if let Some(target) = sequences.get_index_of(sequence.as_str()) {
                    for row in 0..table.samples.len() {
                        matrix[[row_offset + row, target]] += table.counts[[row, col]];
                    }
                }
            }
            row_offset += table.samples.len();
        }

        Ok(AbundanceTable {
            samples,
            sequences,
            counts: matrix,
        })
    }

    /// Returns a copy keeping only the sequence columns for which `keep`
    /// returns true. Column order is preserved.
    pub fn filter_sequences<F>(&self, mut keep: F) -> Self
    where
        F: FnMut(usize, &str) -> bool,
    {
        let kept: Vec<usize> = self
            .sequences
            .iter()
            .enumerate()
            .filter(|(idx, seq)| keep(*idx, seq.as_str()))
            .map(|(idx, _)| idx)
            .collect();

        AbundanceTable {
            samples: self.samples.clone(),
            sequences: kept
                .iter()
                .map(|&idx| self.sequences[idx].clone())
                .collect(),
            counts: self.counts.select(Axis(1), &kept),
        }
    }

    /// Checks the count matrix against the sample and sequence lists.
    pub fn validate(&self) -> Result<(), TableError> {
        let (rows, cols) = self.counts.dim();
        if rows != self.samples.len() || cols != self.sequences.len() {
            return Err(TableError::Shape {
                rows,
                cols,
                samples: self.samples.len(),
                sequences: self.sequences.len(),
            });
        }
        Ok(())
    }

    pub fn samples(&self) -> &IndexSet<String> {
        &self.samples
    }

    pub fn sequences(&self) -> &IndexSet<String> {
        &self.sequences
    }

    /// Returns a reference to the underlying count matrix.
    pub fn counts(&self) -> &Array2<u64> {
        &self.counts
    }

    /// Returns the dimensions of the table (samples, sequences).
    pub fn dimensions(&self) -> (usize, usize) {
        self.counts.dim()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Count of a sequence in a sample, `None` if either is not in the table.
    pub fn get(&self, sample: &str, sequence: &str) -> Option<u64> {
        let row = self.samples.get_index_of(sample)?;
        let col = self.sequences.get_index_of(sequence)?;
        Some(self.counts[[row, col]])
    }

    /// Total reads per sample.
    pub fn sample_totals(&self) -> Vec<u64> {
        self.counts.sum_axis(Axis(1)).to_vec()
    }

    /// Total reads per sequence.
    pub fn sequence_totals(&self) -> Vec<u64> {
        self.counts.sum_axis(Axis(0)).to_vec()
    }

    pub fn total(&self) -> u64 {
        self.counts.sum()
    }

    /// Iterates every cell as `(sample, sequence, count)`, zeros included.
    pub fn cells(&self) -> impl Iterator<Item = (&str, &str, u64)> + '_ {
        self.counts
            .indexed_iter()
            .map(|((row, col), &n)| (self.samples[row].as_str(), self.sequences[col].as_str(), n))
    }
}

impl Default for AbundanceTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Column order: total abundance descending, then sequence.
fn ordered_sequences(totals: IndexMap<&str, u64>) -> IndexSet<String> {
    let mut totals: Vec<(&str, u64)> = totals.into_iter().collect();
    totals.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    totals.into_iter().map(|(seq, _)| seq.to_string()).collect()
}
