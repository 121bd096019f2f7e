//! Input/Output operations module.
//!
//! Handles reading reads and reference FASTA files, and writing results:
//! abundance tables (JSON for reloading, CSV for people), ASV FASTA and
//! taxonomy tables. Every output goes through a temporary file in the
//! destination directory that is persisted once complete.

pub mod fastq;

use crate::bio::{TaxonomicLevel, TaxonomyTable};
use crate::count_table::{AbundanceTable, TableError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Malformed table {path}: {source}")]
    Table {
        path: PathBuf,
        #[source]
        source: TableError,
    },
}

impl OutputError {
    fn io(path: &Path, source: io::Error) -> Self {
        OutputError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Creates a directory and its parents if missing.
pub fn ensure_dir(path: &Path) -> Result<(), OutputError> {
    fs::create_dir_all(path).map_err(|e| OutputError::io(path, e))
}

/// Removes a file left by an earlier run, if there is one.
pub fn remove_stale(path: &Path) -> Result<(), OutputError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(OutputError::io(path, e)),
    }
}

/// Label of the sequence in column `idx`, 1-based.
pub fn asv_label(idx: usize) -> String {
    format!("ASV{}", idx + 1)
}

/// Writes to a temporary sibling of `path` and moves it into place when
/// `write` succeeds.
fn write_atomically<F>(path: &Path, write: F) -> Result<(), OutputError>
where
    F: FnOnce(&mut BufWriter<&mut NamedTempFile>) -> Result<(), OutputError>,
{
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    ensure_dir(dir)?;
    let mut temp = NamedTempFile::new_in(dir).map_err(|e| OutputError::io(path, e))?;
    {
        let mut writer = BufWriter::new(&mut temp);
        write(&mut writer)?;
        writer.flush().map_err(|e| OutputError::io(path, e))?;
    }
    temp.persist(path).map_err(|e| OutputError::io(path, e.error))?;
    Ok(())
}

/// Serializes a value as pretty JSON.
pub fn save_json<T: Serialize + ?Sized>(value: &T, path: &Path) -> Result<(), OutputError> {
    write_atomically(path, |writer| {
        serde_json::to_writer_pretty(writer, value).map_err(|source| OutputError::Json {
            path: path.to_path_buf(),
            source,
        })
    })
}

/// Writes serializable rows as CSV, the header taken from the field names.
pub fn write_csv_rows<T: Serialize>(rows: &[T], path: &Path) -> Result<(), OutputError> {
    write_atomically(path, |out| {
        let mut writer = csv::Writer::from_writer(out);
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush().map_err(|e| OutputError::io(path, e))?;
        Ok(())
    })
}

pub fn write_lines<S: AsRef<str>>(lines: &[S], path: &Path) -> Result<(), OutputError> {
    write_atomically(path, |out| {
        for line in lines {
            writeln!(out, "{}", line.as_ref()).map_err(|e| OutputError::io(path, e))?;
        }
        Ok(())
    })
}

pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, OutputError> {
    let file = File::open(path).map_err(|e| OutputError::io(path, e))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|source| OutputError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Loads an abundance table saved with [`save_json`] and checks its shape.
pub fn load_table(path: &Path) -> Result<AbundanceTable, OutputError> {
    let table: AbundanceTable = load_json(path)?;
    table.validate().map_err(|source| OutputError::Table {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(table)
}

/// Writes an AbundanceTable to a CSV file.
///
/// One row per sample; the header is `sample` followed by the sequences
/// in column order.
pub fn write_count_table(table: &AbundanceTable, path: &Path) -> Result<(), OutputError> {
    write_atomically(path, |out| {
        let mut writer = csv::Writer::from_writer(out);

        let mut header = vec!["sample".to_string()];
        header.extend(table.sequences().iter().cloned());
        writer.write_record(&header)?;

        for (sample, row) in table.samples().iter().zip(table.counts().rows()) {
            let mut record = Vec::with_capacity(row.len() + 1);
            record.push(sample.clone());
            record.extend(row.iter().map(|n| n.to_string()));
            writer.write_record(&record)?;
        }

        writer.flush().map_err(|e| OutputError::io(path, e))?;
        Ok(())
    })
}

/// Writes the table's sequences as FASTA, labelled in column order with
/// their total abundance.
pub fn write_asv_fasta(table: &AbundanceTable, path: &Path) -> Result<(), OutputError> {
    let totals = table.sequence_totals();
    write_atomically(path, |out| {
        for (idx, (sequence, total)) in table.sequences().iter().zip(totals).enumerate() {
            writeln!(out, ">{};size={}\n{}", asv_label(idx), total, sequence)
                .map_err(|e| OutputError::io(path, e))?;
        }
        Ok(())
    })
}

/// Writes taxonomy assignments as a tab-separated table with one column
/// per rank. Unassigned ranks are `NA`.
pub fn write_taxonomy_tsv(
    taxonomy: &TaxonomyTable,
    table: &AbundanceTable,
    path: &Path,
) -> Result<(), OutputError> {
    write_atomically(path, |out| {
        let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_writer(out);

        let mut header = vec!["asv", "sequence"];
        header.extend(TaxonomicLevel::all_levels().iter().map(|l| l.as_str()));
        writer.write_record(&header)?;

        for (idx, sequence) in table.sequences().iter().enumerate() {
            let lineage = taxonomy.get(sequence);
            let mut record = vec![asv_label(idx), sequence.clone()];
            record.extend(TaxonomicLevel::all_levels().iter().map(|&level| {
                lineage
                    .and_then(|l| l.get_level(level))
                    .unwrap_or("NA")
                    .to_string()
            }));
            writer.write_record(&record)?;
        }

        writer.flush().map_err(|e| OutputError::io(path, e))?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bio::taxonomy::parse_lineage;
    use indexmap::IndexMap;
    use tempfile::tempdir;

    fn create_test_table() -> AbundanceTable {
        let a: IndexMap<String, u64> = [("ACGT".to_string(), 10), ("GGCC".to_string(), 5)]
            .into_iter()
            .collect();
        let b: IndexMap<String, u64> = [("ACGT".to_string(), 20)].into_iter().collect();
        AbundanceTable::from_samples(vec![("Sample1".to_string(), &a), ("Sample2".to_string(), &b)])
            .unwrap()
    }

    #[test]
    fn test_write_count_table_csv() {
        let table = create_test_table();
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("nested").join("counts.csv");

        write_count_table(&table, &file_path).unwrap();

        let content = fs::read_to_string(file_path).unwrap();
        let expected_content = "\
sample,ACGT,GGCC\n\
Sample1,10,5\n\
Sample2,20,0\n";
        assert_eq!(content, expected_content);
    }

    #[test]
    fn test_table_json_roundtrip() {
        let table = create_test_table();
        let dir = tempdir().unwrap();
        let path = dir.path().join("seqtab.json");

        save_json(&table, &path).unwrap();
        let loaded = load_table(&path).unwrap();
        assert_eq!(loaded, table);
    }

    #[test]
    fn test_load_table_missing_file() {
        let dir = tempdir().unwrap();
        let err = load_table(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, OutputError::Io { .. }));
    }

    #[test]
    fn test_write_asv_fasta() {
        let table = create_test_table();
        let dir = tempdir().unwrap();
        let path = dir.path().join("asvs.fasta");

        write_asv_fasta(&table, &path).unwrap();

        let content = fs::read_to_string(path).unwrap();
        assert_eq!(content, ">ASV1;size=30\nACGT\n>ASV2;size=5\nGGCC\n");
    }

    #[test]
    fn test_write_taxonomy_tsv() {
        let table = create_test_table();
        let mut taxonomy = TaxonomyTable::default();
        taxonomy
            .assignments
            .insert("ACGT".to_string(), parse_lineage("Bacteria;Firmicutes"));
        let dir = tempdir().unwrap();
        let path = dir.path().join("taxa.tsv");

        write_taxonomy_tsv(&taxonomy, &table, &path).unwrap();

        let content = fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(
            lines[0],
            "asv\tsequence\tKingdom\tPhylum\tClass\tOrder\tFamily\tGenus\tSpecies"
        );
        assert_eq!(lines[1], "ASV1\tACGT\tBacteria\tFirmicutes\tNA\tNA\tNA\tNA\tNA");
        assert_eq!(lines[2], "ASV2\tGGCC\tNA\tNA\tNA\tNA\tNA\tNA\tNA");
    }
}
