//! Functions specifically for reading and writing FASTQ files.
//!
//! Reading leverages the `needletail` crate, which handles gzip-compressed
//! input transparently. Filtered reads are written back as gzip FASTQ with
//! `flate2`; writes go through a temporary file in the destination directory
//! and are persisted in one step so a crashed run never leaves a truncated
//! output behind.

use flate2::write::GzEncoder;
use flate2::Compression;
use log::debug;
use needletail::errors::{ParseError, ParseErrorKind};
use needletail::{parse_fastx_file, FastxReader};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FastqError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: ParseError,
    },

    #[error("Record {id} in {path} has no quality scores")]
    MissingQuality { path: PathBuf, id: String },
}

/// An owned FASTQ record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastqRecord {
    pub id: String,
    pub sequence: Vec<u8>,
    pub quality: Vec<u8>,
}

impl FastqRecord {
    pub fn new(id: impl Into<String>, sequence: &[u8], quality: &[u8]) -> Self {
        FastqRecord {
            id: id.into(),
            sequence: sequence.to_vec(),
            quality: quality.to_vec(),
        }
    }

    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }
}

/// Opens a FASTQ/FASTA file for streaming.
///
/// Returns `None` when the file holds no records, which needletail reports
/// as an error but which is a normal outcome for a sample that filtered to
/// zero reads.
pub fn open_reader(path: &Path) -> Result<Option<Box<dyn FastxReader>>, FastqError> {
    match parse_fastx_file(path) {
        Ok(reader) => Ok(Some(reader)),
        Err(e) if matches!(e.kind, ParseErrorKind::EmptyFile) => {
            debug!("{} contains no records", path.display());
            Ok(None)
        }
        Err(e) => Err(FastqError::Parse {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Pulls the next record from a reader as an owned `FastqRecord`.
pub fn next_record(
    reader: &mut dyn FastxReader,
    path: &Path,
) -> Option<Result<FastqRecord, FastqError>> {
    let record = reader.next()?;
    Some(match record {
        Ok(record) => {
            let id = String::from_utf8_lossy(record.id()).into_owned();
            match record.qual() {
                Some(qual) => Ok(FastqRecord {
                    sequence: record.seq().to_vec(),
                    quality: qual.to_vec(),
                    id,
                }),
                None => Err(FastqError::MissingQuality {
                    path: path.to_path_buf(),
                    id,
                }),
            }
        }
        Err(source) => Err(FastqError::Parse {
            path: path.to_path_buf(),
            source,
        }),
    })
}

/// Reads every record of a FASTQ file into memory.
pub fn read_fastq(path: impl AsRef<Path>) -> Result<Vec<FastqRecord>, FastqError> {
    let path = path.as_ref();
    let mut records = Vec::new();
    if let Some(mut reader) = open_reader(path)? {
        while let Some(record) = next_record(reader.as_mut(), path) {
            records.push(record?);
        }
    }
    debug!("Read {} records from {}", records.len(), path.display());
    Ok(records)
}

/// Reads a FASTA file as (header, sequence) pairs.
///
/// The header is the full description line, so taxonomy strings stored in
/// it are preserved. Sequences are uppercased.
pub fn read_fasta(path: impl AsRef<Path>) -> Result<Vec<(String, Vec<u8>)>, FastqError> {
    let path = path.as_ref();
    let mut entries = Vec::new();
    if let Some(mut reader) = open_reader(path)? {
        while let Some(record) = reader.next() {
            let record = record.map_err(|source| FastqError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
            let header = String::from_utf8_lossy(record.id()).into_owned();
            let sequence = record.seq().to_ascii_uppercase();
            entries.push((header, sequence));
        }
    }
    Ok(entries)
}

/// Writes gzip FASTQ records to a temporary file and moves it into place
/// on `finish`.
pub struct FastqWriter {
    encoder: GzEncoder<BufWriter<NamedTempFile>>,
    destination: PathBuf,
    records: u64,
}

impl FastqWriter {
    pub fn create(destination: impl AsRef<Path>) -> Result<Self, FastqError> {
        let destination = destination.as_ref().to_path_buf();
        let dir = destination
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let temp = NamedTempFile::new_in(dir)?;
        // GzEncoder leaves the header mtime at zero, keeping output reproducible.
        let encoder = GzEncoder::new(BufWriter::new(temp), Compression::default());
        Ok(FastqWriter {
            encoder,
            destination,
            records: 0,
        })
    }

    pub fn write_record(&mut self, record: &FastqRecord) -> Result<(), FastqError> {
        self.encoder.write_all(b"@")?;
        self.encoder.write_all(record.id.as_bytes())?;
        self.encoder.write_all(b"\n")?;
        self.encoder.write_all(&record.sequence)?;
        self.encoder.write_all(b"\n+\n")?;
        self.encoder.write_all(&record.quality)?;
        self.encoder.write_all(b"\n")?;
        self.records += 1;
        Ok(())
    }

    /// Flushes the compressed stream and persists the file at its
    /// destination, replacing any previous output.
    pub fn finish(self) -> Result<u64, FastqError> {
        let buffered = self.encoder.finish()?;
        let temp = buffered.into_inner().map_err(|e| e.into_error())?;
        temp.persist(&self.destination).map_err(|e| e.error)?;
        Ok(self.records)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    /// Writes a gzip FASTQ fixture.
    pub(crate) fn write_fastq_gz(path: &Path, records: &[FastqRecord]) {
        let mut writer = FastqWriter::create(path).unwrap();
        for record in records {
            writer.write_record(record).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn test_write_then_read_gz() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reads.fastq.gz");
        let records = vec![
            FastqRecord::new("r1", b"ACGT", b"IIII"),
            FastqRecord::new("r2", b"TTGA", b"####"),
        ];
        write_fastq_gz(&path, &records);

        let read = read_fastq(&path).unwrap();
        assert_eq!(read, records);
    }

    #[test]
    fn test_empty_output_reads_as_no_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.fastq.gz");
        write_fastq_gz(&path, &[]);
        assert!(path.exists());
        assert!(read_fastq(&path).unwrap().is_empty());

        let plain = dir.path().join("empty.fastq");
        fs::write(&plain, "").unwrap();
        assert!(read_fastq(&plain).unwrap().is_empty());
    }

    #[test]
    fn test_rewrites_are_byte_identical() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reads.fastq.gz");
        let records = vec![FastqRecord::new("r1", b"ACGTACGT", b"IIIIIIII")];
        write_fastq_gz(&path, &records);
        let first = fs::read(&path).unwrap();
        write_fastq_gz(&path, &records);
        assert_eq!(first, fs::read(&path).unwrap());
    }

    #[test]
    fn test_read_fasta_keeps_full_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ref.fa");
        fs::write(&path, ">Bacteria;Firmicutes;\nacgt\n>id2 Genus species\nGGCC\n").unwrap();
        let entries = read_fasta(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, "Bacteria;Firmicutes;");
        assert_eq!(entries[0].1, b"ACGT");
        assert_eq!(entries[1].0, "id2 Genus species");
    }

    #[test]
    fn test_truncated_record_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.fastq");
        fs::write(&path, "@r1\nACGT\n+\n!!!").unwrap();
        assert!(read_fastq(&path).is_err());
    }
}
