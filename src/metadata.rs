//! Metadata handling module.
//!
//! Sample metadata comes from two sources: a mapping file per run (sample
//! name → specimen id, specimen type, flow cell) and a specimen-tracking
//! extract shared by all runs (specimen id → subject, collection date,
//! original specimen type). The two are joined on specimen id after the
//! ids are normalized, and every subject's specimens get a study day
//! counted from that subject's first collection.

use crate::count_table::AbundanceTable;
use chrono::NaiveDate;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("{path} is missing a '{column}' column")]
    MissingColumn { path: PathBuf, column: &'static str },
}

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%m/%d/%Y", "%d-%b-%Y"];

/// Canonical form of a specimen id: `-`, `.`, `/` and spaces become `_`,
/// letters are uppercased.
pub fn normalize_specimen_id(id: &str) -> String {
    id.trim()
        .chars()
        .map(|c| match c {
            '-' | '.' | '/' | ' ' => '_',
            c => c.to_ascii_uppercase(),
        })
        .collect()
}

/// Canonical form of a specimen type, e.g. `Oral Swab` → `oral_swab`.
pub fn normalize_specimen_type(specimen_type: &str) -> String {
    specimen_type
        .trim()
        .chars()
        .map(|c| match c {
            '-' | ' ' => '_',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}

/// Parses a collection date in any of the accepted formats.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
}

/// One row of a run's mapping file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingEntry {
    pub sample: String,
    pub specimen_id: String,
    pub specimen_type: Option<String>,
    pub flowcell: Option<String>,
}

/// One row of the specimen-tracking extract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingEntry {
    pub subject_id: String,
    pub specimen_id: String,
    pub collection_date: Option<NaiveDate>,
    pub specimen_type: Option<String>,
}

/// Opens a delimited table, choosing tab or comma from the header line.
fn open_table(path: &Path) -> Result<csv::Reader<File>, MetadataError> {
    let io_err = |source| MetadataError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut header = String::new();
    BufReader::new(File::open(path).map_err(io_err)?)
        .read_line(&mut header)
        .map_err(io_err)?;
    let delimiter = if header.contains('\t') { b'\t' } else { b',' };

    csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|source| MetadataError::Csv {
            path: path.to_path_buf(),
            source,
        })
}

/// Position of the first header matching any alias, case-insensitively.
fn find_column(headers: &csv::StringRecord, aliases: &[&str]) -> Option<usize> {
    headers
        .iter()
        .position(|h| aliases.iter().any(|a| h.trim().eq_ignore_ascii_case(a)))
}

fn require_column(
    path: &Path,
    headers: &csv::StringRecord,
    column: &'static str,
    aliases: &[&str],
) -> Result<usize, MetadataError> {
    find_column(headers, aliases).ok_or_else(|| MetadataError::MissingColumn {
        path: path.to_path_buf(),
        column,
    })
}

fn field(record: &csv::StringRecord, col: Option<usize>) -> Option<String> {
    col.and_then(|c| record.get(c))
        .map(str::trim)
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("na"))
        .map(str::to_string)
}

/// Loads a run's sample → specimen mapping file (tab or comma separated).
///
/// # Arguments
///
/// * `path` - Mapping file with a sample column (`sample`, `sample_name` or
///   `run_accession`) and a specimen column (`specimen_id` or `specimen`).
///   `specimen_type`/`sample_type` and `flowcell`/`flow_cell` are optional.
pub fn load_mapping(path: &Path) -> Result<Vec<MappingEntry>, MetadataError> {
    let mut reader = open_table(path)?;
    let csv_err = |source| MetadataError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let headers = reader.headers().map_err(csv_err)?.clone();

    let sample_col = require_column(path, &headers, "sample", &["sample", "sample_name", "run_accession"])?;
    let specimen_col = require_column(path, &headers, "specimen_id", &["specimen_id", "specimen"])?;
    let type_col = find_column(&headers, &["specimen_type", "sample_type"]);
    let flowcell_col = find_column(&headers, &["flowcell", "flow_cell"]);

    let mut entries = Vec::new();
    for result in reader.records() {
        let record = result.map_err(csv_err)?;
        let (Some(sample), Some(specimen_id)) =
            (field(&record, Some(sample_col)), field(&record, Some(specimen_col)))
        else {
            warn!("Skipping incomplete mapping row in {}", path.display());
            continue;
        };
        entries.push(MappingEntry {
            sample,
            specimen_id,
            specimen_type: field(&record, type_col),
            flowcell: field(&record, flowcell_col),
        });
    }

    debug!("Loaded {} mapping rows from {}", entries.len(), path.display());
    Ok(entries)
}

/// Loads the specimen-tracking extract.
///
/// Requires `subject_id` and `specimen_id` columns; `collection_date` and
/// `specimen_type` are used when present. Unparseable dates are kept as
/// missing with a warning.
pub fn load_tracking(path: &Path) -> Result<Vec<TrackingEntry>, MetadataError> {
    let mut reader = open_table(path)?;
    let csv_err = |source| MetadataError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let headers = reader.headers().map_err(csv_err)?.clone();

    let subject_col = require_column(path, &headers, "subject_id", &["subject_id", "subject", "participant_id"])?;
    let specimen_col = require_column(path, &headers, "specimen_id", &["specimen_id", "specimen"])?;
    let date_col = find_column(&headers, &["collection_date", "date_collected"]);
    let type_col = find_column(
        &headers,
        &["specimen_type", "original_specimen_type", "sample_type"],
    );

    let mut entries = Vec::new();
    for result in reader.records() {
        let record = result.map_err(csv_err)?;
        let (Some(subject_id), Some(specimen_id)) =
            (field(&record, Some(subject_col)), field(&record, Some(specimen_col)))
        else {
            warn!("Skipping incomplete tracking row in {}", path.display());
            continue;
        };
        let collection_date = field(&record, date_col).and_then(|raw| {
            let parsed = parse_date(&raw);
            if parsed.is_none() {
                warn!("Unrecognised collection date '{}' for {}", raw, specimen_id);
            }
            parsed
        });
        entries.push(TrackingEntry {
            subject_id,
            specimen_id,
            collection_date,
            specimen_type: field(&record, type_col),
        });
    }

    info!("Loaded {} tracked specimens from {}", entries.len(), path.display());
    Ok(entries)
}

/// Joined metadata of one table sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleMetadata {
    /// Sample id as stored in the abundance table.
    pub sample: String,
    pub specimen_id: String,
    pub subject_id: Option<String>,
    /// Type used for summaries: the tracked original type, else the
    /// mapping file's type, normalized.
    pub specimen_type: Option<String>,
    pub original_specimen_type: Option<String>,
    pub flowcell: Option<String>,
    pub collection_date: Option<NaiveDate>,
    pub study_day: Option<i64>,
}

/// Metadata of every mapped sample across runs.
#[derive(Debug, Clone, Default)]
pub struct MetadataIndex {
    samples: HashMap<String, SampleMetadata>,
}

impl MetadataIndex {
    /// Joins mapping rows with the tracking extract and derives study days.
    ///
    /// # Arguments
    ///
    /// * `mappings` - Mapping rows keyed by the table sample id each row
    ///   describes (run tag already applied).
    /// * `tracking` - The tracking extract.
    pub fn build(mappings: &[(String, MappingEntry)], tracking: &[TrackingEntry]) -> Self {
        let mut tracked: HashMap<String, &TrackingEntry> = HashMap::new();
        for entry in tracking {
            let key = normalize_specimen_id(&entry.specimen_id);
            if tracked.contains_key(&key) {
                warn!("Specimen {} is tracked more than once; keeping the first", key);
                continue;
            }
            tracked.insert(key, entry);
        }

        let mut samples: HashMap<String, SampleMetadata> = HashMap::new();
        for (sample, entry) in mappings {
            if samples.contains_key(sample) {
                warn!("Sample {} is mapped more than once; keeping the first", sample);
                continue;
            }
            let specimen_id = normalize_specimen_id(&entry.specimen_id);
            let track = tracked.get(&specimen_id);
            let original_specimen_type = track.and_then(|t| t.specimen_type.clone());
            let specimen_type = original_specimen_type
                .as_deref()
                .or(entry.specimen_type.as_deref())
                .map(normalize_specimen_type);

            samples.insert(
                sample.clone(),
                SampleMetadata {
                    sample: sample.clone(),
                    specimen_id,
                    subject_id: track.map(|t| t.subject_id.clone()),
                    specimen_type,
                    original_specimen_type,
                    flowcell: entry.flowcell.clone(),
                    collection_date: track.and_then(|t| t.collection_date),
                    study_day: None,
                },
            );
        }

        // Day 0 is the subject's first tracked collection, sequenced or not.
        let mut first_day: HashMap<&str, NaiveDate> = HashMap::new();
        for entry in tracked.values() {
            if let Some(date) = entry.collection_date {
                first_day
                    .entry(entry.subject_id.as_str())
                    .and_modify(|d| *d = (*d).min(date))
                    .or_insert(date);
            }
        }
        for meta in samples.values_mut() {
            meta.study_day = match (&meta.subject_id, meta.collection_date) {
                (Some(subject), Some(date)) => first_day
                    .get(subject.as_str())
                    .map(|first| date.signed_duration_since(*first).num_days()),
                _ => None,
            };
        }

        MetadataIndex { samples }
    }

    pub fn get(&self, sample: &str) -> Option<&SampleMetadata> {
        self.samples.get(sample)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// One (sequence, sample) cell of the global table with its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedRecord {
    /// Column index of the sequence in the global table.
    pub sequence_id: usize,
    pub sample: String,
    pub subject_id: Option<String>,
    pub specimen_type: Option<String>,
    pub study_day: Option<i64>,
    pub read_count: u64,
}

/// Records of a left join plus the samples that found no subject.
#[derive(Debug, Clone, Default)]
pub struct JoinResult {
    pub records: Vec<AggregatedRecord>,
    pub unmatched: Vec<String>,
}

/// Left join of every table cell with the sample metadata.
///
/// Cells are kept whether or not their sample has metadata, and zero
/// counts are kept too; consumers filter them.
pub fn join_table(table: &AbundanceTable, index: &MetadataIndex) -> JoinResult {
    let mut unmatched = BTreeSet::new();
    let metadata: Vec<Option<&SampleMetadata>> = table
        .samples()
        .iter()
        .map(|sample| {
            let meta = index.get(sample);
            if meta.and_then(|m| m.subject_id.as_ref()).is_none() {
                unmatched.insert(sample.clone());
            }
            meta
        })
        .collect();

    let records = table
        .counts()
        .indexed_iter()
        .map(|((row, col), &read_count)| {
            let meta = metadata[row];
            AggregatedRecord {
                sequence_id: col,
                sample: table.samples()[row].clone(),
                subject_id: meta.and_then(|m| m.subject_id.clone()),
                specimen_type: meta.and_then(|m| m.specimen_type.clone()),
                study_day: meta.and_then(|m| m.study_day),
                read_count,
            }
        })
        .collect();

    let unmatched: Vec<String> = unmatched.into_iter().collect();
    if !unmatched.is_empty() {
        warn!(
            "{} of {} samples have no subject metadata; their records are kept with empty fields",
            unmatched.len(),
            table.samples().len()
        );
    }
    JoinResult { records, unmatched }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use std::fs;
    use tempfile::tempdir;

    fn mapping(sample: &str, specimen: &str, specimen_type: Option<&str>) -> (String, MappingEntry) {
        (
            sample.to_string(),
            MappingEntry {
                sample: sample.to_string(),
                specimen_id: specimen.to_string(),
                specimen_type: specimen_type.map(str::to_string),
                flowcell: None,
            },
        )
    }

    fn tracking(subject: &str, specimen: &str, date: &str, specimen_type: &str) -> TrackingEntry {
        TrackingEntry {
            subject_id: subject.to_string(),
            specimen_id: specimen.to_string(),
            collection_date: parse_date(date),
            specimen_type: Some(specimen_type.to_string()),
        }
    }

    #[test]
    fn test_normalize_ids_and_dates() {
        assert_eq!(normalize_specimen_id(" ab-12.3/x y"), "AB_12_3_X_Y");
        assert_eq!(normalize_specimen_type("Oral Swab"), "oral_swab");
        let d = NaiveDate::from_ymd_opt(2021, 3, 4).unwrap();
        assert_eq!(parse_date("2021-03-04"), Some(d));
        assert_eq!(parse_date("03/04/2021"), Some(d));
        assert_eq!(parse_date("04-Mar-2021"), Some(d));
        assert_eq!(parse_date("yesterday"), None);
    }

    #[test]
    fn test_study_days_from_first_collection() {
        let mappings = vec![
            mapping("s1_R1", "SP-1", None),
            mapping("s2_R1", "SP-2", None),
            mapping("s3_R2", "SP-3", None),
        ];
        let tracked = vec![
            tracking("P1", "sp_2", "2021-01-06", "sputum"),
            tracking("P1", "SP.1", "2021-01-01", "sputum"),
            tracking("P1", "sp 3", "2021-01-13", "sputum"),
        ];
        let index = MetadataIndex::build(&mappings, &tracked);

        let days: Vec<Option<i64>> = ["s1_R1", "s2_R1", "s3_R2"]
            .iter()
            .map(|s| index.get(s).unwrap().study_day)
            .collect();
        assert_eq!(days, vec![Some(0), Some(5), Some(12)]);
    }

    #[test]
    fn test_study_day_counts_from_unsequenced_collection() {
        let mappings = vec![mapping("s2_R1", "SP-2", None), mapping("q1_R1", "Q-1", None)];
        let tracked = vec![
            tracking("P1", "SP-1", "2021-01-01", "sputum"),
            tracking("P1", "SP-2", "2021-01-11", "sputum"),
            tracking("P2", "Q-1", "2021-03-02", "stool"),
            tracking("P2", "Q-0", "", "stool"),
        ];
        let index = MetadataIndex::build(&mappings, &tracked);

        assert_eq!(index.get("s2_R1").unwrap().study_day, Some(10));
        assert_eq!(index.get("q1_R1").unwrap().study_day, Some(0));
    }

    #[test]
    fn test_tracked_type_preferred_over_mapping_type() {
        let mappings = vec![
            mapping("a", "X1", Some("Stool")),
            mapping("b", "X2", Some("Oral Swab")),
        ];
        let tracked = vec![tracking("P1", "X1", "2021-01-01", "Stool Swab")];
        let index = MetadataIndex::build(&mappings, &tracked);

        assert_eq!(index.get("a").unwrap().specimen_type.as_deref(), Some("stool_swab"));
        assert_eq!(index.get("b").unwrap().specimen_type.as_deref(), Some("oral_swab"));
        assert_eq!(index.get("b").unwrap().subject_id, None);
    }

    #[test]
    fn test_left_join_keeps_unmatched_samples() {
        let row: IndexMap<String, u64> = [("ACGT".to_string(), 5)].into_iter().collect();
        let empty = IndexMap::new();
        let table = AbundanceTable::from_samples(vec![
            ("known".to_string(), &row),
            ("stranger".to_string(), &row),
            ("zero".to_string(), &empty),
        ])
        .unwrap();
        let index = MetadataIndex::build(
            &[mapping("known", "K1", None), mapping("zero", "K1", None)],
            &[tracking("P1", "K1", "2021-01-01", "sputum")],
        );

        let joined = join_table(&table, &index);
        assert_eq!(joined.records.len(), 3);
        let stranger = joined.records.iter().find(|r| r.sample == "stranger").unwrap();
        assert_eq!(stranger.read_count, 5);
        assert_eq!(stranger.subject_id, None);
        assert_eq!(stranger.specimen_type, None);
        assert_eq!(stranger.study_day, None);
        assert_eq!(joined.unmatched, vec!["stranger".to_string()]);
        let zero = joined.records.iter().find(|r| r.sample == "zero").unwrap();
        assert_eq!(zero.read_count, 0);
        assert_eq!(zero.subject_id.as_deref(), Some("P1"));
    }

    #[test]
    fn test_load_tab_and_comma_files() {
        let dir = tempdir().unwrap();
        let mapping_path = dir.path().join("mapping.tsv");
        fs::write(
            &mapping_path,
            "Sample_Name\tSpecimen\tSample_Type\tFlow_Cell\nS1\tSP-1\toral swab\tFC1\nS2\t\tsputum\tFC1\n",
        )
        .unwrap();
        let entries = load_mapping(&mapping_path).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].sample, "S1");
        assert_eq!(entries[0].specimen_type.as_deref(), Some("oral swab"));
        assert_eq!(entries[0].flowcell.as_deref(), Some("FC1"));

        let tracking_path = dir.path().join("tracking.csv");
        fs::write(
            &tracking_path,
            "subject_id,specimen_id,collection_date,specimen_type\nP1,SP-1,03/04/2021,Oral Swab\nP2,SP-2,not a date,Sputum\n",
        )
        .unwrap();
        let tracked = load_tracking(&tracking_path).unwrap();
        assert_eq!(tracked.len(), 2);
        assert_eq!(tracked[0].collection_date, NaiveDate::from_ymd_opt(2021, 3, 4));
        assert_eq!(tracked[1].collection_date, None);
    }

    #[test]
    fn test_missing_required_column() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mapping.csv");
        fs::write(&path, "sample,flowcell\nS1,FC1\n").unwrap();
        assert!(matches!(
            load_mapping(&path),
            Err(MetadataError::MissingColumn {
                column: "specimen_id",
                ..
            })
        ));
    }
}
