//! Summary statistics over the joined ASV records.
//!
//! Two distributions are computed per specimen type: how many sequences
//! are shared by how many subjects (the subject pileup), and on which
//! study day each sequence was first seen (the earliest-detection pileup).

use crate::io::{self, OutputError};
use crate::metadata::AggregatedRecord;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

/// Records that count as a detection: a positive read count and a
/// specimen type on the allow-list.
pub fn detections<'a>(
    records: &'a [AggregatedRecord],
    specimen_types: &[String],
) -> Vec<&'a AggregatedRecord> {
    let kept: Vec<&AggregatedRecord> = records
        .iter()
        .filter(|r| r.read_count > 0)
        .filter(|r| {
            r.specimen_type
                .as_ref()
                .is_some_and(|t| specimen_types.contains(t))
        })
        .collect();
    debug!("{} of {} records are detections", kept.len(), records.len());
    kept
}

/// Number of sequences found in exactly `subjects` distinct subjects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PileupBucket {
    pub specimen_type: String,
    pub subjects: usize,
    pub sequences: usize,
}

/// Number of sequences first detected on `study_day`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionBucket {
    pub specimen_type: String,
    /// Earliest study day, clamped to the cap.
    pub study_day: u32,
    pub sequences: usize,
}

/// Buckets sequences by how many distinct subjects carry them.
///
/// Records without a subject are ignored. Buckets are ordered by specimen
/// type, then subject count.
pub fn subject_pileup(records: &[&AggregatedRecord]) -> Vec<PileupBucket> {
    let mut carriers: HashMap<(usize, &str), BTreeSet<&str>> = HashMap::new();
    for record in records {
        if let (Some(subject), Some(specimen_type)) = (&record.subject_id, &record.specimen_type) {
            carriers
                .entry((record.sequence_id, specimen_type.as_str()))
                .or_default()
                .insert(subject.as_str());
        }
    }

    let mut buckets: BTreeMap<(&str, usize), usize> = BTreeMap::new();
    for ((_, specimen_type), subjects) in &carriers {
        *buckets.entry((*specimen_type, subjects.len())).or_default() += 1;
    }

    buckets
        .into_iter()
        .map(|((specimen_type, subjects), sequences)| PileupBucket {
            specimen_type: specimen_type.to_string(),
            subjects,
            sequences,
        })
        .collect()
}

/// Buckets sequences by the first study day they were observed on.
///
/// Days above `cap` are reported as `cap`. Records without a study day are
/// ignored, as are negative days.
pub fn earliest_detection(records: &[&AggregatedRecord], cap: u32) -> Vec<DetectionBucket> {
    let mut earliest: HashMap<(usize, &str), i64> = HashMap::new();
    for record in records {
        if let (Some(day), Some(specimen_type)) = (record.study_day, &record.specimen_type) {
            if day < 0 {
                continue;
            }
            earliest
                .entry((record.sequence_id, specimen_type.as_str()))
                .and_modify(|d| *d = (*d).min(day))
                .or_insert(day);
        }
    }

    let mut buckets: BTreeMap<(&str, u32), usize> = BTreeMap::new();
    for ((_, specimen_type), day) in earliest {
        let day = u32::try_from(day).map_or(cap, |d| d.min(cap));
        *buckets.entry((specimen_type, day)).or_default() += 1;
    }

    buckets
        .into_iter()
        .map(|((specimen_type, study_day), sequences)| DetectionBucket {
            specimen_type: specimen_type.to_string(),
            study_day,
            sequences,
        })
        .collect()
}

/// Axis label of a study day, `"<cap>+"` for the clamped bucket.
pub fn day_label(day: u32, cap: u32) -> String {
    if day >= cap {
        format!("{}+", cap)
    } else {
        day.to_string()
    }
}

pub fn write_subject_pileup(buckets: &[PileupBucket], path: &Path) -> Result<(), OutputError> {
    io::write_csv_rows(buckets, path)
}

pub fn write_earliest_detection(
    buckets: &[DetectionBucket],
    path: &Path,
) -> Result<(), OutputError> {
    io::write_csv_rows(buckets, path)
}
