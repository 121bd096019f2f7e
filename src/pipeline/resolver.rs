//! Discovery and pairing of a run's forward/reverse FASTQ files.

use crate::config::{PairingParams, RunConfig};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PairingError {
    #[error("Input directory {0} does not exist")]
    MissingDirectory(PathBuf),

    #[error("Run {run_id}: {forward} forward files but {reverse} reverse files")]
    CountMismatch {
        run_id: String,
        forward: usize,
        reverse: usize,
    },

    #[error("Run {run_id}: files without a mate: {files:?}")]
    Unmatched { run_id: String, files: Vec<String> },

    #[error("Run {run_id}: no read pairs found in {dir}")]
    NoPairs { run_id: String, dir: PathBuf },

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// One sequencing sample of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplePair {
    pub name: String,
    pub forward: PathBuf,
    pub reverse: PathBuf,
    pub filtered_forward: PathBuf,
    pub filtered_reverse: PathBuf,
}

/// A resolved sequencing run.
#[derive(Debug, Clone)]
pub struct Run {
    pub run_id: String,
    pub lane: String,
    /// Suffix appended to sample names in the run table.
    pub tag: String,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub filtered_dir: PathBuf,
    /// Sorted by sample name.
    pub samples: Vec<SamplePair>,
}

impl Run {
    pub fn seqtab_path(&self) -> PathBuf {
        self.output_dir.join("seqtab.json")
    }

    pub fn seqtab_csv_path(&self) -> PathBuf {
        self.output_dir.join("seqtab.csv")
    }

    pub fn filter_report_path(&self) -> PathBuf {
        self.output_dir.join("filter_report.csv")
    }

    pub fn track_path(&self) -> PathBuf {
        self.output_dir.join("track.csv")
    }
}

/// Location of a run's table under the output root, without resolving
/// its input files.
pub fn seqtab_path(out_root: &Path, run_id: &str) -> PathBuf {
    out_root.join(run_id).join("seqtab.json")
}

/// Finds and pairs the FASTQ files of a run.
///
/// Reads live in `<data_root>/<run_id>/<lane>`. A file belongs to a sample
/// when its name ends in the forward or reverse suffix; the sample name is
/// what remains once the suffix is stripped. Files ending in neither
/// suffix are ignored.
///
/// # Errors
///
/// Unless `allow_orphans` is set, differing forward and reverse counts or
/// stems without a mate are errors. A run with no pairs is always an error.
pub fn resolve_run(
    data_root: &Path,
    out_root: &Path,
    run: &RunConfig,
    pairing: &PairingParams,
) -> Result<Run, PairingError> {
    let input_dir = data_root.join(&run.run_id).join(&run.lane);
    if !input_dir.is_dir() {
        return Err(PairingError::MissingDirectory(input_dir));
    }

    let mut forward: BTreeMap<String, PathBuf> = BTreeMap::new();
    let mut reverse: BTreeMap<String, PathBuf> = BTreeMap::new();

    let entries = fs::read_dir(&input_dir).map_err(|source| PairingError::Io {
        path: input_dir.clone(),
        source,
    })?;
    for entry in entries {
        let entry = entry.map_err(|source| PairingError::Io {
            path: input_dir.clone(),
            source,
        })?;
        let path = entry.path();
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Some(stem) = file_name.strip_suffix(pairing.forward_suffix.as_str()) {
            forward.insert(stem.to_string(), path.clone());
        } else if let Some(stem) = file_name.strip_suffix(pairing.reverse_suffix.as_str()) {
            reverse.insert(stem.to_string(), path.clone());
        } else {
            debug!("Ignoring {}", path.display());
        }
    }

    let orphans: Vec<String> = forward
        .keys()
        .filter(|name| !reverse.contains_key(*name))
        .map(|name| format!("{}{}", name, pairing.forward_suffix))
        .chain(
            reverse
                .keys()
                .filter(|name| !forward.contains_key(*name))
                .map(|name| format!("{}{}", name, pairing.reverse_suffix)),
        )
        .collect();

    if !orphans.is_empty() {
        if !pairing.allow_orphans {
            if forward.len() != reverse.len() {
                return Err(PairingError::CountMismatch {
                    run_id: run.run_id.clone(),
                    forward: forward.len(),
                    reverse: reverse.len(),
                });
            }
            return Err(PairingError::Unmatched {
                run_id: run.run_id.clone(),
                files: orphans,
            });
        }
        for file in &orphans {
            warn!("Run {}: skipping {} with no mate", run.run_id, file);
        }
    }

    let output_dir = out_root.join(&run.run_id);
    let filtered_dir = output_dir.join("filtered");

    let samples: Vec<SamplePair> = forward
        .into_iter()
        .filter_map(|(name, fwd)| {
            let rev = reverse.get(&name)?.clone();
            Some(SamplePair {
                filtered_forward: filtered_dir.join(format!("{}_F_filt.fastq.gz", name)),
                filtered_reverse: filtered_dir.join(format!("{}_R_filt.fastq.gz", name)),
                forward: fwd,
                reverse: rev,
                name,
            })
        })
        .collect();

    if samples.is_empty() {
        return Err(PairingError::NoPairs {
            run_id: run.run_id.clone(),
            dir: input_dir,
        });
    }

    fs::create_dir_all(&filtered_dir).map_err(|source| PairingError::Io {
        path: filtered_dir.clone(),
        source,
    })?;

    info!(
        "Run {}: resolved {} sample pairs in {}",
        run.run_id,
        samples.len(),
        input_dir.display()
    );

    Ok(Run {
        run_id: run.run_id.clone(),
        lane: run.lane.clone(),
        tag: run.tag().to_string(),
        input_dir,
        output_dir,
        filtered_dir,
        samples,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn run_config() -> RunConfig {
        RunConfig {
            run_id: "MIRA1".to_string(),
            lane: "L001".to_string(),
            tag: None,
            mapping_file: None,
        }
    }

    fn touch(dir: &Path, names: &[&str]) {
        fs::create_dir_all(dir).unwrap();
        for name in names {
            fs::write(dir.join(name), b"").unwrap();
        }
    }

    #[test]
    fn pairs_by_sample_name() {
        let data = tempdir().unwrap();
        let out = tempdir().unwrap();
        let lane = data.path().join("MIRA1").join("L001");
        touch(
            &lane,
            &["B_2.fastq.gz", "A_1.fastq.gz", "B_1.fastq.gz", "A_2.fastq.gz", "notes.txt"],
        );

        let run = resolve_run(data.path(), out.path(), &run_config(), &PairingParams::default())
            .unwrap();

        assert_eq!(run.samples.len(), 2);
        assert_eq!(run.samples[0].name, "A");
        assert_eq!(run.samples[1].name, "B");
        for pair in &run.samples {
            assert!(pair.forward.ends_with(format!("{}_1.fastq.gz", pair.name)));
            assert!(pair.reverse.ends_with(format!("{}_2.fastq.gz", pair.name)));
        }
        assert_eq!(run.tag, "MIRA1");
        assert!(run.filtered_dir.is_dir());
        assert!(run.samples[0]
            .filtered_forward
            .ends_with("MIRA1/filtered/A_F_filt.fastq.gz"));
    }

    #[test]
    fn count_mismatch_is_an_error() {
        let data = tempdir().unwrap();
        let out = tempdir().unwrap();
        let lane = data.path().join("MIRA1").join("L001");
        touch(&lane, &["A_1.fastq.gz", "A_2.fastq.gz", "B_2.fastq.gz"]);

        let err = resolve_run(data.path(), out.path(), &run_config(), &PairingParams::default())
            .unwrap_err();
        assert!(matches!(
            err,
            PairingError::CountMismatch {
                forward: 1,
                reverse: 2,
                ..
            }
        ));
    }

    #[test]
    fn equal_counts_with_different_stems_is_an_error() {
        let data = tempdir().unwrap();
        let out = tempdir().unwrap();
        let lane = data.path().join("MIRA1").join("L001");
        touch(&lane, &["A_1.fastq.gz", "B_2.fastq.gz"]);

        let err = resolve_run(data.path(), out.path(), &run_config(), &PairingParams::default())
            .unwrap_err();
        assert!(matches!(err, PairingError::Unmatched { .. }));
    }

    #[test]
    fn orphans_skipped_when_allowed() {
        let data = tempdir().unwrap();
        let out = tempdir().unwrap();
        let lane = data.path().join("MIRA1").join("L001");
        touch(
            &lane,
            &["A_1.fastq.gz", "A_2.fastq.gz", "B_2.fastq.gz", "C_1.fastq.gz", "C_2.fastq.gz"],
        );
        let pairing = PairingParams {
            allow_orphans: true,
            ..PairingParams::default()
        };

        let run = resolve_run(data.path(), out.path(), &run_config(), &pairing).unwrap();
        let names: Vec<&str> = run.samples.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["A", "C"]);
    }

    #[test]
    fn empty_and_missing_directories() {
        let data = tempdir().unwrap();
        let out = tempdir().unwrap();

        let err = resolve_run(data.path(), out.path(), &run_config(), &PairingParams::default())
            .unwrap_err();
        assert!(matches!(err, PairingError::MissingDirectory(_)));

        touch(&data.path().join("MIRA1").join("L001"), &[]);
        let err = resolve_run(data.path(), out.path(), &run_config(), &PairingParams::default())
            .unwrap_err();
        assert!(matches!(err, PairingError::NoPairs { .. }));
    }
}
