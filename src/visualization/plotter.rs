use std::path::{Path, PathBuf};

use log::info;
use plotters::coord::ranged1d::SegmentValue;
use plotters::prelude::*;

use crate::config::SummaryParams;
use crate::stats::{day_label, DetectionBucket, PileupBucket};
use crate::visualization::VisualizationError;

/// One bar of a facet: its axis label and height.
type Bar = (String, usize);

/// Renders the summary bar charts as fixed-size SVG files.
pub struct SummaryPlotter {
    output_dir: PathBuf,
    width: u32,
    height: u32,
}

impl SummaryPlotter {
    pub fn new(output_dir: &Path, width: u32, height: u32) -> Result<Self, VisualizationError> {
        std::fs::create_dir_all(output_dir)?;
        Ok(SummaryPlotter {
            output_dir: output_dir.to_path_buf(),
            width,
            height,
        })
    }

    /// Draws the four summary figures and returns their paths.
    ///
    /// # Arguments
    ///
    /// * `pileup` - Subject-pileup buckets.
    /// * `detection` - Earliest-detection buckets, days already clamped.
    /// * `params` - Specimen types (one facet each), cutoffs and y ranges.
    pub fn render_all(
        &self,
        pileup: &[PileupBucket],
        detection: &[DetectionBucket],
        params: &SummaryParams,
    ) -> Result<Vec<PathBuf>, VisualizationError> {
        let cutoff = params.subject_cutoff as usize;
        let cap = params.study_day_cap;

        let pileup_bars = |min_subjects: usize| -> Vec<(String, Vec<Bar>)> {
            facet(&params.specimen_types, |specimen_type| {
                pileup
                    .iter()
                    .filter(|b| b.specimen_type == specimen_type && b.subjects >= min_subjects)
                    .map(|b| (b.subjects.to_string(), b.sequences))
                    .collect()
            })
        };
        let detection_bars = |min_day: u32| -> Vec<(String, Vec<Bar>)> {
            facet(&params.specimen_types, |specimen_type| {
                detection
                    .iter()
                    .filter(|b| b.specimen_type == specimen_type && b.study_day >= min_day)
                    .map(|b| (day_label(b.study_day, cap), b.sequences))
                    .collect()
            })
        };

        let paths = vec![
            self.draw_faceted(
                "subject_pileup_all.svg",
                "Sequences by number of subjects carrying them",
                "Subjects",
                &pileup_bars(1),
                params.subject_pileup_y_max,
            )?,
            self.draw_faceted(
                "subject_pileup_over_cutoff.svg",
                &format!("Sequences carried by more than {} subjects", cutoff),
                "Subjects",
                &pileup_bars(cutoff + 1),
                params.subject_pileup_cutoff_y_max,
            )?,
            self.draw_faceted(
                "earliest_detection_all.svg",
                "Earliest detection day per sequence",
                "Study day",
                &detection_bars(0),
                params.earliest_detection_y_max,
            )?,
            self.draw_faceted(
                "earliest_detection_after_day0.svg",
                "Earliest detection day per sequence, excluding day 0",
                "Study day",
                &detection_bars(1),
                params.earliest_detection_late_y_max,
            )?,
        ];

        info!(
            "Wrote {} summary figures to {}",
            paths.len(),
            self.output_dir.display()
        );
        Ok(paths)
    }

    /// Draws one bar chart per facet side by side, all sharing the y range.
    fn draw_faceted(
        &self,
        file_name: &str,
        title: &str,
        x_desc: &str,
        facets: &[(String, Vec<Bar>)],
        y_max: u64,
    ) -> Result<PathBuf, VisualizationError> {
        let output_file = self.output_dir.join(file_name);
        let y_max = usize::try_from(y_max).unwrap_or(usize::MAX).max(1);

        let svg_path = output_file.clone();
        let root = SVGBackend::new(&svg_path, (self.width, self.height)).into_drawing_area();
        root.fill(&WHITE)?;
        let root = root.titled(title, ("sans-serif", 24))?;

        let panels = root.split_evenly((1, facets.len().max(1)));
        for (panel, (specimen_type, bars)) in panels.iter().zip(facets) {
            let n = bars.len().max(1);
            let mut chart = ChartBuilder::on(panel)
                .caption(specimen_type, ("sans-serif", 18))
                .margin(10)
                .x_label_area_size(35)
                .y_label_area_size(50)
                .build_cartesian_2d((0..n).into_segmented(), 0..y_max)?;

            let label = |v: &SegmentValue<usize>| match v {
                SegmentValue::CenterOf(i) => bars.get(*i).map(|b| b.0.clone()).unwrap_or_default(),
                _ => String::new(),
            };
            chart
                .configure_mesh()
                .disable_x_mesh()
                .x_labels(n + 2)
                .x_label_formatter(&label)
                .x_desc(x_desc)
                .y_desc("Sequences")
                .draw()?;

            chart.draw_series(
                Histogram::vertical(&chart)
                    .style(BLUE.mix(0.7).filled())
                    .margin(2)
                    .data(bars.iter().enumerate().map(|(i, b)| (i, b.1.min(y_max)))),
            )?;
        }

        root.present()?;
        Ok(output_file)
    }
}

fn facet<F>(specimen_types: &[String], bars: F) -> Vec<(String, Vec<Bar>)>
where
    F: Fn(&str) -> Vec<Bar>,
{
    specimen_types
        .iter()
        .map(|t| (t.clone(), bars(t)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_render_all_writes_four_figures() {
        let dir = tempdir().unwrap();
        let params = SummaryParams::default();
        let plotter = SummaryPlotter::new(&dir.path().join("figures"), 600, 300).unwrap();

        let pileup = vec![
            PileupBucket {
                specimen_type: "sputum".to_string(),
                subjects: 1,
                sequences: 40,
            },
            PileupBucket {
                specimen_type: "sputum".to_string(),
                subjects: 12,
                sequences: 3,
            },
        ];
        let detection = vec![
            DetectionBucket {
                specimen_type: "oral_swab".to_string(),
                study_day: 0,
                sequences: 25,
            },
            DetectionBucket {
                specimen_type: "oral_swab".to_string(),
                study_day: 200,
                sequences: 4,
            },
        ];

        let paths = plotter.render_all(&pileup, &detection, &params).unwrap();
        assert_eq!(paths.len(), 4);
        assert_eq!(paths[0], dir.path().join("figures").join("subject_pileup_all.svg"));
        assert_eq!(
            paths[3],
            dir.path().join("figures").join("earliest_detection_after_day0.svg")
        );
        for path in &paths {
            assert!(fs::metadata(path).unwrap().len() > 0);
        }
        let late = fs::read_to_string(&paths[2]).unwrap();
        assert!(late.contains("200+"));
    }

    #[test]
    fn test_empty_inputs_still_render() {
        let dir = tempdir().unwrap();
        let plotter = SummaryPlotter::new(dir.path(), 400, 200).unwrap();
        let paths = plotter
            .render_all(&[], &[], &SummaryParams::default())
            .unwrap();
        assert!(paths.iter().all(|p| p.exists()));
    }
}
