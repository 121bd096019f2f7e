//! Summary figures.

pub mod plotter;

use plotters::drawing::DrawingAreaErrorKind;
use std::io;
use thiserror::Error;

pub use plotter::SummaryPlotter;

#[derive(Error, Debug)]
pub enum VisualizationError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("Plot error: {0}")]
    PlotError(String),
}

impl<E> From<DrawingAreaErrorKind<E>> for VisualizationError
where
    E: std::error::Error + Send + Sync,
{
    fn from(err: DrawingAreaErrorKind<E>) -> Self {
        VisualizationError::PlotError(err.to_string())
    }
}
