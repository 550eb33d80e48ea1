use thiserror::Error;

use super::grid::Grid;

/// Errors raised by the normalization pipeline.
///
/// Every variant is a precondition violation on caller-provided data.
/// Missing coverage is not an error: it is carried as NaN flux and zero
/// inverse variance.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PipelineError {
    /// Wavelength outside the validity range of the extinction law.
    #[error("wavelength {wavelength} Å outside extinction law range [{min}, {max}] Å")]
    Domain { wavelength: f64, min: f64, max: f64 },

    /// Too few samples to fit a cubic spline.
    #[error("need at least {required} samples for a cubic spline, got {points}")]
    InsufficientData { points: usize, required: usize },

    /// A composite input is not on the grid of the first input.
    #[error("spectrum {index} is on grid {found}, expected {expected}")]
    GridMismatch {
        index: usize,
        expected: Grid,
        found: Grid,
    },

    #[error("invalid spectrum: {0}")]
    InvalidSpectrum(String),

    #[error("invalid grid: {0}")]
    InvalidGrid(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid redshift {0}: must be finite and greater than -1")]
    InvalidRedshift(f64),

    #[error("spectrum {index} has no usable value in metadata column '{column}'")]
    MissingMetadata { index: usize, column: String },

    #[error("cannot build a composite from zero spectra")]
    NoSpectra,

    /// Median flux is zero or not finite, so the member cannot be normalized.
    #[error("spectrum {index} has degenerate median flux {median}")]
    DegenerateMedian { index: usize, median: f64 },
}

pub type Result<T> = std::result::Result<T, PipelineError>;
