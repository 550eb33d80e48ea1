use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::{PipelineError, Result};

/// Default lower bound of the rest-frame grid (Å).
pub const DEFAULT_MIN: f64 = 1500.0;
/// Default upper bound of the rest-frame grid (Å), exclusive.
pub const DEFAULT_MAX: f64 = 12000.0;
/// Default pixel size (Å).
pub const DEFAULT_STEP: f64 = 2.0;
/// Largest number of points a grid may have.
pub const MAX_POINTS: usize = 10_000_000;

/// A fixed-step ascending wavelength axis.
///
/// Points are `min + i * step` for `i in 0..len()`, with
/// `len() == floor((max - min) / step)`; `max` itself is never a grid point
/// unless the ratio leaves a remainder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GridSpec")]
pub struct Grid {
    min: f64,
    max: f64,
    step: f64,
    #[serde(skip_serializing)]
    len: usize,
}

/// Unvalidated `(min, max, step)` as found in configuration files.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct GridSpec {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl Default for GridSpec {
    fn default() -> Self {
        Self {
            min: DEFAULT_MIN,
            max: DEFAULT_MAX,
            step: DEFAULT_STEP,
        }
    }
}

impl TryFrom<GridSpec> for Grid {
    type Error = PipelineError;

    fn try_from(raw: GridSpec) -> Result<Self> {
        Grid::new(raw.min, raw.max, raw.step)
    }
}

impl Default for Grid {
    fn default() -> Self {
        Self {
            min: DEFAULT_MIN,
            max: DEFAULT_MAX,
            step: DEFAULT_STEP,
            len: point_count(DEFAULT_MIN, DEFAULT_MAX, DEFAULT_STEP),
        }
    }
}

impl fmt::Display for Grid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}) step {}", self.min, self.max, self.step)
    }
}

impl Grid {
    pub fn new(min: f64, max: f64, step: f64) -> Result<Self> {
        if !(min.is_finite() && max.is_finite() && step.is_finite()) {
            return Err(PipelineError::InvalidGrid(format!(
                "bounds and step must be finite (min={min}, max={max}, step={step})"
            )));
        }
        if step <= 0.0 {
            return Err(PipelineError::InvalidGrid(format!(
                "step must be positive, got {step}"
            )));
        }
        if max <= min {
            return Err(PipelineError::InvalidGrid(format!(
                "max ({max}) must exceed min ({min})"
            )));
        }
        if (max - min) / step > MAX_POINTS as f64 {
            return Err(PipelineError::InvalidGrid(format!(
                "[{min}, {max}) with step {step} exceeds {MAX_POINTS} points"
            )));
        }
        let len = point_count(min, max, step);
        if len == 0 {
            return Err(PipelineError::InvalidGrid(format!(
                "step {step} is wider than the range [{min}, {max})"
            )));
        }
        Ok(Self {
            min,
            max,
            step,
            len,
        })
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    /// Number of grid points.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Wavelength of grid point `i`.
    pub fn wavelength(&self, i: usize) -> f64 {
        self.min + i as f64 * self.step
    }

    /// All grid wavelengths in ascending order.
    pub fn wavelengths(&self) -> Vec<f64> {
        (0..self.len).map(|i| self.wavelength(i)).collect()
    }

    /// Index of the grid point closest to `wavelength`, clamped to the grid.
    pub fn nearest_index(&self, wavelength: f64) -> usize {
        let pos = ((wavelength - self.min) / self.step).round();
        if pos.is_nan() || pos <= 0.0 {
            0
        } else {
            (pos as usize).min(self.len - 1)
        }
    }
}

/// `floor((max - min) / step)`, except that a ratio within rounding noise of
/// an integer counts as that integer (0.3 / 0.1 is three steps, not two).
fn point_count(min: f64, max: f64, step: f64) -> usize {
    let ratio = (max - min) / step;
    let nearest = ratio.round();
    if (ratio - nearest).abs() <= 1e-9 * nearest.max(1.0) {
        nearest as usize
    } else {
        ratio.floor() as usize
    }
}
