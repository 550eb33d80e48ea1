//! Interpolating cubic spline with not-a-knot end conditions.
//!
//! The spline passes through every sample and is C² continuous. Instead of
//! pinning the end second derivatives to zero (a natural spline), the third
//! derivative is required to be continuous across the second and the
//! second-to-last knots. Four samples therefore reproduce their cubic
//! exactly, and any cubic polynomial is reproduced exactly for any spacing.
//!
//! The system for the knot second derivatives `M_i` reduces to a tridiagonal
//! one over the interior knots and is solved with the Thomas algorithm.

use super::error::{PipelineError, Result};

/// Minimum number of samples for a not-a-knot cubic spline.
pub const MIN_POINTS: usize = 4;

#[derive(Debug, Clone)]
pub struct CubicSpline {
    x: Vec<f64>,
    y: Vec<f64>,
    /// Second derivative at each knot.
    m: Vec<f64>,
}

impl CubicSpline {
    /// Fit a spline through `(x[i], y[i])`.
    ///
    /// `x` must be strictly increasing and finite, `y` finite, both of the
    /// same length of at least [`MIN_POINTS`].
    pub fn new(x: &[f64], y: &[f64]) -> Result<Self> {
        if x.len() != y.len() {
            return Err(PipelineError::InvalidSpectrum(format!(
                "spline abscissa has {} values but ordinate has {}",
                x.len(),
                y.len()
            )));
        }
        if x.len() < MIN_POINTS {
            return Err(PipelineError::InsufficientData {
                points: x.len(),
                required: MIN_POINTS,
            });
        }
        if let Some(i) = x.windows(2).position(|w| !(w[1] > w[0])) {
            return Err(PipelineError::InvalidSpectrum(format!(
                "spline abscissa not strictly increasing at index {}",
                i + 1
            )));
        }
        if x.iter().chain(y).any(|v| !v.is_finite()) {
            return Err(PipelineError::InvalidSpectrum(
                "spline samples must be finite".to_string(),
            ));
        }

        let m = second_derivatives(x, y);
        Ok(Self {
            x: x.to_vec(),
            y: y.to_vec(),
            m,
        })
    }

    /// Knot range `[x_first, x_last]`.
    pub fn domain(&self) -> (f64, f64) {
        (self.x[0], self.x[self.x.len() - 1])
    }

    /// Evaluate at `x`. Outside the knot range the end polynomial is
    /// extended; callers decide whether such values are meaningful.
    pub fn evaluate(&self, x: f64) -> f64 {
        let i = self.segment(x);
        let h = self.x[i + 1] - self.x[i];
        let left = self.x[i + 1] - x;
        let right = x - self.x[i];

        self.m[i] * left.powi(3) / (6.0 * h)
            + self.m[i + 1] * right.powi(3) / (6.0 * h)
            + (self.y[i] / h - self.m[i] * h / 6.0) * left
            + (self.y[i + 1] / h - self.m[i + 1] * h / 6.0) * right
    }

    /// Index of the segment `[x_i, x_{i+1}]` used for `x`.
    fn segment(&self, x: f64) -> usize {
        let last = self.x.len() - 2;
        // First knot strictly greater than x, minus one.
        let upper = self.x.partition_point(|&k| k <= x);
        upper.saturating_sub(1).min(last)
    }
}

fn second_derivatives(x: &[f64], y: &[f64]) -> Vec<f64> {
    let n = x.len();
    let h: Vec<f64> = x.windows(2).map(|w| w[1] - w[0]).collect();

    // Unknowns M_1 ..= M_{n-2}
    let size = n - 2;
    let mut sub = vec![0.0; size];
    let mut diag = vec![0.0; size];
    let mut sup = vec![0.0; size];
    let mut rhs = vec![0.0; size];

    for k in 0..size {
        let i = k + 1;
        rhs[k] = 6.0 * ((y[i + 1] - y[i]) / h[i] - (y[i] - y[i - 1]) / h[i - 1]);
        sub[k] = h[i - 1];
        diag[k] = 2.0 * (h[i - 1] + h[i]);
        sup[k] = h[i];
    }

    // Eliminate M_0 = ((h0 + h1) M_1 - h0 M_2) / h1
    let (h0, h1) = (h[0], h[1]);
    diag[0] = (h0 + h1) * (h0 + 2.0 * h1) / h1;
    sup[0] = (h1 * h1 - h0 * h0) / h1;

    // Eliminate M_{n-1} = ((a + b) M_{n-2} - b M_{n-3}) / a
    let (a, b) = (h[n - 3], h[n - 2]);
    let last = size - 1;
    sub[last] = (a * a - b * b) / a;
    diag[last] = (a + b) * (2.0 * a + b) / a;

    let interior = solve_tridiagonal(&sub, &diag, &sup, &rhs);

    let mut m = Vec::with_capacity(n);
    m.push(((h0 + h1) * interior[0] - h0 * interior[1]) / h1);
    m.extend_from_slice(&interior);
    m.push(((a + b) * interior[last] - b * interior[last - 1]) / a);
    m
}

/// Thomas algorithm. `sub[0]` and `sup[len - 1]` are ignored.
fn solve_tridiagonal(sub: &[f64], diag: &[f64], sup: &[f64], rhs: &[f64]) -> Vec<f64> {
    let n = diag.len();
    let mut c = vec![0.0; n];
    let mut d = vec![0.0; n];

    c[0] = sup[0] / diag[0];
    d[0] = rhs[0] / diag[0];
    for i in 1..n {
        let denom = diag[i] - sub[i] * c[i - 1];
        c[i] = if i + 1 < n { sup[i] / denom } else { 0.0 };
        d[i] = (rhs[i] - sub[i] * d[i - 1]) / denom;
    }

    let mut out = vec![0.0; n];
    out[n - 1] = d[n - 1];
    for i in (0..n - 1).rev() {
        out[i] = d[i] - c[i] * out[i + 1];
    }
    out
}
