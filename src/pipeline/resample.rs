use std::collections::BTreeMap;

use log::debug;
use serde::{Deserialize, Serialize};

use super::error::{PipelineError, Result};
use super::grid::Grid;
use super::spline::{CubicSpline, MIN_POINTS};
use crate::data::model::{MetadataValue, Spectrum};

/// Open wavelength interval `(start, end)` whose samples are unreliable
/// (telluric residuals, chip gaps, clipped cosmic rays).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BadRegion {
    pub start: f64,
    pub end: f64,
}

impl BadRegion {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, wavelength: f64) -> bool {
        wavelength > self.start && wavelength < self.end
    }
}

/// A spectrum on a [`Grid`]. Missing bins have NaN flux and zero weight.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResampledSpectrum {
    grid: Grid,
    flux: Vec<f64>,
    ivar: Vec<f64>,
    pub metadata: BTreeMap<String, MetadataValue>,
}

impl ResampledSpectrum {
    /// Wrap arrays already on `grid`. Flux may hold NaN for missing bins;
    /// weights must be finite and non-negative, and are forced to zero
    /// wherever flux is missing.
    pub fn new(grid: Grid, flux: Vec<f64>, mut ivar: Vec<f64>) -> Result<Self> {
        if flux.len() != grid.len() || ivar.len() != grid.len() {
            return Err(PipelineError::InvalidSpectrum(format!(
                "grid has {} points but flux has {} and ivar {}",
                grid.len(),
                flux.len(),
                ivar.len()
            )));
        }
        if let Some(i) = flux.iter().position(|f| f.is_infinite()) {
            return Err(PipelineError::InvalidSpectrum(format!(
                "flux[{i}] is infinite"
            )));
        }
        if let Some(i) = ivar.iter().position(|v| !(v.is_finite() && *v >= 0.0)) {
            return Err(PipelineError::InvalidSpectrum(format!(
                "ivar[{i}] = {} is not a finite non-negative weight",
                ivar[i]
            )));
        }
        for (v, f) in ivar.iter_mut().zip(&flux) {
            if f.is_nan() {
                *v = 0.0;
            }
        }
        Ok(Self {
            grid,
            flux,
            ivar,
            metadata: BTreeMap::new(),
        })
    }

    pub fn with_metadata(mut self, column: &str, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(column.to_string(), value.into());
        self
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn flux(&self) -> &[f64] {
        &self.flux
    }

    pub fn ivar(&self) -> &[f64] {
        &self.ivar
    }

    /// No flux at bin `i` (outside native coverage).
    pub fn is_missing(&self, i: usize) -> bool {
        self.flux[i].is_nan()
    }

    /// Bin `i` holds a flux with positive weight.
    pub fn contributes(&self, i: usize) -> bool {
        !self.flux[i].is_nan() && self.ivar[i] > 0.0
    }

    /// Number of non-missing bins.
    pub fn coverage(&self) -> usize {
        self.flux.iter().filter(|f| !f.is_nan()).count()
    }
}

/// Resample a spectrum onto `grid`.
///
/// Flux and inverse variance each get an interpolating cubic spline over
/// the native range `[w_first, w_last]`. Grid points outside that range are
/// missing (NaN flux, zero weight). Weights are zeroed inside `flagged`
/// regions and clamped to `[0, max(bracketing native weights)]`, so spline
/// ringing can neither create negative weights nor inflate them.
pub fn resample(
    spectrum: &Spectrum,
    grid: &Grid,
    flagged: &[BadRegion],
) -> Result<ResampledSpectrum> {
    let n = spectrum.len();
    if n < MIN_POINTS {
        return Err(PipelineError::InsufficientData {
            points: n,
            required: MIN_POINTS,
        });
    }
    let wave = spectrum.wavelength();
    let native_ivar = spectrum.ivar();
    let flux_spline = CubicSpline::new(wave, spectrum.flux())?;
    let ivar_spline = CubicSpline::new(wave, native_ivar)?;
    let (lower, upper) = flux_spline.domain();

    let mut flux = Vec::with_capacity(grid.len());
    let mut ivar = Vec::with_capacity(grid.len());
    for i in 0..grid.len() {
        let w = grid.wavelength(i);
        if w < lower || w > upper {
            flux.push(f64::NAN);
            ivar.push(0.0);
            continue;
        }

        flux.push(flux_spline.evaluate(w));

        let weight = if flagged.iter().any(|r| r.contains(w)) {
            0.0
        } else {
            let upper_idx = wave.partition_point(|&x| x <= w).min(n - 1);
            let lower_idx = upper_idx.saturating_sub(1);
            let ceiling = native_ivar[lower_idx].max(native_ivar[upper_idx]);
            ivar_spline.evaluate(w).clamp(0.0, ceiling)
        };
        ivar.push(weight);
    }

    let out = ResampledSpectrum {
        grid: *grid,
        flux,
        ivar,
        metadata: spectrum.metadata.clone(),
    };
    debug!(
        "resampled {} samples over [{lower}, {upper}] Å onto {} ({} of {} bins covered)",
        n,
        grid,
        out.coverage(),
        grid.len()
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn smooth_spectrum(start: f64, end: f64, n: usize) -> Spectrum {
        let step = (end - start) / (n - 1) as f64;
        let mut wave: Vec<f64> = (0..n).map(|i| start + i as f64 * step).collect();
        wave[n - 1] = end;
        let flux = wave
            .iter()
            .map(|w| 1.0 + 0.5 * ((w - start) / 400.0).sin())
            .collect();
        Spectrum::new(wave, flux, vec![2.0; n]).unwrap()
    }

    #[test]
    fn test_output_length_matches_grid() {
        let grid = Grid::new(3000.0, 7001.0, 2.5).unwrap();
        let out = resample(&smooth_spectrum(3500.0, 6500.0, 300), &grid, &[]).unwrap();
        assert_eq!(out.flux().len(), 1600);
        assert_eq!(out.ivar().len(), 1600);
    }

    #[test]
    fn test_spectrum_on_grid_roundtrips() {
        let grid = Grid::new(4000.0, 4100.0, 2.0).unwrap();
        let wave = grid.wavelengths();
        let flux: Vec<f64> = wave.iter().map(|w| (w / 13.0).cos() + 3.0).collect();
        let ivar: Vec<f64> = wave.iter().map(|w| 1.0 + w / 4000.0).collect();
        let sp = Spectrum::new(wave, flux.clone(), ivar.clone()).unwrap();

        let out = resample(&sp, &grid, &[]).unwrap();
        assert_eq!(out.coverage(), grid.len());
        for i in 0..grid.len() {
            assert_abs_diff_eq!(out.flux()[i], flux[i], epsilon = 1e-10);
            assert_abs_diff_eq!(out.ivar()[i], ivar[i], epsilon = 1e-10);
        }
    }

    #[test]
    fn test_outside_coverage_is_missing() {
        let grid = Grid::new(3000.0, 8000.0, 10.0).unwrap();
        let out = resample(&smooth_spectrum(4000.0, 6000.0, 200), &grid, &[]).unwrap();

        let first_covered = grid.nearest_index(4000.0);
        let last_covered = grid.nearest_index(6000.0);
        for i in 0..grid.len() {
            if i < first_covered || i > last_covered {
                assert!(out.is_missing(i), "bin {i} should be missing");
                assert_eq!(out.ivar()[i], 0.0);
            } else {
                assert!(out.flux()[i].is_finite());
                assert!(out.contributes(i));
            }
        }
    }

    #[test]
    fn test_flagged_regions_get_zero_weight() {
        let grid = Grid::new(4000.0, 5000.0, 10.0).unwrap();
        let flagged = [BadRegion::new(4300.0, 4400.0)];
        let out = resample(&smooth_spectrum(4000.0, 5000.0, 101), &grid, &flagged).unwrap();
        for i in 0..grid.len() {
            let w = grid.wavelength(i);
            if w > 4300.0 && w < 4400.0 {
                assert_eq!(out.ivar()[i], 0.0);
                assert!(out.flux()[i].is_finite(), "flux is kept, only weight drops");
            } else {
                assert!(out.ivar()[i] > 0.0);
            }
        }
    }

    #[test]
    fn test_weight_ringing_is_clamped() {
        let wave: Vec<f64> = (0..7).map(|i| 5000.0 + i as f64 * 10.0).collect();
        let ivar = vec![0.0, 0.0, 0.0, 10.0, 0.0, 0.0, 0.0];
        let sp = Spectrum::new(wave.clone(), vec![1.0; 7], ivar.clone()).unwrap();

        // The raw spline dips below zero next to the spike.
        let raw = CubicSpline::new(&wave, &ivar).unwrap();
        assert!(raw.evaluate(5015.0) < 0.0);

        let grid = Grid::new(5000.0, 5061.0, 5.0).unwrap();
        let out = resample(&sp, &grid, &[]).unwrap();
        for (i, &v) in out.ivar().iter().enumerate() {
            assert!(v >= 0.0);
            assert!(v <= 10.0);
            let w = grid.wavelength(i);
            if w < 5020.0 || w > 5040.0 {
                assert_eq!(v, 0.0, "no weight between unweighted samples at {w}");
            }
        }
    }

    #[test]
    fn test_three_points_is_insufficient() {
        let sp = Spectrum::unweighted(vec![4000.0, 4001.0, 4002.0], vec![1.0; 3]).unwrap();
        let err = resample(&sp, &Grid::default(), &[]).unwrap_err();
        assert_eq!(
            err,
            PipelineError::InsufficientData {
                points: 3,
                required: 4
            }
        );
    }

    #[test]
    fn test_does_not_touch_input() {
        let sp = smooth_spectrum(4000.0, 5000.0, 50);
        let before = sp.clone();
        let _ = resample(&sp, &Grid::default(), &[BadRegion::new(4100.0, 4200.0)]).unwrap();
        assert_eq!(sp, before);
    }

    #[test]
    fn test_carries_metadata() {
        let sp = smooth_spectrum(4000.0, 5000.0, 50).with_metadata("name", "sn2005cf");
        let out = resample(&sp, &Grid::default(), &[]).unwrap();
        assert_eq!(out.metadata.get("name"), Some(&MetadataValue::from("sn2005cf")));
    }

    #[test]
    fn test_new_forces_zero_weight_on_missing_flux() {
        let grid = Grid::new(0.0, 3.0, 1.0).unwrap();
        let out = ResampledSpectrum::new(grid, vec![1.0, f64::NAN, 2.0], vec![1.0; 3]).unwrap();
        assert_eq!(out.ivar(), &[1.0, 0.0, 1.0]);
        assert!(ResampledSpectrum::new(grid, vec![1.0; 2], vec![1.0; 2]).is_err());
    }
}
