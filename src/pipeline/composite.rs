use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::error::{PipelineError, Result};
use super::grid::Grid;
use super::resample::ResampledSpectrum;
use crate::data::model::{median, MetadataValue};

/// How contributors are averaged in each bin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Weighting {
    /// Plain mean of contributors; weights only decide who contributes.
    #[default]
    Arithmetic,
    /// Inverse-variance weighted mean and scatter.
    InverseVariance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositeConfig {
    pub weighting: Weighting,
    /// Metadata column naming each member.
    pub label_column: String,
}

impl Default for CompositeConfig {
    fn default() -> Self {
        Self {
            weighting: Weighting::default(),
            label_column: "name".to_string(),
        }
    }
}

/// Mean spectrum of a set of resampled spectra.
///
/// Bins without any contributor are missing: NaN flux and RMS, zero
/// inverse variance and a count of zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompositeSpectrum {
    label: String,
    grid: Grid,
    flux: Vec<f64>,
    rms: Vec<f64>,
    ivar: Vec<f64>,
    count: Vec<u32>,
    members: Vec<String>,
    /// Median flux each member was divided by.
    scales: Vec<f64>,
    /// Per member, normalized flux minus the mean.
    residuals: Vec<Vec<f64>>,
}

impl CompositeSpectrum {
    /// Same composite under another label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn wavelengths(&self) -> Vec<f64> {
        self.grid.wavelengths()
    }

    pub fn flux(&self) -> &[f64] {
        &self.flux
    }

    pub fn rms(&self) -> &[f64] {
        &self.rms
    }

    pub fn ivar(&self) -> &[f64] {
        &self.ivar
    }

    /// Variance of the mean, NaN where nothing contributed.
    pub fn variance(&self) -> Vec<f64> {
        self.ivar
            .iter()
            .map(|&v| if v > 0.0 { 1.0 / v } else { f64::NAN })
            .collect()
    }

    /// Contributors per bin.
    pub fn count(&self) -> &[u32] {
        &self.count
    }

    pub fn members(&self) -> &[String] {
        &self.members
    }

    pub fn scales(&self) -> &[f64] {
        &self.scales
    }

    pub fn residuals(&self) -> &[Vec<f64>] {
        &self.residuals
    }

    pub fn is_missing(&self, i: usize) -> bool {
        self.count[i] == 0
    }

    /// `100 · rms / mean`; NaN where the mean is zero or missing.
    pub fn scatter_percent(&self) -> Vec<f64> {
        self.flux
            .iter()
            .zip(&self.rms)
            .map(|(&mean, &rms)| {
                if mean == 0.0 || mean.is_nan() {
                    f64::NAN
                } else {
                    100.0 * rms / mean
                }
            })
            .collect()
    }

    /// `(mean - rms, mean + rms)` per bin.
    pub fn envelope(&self) -> (Vec<f64>, Vec<f64>) {
        self.flux
            .iter()
            .zip(&self.rms)
            .map(|(m, r)| (m - r, m + r))
            .unzip()
    }

    /// Wavelengths of the first and last covered bins.
    pub fn coverage_range(&self) -> Option<(f64, f64)> {
        let first = self.count.iter().position(|&c| c > 0)?;
        let last = self.count.iter().rposition(|&c| c > 0)?;
        Some((self.grid.wavelength(first), self.grid.wavelength(last)))
    }

    /// New composite restricted to the grid points nearest `[wmin, wmax]`.
    pub fn window(&self, wmin: f64, wmax: f64) -> Result<Self> {
        let lo = self.grid.nearest_index(wmin);
        let hi = self.grid.nearest_index(wmax);
        if hi < lo {
            return Err(PipelineError::InvalidGrid(format!(
                "window [{wmin}, {wmax}] is empty"
            )));
        }
        let len = hi - lo + 1;
        let start = self.grid.wavelength(lo);
        let grid = Grid::new(
            start,
            start + len as f64 * self.grid.step(),
            self.grid.step(),
        )?;
        let range = lo..lo + grid.len();

        Ok(Self {
            label: self.label.clone(),
            grid,
            flux: self.flux[range.clone()].to_vec(),
            rms: self.rms[range.clone()].to_vec(),
            ivar: self.ivar[range.clone()].to_vec(),
            count: self.count[range.clone()].to_vec(),
            members: self.members.clone(),
            scales: self.scales.clone(),
            residuals: self
                .residuals
                .iter()
                .map(|r| r[range.clone()].to_vec())
                .collect(),
        })
    }
}

/// A member after median normalization.
struct Member {
    label: String,
    scale: f64,
    flux: Vec<f64>,
    ivar: Vec<f64>,
}

impl Member {
    fn contributes(&self, i: usize) -> bool {
        !self.flux[i].is_nan() && self.ivar[i] > 0.0
    }
}

/// Build the composite of `spectra`, which must all share one grid.
///
/// Each member is divided by its median flux over contributing bins
/// (flux present with positive weight). Members without any such bin are
/// skipped; if that leaves none, the result is [`PipelineError::NoSpectra`].
pub fn build(spectra: &[ResampledSpectrum], config: &CompositeConfig) -> Result<CompositeSpectrum> {
    let first = spectra.first().ok_or(PipelineError::NoSpectra)?;
    let grid = *first.grid();
    for (index, sp) in spectra.iter().enumerate() {
        if *sp.grid() != grid {
            return Err(PipelineError::GridMismatch {
                index,
                expected: grid,
                found: *sp.grid(),
            });
        }
    }

    let mut members = Vec::with_capacity(spectra.len());
    for (index, sp) in spectra.iter().enumerate() {
        let label = member_label(sp, index, &config.label_column);
        let values: Vec<f64> = (0..grid.len())
            .filter(|&i| sp.contributes(i))
            .map(|i| sp.flux()[i])
            .collect();
        let Some(scale) = median(values) else {
            warn!("{label}: no weighted flux on {grid}, left out of the composite");
            continue;
        };
        if scale == 0.0 {
            return Err(PipelineError::DegenerateMedian {
                index,
                median: scale,
            });
        }
        members.push(Member {
            label,
            scale,
            flux: sp.flux().iter().map(|f| f / scale).collect(),
            ivar: sp.ivar().iter().map(|v| v * scale * scale).collect(),
        });
    }
    if members.is_empty() {
        return Err(PipelineError::NoSpectra);
    }

    let n = grid.len();
    let mut flux = vec![f64::NAN; n];
    let mut rms = vec![f64::NAN; n];
    let mut ivar = vec![0.0; n];
    let mut count = vec![0u32; n];

    for i in 0..n {
        let contributors: Vec<(f64, f64)> = members
            .iter()
            .filter(|m| m.contributes(i))
            .map(|m| (m.flux[i], m.ivar[i]))
            .collect();
        if contributors.is_empty() {
            continue;
        }
        count[i] = contributors.len() as u32;
        let (mean, scatter, weight) = match config.weighting {
            Weighting::Arithmetic => arithmetic(&contributors),
            Weighting::InverseVariance => weighted(&contributors),
        };
        flux[i] = mean;
        rms[i] = scatter;
        ivar[i] = weight;
    }

    let residuals = members
        .iter()
        .map(|m| {
            (0..n)
                .map(|i| {
                    if m.contributes(i) {
                        m.flux[i] - flux[i]
                    } else {
                        f64::NAN
                    }
                })
                .collect()
        })
        .collect();

    let covered = count.iter().filter(|&&c| c > 0).count();
    info!(
        "composite of {} spectra ({} skipped) on {grid}: {covered} of {n} bins covered",
        members.len(),
        spectra.len() - members.len()
    );

    Ok(CompositeSpectrum {
        label: String::new(),
        grid,
        flux,
        rms,
        ivar,
        count,
        members: members.iter().map(|m| m.label.clone()).collect(),
        scales: members.iter().map(|m| m.scale).collect(),
        residuals,
    })
}

/// Mean, RMS and inverse variance of the mean of `(flux, ivar)` pairs.
fn arithmetic(values: &[(f64, f64)]) -> (f64, f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().map(|(f, _)| f).sum::<f64>() / n;
    let msd = values.iter().map(|(f, _)| (f - mean).powi(2)).sum::<f64>() / n;
    let variance_sum: f64 = values.iter().map(|(_, v)| 1.0 / v).sum();
    (mean, msd.sqrt(), n * n / variance_sum)
}

fn weighted(values: &[(f64, f64)]) -> (f64, f64, f64) {
    let total: f64 = values.iter().map(|(_, v)| v).sum();
    let mean = values.iter().map(|(f, v)| f * v).sum::<f64>() / total;
    let msd = values.iter().map(|(f, v)| v * (f - mean).powi(2)).sum::<f64>() / total;
    (mean, msd.sqrt(), total)
}

fn member_label(sp: &ResampledSpectrum, index: usize, column: &str) -> String {
    match sp.metadata.get(column) {
        Some(MetadataValue::Null) | None => format!("spectrum {index}"),
        Some(value) => value.to_string(),
    }
}

// ---------------------------------------------------------------------------
// CompositeSet – ordered results of one analysis run
// ---------------------------------------------------------------------------

/// Composites of one run, addressed by position.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CompositeSet {
    composites: Vec<CompositeSpectrum>,
}

impl CompositeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append and return the composite's index.
    pub fn push(&mut self, composite: CompositeSpectrum) -> usize {
        self.composites.push(composite);
        self.composites.len() - 1
    }

    pub fn get(&self, index: usize) -> Option<&CompositeSpectrum> {
        self.composites.get(index)
    }

    pub fn len(&self) -> usize {
        self.composites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.composites.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompositeSpectrum> {
        self.composites.iter()
    }

    /// `|mean_n - mean_reference|` per bin for every composite, NaN where
    /// either side is missing.
    pub fn residuals_against(&self, reference: usize) -> Result<Vec<Vec<f64>>> {
        let base = self.get(reference).ok_or_else(|| {
            PipelineError::InvalidConfig(format!(
                "no composite {reference} in a set of {}",
                self.len()
            ))
        })?;
        self.composites
            .iter()
            .enumerate()
            .map(|(index, c)| {
                if c.grid != base.grid {
                    return Err(PipelineError::GridMismatch {
                        index,
                        expected: base.grid,
                        found: c.grid,
                    });
                }
                Ok(c.flux
                    .iter()
                    .zip(&base.flux)
                    .map(|(a, b)| (a - b).abs())
                    .collect())
            })
            .collect()
    }
}

impl<'a> IntoIterator for &'a CompositeSet {
    type Item = &'a CompositeSpectrum;
    type IntoIter = std::slice::Iter<'a, CompositeSpectrum>;

    fn into_iter(self) -> Self::IntoIter {
        self.composites.iter()
    }
}
