use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::pipeline::error::{PipelineError, Result};

// ---------------------------------------------------------------------------
// MetadataValue – a single cell in a metadata column
// ---------------------------------------------------------------------------

/// A dynamically-typed catalog value (redshift, phase, morphology, name...).
/// Using `BTreeMap` / `BTreeSet` downstream so `MetadataValue` must be `Ord`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

// -- Manual Eq/Ord so we can put MetadataValue in BTreeSet --

impl Eq for MetadataValue {}

impl PartialOrd for MetadataValue {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MetadataValue {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use MetadataValue::*;
        fn discriminant(v: &MetadataValue) -> u8 {
            match v {
                Null => 0,
                Bool(_) => 1,
                Integer(_) => 2,
                Float(_) => 3,
                String(_) => 4,
            }
        }
        let da = discriminant(self);
        let db = discriminant(other);
        if da != db {
            return da.cmp(&db);
        }
        match (self, other) {
            (Null, Null) => std::cmp::Ordering::Equal,
            (Bool(a), Bool(b)) => a.cmp(b),
            (Integer(a), Integer(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (String(a), String(b)) => a.cmp(b),
            _ => std::cmp::Ordering::Equal,
        }
    }
}

impl std::hash::Hash for MetadataValue {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            MetadataValue::String(s) => s.hash(state),
            MetadataValue::Integer(i) => i.hash(state),
            MetadataValue::Float(f) => f.to_bits().hash(state),
            MetadataValue::Bool(b) => b.hash(state),
            MetadataValue::Null => {}
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::String(s) => write!(f, "{s}"),
            MetadataValue::Integer(i) => write!(f, "{i}"),
            MetadataValue::Float(v) => write!(f, "{v:.4}"),
            MetadataValue::Bool(b) => write!(f, "{b}"),
            MetadataValue::Null => write!(f, "<null>"),
        }
    }
}

impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self {
        MetadataValue::Float(v)
    }
}

impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        MetadataValue::Integer(v)
    }
}

impl From<bool> for MetadataValue {
    fn from(v: bool) -> Self {
        MetadataValue::Bool(v)
    }
}

impl From<&str> for MetadataValue {
    fn from(v: &str) -> Self {
        MetadataValue::String(v.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(v: String) -> Self {
        MetadataValue::String(v)
    }
}

impl MetadataValue {
    /// Try to interpret the value as an `f64` for range selections.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetadataValue::Float(v) => Some(*v),
            MetadataValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Spectrum – one observed spectrum with its catalog row
// ---------------------------------------------------------------------------

/// A single spectrum: wavelength (Å, strictly increasing), flux and inverse
/// variance, all of the same length.
///
/// Inverse variance is non-negative; zero means the sample carries no
/// information. Every constructor validates these invariants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSpectrum")]
pub struct Spectrum {
    wavelength: Vec<f64>,
    flux: Vec<f64>,
    ivar: Vec<f64>,
    /// Dynamic metadata columns: column_name → value.
    pub metadata: BTreeMap<String, MetadataValue>,
}

/// Serialized form of [`Spectrum`] before validation.
#[derive(Debug, Clone, Deserialize)]
pub struct RawSpectrum {
    pub wavelength: Vec<f64>,
    pub flux: Vec<f64>,
    /// Missing inverse variance means uniform weights.
    #[serde(default)]
    pub ivar: Option<Vec<f64>>,
    #[serde(default)]
    pub metadata: BTreeMap<String, MetadataValue>,
}

impl TryFrom<RawSpectrum> for Spectrum {
    type Error = PipelineError;

    fn try_from(raw: RawSpectrum) -> Result<Self> {
        let ivar = raw.ivar.unwrap_or_else(|| vec![1.0; raw.flux.len()]);
        let mut spectrum = Spectrum::new(raw.wavelength, raw.flux, ivar)?;
        spectrum.metadata = raw.metadata;
        Ok(spectrum)
    }
}

impl Spectrum {
    pub fn new(wavelength: Vec<f64>, flux: Vec<f64>, ivar: Vec<f64>) -> Result<Self> {
        if wavelength.len() != flux.len() || wavelength.len() != ivar.len() {
            return Err(PipelineError::InvalidSpectrum(format!(
                "wavelength has {} values, flux {}, ivar {}",
                wavelength.len(),
                flux.len(),
                ivar.len()
            )));
        }
        if let Some(i) = wavelength.iter().position(|w| !w.is_finite()) {
            return Err(PipelineError::InvalidSpectrum(format!(
                "wavelength[{i}] is not finite"
            )));
        }
        if let Some(i) = wavelength.windows(2).position(|w| w[1] <= w[0]) {
            return Err(PipelineError::InvalidSpectrum(format!(
                "wavelength not strictly increasing at index {}",
                i + 1
            )));
        }
        if let Some(i) = flux.iter().position(|f| !f.is_finite()) {
            return Err(PipelineError::InvalidSpectrum(format!(
                "flux[{i}] is not finite"
            )));
        }
        if let Some(i) = ivar.iter().position(|v| !(v.is_finite() && *v >= 0.0)) {
            return Err(PipelineError::InvalidSpectrum(format!(
                "ivar[{i}] = {} is not a finite non-negative weight",
                ivar[i]
            )));
        }
        Ok(Self {
            wavelength,
            flux,
            ivar,
            metadata: BTreeMap::new(),
        })
    }

    /// Build from 1-sigma uncertainties. Non-positive or non-finite sigmas
    /// get zero weight.
    pub fn from_errors(wavelength: Vec<f64>, flux: Vec<f64>, sigma: Vec<f64>) -> Result<Self> {
        let ivar = sigma
            .iter()
            .map(|&s| {
                if s.is_finite() && s > 0.0 {
                    1.0 / (s * s)
                } else {
                    0.0
                }
            })
            .collect();
        Self::new(wavelength, flux, ivar)
    }

    /// Build with unit weight on every sample.
    pub fn unweighted(wavelength: Vec<f64>, flux: Vec<f64>) -> Result<Self> {
        let ivar = vec![1.0; flux.len()];
        Self::new(wavelength, flux, ivar)
    }

    /// Attach a metadata column.
    pub fn with_metadata(mut self, column: &str, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(column.to_string(), value.into());
        self
    }

    pub fn wavelength(&self) -> &[f64] {
        &self.wavelength
    }

    pub fn flux(&self) -> &[f64] {
        &self.flux
    }

    pub fn ivar(&self) -> &[f64] {
        &self.ivar
    }

    pub fn len(&self) -> usize {
        self.wavelength.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wavelength.is_empty()
    }

    /// Numeric value of a metadata column, if present and numeric.
    pub fn metadata_f64(&self, column: &str) -> Option<f64> {
        self.metadata.get(column).and_then(MetadataValue::as_f64)
    }

    /// Median signal-to-noise ratio `flux * sqrt(ivar)` over weighted samples.
    pub fn median_snr(&self) -> Option<f64> {
        let snr: Vec<f64> = self
            .flux
            .iter()
            .zip(&self.ivar)
            .filter(|&(_, &w)| w > 0.0)
            .map(|(&f, &w)| f * w.sqrt())
            .collect();
        median(snr)
    }
}

/// Median of finite values, `None` if there are none.
pub fn median(mut values: Vec<f64>) -> Option<f64> {
    values.retain(|v| v.is_finite());
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some(0.5 * (values[mid - 1] + values[mid]))
    } else {
        Some(values[mid])
    }
}

// ---------------------------------------------------------------------------
// SpectralDataset – the complete catalog handed over by the caller
// ---------------------------------------------------------------------------

/// All spectra with pre-computed column indices.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "DatasetFile", into = "DatasetFile")]
pub struct SpectralDataset {
    /// All spectra (rows).
    pub spectra: Vec<Spectrum>,
    /// Ordered list of metadata column names.
    pub column_names: Vec<String>,
    /// For each metadata column the sorted set of unique values.
    pub unique_values: BTreeMap<String, BTreeSet<MetadataValue>>,
}

/// On-disk form: only the spectra, indices are rebuilt on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetFile {
    pub spectra: Vec<Spectrum>,
}

impl From<DatasetFile> for SpectralDataset {
    fn from(file: DatasetFile) -> Self {
        SpectralDataset::from_spectra(file.spectra)
    }
}

impl From<SpectralDataset> for DatasetFile {
    fn from(dataset: SpectralDataset) -> Self {
        DatasetFile {
            spectra: dataset.spectra,
        }
    }
}

impl SpectralDataset {
    /// Build column indices from the spectra.
    pub fn from_spectra(spectra: Vec<Spectrum>) -> Self {
        let mut column_names_set: BTreeSet<String> = BTreeSet::new();
        let mut unique_values: BTreeMap<String, BTreeSet<MetadataValue>> = BTreeMap::new();

        for sp in &spectra {
            for (col, val) in &sp.metadata {
                column_names_set.insert(col.clone());
                unique_values
                    .entry(col.clone())
                    .or_default()
                    .insert(val.clone());
            }
        }
        let column_names: Vec<String> = column_names_set.into_iter().collect();
        SpectralDataset {
            spectra,
            column_names,
            unique_values,
        }
    }

    /// Number of spectra.
    pub fn len(&self) -> usize {
        self.spectra.len()
    }

    /// Whether the dataset is empty.
    pub fn is_empty(&self) -> bool {
        self.spectra.is_empty()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.unique_values.contains_key(column)
    }
}
