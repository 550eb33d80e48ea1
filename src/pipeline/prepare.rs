use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::error::{PipelineError, Result};
use super::extinction::{deredden, ExtinctionConfig};
use super::grid::Grid;
use super::resample::{resample, BadRegion, ResampledSpectrum};
use crate::data::model::{MetadataValue, SpectralDataset, Spectrum};

/// Metadata columns holding the catalog values a spectrum is prepared with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogColumns {
    pub redshift: String,
    /// Galactic E(B−V) along the line of sight.
    pub mw_ebv: String,
    /// Host galaxy E(B−V); no host correction when unset.
    pub host_ebv: Option<String>,
    pub name: String,
    /// Keep one spectrum per distinct value of this column.
    pub unique_by: Option<String>,
}

impl Default for CatalogColumns {
    fn default() -> Self {
        Self {
            redshift: "redshift".to_string(),
            mw_ebv: "mw_ebv".to_string(),
            host_ebv: None,
            name: "name".to_string(),
            unique_by: None,
        }
    }
}

/// Catalog values for one spectrum.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Reddening {
    pub redshift: f64,
    pub mw_ebv: f64,
    pub host_ebv: f64,
}

impl Reddening {
    /// Read the values from `spectrum`'s metadata. A missing redshift is an
    /// error, a missing color excess means no correction.
    pub fn from_metadata(
        spectrum: &Spectrum,
        index: usize,
        columns: &CatalogColumns,
    ) -> Result<Self> {
        let redshift = spectrum.metadata_f64(&columns.redshift).ok_or_else(|| {
            PipelineError::MissingMetadata {
                index,
                column: columns.redshift.clone(),
            }
        })?;
        let mw_ebv = spectrum.metadata_f64(&columns.mw_ebv).unwrap_or(0.0);
        let host_ebv = columns
            .host_ebv
            .as_deref()
            .and_then(|c| spectrum.metadata_f64(c))
            .unwrap_or(0.0);
        Ok(Self {
            redshift,
            mw_ebv,
            host_ebv,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrepareSettings {
    pub grid: Grid,
    pub extinction: ExtinctionConfig,
    pub catalog: CatalogColumns,
    /// Unreliable regions in the observed frame (telluric bands).
    pub bad_regions: Vec<BadRegion>,
    /// Reject spectra whose median signal-to-noise is below this.
    pub min_snr: Option<f64>,
}

/// Shift a spectrum to its rest frame: `λ_rest = λ_obs / (1 + z)`.
pub fn deredshift(spectrum: &Spectrum, redshift: f64) -> Result<Spectrum> {
    if !(redshift.is_finite() && redshift > -1.0) {
        return Err(PipelineError::InvalidRedshift(redshift));
    }
    let scale = 1.0 + redshift;
    let wavelength = spectrum.wavelength().iter().map(|w| w / scale).collect();
    let mut out = Spectrum::new(wavelength, spectrum.flux().to_vec(), spectrum.ivar().to_vec())?;
    out.metadata = spectrum.metadata.clone();
    Ok(out)
}

/// Deredden, deredshift and resample one spectrum.
///
/// Galactic extinction is removed in the observed frame, host extinction
/// in the rest frame. Bad regions are shifted along with the spectrum.
pub fn prepare(
    spectrum: &Spectrum,
    reddening: &Reddening,
    settings: &PrepareSettings,
) -> Result<ResampledSpectrum> {
    if let Some(min_snr) = settings.min_snr {
        let snr = spectrum.median_snr().unwrap_or(0.0);
        if snr < min_snr {
            return Err(PipelineError::InvalidSpectrum(format!(
                "median signal-to-noise {snr:.2} below {min_snr}"
            )));
        }
    }

    let observed = if reddening.mw_ebv != 0.0 {
        deredden(spectrum, reddening.mw_ebv, &settings.extinction)?
    } else {
        spectrum.clone()
    };

    let mut rest = deredshift(&observed, reddening.redshift)?;
    if reddening.host_ebv != 0.0 {
        rest = deredden(&rest, reddening.host_ebv, &settings.extinction)?;
    }

    let scale = 1.0 + reddening.redshift;
    let flagged: Vec<BadRegion> = settings
        .bad_regions
        .iter()
        .map(|r| BadRegion::new(r.start / scale, r.end / scale))
        .collect();

    resample(&rest, &settings.grid, &flagged)
}

/// Outcome of preparing a selection of a dataset.
#[derive(Debug, Default)]
pub struct PreparedBatch {
    pub spectra: Vec<ResampledSpectrum>,
    /// Dataset index of each prepared spectrum.
    pub indices: Vec<usize>,
    pub rejected: Vec<(usize, PipelineError)>,
}

impl PreparedBatch {
    pub fn is_empty(&self) -> bool {
        self.spectra.is_empty()
    }
}

/// Prepare every spectrum in `indices`. Failures are collected, not fatal.
pub fn prepare_selection(
    dataset: &SpectralDataset,
    indices: &[usize],
    settings: &PrepareSettings,
) -> PreparedBatch {
    let mut batch = PreparedBatch::default();
    for &index in indices {
        let Some(spectrum) = dataset.spectra.get(index) else {
            let err = PipelineError::InvalidConfig(format!(
                "index {index} out of range for {} spectra",
                dataset.len()
            ));
            warn!("{err}");
            batch.rejected.push((index, err));
            continue;
        };
        let result = Reddening::from_metadata(spectrum, index, &settings.catalog)
            .and_then(|reddening| prepare(spectrum, &reddening, settings));
        match result {
            Ok(prepared) => {
                debug!("prepared {}", display_name(spectrum, index, &settings.catalog));
                batch.spectra.push(prepared);
                batch.indices.push(index);
            }
            Err(err) => {
                warn!(
                    "skipping {}: {err}",
                    display_name(spectrum, index, &settings.catalog)
                );
                batch.rejected.push((index, err));
            }
        }
    }
    info!(
        "prepared {} of {} spectra ({} rejected)",
        batch.spectra.len(),
        indices.len(),
        batch.rejected.len()
    );
    batch
}

fn display_name(spectrum: &Spectrum, index: usize, catalog: &CatalogColumns) -> String {
    match spectrum.metadata.get(&catalog.name) {
        Some(MetadataValue::Null) | None => format!("spectrum {index}"),
        Some(name) => name.to_string(),
    }
}
