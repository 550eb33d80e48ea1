//! Supernova spectrum normalization and composite spectra.
//!
//! Observed spectra are corrected for dust extinction, shifted to the rest
//! frame, resampled onto a common wavelength grid and combined into
//! median-normalized mean spectra with per-bin scatter and coverage.
//!
//! ```no_run
//! use sn_composite::data::model::Spectrum;
//! use sn_composite::pipeline::{build, prepare, CompositeConfig, PrepareSettings, Reddening};
//!
//! # fn main() -> Result<(), sn_composite::pipeline::PipelineError> {
//! let wave: Vec<f64> = (0..2000).map(|i| 3500.0 + i as f64 * 2.0).collect();
//! let sp = Spectrum::unweighted(wave, vec![1.0; 2000])?;
//! let reddening = Reddening { redshift: 0.01, mw_ebv: 0.03, host_ebv: 0.0 };
//! let prepared = prepare(&sp, &reddening, &PrepareSettings::default())?;
//! let composite = build(&[prepared], &CompositeConfig::default())?;
//! println!("{:?}", composite.coverage_range());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod data;
pub mod export;
pub mod pipeline;
