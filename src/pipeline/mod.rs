/// Normalization pipeline: from observed spectra to composites.
///
/// ```text
///   Spectrum (observed frame)
///        │
///        ▼
///   ┌────────────┐
///   │ extinction  │  Galactic dereddening
///   └────────────┘
///        │
///        ▼
///   ┌────────────┐
///   │  prepare    │  deredshift, host dereddening
///   └────────────┘
///        │
///        ▼
///   ┌────────────┐
///   │  resample   │  cubic spline onto a Grid → ResampledSpectrum
///   └────────────┘
///        │
///        ▼
///   ┌────────────┐
///   │  composite  │  median-normalize, average → CompositeSpectrum
///   └────────────┘
/// ```

pub mod composite;
pub mod error;
pub mod extinction;
pub mod grid;
pub mod prepare;
pub mod resample;
pub mod spline;

pub use composite::{build, CompositeConfig, CompositeSet, CompositeSpectrum, Weighting};
pub use error::{PipelineError, Result};
pub use extinction::{
    correct, deredden, extinction_curve, ExtinctionConfig, ExtinctionLaw, Fm99Variant,
};
pub use grid::Grid;
pub use prepare::{
    deredshift, prepare, prepare_selection, CatalogColumns, PrepareSettings, PreparedBatch,
    Reddening,
};
pub use resample::{resample, BadRegion, ResampledSpectrum};
