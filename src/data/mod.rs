/// Data layer: core types and catalog selection.
///
/// Architecture:
/// ```text
///   dataset .json
///        │
///        ▼
///   ┌────────────────┐
///   │ SpectralDataset │  Vec<Spectrum>, column index
///   └────────────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  filter   │  metadata constraints → selected indices
///   └──────────┘
/// ```

pub mod filter;
pub mod model;
