//! TOML run configuration.
//!
//! Every section is optional and falls back to its defaults:
//!
//! ```toml
//! [grid]
//! min = 1500.0
//! max = 12000.0
//! step = 2.0
//!
//! [extinction]
//! law = "fitzpatrick99"
//! variant = "milky_way"
//! r_v = 3.1
//!
//! [composite]
//! weighting = "arithmetic"
//!
//! [catalog]
//! redshift = "redshift"
//! mw_ebv = "mw_ebv"
//! host_ebv = "host_ebv"
//! unique_by = "name"
//!
//! [quality]
//! min_snr = 5.0
//! bad_regions = [ { start = 7550.0, end = 7700.0 } ]
//!
//! [[selection]]
//! label = "low-z"
//! constraints = [ { between = { column = "redshift", min = 0.0, max = 0.02 } } ]
//! ```

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::data::filter::{Constraint, Selection};
use crate::pipeline::{
    BadRegion, CatalogColumns, CompositeConfig, ExtinctionConfig, Grid, PrepareSettings, Weighting,
};

/// Root configuration structure for a composite run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub grid: Grid,
    pub extinction: ExtinctionConfig,
    pub composite: CompositeSection,
    pub catalog: CatalogColumns,
    pub quality: QualityConfig,
    /// One composite per selection; none means a single composite of everything.
    #[serde(rename = "selection")]
    pub selections: Vec<Selection>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositeSection {
    pub weighting: Weighting,
}

/// Per-spectrum quality cuts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Minimum median signal-to-noise.
    pub min_snr: Option<f64>,
    /// Observed-frame regions given zero weight.
    pub bad_regions: Vec<BadRegion>,
}

impl RunConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_str(&content).with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Parse configuration from a TOML string.
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse TOML configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Check settings that serde cannot.
    pub fn validate(&self) -> Result<()> {
        self.extinction.validate()?;

        if let Some(snr) = self.quality.min_snr {
            if !(snr.is_finite() && snr >= 0.0) {
                bail!("quality.min_snr must be a non-negative number, got {snr}");
            }
        }
        for r in &self.quality.bad_regions {
            if !(r.start < r.end) {
                bail!("bad region [{}, {}] is empty", r.start, r.end);
            }
        }

        let mut labels = BTreeSet::new();
        for sel in &self.selections {
            if sel.label.is_empty() {
                bail!("every [[selection]] needs a label");
            }
            if !labels.insert(sel.label.as_str()) {
                bail!("duplicate selection label '{}'", sel.label);
            }
            for c in &sel.constraints {
                if let Constraint::Between { column, min, max } = c {
                    if !(min <= max) {
                        bail!(
                            "selection '{}': {column} range [{min}, {max}] is empty",
                            sel.label
                        );
                    }
                }
            }
        }
        Ok(())
    }

    pub fn prepare_settings(&self) -> PrepareSettings {
        PrepareSettings {
            grid: self.grid,
            extinction: self.extinction,
            catalog: self.catalog.clone(),
            bad_regions: self.quality.bad_regions.clone(),
            min_snr: self.quality.min_snr,
        }
    }

    pub fn composite_config(&self) -> CompositeConfig {
        CompositeConfig {
            weighting: self.composite.weighting,
            label_column: self.catalog.name.clone(),
        }
    }

    /// Configured selections, or one selecting every spectrum.
    pub fn selections(&self) -> Vec<Selection> {
        if self.selections.is_empty() {
            vec![Selection::new("all")]
        } else {
            self.selections.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{ExtinctionLaw, Fm99Variant};

    #[test]
    fn test_parse_config() {
        let toml = r#"
            [grid]
            min = 3000.0
            max = 9000.0
            step = 5.0

            [extinction]
            law = "fitzpatrick99"
            variant = "lmc2"
            r_v = 2.8

            [composite]
            weighting = "inverse_variance"

            [catalog]
            redshift = "z"
            host_ebv = "host_ebv"
            unique_by = "name"

            [quality]
            min_snr = 5.0
            bad_regions = [ { start = 7550.0, end = 7700.0 } ]

            [[selection]]
            label = "low-z"
            constraints = [ { between = { column = "z", min = 0.0, max = 0.02 } } ]

            [[selection]]
            label = "early"
            constraints = [ { one_of = { column = "morph", values = ["E", "S0"] } } ]
        "#;

        let config = RunConfig::from_str(toml).unwrap();
        assert_eq!(config.grid, Grid::new(3000.0, 9000.0, 5.0).unwrap());
        assert_eq!(config.extinction.variant, Fm99Variant::Lmc2);
        assert_eq!(config.extinction.r_v, 2.8);
        assert_eq!(config.composite.weighting, Weighting::InverseVariance);
        assert_eq!(config.catalog.redshift, "z");
        assert_eq!(config.catalog.mw_ebv, "mw_ebv");
        assert_eq!(config.catalog.host_ebv.as_deref(), Some("host_ebv"));
        assert_eq!(config.quality.bad_regions, vec![BadRegion::new(7550.0, 7700.0)]);
        assert_eq!(config.selections.len(), 2);
        assert_eq!(config.selections[1].label, "early");

        let settings = config.prepare_settings();
        assert_eq!(settings.min_snr, Some(5.0));
        assert_eq!(settings.grid.len(), 1200);
    }

    #[test]
    fn test_partial_config() {
        let toml = r#"
            [extinction]
            law = "cardelli89"
        "#;

        let config = RunConfig::from_str(toml).unwrap();
        assert_eq!(config.extinction.law, ExtinctionLaw::Cardelli89);
        assert_eq!(config.extinction.r_v, 3.1);
        assert_eq!(config.grid, Grid::default());
    }

    #[test]
    fn test_empty_config() {
        let config = RunConfig::from_str("").unwrap();
        assert_eq!(config, RunConfig::default());
        assert_eq!(config.composite_config(), CompositeConfig::default());
        let selections = config.selections();
        assert_eq!(selections.len(), 1);
        assert!(selections[0].constraints.is_empty());
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(RunConfig::from_str("[grid]\nmin = 10.0\nmax = 5.0\nstep = 1.0").is_err());
        assert!(RunConfig::from_str("[extinction]\nr_v = -1.0").is_err());
        assert!(RunConfig::from_str("[extinction]\nlaw = \"calzetti\"").is_err());
        assert!(RunConfig::from_str("[quality]\nmin_snr = -2.0").is_err());
        assert!(RunConfig::from_str(
            "[[selection]]\nlabel = \"a\"\n[[selection]]\nlabel = \"a\""
        )
        .is_err());
        assert!(RunConfig::from_str(
            "[[selection]]\nlabel = \"a\"\n\
             constraints = [ { between = { column = \"z\", min = 1.0, max = 0.0 } } ]"
        )
        .is_err());
    }
}
