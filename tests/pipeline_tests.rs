//! End-to-end tests of the normalization pipeline
//!
//! - Preparation recovers a known rest-frame spectrum
//! - Composites of prepared spectra
//! - Dataset selection through to a `CompositeSet`
//! - Property-based checks of grid, resampling and extinction invariants

use approx::assert_abs_diff_eq;

use sn_composite::data::filter::{filtered_indices, unique_by, Constraint, Selection};
use sn_composite::data::model::{SpectralDataset, Spectrum};
use sn_composite::pipeline::{
    build, correct, prepare, prepare_selection, resample, CompositeConfig, CompositeSet,
    ExtinctionConfig, Grid, PipelineError, PrepareSettings, Reddening, ResampledSpectrum,
};

// ============================================================================
// Helper Functions
// ============================================================================

fn rest_flux(w: f64) -> f64 {
    1.0 + 0.3 * (w / 300.0).sin()
}

/// Observed spectrum of `rest_flux` scaled by `brightness`, redshifted by
/// `z` and reddened by Galactic `mw_ebv`.
fn observed(rest_start: f64, rest_end: f64, z: f64, mw_ebv: f64, brightness: f64) -> Spectrum {
    let n = ((rest_end - rest_start) / 2.0) as usize + 1;
    let rest: Vec<f64> = (0..n).map(|i| rest_start + i as f64 * 2.0).collect();
    let wave: Vec<f64> = rest.iter().map(|w| w * (1.0 + z)).collect();
    let dimming = correct(&wave, -mw_ebv, &ExtinctionConfig::default()).unwrap();
    let flux = rest
        .iter()
        .zip(&dimming)
        .map(|(w, d)| brightness * rest_flux(*w) * d)
        .collect();
    Spectrum::new(wave, flux, vec![1.0; n])
        .unwrap()
        .with_metadata("redshift", z)
        .with_metadata("mw_ebv", mw_ebv)
}

fn settings() -> PrepareSettings {
    PrepareSettings {
        // No grid point falls on a coverage edge
        grid: Grid::new(3002.5, 8002.5, 5.0).unwrap(),
        ..PrepareSettings::default()
    }
}

// ============================================================================
// Preparation
// ============================================================================

#[test]
fn test_prepare_recovers_rest_frame_flux() {
    let sp = observed(3500.0, 7500.0, 0.03, 0.12, 1.0);
    let reddening = Reddening {
        redshift: 0.03,
        mw_ebv: 0.12,
        host_ebv: 0.0,
    };
    let out = prepare(&sp, &reddening, &settings()).unwrap();
    let grid = out.grid();

    for i in 0..grid.len() {
        let w = grid.wavelength(i);
        if w < 3495.0 || w > 7505.0 {
            assert!(out.is_missing(i), "{w} should be outside coverage");
        } else if w > 3510.0 && w < 7490.0 {
            assert_abs_diff_eq!(out.flux()[i], rest_flux(w), epsilon = 1e-5);
        }
    }
}

#[test]
fn test_composite_of_prepared_spectra() {
    let settings = settings();
    let inputs = [
        (0.01, 0.05, 1.0),
        (0.02, 0.10, 7.5),
        (0.035, 0.02, 0.3),
    ];
    let prepared: Vec<_> = inputs
        .iter()
        .map(|&(z, ebv, brightness)| {
            let sp = observed(3600.0, 7400.0, z, ebv, brightness);
            let reddening = Reddening {
                redshift: z,
                mw_ebv: ebv,
                host_ebv: 0.0,
            };
            prepare(&sp, &reddening, &settings).unwrap()
        })
        .collect();

    let composite = build(&prepared, &CompositeConfig::default()).unwrap();
    for i in 0..composite.grid().len() {
        let w = composite.grid().wavelength(i);
        if w > 3620.0 && w < 7380.0 {
            assert_eq!(composite.count()[i], 3);
            assert!(composite.rms()[i] < 1e-4, "rms {} at {w}", composite.rms()[i]);
            assert!(composite.scatter_percent()[i] < 1e-2);
        }
        if w < 3590.0 || w > 7410.0 {
            assert_eq!(composite.count()[i], 0);
            assert!(composite.flux()[i].is_nan());
        }
    }
    // brightness differences are removed by the per-member medians
    let scales = composite.scales();
    assert_abs_diff_eq!(scales[1] / scales[0], 7.5, epsilon = 1e-3);
}

#[test]
fn test_disjoint_halves_composite() {
    let grid = Grid::new(4000.0, 6000.0, 10.0).unwrap();
    let blue = Spectrum::new(
        (0..101).map(|i| 3995.0 + i as f64 * 10.0).collect(),
        vec![2.0; 101],
        vec![1.0; 101],
    )
    .unwrap();
    let red = Spectrum::new(
        (0..101).map(|i| 4995.0 + i as f64 * 10.0).collect(),
        vec![5.0; 101],
        vec![1.0; 101],
    )
    .unwrap();

    let a = resample(&blue, &grid, &[]).unwrap();
    let b = resample(&red, &grid, &[]).unwrap();
    let composite = build(&[a, b], &CompositeConfig::default()).unwrap();

    for i in 0..grid.len() {
        assert_eq!(composite.count()[i], 1, "bin {i}");
        assert_abs_diff_eq!(composite.flux()[i], 1.0, epsilon = 1e-12);
        assert_eq!(composite.rms()[i], 0.0);
    }
}

#[test]
fn test_three_point_spectrum_is_rejected() {
    let sp = Spectrum::unweighted(vec![4000.0, 4002.0, 4004.0], vec![1.0; 3]).unwrap();
    assert!(matches!(
        prepare(&sp, &Reddening::default(), &settings()),
        Err(PipelineError::InsufficientData { points: 3, required: 4 })
    ));
}

#[test]
fn test_below_fm99_range_is_domain_error() {
    let wave: Vec<f64> = (0..100).map(|i| 850.0 + i as f64 * 5.0).collect();
    let sp = Spectrum::unweighted(wave, vec![1.0; 100]).unwrap();
    let reddening = Reddening {
        redshift: 0.0,
        mw_ebv: 0.1,
        host_ebv: 0.0,
    };
    assert!(matches!(
        prepare(&sp, &reddening, &settings()),
        Err(PipelineError::Domain { .. })
    ));
}

// ============================================================================
// Dataset to CompositeSet
// ============================================================================

fn dataset() -> SpectralDataset {
    let named = |name: &str, z: f64, phase: f64, brightness: f64| {
        observed(3600.0, 7400.0, z, 0.05, brightness)
            .with_metadata("name", name)
            .with_metadata("phase", phase)
    };
    SpectralDataset::from_spectra(vec![
        named("sn2011fe", 0.001, -2.0, 1.0),
        named("sn2011fe", 0.001, 5.0, 1.1),
        named("sn1994d", 0.002, 1.0, 0.5),
        named("sn2005cf", 0.006, 12.0, 2.0),
        named("sn2002bo", 0.004, 15.0, 3.0),
    ])
}

#[test]
fn test_selections_to_composite_set() {
    let ds = dataset();
    let settings = settings();
    let config = CompositeConfig::default();

    let selections = [
        Selection::new("near max").with(Constraint::between("phase", -5.0, 5.0)),
        Selection::new("post max").with(Constraint::between("phase", 10.0, 20.0)),
    ];

    let mut set = CompositeSet::new();
    for sel in &selections {
        let indices = unique_by(&ds, &filtered_indices(&ds, sel), "name");
        let batch = prepare_selection(&ds, &indices, &settings);
        assert!(batch.rejected.is_empty());
        let composite = build(&batch.spectra, &config).unwrap().with_label(sel.label.as_str());
        set.push(composite);
    }

    assert_eq!(set.len(), 2);
    let near = set.get(0).unwrap();
    assert_eq!(near.label(), "near max");
    assert_eq!(near.members(), &["sn2011fe".to_string(), "sn1994d".to_string()]);
    assert_eq!(set.get(1).unwrap().members().len(), 2);

    // Same rest-frame shape, so the composites agree
    let residuals = set.residuals_against(0).unwrap();
    let covered: Vec<f64> = residuals[1].iter().copied().filter(|r| !r.is_nan()).collect();
    assert!(!covered.is_empty());
    assert!(covered.iter().all(|&r| r < 1e-4));
}

#[test]
fn test_dataset_json_roundtrip() {
    let json = r#"{
        "spectra": [
            {
                "wavelength": [4000.0, 4001.0, 4002.0, 4003.0],
                "flux": [1.0, 1.1, 1.2, 1.3],
                "metadata": {"name": "sn2011fe", "redshift": 0.0008, "carbon": true}
            },
            {
                "wavelength": [4000.0, 4001.0, 4002.0, 4003.0],
                "flux": [1.0, 1.1, 1.2, 1.3],
                "ivar": [4.0, 4.0, 0.0, 4.0],
                "metadata": {"name": "sn1994d"}
            }
        ]
    }"#;
    let ds: SpectralDataset = serde_json::from_str(json).unwrap();
    assert_eq!(ds.len(), 2);
    assert_eq!(ds.spectra[0].ivar(), &[1.0; 4]);
    assert_eq!(ds.spectra[1].ivar()[2], 0.0);
    assert_eq!(ds.column_names, vec!["carbon", "name", "redshift"]);
    assert!(ds.has_column("carbon"));

    let back = serde_json::to_string(&ds).unwrap();
    let again: SpectralDataset = serde_json::from_str(&back).unwrap();
    assert_eq!(again.spectra, ds.spectra);
}

#[test]
fn test_dataset_json_validates_spectra() {
    let json = r#"{"spectra": [{"wavelength": [4001.0, 4000.0], "flux": [1.0, 1.0]}]}"#;
    assert!(serde_json::from_str::<SpectralDataset>(json).is_err());
}

// ============================================================================
// Property-Based Tests
// ============================================================================

mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Grid length is floor((max - min) / step)
        #[test]
        fn test_grid_length(
            min in 500.0f64..5000.0,
            step in prop::sample::select(vec![0.5, 1.0, 2.0, 2.5, 5.0, 10.0]),
            n in 1usize..3000,
            frac in 0.05f64..0.95,
        ) {
            let max = min + (n as f64 + frac) * step;
            let grid = Grid::new(min, max, step).unwrap();
            prop_assert_eq!(grid.len(), n);
        }

        /// Resampling always yields one value per grid point, with
        /// non-negative weights
        #[test]
        fn test_resample_length(
            start in 3000.0f64..6000.0,
            span in 50.0f64..3000.0,
            n in 4usize..200,
            seed in 0.0f64..10.0,
        ) {
            let step = span / (n - 1) as f64;
            let wave: Vec<f64> = (0..n).map(|i| start + i as f64 * step).collect();
            let flux: Vec<f64> = wave.iter().map(|w| (w / 97.0 + seed).sin()).collect();
            let ivar: Vec<f64> = wave.iter().map(|w| 1.0 + (w / 53.0 + seed).cos()).collect();
            let sp = Spectrum::new(wave, flux, ivar).unwrap();

            let grid = Grid::new(2000.0, 10000.0, 4.0).unwrap();
            let out = resample(&sp, &grid, &[]).unwrap();
            prop_assert_eq!(out.flux().len(), grid.len());
            prop_assert_eq!(out.ivar().len(), grid.len());
            prop_assert!(out.ivar().iter().all(|&v| v >= 0.0 && v <= 2.0));
        }

        /// Correcting by x and then -x is the identity
        #[test]
        fn test_reddening_symmetry(
            wave in prop::collection::vec(1000.0f64..30000.0, 1..50),
            ebv in -1.0f64..1.0,
        ) {
            let config = ExtinctionConfig::default();
            let forward = correct(&wave, ebv, &config).unwrap();
            let back = correct(&wave, -ebv, &config).unwrap();
            for (f, b) in forward.iter().zip(&back) {
                prop_assert!((f * b - 1.0).abs() < 1e-10);
            }
        }

        /// A single-member composite is the member divided by its median
        #[test]
        fn test_single_member_composite(
            values in prop::collection::vec(0.1f64..100.0, 10),
        ) {
            let grid = Grid::new(4000.0, 4020.0, 2.0).unwrap();
            let sp = ResampledSpectrum::new(grid, values.clone(), vec![1.0; 10]).unwrap();
            let composite = build(&[sp], &CompositeConfig::default()).unwrap();
            let scale = composite.scales()[0];
            for (c, v) in composite.flux().iter().zip(&values) {
                prop_assert!((c - v / scale).abs() < 1e-12);
            }
            prop_assert!(composite.rms().iter().all(|&r| r == 0.0));
        }
    }
}
