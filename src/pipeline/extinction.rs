//! Interstellar extinction laws and dereddening.
//!
//! A law gives `k(λ) = A(λ) / E(B−V)`. The correction applied to an observed
//! spectrum is `10^(0.4 · E(B−V) · k(λ))`: a positive color excess brightens
//! (dereddens), a negative one reddens.
//!
//! Supported laws:
//!
//! * **Fitzpatrick (1999)**: R_V-dependent, far-UV to near-IR. The UV part
//!   is the Fitzpatrick & Massa rational fit with a 2175 Å bump; optical and
//!   IR come from a cubic spline through fixed anchor points whose ordinates
//!   are polynomials in R_V. Valid from 912 Å redward.
//! * **Cardelli, Clayton & Mathis (1989)** and its **O'Donnell (1994)**
//!   optical revision: piecewise polynomials, valid 909 Å to 3.33 µm.

use log::warn;
use serde::{Deserialize, Serialize};

use super::error::{PipelineError, Result};
use super::spline::CubicSpline;
use crate::data::model::Spectrum;

/// Blue limit of the Fitzpatrick (1999) curve (Å).
pub const FM99_MIN_WAVELENGTH: f64 = 912.0;
/// Blue limit of the CCM curves, x = 11 µm⁻¹ (Å).
pub const CCM_MIN_WAVELENGTH: f64 = 1.0e4 / 11.0;
/// Red limit of the CCM curves, x = 0.3 µm⁻¹ (Å).
pub const CCM_MAX_WAVELENGTH: f64 = 1.0e4 / 0.3;

/// Diffuse Milky Way ISM average.
pub const DEFAULT_R_V: f64 = 3.1;
/// Observed extremes of R_V along Galactic sightlines.
const R_V_TYPICAL: (f64, f64) = (2.3, 5.3);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtinctionLaw {
    #[default]
    Fitzpatrick99,
    Cardelli89,
    #[serde(rename = "odonnell94")]
    ODonnell94,
}

/// Fit parameter presets of the Fitzpatrick (1999) UV curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fm99Variant {
    /// Galactic average; c1 and c2 follow R_V.
    #[default]
    MilkyWay,
    /// LMC2 field including 30 Dor (Misselt et al. 1999).
    Lmc2,
    /// General LMC field average (Misselt et al. 1999).
    LmcAverage,
}

/// Resolved Fitzpatrick & Massa UV fit parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fm99Params {
    /// 2175 Å bump centroid (µm⁻¹).
    pub x0: f64,
    /// Bump width (µm⁻¹).
    pub gamma: f64,
    /// Linear component intercept.
    pub c1: f64,
    /// Linear component slope.
    pub c2: f64,
    /// Bump strength.
    pub c3: f64,
    /// Far-UV curvature.
    pub c4: f64,
}

/// Extinction law selection and its parameters.
///
/// The `x0`..`c4` overrides only apply to [`ExtinctionLaw::Fitzpatrick99`];
/// unset fields take the defaults of the chosen [`Fm99Variant`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtinctionConfig {
    pub law: ExtinctionLaw,
    pub variant: Fm99Variant,
    /// Total-to-selective extinction ratio A(V)/E(B−V).
    pub r_v: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x0: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gamma: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub c1: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub c2: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub c3: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub c4: Option<f64>,
}

impl Default for ExtinctionConfig {
    fn default() -> Self {
        Self {
            law: ExtinctionLaw::default(),
            variant: Fm99Variant::default(),
            r_v: DEFAULT_R_V,
            x0: None,
            gamma: None,
            c1: None,
            c2: None,
            c3: None,
            c4: None,
        }
    }
}

impl ExtinctionConfig {
    pub fn new(law: ExtinctionLaw, r_v: f64) -> Self {
        Self {
            law,
            r_v,
            ..Self::default()
        }
    }

    pub fn with_variant(mut self, variant: Fm99Variant) -> Self {
        self.variant = variant;
        self
    }

    /// Check parameters and warn about unusual but legal settings.
    pub fn validate(&self) -> Result<()> {
        self.check_values()?;
        let has_overrides = [self.x0, self.gamma, self.c1, self.c2, self.c3, self.c4]
            .iter()
            .any(Option::is_some);
        if has_overrides && self.law != ExtinctionLaw::Fitzpatrick99 {
            warn!("UV fit overrides are ignored by {:?}", self.law);
        }
        if self.r_v < R_V_TYPICAL.0 || self.r_v > R_V_TYPICAL.1 {
            warn!(
                "r_v = {} outside the observed range {}..{}",
                self.r_v, R_V_TYPICAL.0, R_V_TYPICAL.1
            );
        }
        Ok(())
    }

    fn check_values(&self) -> Result<()> {
        if !(self.r_v.is_finite() && self.r_v > 0.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "r_v must be finite and positive, got {}",
                self.r_v
            )));
        }
        let overrides = [
            ("x0", self.x0),
            ("gamma", self.gamma),
            ("c1", self.c1),
            ("c2", self.c2),
            ("c3", self.c3),
            ("c4", self.c4),
        ];
        for (name, value) in overrides {
            if let Some(v) = value.filter(|v| !v.is_finite()) {
                return Err(PipelineError::InvalidConfig(format!(
                    "{name} must be finite, got {v}"
                )));
            }
        }
        Ok(())
    }

    /// Wavelength range (Å) over which the selected law is defined.
    pub fn valid_range(&self) -> (f64, f64) {
        match self.law {
            ExtinctionLaw::Fitzpatrick99 => (FM99_MIN_WAVELENGTH, f64::INFINITY),
            ExtinctionLaw::Cardelli89 | ExtinctionLaw::ODonnell94 => {
                (CCM_MIN_WAVELENGTH, CCM_MAX_WAVELENGTH)
            }
        }
    }

    /// UV fit parameters after applying variant defaults and overrides.
    pub fn fm99_params(&self) -> Fm99Params {
        let (x0, gamma, c3, c4) = match self.variant {
            Fm99Variant::MilkyWay => (4.596, 0.99, 3.23, 0.41),
            Fm99Variant::Lmc2 => (4.626, 1.05, 1.92, 0.42),
            Fm99Variant::LmcAverage => (4.596, 0.91, 2.73, 0.64),
        };
        let c2 = self.c2.unwrap_or(match self.variant {
            Fm99Variant::MilkyWay => -0.824 + 4.717 / self.r_v,
            Fm99Variant::Lmc2 => 1.31,
            Fm99Variant::LmcAverage => 1.11,
        });
        let c1 = self.c1.unwrap_or(match self.variant {
            Fm99Variant::MilkyWay => 2.030 - 3.007 * c2,
            Fm99Variant::Lmc2 => -2.16,
            Fm99Variant::LmcAverage => -1.28,
        });
        Fm99Params {
            x0: self.x0.unwrap_or(x0),
            gamma: self.gamma.unwrap_or(gamma),
            c1,
            c2,
            c3: self.c3.unwrap_or(c3),
            c4: self.c4.unwrap_or(c4),
        }
    }
}

/// `k(λ) = A(λ)/E(B−V)` at each wavelength (Å).
pub fn extinction_curve(wavelength: &[f64], config: &ExtinctionConfig) -> Result<Vec<f64>> {
    config.check_values()?;
    check_domain(wavelength, config.valid_range())?;

    match config.law {
        ExtinctionLaw::Fitzpatrick99 => {
            let law = Fitzpatrick99::new(config)?;
            Ok(wavelength.iter().map(|&w| law.k(1.0e4 / w)).collect())
        }
        ExtinctionLaw::Cardelli89 => Ok(wavelength
            .iter()
            .map(|&w| ccm_k(1.0e4 / w, config.r_v, &CCM89_OPTICAL))
            .collect()),
        ExtinctionLaw::ODonnell94 => Ok(wavelength
            .iter()
            .map(|&w| ccm_k(1.0e4 / w, config.r_v, &OD94_OPTICAL))
            .collect()),
    }
}

/// Multiplicative correction curve: `flux_corrected = flux_observed * curve`.
///
/// A color excess of zero returns all ones; correcting with `x` then `-x`
/// restores the original flux.
pub fn correct(
    wavelength: &[f64],
    color_excess: f64,
    config: &ExtinctionConfig,
) -> Result<Vec<f64>> {
    if !color_excess.is_finite() {
        return Err(PipelineError::InvalidConfig(format!(
            "color excess must be finite, got {color_excess}"
        )));
    }
    let k = extinction_curve(wavelength, config)?;
    Ok(k
        .into_iter()
        .map(|k| 10f64.powf(0.4 * color_excess * k))
        .collect())
}

/// Deredden a spectrum: flux scaled by the correction curve, inverse
/// variance by its inverse square.
pub fn deredden(
    spectrum: &Spectrum,
    color_excess: f64,
    config: &ExtinctionConfig,
) -> Result<Spectrum> {
    let curve = correct(spectrum.wavelength(), color_excess, config)?;
    let flux = spectrum
        .flux()
        .iter()
        .zip(&curve)
        .map(|(f, c)| f * c)
        .collect();
    let ivar = spectrum
        .ivar()
        .iter()
        .zip(&curve)
        .map(|(v, c)| v / (c * c))
        .collect();

    let mut out = Spectrum::new(spectrum.wavelength().to_vec(), flux, ivar)?;
    out.metadata = spectrum.metadata.clone();
    Ok(out)
}

fn check_domain(wavelength: &[f64], (min, max): (f64, f64)) -> Result<()> {
    match wavelength.iter().find(|&&w| !w.is_finite() || w < min || w > max) {
        Some(&w) => Err(PipelineError::Domain {
            wavelength: w,
            min,
            max,
        }),
        None => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Fitzpatrick (1999)
// ---------------------------------------------------------------------------

/// UV/optical boundary, x = 1e4 / 2700 Å.
const FM99_X_CUT_UV: f64 = 1.0e4 / 2700.0;
/// UV anchors of the optical spline (Å).
const FM99_UV_ANCHORS: [f64; 2] = [2700.0, 2600.0];
/// Optical and IR anchors of the optical spline (Å), red to blue.
const FM99_OPIR_ANCHORS: [f64; 6] = [26500.0, 12200.0, 6000.0, 5470.0, 4670.0, 4110.0];
/// IR ordinates at R_V = 3.1 for x = 0 and the first two anchors.
const FM99_IR_ORDINATES: [f64; 3] = [0.0, 0.26469, 0.82925];

struct Fitzpatrick99 {
    r_v: f64,
    params: Fm99Params,
    optical: CubicSpline,
}

impl Fitzpatrick99 {
    fn new(config: &ExtinctionConfig) -> Result<Self> {
        let r_v = config.r_v;
        let params = config.fm99_params();

        let mut x = vec![0.0];
        x.extend(FM99_OPIR_ANCHORS.iter().map(|w| 1.0e4 / w));
        x.extend(FM99_UV_ANCHORS.iter().map(|w| 1.0e4 / w));

        let mut y: Vec<f64> = FM99_IR_ORDINATES.iter().map(|v| v * r_v / 3.1).collect();
        y.push(polyval(&[2.13572e-04, 1.00270, -4.22809e-01], r_v));
        y.push(polyval(&[-7.35778e-05, 1.00216, -5.13540e-02], r_v));
        y.push(polyval(&[-3.32598e-05, 1.00184, 7.00127e-01], r_v));
        y.push(polyval(
            &[-4.45636e-05, 7.97809e-04, -5.46959e-03, 1.01707, 1.19456],
            r_v,
        ));
        y.extend(FM99_UV_ANCHORS.iter().map(|w| fm_uv(1.0e4 / w, r_v, &params)));

        let optical = CubicSpline::new(&x, &y)?;
        Ok(Self {
            r_v,
            params,
            optical,
        })
    }

    fn k(&self, x: f64) -> f64 {
        if x >= FM99_X_CUT_UV {
            fm_uv(x, self.r_v, &self.params)
        } else {
            self.optical.evaluate(x)
        }
    }
}

/// Fitzpatrick & Massa UV fitting function plus R_V, `x` in µm⁻¹.
fn fm_uv(x: f64, r_v: f64, p: &Fm99Params) -> f64 {
    let x2 = x * x;
    let bump = p.c3 * x2 / ((x2 - p.x0 * p.x0).powi(2) + (x * p.gamma).powi(2));
    let d = (x - 5.9).max(0.0);
    let fuv = 0.5392 * d * d + 0.05644 * d.powi(3);
    p.c1 + p.c2 * x + bump + p.c4 * fuv + r_v
}

/// Polynomial with coefficients from the highest power down.
fn polyval(coeffs: &[f64], x: f64) -> f64 {
    coeffs.iter().fold(0.0, |acc, c| acc * x + c)
}

// ---------------------------------------------------------------------------
// Cardelli, Clayton & Mathis (1989) / O'Donnell (1994)
// ---------------------------------------------------------------------------

/// Optical `a(y)` and `b(y)` coefficients, lowest power first, y = x − 1.82.
struct OpticalCoefficients {
    a: &'static [f64],
    b: &'static [f64],
}

const CCM89_OPTICAL: OpticalCoefficients = OpticalCoefficients {
    a: &[1.0, 0.17699, -0.50447, -0.02427, 0.72085, 0.01979, -0.77530, 0.32999],
    b: &[0.0, 1.41338, 2.28305, 1.07233, -5.38434, -0.62251, 5.30260, -2.09002],
};

const OD94_OPTICAL: OpticalCoefficients = OpticalCoefficients {
    a: &[1.0, 0.104, -0.609, 0.701, 1.137, -1.718, -0.827, 1.647, -0.505],
    b: &[0.0, 1.952, 2.908, -3.989, -7.985, 11.102, 5.491, -10.805, 3.347],
};

fn ascending_poly(coeffs: &[f64], y: f64) -> f64 {
    coeffs.iter().rev().fold(0.0, |acc, c| acc * y + c)
}

/// `R_V · a(x) + b(x)`, `x` in µm⁻¹ within [0.3, 11].
fn ccm_k(x: f64, r_v: f64, optical: &OpticalCoefficients) -> f64 {
    let (a, b) = if x < 1.1 {
        let p = x.powf(1.61);
        (0.574 * p, -0.527 * p)
    } else if x < 3.3 {
        let y = x - 1.82;
        (ascending_poly(optical.a, y), ascending_poly(optical.b, y))
    } else if x < 8.0 {
        let (fa, fb) = if x > 5.9 {
            let y = x - 5.9;
            (
                -0.04473 * y * y - 0.009779 * y.powi(3),
                0.2130 * y * y + 0.1207 * y.powi(3),
            )
        } else {
            (0.0, 0.0)
        };
        (
            1.752 - 0.316 * x - 0.104 / ((x - 4.67).powi(2) + 0.341) + fa,
            -3.090 + 1.825 * x + 1.206 / ((x - 4.62).powi(2) + 0.263) + fb,
        )
    } else {
        let y = x - 8.0;
        (
            -1.073 - 0.628 * y + 0.137 * y * y - 0.070 * y.powi(3),
            13.670 + 4.257 * y - 0.420 * y * y + 0.374 * y.powi(3),
        )
    };
    r_v * a + b
}
