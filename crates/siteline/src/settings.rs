//! Run configuration
//!
//! [`Options`] is what a user writes in a parameter file: every field is
//! optional. It resolves into [`Settings`], which holds the values actually
//! used for a run, including defaults, and can be serialized back out next
//! to the results.

use serde::{Deserialize, Serialize};

use crate::aggregate::AggregateSettings;
use crate::diagnostic::DiagnosticRule;
use crate::localize::LocalizationTarget;
use crate::mass::Tolerance;
use crate::model::Confidence;
use crate::ppm::BoundaryEstimator;
use crate::quant::{PartnerSearch, QuantScheme};
use crate::tmt::Isobaric;

#[derive(Serialize, Deserialize, Default, Debug)]
pub struct PpmOptions {
    pub bin_width: Option<f64>,
    pub noise_percentile: Option<f64>,
    pub outlier_fraction: Option<f64>,
    pub max_abs_ppm: Option<f64>,
}

impl From<PpmOptions> for BoundaryEstimator {
    fn from(value: PpmOptions) -> Self {
        let default = BoundaryEstimator::default();
        let estimator = BoundaryEstimator {
            bin_width: value.bin_width.unwrap_or(default.bin_width).abs(),
            noise_percentile: value
                .noise_percentile
                .unwrap_or(default.noise_percentile)
                .clamp(0.0, 100.0),
            outlier_fraction: value.outlier_fraction.unwrap_or(default.outlier_fraction).abs(),
            max_abs_ppm: value.max_abs_ppm.unwrap_or(default.max_abs_ppm).abs(),
        };
        if estimator.bin_width == 0.0 {
            log::warn!("ppm.bin_width is zero, using {}", default.bin_width);
            return BoundaryEstimator {
                bin_width: default.bin_width,
                ..estimator
            };
        }
        if estimator.bin_width > 5.0 {
            log::warn!("ppm.bin_width is higher than expected");
        }
        if estimator.noise_percentile < 90.0 {
            log::warn!("ppm.noise_percentile is lower than expected");
        }
        estimator
    }
}

#[derive(Serialize, Deserialize, Default, Debug)]
pub struct DiagnosticOptions {
    pub rule: Option<DiagnosticRule>,
    pub tolerance: Option<Tolerance>,
    /// Parent mass tolerance when searching for a collisional sibling
    pub sibling_tolerance: Option<Tolerance>,
    /// Retention time tolerance when searching for a collisional sibling
    pub sibling_rt: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DiagnosticSettings {
    pub rule: DiagnosticRule,
    pub tolerance: Tolerance,
    pub sibling_tolerance: Tolerance,
    pub sibling_rt: f64,
}

impl Default for DiagnosticSettings {
    fn default() -> Self {
        Self {
            rule: DiagnosticRule::default(),
            tolerance: Tolerance::Ppm(-20.0, 20.0),
            sibling_tolerance: Tolerance::Ppm(-10.0, 10.0),
            sibling_rt: 0.1,
        }
    }
}

impl From<DiagnosticOptions> for DiagnosticSettings {
    fn from(value: DiagnosticOptions) -> Self {
        let default = Self::default();
        Self {
            rule: value.rule.unwrap_or(default.rule),
            tolerance: value.tolerance.unwrap_or(default.tolerance),
            sibling_tolerance: value.sibling_tolerance.unwrap_or(default.sibling_tolerance),
            sibling_rt: value.sibling_rt.unwrap_or(default.sibling_rt).abs(),
        }
    }
}

#[derive(Serialize, Deserialize, Default, Debug)]
pub struct QuantOptions {
    pub scheme: Option<QuantScheme>,
    pub partner_rt: Option<f64>,
    pub partner_tolerance: Option<Tolerance>,
    /// Extract reporter intensities from spectra with this label set
    pub tmt: Option<Isobaric>,
    pub reporter_tolerance: Option<Tolerance>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QuantSettings {
    pub scheme: Option<QuantScheme>,
    pub partner: PartnerSearch,
    pub tmt: Option<Isobaric>,
    pub reporter_tolerance: Tolerance,
}

impl Default for QuantSettings {
    fn default() -> Self {
        Self {
            scheme: None,
            partner: PartnerSearch::default(),
            tmt: None,
            reporter_tolerance: Tolerance::Ppm(-20.0, 20.0),
        }
    }
}

impl From<QuantOptions> for QuantSettings {
    fn from(value: QuantOptions) -> Self {
        let default = Self::default();
        let partner = PartnerSearch {
            rt_expansion: value
                .partner_rt
                .unwrap_or(default.partner.rt_expansion)
                .abs(),
            tolerance: value.partner_tolerance.unwrap_or(default.partner.tolerance),
        };

        // Reporter extraction implies the reporter scheme
        let scheme = match (value.scheme, &value.tmt) {
            (None, Some(isobaric)) => Some(QuantScheme::Reporter {
                channels: isobaric.channels(),
            }),
            (scheme @ Some(QuantScheme::Paired { .. }), Some(_)) => {
                log::warn!("quant.tmt is ignored for the paired quantification scheme");
                scheme
            }
            (scheme, _) => scheme,
        };
        if let Tolerance::Ppm(lo, hi) = partner.tolerance {
            if hi - lo > 50.0 {
                log::warn!("quant.partner_tolerance is wider than expected");
            }
        }

        Self {
            scheme,
            partner,
            tmt: value.tmt,
            reporter_tolerance: value
                .reporter_tolerance
                .unwrap_or(default.reporter_tolerance),
        }
    }
}

#[derive(Deserialize, Default, Debug)]
/// User-facing parameters, deserialized from JSON
pub struct Options {
    pub fragment_tol: Option<Tolerance>,
    pub envelope_filter: Option<bool>,
    pub localize: Option<Vec<LocalizationTarget>>,
    pub ppm: Option<PpmOptions>,
    pub diagnostic: Option<DiagnosticOptions>,
    pub quant: Option<QuantOptions>,
    pub max_search_rank: Option<u32>,
    pub min_confidence: Option<Confidence>,
    pub max_delta_score: Option<f64>,
    pub batch_size: Option<usize>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
/// Resolved parameters for one run, including defaults
pub struct Settings {
    pub version: String,
    pub fragment_tol: Tolerance,
    pub envelope_filter: bool,
    pub localize: Vec<LocalizationTarget>,
    pub ppm: BoundaryEstimator,
    pub diagnostic: DiagnosticSettings,
    pub quant: QuantSettings,
    pub max_search_rank: u32,
    pub min_confidence: Confidence,
    pub aggregate: AggregateSettings,
    pub batch_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Options::default().into()
    }
}

fn default_targets() -> Vec<LocalizationTarget> {
    vec![LocalizationTarget {
        name: "Phospho".into(),
        residues: "[STY]".into(),
    }]
}

impl From<Options> for Settings {
    fn from(value: Options) -> Self {
        let fragment_tol = value.fragment_tol.unwrap_or(Tolerance::Da(-0.01, 0.01));
        if let Tolerance::Da(lo, hi) = fragment_tol {
            if hi - lo > 1.0 {
                log::warn!("fragment_tol is wider than expected");
            }
        }

        let batch_size = match value.batch_size {
            Some(0) => {
                log::warn!("batch_size must be positive, using 1");
                1
            }
            Some(n) => n,
            None => 256,
        };

        let max_delta_score = value.max_delta_score.map(f64::abs);

        Settings {
            version: env!("CARGO_PKG_VERSION").into(),
            fragment_tol,
            envelope_filter: value.envelope_filter.unwrap_or(false),
            localize: value.localize.unwrap_or_else(default_targets),
            ppm: value.ppm.map(Into::into).unwrap_or_default(),
            diagnostic: value.diagnostic.map(Into::into).unwrap_or_default(),
            quant: value.quant.map(Into::into).unwrap_or_default(),
            max_search_rank: value.max_search_rank.unwrap_or(1).max(1),
            min_confidence: value.min_confidence.unwrap_or(Confidence::Low),
            aggregate: AggregateSettings { max_delta_score },
            batch_size,
        }
    }
}
