//! Classify modification subtypes that share a mass (e.g. GlcNAc / GalNAc)
//! from the relative intensities of their low-mass oxonium ions

use std::sync::Arc;

use dashmap::DashMap;
use fnv::FnvBuildHasher;
use serde::{Deserialize, Serialize};

use crate::mass::Tolerance;
use crate::model::{Classification, Identification, ObservedSpectrum, Peak, SpectrumId};
use crate::spectra::SpectrumSource;
use crate::Error;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticRule {
    /// Modification whose subtype is being decided
    pub modification: String,
    /// Diagnostic ion m/z values summed into the numerator of the ratio
    pub numerator: Vec<f64>,
    /// Diagnostic ion m/z values summed into the denominator of the ratio
    pub denominator: Vec<f64>,
    /// Subtype called when the ratio is at or below `low_ratio`
    pub low_subtype: String,
    pub low_ratio: f64,
    /// Subtype called when the ratio is at or above `high_ratio`
    pub high_subtype: String,
    pub high_ratio: f64,
}

impl Default for DiagnosticRule {
    fn default() -> Self {
        Self {
            modification: "HexNAc".into(),
            numerator: vec![138.05496, 168.06552],
            denominator: vec![126.05496, 144.06552],
            low_subtype: "GalNAc".into(),
            low_ratio: 0.95,
            high_subtype: "GlcNAc".into(),
            high_ratio: 1.95,
        }
    }
}

impl DiagnosticRule {
    /// A rule must describe exactly two competing subtypes, each with
    /// exactly two diagnostic ions
    pub fn validate(&self) -> Result<(), Error> {
        if self.numerator.len() != 2 || self.denominator.len() != 2 {
            return Err(Error::DataInconsistency(format!(
                "diagnostic rule for `{}` must have exactly two ions per subtype (found {} and {})",
                self.modification,
                self.numerator.len(),
                self.denominator.len()
            )));
        }
        if self.low_subtype == self.high_subtype || self.low_ratio >= self.high_ratio {
            return Err(Error::DataInconsistency(format!(
                "diagnostic rule for `{}` does not separate two subtypes",
                self.modification
            )));
        }
        Ok(())
    }
}

/// Most intense peak within `tolerance` of `mz`
pub fn select_most_intense_peak(peaks: &[Peak], mz: f64, tolerance: Tolerance) -> Option<&Peak> {
    let (lo, hi) = tolerance.bounds(mz);
    let mut best_peak = None;
    let mut max_int = 0.0;
    for peak in peaks.iter().filter(|peak| peak.mz >= lo && peak.mz <= hi) {
        if peak.intensity >= max_int {
            max_int = peak.intensity;
            best_peak = Some(peak);
        }
    }
    best_peak
}

/// Locate diagnostic peaks for each target m/z. Peaks found within 1 m/z
/// unit of each other are collapsed into the most intense one.
fn diagnostic_peaks(peaks: &[Peak], targets: &[f64], tolerance: Tolerance) -> Vec<Peak> {
    let mut found = targets
        .iter()
        .filter_map(|mz| select_most_intense_peak(peaks, *mz, tolerance))
        .copied()
        .collect::<Vec<_>>();
    found.sort_by(|a, b| a.mz.total_cmp(&b.mz));
    found.dedup_by(|next, prev| {
        if next.mz - prev.mz <= 1.0 {
            if next.intensity > prev.intensity {
                *prev = *next;
            }
            true
        } else {
            false
        }
    });
    found
}

pub struct DiagnosticClassifier {
    rule: DiagnosticRule,
    tolerance: Tolerance,
}

impl DiagnosticClassifier {
    pub fn new(rule: DiagnosticRule, tolerance: Tolerance) -> Result<Self, Error> {
        rule.validate()?;
        Ok(Self { rule, tolerance })
    }

    pub fn rule(&self) -> &DiagnosticRule {
        &self.rule
    }

    /// Does `ident` carry the modification this classifier decides on?
    pub fn applies(&self, ident: &Identification) -> bool {
        ident
            .modifications
            .iter()
            .chain(ident.possible_mods.iter().flatten())
            .any(|m| m.name == self.rule.modification)
    }

    /// Ratio of summed numerator to summed denominator intensities. Both
    /// subtypes must have exactly two diagnostic peaks.
    pub fn ratio(&self, peaks: &[Peak]) -> Result<f64, Error> {
        let numerator = diagnostic_peaks(peaks, &self.rule.numerator, self.tolerance);
        let denominator = diagnostic_peaks(peaks, &self.rule.denominator, self.tolerance);
        if numerator.len() != 2 || denominator.len() != 2 {
            return Err(Error::InsufficientEvidence);
        }
        let den = denominator.iter().map(|p| p.intensity).sum::<f64>();
        if den <= 0.0 {
            return Err(Error::InsufficientEvidence);
        }
        Ok(numerator.iter().map(|p| p.intensity).sum::<f64>() / den)
    }

    pub fn classify_peaks(&self, peaks: &[Peak]) -> Result<Classification, Error> {
        let ratio = self.ratio(peaks)?;
        Ok(if ratio <= self.rule.low_ratio {
            Classification::Subtype(self.rule.low_subtype.clone())
        } else if ratio >= self.rule.high_ratio {
            Classification::Subtype(self.rule.high_subtype.clone())
        } else {
            Classification::Unknown
        })
    }

    /// Classify `ident` using its own spectrum if it is collisional, or the
    /// collisional sibling spectrum recorded in `siblings`
    pub fn classify<S: SpectrumSource + ?Sized>(
        &self,
        ident: &Identification,
        source: &S,
        siblings: &SiblingLookup,
    ) -> Result<Classification, Error> {
        let spectrum_id = if ident.activation_method.is_collisional() {
            ident.spectrum_id
        } else {
            siblings
                .get(ident.spectrum_id)
                .ok_or(Error::InsufficientEvidence)?
        };
        let spectrum = source.spectrum(spectrum_id).ok_or_else(|| {
            Error::UpstreamUnavailable(format!("spectrum {}", spectrum_id))
        })?;
        self.classify_peaks(&spectrum.peaks)
    }
}

/// Find a collisional spectrum recorded for the same precursor as `ident`:
/// same scan number, parent mass within `mass_tolerance`, retention time
/// within `rt_tolerance`
pub fn find_sibling<S: SpectrumSource + ?Sized>(
    ident: &Identification,
    source: &S,
    mass_tolerance: Tolerance,
    rt_tolerance: f64,
) -> Option<Arc<ObservedSpectrum>> {
    source
        .by_scan(ident.precursor.scan)
        .into_iter()
        .filter(|s| s.id != ident.spectrum_id)
        .filter(|s| s.activation_method.map(|m| m.is_collisional()).unwrap_or(false))
        .filter(|s| mass_tolerance.contains(ident.precursor.mass, s.precursor.mass))
        .filter(|s| (s.precursor.rt - ident.precursor.rt).abs() <= rt_tolerance)
        .min_by(|a, b| {
            let da = (a.precursor.mass - ident.precursor.mass).abs();
            let db = (b.precursor.mass - ident.precursor.mass).abs();
            da.total_cmp(&db)
        })
}

/// Collisional sibling spectrum for each non-collisional spectrum id,
/// populated before any identification is classified
#[derive(Default, Debug)]
pub struct SiblingLookup {
    siblings: DashMap<SpectrumId, Option<SpectrumId>, FnvBuildHasher>,
}

impl SiblingLookup {
    pub fn insert(&self, spectrum_id: SpectrumId, sibling: Option<SpectrumId>) {
        self.siblings.insert(spectrum_id, sibling);
    }

    pub fn contains(&self, spectrum_id: SpectrumId) -> bool {
        self.siblings.contains_key(&spectrum_id)
    }

    pub fn get(&self, spectrum_id: SpectrumId) -> Option<SpectrumId> {
        self.siblings.get(&spectrum_id).and_then(|entry| *entry.value())
    }

    pub fn len(&self) -> usize {
        self.siblings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.siblings.is_empty()
    }
}
