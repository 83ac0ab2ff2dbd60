//! Precursor mass accuracy filtering
//!
//! Acceptance bounds are learned per activation method from the
//! distribution of (ppm error, score) pairs: true identifications pile up
//! around the instrument's systematic mass error with high scores, while
//! random matches spread evenly across the search window with low scores.

use fnv::FnvHashMap;
use rayon::prelude::*;
use serde::Serialize;

use crate::ion_series::PeptideMasses;
use crate::mass::{H2O, PROTON};
use crate::model::{ActivationMethod, Identification};

/// Theoretical singly protonated monoisotopic mass (MH+)
pub fn theoretical_mass(ident: &Identification) -> f64 {
    PeptideMasses::from(ident).residue_sum() + H2O + PROTON
}

pub fn ppm_error(observed: f64, theoretical: f64) -> f64 {
    1e6 * (observed / theoretical - 1.0)
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct PpmRange {
    pub min: f64,
    pub max: f64,
}

impl PpmRange {
    pub fn contains(&self, ppm: f64) -> bool {
        ppm >= self.min && ppm <= self.max
    }
}

/// Linearly interpolated percentile (0-100) of `values`
pub fn percentile(values: &mut [f64], pct: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let rank = (pct / 100.0).clamp(0.0, 1.0) * (values.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    Some(values[lo] + (values[hi] - values[lo]) * (rank - lo as f64))
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct BoundaryEstimator {
    /// Width of each ppm bin
    pub bin_width: f64,
    /// Percentile of the outermost bins' scores used as the noise threshold
    pub noise_percentile: f64,
    /// Bins are trimmed while their rolling outlier count is below this
    /// fraction of the mean outlier count
    pub outlier_fraction: f64,
    /// Identifications further than this from zero ppm are left out of the
    /// population
    pub max_abs_ppm: f64,
}

/// Upper bound on the number of ppm bins in one estimate
const MAX_BINS: i64 = 1 << 20;

impl Default for BoundaryEstimator {
    fn default() -> Self {
        Self {
            bin_width: 0.5,
            noise_percentile: 99.9,
            outlier_fraction: 0.9,
            max_abs_ppm: 1000.0,
        }
    }
}

impl BoundaryEstimator {
    /// Estimate the accepted ppm range from (ppm error, score) pairs
    pub fn estimate(&self, population: &[(f64, f64)]) -> Option<PpmRange> {
        let points = population
            .iter()
            .filter(|(ppm, score)| ppm.abs() <= self.max_abs_ppm && score.is_finite())
            .map(|&(ppm, score)| ((ppm / self.bin_width).floor() as i64, score))
            .collect::<Vec<_>>();
        if points.len() < population.len() {
            log::debug!(
                "ignoring {} identifications outside ±{} ppm",
                population.len() - points.len(),
                self.max_abs_ppm
            );
        }

        let min_bin = points.iter().map(|(bin, _)| *bin).min()?;
        let max_bin = points.iter().map(|(bin, _)| *bin).max()?;
        let n = match max_bin.checked_sub(min_bin).and_then(|d| d.checked_add(1)) {
            Some(n) if n <= MAX_BINS => n as usize,
            _ => {
                log::warn!(
                    "ppm errors span too many bins of width {}, skipping estimate",
                    self.bin_width
                );
                return None;
            }
        };

        let mut bins = vec![Vec::new(); n];
        for (bin, score) in points {
            bins[(bin - min_bin) as usize].push(score);
        }

        let edge = |lo: usize, hi: usize| PpmRange {
            min: (min_bin + lo as i64) as f64 * self.bin_width,
            max: (min_bin + hi as i64 + 1) as f64 * self.bin_width,
        };

        if n < 3 {
            return Some(edge(0, n - 1));
        }

        // Noise threshold from the two lowest-ppm occupied bins
        let mut lowest = bins.iter().filter(|b| !b.is_empty()).take(2).cloned();
        let (mut first, mut second) = (lowest.next()?, lowest.next()?);
        let threshold = (percentile(&mut first, self.noise_percentile)?
            + percentile(&mut second, self.noise_percentile)?)
            / 2.0;

        let outliers = bins
            .iter()
            .map(|b| b.iter().filter(|&&score| score > threshold).count() as f64)
            .collect::<Vec<_>>();
        let cutoff = self.outlier_fraction * outliers.iter().sum::<f64>() / n as f64;
        let rolling = |i: usize| (outliers[i] + outliers[i + 1] + outliers[i + 2]) / 3.0;

        let mut lo = 0;
        while lo + 2 < n && rolling(lo) < cutoff {
            lo += 1;
        }
        let mut hi = n - 1;
        while hi >= lo + 2 && rolling(hi - 2) < cutoff {
            hi -= 1;
        }

        if lo + 2 >= n {
            log::debug!("no ppm bins exceed the outlier cutoff ({:.2})", cutoff);
            return None;
        }

        Some(edge(lo, hi))
    }
}

/// Accepted ppm ranges per activation method, estimated once per run
#[derive(Debug, Default)]
pub struct PpmBoundaries {
    ranges: FnvHashMap<ActivationMethod, PpmRange>,
}

impl PpmBoundaries {
    pub fn estimate(identifications: &[Identification], estimator: &BoundaryEstimator) -> Self {
        let mut populations: FnvHashMap<ActivationMethod, Vec<(f64, f64)>> = FnvHashMap::default();
        for ident in identifications {
            let ppm = ppm_error(ident.precursor.mass, theoretical_mass(ident));
            populations
                .entry(ident.activation_method)
                .or_default()
                .push((ppm, ident.score));
        }

        let ranges = populations
            .into_par_iter()
            .filter_map(|(method, population)| {
                let range = estimator.estimate(&population);
                match range {
                    Some(range) => log::info!(
                        "- {:?}: accepting [{:.2}, {:.2}] ppm from {} identifications",
                        method,
                        range.min,
                        range.max,
                        population.len()
                    ),
                    None => log::warn!(
                        "- {:?}: unable to estimate ppm bounds from {} identifications",
                        method,
                        population.len()
                    ),
                }
                range.map(|range| (method, range))
            })
            .collect();

        Self { ranges }
    }

    pub fn from_ranges<I: IntoIterator<Item = (ActivationMethod, PpmRange)>>(ranges: I) -> Self {
        Self {
            ranges: ranges.into_iter().collect(),
        }
    }

    pub fn get(&self, method: ActivationMethod) -> Option<PpmRange> {
        self.ranges.get(&method).copied()
    }

    /// Record the ppm error on `ident` and decide whether it passes. Methods
    /// without an estimated range are rejected.
    pub fn accept(&self, ident: &mut Identification) -> bool {
        let ppm = ppm_error(ident.precursor.mass, theoretical_mass(ident));
        ident.ppm_error = Some(ppm);
        self.get(ident.activation_method)
            .map(|range| range.contains(ppm))
            .unwrap_or(false)
    }
}
