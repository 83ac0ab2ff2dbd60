//! Decide whether modification sites are uniquely determined by the
//! fragment ions that were observed, or whether they must be reported as a
//! range of candidate residues.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::fragment::{coverage, IonSeriesFilter};
use crate::mass::Tolerance;
use crate::model::{Identification, Modification, ObservedSpectrum, N_TERMINUS};
use crate::Error;

/// A modification that should be localized, and the residues that can
/// carry it, e.g. `{"name": "Phospho", "residues": "[STY]"}`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocalizationTarget {
    pub name: String,
    pub residues: String,
}

#[derive(Clone, Debug)]
pub struct SitePattern {
    pub name: String,
    regex: Regex,
}

impl SitePattern {
    pub fn new<S: Into<String>>(name: S, pattern: &str) -> Result<Self, Error> {
        Ok(Self {
            name: name.into(),
            regex: Regex::new(pattern)?,
        })
    }

    /// 1-based positions where the pattern starts within `sequence`,
    /// including matches that overlap each other
    pub fn positions(&self, sequence: &str) -> Vec<usize> {
        (0..sequence.len())
            .filter(|&start| {
                self.regex
                    .find_at(sequence, start)
                    .map_or(false, |m| m.start() == start)
            })
            .map(|start| start + 1)
            .collect()
    }
}

/// Apply one site pattern to an identification, given the confirmed
/// cleavage offsets. Returns `true` if ambiguity was introduced, in which
/// case the modifications are moved to `possible_mods`.
pub fn localize_pattern(
    ident: &mut Identification,
    cleavages: &[usize],
    pattern: &SitePattern,
) -> Result<bool, Error> {
    let ambiguous = widen_sites(ident, cleavages, pattern)?;
    if ambiguous {
        ident.mark_possible(|_| true);
    }
    Ok(ambiguous)
}

/// Cleavages split the peptide into groups of residues. Within a group, a
/// modification can move freely between pattern-matching residues, so if
/// there are more candidate residues than modifications, the modifications
/// are widened to span the first through last candidate.
fn widen_sites(
    ident: &mut Identification,
    cleavages: &[usize],
    pattern: &SitePattern,
) -> Result<bool, Error> {
    let assigned_here = |m: &Modification| m.name == pattern.name && m.position != N_TERMINUS;
    let len = ident.sequence.len();
    if !ident.modifications.iter().any(assigned_here) {
        return Ok(false);
    }

    let candidates = pattern.positions(&ident.sequence);

    let mut boundaries = Vec::with_capacity(cleavages.len() + 2);
    boundaries.push(0);
    boundaries.extend(cleavages.iter().copied().filter(|&c| c > 0 && c < len));
    boundaries.push(len);
    boundaries.dedup();

    let mut ambiguous = false;
    for window in boundaries.windows(2) {
        let (lo, hi) = (window[0], window[1]);
        let in_group = |pos: usize| pos > lo && pos <= hi;

        let assigned = ident
            .modifications
            .iter()
            .filter(|m| assigned_here(*m) && in_group(m.position))
            .count();
        if assigned == 0 {
            continue;
        }

        let group_sites = candidates
            .iter()
            .copied()
            .filter(|&pos| in_group(pos))
            .collect::<Vec<_>>();

        let (first, last) = match (group_sites.first(), group_sites.last()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => {
                ident.invalid = true;
                for m in ident
                    .modifications
                    .iter_mut()
                    .filter(|m| m.name == pattern.name)
                {
                    m.ambiguity = Some((0, 0));
                }
                return Err(Error::InvalidLocalization {
                    peptide_id: ident.peptide_id,
                    modification: pattern.name.clone(),
                });
            }
        };

        if group_sites.len() > assigned {
            ambiguous = true;
            for m in ident
                .modifications
                .iter_mut()
                .filter(|m| assigned_here(&**m) && in_group(m.position))
            {
                m.ambiguity = Some((first.min(m.position), last.max(m.position)));
            }
        }
    }

    Ok(ambiguous)
}

pub struct Localizer {
    patterns: Vec<SitePattern>,
    tolerance: Tolerance,
    envelope_filter: bool,
}

impl Localizer {
    pub fn new(
        targets: &[LocalizationTarget],
        tolerance: Tolerance,
        envelope_filter: bool,
    ) -> Result<Self, Error> {
        let patterns = targets
            .iter()
            .map(|t| SitePattern::new(t.name.clone(), &t.residues))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            patterns,
            tolerance,
            envelope_filter,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Localize every configured modification type on `ident`. Every
    /// pattern sees the modifications as they were assigned; nothing moves
    /// to `possible_mods` until all patterns have been applied.
    pub fn localize(
        &self,
        ident: &mut Identification,
        spectrum: &ObservedSpectrum,
        filter: IonSeriesFilter,
    ) -> Result<bool, Error> {
        let cleavages = coverage(ident, spectrum, filter, self.tolerance, self.envelope_filter);
        self.localize_with(ident, &cleavages)
    }

    fn localize_with(
        &self,
        ident: &mut Identification,
        cleavages: &[usize],
    ) -> Result<bool, Error> {
        let mut ambiguous = false;
        let mut invalid = None;
        for pattern in &self.patterns {
            match widen_sites(ident, cleavages, pattern) {
                Ok(widened) => ambiguous |= widened,
                Err(e) => {
                    invalid.get_or_insert(e);
                }
            }
        }
        if let Some(e) = invalid {
            return Err(e);
        }
        if ambiguous {
            ident.mark_possible(|_| true);
        }
        Ok(ambiguous)
    }
}
