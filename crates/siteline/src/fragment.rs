//! Match theoretical fragment ions against an observed spectrum

use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};

use crate::ion_series::{theoretical_ions, Ion, PeptideMasses, Series, ALL_SERIES};
use crate::mass::{binary_search_slice, Tolerance};
use crate::model::{Identification, ObservedSpectrum, Peak};

/// Which ion series a search node had enabled
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IonSeriesConfig {
    pub node: u32,
    pub series: Vec<Series>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct IonSeriesFilter {
    mask: u32,
}

impl Default for IonSeriesFilter {
    fn default() -> Self {
        Self::from_series(ALL_SERIES)
    }
}

impl IonSeriesFilter {
    pub fn from_series<I: IntoIterator<Item = Series>>(series: I) -> Self {
        Self {
            mask: series.into_iter().fold(0, |acc, s| acc | s.bit()),
        }
    }

    pub fn allows(&self, series: Series) -> bool {
        self.mask & series.bit() != 0
    }

    pub fn series(self) -> impl Iterator<Item = Series> {
        ALL_SERIES.into_iter().filter(move |s| self.allows(*s))
    }
}

/// Ion series filters, resolved once per search node
#[derive(Default, Debug)]
pub struct FragmentFilterCache {
    filters: FnvHashMap<u32, IonSeriesFilter>,
}

impl FragmentFilterCache {
    pub fn build(config: &[IonSeriesConfig]) -> Self {
        let mut filters: FnvHashMap<u32, IonSeriesFilter> = FnvHashMap::default();
        for row in config {
            // Multiple rows for one node enable the union of their series
            let filter = IonSeriesFilter::from_series(row.series.iter().copied());
            filters
                .entry(row.node)
                .and_modify(|f| f.mask |= filter.mask)
                .or_insert(filter);
        }
        Self { filters }
    }

    pub fn get(&self, node: u32) -> Option<IonSeriesFilter> {
        self.filters.get(&node).copied()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MatchedIon {
    pub ion: Ion,
    /// Closest observed peak within the matching window
    pub peak: Peak,
}

/// Match each theoretical ion against `peaks` (sorted by m/z), accepting the
/// closest peak within `tolerance` of the theoretical m/z
pub fn match_ions(ions: &[Ion], peaks: &[Peak], tolerance: Tolerance) -> Vec<MatchedIon> {
    ions.iter()
        .filter_map(|ion| {
            let (lo, hi) = tolerance.bounds(ion.mz);
            let (i, j) = binary_search_slice(peaks, |peak, query| peak.mz.total_cmp(query), lo, hi);
            peaks[i..j]
                .iter()
                .filter(|peak| peak.mz >= lo && peak.mz <= hi)
                .min_by(|a, b| (a.mz - ion.mz).abs().total_cmp(&(b.mz - ion.mz).abs()))
                .map(|peak| MatchedIon { ion: *ion, peak: *peak })
        })
        .collect()
}

/// Convert matched backbone ions into sorted, de-duplicated cleavage
/// offsets. An offset `k` confirms the bond between residues `k` and `k+1`.
///
/// With `envelope_filter`, only peaks whose reported charge equals the ion
/// charge are considered.
pub fn cleavage_offsets(
    matched: &[MatchedIon],
    peptide_len: usize,
    envelope_filter: bool,
) -> Vec<usize> {
    let mut offsets = matched
        .iter()
        .filter(|m| m.ion.series.confirms_cleavage())
        .filter(|m| !envelope_filter || m.peak.charge == Some(m.ion.charge))
        .map(|m| match m.ion.series.is_n_terminal() {
            true => m.ion.index,
            false => peptide_len - m.ion.index,
        })
        .filter(|&offset| offset > 0 && offset < peptide_len)
        .collect::<Vec<_>>();
    offsets.sort_unstable();
    offsets.dedup();
    offsets
}

/// Match an identification against its spectrum and return the confirmed
/// cleavage offsets
pub fn coverage(
    ident: &Identification,
    spectrum: &ObservedSpectrum,
    filter: IonSeriesFilter,
    tolerance: Tolerance,
    envelope_filter: bool,
) -> Vec<usize> {
    let peptide = PeptideMasses::from(ident);
    let charge = match spectrum.precursor.charge {
        0 => ident.precursor.charge,
        z => z,
    };
    let ions = theoretical_ions(&peptide, filter.series(), charge);
    let matched = match_ions(&ions, &spectrum.peaks, tolerance);
    log::trace!(
        "peptide {}: matched {}/{} theoretical ions",
        ident.peptide_id,
        matched.len(),
        ions.len()
    );
    cleavage_offsets(&matched, peptide.len(), envelope_filter)
}
