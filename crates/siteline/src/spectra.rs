//! Access to observed spectra
//!
//! Spectrum retrieval is the only blocking I/O performed while a run is in
//! progress, so it sits behind a trait: callers can back it with a database
//! connection, or load everything up front into a [`SpectrumCache`].

use std::sync::Arc;

use fnv::FnvHashMap;

use crate::model::{ObservedSpectrum, SpectrumId};

pub trait SpectrumSource: Sync {
    /// Retrieve a spectrum by id
    fn spectrum(&self, id: SpectrumId) -> Option<Arc<ObservedSpectrum>>;

    /// Retrieve every spectrum (from any file) acquired under a scan number
    fn by_scan(&self, scan: u32) -> Vec<Arc<ObservedSpectrum>>;
}

/// In-memory spectrum store, keyed by spectrum id
#[derive(Default, Debug)]
pub struct SpectrumCache {
    spectra: FnvHashMap<SpectrumId, Arc<ObservedSpectrum>>,
    scans: FnvHashMap<u32, Vec<SpectrumId>>,
}

impl SpectrumCache {
    pub fn insert(&mut self, mut spectrum: ObservedSpectrum) {
        spectrum.sort();
        let id = spectrum.id;
        let scans = self.scans.entry(spectrum.precursor.scan).or_default();
        if !scans.contains(&id) {
            scans.push(id);
        }
        self.spectra.insert(id, Arc::new(spectrum));
    }

    pub fn len(&self) -> usize {
        self.spectra.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spectra.is_empty()
    }
}

impl FromIterator<ObservedSpectrum> for SpectrumCache {
    fn from_iter<I: IntoIterator<Item = ObservedSpectrum>>(iter: I) -> Self {
        let mut cache = SpectrumCache::default();
        for spectrum in iter {
            cache.insert(spectrum);
        }
        cache
    }
}

impl SpectrumSource for SpectrumCache {
    fn spectrum(&self, id: SpectrumId) -> Option<Arc<ObservedSpectrum>> {
        self.spectra.get(&id).cloned()
    }

    fn by_scan(&self, scan: u32) -> Vec<Arc<ObservedSpectrum>> {
        self.scans
            .get(&scan)
            .into_iter()
            .flatten()
            .filter_map(|id| self.spectra.get(id).cloned())
            .collect()
    }
}
