//! Orchestration of one consolidation run
//!
//! A run has two phases. The first populates every run-scoped cache
//! (fragment filters, ppm boundaries, diagnostic siblings, paired-quant
//! partners); nothing is scored until it has finished. The second phase
//! applies each per-identification stage in turn, over bounded batches, and
//! finally aggregates the survivors into evidence blocks. Caches are owned by
//! [`Run::execute`] and dropped when it returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use fnv::{FnvBuildHasher, FnvHashMap};
use rayon::prelude::*;
use serde::Serialize;

use crate::aggregate::Aggregator;
use crate::diagnostic::{find_sibling, DiagnosticClassifier, SiblingLookup};
use crate::fragment::{FragmentFilterCache, IonSeriesConfig, IonSeriesFilter};
use crate::localize::Localizer;
use crate::mass::is_valid_residue;
use crate::model::{
    Evidence, Identification, QuantificationEvent, ReporterRow, RunMetadata, SpectrumId,
};
use crate::ppm::PpmBoundaries;
use crate::quant::{PairingCache, QuantResolver};
use crate::settings::Settings;
use crate::spectra::SpectrumSource;
use crate::tmt::extract_reporters;
use crate::Error;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    ReporterExtraction,
    SiblingSearch,
    PartnerSearch,
    PpmFilter,
    Localization,
    Classification,
    Quantification,
    Aggregation,
}

/// Receives `(stage, completed, total)` after every batch
pub trait Progress: Sync {
    fn report(&self, stage: Stage, completed: usize, total: usize);
}

impl<F> Progress for F
where
    F: Fn(Stage, usize, usize) + Sync,
{
    fn report(&self, stage: Stage, completed: usize, total: usize) {
        self(stage, completed, total)
    }
}

/// Everything the external reader supplies for one run
pub struct RunInput<'s> {
    pub identifications: Vec<Identification>,
    pub spectra: &'s dyn SpectrumSource,
    pub events: Vec<QuantificationEvent>,
    pub reporters: Vec<ReporterRow>,
    pub ion_series: Vec<IonSeriesConfig>,
    /// Protein id -> sequence
    pub proteins: FnvHashMap<String, String>,
    pub metadata: RunMetadata,
}

/// Caches that must be complete before any identification is scored
#[derive(Default)]
pub struct RunCaches {
    pub filters: FragmentFilterCache,
    pub ppm: PpmBoundaries,
    pub siblings: SiblingLookup,
    pub pairing: PairingCache,
}

/// Non-fatal errors degrade the affected identification only
fn degrade(ident: &Identification, stage: Stage, result: Result<(), Error>) -> Result<(), Error> {
    match result {
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            log::debug!("peptide {} ({:?}): {}", ident.peptide_id, stage, e);
            Ok(())
        }
        Ok(()) => Ok(()),
    }
}

pub struct Run<'a> {
    settings: &'a Settings,
    cancel: Option<&'a AtomicBool>,
    progress: Option<&'a dyn Progress>,
}

impl<'a> Run<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self {
            settings,
            cancel: None,
            progress: None,
        }
    }

    /// Abort the run, between batches, once `flag` is set
    pub fn with_cancellation(mut self, flag: &'a AtomicBool) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn with_progress(mut self, progress: &'a dyn Progress) -> Self {
        self.progress = Some(progress);
        self
    }

    fn check_cancelled(&self) -> Result<(), Error> {
        match self.cancel {
            Some(flag) if flag.load(Ordering::Relaxed) => Err(Error::Cancelled),
            _ => Ok(()),
        }
    }

    fn report(&self, stage: Stage, completed: usize, total: usize) {
        if let Some(progress) = self.progress {
            progress.report(stage, completed, total);
        }
    }

    /// Apply `f` to every item, one bounded batch at a time
    fn batched<T, F>(&self, stage: Stage, items: &[T], f: F) -> Result<(), Error>
    where
        T: Sync,
        F: Fn(&T) -> Result<(), Error> + Sync,
    {
        let start = Instant::now();
        let mut completed = 0;
        for chunk in items.chunks(self.settings.batch_size) {
            self.check_cancelled()?;
            chunk.par_iter().try_for_each(&f)?;
            completed += chunk.len();
            self.report(stage, completed, items.len());
        }
        log::trace!("- {:?}: {} items in {} ms", stage, items.len(), start.elapsed().as_millis());
        Ok(())
    }

    /// Mutable counterpart of [`Run::batched`]
    fn batched_mut<F>(
        &self,
        stage: Stage,
        idents: &mut [Identification],
        f: F,
    ) -> Result<(), Error>
    where
        F: Fn(&mut Identification) -> Result<(), Error> + Sync,
    {
        let start = Instant::now();
        let total = idents.len();
        let mut completed = 0;
        for chunk in idents.chunks_mut(self.settings.batch_size) {
            self.check_cancelled()?;
            chunk.par_iter_mut().try_for_each(|ident| {
                let result = f(ident);
                degrade(ident, stage, result)
            })?;
            completed += chunk.len();
            self.report(stage, completed, total);
        }
        log::info!("- {:?}: {:8} ms", stage, start.elapsed().as_millis());
        Ok(())
    }

    fn prefilter(&self, idents: Vec<Identification>) -> Vec<Identification> {
        let before = idents.len();
        let kept = idents
            .into_iter()
            .filter(|i| i.search_rank <= self.settings.max_search_rank)
            .filter(|i| i.confidence >= self.settings.min_confidence)
            .filter(|i| {
                let valid = !i.sequence.is_empty() && i.sequence.bytes().all(is_valid_residue);
                if !valid {
                    log::debug!("peptide {}: unrecognized sequence `{}`", i.peptide_id, i.sequence);
                }
                valid
            })
            .collect::<Vec<_>>();
        if kept.len() < before {
            log::info!(
                "- prefilter removed {} of {} identifications",
                before - kept.len(),
                before
            );
        }
        kept
    }

    fn extract_reporters(
        &self,
        idents: &[Identification],
        source: &dyn SpectrumSource,
    ) -> Result<Vec<ReporterRow>, Error> {
        let isobaric = match &self.settings.quant.tmt {
            Some(isobaric) => isobaric,
            None => return Ok(Vec::new()),
        };
        let rows: DashMap<u64, Vec<ReporterRow>, FnvBuildHasher> = DashMap::default();
        self.batched(Stage::ReporterExtraction, idents, |ident| {
            match source.spectrum(ident.spectrum_id) {
                Some(spectrum) => {
                    let extracted = extract_reporters(
                        ident,
                        &spectrum,
                        isobaric,
                        self.settings.quant.reporter_tolerance,
                    );
                    rows.insert(ident.peptide_id, extracted);
                }
                None => log::debug!(
                    "peptide {}: spectrum {} unavailable for reporter extraction",
                    ident.peptide_id,
                    ident.spectrum_id
                ),
            }
            Ok(())
        })?;
        Ok(rows.into_iter().flat_map(|(_, rows)| rows).collect())
    }

    /// Phase one: every cache is complete when this returns
    pub fn populate_caches(
        &self,
        idents: &[Identification],
        ion_series: &[IonSeriesConfig],
        source: &dyn SpectrumSource,
        classifier: &DiagnosticClassifier,
        resolver: &QuantResolver,
    ) -> Result<RunCaches, Error> {
        let start = Instant::now();
        let caches = RunCaches {
            filters: FragmentFilterCache::build(ion_series),
            ppm: PpmBoundaries::estimate(idents, &self.settings.ppm),
            ..Default::default()
        };

        let mut pending = idents
            .iter()
            .filter(|i| !i.activation_method.is_collisional() && classifier.applies(i))
            .map(|i| i.spectrum_id)
            .collect::<Vec<SpectrumId>>();
        pending.sort_unstable();
        pending.dedup();

        let by_spectrum = idents
            .iter()
            .map(|i| (i.spectrum_id, i))
            .collect::<FnvHashMap<_, _>>();
        let diagnostic = &self.settings.diagnostic;
        self.batched(Stage::SiblingSearch, &pending, |spectrum_id| {
            if let Some(ident) = by_spectrum.get(spectrum_id) {
                let sibling = find_sibling(
                    ident,
                    source,
                    diagnostic.sibling_tolerance,
                    diagnostic.sibling_rt,
                );
                caches.siblings.insert(*spectrum_id, sibling.map(|s| s.id));
            }
            Ok(())
        })?;

        if let QuantResolver::Paired(paired) = resolver {
            let linked = idents
                .iter()
                .filter(|i| i.quant.is_some())
                .collect::<Vec<_>>();
            self.batched(Stage::PartnerSearch, &linked, |ident| {
                paired.populate(ident, &caches.pairing)
            })?;
        }

        log::info!(
            "- caches: {:8} ms ({} ion series filters, {} siblings, {} partner searches)",
            start.elapsed().as_millis(),
            caches.filters.len(),
            caches.siblings.len(),
            caches.pairing.len()
        );
        Ok(caches)
    }

    fn localize(
        &self,
        ident: &mut Identification,
        localizer: &Localizer,
        caches: &RunCaches,
        source: &dyn SpectrumSource,
    ) -> Result<(), Error> {
        let filter = match caches.filters.get(ident.processing_node) {
            Some(filter) => filter,
            None if caches.filters.is_empty() => IonSeriesFilter::default(),
            None => {
                return Err(Error::UpstreamUnavailable(format!(
                    "ion series configuration for node {}",
                    ident.processing_node
                )))
            }
        };
        let spectrum = source
            .spectrum(ident.spectrum_id)
            .ok_or_else(|| Error::UpstreamUnavailable(format!("spectrum {}", ident.spectrum_id)))?;
        localizer.localize(ident, &spectrum, filter).map(|_| ())
    }

    pub fn execute(&self, input: RunInput<'_>) -> Result<Evidence, Error> {
        let start = Instant::now();
        let settings = self.settings;

        let localizer = Localizer::new(
            &settings.localize,
            settings.fragment_tol,
            settings.envelope_filter,
        )?;
        let classifier = DiagnosticClassifier::new(
            settings.diagnostic.rule.clone(),
            settings.diagnostic.tolerance,
        )?;

        let RunInput {
            identifications,
            spectra: source,
            events,
            mut reporters,
            ion_series,
            proteins,
            mut metadata,
        } = input;

        let mut idents = self.prefilter(identifications);
        log::info!("consolidating {} identifications", idents.len());

        if reporters.is_empty() {
            reporters = self.extract_reporters(&idents, source)?;
        }
        let resolver = QuantResolver::new(
            settings.quant.scheme.as_ref(),
            events,
            &reporters,
            settings.quant.partner,
        )?;

        let caches = self.populate_caches(&idents, &ion_series, source, &classifier, &resolver)?;

        self.check_cancelled()?;
        let ppm_start = Instant::now();
        let total = idents.len();
        idents = idents
            .into_par_iter()
            .filter_map(|mut ident| caches.ppm.accept(&mut ident).then_some(ident))
            .collect();
        self.report(Stage::PpmFilter, total, total);
        log::info!(
            "- {:?}: {:8} ms ({} of {} identifications accepted)",
            Stage::PpmFilter,
            ppm_start.elapsed().as_millis(),
            idents.len(),
            total
        );

        self.batched_mut(Stage::Localization, &mut idents, |ident| {
            self.localize(ident, &localizer, &caches, source)
        })?;

        self.batched_mut(Stage::Classification, &mut idents, |ident| {
            if ident.invalid || !classifier.applies(ident) {
                return Ok(());
            }
            match classifier.classify(ident, source, &caches.siblings) {
                Ok(classification) => {
                    ident.classification = Some(classification);
                    Ok(())
                }
                Err(Error::InsufficientEvidence) => Ok(()),
                Err(e) => Err(e),
            }
        })?;

        self.batched_mut(Stage::Quantification, &mut idents, |ident| {
            ident.resolved_quant = resolver.resolve(ident, &caches.pairing)?;
            Ok(())
        })?;

        self.check_cancelled()?;
        metadata
            .software_versions
            .insert("siteline".into(), settings.version.clone());
        let evidence = Aggregator::new(settings.aggregate, &proteins).aggregate(idents, metadata);
        self.report(Stage::Aggregation, 1, 1);

        log::info!(
            "emitted {} evidence blocks for {} proteins in {} ms",
            evidence.proteins.values().map(Vec::len).sum::<usize>(),
            evidence.proteins.len(),
            start.elapsed().as_millis()
        );
        drop(caches);
        Ok(evidence)
    }
}
