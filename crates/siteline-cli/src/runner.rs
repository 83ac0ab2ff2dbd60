use std::time::Instant;

use anyhow::Context;
use fnv::FnvHashMap;
use serde::Serialize;
use siteline_core::model::Evidence;
use siteline_core::run::{Run, RunInput, Stage};
use siteline_core::settings::Settings;
use siteline_core::spectra::SpectrumCache;

use crate::input::Job;

#[derive(Serialize)]
/// Serialized output of one run: the parameters actually used, and the
/// evidence map
pub struct Report<'a> {
    pub settings: &'a Settings,
    pub evidence: &'a Evidence,
}

pub struct Runner {
    job: Job,
    start: Instant,
}

impl Runner {
    pub fn new(job: Job) -> Self {
        Self {
            job,
            start: Instant::now(),
        }
    }

    /// Execute the run, returning the evidence map
    pub fn evidence(self) -> anyhow::Result<(Settings, Evidence, Option<String>)> {
        let Job {
            settings,
            bundle,
            output,
        } = self.job;

        let spectra = bundle.spectra.into_iter().collect::<SpectrumCache>();
        log::info!(
            "loaded {} identifications, {} spectra, {} quantification events",
            bundle.identifications.len(),
            spectra.len(),
            bundle.events.len()
        );

        let progress = |stage: Stage, completed: usize, total: usize| {
            log::trace!("- {:?}: {}/{}", stage, completed, total);
        };

        let evidence = Run::new(&settings)
            .with_progress(&progress)
            .execute(RunInput {
                identifications: bundle.identifications,
                spectra: &spectra,
                events: bundle.events,
                reporters: bundle.reporters,
                ion_series: bundle.ion_series,
                proteins: bundle.proteins.into_iter().collect::<FnvHashMap<_, _>>(),
                metadata: bundle.metadata,
            })?;

        Ok((settings, evidence, output))
    }

    pub fn run(self) -> anyhow::Result<()> {
        let start = self.start;
        let (settings, evidence, output) = self.evidence()?;

        let report = Report {
            settings: &settings,
            evidence: &evidence,
        };
        match output {
            Some(path) => {
                let file = std::fs::File::create(&path)
                    .with_context(|| format!("Failed to create `{path}`"))?;
                serde_json::to_writer_pretty(std::io::BufWriter::new(file), &report)?;
                log::info!("wrote {}", path);
            }
            None => {
                let stdout = std::io::stdout();
                serde_json::to_writer_pretty(stdout.lock(), &report)?;
            }
        }

        log::info!("finished in {}s", start.elapsed().as_secs());
        Ok(())
    }
}
