use std::collections::BTreeMap;

use anyhow::{ensure, Context};
use clap::ArgMatches;
use serde::{Deserialize, Serialize};
use siteline_core::fragment::IonSeriesConfig;
use siteline_core::model::{
    Identification, ObservedSpectrum, QuantificationEvent, ReporterRow, RunMetadata,
};
use siteline_core::settings::{Options, Settings};

/// Records already read out of a search result container
#[derive(Serialize, Deserialize, Default, Debug)]
pub struct Bundle {
    pub identifications: Vec<Identification>,
    #[serde(default)]
    pub spectra: Vec<ObservedSpectrum>,
    #[serde(default)]
    pub events: Vec<QuantificationEvent>,
    #[serde(default)]
    pub reporters: Vec<ReporterRow>,
    #[serde(default)]
    pub ion_series: Vec<IonSeriesConfig>,
    /// Protein id -> sequence
    #[serde(default)]
    pub proteins: BTreeMap<String, String>,
    #[serde(default)]
    pub metadata: RunMetadata,
}

#[derive(Deserialize)]
/// Input parameters deserialized from JSON file
pub struct Input {
    #[serde(flatten)]
    options: Options,
    input: Option<String>,
    output: Option<String>,
}

/// Everything needed to start a run
pub struct Job {
    pub settings: Settings,
    pub bundle: Bundle,
    /// Write results here, or to stdout if absent
    pub output: Option<String>,
}

pub fn read_json<T>(path: &str) -> anyhow::Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

impl Input {
    pub fn from_arguments(matches: ArgMatches) -> anyhow::Result<Self> {
        let path = matches
            .get_one::<String>("parameters")
            .context("required parameters")?;
        let mut input = Input::load(path)
            .with_context(|| format!("Failed to read parameters from `{path}`"))?;

        // Handle JSON configuration overrides
        if let Some(bundle) = matches.get_one::<String>("input") {
            log::trace!("overriding `input` parameter.");
            input.input = Some(bundle.into());
        }
        if let Some(output) = matches.get_one::<String>("output") {
            log::trace!("overriding `output` parameter.");
            input.output = Some(output.into());
        }
        if let Some(batch_size) = matches.get_one::<u16>("batch-size").copied() {
            log::trace!("overriding `batch_size` parameter.");
            input.options.batch_size = Some(batch_size as usize);
        }

        ensure!(
            input.input.is_some(),
            "`input` must be set. For more information try '--help'"
        );

        Ok(input)
    }

    pub fn load<S: AsRef<str>>(path: S) -> anyhow::Result<Self> {
        read_json(path.as_ref())
    }

    pub fn build(self) -> anyhow::Result<Job> {
        let path = self.input.context("`input` must be set")?;
        let bundle: Bundle = read_json(&path)
            .with_context(|| format!("Failed to read input bundle from `{path}`"))?;
        if bundle.identifications.is_empty() {
            log::warn!("`{}` contains no identifications", path);
        }
        if bundle.spectra.is_empty() {
            log::warn!(
                "`{}` contains no spectra: localization and classification will be skipped",
                path
            );
        }

        let mut bundle = bundle;
        if !bundle.metadata.source_files.contains(&path) {
            bundle.metadata.source_files.push(path);
        }

        Ok(Job {
            settings: self.options.into(),
            bundle,
            output: self.output,
        })
    }
}
