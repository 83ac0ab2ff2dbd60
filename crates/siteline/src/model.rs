//! Records flowing through the consolidation engine
//!
//! Identifications, spectra and quantification events are produced by an
//! external reader; evidence blocks are handed to an external writer. Nothing
//! in here knows about file formats.

use std::collections::BTreeMap;
use std::fmt::Write;

use serde::{Deserialize, Serialize};

use crate::mass::PROTON;
use crate::quant::{ChannelId, QuantResultId};

pub type SpectrumId = u64;

/// Position sentinel for modifications on the peptide N-terminus
pub const N_TERMINUS: usize = 0;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivationMethod {
    Cid,
    Hcd,
    Etd,
    Ethcd,
    Etcid,
    Ecd,
    Other,
}

impl ActivationMethod {
    /// Collisional activation (CID/HCD) produces the low-mass diagnostic ions
    /// used for classification, but does not preserve labile modifications
    /// well enough for localization
    pub fn is_collisional(&self) -> bool {
        matches!(self, ActivationMethod::Cid | ActivationMethod::Hcd)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Default for Confidence {
    fn default() -> Self {
        Confidence::High
    }
}

/// Shift a peptide-local position by `offset` residues into protein
/// coordinates. The N-terminal sentinel lands on the peptide's first residue.
pub fn protein_position(position: usize, offset: usize) -> usize {
    position.max(1) + offset
}

/// Peptide-local position, or protein position when the peptide's offset
/// within its protein is known
fn place(position: usize, offset: Option<usize>) -> usize {
    match offset {
        Some(offset) => protein_position(position, offset),
        None => position,
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Modification {
    /// 1-based residue position, or [`N_TERMINUS`]
    pub position: usize,
    pub name: String,
    pub delta_mass: f64,
    /// Inclusive range of residues that could carry this modification.
    /// `None` means the modification is localized to `position`
    #[serde(default)]
    pub ambiguity: Option<(usize, usize)>,
}

impl Modification {
    pub fn new<S: Into<String>>(position: usize, name: S, delta_mass: f64) -> Self {
        Self {
            position,
            name: name.into(),
            delta_mass,
            ambiguity: None,
        }
    }

    pub fn start(&self) -> usize {
        self.ambiguity.map(|(lo, _)| lo).unwrap_or(self.position)
    }

    pub fn end(&self) -> usize {
        self.ambiguity.map(|(_, hi)| hi).unwrap_or(self.position)
    }

    pub fn is_ambiguous(&self) -> bool {
        self.start() != self.end()
    }

    /// Render as `start-end(name)`, or `position(name)` when the range
    /// collapses to a single residue. With an `offset`, positions are shifted
    /// from peptide-local into protein coordinates.
    pub fn render(&self, offset: Option<usize>) -> String {
        let mut s = String::new();
        if self.is_ambiguous() {
            let _ = write!(
                s,
                "{}-{}({})",
                place(self.start(), offset),
                place(self.end(), offset),
                self.name
            );
        } else {
            let _ = write!(s, "{}({})", place(self.start(), offset), self.name);
        }
        s
    }
}

/// Count of modifications per name, e.g. `1xHexNAc; 2xPhospho`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Composition(pub BTreeMap<String, usize>);

impl Composition {
    pub fn from_modifications<'a, I>(mods: I) -> Self
    where
        I: IntoIterator<Item = &'a Modification>,
    {
        let mut counts = BTreeMap::new();
        for m in mods {
            *counts.entry(m.name.clone()).or_insert(0) += 1;
        }
        Composition(counts)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for Composition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (idx, (name, count)) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}x{}", count, name)?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Precursor {
    /// Observed singly protonated mass (MH+)
    pub mass: f64,
    pub charge: u8,
    /// Retention time, in minutes
    pub rt: f64,
    pub scan: u32,
    pub file_id: u32,
}

impl Precursor {
    /// Observed m/z at the reported charge state
    pub fn mz(&self) -> f64 {
        let z = self.charge.max(1) as f64;
        (self.mass + (z - 1.0) * PROTON) / z
    }
}

/// Link between an identification and the quantification tables
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QuantLink {
    pub quant_result_id: QuantResultId,
    /// Number of differentially labeled sites (e.g. K/R for SILAC)
    #[serde(default)]
    pub label_count: u8,
    #[serde(default)]
    pub high_signal_to_noise: bool,
    #[serde(default)]
    pub low_signal_to_noise: bool,
}

impl QuantLink {
    pub fn acceptable_signal_to_noise(&self) -> bool {
        self.high_signal_to_noise || !self.low_signal_to_noise
    }
}

/// Outcome of diagnostic-ion classification
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Subtype(String),
    Unknown,
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Classification::Subtype(s) => f.write_str(s),
            Classification::Unknown => f.write_str("Unknown"),
        }
    }
}

/// Per-identification quantification, as resolved by [`crate::quant`]
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentQuant {
    /// Both channels resolved: channel 2 area over channel 1 area
    Ratio { quant_result_id: QuantResultId, ratio: f64 },
    /// Only one channel observed, but a partner event exists
    Singlet { quant_result_id: QuantResultId, channel: ChannelId },
    /// Reporter channel intensities
    Reporter { channels: BTreeMap<ChannelId, f64> },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Identification {
    /// Unique row identifier assigned by the search engine
    pub peptide_id: u64,
    pub spectrum_id: SpectrumId,
    pub sequence: String,
    #[serde(default)]
    pub modifications: Vec<Modification>,
    pub activation_method: ActivationMethod,
    pub score: f64,
    #[serde(default = "default_rank")]
    pub search_rank: u32,
    #[serde(default)]
    pub confidence: Confidence,
    #[serde(default)]
    pub protein_refs: Vec<String>,
    /// Search node that produced this identification
    #[serde(default)]
    pub processing_node: u32,
    pub precursor: Precursor,
    #[serde(default)]
    pub quant: Option<QuantLink>,
    /// Precomputed modification summary, if the search engine reported one
    #[serde(default)]
    pub composition: Option<Composition>,

    /// Modifications whose position could not be uniquely determined
    #[serde(default)]
    pub possible_mods: Option<Vec<Modification>>,
    #[serde(skip)]
    pub ppm_error: Option<f64>,
    #[serde(skip)]
    pub invalid: bool,
    #[serde(skip)]
    pub multi_peptide: bool,
    #[serde(skip)]
    pub classification: Option<Classification>,
    #[serde(skip)]
    pub resolved_quant: Option<IdentQuant>,
}

fn default_rank() -> u32 {
    1
}

impl Identification {
    pub fn new<S: Into<String>>(
        peptide_id: u64,
        spectrum_id: SpectrumId,
        sequence: S,
        activation_method: ActivationMethod,
        score: f64,
    ) -> Self {
        Self {
            peptide_id,
            spectrum_id,
            sequence: sequence.into(),
            modifications: Vec::new(),
            activation_method,
            score,
            search_rank: 1,
            confidence: Confidence::High,
            protein_refs: Vec::new(),
            processing_node: 0,
            precursor: Precursor::default(),
            quant: None,
            composition: None,
            possible_mods: None,
            ppm_error: None,
            invalid: false,
            multi_peptide: false,
            classification: None,
            resolved_quant: None,
        }
    }

    /// Per-residue modification mass, index 0 holds N-terminal deltas
    pub fn residue_deltas(&self) -> Vec<f64> {
        let mut deltas = vec![0.0; self.sequence.len() + 1];
        for m in self
            .modifications
            .iter()
            .chain(self.possible_mods.iter().flatten())
        {
            if let Some(slot) = deltas.get_mut(m.position) {
                *slot += m.delta_mass;
            }
        }
        deltas
    }

    /// Move modifications matching `predicate` from the localized list into
    /// the possible-mods list, deriving a composition summary if none exists
    pub fn mark_possible<F>(&mut self, mut predicate: F)
    where
        F: FnMut(&Modification) -> bool,
    {
        let (moved, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.modifications)
            .into_iter()
            .partition(|m| predicate(m));
        self.modifications = kept;
        if moved.is_empty() {
            return;
        }
        if self.composition.is_none() {
            self.composition = Some(Composition::from_modifications(
                self.modifications.iter().chain(moved.iter()),
            ));
        }
        self.possible_mods.get_or_insert_with(Vec::new).extend(moved);
    }

    /// Canonical encoding of ambiguous modification ranges, sorted by
    /// ambiguity start, then end
    pub fn ambiguous_signature(&self, offset: Option<usize>) -> Option<String> {
        let mods = self.possible_mods.as_ref()?;
        let mut sorted = mods.iter().collect::<Vec<_>>();
        sorted.sort_by(|a, b| {
            a.start()
                .cmp(&b.start())
                .then(a.end().cmp(&b.end()))
                .then(a.name.cmp(&b.name))
        });
        Some(
            sorted
                .into_iter()
                .map(|m| m.render(offset))
                .collect::<Vec<_>>()
                .join(";"),
        )
    }

    /// Canonical encoding of localized modification sites
    pub fn site_signature(&self) -> String {
        let mut sorted = self.modifications.iter().collect::<Vec<_>>();
        sorted.sort_by(|a, b| a.position.cmp(&b.position).then(a.name.cmp(&b.name)));
        sorted
            .into_iter()
            .map(|m| m.render(None))
            .collect::<Vec<_>>()
            .join(";")
    }
}

/// A centroided, already picked fragment peak
#[derive(Copy, Clone, Debug, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Peak {
    pub mz: f64,
    pub intensity: f64,
    /// Charge assigned by the acquisition software, if any
    #[serde(default)]
    pub charge: Option<u8>,
    #[serde(default)]
    pub signal_to_noise: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservedSpectrum {
    pub id: SpectrumId,
    /// Peaks, sorted by m/z in ascending order
    pub peaks: Vec<Peak>,
    pub activation_method: Option<ActivationMethod>,
    pub precursor: Precursor,
}

impl ObservedSpectrum {
    pub fn new(
        id: SpectrumId,
        mut peaks: Vec<Peak>,
        activation_method: ActivationMethod,
        precursor: Precursor,
    ) -> Self {
        peaks.sort_by(|a, b| a.mz.total_cmp(&b.mz));
        Self {
            id,
            peaks,
            activation_method: Some(activation_method),
            precursor,
        }
    }

    /// Restore the ascending m/z ordering, for spectra built field-by-field
    pub fn sort(&mut self) {
        self.peaks.sort_by(|a, b| a.mz.total_cmp(&b.mz));
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuantificationEvent {
    pub quant_result_id: QuantResultId,
    pub channel_id: ChannelId,
    /// Monoisotopic m/z of the event
    pub mass: f64,
    /// (start, end) retention time window
    pub rt_window: (f64, f64),
    /// Integrated area
    pub intensity: f64,
    #[serde(default)]
    pub signal_to_noise: f64,
    pub file_id: u32,
}

/// One reporter-channel reading for an identification row
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReporterRow {
    pub peptide_id: u64,
    pub channel_id: ChannelId,
    pub height: f64,
}

/// Group-level quantification attached to an evidence block
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupQuant {
    Ratio { ratio: f64, mad: f64 },
    /// Single channel observed with a confirmed partner event
    Singlet { channel: ChannelId },
    /// More than one distinct singlet channel within the group
    ConflictingSinglets,
    Reporter { channels: BTreeMap<ChannelId, f64> },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProteinEvidenceBlock {
    pub protein_id: String,
    pub sequence: String,
    pub quant: Option<GroupQuant>,
    /// Localized modification positions, in protein coordinates when
    /// `peptide_start` is known
    pub sites: Vec<usize>,
    pub ambiguous_mods: Vec<String>,
    pub composition: String,
    pub spectra_refs: Vec<SpectrumId>,
    /// 1-based offset of the peptide within the protein
    pub peptide_start: Option<usize>,
    pub multi_protein: bool,
    pub multi_peptide: bool,
    pub classification: Option<Classification>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    #[serde(default)]
    pub source_files: Vec<String>,
    #[serde(default)]
    pub software_versions: BTreeMap<String, String>,
    #[serde(default)]
    pub score_type: String,
}

/// Result of a consolidation run, keyed by protein identifier
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Evidence {
    pub proteins: BTreeMap<String, Vec<ProteinEvidenceBlock>>,
    pub metadata: RunMetadata,
}
