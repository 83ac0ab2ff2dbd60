//! Cross-spectrum consolidation of identifications into per-protein
//! evidence blocks
//!
//! Runs in two passes. The first pass looks at all identifications assigned
//! to one spectrum: conflicting peptide calls are resolved or discarded, and
//! conflicting site assignments are widened into ambiguous ranges. The second
//! pass merges identifications that share a sequence and modification
//! signature, and emits one block per matched protein.

use std::collections::{BTreeMap, BTreeSet};

use fnv::FnvHashMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::model::{
    protein_position, Classification, Composition, Evidence, IdentQuant, Identification,
    ProteinEvidenceBlock, RunMetadata, SpectrumId,
};
use crate::quant::group_quant;

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateSettings {
    /// Within one spectrum, drop identifications whose score trails the best
    /// by more than this
    pub max_delta_score: Option<f64>,
}

/// Two sequences of equal length that differ only by Leucine/Isoleucine
/// substitutions
pub fn leucine_isoleucine_variants(a: &str, b: &str) -> bool {
    a.len() == b.len()
        && a.bytes().zip(b.bytes()).all(|(x, y)| {
            x == y || matches!((x, y), (b'I', b'L') | (b'L', b'I'))
        })
}

/// Resolve the peptide calls for one spectrum.
///
/// Calls that only differ by I/L are kept and flagged `multi_peptide`; any
/// other disagreement means the spectrum cannot be trusted, and every call
/// is discarded. Surviving calls are then filtered by score difference.
pub fn consolidate_spectrum(
    mut idents: Vec<Identification>,
    max_delta_score: Option<f64>,
) -> Vec<Identification> {
    let sequences = idents
        .iter()
        .map(|i| i.sequence.as_str())
        .unique()
        .collect::<Vec<_>>();

    if sequences.len() > 1 {
        let reference = sequences[0];
        if !sequences
            .iter()
            .all(|s| leucine_isoleucine_variants(reference, s))
        {
            log::debug!(
                "spectrum {}: discarding {} irreconcilable calls",
                idents[0].spectrum_id,
                idents.len()
            );
            return Vec::new();
        }
        for ident in idents.iter_mut() {
            ident.multi_peptide = true;
        }
    }

    if let Some(delta) = max_delta_score {
        let best = idents
            .iter()
            .map(|i| i.score)
            .fold(f64::NEG_INFINITY, f64::max);
        idents.retain(|i| best - i.score <= delta);
    }
    idents
}

/// If the non-collisional identifications of one spectrum disagree on
/// where modifications sit, widen every modification in the spectrum to
/// the whole peptide. Returns `true` if anything was widened.
pub fn widen_conflicting_sites(idents: &mut [Identification]) -> bool {
    let signatures = idents
        .iter()
        .filter(|i| !i.activation_method.is_collisional())
        .filter(|i| i.possible_mods.is_none() && !i.modifications.is_empty())
        .map(|i| i.site_signature())
        .collect::<BTreeSet<_>>();

    if signatures.len() <= 1 {
        return false;
    }

    for ident in idents.iter_mut() {
        let len = ident.sequence.len();
        ident.mark_possible(|_| true);
        for m in ident.possible_mods.iter_mut().flatten() {
            m.ambiguity = Some((m.position.min(1), len));
        }
    }
    true
}

/// Grouping key: sequence plus localized and ambiguous modification encodings
fn group_key(ident: &Identification) -> (String, String, String) {
    (
        ident.sequence.clone(),
        ident.site_signature(),
        ident.ambiguous_signature(None).unwrap_or_default(),
    )
}

/// Consensus classification: the shared subtype if every classified member
/// agrees, otherwise Unknown
fn consensus(idents: &[&Identification]) -> Option<Classification> {
    let calls = idents
        .iter()
        .filter_map(|i| i.classification.as_ref())
        .unique()
        .collect::<Vec<_>>();
    match calls.as_slice() {
        [] => None,
        [single] => Some((*single).clone()),
        _ => Some(Classification::Unknown),
    }
}

pub struct Aggregator<'a> {
    settings: AggregateSettings,
    /// Protein id -> protein sequence, used to place peptides
    proteins: &'a FnvHashMap<String, String>,
}

impl<'a> Aggregator<'a> {
    pub fn new(settings: AggregateSettings, proteins: &'a FnvHashMap<String, String>) -> Self {
        Self { settings, proteins }
    }

    fn peptide_start(&self, protein: &str, peptide: &str) -> Option<usize> {
        self.proteins
            .get(protein)
            .and_then(|sequence| sequence.find(peptide))
            .map(|idx| idx + 1)
    }

    /// Spectrum pass: per-spectrum consolidation and site widening
    pub fn by_spectrum(&self, idents: Vec<Identification>) -> Vec<Identification> {
        let mut spectra: BTreeMap<SpectrumId, Vec<Identification>> = BTreeMap::new();
        for ident in idents {
            spectra.entry(ident.spectrum_id).or_default().push(ident);
        }

        let mut widened = 0;
        let mut kept = Vec::new();
        for (_, group) in spectra {
            let mut group = consolidate_spectrum(group, self.settings.max_delta_score);
            if widen_conflicting_sites(&mut group) {
                widened += 1;
            }
            kept.extend(group);
        }
        if widened > 0 {
            log::debug!("widened site assignments on {} spectra", widened);
        }
        kept
    }

    fn block(
        &self,
        protein: &str,
        members: &[&Identification],
        multi_protein: bool,
    ) -> ProteinEvidenceBlock {
        let representative = members[0];
        let sequence = representative.sequence.clone();
        let peptide_start = self.peptide_start(protein, &sequence);
        let offset = peptide_start.map(|s| s - 1);

        let quant_members = members
            .iter()
            .copied()
            .filter(|i| {
                !i.activation_method.is_collisional()
                    || matches!(i.resolved_quant, Some(IdentQuant::Reporter { .. }))
            })
            .filter(|i| i.resolved_quant.is_some())
            .collect::<Vec<_>>();
        let acceptable = quant_members.iter().any(|i| {
            i.quant
                .as_ref()
                .map(|link| link.acceptable_signal_to_noise())
                .unwrap_or(true)
        });
        let quant = match acceptable {
            true => group_quant(quant_members),
            false => None,
        };

        let sites = representative
            .modifications
            .iter()
            .map(|m| match offset {
                Some(offset) => protein_position(m.position, offset),
                None => m.position,
            })
            .sorted()
            .dedup()
            .collect();

        let ambiguous_mods = members
            .iter()
            .filter_map(|i| i.ambiguous_signature(offset))
            .unique()
            .sorted()
            .collect();

        let composition = members
            .iter()
            .find_map(|i| i.composition.clone())
            .unwrap_or_else(|| {
                Composition::from_modifications(
                    representative
                        .modifications
                        .iter()
                        .chain(representative.possible_mods.iter().flatten()),
                )
            })
            .to_string();

        ProteinEvidenceBlock {
            protein_id: protein.to_string(),
            sequence,
            quant,
            sites,
            ambiguous_mods,
            composition,
            spectra_refs: members.iter().map(|i| i.spectrum_id).sorted().dedup().collect(),
            peptide_start,
            multi_protein,
            multi_peptide: members.iter().any(|i| i.multi_peptide),
            classification: consensus(members),
        }
    }

    /// Group pass: merge identifications by (sequence, signature) and emit
    /// one block per protein
    pub fn by_group(&self, idents: &[Identification], metadata: RunMetadata) -> Evidence {
        let mut groups: BTreeMap<_, Vec<&Identification>> = BTreeMap::new();
        let mut invalid = 0;
        for ident in idents {
            if ident.invalid {
                invalid += 1;
                continue;
            }
            groups.entry(group_key(ident)).or_default().push(ident);
        }
        if invalid > 0 {
            log::debug!("excluded {} invalid identifications", invalid);
        }

        let mut proteins: BTreeMap<String, Vec<ProteinEvidenceBlock>> = BTreeMap::new();
        for (_, mut members) in groups {
            members.sort_by(|a, b| {
                b.score
                    .total_cmp(&a.score)
                    .then(a.peptide_id.cmp(&b.peptide_id))
            });
            let refs = members
                .iter()
                .flat_map(|i| i.protein_refs.iter())
                .unique()
                .sorted()
                .collect::<Vec<_>>();
            if refs.is_empty() {
                log::trace!("{}: no protein references", members[0].sequence);
            }
            let multi_protein = refs.len() > 1;
            for protein in refs {
                let block = self.block(protein, &members, multi_protein);
                proteins.entry(protein.clone()).or_default().push(block);
            }
        }

        for blocks in proteins.values_mut() {
            blocks.sort_by(|a, b| {
                a.peptide_start
                    .cmp(&b.peptide_start)
                    .then_with(|| a.sequence.cmp(&b.sequence))
                    .then_with(|| a.sites.cmp(&b.sites))
                    .then_with(|| a.ambiguous_mods.cmp(&b.ambiguous_mods))
            });
        }

        Evidence { proteins, metadata }
    }

    pub fn aggregate(&self, idents: Vec<Identification>, metadata: RunMetadata) -> Evidence {
        let idents = self.by_spectrum(idents);
        self.by_group(&idents, metadata)
    }
}
