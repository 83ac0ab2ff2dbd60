//! Properties that must hold for arbitrary inputs

use quickcheck_macros::quickcheck;
use siteline_core::ion_series::{theoretical_ions, PeptideMasses, ALL_SERIES};
use siteline_core::model::{ActivationMethod, IdentQuant, Identification};
use siteline_core::ppm::BoundaryEstimator;
use siteline_core::quant::group_quant;

const RESIDUES: &[u8] = b"ACDEFGHIKLMNPQRSTVWY";

fn peptide(residues: &[u8], deltas: &[u8]) -> PeptideMasses {
    let sequence = residues
        .iter()
        .map(|r| RESIDUES[*r as usize % RESIDUES.len()])
        .collect::<Vec<_>>();
    let deltas = deltas.iter().map(|d| *d as f64 * 0.5).collect::<Vec<_>>();
    PeptideMasses::new(&sequence, &deltas)
}

#[quickcheck]
fn ions_are_positive_and_increasing(residues: Vec<u8>, deltas: Vec<u8>, charge: u8) -> bool {
    let peptide = peptide(&residues, &deltas);
    let max_charge = charge % 5 + 1;
    let ions = theoretical_ions(&peptide, ALL_SERIES, max_charge);

    if ions.iter().any(|ion| ion.mz <= 0.0) {
        return false;
    }
    for series in ALL_SERIES {
        for z in 1..=max_charge {
            let masses = ions
                .iter()
                .filter(|ion| ion.series == series && ion.charge == z)
                .map(|ion| (ion.index, ion.mz))
                .collect::<Vec<_>>();
            if masses.windows(2).any(|w| w[1].0 <= w[0].0 || w[1].1 <= w[0].1) {
                return false;
            }
        }
    }
    true
}

#[quickcheck]
fn ppm_estimate_is_idempotent(population: Vec<(i16, u8)>) -> bool {
    let population = population
        .into_iter()
        .map(|(ppm, score)| (ppm as f64 / 1000.0, score as f64))
        .collect::<Vec<_>>();
    let estimator = BoundaryEstimator::default();
    let first = estimator.estimate(&population);
    let second = estimator.estimate(&population);

    let mut reversed = population.clone();
    reversed.reverse();
    first == second && first == estimator.estimate(&reversed)
}

#[quickcheck]
fn group_ratio_ignores_arrival_order(readings: Vec<(u8, u16)>) -> bool {
    // The same quantification result always reports the same ratio
    let idents = readings
        .iter()
        .enumerate()
        .map(|(idx, (id, _))| {
            let ratio = readings
                .iter()
                .find(|(other, _)| other == id)
                .map(|(_, r)| *r as f64 + 1.0)
                .unwrap_or(1.0);
            let mut ident =
                Identification::new(idx as u64, idx as u64, "PEPTIDE", ActivationMethod::Etd, 1.0);
            ident.resolved_quant = Some(IdentQuant::Ratio {
                quant_result_id: *id as u64,
                ratio,
            });
            ident
        })
        .collect::<Vec<_>>();

    let forward = group_quant(&idents);
    let backward = group_quant(idents.iter().rev());
    forward == backward
}
