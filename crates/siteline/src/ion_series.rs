use serde::{Deserialize, Serialize};

use crate::mass::{Mass, CO, H2O, HYDROGEN, NH3, PROTON};
use crate::model::Identification;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Series {
    A,
    AH2O,
    ANH3,
    B,
    BH2O,
    BNH3,
    C,
    CM1,
    CP1,
    CM2,
    CP2,
    CM3,
    CP3,
    X,
    Y,
    YH2O,
    YNH3,
    Z,
    ZM1,
    ZP1,
    ZM2,
    ZP2,
    ZM3,
    ZP3,
}

pub const ALL_SERIES: [Series; 24] = [
    Series::A,
    Series::AH2O,
    Series::ANH3,
    Series::B,
    Series::BH2O,
    Series::BNH3,
    Series::C,
    Series::CM1,
    Series::CP1,
    Series::CM2,
    Series::CP2,
    Series::CM3,
    Series::CP3,
    Series::X,
    Series::Y,
    Series::YH2O,
    Series::YNH3,
    Series::Z,
    Series::ZM1,
    Series::ZP1,
    Series::ZM2,
    Series::ZP2,
    Series::ZM3,
    Series::ZP3,
];

impl Series {
    /// Does this series contain the peptide N-terminus?
    pub fn is_n_terminal(&self) -> bool {
        matches!(
            self,
            Series::A
                | Series::AH2O
                | Series::ANH3
                | Series::B
                | Series::BH2O
                | Series::BNH3
                | Series::C
                | Series::CM1
                | Series::CP1
                | Series::CM2
                | Series::CP2
                | Series::CM3
                | Series::CP3
        )
    }

    /// Is this one of the primary backbone cleavage series (b/y-type) used
    /// to confirm cleavage positions?
    pub fn confirms_cleavage(&self) -> bool {
        matches!(self, Series::B | Series::Y | Series::C | Series::Z)
    }

    /// Neutral mass offset applied to the cumulative residue mass
    pub fn offset(&self) -> f64 {
        match self {
            Series::A => -CO,
            Series::AH2O => -CO - H2O,
            Series::ANH3 => -CO - NH3,
            Series::B => 0.0,
            Series::BH2O => -H2O,
            Series::BNH3 => -NH3,
            Series::C => NH3,
            Series::CM1 => NH3 - HYDROGEN,
            Series::CP1 => NH3 + HYDROGEN,
            Series::CM2 => NH3 - 2.0 * HYDROGEN,
            Series::CP2 => NH3 + 2.0 * HYDROGEN,
            Series::CM3 => NH3 - 3.0 * HYDROGEN,
            Series::CP3 => NH3 + 3.0 * HYDROGEN,
            Series::X => H2O + CO - 2.0 * HYDROGEN,
            Series::Y => H2O,
            Series::YH2O => 0.0,
            Series::YNH3 => H2O - NH3,
            Series::Z => H2O - NH3,
            Series::ZM1 => H2O - NH3 - HYDROGEN,
            Series::ZP1 => H2O - NH3 + HYDROGEN,
            Series::ZM2 => H2O - NH3 - 2.0 * HYDROGEN,
            Series::ZP2 => H2O - NH3 + 2.0 * HYDROGEN,
            Series::ZM3 => H2O - NH3 - 3.0 * HYDROGEN,
            Series::ZP3 => H2O - NH3 + 3.0 * HYDROGEN,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Series::A => "a",
            Series::AH2O => "a_h2o",
            Series::ANH3 => "a_nh3",
            Series::B => "b",
            Series::BH2O => "b_h2o",
            Series::BNH3 => "b_nh3",
            Series::C => "c",
            Series::CM1 => "c_m1",
            Series::CP1 => "c_p1",
            Series::CM2 => "c_m2",
            Series::CP2 => "c_p2",
            Series::CM3 => "c_m3",
            Series::CP3 => "c_p3",
            Series::X => "x",
            Series::Y => "y",
            Series::YH2O => "y_h2o",
            Series::YNH3 => "y_nh3",
            Series::Z => "z",
            Series::ZM1 => "z_m1",
            Series::ZP1 => "z_p1",
            Series::ZM2 => "z_m2",
            Series::ZP2 => "z_p2",
            Series::ZM3 => "z_m3",
            Series::ZP3 => "z_p3",
        }
    }

    pub(crate) fn bit(&self) -> u32 {
        1 << (*self as u32)
    }
}

/// Residue masses of a peptide with modification deltas folded in
#[derive(Clone, Debug, PartialEq)]
pub struct PeptideMasses {
    residues: Vec<f64>,
}

impl PeptideMasses {
    /// `deltas[0]` holds N-terminal modifications, `deltas[i]` the
    /// modifications on residue `i` (1-based)
    pub fn new(sequence: &[u8], deltas: &[f64]) -> Self {
        let mut residues = sequence
            .iter()
            .enumerate()
            .map(|(idx, r)| r.monoisotopic() + deltas.get(idx + 1).copied().unwrap_or_default())
            .collect::<Vec<_>>();
        if let (Some(first), Some(nterm)) = (residues.first_mut(), deltas.first()) {
            *first += nterm;
        }
        Self { residues }
    }

    pub fn len(&self) -> usize {
        self.residues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.residues.is_empty()
    }

    /// Sum of residue masses, including modifications
    pub fn residue_sum(&self) -> f64 {
        self.residues.iter().sum()
    }
}

impl From<&Identification> for PeptideMasses {
    fn from(ident: &Identification) -> Self {
        PeptideMasses::new(ident.sequence.as_bytes(), &ident.residue_deltas())
    }
}

/// Theoretical fragment ion, charged
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Ion {
    pub series: Series,
    /// Number of residues contained in the fragment
    pub index: usize,
    pub charge: u8,
    pub mz: f64,
}

impl Ion {
    /// Label such as `b3` or `y_h2o_5`
    pub fn label(&self) -> String {
        match self.series {
            Series::A | Series::B | Series::C | Series::X | Series::Y | Series::Z => {
                format!("{}{}", self.series.label(), self.index)
            }
            _ => format!("{}_{}", self.series.label(), self.index),
        }
    }
}

/// Generate the neutral masses of one ion series, shortest fragment first
pub struct IonSeries<'p> {
    pub series: Series,
    cumulative_mass: f64,
    peptide: &'p PeptideMasses,
    idx: usize,
}

impl<'p> IonSeries<'p> {
    pub fn new(peptide: &'p PeptideMasses, series: Series) -> Self {
        Self {
            series,
            cumulative_mass: series.offset(),
            peptide,
            idx: 0,
        }
    }
}

impl<'p> Iterator for IonSeries<'p> {
    /// (fragment length, neutral mass)
    type Item = (usize, f64);

    // Running sum from the appropriate terminus - each fragment reuses the
    // mass of the previous one
    fn next(&mut self) -> Option<Self::Item> {
        if self.idx + 1 >= self.peptide.len() {
            return None;
        }
        let residue = match self.series.is_n_terminal() {
            true => self.peptide.residues.get(self.idx)?,
            false => self
                .peptide
                .residues
                .get(self.peptide.len() - 1 - self.idx)?,
        };
        self.cumulative_mass += residue;
        self.idx += 1;
        Some((self.idx, self.cumulative_mass))
    }
}

/// Generate all ions of the given series for charge states 1..=`max_charge`
pub fn theoretical_ions<I>(peptide: &PeptideMasses, series: I, max_charge: u8) -> Vec<Ion>
where
    I: IntoIterator<Item = Series>,
{
    let mut ions = Vec::new();
    for series in series {
        for (index, neutral) in IonSeries::new(peptide, series) {
            for charge in 1..=max_charge.max(1) {
                let z = charge as f64;
                ions.push(Ion {
                    series,
                    index,
                    charge,
                    mz: (neutral + z * PROTON) / z,
                });
            }
        }
    }
    ions
}

#[cfg(test)]
mod test {
    use super::*;

    fn peptide(s: &str) -> PeptideMasses {
        PeptideMasses::new(s.as_bytes(), &vec![0.0; s.len() + 1])
    }

    fn check_within(series: Series, peptide: &PeptideMasses, charge: u8, expected_mz: &[f64]) {
        let observed = theoretical_ions(peptide, [series], charge)
            .into_iter()
            .filter(|ion| ion.charge == charge)
            .map(|ion| ion.mz)
            .collect::<Vec<f64>>();
        assert_eq!(expected_mz.len(), observed.len());
        assert!(
            expected_mz
                .iter()
                .zip(observed.iter())
                .all(|(a, b)| (a - b).abs() < 0.005),
            "{:?}",
            expected_mz
                .iter()
                .zip(observed.iter())
                .map(|(a, b)| a - b)
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn abc_xyz() {
        let peptide = peptide("PEPTIDE");
        let expected_a = [70.065, 199.108, 296.160, 397.208, 510.292, 625.32];
        let expected_b = [98.0600, 227.1026, 324.155, 425.2030, 538.287, 653.314];
        let expected_c = [115.086, 244.129, 341.182, 442.229, 555.314, 670.341];
        let expected_x = [174.039, 289.066, 402.151, 503.198, 600.251, 729.294];
        let expected_y = [148.0604, 263.0874, 376.171, 477.219, 574.2719, 703.314];
        let expected_z = [131.034, 246.061, 359.145, 460.193, 557.245, 686.288];

        check_within(Series::A, &peptide, 1, &expected_a);
        check_within(Series::B, &peptide, 1, &expected_b);
        check_within(Series::C, &peptide, 1, &expected_c);
        check_within(Series::X, &peptide, 1, &expected_x);
        check_within(Series::Y, &peptide, 1, &expected_y);
        check_within(Series::Z, &peptide, 1, &expected_z);
    }

    #[test]
    fn doubly_charged_y() {
        let peptide = peptide("PEPTIDE");
        let expected_mz = [74.53385, 132.04732, 188.58935, 239.11319, 287.6396, 352.16087];
        check_within(Series::Y, &peptide, 2, &expected_mz);
    }

    #[test]
    fn neutral_losses_and_hydrogen_shifts() {
        let peptide = peptide("PEPTIDE");
        let expected_b_h2o = [80.0494, 209.0920, 306.1448, 407.1925, 520.2766, 635.3035];
        check_within(Series::BH2O, &peptide, 1, &expected_b_h2o);

        let c = theoretical_ions(&peptide, [Series::C, Series::CP1], 1);
        let (plain, shifted): (Vec<_>, Vec<_>) = c.into_iter().partition(|i| i.series == Series::C);
        for (p, s) in plain.iter().zip(shifted.iter()) {
            assert!((s.mz - p.mz - HYDROGEN).abs() < 1e-9);
        }
    }

    #[test]
    fn nterm_mod() {
        let mut deltas = vec![0.0; 8];
        deltas[0] = 229.01;
        let peptide = PeptideMasses::new(b"PEPTIDE", &deltas);

        // b-ions should be tagged
        let expected_b = [98.06004, 227.10263, 324.1554, 425.20306, 538.2872, 653.3141]
            .into_iter()
            .map(|x| x + 229.01)
            .collect::<Vec<_>>();

        // y-ions shouldn't have the tag
        let expected_y = [148.06043, 263.08737, 376.17144, 477.21912, 574.27188, 703.31447];

        check_within(Series::B, &peptide, 1, &expected_b);
        check_within(Series::Y, &peptide, 1, &expected_y);
    }

    #[test]
    fn internal_mod() {
        let mut deltas = vec![0.0; 8];
        deltas[5] = 29.0;
        let peptide = PeptideMasses::new(b"PEPTIDE", &deltas);

        let expected_b = [
            98.06004,
            227.10263,
            324.1554,
            425.20306,
            538.2872 + 29.0,
            653.3141 + 29.0,
        ];
        let expected_y = [
            148.06043,
            263.08737,
            376.17144 + 29.0,
            477.21912 + 29.0,
            574.27188 + 29.0,
            703.31447 + 29.0,
        ];

        check_within(Series::B, &peptide, 1, &expected_b);
        check_within(Series::Y, &peptide, 1, &expected_y);
    }

    #[test]
    fn labels() {
        let peptide = peptide("PEPTIDE");
        let ions = theoretical_ions(&peptide, [Series::B, Series::YH2O], 1);
        assert_eq!(ions[2].label(), "b3");
        assert_eq!(ions[6 + 4].label(), "y_h2o_5");
    }

    #[test]
    fn every_series_and_charge() {
        let peptide = peptide("PEPTIDE");
        let ions = theoretical_ions(&peptide, ALL_SERIES, 3);
        assert_eq!(ions.len(), ALL_SERIES.len() * 6 * 3);
        assert!(ions.iter().all(|ion| ion.mz > 0.0));
    }
}
