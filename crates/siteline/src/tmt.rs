//! Isobaric reporter ion extraction
//!
//! When reporter intensities are not supplied by the upstream reader, they can
//! be read directly off each identification's fragment spectrum.

use serde::{Deserialize, Serialize};

use crate::diagnostic::select_most_intense_peak;
use crate::mass::Tolerance;
use crate::model::{Identification, ObservedSpectrum, ReporterRow};
use crate::quant::{ChannelId, QuantChannel};

const TMT6PLEX: [f64; 6] = [
    126.127726, 127.124761, 128.134436, 129.131471, 130.141145, 131.138180,
];

const TMT11PLEX: [f64; 11] = [
    126.127726, 127.124761, 127.131081, 128.128116, 128.134436, 129.131471, 129.137790, 130.134825,
    130.141145, 131.138180, 131.144499,
];

const TMT16PLEX: [f64; 16] = [
    126.127726, 127.124761, 127.131081, 128.128116, 128.134436, 129.131471, 129.137790, 130.134825,
    130.141145, 131.138180, 131.144499, 132.141535, 132.147855, 133.144890, 133.151210, 134.148245,
];

const TMT6_NAMES: [&str; 6] = ["126", "127", "128", "129", "130", "131"];

const TMT16_NAMES: [&str; 16] = [
    "126", "127N", "127C", "128N", "128C", "129N", "129C", "130N", "130C", "131N", "131C", "132N",
    "132C", "133N", "133C", "134N",
];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Isobaric {
    Tmt6,
    Tmt10,
    Tmt11,
    Tmt16,
    /// User-defined reporter ion m/z values
    User(Vec<f64>),
}

impl Isobaric {
    pub fn reporter_masses(&self) -> &[f64] {
        match self {
            Isobaric::Tmt6 => &TMT6PLEX,
            Isobaric::Tmt10 => &TMT11PLEX[..10],
            Isobaric::Tmt11 => &TMT11PLEX,
            Isobaric::Tmt16 => &TMT16PLEX,
            Isobaric::User(masses) => masses,
        }
    }

    /// Channel definitions, numbered from 1 in reporter mass order
    pub fn channels(&self) -> Vec<QuantChannel> {
        let names: &[&str] = match self {
            Isobaric::Tmt6 => &TMT6_NAMES,
            Isobaric::Tmt10 => &TMT16_NAMES[..10],
            Isobaric::Tmt11 => &TMT16_NAMES[..11],
            Isobaric::Tmt16 => &TMT16_NAMES,
            Isobaric::User(_) => &[],
        };
        self.reporter_masses()
            .iter()
            .enumerate()
            .map(|(idx, mz)| QuantChannel {
                id: idx as ChannelId + 1,
                name: names
                    .get(idx)
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| format!("{:.4}", mz)),
            })
            .collect()
    }
}

/// Read one reporter row per channel off `spectrum`. Channels without a peak
/// inside `tolerance` are reported with zero height, so every identification
/// carries a complete set of channels.
pub fn extract_reporters(
    ident: &Identification,
    spectrum: &ObservedSpectrum,
    isobaric: &Isobaric,
    tolerance: Tolerance,
) -> Vec<ReporterRow> {
    isobaric
        .reporter_masses()
        .iter()
        .enumerate()
        .map(|(idx, mz)| ReporterRow {
            peptide_id: ident.peptide_id,
            channel_id: idx as ChannelId + 1,
            height: select_most_intense_peak(&spectrum.peaks, *mz, tolerance)
                .map(|peak| peak.intensity)
                .unwrap_or_default(),
        })
        .collect()
}
