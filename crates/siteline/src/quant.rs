//! Quantitative ratio resolution
//!
//! Two schemes are supported:
//! * Paired isotope labels (e.g. SILAC light/heavy): precursor events are
//!   grouped by quantification result id, and each result id contributes
//!   one heavy/light area ratio. Results where only one channel was observed
//!   ("singlets") are checked for a partner event at the expected shifted m/z
//! * Multiplexed reporter channels (e.g. TMT): each identification row
//!   carries one channel intensity; rows are merged per peptide

use std::collections::{BTreeMap, BTreeSet};

use dashmap::DashMap;
use fnv::{FnvBuildHasher, FnvHashMap};
use serde::{Deserialize, Serialize};

use crate::mass::{binary_search_slice, Tolerance};
use crate::model::{GroupQuant, IdentQuant, Identification, QuantificationEvent, ReporterRow};
use crate::Error;

pub type QuantResultId = u64;
pub type ChannelId = u32;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuantChannel {
    pub id: ChannelId,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "scheme")]
pub enum QuantScheme {
    /// Two isotope-labeled channels; `label_mass` is the mass difference
    /// contributed by each labeled site
    Paired {
        channels: Vec<QuantChannel>,
        label_mass: f64,
    },
    Reporter { channels: Vec<QuantChannel> },
}

pub fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    Some(match values.len() % 2 {
        0 => (values[mid - 1] + values[mid]) / 2.0,
        _ => values[mid],
    })
}

/// Median absolute deviation from `center`
pub fn median_absolute_deviation(values: &[f64], center: f64) -> Option<f64> {
    let mut deviations = values.iter().map(|v| (v - center).abs()).collect::<Vec<_>>();
    median(&mut deviations)
}

/// Quantification events, indexed by result id and by m/z
#[derive(Default, Debug)]
pub struct EventIndex {
    /// Sorted by m/z
    events: Vec<QuantificationEvent>,
    by_result: FnvHashMap<QuantResultId, Vec<QuantificationEvent>>,
}

impl EventIndex {
    pub fn new(mut events: Vec<QuantificationEvent>) -> Self {
        let mut by_result: FnvHashMap<QuantResultId, Vec<QuantificationEvent>> =
            FnvHashMap::default();
        for event in &events {
            let group = by_result.entry(event.quant_result_id).or_default();
            // The same event can be reported once per joined row
            if !group.contains(event) {
                group.push(*event);
            }
        }
        events.sort_by(|a, b| a.mass.total_cmp(&b.mass));
        Self { events, by_result }
    }

    pub fn result(&self, id: QuantResultId) -> &[QuantificationEvent] {
        self.by_result.get(&id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Events in `file_id` within the m/z and retention time windows
    pub fn query(
        &self,
        file_id: u32,
        mz: (f64, f64),
        rt: (f64, f64),
    ) -> impl Iterator<Item = &QuantificationEvent> {
        let (i, j) = binary_search_slice(&self.events, |e, m| e.mass.total_cmp(m), mz.0, mz.1);
        self.events[i..j].iter().filter(move |e| {
            e.file_id == file_id
                && e.mass >= mz.0
                && e.mass <= mz.1
                && e.rt_window.1 >= rt.0
                && e.rt_window.0 <= rt.1
        })
    }

    pub fn len(&self) -> usize {
        self.by_result.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_result.is_empty()
    }
}

/// What the events of one quantification result resolve to
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum EventState {
    /// Channel 2 area over channel 1 area
    Pair(f64),
    /// Only this channel was observed
    Singlet(ChannelId),
    Empty,
}

/// Cached outcome of partner searches, keyed by quantification result id
#[derive(Default, Debug)]
pub struct PairingCache {
    paired: DashMap<QuantResultId, bool, FnvBuildHasher>,
}

impl PairingCache {
    pub fn get(&self, id: QuantResultId) -> Option<bool> {
        self.paired.get(&id).map(|v| *v)
    }

    pub fn insert(&self, id: QuantResultId, paired: bool) {
        self.paired.insert(id, paired);
    }

    pub fn len(&self) -> usize {
        self.paired.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paired.is_empty()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PartnerSearch {
    /// Expansion applied to both ends of the event retention time window
    pub rt_expansion: f64,
    pub tolerance: Tolerance,
}

impl Default for PartnerSearch {
    fn default() -> Self {
        Self {
            rt_expansion: 0.05,
            tolerance: Tolerance::Ppm(-15.0, 15.0),
        }
    }
}

pub struct PairedQuant {
    light: ChannelId,
    heavy: ChannelId,
    label_mass: f64,
    events: EventIndex,
    search: PartnerSearch,
}

impl PairedQuant {
    pub fn new(
        channels: &[QuantChannel],
        label_mass: f64,
        events: Vec<QuantificationEvent>,
        search: PartnerSearch,
    ) -> Result<Self, Error> {
        let (light, heavy) = match channels {
            [light, heavy] => (light.id, heavy.id),
            _ => {
                return Err(Error::DataInconsistency(format!(
                    "paired quantification requires exactly two channels, found {}",
                    channels.len()
                )))
            }
        };
        Ok(Self {
            light,
            heavy,
            label_mass,
            events: EventIndex::new(events),
            search,
        })
    }

    pub fn events(&self) -> &EventIndex {
        &self.events
    }

    /// Resolve the events of one quantification result into a pair ratio or
    /// a singlet
    pub fn state(&self, id: QuantResultId) -> Result<EventState, Error> {
        let mut light = None;
        let mut heavy = None;
        for event in self.events.result(id) {
            let slot = if event.channel_id == self.light {
                &mut light
            } else if event.channel_id == self.heavy {
                &mut heavy
            } else {
                return Err(Error::DataInconsistency(format!(
                    "quantification result {} references unconfigured channel {}",
                    id, event.channel_id
                )));
            };
            *slot.get_or_insert(0.0) += event.intensity;
        }

        Ok(match (light, heavy) {
            (Some(l), Some(h)) if l > 0.0 && h > 0.0 => EventState::Pair(h / l),
            (Some(l), Some(h)) if l > 0.0 || h > 0.0 => match l > 0.0 {
                true => EventState::Singlet(self.light),
                false => EventState::Singlet(self.heavy),
            },
            (Some(l), None) if l > 0.0 => EventState::Singlet(self.light),
            (None, Some(h)) if h > 0.0 => EventState::Singlet(self.heavy),
            _ => EventState::Empty,
        })
    }

    /// Look for a partner event of a singlet: shift the observed precursor
    /// m/z by the label mass difference towards the missing channel, and
    /// search the same file for an event near that m/z
    pub fn search_partner(&self, ident: &Identification, observed: ChannelId) -> bool {
        let link = match &ident.quant {
            Some(link) if link.label_count > 0 => link,
            _ => return false,
        };
        let singlet = match self
            .events
            .result(link.quant_result_id)
            .iter()
            .find(|e| e.channel_id == observed)
        {
            Some(event) => event,
            None => return false,
        };

        let shift =
            self.label_mass * link.label_count as f64 / ident.precursor.charge.max(1) as f64;
        let target = match observed == self.light {
            true => ident.precursor.mz() + shift,
            false => ident.precursor.mz() - shift,
        };
        let rt = (
            singlet.rt_window.0 - self.search.rt_expansion,
            singlet.rt_window.1 + self.search.rt_expansion,
        );
        let found = self
            .events
            .query(singlet.file_id, self.search.tolerance.bounds(target), rt)
            .any(|e| e.quant_result_id != link.quant_result_id || e.channel_id != observed);
        log::trace!(
            "quant result {}: partner at m/z {:.4} {}",
            link.quant_result_id,
            target,
            if found { "found" } else { "missing" }
        );
        found
    }

    /// Resolve the singlet status of `ident` into `cache`, searching for a
    /// partner only once per quantification result
    pub fn populate(&self, ident: &Identification, cache: &PairingCache) -> Result<(), Error> {
        let id = match &ident.quant {
            Some(link) => link.quant_result_id,
            None => return Ok(()),
        };
        if cache.get(id).is_some() {
            return Ok(());
        }
        if let EventState::Singlet(channel) = self.state(id)? {
            cache.insert(id, self.search_partner(ident, channel));
        }
        Ok(())
    }

    pub fn resolve(
        &self,
        ident: &Identification,
        cache: &PairingCache,
    ) -> Result<Option<IdentQuant>, Error> {
        let id = match &ident.quant {
            Some(link) => link.quant_result_id,
            None => return Ok(None),
        };
        Ok(match self.state(id)? {
            EventState::Pair(ratio) => Some(IdentQuant::Ratio {
                quant_result_id: id,
                ratio,
            }),
            EventState::Singlet(channel) => match cache.get(id).unwrap_or(false) {
                true => Some(IdentQuant::Singlet {
                    quant_result_id: id,
                    channel,
                }),
                false => None,
            },
            EventState::Empty => None,
        })
    }
}

/// Merge reporter rows into one channel -> intensity map per peptide id.
/// Every merged record must hold every channel seen in the input.
pub fn merge_reporter_rows(
    rows: &[ReporterRow],
) -> Result<FnvHashMap<u64, BTreeMap<ChannelId, f64>>, Error> {
    let channels = rows.iter().map(|r| r.channel_id).collect::<BTreeSet<_>>();
    let mut merged: FnvHashMap<u64, BTreeMap<ChannelId, f64>> = FnvHashMap::default();
    for row in rows {
        merged
            .entry(row.peptide_id)
            .or_default()
            .insert(row.channel_id, row.height);
    }
    if let Some((peptide_id, record)) = merged.iter().find(|(_, r)| r.len() < channels.len()) {
        return Err(Error::DataInconsistency(format!(
            "peptide {} has {} reporter channels, expected {}",
            peptide_id,
            record.len(),
            channels.len()
        )));
    }
    Ok(merged)
}

pub struct ReporterQuant {
    records: FnvHashMap<u64, BTreeMap<ChannelId, f64>>,
}

impl ReporterQuant {
    pub fn new(channels: &[QuantChannel], rows: &[ReporterRow]) -> Result<Self, Error> {
        if let Some(row) = rows
            .iter()
            .find(|row| !channels.is_empty() && !channels.iter().any(|c| c.id == row.channel_id))
        {
            return Err(Error::DataInconsistency(format!(
                "peptide {} references unconfigured reporter channel {}",
                row.peptide_id, row.channel_id
            )));
        }
        Ok(Self {
            records: merge_reporter_rows(rows)?,
        })
    }

    pub fn resolve(&self, ident: &Identification) -> Option<IdentQuant> {
        self.records
            .get(&ident.peptide_id)
            .map(|channels| IdentQuant::Reporter {
                channels: channels.clone(),
            })
    }
}

pub enum QuantResolver {
    Paired(PairedQuant),
    Reporter(ReporterQuant),
    Disabled,
}

impl QuantResolver {
    pub fn new(
        scheme: Option<&QuantScheme>,
        events: Vec<QuantificationEvent>,
        reporters: &[ReporterRow],
        search: PartnerSearch,
    ) -> Result<Self, Error> {
        match scheme {
            Some(QuantScheme::Paired {
                channels,
                label_mass,
            }) => Ok(QuantResolver::Paired(PairedQuant::new(
                channels,
                *label_mass,
                events,
                search,
            )?)),
            Some(QuantScheme::Reporter { channels }) => {
                Ok(QuantResolver::Reporter(ReporterQuant::new(channels, reporters)?))
            }
            None => Ok(QuantResolver::Disabled),
        }
    }

    pub fn resolve(
        &self,
        ident: &Identification,
        cache: &PairingCache,
    ) -> Result<Option<IdentQuant>, Error> {
        match self {
            QuantResolver::Paired(paired) => paired.resolve(ident, cache),
            QuantResolver::Reporter(reporter) => Ok(reporter.resolve(ident)),
            QuantResolver::Disabled => Ok(None),
        }
    }
}

/// Combine the resolved quantification of a group of identifications.
///
/// Ratios are de-duplicated by quantification result id before the median
/// and MAD are computed, so the result does not depend on how many
/// identifications share a measurement or in what order they arrive.
pub fn group_quant<'a, I>(idents: I) -> Option<GroupQuant>
where
    I: IntoIterator<Item = &'a Identification>,
{
    let mut ratios: BTreeMap<QuantResultId, f64> = BTreeMap::new();
    let mut singlets: BTreeSet<ChannelId> = BTreeSet::new();
    let mut reporters: BTreeMap<u64, &BTreeMap<ChannelId, f64>> = BTreeMap::new();

    for ident in idents {
        match &ident.resolved_quant {
            Some(IdentQuant::Ratio {
                quant_result_id,
                ratio,
            }) => {
                ratios.entry(*quant_result_id).or_insert(*ratio);
            }
            Some(IdentQuant::Singlet { channel, .. }) => {
                singlets.insert(*channel);
            }
            Some(IdentQuant::Reporter { channels }) => {
                reporters.entry(ident.peptide_id).or_insert(channels);
            }
            None => {}
        }
    }

    if !ratios.is_empty() {
        let mut values = ratios.into_values().collect::<Vec<_>>();
        let ratio = median(&mut values)?;
        let mad = median_absolute_deviation(&values, ratio)?;
        return Some(GroupQuant::Ratio { ratio, mad });
    }

    if !reporters.is_empty() {
        let mut channels = BTreeMap::new();
        for record in reporters.values() {
            for (channel, height) in record.iter() {
                *channels.entry(*channel).or_insert(0.0) += height;
            }
        }
        return Some(GroupQuant::Reporter { channels });
    }

    match singlets.len() {
        0 => None,
        1 => singlets
            .into_iter()
            .next()
            .map(|channel| GroupQuant::Singlet { channel }),
        _ => Some(GroupQuant::ConflictingSinglets),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::{ActivationMethod, QuantLink};

    const LYS8: f64 = 8.014199;

    fn channels() -> Vec<QuantChannel> {
        vec![
            QuantChannel {
                id: 1,
                name: "Light".into(),
            },
            QuantChannel {
                id: 2,
                name: "Heavy".into(),
            },
        ]
    }

    fn event(
        id: QuantResultId,
        channel: ChannelId,
        mass: f64,
        intensity: f64,
    ) -> QuantificationEvent {
        QuantificationEvent {
            quant_result_id: id,
            channel_id: channel,
            mass,
            rt_window: (20.0, 20.5),
            intensity,
            signal_to_noise: 50.0,
            file_id: 1,
        }
    }

    fn ident(peptide_id: u64, quant_result_id: QuantResultId) -> Identification {
        let mut ident = Identification::new(
            peptide_id,
            peptide_id,
            "PEPTIDEK",
            ActivationMethod::Etd,
            1.0,
        );
        ident.precursor.mass = 1000.0;
        ident.precursor.charge = 2;
        ident.precursor.file_id = 1;
        ident.quant = Some(QuantLink {
            quant_result_id,
            label_count: 1,
            ..Default::default()
        });
        ident
    }

    #[test]
    fn median_and_mad() {
        let mut values = vec![3.0, 1.0, 2.0];
        let m = median(&mut values).unwrap();
        assert_eq!(m, 2.0);
        assert_eq!(median_absolute_deviation(&values, m), Some(1.0));
        assert_eq!(median(&mut [1.0, 4.0]), Some(2.5));
        assert_eq!(median(&mut []), None);
    }

    #[test]
    fn two_channels_required() {
        let mut three = channels();
        three.push(QuantChannel {
            id: 3,
            name: "Medium".into(),
        });
        assert!(matches!(
            PairedQuant::new(&three, LYS8, vec![], PartnerSearch::default()),
            Err(Error::DataInconsistency(_))
        ));
    }

    #[test]
    fn event_states() {
        let quant = PairedQuant::new(
            &channels(),
            LYS8,
            vec![
                event(1, 1, 500.0, 100.0),
                event(1, 2, 504.0, 400.0),
                // duplicate reading of the same event
                event(1, 2, 504.0, 400.0),
                event(2, 1, 600.0, 100.0),
                event(3, 2, 700.0, 0.0),
                event(4, 9, 700.0, 10.0),
            ],
            PartnerSearch::default(),
        )
        .unwrap();
        assert_eq!(quant.state(1), Ok(EventState::Pair(4.0)));
        assert_eq!(quant.state(2), Ok(EventState::Singlet(1)));
        assert_eq!(quant.state(3), Ok(EventState::Empty));
        assert_eq!(quant.state(5), Ok(EventState::Empty));
        assert!(matches!(quant.state(4), Err(Error::DataInconsistency(_))));
    }

    #[test]
    fn singlet_partner_search() {
        let light = ident(1, 10);
        let light_mz = light.precursor.mz();
        let heavy_mz = light_mz + LYS8 / 2.0;
        let events = vec![
            event(10, 1, light_mz, 100.0),
            // an unrelated event shifted by exactly one label, within RT
            QuantificationEvent {
                rt_window: (20.52, 21.0),
                ..event(11, 2, heavy_mz * (1.0 + 5e-6), 80.0)
            },
        ];
        let quant = PairedQuant::new(&channels(), LYS8, events, PartnerSearch::default()).unwrap();
        let cache = PairingCache::default();
        quant.populate(&light, &cache).unwrap();
        assert_eq!(cache.get(10), Some(true));
        assert_eq!(
            quant.resolve(&light, &cache),
            Ok(Some(IdentQuant::Singlet {
                quant_result_id: 10,
                channel: 1
            }))
        );
    }

    #[test]
    fn partner_outside_window() {
        let light = ident(1, 10);
        let heavy_mz = light.precursor.mz() + LYS8 / 2.0;
        let events = vec![
            event(10, 1, light.precursor.mz(), 100.0),
            // 20 ppm away
            event(11, 2, heavy_mz * (1.0 + 20e-6), 80.0),
            // right m/z, wrong file
            QuantificationEvent {
                file_id: 2,
                ..event(12, 2, heavy_mz, 80.0)
            },
            // right m/z, too late
            QuantificationEvent {
                rt_window: (20.6, 21.0),
                ..event(13, 2, heavy_mz, 80.0)
            },
        ];
        let quant = PairedQuant::new(&channels(), LYS8, events, PartnerSearch::default()).unwrap();
        let cache = PairingCache::default();
        quant.populate(&light, &cache).unwrap();
        assert_eq!(cache.get(10), Some(false));
        assert_eq!(quant.resolve(&light, &cache), Ok(None));
    }

    #[test]
    fn duplicate_results_count_once() {
        let with = |peptide_id, id, ratio| {
            let mut i = ident(peptide_id, id);
            i.resolved_quant = Some(IdentQuant::Ratio {
                quant_result_id: id,
                ratio,
            });
            i
        };
        let group = vec![with(1, 1, 4.0), with(2, 1, 4.0), with(3, 2, 1.0)];
        assert_eq!(
            group_quant(&group),
            Some(GroupQuant::Ratio {
                ratio: 2.5,
                mad: 1.5
            })
        );
        let reversed = group.iter().rev().collect::<Vec<_>>();
        assert_eq!(group_quant(reversed), group_quant(&group));
    }

    #[test]
    fn conflicting_singlets() {
        let singlet = |peptide_id, channel| {
            let mut i = ident(peptide_id, peptide_id);
            i.resolved_quant = Some(IdentQuant::Singlet {
                quant_result_id: peptide_id,
                channel,
            });
            i
        };
        assert_eq!(
            group_quant(&[singlet(1, 1), singlet(2, 1)]),
            Some(GroupQuant::Singlet { channel: 1 })
        );
        assert_eq!(
            group_quant(&[singlet(1, 1), singlet(2, 2)]),
            Some(GroupQuant::ConflictingSinglets)
        );
        assert_eq!(group_quant(&[ident(1, 1)]), None);
    }

    #[test]
    fn reporter_rows() {
        let rows = [
            ReporterRow {
                peptide_id: 1,
                channel_id: 126,
                height: 10.0,
            },
            ReporterRow {
                peptide_id: 1,
                channel_id: 127,
                height: 20.0,
            },
            ReporterRow {
                peptide_id: 2,
                channel_id: 126,
                height: 5.0,
            },
        ];
        assert!(matches!(
            merge_reporter_rows(&rows),
            Err(Error::DataInconsistency(_))
        ));

        let merged = merge_reporter_rows(&rows[..2]).unwrap();
        assert_eq!(merged[&1].len(), 2);

        let quant = ReporterQuant::new(&[], &rows[..2]).unwrap();
        let mut a = ident(1, 1);
        a.resolved_quant = quant.resolve(&a);
        let mut b = ident(1, 1);
        b.resolved_quant = quant.resolve(&b);
        match group_quant(&[a, b]) {
            Some(GroupQuant::Reporter { channels }) => {
                // same peptide id is only counted once
                assert_eq!(channels[&126], 10.0);
                assert_eq!(channels[&127], 20.0);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
