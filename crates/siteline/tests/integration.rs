//! Drive complete runs over small, hand-built datasets

use fnv::FnvHashMap;
use siteline_core::fragment::IonSeriesConfig;
use siteline_core::ion_series::{theoretical_ions, PeptideMasses, Series};
use siteline_core::localize::LocalizationTarget;
use siteline_core::model::{
    ActivationMethod, Classification, Evidence, GroupQuant, Identification, Modification,
    ObservedSpectrum, Peak, Precursor, ProteinEvidenceBlock, QuantLink, QuantificationEvent,
    ReporterRow, RunMetadata,
};
use siteline_core::ppm::theoretical_mass;
use siteline_core::quant::{QuantChannel, QuantScheme};
use siteline_core::run::{Run, RunInput};
use siteline_core::settings::Settings;
use siteline_core::spectra::SpectrumCache;
use siteline_core::Error;

const PROTEIN: &str = "MKPEPTIDEKSAMPLERKPESTIDEKGLYNATSK";

fn precursor(scan: u32) -> Precursor {
    Precursor {
        mass: 0.0,
        charge: 2,
        rt: 30.0,
        scan,
        file_id: 1,
    }
}

/// An identification 0.1 ppm away from its theoretical mass, so that every
/// identification in a test lands in the same ppm bin
fn ident(
    peptide_id: u64,
    spectrum_id: u64,
    sequence: &str,
    modifications: Vec<Modification>,
) -> Identification {
    let mut ident = Identification::new(
        peptide_id,
        spectrum_id,
        sequence,
        ActivationMethod::Etd,
        20.0,
    );
    ident.modifications = modifications;
    ident.protein_refs = vec!["P1".into()];
    ident.precursor = precursor(spectrum_id as u32);
    ident.precursor.mass = theoretical_mass(&ident) * (1.0 + 1e-7);
    ident
}

fn run(
    settings: &Settings,
    idents: Vec<Identification>,
    spectra: &SpectrumCache,
) -> Result<Evidence, Error> {
    run_with(settings, idents, spectra, Vec::new(), Vec::new())
}

fn run_with(
    settings: &Settings,
    idents: Vec<Identification>,
    spectra: &SpectrumCache,
    events: Vec<QuantificationEvent>,
    reporters: Vec<ReporterRow>,
) -> Result<Evidence, Error> {
    execute(settings, idents, spectra, events, reporters, Vec::new())
}

fn execute(
    settings: &Settings,
    idents: Vec<Identification>,
    spectra: &SpectrumCache,
    events: Vec<QuantificationEvent>,
    reporters: Vec<ReporterRow>,
    ion_series: Vec<IonSeriesConfig>,
) -> Result<Evidence, Error> {
    let mut proteins = FnvHashMap::default();
    proteins.insert("P1".to_string(), PROTEIN.to_string());
    Run::new(settings).execute(RunInput {
        identifications: idents,
        spectra,
        events,
        reporters,
        ion_series,
        proteins,
        metadata: RunMetadata {
            source_files: vec!["run.msf".into()],
            ..Default::default()
        },
    })
}

/// An empty electron-transfer spectrum for each identification
fn empty_spectra(idents: &[Identification]) -> SpectrumCache {
    idents
        .iter()
        .map(|i| {
            ObservedSpectrum::new(
                i.spectrum_id,
                Vec::new(),
                ActivationMethod::Etd,
                i.precursor.clone(),
            )
        })
        .collect()
}

fn phospho() -> Modification {
    Modification::new(3, "Phospho", 79.966331)
}

fn blocks<'e>(evidence: &'e Evidence, sequence: &str) -> Vec<&'e ProteinEvidenceBlock> {
    evidence
        .proteins
        .values()
        .flatten()
        .filter(|b| b.sequence == sequence)
        .collect()
}

#[test]
fn leucine_isoleucine_calls_are_kept() {
    let settings = Settings::default();
    let spectra = SpectrumCache::default();
    let evidence = run(
        &settings,
        vec![
            ident(1, 10, "PEPTIDE", vec![]),
            ident(2, 10, "PEPTLDE", vec![]),
            ident(3, 11, "SAMPLER", vec![]),
            ident(4, 11, "SAMPLERK", vec![]),
        ],
        &spectra,
    )
    .unwrap();

    let peptide = blocks(&evidence, "PEPTIDE");
    assert_eq!(peptide.len(), 1);
    assert!(peptide[0].multi_peptide);
    assert_eq!(peptide[0].peptide_start, Some(3));

    let variant = blocks(&evidence, "PEPTLDE");
    assert_eq!(variant.len(), 1);
    assert!(variant[0].multi_peptide);

    // spectrum 11 disagrees on length: both calls are discarded
    assert!(blocks(&evidence, "SAMPLER").is_empty());
    assert!(blocks(&evidence, "SAMPLERK").is_empty());
    assert_eq!(evidence.metadata.source_files, vec!["run.msf".to_string()]);
}

#[test]
fn duplicate_quant_readings_count_once() {
    let settings = Settings {
        quant: siteline_core::settings::QuantSettings {
            scheme: Some(QuantScheme::Paired {
                channels: vec![
                    QuantChannel {
                        id: 1,
                        name: "Light".into(),
                    },
                    QuantChannel {
                        id: 2,
                        name: "Heavy".into(),
                    },
                ],
                label_mass: 8.014199,
            }),
            ..Default::default()
        },
        ..Default::default()
    };

    let quantified = |peptide_id: u64, spectrum_id: u64, quant_result_id: u64| {
        let mut i = ident(peptide_id, spectrum_id, "SAMPLER", vec![]);
        i.quant = Some(QuantLink {
            quant_result_id,
            label_count: 1,
            high_signal_to_noise: true,
            low_signal_to_noise: false,
        });
        i
    };
    let event = |quant_result_id: u64, channel_id: u32, intensity: f64| QuantificationEvent {
        quant_result_id,
        channel_id,
        mass: 400.0 + channel_id as f64 * 4.0,
        rt_window: (29.5, 30.5),
        intensity,
        signal_to_noise: 40.0,
        file_id: 1,
    };

    let spectra = SpectrumCache::default();
    let evidence = run_with(
        &settings,
        vec![
            quantified(1, 20, 1),
            // a second identification reading the same measurement
            quantified(2, 21, 1),
            quantified(3, 22, 2),
        ],
        &spectra,
        vec![
            event(1, 1, 100.0),
            event(1, 2, 400.0),
            event(2, 1, 100.0),
            event(2, 2, 100.0),
        ],
        Vec::new(),
    )
    .unwrap();

    let block = blocks(&evidence, "SAMPLER");
    assert_eq!(block.len(), 1);
    assert_eq!(block[0].spectra_refs, vec![20, 21, 22]);
    assert_eq!(
        block[0].quant,
        Some(GroupQuant::Ratio {
            ratio: 2.5,
            mad: 1.5
        })
    );
}

#[test]
fn uncovered_sites_are_reported_as_ranges() {
    let settings = Settings::default();
    let spectra = [siteline_core::model::ObservedSpectrum::new(
        30,
        Vec::new(),
        ActivationMethod::Etd,
        precursor(30),
    )]
    .into_iter()
    .collect::<SpectrumCache>();

    let phospho = Modification::new(3, "Phospho", 79.966331);
    let evidence = run(&settings, vec![ident(1, 30, "PESTIDE", vec![phospho])], &spectra).unwrap();

    let block = blocks(&evidence, "PESTIDE");
    assert_eq!(block.len(), 1);
    assert!(block[0].sites.is_empty());
    // PESTIDE starts at residue 19 of the protein
    assert_eq!(block[0].peptide_start, Some(19));
    assert_eq!(block[0].ambiguous_mods, vec!["21-22(Phospho)".to_string()]);
    assert_eq!(block[0].composition, "1xPhospho");
}

#[test]
fn misplaced_modification_is_excluded() {
    let settings = Settings::default();
    let spectra = [siteline_core::model::ObservedSpectrum::new(
        31,
        Vec::new(),
        ActivationMethod::Etd,
        precursor(31),
    )]
    .into_iter()
    .collect::<SpectrumCache>();

    // Phospho on an aspartate, and no S/T/Y anywhere in the peptide
    let phospho = Modification::new(6, "Phospho", 79.966331);
    let evidence = run(&settings, vec![ident(1, 31, "PEPLIDE", vec![phospho])], &spectra).unwrap();
    assert!(blocks(&evidence, "PEPLIDE").is_empty());
}

#[test]
fn classification_from_sibling_spectrum() {
    let settings = Settings::default();
    let hexnac = Modification::new(4, "HexNAc", 203.079373);
    let glyco = ident(1, 40, "GLYNATSK", vec![hexnac]);

    let oxonium = |mz: f64, intensity: f64| Peak {
        mz,
        intensity,
        charge: Some(1),
        signal_to_noise: 20.0,
    };
    // Recorded under the same scan, at the same parent mass
    let sibling_precursor = glyco.precursor.clone();
    let spectra = [
        siteline_core::model::ObservedSpectrum::new(
            40,
            Vec::new(),
            ActivationMethod::Etd,
            glyco.precursor.clone(),
        ),
        siteline_core::model::ObservedSpectrum::new(
            41,
            vec![
                oxonium(126.05496, 10.0),
                oxonium(138.05496, 100.0),
                oxonium(144.06552, 10.0),
                oxonium(168.06552, 100.0),
            ],
            ActivationMethod::Hcd,
            sibling_precursor,
        ),
    ]
    .into_iter()
    .collect::<SpectrumCache>();

    let evidence = run(&settings, vec![glyco], &spectra).unwrap();
    let block = blocks(&evidence, "GLYNATSK");
    assert_eq!(block.len(), 1);
    assert_eq!(
        block[0].classification,
        Some(Classification::Subtype("GlcNAc".into()))
    );
}

#[test]
fn incomplete_reporter_rows_abort_the_run() {
    let settings = Settings {
        quant: siteline_core::settings::QuantSettings {
            scheme: Some(QuantScheme::Reporter {
                channels: Vec::new(),
            }),
            ..Default::default()
        },
        ..Default::default()
    };
    let rows = vec![
        ReporterRow {
            peptide_id: 1,
            channel_id: 1,
            height: 10.0,
        },
        ReporterRow {
            peptide_id: 1,
            channel_id: 2,
            height: 10.0,
        },
        ReporterRow {
            peptide_id: 2,
            channel_id: 1,
            height: 10.0,
        },
    ];
    let spectra = SpectrumCache::default();
    let result = run_with(
        &settings,
        vec![ident(1, 50, "PEPTIDE", vec![]), ident(2, 51, "SAMPLER", vec![])],
        &spectra,
        Vec::new(),
        rows,
    );
    assert!(matches!(result, Err(Error::DataInconsistency(_))));
}

#[test]
fn matched_fragment_pins_the_site() {
    let settings = Settings::default();
    let ident = ident(1, 60, "PESTIDE", vec![phospho()]);

    // b3 confirms the bond between S3 and T4
    let b3 = theoretical_ions(&PeptideMasses::from(&ident), [Series::B], 1)
        .into_iter()
        .find(|ion| ion.index == 3)
        .unwrap();
    let spectra = [ObservedSpectrum::new(
        60,
        vec![Peak {
            mz: b3.mz + 0.002,
            intensity: 1000.0,
            charge: Some(1),
            signal_to_noise: 50.0,
        }],
        ActivationMethod::Etd,
        ident.precursor.clone(),
    )]
    .into_iter()
    .collect::<SpectrumCache>();

    let evidence = run(&settings, vec![ident], &spectra).unwrap();
    let block = blocks(&evidence, "PESTIDE");
    assert_eq!(block.len(), 1);
    assert_eq!(block[0].sites, vec![21]);
    assert!(block[0].ambiguous_mods.is_empty());
}

#[test]
fn missing_ion_series_configuration_skips_localization() {
    let settings = Settings::default();
    let configured = |node| {
        let mut i = ident(1, 70, "PESTIDE", vec![phospho()]);
        i.processing_node = node;
        i
    };
    let ion_series = vec![IonSeriesConfig {
        node: 5,
        series: vec![Series::B, Series::Y, Series::C, Series::Z],
    }];

    // node 5 is configured: nothing matched, so the site is ambiguous
    let idents = vec![configured(5)];
    let spectra = empty_spectra(&idents);
    let evidence =
        execute(&settings, idents, &spectra, vec![], vec![], ion_series.clone()).unwrap();
    assert_eq!(
        blocks(&evidence, "PESTIDE")[0].ambiguous_mods,
        vec!["21-22(Phospho)".to_string()]
    );

    // node 0 has no configuration: the identification keeps its assigned
    // site and still reaches the evidence map
    let idents = vec![configured(0)];
    let spectra = empty_spectra(&idents);
    let evidence = execute(&settings, idents, &spectra, vec![], vec![], ion_series).unwrap();
    let block = blocks(&evidence, "PESTIDE");
    assert_eq!(block.len(), 1);
    assert_eq!(block[0].sites, vec![21]);
    assert!(block[0].ambiguous_mods.is_empty());
    assert_eq!(block[0].spectra_refs, vec![70]);
}

#[test]
fn several_localization_targets() {
    let phospho_target = LocalizationTarget {
        name: "Phospho".into(),
        residues: "[STY]".into(),
    };
    let acetyl_target = LocalizationTarget {
        name: "Acetyl".into(),
        residues: "K".into(),
    };
    let acetyl = |position| Modification::new(position, "Acetyl", 42.010565);

    let mut outcomes = Vec::new();
    for localize in [
        vec![phospho_target.clone(), acetyl_target.clone()],
        vec![acetyl_target, phospho_target],
    ] {
        let settings = Settings {
            localize,
            ..Default::default()
        };
        let idents = vec![
            ident(1, 80, "PESTIDEK", vec![phospho(), acetyl(8)]),
            // acetyl on a glutamate, and no lysine anywhere in the peptide
            ident(2, 81, "PESTIDE", vec![phospho(), acetyl(2)]),
        ];
        let spectra = empty_spectra(&idents);
        let evidence = run(&settings, idents, &spectra).unwrap();

        let block = blocks(&evidence, "PESTIDEK");
        assert_eq!(block.len(), 1);
        assert_eq!(
            block[0].ambiguous_mods,
            vec!["21-22(Phospho);26(Acetyl)".to_string()]
        );
        assert_eq!(block[0].composition, "1xAcetyl; 1xPhospho");
        assert!(blocks(&evidence, "PESTIDE").is_empty());
        outcomes.push(evidence.proteins);
    }
    assert_eq!(outcomes[0], outcomes[1]);
}
