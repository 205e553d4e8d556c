//! Preset and bank round-trip tests

use js80p::bank::{Bank, NUMBER_OF_PROGRAMS};
use js80p::serializer;
use js80p::synth::{ParamId, Synth};

#[test]
fn test_default_synth_round_trip_is_byte_identical() {
    let synth = Synth::new();
    let serialized = serializer::serialize(&synth);

    let mut imported = Synth::new();
    let summary = serializer::import(&mut imported, &serialized);

    assert_eq!(summary.skipped, 0);
    assert_eq!(serializer::serialize(&imported), serialized);
}

#[test]
fn test_every_built_in_program_round_trips_within_tolerance() {
    let bank = Bank::new();

    for slot in 0..NUMBER_OF_PROGRAMS {
        let program = bank.program(slot);

        if program.is_blank() {
            continue;
        }

        let mut first = Synth::new();
        let summary = serializer::import(&mut first, program.serialize());
        assert_eq!(
            summary.skipped,
            0,
            "program {} ({}) has unparseable lines",
            slot,
            program.get_name()
        );

        let reserialized = serializer::serialize(&first);

        let mut second = Synth::new();
        serializer::import(&mut second, &reserialized);

        for index in 0..first.param_count() {
            let param = ParamId(index as u16);

            let a = first.get_param_ratio(param);
            let b = second.get_param_ratio(param);

            assert!(
                (a - b).abs() < 1e-6,
                "program {} param {} drifted: {} vs {}",
                slot,
                first.param_name(param),
                a,
                b
            );

            assert_eq!(
                first.get_param_controller(param),
                second.get_param_controller(param),
                "program {} param {} controller drifted",
                slot,
                first.param_name(param)
            );
        }
    }
}

#[test]
fn test_bank_file_round_trip() {
    let bank = Bank::new();
    let serialized = bank.serialize();

    let directory = tempfile::tempdir().expect("temp dir");
    let path = directory.path().join("bank.js80p");

    std::fs::write(&path, &serialized).expect("write bank");
    let read_back = std::fs::read_to_string(&path).expect("read bank");

    let mut imported = Bank::new();
    imported.import(&read_back);

    assert_eq!(imported.serialize(), serialized);
    assert_eq!(imported.program(0).get_name(), bank.program(0).get_name());
}

#[test]
fn test_import_applies_program_to_synth() {
    let bank = Bank::new();
    let mut synth = Synth::new();

    // "Warm Pad" sets the oscillator to a sawtooth.
    serializer::import(&mut synth, bank.program(1).serialize());

    let wav = synth.param_id_by_name("WAV").unwrap();
    assert!(synth.get_param_ratio(wav) > 0.05);

    let erwet = synth.param_id_by_name("ERWET").unwrap();
    assert!((synth.get_param_ratio(erwet) - 0.35).abs() < 1e-9);
}

#[test]
fn test_foreign_bank_sections_are_ignored() {
    let mut bank = Bank::new();

    let text = "[somethingelse]\nX = 1\n[js80p]\nNAME = Real\nAMP = 0.5\n";
    bank.import(text);

    assert_eq!(bank.program(0).get_name(), "Real");
}

#[test]
fn test_legacy_preset_upgrades_apply() {
    let mut synth = Synth::new();

    let legacy = "[js80p]\r\nPOLY = 1.0\r\nN1DYN = 1.0\r\nAMP = 0.5\r\n";
    let summary = serializer::import(&mut synth, legacy);

    assert_eq!(summary.skipped, 0);

    let nh = synth.param_id_by_name("NH").unwrap();
    assert!((synth.get_param_ratio(nh) - 2.0 / 3.0).abs() < 1e-9, "POLY on -> Polyphonic");

    let upd = synth.param_id_by_name("N1UPD").unwrap();
    assert!((synth.get_param_ratio(upd) - 1.0).abs() < 1e-9, "DYN on -> Dynamic");
}

#[test]
fn test_loading_a_program_changes_the_sound_not_the_engine_state() {
    let mut synth = Synth::new();
    let bank = Bank::new();

    synth.suspend();
    synth.set_block_size(512);
    synth.resume();

    serializer::import(&mut synth, bank.program(2).serialize());

    // The engine still renders after a preset load.
    synth.note_on(0.0, 0, 45, 0.9);

    let mut loudest: f32 = 0.0;

    for round in 1..=20u64 {
        let buffer = synth.generate_samples(round, 512);
        loudest = buffer[0].iter().fold(loudest, |acc, &x| acc.max(x.abs()));
    }

    assert!(loudest > 0.01, "Saw Bass should make sound: {}", loudest);
}
