//! End-to-end scenarios for the TIAZIP pipeline

// SPDX-FileCopyrightText: © 2023 Marcus Rowe <undisbeliever@gmail.com>
//
// SPDX-License-Identifier: MIT

use compiler::bytecode::{create_alphabet, lower_sequence, AlphaCode, LowerOptions, VolumeArg};
use compiler::bytecode_interpreter::decode_channel;
use compiler::data::{ExportConfig, ProjectFile, Subsong};
use compiler::driver_constants::{
    AUDC0, AUDC1, AUDF0, AUDF1, AUDV0, AUDV1, MAX_INTERVAL_DURATION, TICKS_PER_SECOND,
};
use compiler::export::{export_project, ExportOutput};
use compiler::register_dump::{channel_state_sequence, RegisterWrite};
use compiler::sequence_compressor::{compress_code_sequence, CompressedChannel};
use compiler::stream_encoder::{encode_streams, EncoderConfig, EncoderOutput};

fn write_at(frame: u32, addr: u8, value: u8) -> RegisterWrite {
    RegisterWrite {
        ticks: frame * (TICKS_PER_SECOND / 60),
        seconds: 0,
        hz: 60.0,
        subsong: 0,
        order: 0,
        row: frame,
        addr,
        value,
        system_index: 0,
    }
}

fn project(writes: Vec<RegisterWrite>) -> ProjectFile {
    ProjectFile {
        name: "scenario".to_owned(),
        author: "tests".to_owned(),
        album: String::new(),
        system: "Atari 2600".to_owned(),
        tuning: 440.0,
        instruments: 0,
        wavetables: 0,
        samples: 0,
        subsongs: vec![Subsong { writes }],
    }
}

fn lower_channel(writes: &[RegisterWrite], channel: usize) -> Vec<AlphaCode> {
    let sequence = channel_state_sequence(writes, channel, u32::from(MAX_INTERVAL_DURATION));
    lower_sequence(&sequence, &LowerOptions::default(), 0, channel)
}

fn compress(lowered: &[AlphaCode], threshold: usize) -> CompressedChannel {
    let alphabet = create_alphabet([lowered]).unwrap();
    compress_code_sequence(0, 0, &alphabet, lowered, threshold).unwrap()
}

fn encode_single(compressed: CompressedChannel) -> EncoderOutput {
    let config = EncoderConfig {
        jump_index_cap: 32,
        huffman_leaf_cap: 256,
        data_offset: 0x0300,
        block_size: 4096,
    };
    encode_streams(&[vec![compressed]], &config).unwrap()
}

fn decode_single(output: &EncoderOutput, max_steps: usize) -> Vec<AlphaCode> {
    decode_channel(&output.trees, &output.channels[0][0], max_steps).unwrap()
}

fn is_pause_1(code: &AlphaCode) -> bool {
    matches!(code, AlphaCode::Pause(d) if d.as_u8() == 1)
}

// Scenario 1: a single silent frame
#[test]
fn single_silent_frame() {
    let writes = [write_at(0, AUDV0, 0)];
    let lowered = lower_channel(&writes, 0);

    assert_eq!(lowered.len(), 2);
    assert!(is_pause_1(&lowered[0]));
    assert_eq!(lowered[1], AlphaCode::Stop);

    let compressed = compress(&lowered, 3);
    assert_eq!(compressed.spans, [AlphaCode::Stop]);

    let output = encode_single(compressed);
    assert_eq!(decode_single(&output, 8), lowered);

    let outputs = export_project(&project(writes.to_vec()), &ExportConfig::default()).unwrap();
    assert!(outputs.iter().any(|o| o.name == "Track_data.asm"));
}

// Scenario 2: ten identical non-silent frames, no copy opportunities
#[test]
fn ten_identical_frames() {
    let writes = [
        write_at(0, AUDC0, 5),
        write_at(0, AUDF0, 10),
        write_at(0, AUDV0, 8),
        write_at(9, AUDV0, 8),
    ];
    let lowered = lower_channel(&writes, 0);

    assert_eq!(lowered.len(), 3);
    assert!(matches!(lowered[0], AlphaCode::WriteDelta(_)));
    assert!(matches!(lowered[1], AlphaCode::Sustain(d) if d.as_u8() == 9));

    let compressed = compress(&lowered, 3);
    assert!(!compressed
        .data
        .iter()
        .any(|c| matches!(c, AlphaCode::Jump(_))));
    assert_eq!(compressed.data.len(), 3);

    let output = encode_single(compressed);
    assert_eq!(decode_single(&output, 8), lowered);
}

// Scenario 3 + 6: an ABAB repeat compresses into a back edge, and the
// jump-back-to-caller pattern is rewritten into RETURN_LAST
#[test]
fn abab_repeat_and_return_rewrite() {
    let writes = [
        write_at(0, AUDV0, 8),
        write_at(1, AUDF0, 3),
        write_at(2, AUDF0, 9),
        write_at(3, AUDF0, 3),
        write_at(4, AUDF0, 9),
        write_at(5, AUDF0, 3),
        write_at(6, AUDF0, 9),
    ];
    let lowered = lower_channel(&writes, 0);
    let compressed = compress(&lowered, 1);

    // the repeated tail is not re-emitted
    assert!(compressed.data.len() < lowered.len());
    assert!(compressed
        .spans
        .iter()
        .any(|c| matches!(c, AlphaCode::Skip)));
    assert!(
        compressed
            .spans
            .iter()
            .any(|c| matches!(c, AlphaCode::ReturnLast)),
        "spans: {:?}",
        compressed.spans
    );
    assert!(compressed
        .spans
        .iter()
        .any(|c| matches!(c, AlphaCode::ReturnNoop)));

    // the validator's state machine reproduces the source sequence
    let output = encode_single(compressed);
    assert_eq!(decode_single(&output, 64), lowered);
}

// Scenario 4: volume ramp 0 -> 15 -> 0 collapses to the ±1 sentinels
#[test]
fn volume_ramp_uses_adjacency_sentinels() {
    let mut writes = Vec::new();
    for v in 1..=15u32 {
        writes.push(write_at(v - 1, AUDV0, v as u8));
    }
    for v in (0..15u32).rev() {
        writes.push(write_at(15 + (14 - v), AUDV0, v as u8));
    }
    let lowered = lower_channel(&writes, 0);

    let ups = lowered
        .iter()
        .filter(|c| matches!(c, AlphaCode::WriteDelta(w) if w.volume == Some(VolumeArg::Up)))
        .count();
    let downs = lowered
        .iter()
        .filter(|c| matches!(c, AlphaCode::WriteDelta(w) if w.volume == Some(VolumeArg::Down)))
        .count();
    assert_eq!(ups, 15);
    assert_eq!(downs, 14);
    // the final V=0 frame is a pause
    assert!(lowered.iter().any(is_pause_1));

    let output = encode_single(compress(&lowered, 3));

    // the sentinels dominate the volume tree
    let up_code = output.trees.volume.code(&0x10).unwrap();
    let down_code = output.trees.volume.code(&0xf0).unwrap();
    assert!(up_code.len() <= 2);
    assert!(down_code.len() <= 2);

    assert_eq!(decode_single(&output, 64), lowered);
}

// Scenario 5: mirrored songs on both channels encode to equal byte counts
#[test]
fn mirrored_channels_encode_identically() {
    let mut writes = Vec::new();
    for frame in 0..8u32 {
        let f = (frame % 4 + 1) as u8;
        writes.push(write_at(frame, AUDC0, 4));
        writes.push(write_at(frame, AUDC1, 4));
        writes.push(write_at(frame, AUDF0, f));
        writes.push(write_at(frame, AUDF1, f));
        writes.push(write_at(frame, AUDV0, 6));
        writes.push(write_at(frame, AUDV1, 6));
    }

    let lowered_0 = lower_channel(&writes, 0);
    let lowered_1 = lower_channel(&writes, 1);
    assert_eq!(lowered_0, lowered_1);

    let alphabet = create_alphabet([lowered_0.as_slice(), lowered_1.as_slice()]).unwrap();
    let c0 = compress_code_sequence(0, 0, &alphabet, &lowered_0, 1).unwrap();
    let c1 = compress_code_sequence(0, 1, &alphabet, &lowered_1, 1).unwrap();

    let config = EncoderConfig {
        jump_index_cap: 32,
        huffman_leaf_cap: 256,
        data_offset: 0x0300,
        block_size: 4096,
    };
    let output = encode_streams(&[vec![c0, c1]], &config).unwrap();

    let ch0 = &output.channels[0][0];
    let ch1 = &output.channels[0][1];
    assert_eq!(ch0.data.bytes_used(), ch1.data.bytes_used());
    assert_eq!(ch0.track.bytes_used(), ch1.track.bytes_used());

    // streams concatenate without address collisions
    assert_eq!(
        ch1.base_bits,
        ch0.base_bits + ch0.data.bytes_used() * 8
    );

    assert_eq!(
        decode_channel(&output.trees, ch0, 64).unwrap(),
        lowered_0
    );
    assert_eq!(
        decode_channel(&output.trees, ch1, 64).unwrap(),
        lowered_1
    );
}

// Boundary: empty input
#[test]
fn empty_input_is_a_single_stop() {
    let lowered = lower_channel(&[], 0);
    assert_eq!(lowered, [AlphaCode::Stop]);

    let compressed = compress(&lowered, 3);
    assert_eq!(compressed.data.len(), 1);

    let output = encode_single(compressed);
    assert_eq!(decode_single(&output, 4), [AlphaCode::Stop]);

    let outputs = export_project(&project(Vec::new()), &ExportConfig::default()).unwrap();
    assert!(outputs.iter().any(|o| o.name == "Track_data.asm"));
    assert!(outputs.iter().any(|o| o.name == "Track_meta.asm"));
}

// Boundary: no repeated substring means a straight-line data stream
#[test]
fn unique_sequence_is_straight_line() {
    let writes = [
        write_at(0, AUDV0, 8),
        write_at(1, AUDF0, 3),
        write_at(2, AUDF0, 9),
        write_at(3, AUDF0, 12),
        write_at(4, AUDF0, 14),
    ];
    let lowered = lower_channel(&writes, 0);
    let compressed = compress(&lowered, 3);

    assert!(!compressed
        .data
        .iter()
        .any(|c| matches!(c, AlphaCode::Jump(_) | AlphaCode::TakeDataJump)));
    assert_eq!(compressed.spans, [AlphaCode::Stop]);
}

// Re-running the encoder must produce byte-identical artifacts
#[test]
fn export_is_idempotent() {
    let writes = vec![
        write_at(0, AUDC0, 4),
        write_at(0, AUDF0, 9),
        write_at(0, AUDV0, 7),
        write_at(2, AUDF0, 5),
        write_at(4, AUDF0, 9),
        write_at(6, AUDF0, 5),
        write_at(8, AUDV0, 0),
    ];
    let p = project(writes);
    let config = ExportConfig {
        span_threshold: 1,
        ..ExportConfig::default()
    };

    let artifact_bytes = |outputs: &[ExportOutput]| -> Vec<(String, Vec<u8>)> {
        outputs
            .iter()
            .map(|o| (o.name.clone(), o.data.clone()))
            .collect()
    };

    let first = export_project(&p, &config).unwrap();
    let second = export_project(&p, &config).unwrap();
    assert_eq!(artifact_bytes(&first), artifact_bytes(&second));
}

// The whole-song export validates every variant of the write log
#[test]
fn full_song_round_trip() {
    let mut writes = Vec::new();
    // a little two-channel song with repetition and envelopes
    for bar in 0..4u32 {
        let base = bar * 16;
        for beat in 0..4u32 {
            let frame = base + beat * 4;
            writes.push(write_at(frame, AUDC0, 4));
            writes.push(write_at(frame, AUDF0, (beat % 2 + 9) as u8));
            writes.push(write_at(frame, AUDV0, 10));
            writes.push(write_at(frame + 1, AUDV0, 9));
            writes.push(write_at(frame + 2, AUDV0, 8));
            writes.push(write_at(frame + 3, AUDV0, 0));

            writes.push(write_at(frame, AUDC1, 12));
            writes.push(write_at(frame, AUDF1, (beat % 4 + 3) as u8));
            writes.push(write_at(frame, AUDV1, 6));
            writes.push(write_at(frame + 2, AUDV1, 0));
        }
    }

    let p = project(writes);
    let config = ExportConfig {
        span_threshold: 2,
        ..ExportConfig::default()
    };
    let outputs = export_project(&p, &config).unwrap();

    let names: Vec<&str> = outputs.iter().map(|o| o.name.as_str()).collect();
    assert!(names.contains(&"Track_data.asm"));
    assert!(names.contains(&"Track_meta.asm"));
    assert!(names.contains(&"Track_binary.0.0.o"));
    assert!(names.contains(&"Track_binary.0.1.o"));
}

// TIAZIP streams must fit the configured block
#[test]
fn block_capacity_is_enforced() {
    let mut writes = Vec::new();
    for frame in 0..200u32 {
        writes.push(write_at(frame, AUDF0, (frame % 31) as u8 + 1));
        writes.push(write_at(frame, AUDV0, (frame % 14) as u8 + 1));
    }
    let p = project(writes);
    let config = ExportConfig {
        block_size: 8,
        ..ExportConfig::default()
    };
    assert!(matches!(
        export_project(&p, &config),
        Err(compiler::errors::ExportError::CapacityExceeded { .. })
    ));
}
