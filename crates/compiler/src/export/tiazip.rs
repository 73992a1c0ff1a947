//! TIAZip variant: LZ-compressed, Huffman-coded bit streams

// SPDX-FileCopyrightText: © 2023 Marcus Rowe <undisbeliever@gmail.com>
//
// SPDX-License-Identifier: MIT

use super::tiacomp::encode_channel_state;
use super::{write_byte_rows, ExportOutput, TRACK_DATA_NAME};
use crate::bytecode::{create_alphabet, lower_sequence, AlphaCode, LowerOptions};
use crate::bytecode_interpreter::validate_streams;
use crate::data::{ExportConfig, ProjectFile};
use crate::driver_constants::{MAX_INTERVAL_DURATION, N_CHANNELS};
use crate::errors::ExportError;
use crate::register_dump::channel_state_sequence;
use crate::sequence_compressor::{compress_code_sequence, CompressedChannel};
use crate::stream_encoder::{encode_streams, EncoderConfig};

use std::fmt::Write;

#[rustfmt::skip::macros(writeln)]
pub(crate) fn write_track_data(
    project: &ProjectFile,
    config: &ExportConfig,
    ret: &mut Vec<ExportOutput>,
) -> Result<(), ExportError> {
    let num_songs = project.subsongs.len();
    let lower_options = LowerOptions {
        force_full_write_on_control_change: config.force_full_write_on_control_change,
        volume_adjacency: config.volume_adjacency,
    };

    // Lowering
    let mut binaries = Vec::new();
    let mut code_sequences: Vec<Vec<Vec<AlphaCode>>> = Vec::with_capacity(num_songs);
    let mut total_uncompressed_codes = 0;
    let mut total_uncompressed_bytes = 0;
    for (subsong, ss) in project.subsongs.iter().enumerate() {
        let mut row = Vec::with_capacity(N_CHANNELS);
        for channel in 0..N_CHANNELS {
            let sequence =
                channel_state_sequence(&ss.writes, channel, u32::from(MAX_INTERVAL_DURATION));

            // raw lowered bytes, kept for compression-ratio debugging
            let mut binary = Vec::new();
            let mut last = sequence.initial_state;
            for interval in &sequence.intervals {
                encode_channel_state(&interval.state, interval.duration, &last, true, &mut binary);
                last = interval.state;
            }
            total_uncompressed_bytes += binary.len();
            binaries.push(ExportOutput::binary(
                format!("Track_binary.{}.{}.o", subsong, channel),
                binary,
            ));

            let lowered = lower_sequence(&sequence, &lower_options, subsong, channel);
            total_uncompressed_codes += lowered.len();
            row.push(lowered);
        }
        code_sequences.push(row);
    }

    // One alphabet over every channel feeds the suffix trees
    let alphabet = create_alphabet(
        code_sequences
            .iter()
            .flatten()
            .map(|sequence| sequence.as_slice()),
    )?;
    log::debug!("total codes : {}", alphabet.len());

    // Compression
    let mut compressed: Vec<Vec<CompressedChannel>> = Vec::with_capacity(num_songs);
    let mut total_compressed_codes = 0;
    let mut total_compressed_spans = 0;
    for (subsong, row) in code_sequences.iter().enumerate() {
        let mut compressed_row = Vec::with_capacity(N_CHANNELS);
        for (channel, lowered) in row.iter().enumerate() {
            let c = compress_code_sequence(
                subsong,
                channel,
                &alphabet,
                lowered,
                config.span_threshold,
            )?;
            total_compressed_codes += c.data.len();
            total_compressed_spans += c.spans.len();
            compressed_row.push(c);
        }
        compressed.push(compressed_row);
    }

    // Bit encoding
    let encoder_config = EncoderConfig {
        jump_index_cap: config.jump_index_cap,
        huffman_leaf_cap: config.huffman_leaf_cap,
        data_offset: config.data_offset,
        block_size: config.block_size,
    };
    let output = encode_streams(&compressed, &encoder_config)?;

    // The validator is part of the pipeline, not an option
    validate_streams(&output.trees, &output.channels, &code_sequences)?;

    // Artifact text
    let mut out = String::with_capacity(8192);
    let _ = writeln!(out, "; TIA audio data file");
    let _ = writeln!(out, "; TIAZip data format");
    let _ = writeln!(out, "; Song: {}", project.name);
    let _ = writeln!(out, "; Author: {}", project.author);

    let _ = writeln!(out, "\nAUDIO_NUM_TRACKS = {}", num_songs);

    let _ = writeln!(out, "\n#include \"cores/tiazip_player_core.asm\"");

    // track table, reverse order for the player's copy routine
    let mut song_data_size = 0;
    let _ = writeln!(out, "AUDIO_TRACKS:");
    for subsong in 0..num_songs {
        let _ = writeln!(out, "    byte >JUMPS_S{0}_C1_START, <JUMPS_S{0}_C1_START", subsong);
        let _ = writeln!(out, "    byte >JUMPS_S{0}_C0_START, <JUMPS_S{0}_C0_START", subsong);
        let _ = writeln!(out, "    byte >SPANS_S{0}_C1_START, <SPANS_S{0}_C1_START", subsong);
        let _ = writeln!(out, "    byte >SPANS_S{0}_C0_START, <SPANS_S{0}_C0_START", subsong);
        song_data_size += 8;
    }

    let mut total_compressed_bytes = 0;

    // data streams
    for (subsong, row) in output.channels.iter().enumerate() {
        for (channel, encoded) in row.iter().enumerate() {
            log::debug!("assembling track data for {} {}", subsong, channel);
            let _ = write!(out, "\nAUDIO_DATA_S{}_C{}_START", subsong, channel);
            let _ = write!(out, "\nSPANS_S{}_C{}_START", subsong, channel);
            let bytes = encoded.data.to_bytes();
            write_byte_rows(&mut out, &bytes);
            let _ = writeln!(out, "\n; AUDIO_DATA_S{}_C{} bytes: {}", subsong, channel, bytes.len());
            total_compressed_bytes += bytes.len();
        }
    }

    // track/jump streams
    for (subsong, row) in output.channels.iter().enumerate() {
        for (channel, encoded) in row.iter().enumerate() {
            log::debug!("assembling jump data for {} {}", subsong, channel);
            let _ = write!(out, "\nAUDIO_JUMP_{}_C{}_START", subsong, channel);
            let _ = write!(out, "\nJUMPS_S{}_C{}_START", subsong, channel);
            let bytes = encoded.track.to_bytes();
            write_byte_rows(&mut out, &bytes);
            let _ = writeln!(out, "\n; AUDIO_JUMP_{}_C{} bytes: {}", subsong, channel, bytes.len());
            total_compressed_bytes += bytes.len();
        }
    }

    // per-channel jump-index tables, co-located with the player
    for (subsong, row) in output.channels.iter().enumerate() {
        for (channel, encoded) in row.iter().enumerate() {
            let _ = writeln!(out, "\nAUDIO_JUMP_INDEX_S{}_C{}", subsong, channel);
            let _ = writeln!(out, "AUDIO_JUMP_INDEX_S{}_C{}_LEN = {}", subsong, channel, encoded.jump_table.len());
            for address in &encoded.jump_table {
                let _ = writeln!(out, "    byte ${:02x}, ${:02x}", address >> 8, address & 0xff);
            }
        }
    }

    let _ = writeln!(out, "\n\n; Song data size: {}", song_data_size);
    let _ = writeln!(out, "; Uncompressed Sequence Length: {}", total_uncompressed_codes);
    let _ = writeln!(out, "; Uncompressed Bytes: {}", total_uncompressed_bytes);
    let _ = writeln!(out, "; Compressed Data Sequence Length: {}", total_compressed_codes);
    let _ = writeln!(out, "; Compressed Span Sequence Length: {}", total_compressed_spans);
    let _ = writeln!(out, "; Compressed Bytes {}", total_compressed_bytes);

    ret.push(ExportOutput::text(TRACK_DATA_NAME, out));
    ret.append(&mut binaries);

    Ok(())
}
