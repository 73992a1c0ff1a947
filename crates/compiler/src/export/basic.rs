//! BASIC and BASIC_RLE variants: split frequency and control/volume tables

// SPDX-FileCopyrightText: © 2023 Marcus Rowe <undisbeliever@gmail.com>
//
// SPDX-License-Identifier: MIT

// Channels play back independently: every (subsong, channel) sequence gets
// a one-byte offset into the shared tables, which is what caps the total
// data-point count at 256.

use super::{ExportOutput, TRACK_DATA_NAME};
use crate::data::ProjectFile;
use crate::driver_constants::{BASIC_MAX_DATA_POINTS, BASIC_RLE_MAX_DURATION, N_CHANNELS};
use crate::errors::ExportError;
use crate::register_dump::{channel_state_sequence, ChannelStateSequence};

use std::fmt::Write;

#[rustfmt::skip::macros(writeln)]
pub(crate) fn write_track_data(
    project: &ProjectFile,
    encode_duration: bool,
    ret: &mut Vec<ExportOutput>,
) -> Result<(), ExportError> {
    let num_songs = project.subsongs.len();

    let mut out = String::with_capacity(4096);
    let _ = writeln!(out, "; TIA audio data file");
    let _ = writeln!(out, "; Basic data format");
    let _ = writeln!(out, "; Song: {}", project.name);
    let _ = writeln!(out, "; Author: {}", project.author);

    let _ = writeln!(out, "\nAUDIO_NUM_TRACKS = {}", num_songs);

    if encode_duration {
        let _ = writeln!(out, "\n#include \"cores/basicx_player_core.asm\"");
    } else {
        let _ = writeln!(out, "\n#include \"cores/basic_player_core.asm\"");
    }

    // track lookup tables, one per channel
    let mut song_data_size = 0;
    for channel in 0..N_CHANNELS {
        let _ = writeln!(out, "AUDIO_TRACKS_{}:", channel);
        for subsong in 0..num_songs {
            let _ = writeln!(out, "    byte AUDIO_TRACK_{}_{}", subsong, channel);
            song_data_size += 1;
        }
    }

    let max_duration = if encode_duration {
        u32::from(BASIC_RLE_MAX_DURATION)
    } else {
        1
    };
    let mut sequences: Vec<Vec<ChannelStateSequence>> = Vec::with_capacity(num_songs);
    let mut size_of_all_sequences = 0;
    for ss in &project.subsongs {
        let mut row = Vec::with_capacity(N_CHANNELS);
        for channel in 0..N_CHANNELS {
            let sequence = channel_state_sequence(&ss.writes, channel, max_duration);
            size_of_all_sequences += sequence.size() + 1;
            row.push(sequence);
        }
        sequences.push(row);
    }

    if size_of_all_sequences > BASIC_MAX_DATA_POINTS {
        let e = ExportError::CapacityExceeded {
            variant: "BASIC",
            size: size_of_all_sequences,
            limit: BASIC_MAX_DATA_POINTS,
        };
        log::error!("{}", e);
        return Err(e);
    }

    // Frequency table: ddd fffff
    let mut freq_table_size = 0;
    let _ = writeln!(out, "\n    ; FREQUENCY TABLE");
    let _ = writeln!(out, "AUDIO_F:");
    for channel in 0..N_CHANNELS {
        for (subsong, row) in sequences.iter().enumerate() {
            let _ = writeln!(out, "    ; TRACK {}, CHANNEL {}", subsong, channel);
            let _ = write!(out, "AUDIO_TRACK_{}_{} = . - AUDIO_F + 1", subsong, channel);
            for (i, interval) in row[channel].intervals.iter().enumerate() {
                if i % 16 == 0 {
                    let _ = write!(out, "\n    byte ");
                } else {
                    out.push(',');
                }
                let duration = (interval.duration.max(1) - 1) as u8;
                let rx = duration << 5 | interval.state.frequency();
                let _ = write!(out, "{}", rx);
                freq_table_size += 1;
            }
            let _ = writeln!(out, "\n    byte 0;");
            freq_table_size += 1;
        }
    }

    // Control/volume table: cccc vvvv, control forced nonzero on silence
    let mut cv_table_size = 0;
    let _ = writeln!(out, "\n    ; CONTROL/VOLUME TABLE");
    let _ = writeln!(out, "AUDIO_CV:");
    for channel in 0..N_CHANNELS {
        for (subsong, row) in sequences.iter().enumerate() {
            let _ = write!(out, "    ; TRACK {}, CHANNEL {}", subsong, channel);
            for (i, interval) in row[channel].intervals.iter().enumerate() {
                if i % 16 == 0 {
                    let _ = write!(out, "\n    byte ");
                } else {
                    out.push(',');
                }
                let volume = interval.state.volume();
                let rx = if volume == 0 {
                    0xf0
                } else {
                    interval.state.control() << 4 | volume
                };
                let _ = write!(out, "{}", rx);
                cv_table_size += 1;
            }
            let _ = writeln!(out, "\n    byte 0;");
            cv_table_size += 1;
        }
    }

    out.push('\n');
    let _ = writeln!(out, "; Num Tracks {}", num_songs);
    let _ = writeln!(out, "; All Tracks Sequence Length {}", size_of_all_sequences);
    let _ = writeln!(out, "; Track Table Size {}", song_data_size);
    let _ = writeln!(out, "; Freq Table Size {}", freq_table_size);
    let _ = writeln!(out, "; CV Table Size {}", cv_table_size);
    let total = song_data_size + freq_table_size + cv_table_size;
    let _ = writeln!(out, "; Total Data Size {}", total);

    ret.push(ExportOutput::text(TRACK_DATA_NAME, out));
    Ok(())
}
