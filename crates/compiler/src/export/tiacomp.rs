//! TIAComp variant: compact byte-delta encoding

// SPDX-FileCopyrightText: © 2023 Marcus Rowe <undisbeliever@gmail.com>
//
// SPDX-License-Identifier: MIT

// Byte scheme ("format 0"):
//
//   fffff010 ccccvvvv           frequency + control + volume, duration 1
//   fffff110 ccccvvvv           " " ", duration 2
//   dddd1100                    sustain d+1 frames
//   dddd0100                    pause d+1 frames
//   xxxx0001                    volume = x >> 4, duration 1
//   xxxx1001                    volume = x >> 4, duration 2
//   xxxx0101                    control = x >> 4, duration 1
//   xxxx1101                    control = x >> 4, duration 2
//   xxxxx011                    frequency = x >> 3, duration 1
//   xxxxx111                    frequency = x >> 3, duration 2
//   xxxxx000                    reserved
//   00000000                    stop

use super::{ExportOutput, TRACK_DATA_NAME};
use crate::data::ProjectFile;
use crate::driver_constants::{MAX_INTERVAL_DURATION, N_CHANNELS};
use crate::errors::ExportError;
use crate::register_dump::{channel_state_sequence, ChannelState};

use std::fmt::Write;

/// Delta-encode one interval against the previous state.
///
/// Returns the number of frames still unencoded; with `encode_remainder`
/// set the remainder is sustain-filled and the return value is always 0.
pub(crate) fn encode_channel_state(
    next: &ChannelState,
    duration: u32,
    last: &ChannelState,
    encode_remainder: bool,
    out: &mut Vec<u8>,
) -> u32 {
    if duration == 0 {
        log::warn!("0 duration note");
    }
    let mut framecount = duration.max(1);

    let cc = next.control() != last.control();
    let fc = next.frequency() != last.frequency();
    let vc = next.volume() != last.volume();
    let delta = u32::from(cc) + u32::from(fc) + u32::from(vc);

    if next.volume() == 0 && delta != 0 {
        // volume is zero, pause
        let dmod;
        if framecount > 16 {
            dmod = 15;
            framecount -= 16;
        } else {
            dmod = (framecount - 1) as u8;
            framecount = 0;
        }
        out.push(dmod << 4 | 0x04);
    } else if delta == 1 {
        // change a single register
        let dmod;
        if framecount > 2 {
            dmod = 1;
            framecount -= 2;
        } else {
            dmod = (framecount - 1) as u8;
            framecount = 0;
        }

        let rx = if fc {
            next.frequency() << 3 | dmod << 2 | 0x03
        } else if cc {
            next.control() << 4 | dmod << 3 | 0x05
        } else {
            next.volume() << 4 | dmod << 3 | 0x01
        };
        out.push(rx);
    } else if delta > 1 {
        // write all registers
        let dmod;
        if framecount > 2 {
            dmod = 1;
            framecount -= 2;
        } else {
            dmod = (framecount - 1) as u8;
            framecount = 0;
        }

        out.push(next.frequency() << 3 | dmod << 2 | 0x02);
        out.push(next.control() << 4 | next.volume());
    }

    if delta > 0 && !encode_remainder {
        return framecount;
    }

    // leftover frames sustain
    while framecount > 0 {
        let dmod;
        if framecount > 16 {
            dmod = 15;
            framecount -= 16;
        } else {
            dmod = (framecount - 1) as u8;
            framecount = 0;
        }
        out.push(dmod << 4 | 0x0c);
    }

    0
}

#[rustfmt::skip::macros(writeln)]
pub(crate) fn write_track_data(
    project: &ProjectFile,
    ret: &mut Vec<ExportOutput>,
) -> Result<(), ExportError> {
    let num_songs = project.subsongs.len();

    let mut out = String::with_capacity(4096);
    let _ = writeln!(out, "; TIA audio data file");
    let _ = writeln!(out, "; TIAComp delta encoding");
    let _ = writeln!(out, "; Song: {}", project.name);
    let _ = writeln!(out, "; Author: {}", project.author);

    let _ = writeln!(out, "\nAUDIO_NUM_TRACKS = {}", num_songs);

    let _ = writeln!(out, "\n#include \"cores/tiacomp_player_core.asm\"");

    let mut song_data_size = 0;
    for channel in 0..N_CHANNELS {
        let _ = writeln!(out, "AUDIO_TRACKS_{}:", channel);
        for subsong in 0..num_songs {
            let _ = writeln!(out, "    byte AUDIO_TRACK_{}_{}", subsong, channel);
            song_data_size += 1;
        }
    }

    let mut track_data_size = 0;
    let _ = writeln!(out, "AUDIO_DATA:");
    for (subsong, ss) in project.subsongs.iter().enumerate() {
        for channel in 0..N_CHANNELS {
            let sequence =
                channel_state_sequence(&ss.writes, channel, u32::from(MAX_INTERVAL_DURATION));
            let _ = writeln!(out, "AUDIO_TRACK_{}_{} = . - AUDIO_DATA + 1", subsong, channel);

            let mut last = sequence.initial_state;
            let mut code_seq = Vec::new();
            for interval in &sequence.intervals {
                code_seq.clear();
                let _ = writeln!(
                    out,
                    "    ;F{} C{} V{} D{}",
                    interval.state.frequency(),
                    interval.state.control(),
                    interval.state.volume(),
                    interval.duration
                );
                encode_channel_state(&interval.state, interval.duration, &last, true, &mut code_seq);
                track_data_size += code_seq.len();
                let _ = write!(out, "    byte ");
                for (i, b) in code_seq.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    let _ = write!(out, "{}", b);
                }
                out.push('\n');
                last = interval.state;
            }
            let _ = writeln!(out, "    byte 0");
            track_data_size += 1;
        }
    }

    out.push('\n');
    let _ = writeln!(out, "; Num Tracks {}", num_songs);
    let _ = writeln!(out, "; Track Table Size {}", song_data_size);
    let _ = writeln!(out, "; Data Table Size {}", track_data_size);
    let _ = writeln!(out, "; Total Data Size {}", song_data_size + track_data_size);

    ret.push(ExportOutput::text(TRACK_DATA_NAME, out));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(c: u8, f: u8, v: u8) -> ChannelState {
        ChannelState {
            registers: [c, f, v],
        }
    }

    #[test]
    fn pause_byte_for_silence() {
        let mut out = Vec::new();
        encode_channel_state(&state(0, 0, 0), 3, &state(2, 9, 5), true, &mut out);
        assert_eq!(out, [2 << 4 | 0x04]);
    }

    #[test]
    fn single_register_delta() {
        let mut out = Vec::new();
        encode_channel_state(&state(0, 9, 5), 1, &state(0, 3, 5), true, &mut out);
        assert_eq!(out, [9 << 3 | 0x03]);

        out.clear();
        encode_channel_state(&state(4, 3, 5), 1, &state(0, 3, 5), true, &mut out);
        assert_eq!(out, [4 << 4 | 0x05]);

        out.clear();
        encode_channel_state(&state(0, 3, 8), 1, &state(0, 3, 5), true, &mut out);
        assert_eq!(out, [8 << 4 | 0x01]);
    }

    #[test]
    fn full_write_uses_two_bytes() {
        let mut out = Vec::new();
        encode_channel_state(&state(4, 9, 5), 2, &state(0, 0, 0), true, &mut out);
        assert_eq!(out, [9 << 3 | 1 << 2 | 0x02, 4 << 4 | 5]);
    }

    #[test]
    fn long_unchanged_run_sustains() {
        let mut out = Vec::new();
        let s = state(4, 9, 5);
        encode_channel_state(&s, 20, &s, true, &mut out);
        assert_eq!(out, [15 << 4 | 0x0c, 3 << 4 | 0x0c]);
    }

    #[test]
    fn remainder_is_returned_when_not_encoded() {
        let mut out = Vec::new();
        let rest = encode_channel_state(&state(0, 9, 5), 10, &state(0, 3, 5), false, &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(rest, 8);
    }
}
