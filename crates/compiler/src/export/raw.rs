//! RAW variant: uncompressed register rows, no driver support

// SPDX-FileCopyrightText: © 2023 Marcus Rowe <undisbeliever@gmail.com>
//
// SPDX-License-Identifier: MIT

use super::{ExportOutput, TRACK_DATA_NAME};
use crate::data::ProjectFile;
use crate::driver_constants::{MAX_INTERVAL_DURATION, N_CHANNELS};
use crate::errors::ExportError;
use crate::register_dump::channel_state_sequence;

use std::fmt::Write;

#[rustfmt::skip::macros(writeln)]
pub(crate) fn write_track_data(
    project: &ProjectFile,
    encode_duration: bool,
    ret: &mut Vec<ExportOutput>,
) -> Result<(), ExportError> {
    let mut out = String::with_capacity(4096);
    let _ = writeln!(out, "; Song: {}", project.name);
    let _ = writeln!(out, "; Author: {}", project.author);

    for (subsong, ss) in project.subsongs.iter().enumerate() {
        for channel in 0..N_CHANNELS {
            let sequence = channel_state_sequence(
                &ss.writes,
                channel,
                if encode_duration {
                    u32::from(MAX_INTERVAL_DURATION)
                } else {
                    1
                },
            );

            let mut data_size = 0;
            let mut total_frames = 0;
            out.push('\n');
            let _ = writeln!(out, "TRACK_{}_CHANNEL_{}", subsong, channel);
            for interval in &sequence.intervals {
                if encode_duration {
                    let _ = writeln!(
                        out,
                        "    byte {}, {}, {}, {}",
                        interval.state.control(),
                        interval.state.frequency(),
                        interval.state.volume(),
                        interval.duration
                    );
                    data_size += 4;
                    total_frames += interval.duration;
                } else {
                    for _ in 0..interval.duration {
                        let _ = writeln!(
                            out,
                            "    byte {}, {}, {}",
                            interval.state.control(),
                            interval.state.frequency(),
                            interval.state.volume()
                        );
                        data_size += 3;
                        total_frames += 1;
                    }
                }
            }
            let _ = writeln!(out, "    byte 0");
            data_size += 1;
            let _ = writeln!(out, "    ; {} bytes {} frames", data_size, total_frames);
        }
    }

    ret.push(ExportOutput::text(TRACK_DATA_NAME, out));
    Ok(())
}
