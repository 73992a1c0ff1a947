//! FSEQ variant: row-sequence patterns with deduplicated waveforms

// SPDX-FileCopyrightText: © 2023 Marcus Rowe <undisbeliever@gmail.com>
//
// SPDX-License-Identifier: MIT

// Deprecated upstream but still accepted. Rows are grouped by the (order,
// row) coordinates carried on every register write; rows with identical
// interval sequences share one emitted waveform. Waveform bytes use the
// TIAComp delta scheme.

use super::tiacomp::encode_channel_state;
use super::{ExportOutput, TRACK_DATA_NAME};
use crate::data::ProjectFile;
use crate::driver_constants::{channel_register_index, FSEQ_MAX_DURATION, N_CHANNELS, REGISTER_MASKS};
use crate::errors::ExportError;
use crate::register_dump::{ChannelState, ChannelStateSequence, RegisterWrite};

use std::collections::BTreeMap;
use std::fmt::Write;

fn sequence_hash(sequence: &ChannelStateSequence) -> u64 {
    // FNV-1a, deterministic across runs
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    let mut eat = |byte: u8| {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    };
    for interval in &sequence.intervals {
        for r in interval.state.registers {
            eat(r);
        }
        eat(interval.duration as u8);
    }
    hash
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct RowKey {
    order: u32,
    row: u32,
}

// Replay one channel's writes into per-row interval sequences. A row's
// sequence covers the frames from its first write to the next row's first
// write.
fn row_sequences(
    writes: &[RegisterWrite],
    channel: usize,
) -> BTreeMap<RowKey, ChannelStateSequence> {
    struct Row {
        key: RowKey,
        entry_state: ChannelState,
        start: u32,
        end: u32,
        writes: Vec<(u32, usize, u8)>, // frame, register, value
    }

    // group writes by row, tracking the state each row is entered with
    let mut rows: Vec<Row> = Vec::new();
    let mut state = ChannelState::new();
    for write in writes {
        let (frame, _) = write.frame();
        let key = RowKey {
            order: write.order,
            row: write.row,
        };

        let new_row = rows.last().map_or(true, |r| r.key != key);
        if new_row {
            if let Some(last) = rows.last_mut() {
                last.end = last.end.max(frame);
            }
            rows.push(Row {
                key,
                entry_state: state,
                start: frame,
                end: frame + 1,
                writes: Vec::new(),
            });
        }

        if let Some(register) = channel_register_index(channel, write.addr) {
            let value = write.value & REGISTER_MASKS[register];
            state.registers[register] = value;
            rows.last_mut().unwrap().writes.push((frame, register, value));
        }
    }

    // replay each row into an interval sequence
    let mut out = BTreeMap::new();
    for row in rows {
        let mut sequence =
            ChannelStateSequence::new(row.entry_state, u32::from(FSEQ_MAX_DURATION));
        let mut state = row.entry_state;
        let mut segment_start = row.start;
        for (frame, register, value) in row.writes {
            if state.registers[register] == value {
                continue;
            }
            if frame > segment_start {
                sequence.push_state(state, frame - segment_start);
                segment_start = frame;
            }
            state.registers[register] = value;
        }
        let end = row.end.max(segment_start + 1);
        sequence.push_state(state, end - segment_start);
        out.insert(row.key, sequence);
    }

    out
}

#[rustfmt::skip::macros(writeln)]
pub(crate) fn write_track_data(
    project: &ProjectFile,
    ret: &mut Vec<ExportOutput>,
) -> Result<(), ExportError> {
    log::debug!("performing sequence capture");

    // per (subsong, channel) row sequences
    let mut all_rows: Vec<Vec<BTreeMap<RowKey, ChannelStateSequence>>> = Vec::new();
    for ss in &project.subsongs {
        let mut row = Vec::with_capacity(N_CHANNELS);
        for channel in 0..N_CHANNELS {
            row.push(row_sequences(&ss.writes, channel));
        }
        all_rows.push(row);
    }

    // dedup identical row sequences into shared waveforms
    log::debug!("performing sequence compression");
    let mut waveforms: BTreeMap<u64, (String, ChannelStateSequence)> = BTreeMap::new();
    let mut frequency: BTreeMap<u64, usize> = BTreeMap::new();
    let mut next_waveform = 0;
    for subsong in &all_rows {
        for rows in subsong {
            for sequence in rows.values() {
                let hash = sequence_hash(sequence);
                *frequency.entry(hash).or_insert(0) += 1;
                waveforms.entry(hash).or_insert_with(|| {
                    let name = format!("WF_{}", next_waveform);
                    next_waveform += 1;
                    (name, sequence.clone())
                });
            }
        }
    }

    log::debug!("writing track audio data");
    let mut out = String::with_capacity(8192);
    let _ = writeln!(out, "; Song: {}", project.name);
    let _ = writeln!(out, "; Author: {}", project.author);

    let _ = writeln!(out, "\n#include \"cores/fseq_player_core.asm\"");

    // song lookup table
    let mut song_table_size = 0;
    let _ = writeln!(out, "\n; Song Lookup Table");
    let _ = writeln!(out, "NUM_SONGS = {}", project.subsongs.len());
    let _ = writeln!(out, "SONG_TABLE_START_LO");
    for subsong in 0..project.subsongs.len() {
        let _ = writeln!(out, "SONG_{} = . - SONG_TABLE_START_LO", subsong);
        let _ = writeln!(out, "    byte <SONG_{}_ADDR", subsong);
        song_table_size += 1;
    }
    let _ = writeln!(out, "SONG_TABLE_START_HI");
    for subsong in 0..project.subsongs.len() {
        let _ = writeln!(out, "    byte >SONG_{}_ADDR", subsong);
        song_table_size += 1;
    }

    // song data: per order, one pattern reference per channel
    let mut song_data_size = 0;
    let mut patterns: Vec<(String, usize, usize, u32)> = Vec::new(); // key, subsong, channel, order
    let _ = writeln!(out, "; songs");
    for (subsong, rows) in all_rows.iter().enumerate() {
        let _ = writeln!(out, "SONG_{}_ADDR", subsong);

        let mut orders: Vec<u32> = rows
            .iter()
            .flat_map(|r| r.keys().map(|k| k.order))
            .collect();
        orders.sort_unstable();
        orders.dedup();

        for &order in &orders {
            let _ = write!(out, "    byte ");
            for channel in 0..N_CHANNELS {
                if channel > 0 {
                    let _ = write!(out, ", ");
                }
                let key = format!("PAT_S{}_C{}_P{}", subsong, channel, order);
                let _ = write!(out, "{}", key);
                song_data_size += 1;
                if !patterns.iter().any(|p| p.0 == key) {
                    patterns.push((key, subsong, channel, order));
                }
            }
            out.push('\n');
        }
        let _ = writeln!(out, "    byte 255");
        song_data_size += 1;
    }

    // pattern lookup
    let mut pattern_table_size = 0;
    out.push('\n');
    let _ = writeln!(out, "; Pattern Lookup Table");
    let _ = writeln!(out, "NUM_PATTERNS = {}", patterns.len());
    let _ = writeln!(out, "PAT_TABLE_START_LO");
    for (key, ..) in &patterns {
        let _ = writeln!(out, "{} = . - PAT_TABLE_START_LO", key);
        let _ = writeln!(out, "   byte <{}_ADDR", key);
        pattern_table_size += 1;
    }
    let _ = writeln!(out, "PAT_TABLE_START_HI");
    for (key, ..) in &patterns {
        let _ = writeln!(out, "   byte >{}_ADDR", key);
        pattern_table_size += 1;
    }

    // pattern data: per row the shared waveform index
    let mut pattern_data_size = 0;
    for (key, subsong, channel, order) in &patterns {
        let rows = &all_rows[*subsong][*channel];
        let _ = writeln!(out, "; Subsong: {} Channel: {} Pattern: {}", subsong, channel, order);
        let _ = write!(out, "{}_ADDR", key);
        let mut column = 0;
        for (row_key, sequence) in rows.iter() {
            if row_key.order != *order {
                continue;
            }
            if column % 8 == 0 {
                let _ = write!(out, "\n    byte ");
            } else {
                out.push(',');
            }
            let hash = sequence_hash(sequence);
            let _ = write!(out, "{}", waveforms[&hash].0);
            column += 1;
            pattern_data_size += 1;
        }
        let _ = writeln!(out, "\n    byte 255");
        pattern_data_size += 1;
    }

    // waveform lookup
    let mut waveform_table_size = 0;
    out.push('\n');
    let _ = writeln!(out, "; Waveform Lookup Table");
    let _ = writeln!(out, "NUM_WAVEFORMS = {}", waveforms.len());
    let _ = writeln!(out, "WF_TABLE_START_LO");
    for (name, _) in waveforms.values() {
        let _ = writeln!(out, "{} = . - WF_TABLE_START_LO", name);
        let _ = writeln!(out, "   byte <{}_ADDR", name);
        waveform_table_size += 1;
    }
    let _ = writeln!(out, "WF_TABLE_START_HI");
    for (name, _) in waveforms.values() {
        let _ = writeln!(out, "   byte >{}_ADDR", name);
        waveform_table_size += 1;
    }

    // waveforms in the TIAComp byte scheme
    let mut waveform_data_size = 0;
    out.push('\n');
    let _ = writeln!(out, "; Waveforms");
    for (hash, (name, sequence)) in &waveforms {
        let _ = writeln!(out, "{}_ADDR", name);
        let _ = writeln!(out, "; Hash {}, Freq {}", hash, frequency[hash]);

        let mut last = sequence.initial_state;
        let mut code_seq = Vec::new();
        let mut total_duration = 0;
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
            waveform_data_size += code_seq.len();
            let _ = write!(out, "    byte ");
            for (i, b) in code_seq.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let _ = write!(out, "{}", b);
            }
            out.push('\n');
            total_duration += interval.duration;
            last = interval.state;
        }
        let _ = writeln!(out, "    byte 0");
        let _ = writeln!(out, "    ;Total Duration = {}", total_duration);
        waveform_data_size += 1;
    }

    out.push('\n');
    let _ = writeln!(out, "; Song Table Size {}", song_table_size);
    let _ = writeln!(out, "; Song Data Size {}", song_data_size);
    let _ = writeln!(out, "; Pattern Lookup Table Size {}", pattern_table_size);
    let _ = writeln!(out, "; Pattern Data Size {}", pattern_data_size);
    let _ = writeln!(out, "; Waveform Lookup Table Size {}", waveform_table_size);
    let _ = writeln!(out, "; Waveform Data Size {}", waveform_data_size);
    let total = song_table_size
        + song_data_size
        + pattern_table_size
        + pattern_data_size
        + waveform_table_size
        + waveform_data_size;
    let _ = writeln!(out, "; Total Data Size {}", total);

    ret.push(ExportOutput::text(TRACK_DATA_NAME, out));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Subsong;
    use crate::driver_constants::AUDV0;
    use crate::register_dump::tests::write_at;
    use crate::register_dump::ChannelStateInterval;

    fn row_write(order: u32, row: u32, frame: u32, value: u8) -> RegisterWrite {
        RegisterWrite {
            order,
            row,
            ..write_at(frame, AUDV0, value)
        }
    }

    #[test]
    fn identical_rows_share_a_waveform() {
        let p = ProjectFile {
            name: String::new(),
            author: String::new(),
            album: String::new(),
            system: String::new(),
            tuning: 440.0,
            instruments: 0,
            wavetables: 0,
            samples: 0,
            subsongs: vec![Subsong {
                writes: vec![
                    row_write(0, 0, 0, 5),
                    row_write(0, 1, 2, 5),
                    row_write(0, 2, 4, 9),
                ],
            }],
        };

        let mut ret = Vec::new();
        write_track_data(&p, &mut ret).unwrap();
        let text = String::from_utf8(ret.pop().unwrap().data).unwrap();

        assert!(text.contains("NUM_SONGS = 1"));
        assert!(text.contains("PAT_S0_C0_P0"));
        // rows 0 and 1 render the same two-frame V=5 state
        assert!(text.contains("NUM_WAVEFORMS ="));
        assert!(text.contains("WF_0"));
    }

    #[test]
    fn sequence_hash_is_stable() {
        let mut a = ChannelStateSequence::new(ChannelState::new(), 2);
        a.intervals.push(ChannelStateInterval {
            state: ChannelState { registers: [1, 2, 3] },
            duration: 2,
        });
        let b = a.clone();
        assert_eq!(sequence_hash(&a), sequence_hash(&b));
    }
}
