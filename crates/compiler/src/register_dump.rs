//! Captured TIA register writes and channel-state replay

// SPDX-FileCopyrightText: © 2023 Marcus Rowe <undisbeliever@gmail.com>
//
// SPDX-License-Identifier: MIT

use crate::driver_constants::{channel_register_index, REGISTER_MASKS, TICKS_PER_SECOND};

use serde::Deserialize;

/// One audio register write captured from the engine.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct RegisterWrite {
    pub ticks: u32,
    pub seconds: u32,
    pub hz: f64,

    // row coordinate
    #[serde(default)]
    pub subsong: u32,
    #[serde(default)]
    pub order: u32,
    #[serde(default)]
    pub row: u32,

    pub addr: u8,
    pub value: u8,

    #[serde(default)]
    pub system_index: u32,
}

impl RegisterWrite {
    /// Frame number and leftover ticks of this write's timestamp.
    pub fn frame(&self) -> (u32, u32) {
        let freq = u64::from((f64::from(TICKS_PER_SECOND) / self.hz) as u32).max(1);
        let total_ticks = u64::from(self.ticks) + u64::from(TICKS_PER_SECOND) * u64::from(self.seconds);
        ((total_ticks / freq) as u32, (total_ticks % freq) as u32)
    }
}

/// The three audio registers of one TIA channel: control, frequency, volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelState {
    pub registers: [u8; 3],
}

impl ChannelState {
    pub const fn new() -> Self {
        Self { registers: [0; 3] }
    }

    pub fn control(&self) -> u8 {
        self.registers[0]
    }
    pub fn frequency(&self) -> u8 {
        self.registers[1]
    }
    pub fn volume(&self) -> u8 {
        self.registers[2]
    }
}

/// A maximal run of frames over which the channel registers are constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelStateInterval {
    pub state: ChannelState,
    pub duration: u32,
}

#[derive(Debug, Clone)]
pub struct ChannelStateSequence {
    pub initial_state: ChannelState,
    pub max_interval_duration: u32,
    pub intervals: Vec<ChannelStateInterval>,
}

impl ChannelStateSequence {
    pub fn new(initial_state: ChannelState, max_interval_duration: u32) -> Self {
        assert!(max_interval_duration > 0);
        Self {
            initial_state,
            max_interval_duration,
            intervals: Vec::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.intervals.len()
    }

    pub fn total_frames(&self) -> u32 {
        self.intervals.iter().map(|i| i.duration).sum()
    }

    pub(crate) fn push_state(&mut self, state: ChannelState, duration: u32) {
        let mut remaining = duration;
        while remaining > 0 {
            let duration = remaining.min(self.max_interval_duration);
            self.intervals.push(ChannelStateInterval { state, duration });
            remaining -= duration;
        }
    }
}

/// Replay a register-write log against a fresh all-zero `ChannelState` and
/// coalesce unchanged frames into intervals of at most
/// `max_interval_duration` frames.
///
/// Writes addressed to the other channel still extend the total frame count
/// so both channels cover the whole song.
pub fn channel_state_sequence(
    writes: &[RegisterWrite],
    channel: usize,
    max_interval_duration: u32,
) -> ChannelStateSequence {
    let mut sequence = ChannelStateSequence::new(ChannelState::new(), max_interval_duration);

    let mut state = sequence.initial_state;
    let mut state_frame = 0;
    let mut end_frame = 0;

    for write in writes {
        let (frame, _) = write.frame();
        end_frame = end_frame.max(frame + 1);

        let register = match channel_register_index(channel, write.addr) {
            Some(r) => r,
            None => continue,
        };
        let value = write.value & REGISTER_MASKS[register];
        if state.registers[register] == value {
            continue;
        }

        if frame > state_frame {
            sequence.push_state(state, frame - state_frame);
            state_frame = frame;
        }
        state.registers[register] = value;
    }

    if end_frame > state_frame {
        sequence.push_state(state, end_frame - state_frame);
    }

    sequence
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::driver_constants::{AUDC0, AUDF1, AUDV0, AUDV1, MAX_INTERVAL_DURATION};

    pub(crate) fn write_at(frame: u32, addr: u8, value: u8) -> RegisterWrite {
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

    #[test]
    fn frame_math() {
        let w = write_at(9, AUDV0, 3);
        assert_eq!(w.frame(), (9, 0));

        let w = RegisterWrite {
            seconds: 2,
            ticks: 0,
            ..write_at(0, AUDV0, 3)
        };
        assert_eq!(w.frame().0, 120);
    }

    #[test]
    fn coalesces_unchanged_frames() {
        let writes = [
            write_at(0, AUDC0, 5),
            write_at(0, AUDV0, 8),
            write_at(10, AUDV0, 2),
        ];
        let seq = channel_state_sequence(&writes, 0, u32::from(MAX_INTERVAL_DURATION));

        assert_eq!(seq.size(), 2);
        assert_eq!(seq.intervals[0].duration, 10);
        assert_eq!(seq.intervals[0].state.control(), 5);
        assert_eq!(seq.intervals[0].state.volume(), 8);
        assert_eq!(seq.intervals[1].duration, 1);
        assert_eq!(seq.intervals[1].state.volume(), 2);
    }

    #[test]
    fn interval_cap_splits_long_runs() {
        let writes = [write_at(0, AUDV0, 8), write_at(39, AUDV0, 8)];
        let seq = channel_state_sequence(&writes, 0, u32::from(MAX_INTERVAL_DURATION));

        let durations: Vec<u32> = seq.intervals.iter().map(|i| i.duration).collect();
        assert_eq!(durations, [16, 16, 8]);
    }

    #[test]
    fn other_channel_writes_only_extend_the_song() {
        let writes = [write_at(0, AUDV1, 8), write_at(3, AUDF1, 2)];
        let seq = channel_state_sequence(&writes, 0, u32::from(MAX_INTERVAL_DURATION));

        assert_eq!(seq.size(), 1);
        assert_eq!(seq.intervals[0].state, ChannelState::new());
        assert_eq!(seq.intervals[0].duration, 4);
    }

    #[test]
    fn register_values_are_masked() {
        let writes = [write_at(0, AUDC0, 0xf5)];
        let seq = channel_state_sequence(&writes, 0, u32::from(MAX_INTERVAL_DURATION));
        assert_eq!(seq.intervals[0].state.control(), 5);
    }

    #[test]
    fn empty_log_is_empty() {
        let seq = channel_state_sequence(&[], 0, u32::from(MAX_INTERVAL_DURATION));
        assert!(seq.intervals.is_empty());
    }
}
