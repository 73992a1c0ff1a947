//! TIAZIP instruction codes and the register-log lowering pass

// SPDX-FileCopyrightText: © 2023 Marcus Rowe <undisbeliever@gmail.com>
//
// SPDX-License-Identifier: MIT

use crate::driver_constants::{MAX_INTERVAL_DURATION, VOLUME_DOWN_OPERAND, VOLUME_UP_OPERAND};
use crate::errors::{ExportError, ValueError};
use crate::register_dump::ChannelStateSequence;
use crate::value_newtypes::u8_value_newtype;

use std::collections::BTreeMap;

/// Compact index of a distinct `AlphaCode`, the suffix tree's symbol type.
pub type AlphaChar = u16;

u8_value_newtype!(Control, ControlOutOfRange, 0, 0x0f);
u8_value_newtype!(Frequency, FrequencyOutOfRange, 0, 0x1f);
u8_value_newtype!(Volume, VolumeOutOfRange, 0, 0x0f);
u8_value_newtype!(Duration, DurationOutOfRange, 1, MAX_INTERVAL_DURATION);

/// A volume operand. The ±1 forms collapse the micro-envelopes trackers
/// emit around every note; they use reserved operand bytes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VolumeArg {
    Set(Volume),
    Up,
    Down,
}

impl VolumeArg {
    pub fn operand(self) -> u8 {
        match self {
            Self::Set(v) => v.as_u8(),
            Self::Up => VOLUME_UP_OPERAND,
            Self::Down => VOLUME_DOWN_OPERAND,
        }
    }

    pub fn from_operand(operand: u8) -> Result<Self, ValueError> {
        match operand {
            VOLUME_UP_OPERAND => Ok(Self::Up),
            VOLUME_DOWN_OPERAND => Ok(Self::Down),
            v => Ok(Self::Set(Volume::try_from(v)?)),
        }
    }
}

/// The register writes applied by one `WRITE_DELTA` code. A field is
/// `None` when the decoder leaves that register untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WriteDelta {
    pub control: Option<Control>,
    pub frequency: Option<Frequency>,
    pub volume: Option<VolumeArg>,
    pub duration: Duration,
}

impl WriteDelta {
    /// Change-flag pattern, `0b0cfv`. All-NOOP (zero) is forbidden.
    pub fn change_mask(&self) -> u8 {
        u8::from(self.control.is_some()) << 2
            | u8::from(self.frequency.is_some()) << 1
            | u8::from(self.volume.is_some())
    }
}

/// One instruction of the (compressed or uncompressed) code sequence.
///
/// `Jump` operands hold source-sequence positions until the label rewrite
/// replaces them with compressed-sequence offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AlphaCode {
    Stop,
    WriteDelta(WriteDelta),
    Pause(Duration),
    Sustain(Duration),
    Jump(usize),
    BranchPoint,
    Skip,
    TakeDataJump,
    TakeTrackJump,
    ReturnLast,
    ReturnFf,
    ReturnNoop,
}

impl AlphaCode {
    /// Tagged 64-bit rendering used by logs and mismatch reports.
    pub fn packed(self) -> u64 {
        match self {
            Self::Stop => 0,
            Self::WriteDelta(w) => {
                let c = w.control.map_or(0, |v| v.as_u8());
                let f = w.frequency.map_or(0, |v| v.as_u8());
                let v = w.volume.map_or(0, |v| v.operand());
                1 << 56
                    | u64::from(w.change_mask()) << 32
                    | u64::from(c) << 24
                    | u64::from(f) << 16
                    | u64::from(v) << 8
                    | u64::from(w.duration.as_u8())
            }
            Self::Pause(d) => 2 << 56 | u64::from(d.as_u8()),
            Self::Sustain(d) => 3 << 56 | u64::from(d.as_u8()),
            Self::Jump(a) => 4 << 56 | (a as u64) & 0xffff_ffff,
            Self::BranchPoint => 5 << 56,
            Self::Skip => 6 << 56,
            Self::TakeDataJump => 7 << 56,
            Self::TakeTrackJump => 8 << 56,
            Self::ReturnLast => 9 << 56,
            Self::ReturnFf => 10 << 56,
            Self::ReturnNoop => 11 << 56,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LowerOptions {
    /// An isolated control change is unusual; forcing all three change
    /// flags on tightens the alphabet.
    pub force_full_write_on_control_change: bool,
    /// Encode `V ± 1` with the reserved operands.
    pub volume_adjacency: bool,
}

impl Default for LowerOptions {
    fn default() -> Self {
        Self {
            force_full_write_on_control_change: true,
            volume_adjacency: true,
        }
    }
}

fn push_sustain(out: &mut Vec<AlphaCode>, frames: u32) {
    let mut remaining = frames;
    while remaining > 0 {
        let duration = remaining.min(u32::from(MAX_INTERVAL_DURATION));
        out.push(AlphaCode::Sustain(Duration::try_from(duration).unwrap()));
        remaining -= duration;
    }
}

fn volume_arg(next: u8, last: u8, adjacency: bool) -> VolumeArg {
    if adjacency && next == last.wrapping_add(1) {
        VolumeArg::Up
    } else if adjacency && next.wrapping_add(1) == last {
        VolumeArg::Down
    } else {
        VolumeArg::Set(Volume::try_from(next).unwrap())
    }
}

/// Lower an interval sequence into an `AlphaCode` sequence ending in `Stop`.
///
/// Silent intervals get a dedicated `Pause` opcode; a changed interval gets
/// a single one-frame `WriteDelta`; the rest of every interval is expressed
/// as `Sustain` codes of at most 16 frames.
pub fn lower_sequence(
    sequence: &ChannelStateSequence,
    options: &LowerOptions,
    subsong: usize,
    channel: usize,
) -> Vec<AlphaCode> {
    let mut out = Vec::with_capacity(sequence.size() * 2 + 1);

    let mut last = sequence.initial_state;
    for (position, interval) in sequence.intervals.iter().enumerate() {
        let mut duration = interval.duration;
        if duration == 0 {
            // upstream rounding, recover to a single frame
            log::warn!(
                "{}",
                ExportError::InvalidDuration {
                    subsong,
                    channel,
                    position,
                }
            );
            duration = 1;
        }

        let next = interval.state;
        let cc = next.control() != last.control();
        let fc = next.frequency() != last.frequency();
        let vc = next.volume() != last.volume();

        if next.volume() == 0 {
            out.push(AlphaCode::Pause(Duration::MIN));
            push_sustain(&mut out, duration - 1);
        } else if cc || fc || vc {
            let full = cc && options.force_full_write_on_control_change;
            let control = if cc || full {
                Some(Control::try_from(next.control()).unwrap())
            } else {
                None
            };
            let frequency = if fc || full {
                Some(Frequency::try_from(next.frequency()).unwrap())
            } else {
                None
            };
            let volume = if vc || full {
                Some(volume_arg(
                    next.volume(),
                    last.volume(),
                    options.volume_adjacency && vc,
                ))
            } else {
                None
            };
            out.push(AlphaCode::WriteDelta(WriteDelta {
                control,
                frequency,
                volume,
                duration: Duration::MIN,
            }));
            push_sustain(&mut out, duration - 1);
        } else {
            push_sustain(&mut out, duration);
        }

        last = next;
    }

    out.push(AlphaCode::Stop);
    out
}

/// Bijection between the distinct codes of the lowered streams and the
/// compact `AlphaChar` range fed to the suffix tree.
pub struct Alphabet {
    codes: Vec<AlphaCode>,
    index: BTreeMap<AlphaCode, AlphaChar>,
}

pub fn create_alphabet<'a>(
    sequences: impl IntoIterator<Item = &'a [AlphaCode]>,
) -> Result<Alphabet, ExportError> {
    let mut index = BTreeMap::new();
    for sequence in sequences {
        for &code in sequence {
            index.entry(code).or_insert(0);
        }
    }
    if index.len() > usize::from(AlphaChar::MAX) + 1 {
        return Err(ExportError::AlphabetOverflow(index.len()));
    }

    let codes: Vec<AlphaCode> = index.keys().copied().collect();
    for (i, c) in index.values_mut().enumerate() {
        *c = i as AlphaChar;
    }
    Ok(Alphabet { codes, index })
}

impl Alphabet {
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn index_of(&self, code: &AlphaCode) -> AlphaChar {
        self.index[code]
    }

    pub fn code(&self, c: AlphaChar) -> AlphaCode {
        self.codes[usize::from(c)]
    }

    pub fn to_alpha_sequence(&self, sequence: &[AlphaCode]) -> Vec<AlphaChar> {
        sequence.iter().map(|c| self.index_of(c)).collect()
    }
}
