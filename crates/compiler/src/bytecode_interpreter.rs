//! Bit-exact re-execution of the encoded streams

// SPDX-FileCopyrightText: © 2023 Marcus Rowe <undisbeliever@gmail.com>
//
// SPDX-License-Identifier: MIT

// The interpreter decodes the emitted bitstreams exactly the way the 6502
// player does: one Huffman decode per field, jumps through absolute bit
// addresses, a one-slot return register and a high-water return register.
// The validator runs it against the lowered code sequence and fails the
// export on the first divergence.

use crate::bitstream::Bitstream;
use crate::bytecode::{
    AlphaCode, Control, Duration, Frequency, VolumeArg, WriteDelta,
};
use crate::driver_constants::{
    CONTROL_BITS, DURATION_BITS, FREQUENCY_BITS, JUMP_ADDRESS_BITS, VOLUME_BITS,
};
use crate::errors::ExportError;
use crate::huffman::{HuffSym, HuffmanCoder};
use crate::stream_encoder::{EncodedChannel, OpcodeShape, SpanOp, StreamTrees};

pub struct TrackInterpreter<'a> {
    trees: &'a StreamTrees,
    data: Bitstream,
    track: Bitstream,
    jump_table: &'a [u16],
    jump_index_bits: u32,
    base: usize,

    // return-last and return-front registers, absolute bit addresses
    r: Option<usize>,
    f: Option<usize>,

    hops: usize,
    max_hops: usize,
}

impl<'a> TrackInterpreter<'a> {
    pub fn new(trees: &'a StreamTrees, channel: &'a EncodedChannel, max_steps: usize) -> Self {
        let mut data = channel.data.clone();
        data.seek(0);
        let mut track = channel.track.clone();
        track.seek(0);

        Self {
            trees,
            data,
            track,
            jump_table: &channel.jump_table,
            jump_index_bits: channel.jump_index.index_bits(),
            base: channel.base_bits,
            r: None,
            f: None,
            hops: 0,
            max_hops: max_steps * 8 + 64,
        }
    }

    fn read_field(&mut self, which: Field) -> u8 {
        let (coder, raw_bits) = match which {
            Field::Control => (&self.trees.control, CONTROL_BITS),
            Field::Frequency => (&self.trees.frequency, FREQUENCY_BITS),
            Field::Volume => (&self.trees.volume, VOLUME_BITS),
            Field::Duration => (&self.trees.duration, DURATION_BITS),
        };
        match coder.decode(&mut self.data) {
            HuffSym::Sym(v) => v,
            HuffSym::Literal => self.data.read_bits(raw_bits) as u8,
        }
    }

    // A jump operand: a one-bit indexed/direct discriminator, then either a
    // small table index or a raw absolute bit address.
    fn read_jump(&mut self, from_track: bool) -> Result<usize, ExportError> {
        let stream = if from_track {
            &mut self.track
        } else {
            &mut self.data
        };
        if stream.read_bit() {
            let index = stream.read_bits(self.jump_index_bits) as usize;
            match self.jump_table.get(index) {
                Some(&address) => Ok(usize::from(address)),
                None => Err(ExportError::InternalAssertion(
                    "jump index out of table range",
                )),
            }
        } else {
            Ok(stream.read_bits(JUMP_ADDRESS_BITS) as usize)
        }
    }

    fn seek_to(&mut self, absolute: usize) -> Result<(), ExportError> {
        if absolute < self.base || absolute - self.base > self.data.size() {
            return Err(ExportError::InternalAssertion(
                "jump outside the channel's data stream",
            ));
        }
        self.data.seek(absolute - self.base);
        Ok(())
    }

    fn take_jump(&mut self, target: usize, fall_through: usize) -> Result<(), ExportError> {
        self.r = Some(self.base + fall_through);
        self.f = self.f.max(self.r);
        self.seek_to(target)
    }

    fn next_span_op(&mut self) -> Result<SpanOp, ExportError> {
        match self.trees.span.decode(&mut self.track) {
            HuffSym::Sym(op) => Ok(op),
            HuffSym::Literal => Err(ExportError::InternalAssertion(
                "literal leaf in the span tree",
            )),
        }
    }

    fn decode_write_delta(&mut self, mask: u8) -> Result<AlphaCode, ExportError> {
        let control = if mask & 0b100 != 0 {
            Some(Control::try_from(self.read_field(Field::Control))?)
        } else {
            None
        };
        let frequency = if mask & 0b010 != 0 {
            Some(Frequency::try_from(self.read_field(Field::Frequency))?)
        } else {
            None
        };
        let volume = if mask & 0b001 != 0 {
            Some(VolumeArg::from_operand(self.read_field(Field::Volume))?)
        } else {
            None
        };
        let duration = Duration::try_from(self.read_field(Field::Duration) + 1)?;
        Ok(AlphaCode::WriteDelta(WriteDelta {
            control,
            frequency,
            volume,
            duration,
        }))
    }

    /// Advance to the next executed code: `WriteDelta`, `Pause`, `Sustain`
    /// or the final `Stop`.
    pub fn next_code(&mut self) -> Result<AlphaCode, ExportError> {
        loop {
            self.hops += 1;
            if self.hops > self.max_hops {
                return Err(ExportError::InternalAssertion(
                    "decoded program does not terminate",
                ));
            }

            let shape = match self.trees.opcode.decode(&mut self.data) {
                HuffSym::Sym(shape) => shape,
                HuffSym::Literal => {
                    return Err(ExportError::InternalAssertion(
                        "literal leaf in the opcode tree",
                    ))
                }
            };

            match shape {
                OpcodeShape::WriteDelta(mask) => return self.decode_write_delta(mask),
                OpcodeShape::Pause => {
                    let d = Duration::try_from(self.read_field(Field::Duration) + 1)?;
                    return Ok(AlphaCode::Pause(d));
                }
                OpcodeShape::Sustain => {
                    let d = Duration::try_from(self.read_field(Field::Duration) + 1)?;
                    return Ok(AlphaCode::Sustain(d));
                }
                OpcodeShape::Jump => {
                    let target = self.read_jump(false)?;
                    let fall_through = self.data.position();
                    self.take_jump(target, fall_through)?;
                }
                OpcodeShape::BranchPoint => match self.next_span_op()? {
                    SpanOp::Stop => return Ok(AlphaCode::Stop),
                    SpanOp::Skip => (),
                    SpanOp::TakeTrackJump => {
                        let target = self.read_jump(true)?;
                        let fall_through = self.data.position();
                        self.take_jump(target, fall_through)?;
                    }
                    SpanOp::ReturnLast => self.return_to(self.r)?,
                    SpanOp::ReturnFf => self.return_to(self.f)?,
                    SpanOp::TakeDataJump => {
                        return Err(ExportError::InternalAssertion(
                            "take-data-jump at a bare branch point",
                        ))
                    }
                },
                OpcodeShape::TakeDataJump => {
                    let inline = self.read_jump(false)?;
                    let fall_through = self.data.position();
                    match self.next_span_op()? {
                        SpanOp::Skip => (),
                        SpanOp::TakeDataJump => self.take_jump(inline, fall_through)?,
                        SpanOp::TakeTrackJump => {
                            let target = self.read_jump(true)?;
                            self.take_jump(target, fall_through)?;
                        }
                        SpanOp::ReturnLast => self.return_to(self.r)?,
                        SpanOp::ReturnFf => self.return_to(self.f)?,
                        SpanOp::Stop => {
                            return Err(ExportError::InternalAssertion(
                                "span STOP at a data jump",
                            ))
                        }
                    }
                }
            }
        }
    }

    fn return_to(&mut self, register: Option<usize>) -> Result<(), ExportError> {
        match register {
            Some(address) => self.seek_to(address),
            None => Err(ExportError::InternalAssertion(
                "return before any jump was taken",
            )),
        }
    }
}

enum Field {
    Control,
    Frequency,
    Volume,
    Duration,
}

/// Decode one channel completely; used by tests and debug dumps.
pub fn decode_channel(
    trees: &StreamTrees,
    channel: &EncodedChannel,
    max_steps: usize,
) -> Result<Vec<AlphaCode>, ExportError> {
    let mut interpreter = TrackInterpreter::new(trees, channel, max_steps);
    let mut out = Vec::new();
    loop {
        let code = interpreter.next_code()?;
        let stop = code == AlphaCode::Stop;
        out.push(code);
        if stop {
            return Ok(out);
        }
        if out.len() > max_steps {
            return Err(ExportError::InternalAssertion(
                "decoded program does not stop",
            ));
        }
    }
}

/// Re-execute the encoded artifact and compare every emitted code against
/// the lowered source sequence. The encoder is a build-time tool; a
/// mismatch is fatal to the export.
pub fn validate_streams(
    trees: &StreamTrees,
    channels: &[Vec<EncodedChannel>],
    code_sequences: &[Vec<Vec<AlphaCode>>],
) -> Result<(), ExportError> {
    for (subsong, subsong_channels) in channels.iter().enumerate() {
        for (channel_index, channel) in subsong_channels.iter().enumerate() {
            let expected = &code_sequences[subsong][channel_index];
            let mut interpreter = TrackInterpreter::new(trees, channel, expected.len());

            for (step, &expected_code) in expected.iter().enumerate() {
                let actual = interpreter.next_code()?;
                if actual != expected_code {
                    log::error!(
                        "{} {} | {}: {:016x} <> {:016x}",
                        subsong,
                        channel_index,
                        step,
                        expected_code.packed(),
                        actual.packed()
                    );
                    return Err(ExportError::ValidationMismatch {
                        subsong,
                        channel: channel_index,
                        step,
                        expected: expected_code,
                        actual,
                    });
                }
            }
        }
    }
    Ok(())
}
