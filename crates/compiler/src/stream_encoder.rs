//! Bit-exact serialization of the compressed programs

// SPDX-FileCopyrightText: © 2023 Marcus Rowe <undisbeliever@gmail.com>
//
// SPDX-License-Identifier: MIT

// Seven coding tables are shared by every (subsong, channel) pair: the
// abstract opcode tree, four register-field payload trees, the span-op tree
// and a per-channel jump-index table. Jump targets are absolute bit
// addresses inside the block address space starting at `data_offset * 8`;
// raw targets are forward-patched once every data stream's layout is known.

use crate::bitstream::Bitstream;
use crate::bytecode::{AlphaCode, WriteDelta};
use crate::driver_constants::{
    CONTROL_BITS, DURATION_BITS, FREQUENCY_BITS, JUMP_ADDRESS_BITS, MAX_JUMP_INDEX_CAP,
    VOLUME_BITS,
};
use crate::errors::ExportError;
use crate::huffman::HuffmanCoder;
use crate::sequence_compressor::CompressedChannel;

use std::collections::BTreeMap;

/// Data-stream opcode shapes fed to the abstract Huffman tree. The lowered
/// `STOP` has no shape of its own; it rides on a `BranchPoint` whose span
/// op is `STOP`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OpcodeShape {
    BranchPoint,
    TakeDataJump,
    // change-flag pattern, `0b0cfv`
    WriteDelta(u8),
    Pause,
    Sustain,
    Jump,
}

/// Span/track-stream ops. `RETURN_NOOP` padding never reaches the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SpanOp {
    Stop,
    Skip,
    TakeDataJump,
    TakeTrackJump,
    ReturnLast,
    ReturnFf,
}

#[derive(Debug, Clone, Copy)]
pub struct EncoderConfig {
    pub jump_index_cap: usize,
    pub huffman_leaf_cap: usize,
    pub data_offset: usize,
    pub block_size: usize,
}

/// The most-referenced jump targets of one channel, addressable by a small
/// index instead of a raw 15-bit address.
#[derive(Debug, Clone)]
pub struct JumpIndexTable {
    targets: Vec<usize>,
    index_bits: u32,
}

impl JumpIndexTable {
    fn build(counts: &BTreeMap<usize, usize>, cap: usize) -> Self {
        let mut frequent: Vec<(usize, usize)> = counts
            .iter()
            .filter(|(_, &count)| count >= 2)
            .map(|(&target, &count)| (target, count))
            .collect();
        // most referenced first, ties to the smallest target
        frequent.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        frequent.truncate(cap.min(MAX_JUMP_INDEX_CAP));

        JumpIndexTable {
            targets: frequent.into_iter().map(|(target, _)| target).collect(),
            index_bits: if cap <= 32 { 5 } else { 6 },
        }
    }

    fn index_of(&self, target: usize) -> Option<usize> {
        self.targets.iter().position(|&t| t == target)
    }

    pub fn index_bits(&self) -> u32 {
        self.index_bits
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Entry addresses resolved to absolute bit addresses.
    pub fn resolve(
        &self,
        position_map: &[usize],
        base_bits: usize,
    ) -> Result<Vec<u16>, ExportError> {
        self.targets
            .iter()
            .map(|&t| absolute_address(base_bits + position_map[t]))
            .collect()
    }

    pub fn target(&self, index: usize) -> Option<usize> {
        self.targets.get(index).copied()
    }
}

fn absolute_address(bits: usize) -> Result<u16, ExportError> {
    if bits < 1 << JUMP_ADDRESS_BITS {
        Ok(bits as u16)
    } else {
        Err(ExportError::CapacityExceeded {
            variant: "TIAZIP",
            size: bits,
            limit: 1 << JUMP_ADDRESS_BITS,
        })
    }
}

/// Every coding table shared between the encoder and the player.
#[derive(Debug)]
pub struct StreamTrees {
    pub opcode: HuffmanCoder<OpcodeShape>,
    pub control: HuffmanCoder<u8>,
    pub frequency: HuffmanCoder<u8>,
    pub volume: HuffmanCoder<u8>,
    pub duration: HuffmanCoder<u8>,
    pub span: HuffmanCoder<SpanOp>,
}

/// One channel's emitted streams.
#[derive(Debug, Clone)]
pub struct EncodedChannel {
    pub data: Bitstream,
    pub track: Bitstream,
    pub jump_index: JumpIndexTable,
    pub jump_table: Vec<u16>,
    /// Absolute bit address of the data stream start.
    pub base_bits: usize,
}

pub struct EncoderOutput {
    pub trees: StreamTrees,
    /// Indexed `[subsong][channel]`.
    pub channels: Vec<Vec<EncodedChannel>>,
}

impl EncoderOutput {
    pub fn total_bytes(&self) -> usize {
        self.channels
            .iter()
            .flatten()
            .map(|c| c.data.bytes_used() + c.track.bytes_used())
            .sum()
    }
}

struct FieldFrequencies {
    opcode: BTreeMap<OpcodeShape, usize>,
    control: BTreeMap<u8, usize>,
    frequency: BTreeMap<u8, usize>,
    volume: BTreeMap<u8, usize>,
    duration: BTreeMap<u8, usize>,
    span: BTreeMap<SpanOp, usize>,
}

fn bump<S: Ord>(map: &mut BTreeMap<S, usize>, sym: S) {
    *map.entry(sym).or_insert(0) += 1;
}

fn gather_write_delta(frequencies: &mut FieldFrequencies, w: &WriteDelta) {
    bump(&mut frequencies.opcode, OpcodeShape::WriteDelta(w.change_mask()));
    if let Some(c) = w.control {
        bump(&mut frequencies.control, c.as_u8());
    }
    if let Some(f) = w.frequency {
        bump(&mut frequencies.frequency, f.as_u8());
    }
    if let Some(v) = w.volume {
        bump(&mut frequencies.volume, v.operand());
    }
    bump(&mut frequencies.duration, w.duration.as_u8() - 1);
}

// Pre-pass: per-field frequencies across every channel, jump-target counts
// per channel.
fn gather_frequencies(
    channels: &[Vec<CompressedChannel>],
) -> Result<(FieldFrequencies, Vec<Vec<BTreeMap<usize, usize>>>), ExportError> {
    let mut frequencies = FieldFrequencies {
        opcode: BTreeMap::new(),
        control: BTreeMap::new(),
        frequency: BTreeMap::new(),
        volume: BTreeMap::new(),
        duration: BTreeMap::new(),
        span: BTreeMap::new(),
    };
    let mut jump_counts = Vec::new();

    for subsong in channels {
        let mut subsong_counts = Vec::new();
        for channel in subsong {
            let mut counts: BTreeMap<usize, usize> = BTreeMap::new();

            let mut i = 0;
            while i < channel.data.len() {
                match channel.data[i] {
                    AlphaCode::WriteDelta(w) => gather_write_delta(&mut frequencies, &w),
                    AlphaCode::Pause(d) => {
                        bump(&mut frequencies.opcode, OpcodeShape::Pause);
                        bump(&mut frequencies.duration, d.as_u8() - 1);
                    }
                    AlphaCode::Sustain(d) => {
                        bump(&mut frequencies.opcode, OpcodeShape::Sustain);
                        bump(&mut frequencies.duration, d.as_u8() - 1);
                    }
                    AlphaCode::BranchPoint => {
                        bump(&mut frequencies.opcode, OpcodeShape::BranchPoint)
                    }
                    AlphaCode::TakeDataJump => {
                        bump(&mut frequencies.opcode, OpcodeShape::TakeDataJump);
                        match channel.data.get(i + 1) {
                            Some(AlphaCode::Jump(target)) => bump(&mut counts, *target),
                            _ => {
                                return Err(ExportError::InternalAssertion(
                                    "take-data-jump without an inline jump",
                                ))
                            }
                        }
                        i += 1;
                    }
                    AlphaCode::Jump(target) => {
                        bump(&mut frequencies.opcode, OpcodeShape::Jump);
                        bump(&mut counts, target);
                    }
                    _ => {
                        return Err(ExportError::InternalAssertion(
                            "span op in the data stream",
                        ))
                    }
                }
                i += 1;
            }

            let mut i = 0;
            while i < channel.spans.len() {
                match channel.spans[i] {
                    AlphaCode::Stop => bump(&mut frequencies.span, SpanOp::Stop),
                    AlphaCode::Skip => bump(&mut frequencies.span, SpanOp::Skip),
                    AlphaCode::TakeDataJump => bump(&mut frequencies.span, SpanOp::TakeDataJump),
                    AlphaCode::TakeTrackJump => {
                        bump(&mut frequencies.span, SpanOp::TakeTrackJump);
                        match channel.spans.get(i + 1) {
                            Some(AlphaCode::Jump(target)) => bump(&mut counts, *target),
                            _ => {
                                return Err(ExportError::InternalAssertion(
                                    "take-track-jump without a jump operand",
                                ))
                            }
                        }
                        i += 1;
                    }
                    AlphaCode::ReturnLast => bump(&mut frequencies.span, SpanOp::ReturnLast),
                    AlphaCode::ReturnFf => bump(&mut frequencies.span, SpanOp::ReturnFf),
                    AlphaCode::ReturnNoop => (),
                    _ => {
                        return Err(ExportError::InternalAssertion(
                            "data op in the span stream",
                        ))
                    }
                }
                i += 1;
            }

            subsong_counts.push(counts);
        }
        jump_counts.push(subsong_counts);
    }

    Ok((frequencies, jump_counts))
}

struct JumpPatch {
    bit_position: usize,
    target: usize,
}

fn write_jump(
    stream: &mut Bitstream,
    target: usize,
    table: &JumpIndexTable,
    patches: &mut Vec<JumpPatch>,
) {
    match table.index_of(target) {
        Some(index) => {
            stream.write_bit(true);
            stream.write_bits(index as u64, table.index_bits());
        }
        None => {
            stream.write_bit(false);
            patches.push(JumpPatch {
                bit_position: stream.position(),
                target,
            });
            stream.write_bits(0, JUMP_ADDRESS_BITS);
        }
    }
}

fn emit_opcode(
    trees: &StreamTrees,
    stream: &mut Bitstream,
    shape: OpcodeShape,
) -> Result<(), ExportError> {
    match trees.opcode.code(&shape) {
        Some(path) => {
            stream.write_code(path);
            Ok(())
        }
        None => Err(ExportError::InternalAssertion("opcode missing from tree")),
    }
}

fn emit_span_op(
    trees: &StreamTrees,
    stream: &mut Bitstream,
    op: SpanOp,
) -> Result<(), ExportError> {
    match trees.span.code(&op) {
        Some(path) => {
            stream.write_code(path);
            Ok(())
        }
        None => Err(ExportError::InternalAssertion("span op missing from tree")),
    }
}

fn emit_field(coder: &HuffmanCoder<u8>, stream: &mut Bitstream, value: u8, raw_bits: u32) {
    match coder.code(&value) {
        Some(path) => stream.write_code(path),
        None => {
            stream.write_code(coder.literal_code());
            stream.write_bits(u64::from(value), raw_bits);
        }
    }
}

fn emit_write_delta(trees: &StreamTrees, stream: &mut Bitstream, w: &WriteDelta) {
    if let Some(c) = w.control {
        emit_field(&trees.control, stream, c.as_u8(), CONTROL_BITS);
    }
    if let Some(f) = w.frequency {
        emit_field(&trees.frequency, stream, f.as_u8(), FREQUENCY_BITS);
    }
    if let Some(v) = w.volume {
        emit_field(&trees.volume, stream, v.operand(), VOLUME_BITS);
    }
    emit_field(&trees.duration, stream, w.duration.as_u8() - 1, DURATION_BITS);
}

/// Serialize every compressed channel, resolve the forward patches and the
/// jump-index tables.
pub fn encode_streams(
    channels: &[Vec<CompressedChannel>],
    config: &EncoderConfig,
) -> Result<EncoderOutput, ExportError> {
    let (frequencies, jump_counts) = gather_frequencies(channels)?;

    let leaf_cap = config.huffman_leaf_cap;
    let trees = StreamTrees {
        opcode: HuffmanCoder::build(&frequencies.opcode, leaf_cap, 0),
        control: HuffmanCoder::build(&frequencies.control, leaf_cap, 1),
        frequency: HuffmanCoder::build(&frequencies.frequency, leaf_cap, 1),
        volume: HuffmanCoder::build(&frequencies.volume, leaf_cap, 1),
        duration: HuffmanCoder::build(&frequencies.duration, leaf_cap, 1),
        span: HuffmanCoder::build(&frequencies.span, leaf_cap, 0),
    };

    // Data streams: each starts byte-aligned, the address space accumulates
    // across them in emission order.
    let mut base_bits = config.data_offset * 8;
    let mut encoded: Vec<Vec<EncodedChannel>> = Vec::with_capacity(channels.len());
    let mut position_maps: Vec<Vec<Vec<usize>>> = Vec::with_capacity(channels.len());

    for (subsong, subsong_channels) in channels.iter().enumerate() {
        let mut encoded_row = Vec::with_capacity(subsong_channels.len());
        let mut position_row = Vec::with_capacity(subsong_channels.len());

        for (channel_index, channel) in subsong_channels.iter().enumerate() {
            let jump_index =
                JumpIndexTable::build(&jump_counts[subsong][channel_index], config.jump_index_cap);

            let mut stream = Bitstream::with_capacity(channel.data.len() * 8);
            let mut position_map = Vec::with_capacity(channel.data.len());
            let mut patches = Vec::new();

            let mut i = 0;
            while i < channel.data.len() {
                position_map.push(stream.position());
                match channel.data[i] {
                    AlphaCode::WriteDelta(w) => {
                        emit_opcode(&trees, &mut stream, OpcodeShape::WriteDelta(w.change_mask()))?;
                        emit_write_delta(&trees, &mut stream, &w);
                    }
                    AlphaCode::Pause(d) => {
                        emit_opcode(&trees, &mut stream, OpcodeShape::Pause)?;
                        emit_field(&trees.duration, &mut stream, d.as_u8() - 1, DURATION_BITS);
                    }
                    AlphaCode::Sustain(d) => {
                        emit_opcode(&trees, &mut stream, OpcodeShape::Sustain)?;
                        emit_field(&trees.duration, &mut stream, d.as_u8() - 1, DURATION_BITS);
                    }
                    AlphaCode::BranchPoint => {
                        emit_opcode(&trees, &mut stream, OpcodeShape::BranchPoint)?;
                    }
                    AlphaCode::TakeDataJump => {
                        emit_opcode(&trees, &mut stream, OpcodeShape::TakeDataJump)?;
                        let target = match channel.data.get(i + 1) {
                            Some(AlphaCode::Jump(target)) => *target,
                            _ => {
                                return Err(ExportError::InternalAssertion(
                                    "take-data-jump without an inline jump",
                                ))
                            }
                        };
                        // the inline operand is its own compressed position
                        position_map.push(stream.position());
                        write_jump(&mut stream, target, &jump_index, &mut patches);
                        i += 1;
                    }
                    AlphaCode::Jump(target) => {
                        emit_opcode(&trees, &mut stream, OpcodeShape::Jump)?;
                        write_jump(&mut stream, target, &jump_index, &mut patches);
                    }
                    _ => {
                        return Err(ExportError::InternalAssertion(
                            "span op in the data stream",
                        ))
                    }
                }
                i += 1;
            }

            // forward patches: raw targets become absolute bit addresses
            let end = stream.position();
            for patch in &patches {
                let address = absolute_address(base_bits + position_map[patch.target])?;
                stream.seek(patch.bit_position);
                stream.write_bits(u64::from(address), JUMP_ADDRESS_BITS);
            }
            stream.seek(end);

            let jump_table = jump_index.resolve(&position_map, base_bits)?;

            encoded_row.push(EncodedChannel {
                data: stream,
                track: Bitstream::new(),
                jump_index,
                jump_table,
                base_bits,
            });
            position_row.push(position_map);

            base_bits += encoded_row.last().unwrap().data.bytes_used() * 8;
        }
        encoded.push(encoded_row);
        position_maps.push(position_row);
    }

    // Track streams
    for (subsong, subsong_channels) in channels.iter().enumerate() {
        for (channel_index, channel) in subsong_channels.iter().enumerate() {
            let out = &mut encoded[subsong][channel_index];
            let position_map = &position_maps[subsong][channel_index];
            let mut stream = Bitstream::with_capacity(channel.spans.len() * 4);
            let mut patches = Vec::new();

            let mut i = 0;
            while i < channel.spans.len() {
                match channel.spans[i] {
                    AlphaCode::Stop => emit_span_op(&trees, &mut stream, SpanOp::Stop)?,
                    AlphaCode::Skip => emit_span_op(&trees, &mut stream, SpanOp::Skip)?,
                    AlphaCode::TakeDataJump => {
                        emit_span_op(&trees, &mut stream, SpanOp::TakeDataJump)?
                    }
                    AlphaCode::TakeTrackJump => {
                        emit_span_op(&trees, &mut stream, SpanOp::TakeTrackJump)?;
                        let target = match channel.spans.get(i + 1) {
                            Some(AlphaCode::Jump(target)) => *target,
                            _ => {
                                return Err(ExportError::InternalAssertion(
                                    "take-track-jump without a jump operand",
                                ))
                            }
                        };
                        write_jump(&mut stream, target, &out.jump_index, &mut patches);
                        i += 1;
                    }
                    AlphaCode::ReturnLast => {
                        emit_span_op(&trees, &mut stream, SpanOp::ReturnLast)?;
                    }
                    AlphaCode::ReturnFf => {
                        emit_span_op(&trees, &mut stream, SpanOp::ReturnFf)?;
                    }
                    // sequence-level padding, no bits
                    AlphaCode::ReturnNoop => (),
                    _ => {
                        return Err(ExportError::InternalAssertion(
                            "data op in the span stream",
                        ))
                    }
                }
                i += 1;
            }

            let end = stream.position();
            for patch in &patches {
                let address = absolute_address(out.base_bits + position_map[patch.target])?;
                stream.seek(patch.bit_position);
                stream.write_bits(u64::from(address), JUMP_ADDRESS_BITS);
            }
            stream.seek(end);

            out.track = stream;
        }
    }

    let output = EncoderOutput {
        trees,
        channels: encoded,
    };

    let total = output.total_bytes();
    if total > config.block_size {
        return Err(ExportError::CapacityExceeded {
            variant: "TIAZIP",
            size: total,
            limit: config.block_size,
        });
    }

    Ok(output)
}
