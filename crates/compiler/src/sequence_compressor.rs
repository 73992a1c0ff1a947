//! Greedy span compression and the control-flow rewrite

// SPDX-FileCopyrightText: © 2023 Marcus Rowe <undisbeliever@gmail.com>
//
// SPDX-License-Identifier: MIT

// The compressor walks the lowered sequence left to right. Repeats longer
// than the span threshold become copy spans that emit nothing into the data
// stream; every traversal of a branching position is instead recorded as one
// span-stream op. A one-slot return register rewrite then collapses
// jump-back-to-caller and jump-back-to-front patterns into zero-operand ops.

use crate::bytecode::{AlphaCode, Alphabet};
use crate::errors::ExportError;
use crate::suffix_tree::{create_suffix_tree, Span};

use std::collections::BTreeMap;

/// One channel's compressed program.
///
/// `data` is the compressed code sequence, `spans` the span/track sequence
/// consumed one op per branch-point traversal. All `Jump` operands are
/// compressed-sequence offsets (the label rewrite has already run).
#[derive(Debug, Clone)]
pub struct CompressedChannel {
    pub data: Vec<AlphaCode>,
    pub spans: Vec<AlphaCode>,
    pub labels: Vec<usize>,
}

#[derive(Debug, Clone, Copy)]
enum SourceSpan {
    Literal { start: usize, length: usize },
    // `start` is the prior occurrence the span copies
    Copy { start: usize, length: usize },
}

pub fn compress_code_sequence(
    subsong: usize,
    channel: usize,
    alphabet: &Alphabet,
    code_sequence: &[AlphaCode],
    span_threshold: usize,
) -> Result<CompressedChannel, ExportError> {
    let alpha_sequence = alphabet.to_alpha_sequence(code_sequence);
    let n = alpha_sequence.len();
    if n == 0 {
        return Ok(CompressedChannel {
            data: vec![AlphaCode::BranchPoint],
            spans: vec![AlphaCode::Stop],
            labels: Vec::new(),
        });
    }

    // Greedy span selection
    // =====================

    let tree = create_suffix_tree(&alpha_sequence);

    // copy_map[i]: leftmost position whose code is executed at i
    let mut copy_map = vec![0usize; n];
    // branch_frequency[r]: successor position -> traversal count, keyed by
    // representative positions
    let mut branch_frequency: Vec<BTreeMap<usize, usize>> = vec![BTreeMap::new(); n];
    let mut spans: Vec<SourceSpan> = Vec::new();

    let mut literal_start = 0;
    let mut literal_length = 0;
    let mut prior = Span::default();
    let mut i = 0;
    while i < n {
        tree.find_prior(i, &mut prior);
        if prior.length > span_threshold {
            if literal_length > 0 {
                spans.push(SourceSpan::Literal {
                    start: literal_start,
                    length: literal_length,
                });
                literal_length = 0;
            }
            spans.push(SourceSpan::Copy {
                start: prior.start,
                length: prior.length,
            });
            for k in 0..prior.length {
                let rep = copy_map[prior.start + k];
                copy_map[i] = rep;
                if i > 0 {
                    *branch_frequency[copy_map[i - 1]].entry(rep).or_insert(0) += 1;
                }
                i += 1;
            }
            literal_start = i;
        } else {
            if i > 0 {
                *branch_frequency[copy_map[i - 1]].entry(i).or_insert(0) += 1;
            }
            copy_map[i] = i;
            literal_length += 1;
            i += 1;
        }
    }
    if literal_length > 0 {
        spans.push(SourceSpan::Literal {
            start: literal_start,
            length: literal_length,
        });
    }

    drop(tree);

    // skip_map[r]: the most frequent successor, ties to the smallest index
    let mut skip_map = vec![0usize; n];
    for (r, frequencies) in branch_frequency.iter().enumerate() {
        let mut max_count = 0;
        for (&successor, &count) in frequencies {
            if count > max_count {
                max_count = count;
                skip_map[r] = successor;
            }
        }
    }
    let is_branch = |r: usize| branch_frequency[r].len() >= 2;

    // Control-flow rewrite
    // ====================
    //
    // A branching position is emitted as either a bare BRANCH_POINT (the
    // first traversal falls through to the skip successor) or TAKE_DATA_JUMP
    // plus an inline JUMP (the first traversal's target is embedded in the
    // data stream). When the skip successor is not the lexically next code,
    // one unconditional JUMP redirect follows the construct. The final STOP
    // is emitted as a BRANCH_POINT whose span op is STOP.

    let mut data = Vec::with_capacity(n);
    let mut span_stream = Vec::new();
    let mut labels = vec![0usize; n];
    let mut inline_target = vec![None::<usize>; n];

    let mut cursor = 0;
    for span in &spans {
        match *span {
            SourceSpan::Literal { start, length } => {
                debug_assert_eq!(cursor, start);
                for i in start..start + length {
                    labels[i] = data.len();
                    let code = code_sequence[i];

                    if code == AlphaCode::Stop {
                        if i + 1 != n {
                            return Err(ExportError::InternalAssertion(
                                "STOP before the end of the code sequence",
                            ));
                        }
                        data.push(AlphaCode::BranchPoint);
                        span_stream.push(AlphaCode::Stop);
                        cursor += 1;
                        continue;
                    }
                    if i + 1 >= n {
                        return Err(ExportError::InternalAssertion(
                            "code sequence does not end in STOP",
                        ));
                    }

                    data.push(code);

                    let next = copy_map[i + 1];
                    if is_branch(i) {
                        let skip = skip_map[i];
                        if next == skip {
                            data.push(AlphaCode::BranchPoint);
                            span_stream.push(AlphaCode::Skip);
                        } else {
                            data.push(AlphaCode::TakeDataJump);
                            data.push(AlphaCode::Jump(next));
                            inline_target[i] = Some(next);
                            span_stream.push(AlphaCode::TakeDataJump);
                        }
                        if skip != i + 1 {
                            data.push(AlphaCode::Jump(skip));
                        }
                    } else if next != i + 1 {
                        data.push(AlphaCode::Jump(next));
                    }
                    cursor += 1;
                }
            }
            SourceSpan::Copy { start, length } => {
                for k in 0..length {
                    let position = cursor;
                    let rep = copy_map[position];
                    debug_assert_eq!(rep, copy_map[start + k]);
                    debug_assert_eq!(code_sequence[rep], code_sequence[position]);

                    if position + 1 >= n {
                        return Err(ExportError::InternalAssertion(
                            "copy span covers the trailing STOP",
                        ));
                    }
                    if is_branch(rep) {
                        let next = copy_map[position + 1];
                        if next == skip_map[rep] {
                            span_stream.push(AlphaCode::Skip);
                        } else if inline_target[rep] == Some(next) {
                            span_stream.push(AlphaCode::TakeDataJump);
                        } else {
                            span_stream.push(AlphaCode::TakeTrackJump);
                            span_stream.push(AlphaCode::Jump(next));
                        }
                    }
                    cursor += 1;
                }
            }
        }
    }

    // Label rewrite: jump operands become compressed-sequence offsets
    for op in data.iter_mut().chain(span_stream.iter_mut()) {
        if let AlphaCode::Jump(target) = op {
            *op = AlphaCode::Jump(labels[*target]);
        }
    }

    rewrite_returns(subsong, channel, &data, &mut span_stream, n)?;

    Ok(CompressedChannel {
        data,
        spans: span_stream,
        labels,
    })
}

// Simulate the program once with a one-slot return register. A track jump
// whose target equals the current return address becomes RETURN_LAST, one
// whose target equals the highest return address ever set becomes
// RETURN_FF. The replaced JUMP slot is kept as RETURN_NOOP padding so span
// indices stay stable; it emits no bits.
fn rewrite_returns(
    subsong: usize,
    channel: usize,
    data: &[AlphaCode],
    span_stream: &mut [AlphaCode],
    source_length: usize,
) -> Result<(), ExportError> {
    let span_jump = |span_stream: &[AlphaCode], j: usize| match span_stream.get(j) {
        Some(AlphaCode::Jump(target)) => Ok(*target),
        _ => Err(ExportError::InternalAssertion(
            "take-track-jump without a jump operand",
        )),
    };

    let mut r: Option<usize> = None;
    let mut f: Option<usize> = None;
    let mut i = 0;
    let mut j = 0;
    let mut steps = 0;

    loop {
        steps += 1;
        if steps > source_length * 4 + 16 {
            return Err(ExportError::InternalAssertion(
                "control-flow rewrite did not terminate",
            ));
        }
        let op = match data.get(i) {
            Some(op) => *op,
            None => {
                return Err(ExportError::InternalAssertion(
                    "program counter out of range",
                ))
            }
        };

        match op {
            AlphaCode::BranchPoint | AlphaCode::TakeDataJump => {
                let construct_len = if op == AlphaCode::TakeDataJump { 2 } else { 1 };
                let fall_through = i + construct_len;

                let span_op = match span_stream.get(j) {
                    Some(op) => *op,
                    None => {
                        return Err(ExportError::InternalAssertion("span stream underrun"));
                    }
                };
                j += 1;

                match span_op {
                    AlphaCode::Stop => break,
                    AlphaCode::Skip => {
                        i = fall_through;
                    }
                    AlphaCode::TakeDataJump => {
                        if op != AlphaCode::TakeDataJump {
                            return Err(ExportError::InternalAssertion(
                                "take-data-jump at a bare branch point",
                            ));
                        }
                        let target = match data.get(i + 1) {
                            Some(AlphaCode::Jump(target)) => *target,
                            _ => {
                                return Err(ExportError::InternalAssertion(
                                    "take-data-jump without an inline jump",
                                ))
                            }
                        };
                        r = Some(fall_through);
                        f = f.max(r);
                        i = target;
                    }
                    AlphaCode::TakeTrackJump => {
                        let target = span_jump(span_stream, j)?;
                        if Some(target) == r {
                            log::debug!(
                                "{} {} | rewriting track jump {} to RETURN_LAST",
                                subsong,
                                channel,
                                j - 1
                            );
                            span_stream[j - 1] = AlphaCode::ReturnLast;
                            span_stream[j] = AlphaCode::ReturnNoop;
                        } else if Some(target) == f {
                            log::debug!(
                                "{} {} | rewriting track jump {} to RETURN_FF",
                                subsong,
                                channel,
                                j - 1
                            );
                            span_stream[j - 1] = AlphaCode::ReturnFf;
                            span_stream[j] = AlphaCode::ReturnNoop;
                        } else {
                            r = Some(fall_through);
                            f = f.max(r);
                        }
                        j += 1;
                        i = target;
                    }
                    _ => {
                        return Err(ExportError::InternalAssertion(
                            "unexpected span op at a branch point",
                        ))
                    }
                }
            }
            AlphaCode::Jump(target) => {
                r = Some(i + 1);
                f = f.max(r);
                i = target;
            }
            _ => {
                i += 1;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::tests::lower_writes;
    use crate::bytecode::{create_alphabet, Duration};
    use crate::driver_constants::{AUDF0, AUDV0};
    use crate::register_dump::tests::write_at;

    fn compress(
        codes: &[AlphaCode],
        threshold: usize,
    ) -> (CompressedChannel, Vec<usize>, Vec<BTreeMap<usize, usize>>) {
        let alphabet = create_alphabet([codes]).unwrap();
        let compressed = compress_code_sequence(0, 0, &alphabet, codes, threshold).unwrap();

        // recompute the copy map the same way for invariant checks
        let alpha = alphabet.to_alpha_sequence(codes);
        let tree = create_suffix_tree(&alpha);
        let mut copy_map = vec![0usize; alpha.len()];
        let mut branch_frequency: Vec<BTreeMap<usize, usize>> =
            vec![BTreeMap::new(); alpha.len()];
        let mut prior = Span::default();
        let mut i = 0;
        while i < alpha.len() {
            tree.find_prior(i, &mut prior);
            if prior.length > threshold {
                for k in 0..prior.length {
                    copy_map[i] = copy_map[prior.start + k];
                    if i > 0 {
                        *branch_frequency[copy_map[i - 1]].entry(copy_map[i]).or_insert(0) += 1;
                    }
                    i += 1;
                }
            } else {
                if i > 0 {
                    *branch_frequency[copy_map[i - 1]].entry(i).or_insert(0) += 1;
                }
                copy_map[i] = i;
                i += 1;
            }
        }
        (compressed, copy_map, branch_frequency)
    }

    fn ramp_codes() -> Vec<AlphaCode> {
        lower_writes(&[
            write_at(0, AUDV0, 8),
            write_at(1, AUDF0, 3),
            write_at(2, AUDF0, 9),
            write_at(3, AUDF0, 3),
            write_at(4, AUDF0, 9),
            write_at(5, AUDF0, 3),
            write_at(6, AUDF0, 9),
        ])
    }

    #[test]
    fn copy_map_invariants() {
        let codes = ramp_codes();
        let (_, copy_map, _) = compress(&codes, 1);
        for (i, &rep) in copy_map.iter().enumerate() {
            assert!(rep <= i);
            assert_eq!(copy_map[rep], rep, "representatives are their own copy");
            assert_eq!(codes[rep], codes[i], "copy preserves the executed code");
        }
    }

    #[test]
    fn straight_line_input_has_no_branches() {
        let codes = lower_writes(&[
            write_at(0, AUDV0, 8),
            write_at(1, AUDF0, 3),
            write_at(2, AUDF0, 9),
            write_at(3, AUDF0, 12),
        ]);
        let (compressed, _, _) = compress(&codes, 3);

        // one BRANCH_POINT for the trailing STOP, nothing else
        assert_eq!(compressed.data.len(), codes.len());
        assert_eq!(
            compressed
                .data
                .iter()
                .filter(|c| !matches!(c, AlphaCode::WriteDelta(_) | AlphaCode::Sustain(_)))
                .count(),
            1
        );
        assert_eq!(compressed.spans, [AlphaCode::Stop]);
    }

    #[test]
    fn empty_sequence_is_a_stop_program() {
        let empty: &[AlphaCode] = &[];
        let alphabet = create_alphabet([empty]).unwrap();
        let compressed = compress_code_sequence(0, 0, &alphabet, empty, 3).unwrap();
        assert_eq!(compressed.data, [AlphaCode::BranchPoint]);
        assert_eq!(compressed.spans, [AlphaCode::Stop]);
    }

    #[test]
    fn repeats_collapse_into_copy_spans() {
        let codes = ramp_codes();
        let (compressed, _, _) = compress(&codes, 1);

        assert!(compressed.data.len() < codes.len());
        assert!(compressed
            .spans
            .iter()
            .any(|c| matches!(c, AlphaCode::Skip)));
    }

    #[test]
    fn every_branch_point_consumes_one_span_op() {
        let codes = ramp_codes();
        let (compressed, copy_map, branch_frequency) = compress(&codes, 1);

        // number of branching traversals == number of non-operand span ops
        let traversals: usize = (0..codes.len() - 1)
            .filter(|&i| branch_frequency[copy_map[i]].len() >= 2)
            .count();
        let span_ops = compressed
            .spans
            .iter()
            .filter(|c| {
                !matches!(
                    c,
                    AlphaCode::Jump(_) | AlphaCode::ReturnNoop | AlphaCode::Stop
                )
            })
            .count();
        assert_eq!(traversals, span_ops);
    }

    #[test]
    fn jump_targets_are_in_range() {
        let codes = ramp_codes();
        let (compressed, _, _) = compress(&codes, 1);
        for op in compressed.data.iter().chain(&compressed.spans) {
            if let AlphaCode::Jump(target) = op {
                assert!(*target < compressed.data.len());
            }
        }
    }

    #[test]
    fn back_edge_to_caller_becomes_return_last() {
        // w1 w2 repeated three times: the second copy traversal jumps back
        // to the address the first jump recorded as its return slot
        let codes = ramp_codes();
        let (compressed, _, _) = compress(&codes, 1);

        assert!(
            compressed
                .spans
                .iter()
                .any(|c| matches!(c, AlphaCode::ReturnLast | AlphaCode::ReturnFf)),
            "spans: {:?}",
            compressed.spans
        );
        assert!(compressed
            .spans
            .iter()
            .any(|c| matches!(c, AlphaCode::ReturnNoop)));
    }

    #[test]
    fn no_zero_durations_survive() {
        let codes = ramp_codes();
        for code in &codes {
            match code {
                AlphaCode::Pause(d) | AlphaCode::Sustain(d) => {
                    assert!(d.as_u8() >= 1);
                }
                AlphaCode::WriteDelta(w) => {
                    assert!(w.duration == Duration::MIN);
                    assert_ne!(w.change_mask(), 0);
                }
                _ => (),
            }
        }
    }
}
