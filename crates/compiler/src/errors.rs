//! A single location for all of the errors in the compiler

// SPDX-FileCopyrightText: © 2023 Marcus Rowe <undisbeliever@gmail.com>
//
// SPDX-License-Identifier: MIT

use std::fmt::Display;
use std::io;

use crate::bytecode::AlphaCode;

#[derive(Debug)]
pub enum ValueError {
    ControlOutOfRange(u32),
    FrequencyOutOfRange(u32),
    VolumeOutOfRange(u32),
    DurationOutOfRange(u32),
}

#[derive(Debug)]
pub enum DeserializeError {
    OpenError(String, io::Error),
    SerdeError(String, serde_json::Error),
}

#[derive(Debug)]
pub enum ExportError {
    ConfigInvalid(String),
    CapacityExceeded {
        variant: &'static str,
        size: usize,
        limit: usize,
    },
    InvalidDuration {
        subsong: usize,
        channel: usize,
        position: usize,
    },
    AlphabetOverflow(usize),
    ValidationMismatch {
        subsong: usize,
        channel: usize,
        step: usize,
        expected: AlphaCode,
        actual: AlphaCode,
    },
    InternalAssertion(&'static str),

    DeserializeError(DeserializeError),
    ValueError(ValueError),
}

impl From<DeserializeError> for ExportError {
    fn from(e: DeserializeError) -> Self {
        Self::DeserializeError(e)
    }
}

impl From<ValueError> for ExportError {
    fn from(e: ValueError) -> Self {
        Self::ValueError(e)
    }
}

// Display
// =======

impl Display for ValueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ControlOutOfRange(v) => write!(f, "control value out of range: {}", v),
            Self::FrequencyOutOfRange(v) => write!(f, "frequency value out of range: {}", v),
            Self::VolumeOutOfRange(v) => write!(f, "volume value out of range: {}", v),
            Self::DurationOutOfRange(v) => write!(f, "duration out of range: {}", v),
        }
    }
}

impl Display for DeserializeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenError(filename, e) => write!(f, "Unable to open {}: {}", filename, e),
            Self::SerdeError(filename, e) => write!(f, "Unable to read {}: {}", filename, e),
        }
    }
}

impl Display for ExportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConfigInvalid(s) => write!(f, "invalid configuration: {}", s),
            Self::CapacityExceeded {
                variant,
                size,
                limit,
            } => write!(
                f,
                "cannot export data in this format: {} data has {} > {}",
                variant, size, limit
            ),
            Self::InvalidDuration {
                subsong,
                channel,
                position,
            } => write!(
                f,
                "zero duration interval at subsong {} channel {} position {}",
                subsong, channel, position
            ),
            Self::AlphabetOverflow(n) => write!(f, "too many distinct codes: {}", n),
            Self::ValidationMismatch {
                subsong,
                channel,
                step,
                expected,
                actual,
            } => write!(
                f,
                "validation mismatch at subsong {} channel {} step {}: {:016x} <> {:016x}",
                subsong,
                channel,
                step,
                expected.packed(),
                actual.packed()
            ),
            Self::InternalAssertion(s) => write!(f, "internal assertion: {}", s),
            Self::DeserializeError(e) => e.fmt(f),
            Self::ValueError(e) => e.fmt(f),
        }
    }
}
