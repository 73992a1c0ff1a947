//! ROM export driver: variant dispatch and artifact assembly

// SPDX-FileCopyrightText: © 2023 Marcus Rowe <undisbeliever@gmail.com>
//
// SPDX-License-Identifier: MIT

mod basic;
mod fseq;
mod raw;
mod tiacomp;
mod tiazip;

use crate::data::{ExportConfig, ProjectFile};
use crate::errors::ExportError;
use crate::title_graphics::write_text_graphics;

use std::fmt::Write;
use std::str::FromStr;

pub const TRACK_DATA_NAME: &str = "Track_data.asm";
pub const TRACK_META_NAME: &str = "Track_meta.asm";
pub const REGISTER_DUMP_NAME: &str = "RegisterDump.txt";

const MAX_TITLE_LEN: usize = 26;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TiaExportType {
    /// raw data export - no driver support
    Raw,
    /// simple 2 channel sound driver
    Basic,
    /// simple 2 channel sound driver with duration
    BasicRle,
    /// TIAComp compact delta encoding
    TiaComp,
    /// row sequence patterns (deprecated)
    FSeq,
    /// TIAZip LZ-based compression
    TiaZip,
}

impl FromStr for TiaExportType {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RAW" => Ok(Self::Raw),
            "BASIC" => Ok(Self::Basic),
            "BASIC_RLE" => Ok(Self::BasicRle),
            "TIACOMP" => Ok(Self::TiaComp),
            "FSEQ" => Ok(Self::FSeq),
            "TIAZIP" => Ok(Self::TiaZip),
            _ => Err(ExportError::ConfigInvalid(format!(
                "unknown export type {}",
                s
            ))),
        }
    }
}

/// One named output artifact.
pub struct ExportOutput {
    pub name: String,
    pub data: Vec<u8>,
}

impl ExportOutput {
    pub(crate) fn text(name: impl Into<String>, contents: String) -> Self {
        Self {
            name: name.into(),
            data: contents.into_bytes(),
        }
    }

    pub(crate) fn binary(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

/// Run the configured export. Returns the artifact list, or a single typed
/// failure with no artifacts at all.
pub fn export_project(
    project: &ProjectFile,
    config: &ExportConfig,
) -> Result<Vec<ExportOutput>, ExportError> {
    let mut ret = Vec::new();

    if config.debug_output {
        write_register_dump(project, &mut ret);
    }

    match config.export_type {
        TiaExportType::Raw => raw::write_track_data(project, true, &mut ret)?,
        TiaExportType::Basic => basic::write_track_data(project, false, &mut ret)?,
        TiaExportType::BasicRle => basic::write_track_data(project, true, &mut ret)?,
        TiaExportType::TiaComp => tiacomp::write_track_data(project, &mut ret)?,
        TiaExportType::FSeq => fseq::write_track_data(project, &mut ret)?,
        TiaExportType::TiaZip => tiazip::write_track_data(project, config, &mut ret)?,
    }

    write_track_meta(project, &mut ret);

    Ok(ret)
}

#[rustfmt::skip::macros(writeln)]
fn write_track_meta(project: &ProjectFile, ret: &mut Vec<ExportOutput>) {
    log::debug!("writing track title graphics");

    let mut out = String::with_capacity(2048);
    let _ = writeln!(out, "; Name: {}", project.name);
    let _ = writeln!(out, "; Author: {}", project.author);
    let _ = writeln!(out, "; Album: {}", project.album);
    let _ = writeln!(out, "; System: {}", project.system);
    let _ = writeln!(out, "; Tuning: {}", project.tuning);
    let _ = writeln!(out, "; Instruments: {}", project.instruments);
    let _ = writeln!(out, "; Wavetables: {}", project.wavetables);
    let _ = writeln!(out, "; Samples: {}", project.samples);
    out.push('\n');

    let mut title = if project.name.is_empty() {
        "tiazip".to_owned()
    } else {
        format!("{} by {}", project.name, project.author)
    };
    if title.chars().count() > MAX_TITLE_LEN {
        title = title.chars().take(MAX_TITLE_LEN - 3).collect();
        title.push_str("...");
    }
    write_text_graphics(&mut out, &title);
    out.push('\n');

    ret.push(ExportOutput::text(TRACK_META_NAME, out));
}

// Human readable dump of every captured register write.
#[rustfmt::skip::macros(writeln)]
fn write_register_dump(project: &ProjectFile, ret: &mut Vec<ExportOutput>) {
    let mut out = String::with_capacity(4096);
    let _ = writeln!(out, "; Song: {}", project.name);
    let _ = writeln!(out, "; Author: {}", project.author);

    for (subsong, ss) in project.subsongs.iter().enumerate() {
        let mut max_frames = 0;

        let _ = writeln!(out, "\n; Song {}", subsong);

        for (index, write) in ss.writes.iter().enumerate() {
            let (frames, remainder) = write.frame();
            if frames > max_frames {
                max_frames = frames;
            }

            let _ = writeln!(
                out,
                "; {} T{}.{} F{}.{}: SS{} ORD{} ROW{} SYS{}> {} = {}",
                index,
                write.seconds,
                write.ticks,
                frames,
                remainder,
                write.subsong,
                write.order,
                write.row,
                write.system_index,
                write.addr,
                write.value
            );
        }

        out.push('\n');
        let _ = writeln!(out, "; Writes: {}", ss.writes.len());
        let _ = writeln!(out, "; Frames: {}", max_frames);
        out.push('\n');
    }

    ret.push(ExportOutput::text(REGISTER_DUMP_NAME, out));
}

/// Write a run of bytes as `byte $..` directives, 16 per line.
pub(crate) fn write_byte_rows(out: &mut String, bytes: &[u8]) {
    for (i, b) in bytes.iter().enumerate() {
        if i % 16 == 0 {
            let _ = write!(out, "\n    byte ${:02x}", b);
        } else {
            let _ = write!(out, ", ${:02x}", b);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Subsong;

    fn project() -> ProjectFile {
        ProjectFile {
            name: "Test Song".to_owned(),
            author: "tester".to_owned(),
            album: String::new(),
            system: "Atari 2600".to_owned(),
            tuning: 440.0,
            instruments: 1,
            wavetables: 0,
            samples: 0,
            subsongs: vec![Subsong { writes: Vec::new() }],
        }
    }

    #[test]
    fn meta_artifact_carries_header_and_title() {
        let mut ret = Vec::new();
        write_track_meta(&project(), &mut ret);
        let text = String::from_utf8(ret.pop().unwrap().data).unwrap();

        assert!(text.contains("; Name: Test Song"));
        assert!(text.contains("; Author: tester"));
        assert!(text.contains("TITLE_GRAPHICS_0"));
        assert!(text.contains("TITLE_LENGTH"));
    }

    #[test]
    fn long_titles_are_truncated() {
        let mut p = project();
        p.name = "An Extremely Long Song Name Indeed".to_owned();
        let mut ret = Vec::new();
        write_track_meta(&p, &mut ret);
        let text = String::from_utf8(ret.pop().unwrap().data).unwrap();
        // 23 characters plus "..." is 13 glyph pairs, then the end marker
        assert!(text.contains("TITLE_LENGTH = 14"), "{}", text);
    }

    #[test]
    fn export_type_parsing() {
        assert_eq!("RAW".parse::<TiaExportType>().unwrap(), TiaExportType::Raw);
        assert_eq!(
            "TIAZIP".parse::<TiaExportType>().unwrap(),
            TiaExportType::TiaZip
        );
        assert!("tiazip".parse::<TiaExportType>().is_err());
    }

    #[test]
    fn byte_rows_wrap_at_sixteen() {
        let mut out = String::new();
        write_byte_rows(&mut out, &[0xab; 20]);
        assert_eq!(out.matches("\n    byte ").count(), 2);
        assert!(out.contains("$ab"));
    }
}
