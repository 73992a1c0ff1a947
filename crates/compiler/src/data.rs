//! JSON data

// SPDX-FileCopyrightText: © 2023 Marcus Rowe <undisbeliever@gmail.com>
//
// SPDX-License-Identifier: MIT

use crate::driver_constants::{
    DEFAULT_BLOCK_SIZE, DEFAULT_DATA_OFFSET, DEFAULT_HUFFMAN_LEAF_CAP, DEFAULT_JUMP_INDEX_CAP,
    DEFAULT_SPAN_THRESHOLD, MAX_JUMP_INDEX_CAP,
};
use crate::errors::{DeserializeError, ExportError};
use crate::export::TiaExportType;
use crate::register_dump::RegisterWrite;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::Deserialize;

#[derive(Deserialize, Debug)]
pub struct Subsong {
    pub writes: Vec<RegisterWrite>,
}

/// Song metadata plus the captured register-write log, one entry per
/// subsong.
#[derive(Deserialize, Debug)]
pub struct ProjectFile {
    pub name: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub album: String,
    #[serde(default = "default_system")]
    pub system: String,
    #[serde(default = "default_tuning")]
    pub tuning: f64,
    #[serde(default)]
    pub instruments: u32,
    #[serde(default)]
    pub wavetables: u32,
    #[serde(default)]
    pub samples: u32,

    pub subsongs: Vec<Subsong>,
}

fn default_system() -> String {
    "Atari 2600".to_owned()
}

fn default_tuning() -> f64 {
    440.0
}

pub fn load_project_file(path: &Path) -> Result<ProjectFile, DeserializeError> {
    let file_name = path
        .file_name()
        .unwrap_or(path.as_os_str())
        .to_string_lossy()
        .to_string();

    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) => return Err(DeserializeError::OpenError(file_name, e)),
    };
    let reader = BufReader::new(file);

    match serde_json::from_reader(reader) {
        Ok(pf) => Ok(pf),
        Err(e) => Err(DeserializeError::SerdeError(file_name, e)),
    }
}

/// Export configuration, read from a flat JSON object keyed by the
/// `romout.*` option names.
#[derive(Debug, Clone, Copy)]
pub struct ExportConfig {
    pub export_type: TiaExportType,
    pub debug_output: bool,

    pub span_threshold: usize,
    pub jump_index_cap: usize,
    pub huffman_leaf_cap: usize,
    pub data_offset: usize,
    pub block_size: usize,
    pub force_full_write_on_control_change: bool,
    pub volume_adjacency: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            export_type: TiaExportType::TiaZip,
            debug_output: false,
            span_threshold: DEFAULT_SPAN_THRESHOLD,
            jump_index_cap: DEFAULT_JUMP_INDEX_CAP,
            huffman_leaf_cap: DEFAULT_HUFFMAN_LEAF_CAP,
            data_offset: DEFAULT_DATA_OFFSET,
            block_size: DEFAULT_BLOCK_SIZE,
            force_full_write_on_control_change: true,
            volume_adjacency: true,
        }
    }
}

impl ExportConfig {
    pub fn from_json(text: &str) -> Result<Self, ExportError> {
        let options: BTreeMap<String, serde_json::Value> = match serde_json::from_str(text) {
            Ok(map) => map,
            Err(e) => return Err(ExportError::ConfigInvalid(e.to_string())),
        };

        let mut config = Self::default();
        for (key, value) in &options {
            match key.as_str() {
                "romout.tiaExportType" => {
                    config.export_type = string_option(key, value)?.parse()?;
                }
                "romout.debugOutput" => config.debug_output = bool_option(key, value)?,
                "romout.spanThreshold" => config.span_threshold = usize_option(key, value)?,
                "romout.jumpIndexCap" => {
                    let cap = usize_option(key, value)?;
                    if cap == 0 || cap > MAX_JUMP_INDEX_CAP {
                        return Err(ExportError::ConfigInvalid(format!(
                            "{}: must be 1..={}",
                            key, MAX_JUMP_INDEX_CAP
                        )));
                    }
                    config.jump_index_cap = cap;
                }
                "romout.huffmanLeafCap" => {
                    let cap = usize_option(key, value)?;
                    if cap == 0 {
                        return Err(ExportError::ConfigInvalid(format!("{}: must be > 0", key)));
                    }
                    config.huffman_leaf_cap = cap;
                }
                "romout.dataOffset" => config.data_offset = usize_option(key, value)?,
                "romout.blockSize" => config.block_size = usize_option(key, value)?,
                "romout.forceFullWriteOnControlChange" => {
                    config.force_full_write_on_control_change = bool_option(key, value)?;
                }
                "romout.volumeAdjacency" => config.volume_adjacency = bool_option(key, value)?,
                _ => {
                    return Err(ExportError::ConfigInvalid(format!(
                        "unrecognized option {}",
                        key
                    )))
                }
            }
        }
        Ok(config)
    }
}

fn string_option<'a>(key: &str, value: &'a serde_json::Value) -> Result<&'a str, ExportError> {
    value
        .as_str()
        .ok_or_else(|| ExportError::ConfigInvalid(format!("{}: expected a string", key)))
}

fn bool_option(key: &str, value: &serde_json::Value) -> Result<bool, ExportError> {
    value
        .as_bool()
        .ok_or_else(|| ExportError::ConfigInvalid(format!("{}: expected a boolean", key)))
}

fn usize_option(key: &str, value: &serde_json::Value) -> Result<usize, ExportError> {
    value
        .as_u64()
        .map(|v| v as usize)
        .ok_or_else(|| ExportError::ConfigInvalid(format!("{}: expected an unsigned number", key)))
}
