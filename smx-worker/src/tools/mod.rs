//! Tool dispatch
//!
//! One handler per tool family. Handlers are synchronous (DSP and
//! subprocess work); the job engine runs them on the blocking pool and the
//! sandbox child calls them directly. Every handler creates its output
//! directory and returns the engine name actually used plus the produced
//! file paths.

pub mod key_bpm;
pub mod loudness;
pub mod mastering;
pub mod midi;

use smx_common::{Result, ToolType};
use std::path::{Path, PathBuf};

use crate::config::WorkerConfig;
use crate::stems;

/// Dispatch `tool` over `input`, writing artifacts under `output_dir`.
pub fn run(
    config: &WorkerConfig,
    tool: ToolType,
    input: &Path,
    output_dir: &Path,
    params: &serde_json::Map<String, serde_json::Value>,
) -> Result<(String, Vec<PathBuf>)> {
    std::fs::create_dir_all(output_dir)?;

    match tool {
        ToolType::StemIsolation => stems::run_stem_isolation(config, input, output_dir, params),
        ToolType::Mastering => mastering::run(config, input, output_dir, params),
        ToolType::KeyBpm => key_bpm::run(input, output_dir, params),
        ToolType::LoudnessReport => loudness::run(input, output_dir, params),
        ToolType::MidiExtract => midi::run(input, output_dir, params),
    }
}

/// Loosely-typed accessors over the job's open `params` mapping.
pub mod params {
    use serde_json::{Map, Value};

    pub fn param_i64(params: &Map<String, Value>, key: &str, default: i64) -> i64 {
        params.get(key).and_then(Value::as_i64).unwrap_or(default)
    }

    pub fn param_f64(params: &Map<String, Value>, key: &str, default: f64) -> f64 {
        params.get(key).and_then(Value::as_f64).unwrap_or(default)
    }

    pub fn param_bool(params: &Map<String, Value>, key: &str, default: bool) -> bool {
        params.get(key).and_then(Value::as_bool).unwrap_or(default)
    }

    pub fn param_str(params: &Map<String, Value>, key: &str, default: &str) -> String {
        params
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or(default)
            .to_string()
    }

}
