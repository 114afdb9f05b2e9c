//! Degraded stem synthesis for separator timeouts
//!
//! When the sandboxed separator blows its wall-clock budget the job still
//! succeeds with a band-split approximation built directly from the raw
//! source. Output is marked by the `fallback_band_split` model name so
//! callers can flag the reduced quality.

use smx_common::Result;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::audio::dsp::{self, PEAK_TARGET};
use crate::audio::{read_audio, write_wav_24bit, AudioData};

use super::{bundle_stems_zip, input_stem};

/// Model name reported for band-split fallback output.
pub const FALLBACK_MODEL: &str = "fallback_band_split";

/// Build a degraded stem set from the raw source by spectral band splitting.
pub fn build_stem_timeout_fallback(
    input: &Path,
    output_dir: &Path,
    stems: i64,
    zip_deflate: bool,
) -> Result<(String, Vec<PathBuf>)> {
    std::fs::create_dir_all(output_dir)?;
    let prefix = input_stem(input);

    info!(input = %input.display(), stems = stems, "Building band-split stem fallback");

    let source = read_audio(input)?;

    let mut bass = dsp::band_split(&source, None, Some(180.0))?;
    let mut vocals = dsp::band_split(&source, Some(180.0), Some(4200.0))?;
    let mut drums = dsp::band_split(&source, Some(1200.0), Some(9500.0))?;
    let mut other = dsp::subtract(
        &dsp::subtract(&dsp::subtract(&source, &vocals)?, &bass)?,
        &drums,
    )?;

    dsp::peak_limit(&mut bass, PEAK_TARGET);
    dsp::peak_limit(&mut vocals, PEAK_TARGET);
    dsp::peak_limit(&mut drums, PEAK_TARGET);
    dsp::peak_limit(&mut other, PEAK_TARGET);

    let mut produced: Vec<PathBuf> = Vec::new();
    let mut emit = |name: &str, audio: &AudioData| -> Result<()> {
        let path = output_dir.join(format!("{prefix}-{name}.wav"));
        write_wav_24bit(&path, audio)?;
        produced.push(path);
        Ok(())
    };

    if stems >= 4 {
        emit("vocals", &vocals)?;
        emit("drums", &drums)?;
        emit("bass", &bass)?;
        emit("other", &other)?;
    } else {
        let mut accompaniment = dsp::subtract(&source, &vocals)?;
        dsp::peak_limit(&mut accompaniment, PEAK_TARGET);
        emit("vocals", &vocals)?;
        emit("accompaniment", &accompaniment)?;
    }

    let zip_path = bundle_stems_zip(input, output_dir, &produced, zip_deflate)?;
    produced.push(zip_path);

    Ok((FALLBACK_MODEL.to_string(), produced))
}
