//! Key and tempo analysis
//!
//! Tempo comes from autocorrelation of the onset energy flux; the key from
//! an FFT chroma profile correlated against Krumhansl major/minor templates.
//! Output contract: `key-bpm.json` with `{key, strength, bpm,
//! includeChordHints}`.

use realfft::RealFftPlanner;
use smx_common::{Error, Result};
use std::path::{Path, PathBuf};

use crate::audio::read_audio;
use crate::tools::params::param_bool;

const NOTE_NAMES: &[&str] = &["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];

/// Krumhansl-Kessler key profiles.
const MAJOR_PROFILE: [f32; 12] = [
    6.35, 2.23, 3.48, 2.33, 4.38, 4.09, 2.52, 5.19, 2.39, 3.66, 2.29, 2.88,
];
const MINOR_PROFILE: [f32; 12] = [
    6.33, 2.68, 3.52, 5.38, 2.60, 3.53, 2.54, 4.75, 3.98, 2.69, 3.34, 3.17,
];

const ONSET_FRAME: usize = 1024;
const ONSET_HOP: usize = 512;
const CHROMA_FRAME: usize = 4096;
const CHROMA_HOP: usize = 2048;

pub fn run(
    input: &Path,
    output_dir: &Path,
    params: &serde_json::Map<String, serde_json::Value>,
) -> Result<(String, Vec<PathBuf>)> {
    std::fs::create_dir_all(output_dir)?;

    let audio = read_audio(input)?;
    let mono = audio.to_mono();

    let bpm = estimate_bpm(&mono, audio.sample_rate);
    let (key, strength) = estimate_key(&mono, audio.sample_rate)?;

    let result = serde_json::json!({
        "key": key,
        "strength": strength,
        "bpm": bpm,
        "includeChordHints": param_bool(params, "includeChordHints", true),
    });

    let out_path = output_dir.join("key-bpm.json");
    let rendered = serde_json::to_string_pretty(&result)
        .map_err(|e| Error::Internal(format!("key-bpm report: {e}")))?;
    std::fs::write(&out_path, rendered)?;

    Ok(("essentia".to_string(), vec![out_path]))
}

/// Tempo from autocorrelation of the half-wave-rectified energy flux.
///
/// Searches 60..=200 BPM; returns 0.0 when the signal carries no onsets.
fn estimate_bpm(mono: &[f32], sample_rate: u32) -> f64 {
    if mono.len() < ONSET_FRAME * 4 {
        return 0.0;
    }

    let mut energies = Vec::new();
    let mut offset = 0;
    while offset + ONSET_FRAME <= mono.len() {
        let frame = &mono[offset..offset + ONSET_FRAME];
        let energy: f32 = frame.iter().map(|s| s * s).sum::<f32>() / ONSET_FRAME as f32;
        energies.push(energy);
        offset += ONSET_HOP;
    }

    let flux: Vec<f32> = energies
        .windows(2)
        .map(|w| (w[1] - w[0]).max(0.0))
        .collect();
    if flux.iter().all(|f| *f < 1e-10) {
        return 0.0;
    }

    let frame_rate = sample_rate as f64 / ONSET_HOP as f64;
    let lag_min = ((60.0 * frame_rate) / 200.0).floor().max(1.0) as usize;
    let lag_max = ((60.0 * frame_rate) / 60.0).ceil() as usize;
    if flux.len() <= lag_max {
        return 0.0;
    }

    let mut best_lag = 0usize;
    let mut best_score = 0.0f64;
    for lag in lag_min..=lag_max {
        let mut score = 0.0f64;
        for i in 0..flux.len() - lag {
            score += flux[i] as f64 * flux[i + lag] as f64;
        }
        if score > best_score {
            best_score = score;
            best_lag = lag;
        }
    }

    if best_lag == 0 || best_score <= 0.0 {
        return 0.0;
    }
    60.0 * frame_rate / best_lag as f64
}

/// Key from chroma correlation against the major/minor profiles.
fn estimate_key(mono: &[f32], sample_rate: u32) -> Result<(String, f64)> {
    let chroma = accumulate_chroma(mono, sample_rate)?;
    if chroma.iter().all(|c| *c <= 0.0) {
        return Ok(("C major".to_string(), 0.0));
    }

    let mut best: (usize, &str, f64) = (0, "major", f64::MIN);
    for tonic in 0..12 {
        for (mode, profile) in [("major", &MAJOR_PROFILE), ("minor", &MINOR_PROFILE)] {
            let mut rotated = [0.0f32; 12];
            for pc in 0..12 {
                rotated[(pc + tonic) % 12] = profile[pc];
            }
            let corr = correlation(&chroma, &rotated);
            if corr > best.2 {
                best = (tonic, mode, corr);
            }
        }
    }

    let key = format!("{} {}", NOTE_NAMES[best.0], best.1);
    Ok((key, best.2.clamp(0.0, 1.0)))
}

/// Magnitude-weighted pitch-class histogram over 55..5000 Hz.
fn accumulate_chroma(mono: &[f32], sample_rate: u32) -> Result<[f32; 12]> {
    let mut chroma = [0.0f32; 12];
    if mono.len() < CHROMA_FRAME {
        return Ok(chroma);
    }

    let mut planner = RealFftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(CHROMA_FRAME);
    let bin_width = sample_rate as f32 / CHROMA_FRAME as f32;

    let mut offset = 0;
    while offset + CHROMA_FRAME <= mono.len() {
        let mut frame: Vec<f32> = mono[offset..offset + CHROMA_FRAME]
            .iter()
            .enumerate()
            .map(|(i, s)| {
                // Hann window
                let w = 0.5
                    - 0.5
                        * (2.0 * std::f32::consts::PI * i as f32 / (CHROMA_FRAME - 1) as f32)
                            .cos();
                s * w
            })
            .collect();

        let mut spectrum = fft.make_output_vec();
        fft.process(&mut frame, &mut spectrum)
            .map_err(|e| Error::Internal(format!("chroma FFT failed: {e}")))?;

        for (bin, value) in spectrum.iter().enumerate() {
            let freq = bin as f32 * bin_width;
            if !(55.0..=5000.0).contains(&freq) {
                continue;
            }
            let midi = 69.0 + 12.0 * (freq / 440.0).log2();
            let pitch_class = ((midi.round() as i32 % 12) + 12) % 12;
            chroma[pitch_class as usize] += value.norm();
        }

        offset += CHROMA_HOP;
    }

    Ok(chroma)
}

/// Pearson correlation of two 12-bin vectors.
fn correlation(a: &[f32; 12], b: &[f32; 12]) -> f64 {
    let mean_a: f64 = a.iter().map(|v| *v as f64).sum::<f64>() / 12.0;
    let mean_b: f64 = b.iter().map(|v| *v as f64).sum::<f64>() / 12.0;

    let mut num = 0.0f64;
    let mut den_a = 0.0f64;
    let mut den_b = 0.0f64;
    for i in 0..12 {
        let da = a[i] as f64 - mean_a;
        let db = b[i] as f64 - mean_b;
        num += da * db;
        den_a += da * da;
        den_b += db * db;
    }

    let denominator = (den_a * den_b).sqrt();
    if denominator < 1e-12 {
        return 0.0;
    }
    num / denominator
}
