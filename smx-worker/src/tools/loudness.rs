//! Loudness reporting
//!
//! Integrated loudness follows the BS.1770 recipe: K-weighting (high shelf
//! + high pass), 400 ms blocks with 75% overlap, absolute then relative
//! gating. True peak and dynamic range use the sample-domain statistics the
//! report contract asks for.

use smx_common::{Error, Result};
use std::path::{Path, PathBuf};

use crate::audio::read_audio;
use crate::tools::params::param_f64;

/// Gating block length and step (seconds).
const BLOCK_SECONDS: f64 = 0.4;
const STEP_SECONDS: f64 = 0.1;

/// Absolute gate in LUFS.
const ABSOLUTE_GATE: f64 = -70.0;

/// Reported floor when no block survives gating (silence).
const SILENCE_LUFS: f64 = -100.0;

pub fn run(
    input: &Path,
    output_dir: &Path,
    params: &serde_json::Map<String, serde_json::Value>,
) -> Result<(String, Vec<PathBuf>)> {
    std::fs::create_dir_all(output_dir)?;

    let audio = read_audio(input)?;
    let mono = audio.to_mono();

    let integrated_lufs = integrated_loudness(&mono, audio.sample_rate);

    let peak = mono.iter().fold(0.0f64, |acc, s| acc.max(s.abs() as f64));
    let true_peak_dbtp = 20.0 * peak.max(1e-8).log10();

    let mut magnitudes: Vec<f64> = mono.iter().map(|s| s.abs() as f64).collect();
    magnitudes.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let p95 = percentile(&magnitudes, 95.0);
    let p10 = percentile(&magnitudes, 10.0);
    let dynamic_range = 20.0 * (p95.max(1e-8) / p10.max(1e-8)).log10();

    let clipping_warnings = mono.iter().filter(|s| s.abs() >= 0.999).count();

    let result = serde_json::json!({
        "integratedLufs": integrated_lufs,
        "truePeakDbtp": true_peak_dbtp,
        "dynamicRange": dynamic_range,
        "targetLufs": param_f64(params, "targetLufs", -14.0),
        "clippingWarnings": clipping_warnings,
    });

    let out_path = output_dir.join("loudness-report.json");
    let rendered = serde_json::to_string_pretty(&result)
        .map_err(|e| Error::Internal(format!("loudness report: {e}")))?;
    std::fs::write(&out_path, rendered)?;

    Ok(("pyloudnorm".to_string(), vec![out_path]))
}

/// Gated integrated loudness in LUFS.
fn integrated_loudness(mono: &[f32], sample_rate: u32) -> f64 {
    let block = (BLOCK_SECONDS * sample_rate as f64) as usize;
    let step = (STEP_SECONDS * sample_rate as f64) as usize;
    if mono.len() < block || block == 0 || step == 0 {
        return SILENCE_LUFS;
    }

    let weighted = k_weight(mono, sample_rate);

    // Mean-square energy per 400 ms block, 75% overlap
    let mut block_energy: Vec<f64> = Vec::new();
    let mut offset = 0;
    while offset + block <= weighted.len() {
        let z: f64 = weighted[offset..offset + block]
            .iter()
            .map(|s| (*s as f64) * (*s as f64))
            .sum::<f64>()
            / block as f64;
        block_energy.push(z);
        offset += step;
    }

    let loudness = |z: f64| -0.691 + 10.0 * z.max(1e-12).log10();

    // Absolute gate
    let above_absolute: Vec<f64> = block_energy
        .iter()
        .copied()
        .filter(|z| loudness(*z) > ABSOLUTE_GATE)
        .collect();
    if above_absolute.is_empty() {
        return SILENCE_LUFS;
    }

    // Relative gate at -10 LU below the absolute-gated mean
    let mean_energy = above_absolute.iter().sum::<f64>() / above_absolute.len() as f64;
    let relative_gate = loudness(mean_energy) - 10.0;

    let gated: Vec<f64> = above_absolute
        .into_iter()
        .filter(|z| loudness(*z) > relative_gate)
        .collect();
    if gated.is_empty() {
        return SILENCE_LUFS;
    }

    loudness(gated.iter().sum::<f64>() / gated.len() as f64)
}

/// K-weighting: stage-1 high shelf followed by stage-2 high pass.
fn k_weight(samples: &[f32], sample_rate: u32) -> Vec<f32> {
    let shelf = Biquad::high_shelf(sample_rate as f64, 1681.974450955533, 0.7071752369554196, 3.99984385397);
    let highpass = Biquad::high_pass(sample_rate as f64, 38.13547087602444, 0.5003270373238773);
    let shelved = shelf.apply(samples);
    highpass.apply(&shelved)
}

/// Direct-form-I biquad filter
struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl Biquad {
    fn high_shelf(fs: f64, f0: f64, q: f64, gain_db: f64) -> Self {
        let a = 10.0f64.powf(gain_db / 40.0);
        let w0 = 2.0 * std::f64::consts::PI * f0 / fs;
        let alpha = w0.sin() / (2.0 * q);
        let cos_w0 = w0.cos();
        let sqrt_a = a.sqrt();

        let b0 = a * ((a + 1.0) + (a - 1.0) * cos_w0 + 2.0 * sqrt_a * alpha);
        let b1 = -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_w0);
        let b2 = a * ((a + 1.0) + (a - 1.0) * cos_w0 - 2.0 * sqrt_a * alpha);
        let a0 = (a + 1.0) - (a - 1.0) * cos_w0 + 2.0 * sqrt_a * alpha;
        let a1 = 2.0 * ((a - 1.0) - (a + 1.0) * cos_w0);
        let a2 = (a + 1.0) - (a - 1.0) * cos_w0 - 2.0 * sqrt_a * alpha;

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }

    fn high_pass(fs: f64, f0: f64, q: f64) -> Self {
        let w0 = 2.0 * std::f64::consts::PI * f0 / fs;
        let alpha = w0.sin() / (2.0 * q);
        let cos_w0 = w0.cos();

        let b0 = (1.0 + cos_w0) / 2.0;
        let b1 = -(1.0 + cos_w0);
        let b2 = (1.0 + cos_w0) / 2.0;
        let a0 = 1.0 + alpha;
        let a1 = -2.0 * cos_w0;
        let a2 = 1.0 - alpha;

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }

    fn apply(&self, samples: &[f32]) -> Vec<f32> {
        let mut out = Vec::with_capacity(samples.len());
        let (mut x1, mut x2, mut y1, mut y2) = (0.0f64, 0.0f64, 0.0f64, 0.0f64);
        for &sample in samples {
            let x0 = sample as f64;
            let y0 = self.b0 * x0 + self.b1 * x1 + self.b2 * x2 - self.a1 * y1 - self.a2 * y2;
            x2 = x1;
            x1 = x0;
            y2 = y1;
            y1 = y0;
            out.push(y0 as f32);
        }
        out
    }
}

/// Linear-interpolated percentile over a pre-sorted slice.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (p / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        return sorted[lower];
    }
    let weight = rank - lower as f64;
    sorted[lower] * (1.0 - weight) + sorted[upper] * weight
}
