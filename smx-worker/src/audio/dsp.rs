//! DSP primitives for stem synthesis and mastering
//!
//! Band splitting works in the frequency domain: real FFT along the frame
//! axis, zero the bins outside the requested range, inverse real FFT back to
//! the original length. Combination of layers requires matching sample rates.

use realfft::num_complex::Complex;
use realfft::RealFftPlanner;
use smx_common::{Error, Result};
use std::path::PathBuf;

use super::{read_audio, AudioData};

/// Ceiling applied by [`peak_limit`].
pub const PEAK_TARGET: f32 = 0.98;

/// Scale the buffer down so its peak does not exceed `target`.
///
/// Buffers already at or below the target are left untouched.
pub fn peak_limit(audio: &mut AudioData, target: f32) {
    let peak = audio.peak();
    if peak > target && peak > 0.0 {
        let scale = target / peak;
        for channel in &mut audio.channels {
            for sample in channel.iter_mut() {
                *sample *= scale;
            }
        }
    }
}

/// Zero all frequency content below `low_hz` and (when set) above `high_hz`.
pub fn band_split(audio: &AudioData, low_hz: Option<f32>, high_hz: Option<f32>) -> Result<AudioData> {
    let frames = audio.frames();
    if frames == 0 {
        return Ok(audio.clone());
    }

    let mut planner = RealFftPlanner::<f32>::new();
    let forward = planner.plan_fft_forward(frames);
    let inverse = planner.plan_fft_inverse(frames);

    let bin_width = audio.sample_rate as f32 / frames as f32;
    let mut channels = Vec::with_capacity(audio.channel_count());

    for channel in &audio.channels {
        let mut input = channel.clone();
        let mut spectrum = forward.make_output_vec();
        forward
            .process(&mut input, &mut spectrum)
            .map_err(|e| Error::Internal(format!("FFT failed: {e}")))?;

        for (bin, value) in spectrum.iter_mut().enumerate() {
            let freq = bin as f32 * bin_width;
            let below = low_hz.map_or(false, |lo| freq < lo);
            let above = high_hz.map_or(false, |hi| freq > hi);
            if below || above {
                *value = Complex::new(0.0, 0.0);
            }
        }

        let mut output = inverse.make_output_vec();
        inverse
            .process(&mut spectrum, &mut output)
            .map_err(|e| Error::Internal(format!("Inverse FFT failed: {e}")))?;

        let scale = 1.0 / frames as f32;
        output.iter_mut().for_each(|s| *s *= scale);
        channels.push(output);
    }

    Ok(AudioData {
        sample_rate: audio.sample_rate,
        channels,
    })
}

/// Element-wise difference `a - b`, zero-padded to the larger shape.
pub fn subtract(a: &AudioData, b: &AudioData) -> Result<AudioData> {
    if a.sample_rate != b.sample_rate {
        return Err(Error::SampleRateMismatch(a.sample_rate, b.sample_rate));
    }

    let frames = a.frames().max(b.frames());
    let channel_count = a.channel_count().max(b.channel_count());
    let a = a.padded_to(channel_count, frames);
    let b = b.padded_to(channel_count, frames);

    let channels = a
        .channels
        .iter()
        .zip(b.channels.iter())
        .map(|(ca, cb)| ca.iter().zip(cb.iter()).map(|(x, y)| x - y).collect())
        .collect();

    Ok(AudioData {
        sample_rate: a.sample_rate,
        channels,
    })
}

/// Sum the layers at the given paths into one peak-limited accompaniment.
///
/// Every layer must share one sample rate; shapes are zero-padded to the
/// widest layer before summation.
pub fn mix_accompaniment(paths: &[PathBuf]) -> Result<AudioData> {
    if paths.is_empty() {
        return Err(Error::Internal("no layers to mix".to_string()));
    }

    let mut layers = Vec::with_capacity(paths.len());
    for path in paths {
        layers.push(read_audio(path)?);
    }

    let sample_rate = layers[0].sample_rate;
    for layer in &layers[1..] {
        if layer.sample_rate != sample_rate {
            return Err(Error::SampleRateMismatch(sample_rate, layer.sample_rate));
        }
    }

    let frames = layers.iter().map(|l| l.frames()).max().unwrap_or(0);
    let channel_count = layers.iter().map(|l| l.channel_count()).max().unwrap_or(0);

    let mut mix = AudioData::silent(sample_rate, channel_count, frames);
    for layer in &layers {
        let padded = layer.padded_to(channel_count, frames);
        for (dst, src) in mix.channels.iter_mut().zip(padded.channels.iter()) {
            for (d, s) in dst.iter_mut().zip(src.iter()) {
                *d += s;
            }
        }
    }

    peak_limit(&mut mix, PEAK_TARGET);
    Ok(mix)
}

/// Derive drums/bass/other from an accompaniment buffer by band splitting.
///
/// bass = low-pass <= 200 Hz, drums = band-pass 1500..9000 Hz,
/// other = accompaniment - bass - drums; each peak-limited.
pub fn synthesize_from_accompaniment(
    accompaniment: &AudioData,
) -> Result<(AudioData, AudioData, AudioData)> {
    let bass = band_split(accompaniment, None, Some(200.0))?;
    let drums = band_split(accompaniment, Some(1500.0), Some(9000.0))?;
    let mut other = subtract(&subtract(accompaniment, &bass)?, &drums)?;

    let mut bass = bass;
    let mut drums = drums;
    peak_limit(&mut bass, PEAK_TARGET);
    peak_limit(&mut drums, PEAK_TARGET);
    peak_limit(&mut other, PEAK_TARGET);

    Ok((bass, drums, other))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::write_wav_24bit;
    use tempfile::tempdir;

    fn sine(sample_rate: u32, freq: f32, frames: usize, amplitude: f32) -> Vec<f32> {
        (0..frames)
            .map(|i| {
                amplitude
                    * (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin()
            })
            .collect()
    }

    fn rms(samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }

    #[test]
    fn peak_limit_scales_down_only() {
        let mut loud = AudioData {
            sample_rate: 44_100,
            channels: vec![vec![1.5, -2.0, 0.5]],
        };
        peak_limit(&mut loud, PEAK_TARGET);
        assert!((loud.peak() - PEAK_TARGET).abs() < 1e-6);

        let mut quiet = AudioData {
            sample_rate: 44_100,
            channels: vec![vec![0.1, -0.2]],
        };
        peak_limit(&mut quiet, PEAK_TARGET);
        assert_eq!(quiet.channels[0], vec![0.1, -0.2]);
    }

    #[test]
    fn band_split_on_silence_is_silence() {
        let silence = AudioData::silent(44_100, 2, 4096);
        let band = band_split(&silence, Some(180.0), Some(4200.0)).unwrap();
        assert!(band.peak() < 1e-6);
    }

    #[test]
    fn lowpass_removes_high_frequency_tone() {
        let audio = AudioData {
            sample_rate: 44_100,
            channels: vec![sine(44_100, 5000.0, 8192, 0.8)],
        };
        let low = band_split(&audio, None, Some(200.0)).unwrap();
        assert!(rms(&low.channels[0]) < 0.01 * rms(&audio.channels[0]));
    }

    #[test]
    fn bandpass_keeps_in_band_tone() {
        let audio = AudioData {
            sample_rate: 44_100,
            channels: vec![sine(44_100, 3000.0, 8192, 0.8)],
        };
        let band = band_split(&audio, Some(1500.0), Some(9000.0)).unwrap();
        let ratio = rms(&band.channels[0]) / rms(&audio.channels[0]);
        assert!(ratio > 0.9, "in-band energy should survive, got ratio {ratio}");
    }

    #[test]
    fn band_split_preserves_length() {
        let audio = AudioData {
            sample_rate: 44_100,
            channels: vec![sine(44_100, 440.0, 4097, 0.5)],
        };
        let band = band_split(&audio, Some(100.0), None).unwrap();
        assert_eq!(band.frames(), 4097);
    }

    #[test]
    fn subtract_rejects_mismatched_rates() {
        let a = AudioData::silent(44_100, 1, 64);
        let b = AudioData::silent(48_000, 1, 64);
        assert!(matches!(
            subtract(&a, &b),
            Err(Error::SampleRateMismatch(44_100, 48_000))
        ));
    }

    #[test]
    fn mix_rejects_mismatched_rates() {
        let dir = tempdir().unwrap();
        let a_path = dir.path().join("a.wav");
        let b_path = dir.path().join("b.wav");
        write_wav_24bit(&a_path, &AudioData::silent(44_100, 1, 64)).unwrap();
        write_wav_24bit(&b_path, &AudioData::silent(48_000, 1, 64)).unwrap();

        assert!(matches!(
            mix_accompaniment(&[a_path, b_path]),
            Err(Error::SampleRateMismatch(_, _))
        ));
    }

    #[test]
    fn mix_pads_and_limits() {
        let dir = tempdir().unwrap();
        let a_path = dir.path().join("a.wav");
        let b_path = dir.path().join("b.wav");

        let a = AudioData {
            sample_rate: 44_100,
            channels: vec![vec![0.9; 128]],
        };
        let b = AudioData {
            sample_rate: 44_100,
            channels: vec![vec![0.9; 64], vec![0.9; 64]],
        };
        write_wav_24bit(&a_path, &a).unwrap();
        write_wav_24bit(&b_path, &b).unwrap();

        let mix = mix_accompaniment(&[a_path, b_path]).unwrap();
        assert_eq!(mix.channel_count(), 2);
        assert_eq!(mix.frames(), 128);
        assert!(mix.peak() <= PEAK_TARGET + 1e-4);
    }

    #[test]
    fn synthesis_on_silence_yields_silence() {
        let silence = AudioData::silent(44_100, 1, 4096);
        let (bass, drums, other) = synthesize_from_accompaniment(&silence).unwrap();
        assert!(bass.peak() < 1e-6);
        assert!(drums.peak() < 1e-6);
        assert!(other.peak() < 1e-6);
    }

    #[test]
    fn synthesis_band_assignment() {
        // 100 Hz belongs to bass, 3 kHz to drums
        let sample_rate = 44_100;
        let frames = 8192;
        let mut acc = AudioData {
            sample_rate,
            channels: vec![sine(sample_rate, 100.0, frames, 0.4)],
        };
        for (i, s) in sine(sample_rate, 3000.0, frames, 0.4).iter().enumerate() {
            acc.channels[0][i] += s;
        }

        let (bass, drums, _other) = synthesize_from_accompaniment(&acc).unwrap();
        assert!(rms(&bass.channels[0]) > 0.1);
        assert!(rms(&drums.channels[0]) > 0.1);
    }
}
