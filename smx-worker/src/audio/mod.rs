//! Audio file I/O
//!
//! All reads produce planar `f32` buffers (one `Vec<f32>` per channel, equal
//! lengths) with their sample rate. Decoding goes through symphonia so any
//! container the worker accepts as a source (WAV, MP3, FLAC, AAC, OGG, M4A)
//! round-trips the same way. Canonical outputs are written as PCM 24-bit WAV.

pub mod dsp;

use smx_common::{Error, Result};
use std::path::Path;
use symphonia::core::audio::{AudioBuffer as SymphoniaBuffer, AudioBufferRef, Signal};
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::conv::FromSample;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::sample::Sample;

/// Full-scale value for 24-bit signed PCM.
const PCM24_SCALE: f32 = 8_388_607.0;

/// Decoded audio: planar f32 channels plus sample rate
#[derive(Debug, Clone)]
pub struct AudioData {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// One buffer per channel; all the same length
    pub channels: Vec<Vec<f32>>,
}

impl AudioData {
    /// All-zero buffer with the given shape.
    pub fn silent(sample_rate: u32, channel_count: usize, frames: usize) -> Self {
        Self {
            sample_rate,
            channels: vec![vec![0.0; frames]; channel_count],
        }
    }

    pub fn frames(&self) -> usize {
        self.channels.first().map(|c| c.len()).unwrap_or(0)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty() || self.frames() == 0
    }

    /// Largest absolute sample value across all channels.
    pub fn peak(&self) -> f32 {
        self.channels
            .iter()
            .flat_map(|ch| ch.iter())
            .fold(0.0f32, |acc, s| acc.max(s.abs()))
    }

    /// Mean absolute sample value across all channels (0.0 when empty).
    pub fn mean_abs(&self) -> f64 {
        let total: usize = self.channels.iter().map(|c| c.len()).sum();
        if total == 0 {
            return 0.0;
        }
        let sum: f64 = self
            .channels
            .iter()
            .flat_map(|ch| ch.iter())
            .map(|s| s.abs() as f64)
            .sum();
        sum / total as f64
    }

    /// Channels averaged down to a single mono buffer.
    pub fn to_mono(&self) -> Vec<f32> {
        let frames = self.frames();
        let channel_count = self.channel_count();
        if channel_count == 0 {
            return Vec::new();
        }
        let mut mono = vec![0.0f32; frames];
        for channel in &self.channels {
            for (i, sample) in channel.iter().enumerate() {
                mono[i] += sample;
            }
        }
        let scale = 1.0 / channel_count as f32;
        mono.iter_mut().for_each(|s| *s *= scale);
        mono
    }

    /// Copy zero-padded to the requested shape.
    pub fn padded_to(&self, channel_count: usize, frames: usize) -> Self {
        let mut channels = Vec::with_capacity(channel_count);
        for ch in 0..channel_count {
            let mut data = vec![0.0f32; frames];
            if let Some(src) = self.channels.get(ch) {
                let n = src.len().min(frames);
                data[..n].copy_from_slice(&src[..n]);
            }
            channels.push(data);
        }
        Self {
            sample_rate: self.sample_rate,
            channels,
        }
    }
}

/// Decode an audio file to planar f32 samples.
pub fn read_audio(path: &Path) -> Result<AudioData> {
    tracing::debug!(path = %path.display(), "Decoding audio file");

    let file = std::fs::File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| Error::Internal(format!("Failed to probe {}: {e}", path.display())))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| Error::Internal(format!("No audio track in {}", path.display())))?;

    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| Error::Internal(format!("Sample rate unknown in {}", path.display())))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| Error::Internal(format!("No decoder for {}: {e}", path.display())))?;

    let mut channels: Vec<Vec<f32>> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => {
                return Err(Error::Internal(format!(
                    "Error reading packet from {}: {e}",
                    path.display()
                )));
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = decoder
            .decode(&packet)
            .map_err(|e| Error::Internal(format!("Decode failed in {}: {e}", path.display())))?;
        append_planar(&decoded, &mut channels);
    }

    // Symphonia may hand back ragged tails across packets on corrupt input.
    let frames = channels.iter().map(|c| c.len()).min().unwrap_or(0);
    for channel in &mut channels {
        channel.truncate(frames);
    }

    tracing::debug!(
        path = %path.display(),
        sample_rate = sample_rate,
        channels = channels.len(),
        frames = frames,
        "Audio decode complete"
    );

    Ok(AudioData {
        sample_rate,
        channels,
    })
}

/// Write planar samples as PCM 24-bit WAV. Samples are clamped to [-1, 1].
pub fn write_wav_24bit(path: &Path, audio: &AudioData) -> Result<()> {
    if audio.channels.is_empty() {
        return Err(Error::Internal(format!(
            "refusing to write channel-less WAV: {}",
            path.display()
        )));
    }

    let spec = hound::WavSpec {
        channels: audio.channel_count() as u16,
        sample_rate: audio.sample_rate,
        bits_per_sample: 24,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec)
        .map_err(|e| Error::Internal(format!("Failed to create {}: {e}", path.display())))?;

    for frame in 0..audio.frames() {
        for channel in &audio.channels {
            let sample = channel.get(frame).copied().unwrap_or(0.0).clamp(-1.0, 1.0);
            writer
                .write_sample((sample * PCM24_SCALE) as i32)
                .map_err(|e| Error::Internal(format!("Failed to write {}: {e}", path.display())))?;
        }
    }

    writer
        .finalize()
        .map_err(|e| Error::Internal(format!("Failed to finalize {}: {e}", path.display())))?;
    Ok(())
}

/// Append one decoded packet to the planar accumulator.
fn append_planar(decoded: &AudioBufferRef, channels: &mut Vec<Vec<f32>>) {
    match decoded {
        AudioBufferRef::U8(buf) => extend_channels(buf, channels),
        AudioBufferRef::U16(buf) => extend_channels(buf, channels),
        AudioBufferRef::U24(buf) => extend_channels(buf, channels),
        AudioBufferRef::U32(buf) => extend_channels(buf, channels),
        AudioBufferRef::S8(buf) => extend_channels(buf, channels),
        AudioBufferRef::S16(buf) => extend_channels(buf, channels),
        AudioBufferRef::S24(buf) => extend_channels(buf, channels),
        AudioBufferRef::S32(buf) => extend_channels(buf, channels),
        AudioBufferRef::F32(buf) => extend_channels(buf, channels),
        AudioBufferRef::F64(buf) => extend_channels(buf, channels),
    }
}

fn extend_channels<S>(buf: &SymphoniaBuffer<S>, channels: &mut Vec<Vec<f32>>)
where
    S: Sample,
    f32: FromSample<S>,
{
    let channel_count = buf.spec().channels.count();
    if channels.is_empty() {
        channels.resize_with(channel_count, Vec::new);
    }

    for ch in 0..channel_count.min(channels.len()) {
        let src = buf.chan(ch);
        channels[ch].extend(src.iter().map(|s| f32::from_sample(*s)));
    }
}
