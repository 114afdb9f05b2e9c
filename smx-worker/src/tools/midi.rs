//! Monophonic MIDI extraction
//!
//! Frame-level autocorrelation pitch tracking over the mono mixdown; runs of
//! frames agreeing on one MIDI pitch become note events. Output contract:
//! `extracted.mid` (standard MIDI file, format 0) plus `notes.json` with the
//! note event list.

use smx_common::{Error, Result};
use std::path::{Path, PathBuf};

use crate::audio::read_audio;
use crate::tools::params::param_f64;

const FRAME: usize = 2048;
const HOP: usize = 512;

/// Detectable pitch range in Hz.
const MIN_FREQ: f64 = 50.0;
const MAX_FREQ: f64 = 1000.0;

/// Minimum voiced run length, in frames, to count as a note.
const MIN_NOTE_FRAMES: usize = 3;

/// MIDI ticks per quarter note at the fixed 120 BPM tempo.
const TICKS_PER_QUARTER: u32 = 480;
const MICROS_PER_QUARTER: u32 = 500_000;

/// One detected note
#[derive(Debug, Clone, serde::Serialize)]
pub struct NoteEvent {
    pub start: f64,
    pub end: f64,
    pub pitch: u8,
    pub confidence: f64,
}

pub fn run(
    input: &Path,
    output_dir: &Path,
    params: &serde_json::Map<String, serde_json::Value>,
) -> Result<(String, Vec<PathBuf>)> {
    std::fs::create_dir_all(output_dir)?;

    let sensitivity = param_f64(params, "sensitivity", 0.5).clamp(0.0, 1.0);

    let audio = read_audio(input)?;
    let notes = detect_notes(&audio.to_mono(), audio.sample_rate, sensitivity);

    let midi_path = output_dir.join("extracted.mid");
    std::fs::write(&midi_path, render_midi(&notes))?;

    let notes_path = output_dir.join("notes.json");
    let payload = serde_json::json!({
        "sensitivity": sensitivity,
        "noteCount": notes.len(),
        "noteEvents": notes,
    });
    let rendered = serde_json::to_string_pretty(&payload)
        .map_err(|e| Error::Internal(format!("notes report: {e}")))?;
    std::fs::write(&notes_path, rendered)?;

    Ok(("basic_pitch".to_string(), vec![midi_path, notes_path]))
}

/// Frame-wise pitch track collapsed into note events.
fn detect_notes(mono: &[f32], sample_rate: u32, sensitivity: f64) -> Vec<NoteEvent> {
    // Higher sensitivity lowers the voicing bar
    let threshold = (0.9 - 0.5 * sensitivity).clamp(0.1, 0.95);

    let mut frames: Vec<Option<(u8, f64)>> = Vec::new();
    let mut offset = 0;
    while offset + FRAME <= mono.len() {
        frames.push(detect_pitch(&mono[offset..offset + FRAME], sample_rate, threshold));
        offset += HOP;
    }

    let frame_seconds = HOP as f64 / sample_rate as f64;
    let mut notes = Vec::new();
    let mut run_start = 0usize;
    let mut run_pitch: Option<u8> = None;
    let mut run_confidences: Vec<f64> = Vec::new();

    let mut flush = |start: usize, end: usize, pitch: Option<u8>, confidences: &mut Vec<f64>| {
        if let Some(pitch) = pitch {
            if end - start >= MIN_NOTE_FRAMES {
                let confidence =
                    confidences.iter().sum::<f64>() / confidences.len().max(1) as f64;
                notes.push(NoteEvent {
                    start: start as f64 * frame_seconds,
                    end: end as f64 * frame_seconds,
                    pitch,
                    confidence,
                });
            }
        }
        confidences.clear();
    };

    for (i, frame) in frames.iter().enumerate() {
        let pitch = frame.map(|(p, _)| p);
        if pitch != run_pitch {
            flush(run_start, i, run_pitch, &mut run_confidences);
            run_start = i;
            run_pitch = pitch;
        }
        if let Some((_, confidence)) = frame {
            run_confidences.push(*confidence);
        }
    }
    flush(run_start, frames.len(), run_pitch, &mut run_confidences);

    notes
}

/// Autocorrelation pitch for one frame; `None` when unvoiced.
fn detect_pitch(frame: &[f32], sample_rate: u32, threshold: f64) -> Option<(u8, f64)> {
    let energy: f64 = frame.iter().map(|s| (*s as f64) * (*s as f64)).sum();
    if energy < 1e-6 {
        return None;
    }

    let lag_min = (sample_rate as f64 / MAX_FREQ).floor() as usize;
    let lag_max = (sample_rate as f64 / MIN_FREQ).ceil() as usize;
    if lag_max >= frame.len() {
        return None;
    }

    let r0: f64 = frame.iter().map(|s| (*s as f64) * (*s as f64)).sum();
    let mut best_lag = 0usize;
    let mut best_r = 0.0f64;
    for lag in lag_min..=lag_max {
        let mut r = 0.0f64;
        for i in 0..frame.len() - lag {
            r += frame[i] as f64 * frame[i + lag] as f64;
        }
        if r > best_r {
            best_r = r;
            best_lag = lag;
        }
    }

    if best_lag == 0 {
        return None;
    }
    let confidence = (best_r / r0.max(1e-12)).clamp(0.0, 1.0);
    if confidence < threshold {
        return None;
    }

    let freq = sample_rate as f64 / best_lag as f64;
    let midi = (69.0 + 12.0 * (freq / 440.0).log2()).round();
    if !(0.0..=127.0).contains(&midi) {
        return None;
    }
    Some((midi as u8, confidence))
}

/// Render note events as a format-0 standard MIDI file.
fn render_midi(notes: &[NoteEvent]) -> Vec<u8> {
    // (tick, is_note_on, pitch), note-offs first at equal ticks
    let mut events: Vec<(u32, bool, u8)> = Vec::new();
    for note in notes {
        events.push((seconds_to_ticks(note.start), true, note.pitch));
        events.push((seconds_to_ticks(note.end), false, note.pitch));
    }
    events.sort_by_key(|(tick, is_on, _)| (*tick, *is_on));

    let mut track: Vec<u8> = Vec::new();
    // Tempo meta: 120 BPM
    track.extend_from_slice(&[0x00, 0xFF, 0x51, 0x03]);
    track.extend_from_slice(&MICROS_PER_QUARTER.to_be_bytes()[1..]);

    let mut cursor = 0u32;
    for (tick, is_on, pitch) in events {
        write_varlen(&mut track, tick.saturating_sub(cursor));
        cursor = tick;
        if is_on {
            track.extend_from_slice(&[0x90, pitch, 0x64]);
        } else {
            track.extend_from_slice(&[0x80, pitch, 0x00]);
        }
    }
    // End of track
    track.extend_from_slice(&[0x00, 0xFF, 0x2F, 0x00]);

    let mut file: Vec<u8> = Vec::new();
    file.extend_from_slice(b"MThd");
    file.extend_from_slice(&6u32.to_be_bytes());
    file.extend_from_slice(&0u16.to_be_bytes()); // format 0
    file.extend_from_slice(&1u16.to_be_bytes()); // one track
    file.extend_from_slice(&(TICKS_PER_QUARTER as u16).to_be_bytes());
    file.extend_from_slice(b"MTrk");
    file.extend_from_slice(&(track.len() as u32).to_be_bytes());
    file.extend_from_slice(&track);
    file
}

fn seconds_to_ticks(seconds: f64) -> u32 {
    let ticks_per_second = TICKS_PER_QUARTER as f64 * 1_000_000.0 / MICROS_PER_QUARTER as f64;
    (seconds * ticks_per_second).round() as u32
}

/// MIDI variable-length quantity encoding.
fn write_varlen(out: &mut Vec<u8>, mut value: u32) {
    let mut buffer = [0u8; 4];
    let mut count = 0;
    loop {
        buffer[count] = (value & 0x7F) as u8;
        value >>= 7;
        count += 1;
        if value == 0 {
            break;
        }
    }
    for i in (0..count).rev() {
        let mut byte = buffer[i];
        if i > 0 {
            byte |= 0x80;
        }
        out.push(byte);
    }
}
