//! Canonicalization of separator output
//!
//! Separator models disagree about file naming, stem coverage and channel
//! layout. This pass maps whatever was produced onto the required canonical
//! stem set `<inputStem>-<stemName>.wav` (PCM 24-bit), synthesizing missing
//! stems from vocals + accompaniment by spectral band splitting when it can.

use smx_common::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::audio::dsp::{self, PEAK_TARGET};
use crate::audio::{read_audio, write_wav_24bit};

use super::input_stem;

const VOCALS_KEYWORDS: &[&str] = &["vocals", "vocal", "vox", "voice", "lead"];
const DRUMS_KEYWORDS: &[&str] = &["drums", "drum", "percussion", "beat", "kick", "snare"];
const BASS_KEYWORDS: &[&str] = &["bass", "low", "sub"];
const OTHER_KEYWORDS: &[&str] = &["other", "music", "instrumental", "inst", "accompaniment"];
const ACCOMPANIMENT_KEYWORDS: &[&str] = &[
    "accompaniment",
    "instrumental",
    "inst",
    "music",
    "other",
    "minus_vocals",
    "no_vocals",
];

/// The ordered four-stem set.
const FOUR_STEMS: &[(&str, &[&str])] = &[
    ("vocals", VOCALS_KEYWORDS),
    ("drums", DRUMS_KEYWORDS),
    ("bass", BASS_KEYWORDS),
    ("other", OTHER_KEYWORDS),
];

/// Normalize `produced` to the canonical stem set for `stems` mode.
///
/// Returns the canonical stem paths in order (`vocals, drums, bass, other`
/// for four-stem mode; `vocals, accompaniment` otherwise).
pub fn canonicalize(
    input: &Path,
    output_dir: &Path,
    produced: &[PathBuf],
    stems: i64,
) -> Result<Vec<PathBuf>> {
    if stems >= 4 {
        canonicalize_four(input, output_dir, produced)
    } else {
        canonicalize_two(input, output_dir, produced)
    }
}

fn canonicalize_four(input: &Path, output_dir: &Path, produced: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let prefix = input_stem(input);

    // First pass: claim one produced file per stem, in stem order.
    let mut pool: Vec<&PathBuf> = produced.iter().collect();
    let mut selected: Vec<(&str, Option<PathBuf>)> = Vec::new();
    for (stem_name, keywords) in FOUR_STEMS.iter().copied() {
        let position = pool.iter().position(|p| stem_matches(p, keywords));
        let claimed = position.map(|i| pool.remove(i).clone());
        selected.push((stem_name, claimed));
    }

    let missing: Vec<String> = selected
        .iter()
        .filter(|(_, p)| p.is_none())
        .map(|(name, _)| name.to_string())
        .collect();

    if missing.is_empty() {
        let mut canonical = Vec::with_capacity(4);
        for (stem_name, path) in selected {
            let Some(source) = path else {
                return Err(Error::Internal("stem selection lost a claimed file".to_string()));
            };
            let target = output_dir.join(format!("{prefix}-{stem_name}.wav"));
            write_canonical(&source, &target)?;
            canonical.push(target);
        }
        return Ok(canonical);
    }

    // Synthesis fallback: derive drums/bass/other from an accompaniment
    // render, keep the produced vocals as-is.
    debug!(missing = ?missing, "Stems missing, attempting synthesis from vocals + accompaniment");
    let vocals_source = produced.iter().find(|p| stem_matches(p, VOCALS_KEYWORDS));
    let accompaniment_source = produced
        .iter()
        .find(|p| stem_matches(p, ACCOMPANIMENT_KEYWORDS));

    let (Some(vocals_source), Some(accompaniment_source)) = (vocals_source, accompaniment_source)
    else {
        return Err(Error::MissingStems(missing));
    };

    info!(
        vocals = %vocals_source.display(),
        accompaniment = %accompaniment_source.display(),
        "Synthesizing drums/bass/other from accompaniment"
    );

    let accompaniment = read_audio(accompaniment_source)?;
    let (bass, drums, other) = dsp::synthesize_from_accompaniment(&accompaniment)?;

    let vocals_target = output_dir.join(format!("{prefix}-vocals.wav"));
    write_canonical(vocals_source, &vocals_target)?;

    let drums_target = output_dir.join(format!("{prefix}-drums.wav"));
    write_wav_24bit(&drums_target, &drums)?;
    let bass_target = output_dir.join(format!("{prefix}-bass.wav"));
    write_wav_24bit(&bass_target, &bass)?;
    let other_target = output_dir.join(format!("{prefix}-other.wav"));
    write_wav_24bit(&other_target, &other)?;

    Ok(vec![vocals_target, drums_target, bass_target, other_target])
}

fn canonicalize_two(input: &Path, output_dir: &Path, produced: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let prefix = input_stem(input);

    let vocals_source = produced
        .iter()
        .find(|p| stem_matches(p, VOCALS_KEYWORDS))
        .ok_or_else(|| Error::MissingStems(vec!["vocals".to_string()]))?;

    let remainder: Vec<PathBuf> = produced
        .iter()
        .filter(|p| *p != vocals_source)
        .cloned()
        .collect();

    let vocals_target = output_dir.join(format!("{prefix}-vocals.wav"));
    write_canonical(vocals_source, &vocals_target)?;

    let accompaniment_target = output_dir.join(format!("{prefix}-accompaniment.wav"));
    if let Some(accompaniment_source) =
        remainder.iter().find(|p| stem_matches(p, ACCOMPANIMENT_KEYWORDS))
    {
        write_canonical(accompaniment_source, &accompaniment_target)?;
    } else if !remainder.is_empty() {
        // No keyword match: render the accompaniment as the peak-limited sum
        // of everything that is not vocals.
        info!(layers = remainder.len(), "Rendering accompaniment as sum of non-vocal layers");
        let mix = dsp::mix_accompaniment(&remainder)?;
        write_wav_24bit(&accompaniment_target, &mix)?;
    } else {
        return Err(Error::MissingStems(vec!["accompaniment".to_string()]));
    }

    Ok(vec![vocals_target, accompaniment_target])
}

/// Case-insensitive substring match of stem keywords on the file stem.
fn stem_matches(path: &Path, keywords: &[&str]) -> bool {
    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
        return false;
    };
    let lowered = stem.to_lowercase();
    keywords.iter().any(|k| lowered.contains(k))
}

/// Re-encode `source` to 24-bit PCM at `target`.
///
/// When source and target are the same file by resolved path the copy is
/// skipped (canonicalization is idempotent on already-canonical names).
fn write_canonical(source: &Path, target: &Path) -> Result<()> {
    if target.exists() {
        let same = match (std::fs::canonicalize(source), std::fs::canonicalize(target)) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        };
        if same {
            debug!(path = %target.display(), "Canonical stem already in place");
            return Ok(());
        }
    }

    let mut audio = read_audio(source)?;
    dsp::peak_limit(&mut audio, PEAK_TARGET);
    write_wav_24bit(target, &audio)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioData;
    use tempfile::tempdir;

    fn write_tone(path: &Path, freq: f32, amplitude: f32) {
        let frames = 4096;
        let samples: Vec<f32> = (0..frames)
            .map(|i| amplitude * (2.0 * std::f32::consts::PI * freq * i as f32 / 44_100.0).sin())
            .collect();
        write_wav_24bit(
            path,
            &AudioData {
                sample_rate: 44_100,
                channels: vec![samples],
            },
        )
        .unwrap();
    }

    #[test]
    fn four_stem_happy_path_maps_by_keyword() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("song.wav");
        write_tone(&input, 440.0, 0.4);

        let mut produced = Vec::new();
        for name in [
            "model_(Vocals)_out.wav",
            "model_(Drums)_out.wav",
            "model_(Bass)_out.wav",
            "model_(Other)_out.wav",
        ] {
            let path = dir.path().join(name);
            write_tone(&path, 220.0, 0.4);
            produced.push(path);
        }

        let canonical = canonicalize(&input, dir.path(), &produced, 4).unwrap();
        let names: Vec<&str> = canonical
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(
            names,
            vec!["song-vocals.wav", "song-drums.wav", "song-bass.wav", "song-other.wav"]
        );
        for path in &canonical {
            assert!(path.exists());
        }
    }

    #[test]
    fn four_stem_synthesizes_from_vocals_and_accompaniment() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("song.wav");
        write_tone(&input, 440.0, 0.4);

        let vocals = dir.path().join("song_vocals.wav");
        let accompaniment = dir.path().join("song_instrumental.wav");
        write_tone(&vocals, 440.0, 0.4);
        write_tone(&accompaniment, 100.0, 0.4);

        let canonical =
            canonicalize(&input, dir.path(), &[vocals, accompaniment], 4).unwrap();
        assert_eq!(canonical.len(), 4);
        for path in &canonical {
            assert!(path.exists());
            let audio = read_audio(path).unwrap();
            assert!(audio.peak() <= PEAK_TARGET + 1e-3);
        }
    }

    #[test]
    fn four_stem_fails_without_synthesis_inputs() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("song.wav");
        write_tone(&input, 440.0, 0.4);

        let vocals = dir.path().join("song_vocals.wav");
        write_tone(&vocals, 440.0, 0.4);

        let err = canonicalize(&input, dir.path(), &[vocals], 4).unwrap_err();
        match err {
            Error::MissingStems(missing) => {
                assert_eq!(missing, vec!["drums", "bass", "other"]);
            }
            other => panic!("expected MissingStems, got {other:?}"),
        }
    }

    #[test]
    fn two_stem_uses_keyword_accompaniment() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("song.wav");
        write_tone(&input, 440.0, 0.4);

        let vocals = dir.path().join("take_vox.wav");
        let accompaniment = dir.path().join("take_no_vocals.wav");
        write_tone(&vocals, 440.0, 0.4);
        write_tone(&accompaniment, 110.0, 0.4);

        let canonical =
            canonicalize(&input, dir.path(), &[vocals, accompaniment], 2).unwrap();
        let names: Vec<&str> = canonical
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["song-vocals.wav", "song-accompaniment.wav"]);
    }

    #[test]
    fn two_stem_sums_unlabeled_remainder() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("song.wav");
        write_tone(&input, 440.0, 0.4);

        let vocals = dir.path().join("lead_take.wav");
        let layer_a = dir.path().join("layer_a.wav");
        let layer_b = dir.path().join("layer_b.wav");
        write_tone(&vocals, 440.0, 0.4);
        write_tone(&layer_a, 110.0, 0.9);
        write_tone(&layer_b, 330.0, 0.9);

        let canonical =
            canonicalize(&input, dir.path(), &[vocals, layer_a, layer_b], 2).unwrap();
        let accompaniment = read_audio(&canonical[1]).unwrap();
        assert!(accompaniment.peak() <= PEAK_TARGET + 1e-3);
        assert!(accompaniment.peak() > 0.1);
    }

    #[test]
    fn two_stem_without_vocals_fails() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("song.wav");
        write_tone(&input, 440.0, 0.4);

        let layer = dir.path().join("layer.wav");
        write_tone(&layer, 110.0, 0.4);

        let err = canonicalize(&input, dir.path(), &[layer], 2).unwrap_err();
        assert!(matches!(err, Error::MissingStems(ref m) if m == &vec!["vocals".to_string()]));
    }

    #[test]
    fn two_stem_without_remainder_fails() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("song.wav");
        write_tone(&input, 440.0, 0.4);

        let vocals = dir.path().join("song_vocals.wav");
        write_tone(&vocals, 440.0, 0.4);

        let err = canonicalize(&input, dir.path(), &[vocals], 2).unwrap_err();
        assert!(
            matches!(err, Error::MissingStems(ref m) if m == &vec!["accompaniment".to_string()])
        );
    }

    #[test]
    fn canonicalization_is_idempotent_on_canonical_names() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("song.wav");
        write_tone(&input, 440.0, 0.4);

        let mut produced = Vec::new();
        for name in ["song-vocals.wav", "song-drums.wav", "song-bass.wav", "song-other.wav"] {
            let path = dir.path().join(name);
            write_tone(&path, 220.0, 0.4);
            produced.push(path);
        }

        let before: Vec<Vec<u8>> = produced
            .iter()
            .map(|p| std::fs::read(p).unwrap())
            .collect();

        let canonical = canonicalize(&input, dir.path(), &produced, 4).unwrap();
        assert_eq!(canonical, produced);

        // Already-canonical files were not rewritten
        for (path, original) in canonical.iter().zip(before.iter()) {
            assert_eq!(&std::fs::read(path).unwrap(), original);
        }
    }
}
