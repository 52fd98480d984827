//! Writing podcast output to disk.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::assembler::{PodcastAsset, SegmentTiming};
use crate::error::PipelineError;
use crate::script::{Turn, render_script};
use crate::synthesizer::AudioSegment;

const MAX_TITLE_CHARS: usize = 50;

/// Timing sidecar written next to the audio.
#[derive(Serialize)]
struct AssetMetadata<'a> {
    sample_rate: u32,
    channels: u16,
    total_duration_seconds: f64,
    segments: &'a [SegmentTiming],
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == ' ' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Generate filename for podcast output.
pub fn generate_output_filename(title: &str) -> String {
    let sanitized = sanitize(title);
    let truncated: String = sanitized.chars().take(MAX_TITLE_CHARS).collect();
    let truncated = truncated.trim();

    if truncated.is_empty() {
        "KnowCast.wav".to_string()
    } else {
        format!("KnowCast - {}.wav", truncated)
    }
}

/// File name for one segment written on its own.
pub fn segment_filename(segment: &AudioSegment) -> String {
    let speaker = sanitize(&segment.speaker).replace(' ', "_");
    format!("segment_{:03}_{}.wav", segment.order, speaker)
}

/// `path` with its extension replaced, for transcript and metadata sidecars.
pub fn companion_path(path: &Path, extension: &str) -> PathBuf {
    path.with_extension(extension)
}

pub fn write_asset(path: &Path, asset: &PodcastAsset) -> Result<(), PipelineError> {
    fs::write(path, &asset.combined_audio)?;
    debug!(path = %path.display(), bytes = asset.combined_audio.len(), "wrote podcast audio");
    Ok(())
}

/// Write the transcript as script text.
pub fn write_transcript(path: &Path, transcript: &[Turn]) -> Result<(), PipelineError> {
    let mut text = render_script(transcript);
    text.push('\n');
    fs::write(path, text)?;
    Ok(())
}

/// Write per-segment timing as JSON.
pub fn write_metadata(path: &Path, asset: &PodcastAsset) -> Result<(), PipelineError> {
    let metadata = AssetMetadata {
        sample_rate: asset.sample_rate,
        channels: asset.channels,
        total_duration_seconds: asset.total_duration_seconds,
        segments: &asset.segments,
    };
    let json = serde_json::to_string_pretty(&metadata).map_err(std::io::Error::from)?;
    fs::write(path, json)?;
    Ok(())
}

/// Write each segment as its own WAV file under `dir`.
///
/// Used when a run fails but some audio exists.
pub fn write_segments(dir: &Path, segments: &[AudioSegment]) -> Result<Vec<PathBuf>, PipelineError> {
    fs::create_dir_all(dir)?;

    segments
        .iter()
        .map(|segment| -> Result<PathBuf, PipelineError> {
            let path = dir.join(segment_filename(segment));
            fs::write(&path, segment.to_wav()?)?;
            debug!(path = %path.display(), order = segment.order, "wrote segment");
            Ok(path)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::AudioAssembler;

    fn segment(order: usize, speaker: &str) -> AudioSegment {
        AudioSegment {
            order,
            speaker: speaker.to_string(),
            text: format!("line {}", order),
            samples: vec![0.1; 2400],
            sample_rate: 24000,
            channels: 1,
            estimated_duration_seconds: 0.8,
            attempts: 1,
        }
    }

    fn transcript() -> Vec<Turn> {
        vec![
            Turn {
                order: 0,
                speaker: "Alex".to_string(),
                text: "line 0".to_string(),
            },
            Turn {
                order: 1,
                speaker: "Dr. Lee".to_string(),
                text: "line 1".to_string(),
            },
        ]
    }

    #[test]
    fn test_generate_output_filename() {
        assert_eq!(
            generate_output_filename("How do vaccines work?"),
            "KnowCast - How do vaccines work_.wav"
        );
        assert_eq!(generate_output_filename("  "), "KnowCast.wav");
    }

    #[test]
    fn test_generate_output_filename_long() {
        let filename = generate_output_filename(&"é".repeat(100));
        assert_eq!(filename, format!("KnowCast - {}.wav", "é".repeat(50)));
    }

    #[test]
    fn test_segment_filename() {
        assert_eq!(segment_filename(&segment(3, "Dr. Lee")), "segment_003_Dr__Lee.wav");
    }

    #[test]
    fn test_companion_path() {
        let path = Path::new("out/KnowCast - Topic.wav");
        assert_eq!(
            companion_path(path, "json"),
            PathBuf::from("out/KnowCast - Topic.json")
        );
    }

    #[test]
    fn test_write_asset_and_sidecars() {
        let dir = tempfile::tempdir().unwrap();
        let asset = AudioAssembler::default()
            .assemble(&[segment(0, "Alex"), segment(1, "Dr. Lee")], &[0, 1], &transcript())
            .unwrap();

        let audio = dir.path().join("episode.wav");
        write_asset(&audio, &asset).unwrap();
        write_transcript(&companion_path(&audio, "txt"), &asset.transcript).unwrap();
        write_metadata(&companion_path(&audio, "json"), &asset).unwrap();

        assert_eq!(fs::read(&audio).unwrap(), asset.combined_audio);
        assert_eq!(
            fs::read_to_string(dir.path().join("episode.txt")).unwrap(),
            "[Alex]: line 0\n[Dr. Lee]: line 1\n"
        );

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join("episode.json")).unwrap())
                .unwrap();
        assert_eq!(json["sample_rate"], 24000);
        assert_eq!(json["segments"].as_array().unwrap().len(), 2);
        assert_eq!(json["segments"][1]["speaker"], "Dr. Lee");
        assert_eq!(json["segments"][1]["sample_offset"], 2400);
    }

    #[test]
    fn test_write_segments() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("segments");
        let paths = write_segments(&target, &[segment(0, "Alex"), segment(2, "Sam")]).unwrap();

        assert_eq!(paths.len(), 2);
        assert!(target.join("segment_000_Alex.wav").exists());
        assert!(target.join("segment_002_Sam.wav").exists());
        let reader = hound::WavReader::open(&paths[1]).unwrap();
        assert_eq!(reader.len(), 2400);
    }
}
