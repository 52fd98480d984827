//! Splices synthesized segments into one podcast asset.
//!
//! Segments are ordered strictly by turn order, normalized to a common
//! sample rate and channel count, and copied back to back without gaps.

use std::borrow::Cow;
use std::collections::{BTreeSet, HashMap};

use serde::Serialize;
use tracing::debug;

use crate::audio::{encode_wav, resample_linear, upmix};
use crate::error::PipelineError;
use crate::script::{Turn, render_script};
use crate::synthesizer::AudioSegment;

/// Where one segment sits inside the combined audio.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentTiming {
    pub order: usize,
    pub speaker: String,
    pub text: String,
    pub start_seconds: f64,
    pub duration_seconds: f64,
    /// Offset into the interleaved sample buffer.
    pub sample_offset: usize,
    pub sample_count: usize,
    pub estimated_duration_seconds: f32,
    pub attempts: u32,
}

/// The finished podcast.
#[derive(Debug, Clone)]
pub struct PodcastAsset {
    pub segments: Vec<SegmentTiming>,
    /// 16-bit PCM WAV.
    pub combined_audio: Vec<u8>,
    pub sample_rate: u32,
    pub channels: u16,
    pub total_duration_seconds: f64,
    pub transcript: Vec<Turn>,
}

impl PodcastAsset {
    /// Interleaved samples in the combined audio.
    pub fn sample_count(&self) -> usize {
        self.segments.iter().map(|s| s.sample_count).sum()
    }

    /// The transcript as `[Speaker]: text` lines.
    pub fn transcript_text(&self) -> String {
        render_script(&self.transcript)
    }
}

struct Spliced {
    audio: Vec<u8>,
    sample_rate: u32,
    channels: u16,
    timings: Vec<SegmentTiming>,
    total_duration_seconds: f64,
}

#[derive(Debug, Clone, Default)]
pub struct AudioAssembler {
    target_sample_rate: Option<u32>,
}

impl AudioAssembler {
    pub fn new(target_sample_rate: Option<u32>) -> Self {
        Self { target_sample_rate }
    }

    /// Build the asset from every segment of a run.
    ///
    /// `expected_orders` are the orders of all optimized turns; the segment
    /// set must match them exactly. Segments are borrowed so the caller
    /// still holds them when assembly fails.
    pub fn assemble(
        &self,
        segments: &[AudioSegment],
        expected_orders: &[usize],
        transcript: &[Turn],
    ) -> Result<PodcastAsset, PipelineError> {
        let mut ordered: Vec<&AudioSegment> = segments.iter().collect();
        ordered.sort_by_key(|s| s.order);

        check_orders(&ordered, expected_orders)?;
        let spliced = self.splice(&ordered)?;

        debug!(
            segments = ordered.len(),
            sample_rate = spliced.sample_rate,
            channels = spliced.channels,
            duration_secs = spliced.total_duration_seconds,
            "assembled podcast"
        );
        Ok(PodcastAsset {
            segments: spliced.timings,
            combined_audio: spliced.audio,
            sample_rate: spliced.sample_rate,
            channels: spliced.channels,
            total_duration_seconds: spliced.total_duration_seconds,
            transcript: transcript.to_vec(),
        })
    }

    /// Pick the output format: configured rate or the most common one, and
    /// the widest channel layout.
    fn canonical_format(&self, segments: &[&AudioSegment]) -> Result<(u32, u16), PipelineError> {
        let mut rates: HashMap<u32, usize> = HashMap::new();
        let mut channels = 0;

        for segment in segments {
            if segment.sample_rate == 0 || segment.channels == 0 {
                return Err(PipelineError::Assembly(format!(
                    "segment for turn {} has invalid format ({} Hz, {} channel(s))",
                    segment.order, segment.sample_rate, segment.channels
                )));
            }
            if segment.samples.len() % segment.channels as usize != 0 {
                return Err(PipelineError::Assembly(format!(
                    "segment for turn {} does not hold whole frames",
                    segment.order
                )));
            }
            *rates.entry(segment.sample_rate).or_default() += 1;
            channels = channels.max(segment.channels);
        }

        let sample_rate = match self.target_sample_rate {
            Some(rate) => rate,
            None => rates
                .into_iter()
                .max_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)))
                .map(|(rate, _)| rate)
                .ok_or_else(|| PipelineError::Assembly("no segments to assemble".to_string()))?,
        };

        Ok((sample_rate, channels))
    }

    fn splice(&self, segments: &[&AudioSegment]) -> Result<Spliced, PipelineError> {
        let (sample_rate, channels) = self.canonical_format(segments)?;

        let normalized = segments
            .iter()
            .map(|s| normalize(s, sample_rate, channels))
            .collect::<Result<Vec<_>, _>>()?;

        let total: usize = normalized.iter().map(|s| s.len()).sum();
        let mut combined = vec![0.0f32; total];
        let mut timings = Vec::with_capacity(segments.len());
        let mut offset = 0;
        let frame_seconds = |samples: usize| (samples / channels as usize) as f64 / sample_rate as f64;

        for (segment, samples) in segments.iter().zip(&normalized) {
            let len = samples.len();
            combined[offset..offset + len].copy_from_slice(samples);
            timings.push(SegmentTiming {
                order: segment.order,
                speaker: segment.speaker.clone(),
                text: segment.text.clone(),
                start_seconds: frame_seconds(offset),
                duration_seconds: frame_seconds(len),
                sample_offset: offset,
                sample_count: len,
                estimated_duration_seconds: segment.estimated_duration_seconds,
                attempts: segment.attempts,
            });
            offset += len;
        }

        let audio = encode_wav(&combined, sample_rate, channels)
            .map_err(|e| PipelineError::Assembly(format!("failed to encode WAV: {}", e)))?;

        Ok(Spliced {
            audio,
            sample_rate,
            channels,
            timings,
            total_duration_seconds: frame_seconds(total),
        })
    }
}

fn check_orders(segments: &[&AudioSegment], expected_orders: &[usize]) -> Result<(), PipelineError> {
    if segments.is_empty() {
        return Err(PipelineError::Assembly("no segments to assemble".to_string()));
    }

    if let Some(pair) = segments.windows(2).find(|w| w[0].order == w[1].order) {
        return Err(PipelineError::Assembly(format!(
            "duplicate segments for turn {}",
            pair[0].order
        )));
    }

    let expected: BTreeSet<usize> = expected_orders.iter().copied().collect();
    let present: BTreeSet<usize> = segments.iter().map(|s| s.order).collect();

    let missing: Vec<usize> = expected.difference(&present).copied().collect();
    if !missing.is_empty() {
        return Err(PipelineError::Assembly(format!(
            "missing segments for turns {:?}",
            missing
        )));
    }

    let unexpected: Vec<usize> = present.difference(&expected).copied().collect();
    if !unexpected.is_empty() {
        return Err(PipelineError::Assembly(format!(
            "unexpected segments for turns {:?}",
            unexpected
        )));
    }

    Ok(())
}

fn normalize(
    segment: &AudioSegment,
    sample_rate: u32,
    channels: u16,
) -> Result<Cow<'_, [f32]>, PipelineError> {
    let mut samples = Cow::Borrowed(segment.samples.as_slice());

    if segment.channels != channels {
        let mixed = upmix(&samples, segment.channels, channels).ok_or_else(|| {
            PipelineError::Assembly(format!(
                "cannot map {} channel(s) to {} for turn {} without dropping audio",
                segment.channels, channels, segment.order
            ))
        })?;
        samples = Cow::Owned(mixed);
    }

    if segment.sample_rate != sample_rate {
        samples = Cow::Owned(resample_linear(
            &samples,
            channels,
            segment.sample_rate,
            sample_rate,
        ));
    }

    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{decode, upmix as upmix_samples};
    use crate::service::{AudioEncoding, SpeechAudio};

    fn segment(order: usize, value: f32, frames: usize) -> AudioSegment {
        AudioSegment {
            order,
            speaker: format!("S{}", order % 2),
            text: format!("turn {}", order),
            samples: vec![value; frames],
            sample_rate: 1000,
            channels: 1,
            estimated_duration_seconds: 0.0,
            attempts: 1,
        }
    }

    fn decoded(asset: &PodcastAsset) -> Vec<f32> {
        decode(&SpeechAudio {
            bytes: asset.combined_audio.clone(),
            encoding: AudioEncoding::Wav,
        })
        .unwrap()
        .samples
    }

    #[test]
    fn test_orders_by_turn_not_arrival() {
        let arrivals = vec![segment(4, 0.75, 10), segment(0, 0.25, 20), segment(2, 0.5, 30)];
        let asset = AudioAssembler::default()
            .assemble(&arrivals, &[0, 2, 4], &[])
            .unwrap();

        let orders: Vec<usize> = asset.segments.iter().map(|s| s.order).collect();
        assert_eq!(orders, vec![0, 2, 4]);

        let samples = decoded(&asset);
        assert!((samples[0] - 0.25).abs() < 1e-3);
        assert!((samples[20] - 0.5).abs() < 1e-3);
        assert!((samples[50] - 0.75).abs() < 1e-3);
    }

    #[test]
    fn test_every_arrival_permutation_yields_same_layout() {
        let permutations = [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];
        for permutation in permutations {
            let arrivals: Vec<AudioSegment> = permutation
                .iter()
                .map(|&o| segment(o, o as f32 * 0.1, 5 + o))
                .collect();
            let asset = AudioAssembler::default()
                .assemble(&arrivals, &[0, 1, 2], &[])
                .unwrap();
            let offsets: Vec<usize> = asset.segments.iter().map(|s| s.sample_offset).collect();
            assert_eq!(offsets, vec![0, 5, 11]);
        }
    }

    #[test]
    fn test_sample_count_is_exact_sum() {
        let asset = AudioAssembler::default()
            .assemble(
                &[segment(0, 0.1, 123), segment(1, 0.2, 456), segment(2, 0.3, 7)],
                &[0, 1, 2],
                &[],
            )
            .unwrap();
        assert_eq!(asset.sample_count(), 586);
        assert_eq!(decoded(&asset).len(), 586);
        assert!((asset.total_duration_seconds - 0.586).abs() < 1e-9);
    }

    #[test]
    fn test_timing_offsets() {
        let asset = AudioAssembler::default()
            .assemble(&[segment(0, 0.1, 500), segment(1, 0.2, 1500)], &[0, 1], &[])
            .unwrap();
        assert_eq!(asset.segments[0].start_seconds, 0.0);
        assert!((asset.segments[0].duration_seconds - 0.5).abs() < 1e-9);
        assert!((asset.segments[1].start_seconds - 0.5).abs() < 1e-9);
        assert!((asset.segments[1].duration_seconds - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_missing_segment_fails() {
        let err = AudioAssembler::default()
            .assemble(&[segment(0, 0.1, 10), segment(2, 0.1, 10)], &[0, 1, 2], &[])
            .unwrap_err();
        assert!(matches!(err, PipelineError::Assembly(ref m) if m.contains("missing")));
    }

    #[test]
    fn test_duplicate_and_unexpected_segments() {
        let err = AudioAssembler::default()
            .assemble(&[segment(1, 0.1, 10), segment(1, 0.1, 10)], &[1], &[])
            .unwrap_err();
        assert!(err.to_string().contains("duplicate"));

        let err = AudioAssembler::default()
            .assemble(&[segment(0, 0.1, 10), segment(9, 0.1, 10)], &[0], &[])
            .unwrap_err();
        assert!(err.to_string().contains("unexpected"));

        let err = AudioAssembler::default().assemble(&[], &[], &[]).unwrap_err();
        assert!(err.to_string().contains("no segments"));
    }

    #[test]
    fn test_mixed_rates_resampled_to_majority() {
        let mut odd = segment(1, 0.2, 500);
        odd.sample_rate = 500;
        let asset = AudioAssembler::default()
            .assemble(&[segment(0, 0.1, 1000), odd, segment(2, 0.3, 1000)], &[0, 1, 2], &[])
            .unwrap();
        assert_eq!(asset.sample_rate, 1000);
        assert_eq!(asset.segments[1].sample_count, 1000);
        assert!((asset.total_duration_seconds - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_target_rate_overrides_majority() {
        let asset = AudioAssembler::new(Some(2000))
            .assemble(&[segment(0, 0.1, 100)], &[0], &[])
            .unwrap();
        assert_eq!(asset.sample_rate, 2000);
        assert_eq!(asset.sample_count(), 200);
    }

    #[test]
    fn test_mono_upmixed_to_stereo() {
        let mut stereo = segment(1, 0.0, 0);
        stereo.samples = upmix_samples(&[0.4; 10], 1, 2).unwrap();
        stereo.channels = 2;
        let asset = AudioAssembler::default()
            .assemble(&[segment(0, 0.2, 10), stereo], &[0, 1], &[])
            .unwrap();
        assert_eq!(asset.channels, 2);
        assert_eq!(asset.segments[0].sample_count, 20);
        assert_eq!(asset.sample_count(), 40);
    }

    #[test]
    fn test_incompatible_channel_layout_fails() {
        let mut stereo = segment(0, 0.1, 20);
        stereo.channels = 2;
        let mut surround = segment(1, 0.1, 30);
        surround.channels = 3;
        let err = AudioAssembler::default()
            .assemble(&[stereo, surround], &[0, 1], &[])
            .unwrap_err();
        assert!(err.to_string().contains("without dropping"));
    }

    #[test]
    fn test_partial_frames_rejected() {
        let mut broken = segment(0, 0.1, 11);
        broken.channels = 2;
        assert!(
            AudioAssembler::default()
                .assemble(&[broken], &[0], &[])
                .is_err()
        );
    }
}
