//! PCM decoding, format normalization and WAV encoding.
//!
//! Samples are kept as interleaved `f32` in the range -1.0 .. 1.0.

use std::io::Cursor;

use crate::error::ServiceError;
use crate::service::{AudioEncoding, SpeechAudio};

/// Decoded interleaved PCM.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl PcmAudio {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }
}

/// Decode a speech service response.
pub fn decode(audio: &SpeechAudio) -> Result<PcmAudio, ServiceError> {
    match audio.encoding {
        AudioEncoding::Wav => decode_wav(&audio.bytes),
        AudioEncoding::Pcm16 {
            sample_rate,
            channels,
        } => decode_pcm16(&audio.bytes, sample_rate, channels),
    }
}

fn decode_wav(bytes: &[u8]) -> Result<PcmAudio, ServiceError> {
    let reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| ServiceError::Decode(format!("invalid WAV: {}", e)))?;
    let spec = reader.spec();

    let samples = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<Vec<_>, _>>(),
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<Vec<_>, _>>()
        }
    }
    .map_err(|e| ServiceError::Decode(format!("failed to read WAV samples: {}", e)))?;

    Ok(PcmAudio {
        samples,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
    })
}

fn decode_pcm16(bytes: &[u8], sample_rate: u32, channels: u16) -> Result<PcmAudio, ServiceError> {
    if channels == 0 || sample_rate == 0 {
        return Err(ServiceError::Decode(format!(
            "invalid PCM format: {} Hz, {} channel(s)",
            sample_rate, channels
        )));
    }
    let frame_bytes = 2 * channels as usize;
    if bytes.len() % frame_bytes != 0 {
        return Err(ServiceError::Decode(format!(
            "PCM payload of {} bytes is not a whole number of {}-byte frames",
            bytes.len(),
            frame_bytes
        )));
    }

    let samples: Vec<i16> = bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect();

    Ok(PcmAudio {
        samples: pcm_i16_to_f32(&samples),
        sample_rate,
        channels,
    })
}

/// Convert i16 PCM samples to f32 (range -1.0 .. 1.0).
pub fn pcm_i16_to_f32(input: &[i16]) -> Vec<f32> {
    input.iter().map(|&s| s as f32 / 32768.0).collect()
}

/// Convert f32 PCM samples to i16.
pub fn pcm_f32_to_i16(input: &[f32]) -> Vec<i16> {
    input
        .iter()
        .map(|&s| (s * 32767.0).clamp(-32768.0, 32767.0) as i16)
        .collect()
}

/// Change sample rate using linear interpolation between adjacent frames.
pub fn resample_linear(samples: &[f32], channels: u16, from_rate: u32, to_rate: u32) -> Vec<f32> {
    let channels = channels.max(1) as usize;
    if from_rate == to_rate || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let frames = samples.len() / channels;
    if frames == 0 {
        return Vec::new();
    }

    let new_frames = ((frames as f64) * to_rate as f64 / from_rate as f64).round() as usize;
    let step = from_rate as f64 / to_rate as f64;
    let mut result = Vec::with_capacity(new_frames * channels);

    for i in 0..new_frames {
        let src_pos = i as f64 * step;
        let src_idx = (src_pos as usize).min(frames - 1);
        let frac = (src_pos - src_idx as f64).clamp(0.0, 1.0) as f32;
        let next_idx = (src_idx + 1).min(frames - 1);

        for c in 0..channels {
            let a = samples[src_idx * channels + c];
            let b = samples[next_idx * channels + c];
            result.push(a * (1.0 - frac) + b * frac);
        }
    }

    result
}

/// Duplicate channels to reach `to` channels.
///
/// Returns `None` when `to` is not a whole multiple of `from`, since any
/// such mapping would drop or invent channel content.
pub fn upmix(samples: &[f32], from: u16, to: u16) -> Option<Vec<f32>> {
    if from == 0 || to < from || to % from != 0 {
        return None;
    }
    if from == to {
        return Some(samples.to_vec());
    }

    let repeat = (to / from) as usize;
    let from = from as usize;
    let mut result = Vec::with_capacity(samples.len() * repeat);
    for frame in samples.chunks_exact(from) {
        for _ in 0..repeat {
            result.extend_from_slice(frame);
        }
    }
    Some(result)
}

/// Encode interleaved samples as 16-bit PCM WAV.
pub fn encode_wav(samples: &[f32], sample_rate: u32, channels: u16) -> Result<Vec<u8>, hound::Error> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut buf = Vec::new();
    {
        let mut writer = hound::WavWriter::new(Cursor::new(&mut buf), spec)?;
        for sample in pcm_f32_to_i16(samples) {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
    }
    Ok(buf)
}
