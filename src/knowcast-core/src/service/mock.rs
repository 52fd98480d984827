//! Mock speech service.
//!
//! Generates a sine tone whose duration follows the text length, with a
//! pitch derived from the voice id so speakers remain distinguishable.
//! Failures can be scripted per text to drive retry and abort paths.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use crate::audio::encode_wav;
use crate::error::ServiceError;
use crate::service::{AudioEncoding, SpeechAudio, SpeechRequest, SpeechService, VoiceInfo};

/// A failure the mock reports instead of audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    RateLimited,
    ServerError,
    Unauthorized,
    BadRequest,
}

impl MockFailure {
    fn to_error(self) -> ServiceError {
        match self {
            MockFailure::RateLimited => ServiceError::RateLimited { retry_after: None },
            MockFailure::ServerError => ServiceError::Server {
                status: 503,
                message: "mock service unavailable".to_string(),
            },
            MockFailure::Unauthorized => ServiceError::Unauthorized {
                status: 401,
                message: "mock key rejected".to_string(),
            },
            MockFailure::BadRequest => ServiceError::BadRequest {
                status: 400,
                message: "mock request rejected".to_string(),
            },
        }
    }
}

/// Configuration for [`MockSpeechService`].
#[derive(Debug, Clone)]
pub struct MockSpeechConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub ms_per_char: f64,
    pub min_duration_ms: f64,
    pub max_duration_ms: f64,
    pub amplitude: f32,
    /// Fixed delay before every response.
    pub latency: Duration,
    /// Extra delay per character of text.
    pub latency_per_char: Duration,
}

impl Default for MockSpeechConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24000,
            channels: 1,
            ms_per_char: 60.0,
            min_duration_ms: 200.0,
            max_duration_ms: 30000.0,
            amplitude: 0.3,
            latency: Duration::ZERO,
            latency_per_char: Duration::ZERO,
        }
    }
}

/// Deterministic in-process speech service.
#[derive(Default)]
pub struct MockSpeechService {
    config: MockSpeechConfig,
    /// Per-text queue of failures returned before audio is produced.
    failures: Mutex<HashMap<String, VecDeque<MockFailure>>>,
    /// Per-voice output format overrides.
    formats: HashMap<String, (u32, u16)>,
    calls: Mutex<Vec<SpeechRequest>>,
}

impl MockSpeechService {
    pub fn new(config: MockSpeechConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Fail the next requests for `text` with `failures`, in order.
    pub fn fail_text(self, text: impl Into<String>, failures: impl IntoIterator<Item = MockFailure>) -> Self {
        lock(&self.failures)
            .entry(text.into())
            .or_default()
            .extend(failures);
        self
    }

    /// Produce audio for `voice_id` at a different rate or channel count.
    pub fn with_voice_format(mut self, voice_id: impl Into<String>, sample_rate: u32, channels: u16) -> Self {
        self.formats.insert(voice_id.into(), (sample_rate, channels));
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.config.latency = latency;
        self
    }

    pub fn with_latency_per_char(mut self, latency: Duration) -> Self {
        self.config.latency_per_char = latency;
        self
    }

    /// Every request received so far, in arrival order.
    pub fn calls(&self) -> Vec<SpeechRequest> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Number of frames the mock produces for `text`.
    pub fn frames_for(&self, text: &str, sample_rate: u32) -> usize {
        let chars = text.chars().count() as f64;
        let duration_ms = (chars * self.config.ms_per_char)
            .clamp(self.config.min_duration_ms, self.config.max_duration_ms);
        (sample_rate as f64 * duration_ms / 1000.0) as usize
    }

    fn tone(&self, request: &SpeechRequest, sample_rate: u32, channels: u16) -> Vec<f32> {
        let frames = self.frames_for(&request.text, sample_rate);
        let frequency = voice_frequency(&request.voice_id);
        let amplitude = self.config.amplitude;

        (0..frames)
            .flat_map(|i| {
                let t = i as f32 / sample_rate as f32;
                let sample = amplitude * (std::f32::consts::TAU * frequency * t).sin();
                std::iter::repeat_n(sample, channels as usize)
            })
            .collect()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Stable pitch between 160 and 400 Hz per voice id.
fn voice_frequency(voice_id: &str) -> f32 {
    let hash = voice_id
        .bytes()
        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
    160.0 + (hash % 240) as f32
}

#[async_trait]
impl SpeechService for MockSpeechService {
    async fn synthesize(&self, request: &SpeechRequest) -> Result<SpeechAudio, ServiceError> {
        lock(&self.calls).push(request.clone());

        let chars = request.text.chars().count() as u32;
        let latency = self.config.latency + self.config.latency_per_char * chars;
        if !latency.is_zero() {
            sleep(latency).await;
        }

        let failure = lock(&self.failures)
            .get_mut(&request.text)
            .and_then(VecDeque::pop_front);
        if let Some(failure) = failure {
            return Err(failure.to_error());
        }

        let (sample_rate, channels) = self
            .formats
            .get(&request.voice_id)
            .copied()
            .unwrap_or((self.config.sample_rate, self.config.channels));

        let samples = self.tone(request, sample_rate, channels);
        let bytes = encode_wav(&samples, sample_rate, channels)
            .map_err(|e| ServiceError::Engine(format!("mock WAV encoding failed: {}", e)))?;

        Ok(SpeechAudio {
            bytes,
            encoding: AudioEncoding::Wav,
        })
    }

    async fn list_voices(&self) -> Result<Vec<VoiceInfo>, ServiceError> {
        Ok(vec![VoiceInfo {
            voice_id: "mock".to_string(),
            name: "Mock Tone".to_string(),
            category: Some("generated".to_string()),
            description: Some("Sine tone, pitch derived from the voice id".to_string()),
        }])
    }

    fn name(&self) -> &str {
        "mock"
    }
}
