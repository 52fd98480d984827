//! Text-to-speech service abstraction and implementations.

pub mod elevenlabs;
#[cfg(feature = "kokoro")]
pub mod kokoro;
pub mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;
use crate::voice::VoiceProfile;

/// One synthesis request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeechRequest {
    pub text: String,
    pub voice_id: String,
    pub stability: f32,
    pub similarity: f32,
}

impl SpeechRequest {
    pub fn new(text: impl Into<String>, voice: &VoiceProfile) -> Self {
        Self {
            text: text.into(),
            voice_id: voice.voice_id.clone(),
            stability: voice.stability,
            similarity: voice.similarity,
        }
    }
}

/// How the bytes of a [`SpeechAudio`] are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioEncoding {
    /// A complete RIFF/WAV file.
    Wav,
    /// Headerless little-endian 16-bit interleaved PCM.
    Pcm16 { sample_rate: u32, channels: u16 },
}

/// Encoded audio returned by a speech service.
#[derive(Debug, Clone)]
pub struct SpeechAudio {
    pub bytes: Vec<u8>,
    pub encoding: AudioEncoding,
}

/// A voice offered by a speech service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceInfo {
    pub voice_id: String,
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Text-to-speech backend.
#[async_trait]
pub trait SpeechService: Send + Sync {
    /// Synthesize one request into encoded audio.
    async fn synthesize(&self, request: &SpeechRequest) -> Result<SpeechAudio, ServiceError>;

    /// Voices this service can speak with.
    async fn list_voices(&self) -> Result<Vec<VoiceInfo>, ServiceError> {
        Ok(Vec::new())
    }

    /// Human-readable service name.
    fn name(&self) -> &str;
}
