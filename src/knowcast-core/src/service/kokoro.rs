//! Offline synthesis using kokoro-tiny.
//!
//! The model is downloaded on first use. Voice ids are kokoro voice names
//! such as `af_sky` or `bm_george`; stability and similarity are ignored.

use async_trait::async_trait;
use kokoro_tiny::TtsEngine;
use tokio::sync::Mutex;
use tracing::debug;

use crate::audio::encode_wav;
use crate::error::ServiceError;
use crate::service::{AudioEncoding, SpeechAudio, SpeechRequest, SpeechService, VoiceInfo};

const SAMPLE_RATE: u32 = 24000;
/// Kokoro has a strict limit on text length per call.
const MAX_CHUNK_CHARS: usize = 200;
/// Pause between chunks of one request (0.3 s).
const CHUNK_PAUSE_SAMPLES: usize = 7200;

pub struct KokoroService {
    engine: Mutex<TtsEngine>,
    available_voices: Vec<String>,
}

impl KokoroService {
    /// Initialize the TTS engine (downloads model on first run).
    pub async fn new() -> Result<Self, ServiceError> {
        let engine = TtsEngine::new()
            .await
            .map_err(|e| ServiceError::Engine(format!("Failed to initialize TTS: {}", e)))?;
        let available_voices = engine.voices();

        Ok(Self {
            engine: Mutex::new(engine),
            available_voices,
        })
    }

    pub fn available_voices(&self) -> &[String] {
        &self.available_voices
    }

    fn validate_voice(&self, voice_id: &str) -> Result<(), ServiceError> {
        if !self.available_voices.iter().any(|v| v == voice_id) {
            return Err(ServiceError::BadRequest {
                status: 0,
                message: format!("Unknown kokoro voice '{}'", voice_id),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SpeechService for KokoroService {
    async fn synthesize(&self, request: &SpeechRequest) -> Result<SpeechAudio, ServiceError> {
        self.validate_voice(&request.voice_id)?;

        let chunks = split_into_chunks(&request.text, MAX_CHUNK_CHARS);
        let mut engine = self.engine.lock().await;
        let mut samples = Vec::new();

        for (i, chunk) in chunks.iter().enumerate() {
            if i > 0 {
                samples.extend(std::iter::repeat_n(0.0, CHUNK_PAUSE_SAMPLES));
            }
            let chunk_samples = engine
                .synthesize(chunk, Some(&request.voice_id))
                .map_err(|e| ServiceError::Engine(format!("Synthesis failed: {}", e)))?;
            samples.extend(chunk_samples);
        }
        drop(engine);

        debug!(voice_id = %request.voice_id, chunks = chunks.len(), samples = samples.len(), "kokoro synthesis complete");

        let bytes = encode_wav(&samples, SAMPLE_RATE, 1)
            .map_err(|e| ServiceError::Engine(format!("Failed to encode WAV: {}", e)))?;
        Ok(SpeechAudio {
            bytes,
            encoding: AudioEncoding::Wav,
        })
    }

    async fn list_voices(&self) -> Result<Vec<VoiceInfo>, ServiceError> {
        Ok(self
            .available_voices
            .iter()
            .map(|voice| VoiceInfo {
                voice_id: voice.clone(),
                name: voice.clone(),
                category: Some("kokoro".to_string()),
                description: None,
            })
            .collect())
    }

    fn name(&self) -> &str {
        "kokoro"
    }
}

/// Split text into chunks that are safe for kokoro synthesis.
///
/// Breaks on sentence punctuation first, then on commas for sentences that
/// are still too long.
fn split_into_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    let flush = |current: &mut String, chunks: &mut Vec<String>| {
        let trimmed = current.trim();
        if !trimmed.is_empty() {
            chunks.push(trimmed.to_string());
        }
        current.clear();
    };

    for sentence in text.split_inclusive(&['.', '!', '?', ';'][..]) {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            continue;
        }

        if current.len() + sentence.len() > max_chars {
            flush(&mut current, &mut chunks);
        }

        if sentence.len() > max_chars {
            for part in sentence.split_inclusive(',') {
                if current.len() + part.len() > max_chars {
                    flush(&mut current, &mut chunks);
                }
                current.push_str(part.trim());
                current.push(' ');
            }
        } else {
            current.push_str(sentence);
            current.push(' ');
        }
    }
    flush(&mut current, &mut chunks);

    chunks
}
