//! Per-turn synthesis with retries.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, error, warn};

use crate::audio::{self, encode_wav};
use crate::error::PipelineError;
use crate::optimizer::OptimizedTurn;
use crate::retry::RetryPolicy;
use crate::service::{SpeechRequest, SpeechService};
use crate::voice::VoiceProfile;

/// Default speaking rate for duration estimates.
pub const DEFAULT_WORDS_PER_MINUTE: f32 = 150.0;

/// Decoded audio for one optimized turn.
#[derive(Debug, Clone)]
pub struct AudioSegment {
    pub order: usize,
    pub speaker: String,
    pub text: String,
    /// Interleaved PCM samples.
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Word-count based estimate for display; assembly uses the samples.
    pub estimated_duration_seconds: f32,
    /// Service calls it took to produce this segment.
    pub attempts: u32,
}

impl AudioSegment {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    /// Exact duration of the decoded audio.
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Encode this segment alone as a WAV file.
    pub fn to_wav(&self) -> Result<Vec<u8>, PipelineError> {
        encode_wav(&self.samples, self.sample_rate, self.channels).map_err(|e| {
            PipelineError::Io(std::io::Error::other(format!(
                "Failed to encode segment {}: {}",
                self.order, e
            )))
        })
    }
}

/// A retry about to happen.
#[derive(Debug, Clone)]
pub struct RetryNotice {
    pub order: usize,
    pub speaker: String,
    /// The attempt that just failed.
    pub attempt: u32,
    pub delay: Duration,
    pub reason: String,
}

/// Estimate spoken duration from word count.
pub fn estimate_duration_seconds(text: &str, words_per_minute: f32) -> f32 {
    if words_per_minute <= 0.0 {
        return 0.0;
    }
    let words = text.split_whitespace().count() as f32;
    words / words_per_minute * 60.0
}

/// Turns an optimized turn into an [`AudioSegment`] via a speech service.
pub struct SegmentSynthesizer {
    service: Arc<dyn SpeechService>,
    policy: RetryPolicy,
    words_per_minute: f32,
}

impl SegmentSynthesizer {
    pub fn new(service: Arc<dyn SpeechService>, policy: RetryPolicy) -> Self {
        Self {
            service,
            policy,
            words_per_minute: DEFAULT_WORDS_PER_MINUTE,
        }
    }

    pub fn with_words_per_minute(mut self, words_per_minute: f32) -> Self {
        self.words_per_minute = words_per_minute;
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn service_name(&self) -> &str {
        self.service.name()
    }

    /// Synthesize one turn, retrying transient failures.
    ///
    /// `on_retry` is called before each backoff sleep.
    pub async fn synthesize<F>(
        &self,
        turn: &OptimizedTurn,
        voice: &VoiceProfile,
        on_retry: F,
    ) -> Result<AudioSegment, PipelineError>
    where
        F: Fn(&RetryNotice),
    {
        let request = SpeechRequest::new(turn.text.clone(), voice);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.attempt(turn, &request, attempt).await {
                Ok(segment) => {
                    if !self.policy.inter_call_delay.is_zero() {
                        sleep(self.policy.inter_call_delay).await;
                    }
                    return Ok(segment);
                }
                Err(PipelineError::SynthesisRetryable {
                    order,
                    speaker,
                    attempt,
                    source,
                }) => {
                    if !self.policy.should_retry(attempt, &source) {
                        error!(order, speaker = %speaker, attempts = attempt, error = %source, "synthesis retries exhausted");
                        return Err(PipelineError::SynthesisFailed {
                            order,
                            speaker,
                            attempts: attempt,
                            source,
                        });
                    }

                    let delay = self.policy.delay_after(attempt, &source);
                    warn!(
                        order,
                        speaker = %speaker,
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %source,
                        "transient synthesis failure, retrying"
                    );
                    on_retry(&RetryNotice {
                        order,
                        speaker,
                        attempt,
                        delay,
                        reason: source.to_string(),
                    });
                    sleep(delay).await;
                }
                Err(e) => {
                    error!(order = turn.order, speaker = %turn.speaker, error = %e, "synthesis failed");
                    return Err(e);
                }
            }
        }
    }

    /// One service call, classified.
    async fn attempt(
        &self,
        turn: &OptimizedTurn,
        request: &SpeechRequest,
        attempt: u32,
    ) -> Result<AudioSegment, PipelineError> {
        debug!(order = turn.order, speaker = %turn.speaker, attempt, chars = request.text.len(), "synthesis request");

        let response = match self.service.synthesize(request).await {
            Ok(response) => response,
            Err(source) if source.is_retryable() => {
                return Err(PipelineError::SynthesisRetryable {
                    order: turn.order,
                    speaker: turn.speaker.clone(),
                    attempt,
                    source,
                });
            }
            Err(source) => {
                return Err(PipelineError::SynthesisFailed {
                    order: turn.order,
                    speaker: turn.speaker.clone(),
                    attempts: attempt,
                    source,
                });
            }
        };

        let pcm = audio::decode(&response).map_err(|source| PipelineError::SynthesisFailed {
            order: turn.order,
            speaker: turn.speaker.clone(),
            attempts: attempt,
            source,
        })?;

        Ok(AudioSegment {
            order: turn.order,
            speaker: turn.speaker.clone(),
            text: turn.text.clone(),
            samples: pcm.samples,
            sample_rate: pcm.sample_rate,
            channels: pcm.channels,
            estimated_duration_seconds: estimate_duration_seconds(&turn.text, self.words_per_minute),
            attempts: attempt,
        })
    }
}
