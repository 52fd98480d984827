//! Configuration module for loading TOML config files.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::PipelineError;
use crate::retry::RetryPolicy;
use crate::style::PodcastStyle;
use crate::voice::{VoiceRegistry, VoiceSettings};

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub retry: RetryConfig,
    pub pipeline: PipelineConfig,
    /// Speaker name → voice.
    pub voices: BTreeMap<String, VoiceSettings>,
    /// Voice for speakers missing from `voices`. Unset means such speakers fail the run.
    pub fallback_voice: Option<VoiceSettings>,
}

/// Text-to-speech service settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub api_base: String,
    pub model_id: String,
    /// Requested response format, `pcm_<rate>` (raw 16-bit mono PCM).
    pub output_format: String,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Longest text accepted in a single request.
    pub max_text_chars: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.elevenlabs.io/v1".to_string(),
            model_id: "eleven_multilingual_v2".to_string(),
            output_format: "pcm_24000".to_string(),
            request_timeout_secs: 120,
            connect_timeout_secs: 30,
            max_text_chars: 5000,
        }
    }
}

/// Retry behaviour for transient synthesis failures.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per turn, including the first.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_ms: u64,
    /// Pause after every successful call.
    pub inter_call_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 1000,
            backoff_multiplier: 2.0,
            max_backoff_ms: 8000,
            inter_call_delay_ms: 250,
        }
    }
}

/// Run-level settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Synthesis calls in flight at once. 1 issues them one at a time.
    pub max_concurrency: usize,
    /// Wall-clock bound for a whole run; 0 disables it.
    pub run_timeout_secs: u64,
    /// Speaking rate used for display duration estimates.
    pub words_per_minute: f32,
    /// Output sample rate; defaults to the rate most segments share.
    pub target_sample_rate: Option<u32>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 1,
            run_timeout_secs: 1800,
            words_per_minute: 150.0,
            target_sample_rate: None,
        }
    }
}

impl PipelineConfig {
    pub fn run_timeout(&self) -> Option<Duration> {
        (self.run_timeout_secs > 0).then(|| Duration::from_secs(self.run_timeout_secs))
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, PipelineError> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| PipelineError::ConfigError(format!("Failed to read config: {}", e)))?;

        Self::from_str(&content)
    }

    /// Load configuration from string content.
    pub fn from_str(content: &str) -> Result<Self, PipelineError> {
        let config: Config = toml::from_str(content)
            .map_err(|e| PipelineError::ConfigError(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), PipelineError> {
        if self.retry.max_attempts == 0 {
            return Err(PipelineError::ConfigError(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.pipeline.max_concurrency == 0 {
            return Err(PipelineError::ConfigError(
                "pipeline.max_concurrency must be at least 1".to_string(),
            ));
        }
        let wpm = self.pipeline.words_per_minute;
        if wpm.is_nan() || wpm <= 0.0 {
            return Err(PipelineError::ConfigError(
                "pipeline.words_per_minute must be positive".to_string(),
            ));
        }
        if self.pipeline.target_sample_rate == Some(0) {
            return Err(PipelineError::ConfigError(
                "pipeline.target_sample_rate must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the voice registry. Called once at startup.
    pub fn voice_registry(&self) -> Result<VoiceRegistry, PipelineError> {
        let registry = VoiceRegistry::new(self.voices.clone())?;
        match &self.fallback_voice {
            Some(fallback) => registry.with_fallback(fallback.clone()),
            None => Ok(registry),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from(&self.retry)
    }

    /// Replace the configured voices with a style's speaker line-up.
    pub fn with_style(mut self, style: PodcastStyle) -> Self {
        self.voices = style.voices();
        self
    }
}

/// Default configuration embedded in the binary.
pub fn default_config() -> Config {
    Config::default().with_style(PodcastStyle::Educational)
}
