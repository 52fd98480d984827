//! Error types for the podcast pipeline.

use std::time::Duration;

use thiserror::Error;

use crate::pipeline::PipelineStep;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Script contains no valid `[Speaker]: text` lines")]
    EmptyScript,

    #[error("No voice configured for speaker '{speaker}'")]
    UnresolvedSpeaker {
        speaker: String,
        /// Order of the first turn spoken by this speaker, when known.
        order: Option<usize>,
    },

    #[error("Transient synthesis failure for turn {order} ({speaker}) on attempt {attempt}: {source}")]
    SynthesisRetryable {
        order: usize,
        speaker: String,
        attempt: u32,
        #[source]
        source: ServiceError,
    },

    #[error("Synthesis failed for turn {order} ({speaker}) after {attempts} attempt(s): {source}")]
    SynthesisFailed {
        order: usize,
        speaker: String,
        attempts: u32,
        #[source]
        source: ServiceError,
    },

    #[error("Assembly failed: {0}")]
    Assembly(String),

    #[error("Run cancelled during {step}")]
    Cancelled { step: PipelineStep },

    #[error("Run timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Attempts consumed by the failing turn, for synthesis errors.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            PipelineError::SynthesisRetryable { attempt, .. } => Some(*attempt),
            PipelineError::SynthesisFailed { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    /// Order of the turn the error refers to, if any.
    pub fn turn_order(&self) -> Option<usize> {
        match self {
            PipelineError::UnresolvedSpeaker { order, .. } => *order,
            PipelineError::SynthesisRetryable { order, .. }
            | PipelineError::SynthesisFailed { order, .. } => Some(*order),
            _ => None,
        }
    }
}

/// Failures reported by a speech service for a single request.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Rate limited by speech service")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Speech service error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Authentication rejected ({status}): {message}")]
    Unauthorized { status: u16, message: String },

    #[error("Request rejected ({status}): {message}")]
    BadRequest { status: u16, message: String },

    #[error("Text of {chars} characters exceeds the service limit of {limit}")]
    TextTooLong { chars: usize, limit: usize },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Undecodable audio: {0}")]
    Decode(String),

    #[error("Speech engine error: {0}")]
    Engine(String),
}

impl ServiceError {
    /// Whether another attempt may succeed without changing the request.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::RateLimited { .. } | ServiceError::Server { .. } => true,
            ServiceError::Transport(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Delay requested by the service before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ServiceError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ServiceError::RateLimited { retry_after: None }.is_retryable());
        assert!(
            ServiceError::Server {
                status: 503,
                message: "busy".to_string()
            }
            .is_retryable()
        );
        assert!(
            !ServiceError::Unauthorized {
                status: 401,
                message: "bad key".to_string()
            }
            .is_retryable()
        );
        assert!(!ServiceError::TextTooLong { chars: 10, limit: 5 }.is_retryable());
        assert!(!ServiceError::Decode("truncated".to_string()).is_retryable());
    }

    #[test]
    fn test_retry_after_only_for_rate_limits() {
        let limited = ServiceError::RateLimited {
            retry_after: Some(Duration::from_secs(4)),
        };
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(4)));
        let server = ServiceError::Server {
            status: 500,
            message: String::new(),
        };
        assert_eq!(server.retry_after(), None);
    }

    #[test]
    fn test_failure_carries_turn_and_attempts() {
        let err = PipelineError::SynthesisFailed {
            order: 4,
            speaker: "Alex".to_string(),
            attempts: 3,
            source: ServiceError::Server {
                status: 502,
                message: "bad gateway".to_string(),
            },
        };
        assert_eq!(err.turn_order(), Some(4));
        assert_eq!(err.attempts(), Some(3));
        assert!(err.to_string().contains("after 3 attempt(s)"));
    }
}
