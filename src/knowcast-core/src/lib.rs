//! KnowCast Core Library
//!
//! Turns a two-host podcast script into a single audio file: parse the
//! script, merge adjacent same-speaker turns, resolve voices, synthesize each
//! turn with retries, and splice the segments in order.

pub mod assembler;
pub mod audio;
pub mod config;
pub mod error;
pub mod export;
pub mod optimizer;
pub mod pipeline;
pub mod retry;
pub mod script;
pub mod service;
pub mod style;
pub mod synthesizer;
pub mod voice;

pub use assembler::{AudioAssembler, PodcastAsset, SegmentTiming};
pub use config::{Config, default_config};
pub use error::{PipelineError, ServiceError};
pub use optimizer::{OptimizedTurn, optimize_turns};
pub use pipeline::{
    FailedRun, PipelineCallback, PipelineEvent, PipelineStep, PodcastPipeline, RunOutcome,
};
pub use retry::RetryPolicy;
pub use script::{Turn, parse_script, render_script};
pub use service::{SpeechRequest, SpeechService, VoiceInfo};
pub use style::{PodcastStyle, available_styles, get_style};
pub use synthesizer::{AudioSegment, RetryNotice, SegmentSynthesizer};
pub use voice::{VoiceProfile, VoiceRegistry, VoiceSettings};
