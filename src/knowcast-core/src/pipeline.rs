//! Pipeline orchestration.
//!
//! A run moves through a fixed sequence of steps:
//!
//! ```text
//! parsing → optimizing → resolving_voices → synthesizing(k/n) → assembling → complete
//! ```
//!
//! and may drop into the terminal `failed` step from any of them. A failed
//! run still hands back the segments synthesized before the failure together
//! with the transcript, so callers can offer the pieces that did succeed.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::assembler::{AudioAssembler, PodcastAsset};
use crate::config::Config;
use crate::error::PipelineError;
use crate::optimizer::{OptimizedTurn, optimize_turns};
use crate::retry::RetryPolicy;
use crate::script::{Turn, parse_script};
use crate::service::SpeechService;
use crate::synthesizer::{AudioSegment, RetryNotice, SegmentSynthesizer};
use crate::voice::{VoiceProfile, VoiceRegistry};

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PipelineStep {
    Parsing,
    Optimizing,
    ResolvingVoices,
    Synthesizing { completed: usize, total: usize },
    Assembling,
    Complete,
    Failed,
}

impl PipelineStep {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineStep::Complete | PipelineStep::Failed)
    }

    /// Whether `next` is a legal successor of this step.
    pub fn can_transition_to(&self, next: PipelineStep) -> bool {
        use PipelineStep::*;

        if self.is_terminal() {
            return false;
        }
        match (*self, next) {
            (_, Failed) => true,
            (Parsing, Optimizing) | (Optimizing, ResolvingVoices) | (Assembling, Complete) => true,
            (ResolvingVoices, Synthesizing { completed: 0, .. }) => true,
            (
                Synthesizing { completed, total },
                Synthesizing {
                    completed: next_completed,
                    total: next_total,
                },
            ) => total == next_total && completed < total && next_completed == completed + 1,
            (Synthesizing { completed, total }, Assembling) => completed == total,
            _ => false,
        }
    }

    /// Progress of the run at this step, `None` once it has failed.
    pub fn percent_complete(&self) -> Option<f32> {
        match *self {
            PipelineStep::Parsing | PipelineStep::Optimizing | PipelineStep::ResolvingVoices => {
                Some(0.0)
            }
            PipelineStep::Synthesizing { completed, total } => {
                if total == 0 {
                    Some(0.0)
                } else {
                    Some(completed as f32 / total as f32 * 100.0)
                }
            }
            PipelineStep::Assembling | PipelineStep::Complete => Some(100.0),
            PipelineStep::Failed => None,
        }
    }
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineStep::Parsing => write!(f, "parsing"),
            PipelineStep::Optimizing => write!(f, "optimizing"),
            PipelineStep::ResolvingVoices => write!(f, "resolving_voices"),
            PipelineStep::Synthesizing { completed, total } => {
                write!(f, "synthesizing({}/{})", completed, total)
            }
            PipelineStep::Assembling => write!(f, "assembling"),
            PipelineStep::Complete => write!(f, "complete"),
            PipelineStep::Failed => write!(f, "failed"),
        }
    }
}

/// Events emitted while a run progresses.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// The run entered a new step.
    Progress {
        step: PipelineStep,
        percent_complete: f32,
    },
    /// A turn finished synthesizing.
    SegmentReady {
        order: usize,
        speaker: String,
        attempts: u32,
        duration_seconds: f64,
    },
    /// A transient failure is about to be retried.
    Retrying(RetryNotice),
}

/// Callback for pipeline events.
pub type PipelineCallback = Box<dyn Fn(PipelineEvent) + Send + Sync>;

/// A run that ended in the `failed` step.
#[derive(Debug)]
pub struct FailedRun {
    /// The step that was active when the run failed.
    pub failed_at: PipelineStep,
    pub error: PipelineError,
    /// Segments synthesized before the failure, sorted by order.
    pub segments: Vec<AudioSegment>,
    pub transcript: Vec<Turn>,
    /// Number of optimized turns the run needed; 0 if it failed before optimizing.
    pub expected_segments: usize,
}

impl FailedRun {
    /// Every turn has audio; only assembly is missing.
    pub fn has_all_segments(&self) -> bool {
        self.expected_segments > 0 && self.segments.len() == self.expected_segments
    }
}

/// Result of a pipeline run.
#[derive(Debug)]
pub enum RunOutcome {
    Complete(PodcastAsset),
    Failed(FailedRun),
}

impl RunOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, RunOutcome::Complete(_))
    }

    /// Discard partial results and keep only the error.
    pub fn into_result(self) -> Result<PodcastAsset, PipelineError> {
        match self {
            RunOutcome::Complete(asset) => Ok(asset),
            RunOutcome::Failed(failed) => Err(failed.error),
        }
    }
}

/// Step tracking and event emission for a single run.
struct RunProgress<'a> {
    step: PipelineStep,
    percent: f32,
    callback: Option<&'a PipelineCallback>,
}

impl<'a> RunProgress<'a> {
    fn start(callback: Option<&'a PipelineCallback>) -> Self {
        let progress = Self {
            step: PipelineStep::Parsing,
            percent: 0.0,
            callback,
        };
        progress.emit(PipelineEvent::Progress {
            step: PipelineStep::Parsing,
            percent_complete: 0.0,
        });
        progress
    }

    fn advance(&mut self, next: PipelineStep) {
        debug_assert!(
            self.step.can_transition_to(next),
            "illegal transition {} -> {}",
            self.step,
            next
        );
        self.step = next;
        if let Some(percent) = next.percent_complete() {
            self.percent = percent;
        }
        match next {
            PipelineStep::Synthesizing { .. } => debug!(step = %next, "pipeline step"),
            _ => info!(step = %next, "pipeline step"),
        }
        self.emit(PipelineEvent::Progress {
            step: next,
            percent_complete: self.percent,
        });
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(callback) = self.callback {
            callback(event);
        }
    }

    fn fail(
        &mut self,
        error: PipelineError,
        mut segments: Vec<AudioSegment>,
        transcript: Vec<Turn>,
        expected_segments: usize,
    ) -> RunOutcome {
        let failed_at = self.step;
        error!(step = %failed_at, segments = segments.len(), error = %error, "pipeline run failed");
        self.advance(PipelineStep::Failed);
        segments.sort_by_key(|s| s.order);
        RunOutcome::Failed(FailedRun {
            failed_at,
            error,
            segments,
            transcript,
            expected_segments,
        })
    }
}

/// Drives a script through parsing, voice resolution, synthesis and assembly.
pub struct PodcastPipeline {
    registry: Arc<VoiceRegistry>,
    synthesizer: SegmentSynthesizer,
    assembler: AudioAssembler,
    max_concurrency: usize,
    run_timeout: Option<Duration>,
    callback: Option<PipelineCallback>,
}

impl PodcastPipeline {
    pub fn new(
        registry: Arc<VoiceRegistry>,
        service: Arc<dyn SpeechService>,
        config: &Config,
    ) -> Self {
        Self {
            registry,
            synthesizer: SegmentSynthesizer::new(service, config.retry_policy())
                .with_words_per_minute(config.pipeline.words_per_minute),
            assembler: AudioAssembler::new(config.pipeline.target_sample_rate),
            max_concurrency: config.pipeline.max_concurrency.max(1),
            run_timeout: config.pipeline.run_timeout(),
            callback: None,
        }
    }

    /// Set a callback for pipeline events.
    pub fn with_callback(mut self, callback: PipelineCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.synthesizer = self.synthesizer.with_policy(policy);
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Bound the wall-clock time of a run; `None` removes the bound.
    pub fn with_run_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.run_timeout = timeout;
        self
    }

    /// Run the full pipeline.
    pub async fn run(&self, script: &str) -> RunOutcome {
        self.run_with_cancel(script, CancellationToken::new()).await
    }

    /// Run the full pipeline, stopping early once `cancel` fires.
    pub async fn run_with_cancel(&self, script: &str, cancel: CancellationToken) -> RunOutcome {
        let deadline = self.run_timeout.map(|timeout| Instant::now() + timeout);
        let mut progress = RunProgress::start(self.callback.as_ref());

        info!(
            service = self.synthesizer.service_name(),
            max_concurrency = self.max_concurrency,
            "starting pipeline run"
        );

        let turns = match parse_script(script) {
            Ok(turns) => turns,
            Err(e) => return progress.fail(e, Vec::new(), Vec::new(), 0),
        };
        if let Some(e) = self.interrupted(&cancel, deadline, progress.step) {
            return progress.fail(e, Vec::new(), turns, 0);
        }

        progress.advance(PipelineStep::Optimizing);
        let optimized = optimize_turns(&turns);
        let expected = optimized.len();
        debug!(turns = turns.len(), optimized = expected, "merged adjacent turns");
        if let Some(e) = self.interrupted(&cancel, deadline, progress.step) {
            return progress.fail(e, Vec::new(), turns, expected);
        }

        progress.advance(PipelineStep::ResolvingVoices);
        let voices = match self.registry.resolve_turns(&optimized) {
            Ok(voices) => voices,
            Err(e) => return progress.fail(e, Vec::new(), turns, expected),
        };
        if let Some(e) = self.interrupted(&cancel, deadline, progress.step) {
            return progress.fail(e, Vec::new(), turns, expected);
        }

        progress.advance(PipelineStep::Synthesizing {
            completed: 0,
            total: expected,
        });
        let (segments, result) = self
            .synthesize_all(&optimized, &voices, &mut progress, &cancel, deadline)
            .await;
        if let Err(e) = result {
            return progress.fail(e, segments, turns, expected);
        }
        if let Some(e) = self.interrupted(&cancel, deadline, progress.step) {
            return progress.fail(e, segments, turns, expected);
        }

        progress.advance(PipelineStep::Assembling);
        let orders: Vec<usize> = optimized.iter().map(|t| t.order).collect();
        let asset = match self.assembler.assemble(&segments, &orders, &turns) {
            Ok(asset) => asset,
            Err(e) => return progress.fail(e, segments, turns, expected),
        };
        // Assembly runs to completion once started; the deadline still applies to its result.
        if let Some(e) = self.interrupted(&cancel, deadline, progress.step) {
            return progress.fail(e, segments, turns, expected);
        }

        progress.advance(PipelineStep::Complete);
        info!(
            segments = asset.segments.len(),
            duration_secs = asset.total_duration_seconds,
            "pipeline run complete"
        );
        RunOutcome::Complete(asset)
    }

    /// Synthesize every turn with at most `max_concurrency` calls in flight.
    ///
    /// When a turn fails no further turns are started. Calls for earlier
    /// turns still in flight are awaited and calls for later turns are
    /// stopped, so the segments returned with the error are exactly the
    /// turns before the earliest failure. Cancellation and the deadline end
    /// the run at once with whatever has finished.
    async fn synthesize_all(
        &self,
        turns: &[OptimizedTurn],
        voices: &[VoiceProfile],
        progress: &mut RunProgress<'_>,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> (Vec<AudioSegment>, Result<(), PipelineError>) {
        let total = turns.len();
        let callback = self.callback.as_ref();
        let on_retry = move |notice: &RetryNotice| {
            if let Some(callback) = callback {
                callback(PipelineEvent::Retrying(notice.clone()));
            }
        };

        let stops: Vec<CancellationToken> = (0..total).map(|_| cancel.child_token()).collect();
        let launch = |index: usize| {
            let stop = stops[index].clone();
            let call = self.synthesizer.synthesize(&turns[index], &voices[index], on_retry);
            async move {
                tokio::select! {
                    _ = stop.cancelled() => (index, None),
                    result = call => (index, Some(result)),
                }
            }
        };

        let expiry = async move {
            match deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(expiry);

        let mut in_flight = FuturesUnordered::new();
        let mut next_index = 0;
        let mut completed = 0;
        // Index of the earliest failed turn and its error.
        let mut failure: Option<(usize, PipelineError)> = None;
        let mut segments = Vec::with_capacity(total);

        loop {
            while failure.is_none()
                && next_index < total
                && in_flight.len() < self.max_concurrency
            {
                in_flight.push(launch(next_index));
                next_index += 1;
            }

            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return (segments, Err(PipelineError::Cancelled { step: progress.step }));
                }
                _ = &mut expiry => {
                    let timeout = self.run_timeout.unwrap_or_default();
                    return (segments, Err(PipelineError::TimedOut(timeout)));
                }
                next = in_flight.next() => next,
            };
            let Some((index, result)) = next else {
                break;
            };
            let after_failure = failure.as_ref().is_some_and(|(failed, _)| index > *failed);

            match result {
                None => {}
                Some(Ok(segment)) if after_failure => {
                    debug!(order = segment.order, "dropping segment after an earlier failure");
                }
                Some(Ok(segment)) => {
                    progress.emit(PipelineEvent::SegmentReady {
                        order: segment.order,
                        speaker: segment.speaker.clone(),
                        attempts: segment.attempts,
                        duration_seconds: segment.duration_seconds(),
                    });
                    segments.push(segment);
                    completed += 1;
                    progress.advance(PipelineStep::Synthesizing { completed, total });
                }
                Some(Err(_)) if after_failure => {}
                Some(Err(e)) => {
                    debug!(order = turns[index].order, error = %e, "turn failed, stopping later turns");
                    for stop in &stops[index + 1..] {
                        stop.cancel();
                    }
                    let failed_order = turns[index].order;
                    segments.retain(|s| s.order < failed_order);
                    failure = Some((index, e));
                }
            }
        }

        match failure {
            Some((_, e)) => (segments, Err(e)),
            None => (segments, Ok(())),
        }
    }

    /// Cancellation or timeout noticed between steps.
    fn interrupted(
        &self,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
        step: PipelineStep,
    ) -> Option<PipelineError> {
        if cancel.is_cancelled() {
            return Some(PipelineError::Cancelled { step });
        }
        match (deadline, self.run_timeout) {
            (Some(deadline), Some(timeout)) if Instant::now() >= deadline => {
                Some(PipelineError::TimedOut(timeout))
            }
            _ => None,
        }
    }
}
