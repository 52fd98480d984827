//! Speaker voice profiles and the registry they are resolved from.
//!
//! The registry is built once at startup and shared read-only across runs.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::optimizer::OptimizedTurn;

fn default_stability() -> f32 {
    0.5
}

fn default_similarity() -> f32 {
    0.75
}

/// Synthesis parameters configured for a speaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceSettings {
    /// Opaque voice reference understood by the speech service.
    pub voice_id: String,
    #[serde(default = "default_stability")]
    pub stability: f32,
    #[serde(default = "default_similarity")]
    pub similarity: f32,
}

impl VoiceSettings {
    pub fn new(voice_id: impl Into<String>) -> Self {
        Self {
            voice_id: voice_id.into(),
            stability: default_stability(),
            similarity: default_similarity(),
        }
    }

    pub fn with_stability(mut self, stability: f32) -> Self {
        self.stability = stability;
        self
    }

    pub fn with_similarity(mut self, similarity: f32) -> Self {
        self.similarity = similarity;
        self
    }

    fn validate(&self, speaker: &str) -> Result<(), PipelineError> {
        if self.voice_id.trim().is_empty() {
            return Err(PipelineError::ConfigError(format!(
                "Voice for '{}' has an empty voice_id",
                speaker
            )));
        }
        for (name, value) in [("stability", self.stability), ("similarity", self.similarity)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(PipelineError::ConfigError(format!(
                    "Voice for '{}' has {} {} outside [0, 1]",
                    speaker, name, value
                )));
            }
        }
        Ok(())
    }
}

/// Voice bound to a speaker for the duration of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceProfile {
    pub speaker: String,
    pub voice_id: String,
    pub stability: f32,
    pub similarity: f32,
}

impl VoiceProfile {
    fn from_settings(speaker: &str, settings: &VoiceSettings) -> Self {
        Self {
            speaker: speaker.to_string(),
            voice_id: settings.voice_id.clone(),
            stability: settings.stability,
            similarity: settings.similarity,
        }
    }
}

/// Immutable speaker → voice mapping.
#[derive(Debug, Clone, Default)]
pub struct VoiceRegistry {
    voices: BTreeMap<String, VoiceSettings>,
    fallback: Option<VoiceSettings>,
}

impl VoiceRegistry {
    /// Build a registry, rejecting out-of-range settings.
    pub fn new(voices: BTreeMap<String, VoiceSettings>) -> Result<Self, PipelineError> {
        for (speaker, settings) in &voices {
            settings.validate(speaker)?;
        }
        Ok(Self {
            voices,
            fallback: None,
        })
    }

    /// Use `fallback` for speakers without an entry instead of failing.
    pub fn with_fallback(mut self, fallback: VoiceSettings) -> Result<Self, PipelineError> {
        fallback.validate("fallback")?;
        self.fallback = Some(fallback);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    /// Configured speaker names, sorted.
    pub fn speakers(&self) -> impl Iterator<Item = &str> {
        self.voices.keys().map(String::as_str)
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    /// Resolve a single speaker.
    pub fn resolve(&self, speaker: &str) -> Result<VoiceProfile, PipelineError> {
        if let Some(settings) = self.voices.get(speaker) {
            return Ok(VoiceProfile::from_settings(speaker, settings));
        }

        match &self.fallback {
            Some(settings) => {
                warn!(speaker, voice_id = %settings.voice_id, "speaker has no voice, using fallback");
                Ok(VoiceProfile::from_settings(speaker, settings))
            }
            None => Err(PipelineError::UnresolvedSpeaker {
                speaker: speaker.to_string(),
                order: None,
            }),
        }
    }

    /// Resolve the voice for every turn, looking each distinct speaker up once.
    ///
    /// The result is aligned with `turns`.
    pub fn resolve_turns(
        &self,
        turns: &[OptimizedTurn],
    ) -> Result<Vec<VoiceProfile>, PipelineError> {
        let mut resolved: HashMap<&str, VoiceProfile> = HashMap::new();
        let mut profiles = Vec::with_capacity(turns.len());

        for turn in turns {
            let profile = match resolved.get(turn.speaker.as_str()) {
                Some(profile) => profile.clone(),
                None => {
                    let profile = self.resolve(&turn.speaker).map_err(|e| match e {
                        PipelineError::UnresolvedSpeaker { speaker, .. } => {
                            PipelineError::UnresolvedSpeaker {
                                speaker,
                                order: Some(turn.order),
                            }
                        }
                        other => other,
                    })?;
                    debug!(speaker = %turn.speaker, voice_id = %profile.voice_id, "resolved voice");
                    resolved.insert(turn.speaker.as_str(), profile.clone());
                    profile
                }
            };
            profiles.push(profile);
        }

        Ok(profiles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::optimize_turns;
    use crate::script::parse_script;

    fn registry() -> VoiceRegistry {
        let mut voices = BTreeMap::new();
        voices.insert("A".to_string(), VoiceSettings::new("voice-a"));
        voices.insert(
            "B".to_string(),
            VoiceSettings::new("voice-b")
                .with_stability(0.3)
                .with_similarity(0.9),
        );
        VoiceRegistry::new(voices).unwrap()
    }

    #[test]
    fn test_resolve_known_speaker() {
        let profile = registry().resolve("B").unwrap();
        assert_eq!(profile.speaker, "B");
        assert_eq!(profile.voice_id, "voice-b");
        assert!((profile.stability - 0.3).abs() < f32::EPSILON);
        assert!((profile.similarity - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn test_unknown_speaker_fails() {
        let err = registry().resolve("C").unwrap_err();
        assert!(matches!(err, PipelineError::UnresolvedSpeaker { ref speaker, .. } if speaker == "C"));
    }

    #[test]
    fn test_fallback_voice_is_explicit() {
        let registry = registry()
            .with_fallback(VoiceSettings::new("narrator"))
            .unwrap();
        let profile = registry.resolve("C").unwrap();
        assert_eq!(profile.speaker, "C");
        assert_eq!(profile.voice_id, "narrator");
    }

    #[test]
    fn test_resolve_turns_reports_first_order() {
        let turns = optimize_turns(&parse_script("[A]: hi\n[B]: yo\n[C]: hey\n[C]: again").unwrap());
        let err = registry().resolve_turns(&turns).unwrap_err();
        match err {
            PipelineError::UnresolvedSpeaker { speaker, order } => {
                assert_eq!(speaker, "C");
                assert_eq!(order, Some(2));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_resolve_turns_aligned_with_input() {
        let turns = optimize_turns(&parse_script("[A]: 1\n[B]: 2\n[A]: 3").unwrap());
        let profiles = registry().resolve_turns(&turns).unwrap();
        let ids: Vec<&str> = profiles.iter().map(|p| p.voice_id.as_str()).collect();
        assert_eq!(ids, vec!["voice-a", "voice-b", "voice-a"]);
    }

    #[test]
    fn test_rejects_out_of_range_settings() {
        let mut voices = BTreeMap::new();
        voices.insert("A".to_string(), VoiceSettings::new("v").with_stability(1.5));
        assert!(matches!(
            VoiceRegistry::new(voices),
            Err(PipelineError::ConfigError(_))
        ));

        let mut voices = BTreeMap::new();
        voices.insert("A".to_string(), VoiceSettings::new("  "));
        assert!(VoiceRegistry::new(voices).is_err());

        assert!(
            registry()
                .with_fallback(VoiceSettings::new("x").with_similarity(-0.1))
                .is_err()
        );
    }

    #[test]
    fn test_settings_defaults_from_toml() {
        let settings: VoiceSettings = toml::from_str(r#"voice_id = "abc""#).unwrap();
        assert_eq!(settings.voice_id, "abc");
        assert!((settings.stability - 0.5).abs() < f32::EPSILON);
        assert!((settings.similarity - 0.75).abs() < f32::EPSILON);
    }
}
