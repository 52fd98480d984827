//! Built-in speaker line-ups per podcast style.
//!
//! Each style names the speakers a script generator writes for and the
//! voice each one is read with, so a script can be rendered without a
//! configuration file.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::voice::{VoiceRegistry, VoiceSettings};

/// Aria: female, expressive.
pub const VOICE_ARIA: &str = "9BWtsMINqrJLrRacOk9x";
/// Paul: male, friendly.
pub const VOICE_PAUL: &str = "IKne3meq5aSn9XLyUdCD";

/// A speaker the script generator may write lines for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakerPreset {
    pub name: String,
    pub role: String,
    pub personality: String,
    pub voice_id: String,
}

impl SpeakerPreset {
    fn new(name: &str, role: &str, personality: &str, voice_id: &str) -> Self {
        Self {
            name: name.to_string(),
            role: role.to_string(),
            personality: personality.to_string(),
            voice_id: voice_id.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PodcastStyle {
    Educational,
    Casual,
    Debate,
}

impl PodcastStyle {
    pub fn name(&self) -> &str {
        match self {
            PodcastStyle::Educational => "educational",
            PodcastStyle::Casual => "casual",
            PodcastStyle::Debate => "debate",
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            PodcastStyle::Educational => "Educational (expert and curious learner)",
            PodcastStyle::Casual => "Casual (two co-hosts)",
            PodcastStyle::Debate => "Debate (advocate and challenger)",
        }
    }

    /// Speakers in the order the generator introduces them.
    pub fn speakers(&self) -> Vec<SpeakerPreset> {
        match self {
            PodcastStyle::Educational => vec![
                SpeakerPreset::new(
                    "Alex",
                    "Host/Expert",
                    "Knowledgeable, enthusiastic, clear explainer",
                    VOICE_ARIA,
                ),
                SpeakerPreset::new(
                    "Jordan",
                    "Curious Learner",
                    "Curious, asks great questions, relatable",
                    VOICE_PAUL,
                ),
            ],
            PodcastStyle::Casual => vec![
                SpeakerPreset::new(
                    "Sam",
                    "Co-host",
                    "Laid-back, conversational, storyteller",
                    VOICE_ARIA,
                ),
                SpeakerPreset::new(
                    "Riley",
                    "Co-host",
                    "Energetic, witty, brings fun facts",
                    VOICE_PAUL,
                ),
            ],
            PodcastStyle::Debate => vec![
                SpeakerPreset::new(
                    "Morgan",
                    "Advocate",
                    "Analytical, presents one perspective",
                    VOICE_ARIA,
                ),
                SpeakerPreset::new(
                    "Taylor",
                    "Challenger",
                    "Critical thinker, questions assumptions",
                    VOICE_PAUL,
                ),
            ],
        }
    }

    /// Voice settings keyed by speaker name.
    pub fn voices(&self) -> BTreeMap<String, VoiceSettings> {
        self.speakers()
            .into_iter()
            .map(|s| (s.name, VoiceSettings::new(s.voice_id)))
            .collect()
    }

    /// A registry containing just this style's speakers.
    pub fn registry(&self) -> Result<VoiceRegistry, PipelineError> {
        VoiceRegistry::new(self.voices())
    }
}

/// Get a style by name.
pub fn get_style(name: &str) -> Option<PodcastStyle> {
    match name.to_lowercase().as_str() {
        "educational" => Some(PodcastStyle::Educational),
        "casual" => Some(PodcastStyle::Casual),
        "debate" => Some(PodcastStyle::Debate),
        _ => None,
    }
}

/// List all available style names.
pub fn available_styles() -> Vec<&'static str> {
    vec!["educational", "casual", "debate"]
}
