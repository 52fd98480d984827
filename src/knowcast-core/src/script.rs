//! Dialogue script parsing.
//!
//! A script is plain text with one turn per line in the form
//! `[SpeakerName]: dialogue text`. Anything else is ignored.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

static TURN_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*\[([^\]]+)\]\s*:(.*)$").expect("turn line pattern compiles")
});

/// One speaker's line at a fixed position in the script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// Zero-based position among the accepted lines of the script.
    pub order: usize,
    /// Speaker label as written between the brackets.
    pub speaker: String,
    /// Dialogue text, trimmed. Inline cues such as `[curious]` are kept.
    pub text: String,
}

/// Parse a dialogue script into ordered turns.
///
/// Lines that do not match `[Speaker]: text`, or whose speaker or text is
/// blank, are dropped silently.
pub fn parse_script(script: &str) -> Result<Vec<Turn>, PipelineError> {
    let turns: Vec<Turn> = script
        .lines()
        .filter_map(parse_line)
        .enumerate()
        .map(|(order, (speaker, text))| Turn {
            order,
            speaker,
            text,
        })
        .collect();

    if turns.is_empty() {
        return Err(PipelineError::EmptyScript);
    }

    Ok(turns)
}

fn parse_line(line: &str) -> Option<(String, String)> {
    let captures = TURN_LINE.captures(line)?;
    let speaker = captures.get(1)?.as_str().trim();
    let text = captures.get(2)?.as_str().trim();

    if speaker.is_empty() || text.is_empty() {
        return None;
    }

    Some((speaker.to_string(), text.to_string()))
}

/// Write turns back out as script text, one `[Speaker]: text` line each.
pub fn render_script(turns: &[Turn]) -> String {
    turns
        .iter()
        .map(|t| format!("[{}]: {}", t.speaker, t.text))
        .collect::<Vec<_>>()
        .join("\n")
}
