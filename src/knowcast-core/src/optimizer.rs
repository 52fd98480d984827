//! Merges consecutive same-speaker turns so each one costs a single TTS call.

use serde::{Deserialize, Serialize};

use crate::script::Turn;

/// One or more adjacent turns by the same speaker, synthesized together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizedTurn {
    /// Order of the first merged turn.
    pub order: usize,
    pub speaker: String,
    /// Texts of the merged turns joined with a single space.
    pub text: String,
    /// How many script turns were merged into this one.
    pub turn_count: usize,
}

/// Fold runs of consecutive same-speaker turns into single requests.
pub fn optimize_turns(turns: &[Turn]) -> Vec<OptimizedTurn> {
    turns.iter().fold(Vec::new(), |mut merged, turn| {
        match merged.last_mut() {
            Some(last) if last.speaker == turn.speaker => {
                last.text.push(' ');
                last.text.push_str(&turn.text);
                last.turn_count += 1;
            }
            _ => merged.push(OptimizedTurn {
                order: turn.order,
                speaker: turn.speaker.clone(),
                text: turn.text.clone(),
                turn_count: 1,
            }),
        }
        merged
    })
}
