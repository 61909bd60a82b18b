//! Per-character presentation state
//!
//! A pure projection of playback lifecycle events. Only the stage writes it,
//! by feeding it events; everything else reads.

use std::collections::BTreeMap;
use std::time::Duration;

use super::queue::PlaybackEvent;
use super::types::{CharacterId, ExpressionId};

/// What the renderer should show for one character
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CharacterPresentationState {
    pub is_speaking: bool,
    pub expression: ExpressionId,
    pub active_text: Option<String>,
    pub active_duration: Option<Duration>,
}

/// Presentation state of every character on stage
#[derive(Debug, Clone)]
pub struct PresentationBoard {
    states: BTreeMap<CharacterId, CharacterPresentationState>,
}

impl PresentationBoard {
    /// Board with every character silent, wearing its default expression
    pub fn new<F>(default_expression: F) -> Self
    where
        F: Fn(CharacterId) -> ExpressionId,
    {
        let states = CharacterId::ALL
            .iter()
            .map(|&c| {
                (
                    c,
                    CharacterPresentationState {
                        expression: default_expression(c),
                        ..Default::default()
                    },
                )
            })
            .collect();
        Self { states }
    }

    /// Apply one lifecycle event
    pub fn project(&mut self, event: &PlaybackEvent) {
        match event {
            PlaybackEvent::Started(info) => {
                for (character, state) in self.states.iter_mut() {
                    if *character == info.character {
                        state.is_speaking = true;
                        state.expression = info.expression;
                        state.active_text = Some(info.text.clone());
                        state.active_duration = info.duration;
                    } else {
                        state.is_speaking = false;
                        state.active_text = None;
                        state.active_duration = None;
                    }
                }
            }
            PlaybackEvent::Ended { character, .. } => {
                if let Some(state) = self.states.get_mut(character) {
                    state.is_speaking = false;
                    state.active_text = None;
                    state.active_duration = None;
                }
            }
            PlaybackEvent::Failed { .. } | PlaybackEvent::Cancelled { .. } => {}
        }
    }

    pub fn get(&self, character: CharacterId) -> Option<&CharacterPresentationState> {
        self.states.get(&character)
    }

    pub fn iter(&self) -> impl Iterator<Item = (CharacterId, &CharacterPresentationState)> {
        self.states.iter().map(|(&c, s)| (c, s))
    }

    /// The speaking character, if any
    pub fn speaker(&self) -> Option<CharacterId> {
        self.iter().find(|(_, s)| s.is_speaking).map(|(c, _)| c)
    }

    pub fn speaking_count(&self) -> usize {
        self.states.values().filter(|s| s.is_speaking).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speech::queue::{EndReason, SessionInfo};
    use std::time::Instant;

    fn started(id: u64, character: CharacterId) -> PlaybackEvent {
        PlaybackEvent::Started(SessionInfo {
            item_id: id,
            character,
            text: format!("line {}", id),
            expression: ExpressionId::Smile,
            timeline: None,
            duration: Some(Duration::from_secs(2)),
            started_at: Instant::now(),
        })
    }

    #[test]
    fn test_defaults() {
        let board = PresentationBoard::new(|c: CharacterId| c.default_expression());
        assert_eq!(board.speaking_count(), 0);
        assert_eq!(
            board.get(CharacterId::Gpt).map(|s| s.expression),
            Some(ExpressionId::Happy)
        );
    }

    #[test]
    fn test_start_forces_others_silent() {
        let mut board = PresentationBoard::new(|_| ExpressionId::Neutral);
        board.project(&started(1, CharacterId::Claude));
        board.project(&started(2, CharacterId::Grok));
        assert_eq!(board.speaking_count(), 1);
        assert_eq!(board.speaker(), Some(CharacterId::Grok));
        assert_eq!(board.get(CharacterId::Claude).unwrap().active_text, None);
        let grok = board.get(CharacterId::Grok).unwrap();
        assert_eq!(grok.active_text.as_deref(), Some("line 2"));
        assert_eq!(grok.active_duration, Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_end_keeps_expression() {
        let mut board = PresentationBoard::new(|_| ExpressionId::Neutral);
        board.project(&started(1, CharacterId::Gpt));
        board.project(&PlaybackEvent::Ended {
            item_id: 1,
            character: CharacterId::Gpt,
            reason: EndReason::Completed,
        });
        let gpt = board.get(CharacterId::Gpt).unwrap();
        assert!(!gpt.is_speaking);
        assert_eq!(gpt.expression, ExpressionId::Smile);
        assert_eq!(board.speaker(), None);
    }
}
