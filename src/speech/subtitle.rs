//! Subtitle typewriter
//!
//! Reveals the speaking character's line one character at a time, paced so
//! the full line appears within a fraction of the clip's duration. A new line
//! always restarts the reveal from scratch.

use std::time::{Duration, Instant};

use super::queue::SessionInfo;
use super::types::CharacterId;
use crate::config::TypewriterSettings;

/// Line being revealed or shown
#[derive(Debug, Clone, PartialEq)]
struct Line {
    item_id: u64,
    character: CharacterId,
    chars: Vec<char>,
}

#[derive(Debug, Clone, PartialEq)]
enum TypewriterState {
    Hidden,
    Revealing {
        line: Line,
        revealed: usize,
        char_delay: Duration,
        next_at: Instant,
    },
    /// Reveal finished or halted; `hide_at` set once the line is due to go
    Shown {
        line: Line,
        revealed: usize,
        hide_at: Option<Instant>,
    },
}

/// What the UI should draw this frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleView {
    pub item_id: u64,
    pub character: CharacterId,
    /// Revealed text, truncated for display when the profile asks for it
    pub text: String,
    pub revealed: usize,
    pub total: usize,
}

impl SubtitleView {
    /// Whether the reveal cursor should still be drawn
    pub fn is_typing(&self) -> bool {
        self.revealed < self.total
    }
}

/// Per-character delay for a line of `len` characters
pub fn char_delay(settings: &TypewriterSettings, duration: Option<Duration>, len: usize) -> Duration {
    let min = Duration::from_millis(settings.min_char_delay_ms);
    if len == 0 {
        return min;
    }
    let duration = duration.unwrap_or(Duration::from_millis(settings.default_duration_ms));
    let typing_ms = duration.as_secs_f64() * 1000.0 * f64::from(settings.reveal_fraction);
    let per_char = Duration::from_micros((typing_ms * 1000.0 / len as f64).round() as u64);
    per_char.max(min)
}

#[derive(Debug, Clone)]
pub struct SubtitleTypewriter {
    settings: TypewriterSettings,
    enabled: bool,
    state: TypewriterState,
}

impl SubtitleTypewriter {
    pub fn new(settings: TypewriterSettings, enabled: bool) -> Self {
        Self {
            settings,
            enabled,
            state: TypewriterState::Hidden,
        }
    }

    pub fn settings(&self) -> &TypewriterSettings {
        &self.settings
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.state = TypewriterState::Hidden;
        }
    }

    /// Start revealing a newly started session's text, abandoning any reveal
    /// in flight
    pub fn begin(&mut self, session: &SessionInfo, now: Instant) {
        if !self.enabled {
            return;
        }
        let chars: Vec<char> = session.text.chars().collect();
        if chars.is_empty() {
            self.state = TypewriterState::Hidden;
            return;
        }
        let char_delay = char_delay(&self.settings, session.duration, chars.len());
        log::debug!(
            "Subtitle for item #{}: {} chars every {:?}",
            session.item_id,
            chars.len(),
            char_delay
        );
        self.state = TypewriterState::Revealing {
            line: Line {
                item_id: session.item_id,
                character: session.character,
                chars,
            },
            revealed: 0,
            char_delay,
            next_at: now + char_delay,
        };
    }

    /// Nobody is speaking any more. The reveal halts; the line is cleared now
    /// or after the profile's linger.
    pub fn end(&mut self, now: Instant) {
        let state = std::mem::replace(&mut self.state, TypewriterState::Hidden);
        self.state = match (state, self.settings.linger_ms) {
            (TypewriterState::Hidden, _) | (_, None) => TypewriterState::Hidden,
            (TypewriterState::Revealing { line, revealed, .. }, Some(linger)) => {
                TypewriterState::Shown {
                    line,
                    revealed,
                    hide_at: Some(now + Duration::from_millis(linger)),
                }
            }
            (
                TypewriterState::Shown {
                    line,
                    revealed,
                    hide_at,
                },
                Some(linger),
            ) => TypewriterState::Shown {
                line,
                revealed,
                hide_at: Some(hide_at.unwrap_or(now + Duration::from_millis(linger))),
            },
        };
    }

    /// Reveal every character that has come due by `now`
    pub fn advance(&mut self, now: Instant) {
        let state = std::mem::replace(&mut self.state, TypewriterState::Hidden);
        self.state = match state {
            TypewriterState::Revealing {
                line,
                mut revealed,
                char_delay,
                mut next_at,
            } => {
                let total = line.chars.len();
                while revealed < total && now >= next_at {
                    revealed += 1;
                    next_at += char_delay;
                }
                if revealed >= total {
                    // Finished at the moment the last character came due
                    let done_at = next_at - char_delay;
                    let hide_at = self
                        .settings
                        .linger_ms
                        .map(|linger| done_at + Duration::from_millis(linger));
                    TypewriterState::Shown {
                        line,
                        revealed: total,
                        hide_at,
                    }
                } else {
                    TypewriterState::Revealing {
                        line,
                        revealed,
                        char_delay,
                        next_at,
                    }
                }
            }
            TypewriterState::Shown { hide_at: Some(at), .. } if now >= at => TypewriterState::Hidden,
            other => other,
        };
    }

    pub fn is_visible(&self) -> bool {
        self.view().is_some()
    }

    /// Current display, `None` when nothing is shown
    pub fn view(&self) -> Option<SubtitleView> {
        let (line, revealed) = match &self.state {
            TypewriterState::Hidden => return None,
            TypewriterState::Revealing { line, revealed, .. } => (line, *revealed),
            TypewriterState::Shown { line, revealed, .. } => (line, *revealed),
        };
        if revealed == 0 {
            return None;
        }
        Some(SubtitleView {
            item_id: line.item_id,
            character: line.character,
            text: self.display_text(&line.chars[..revealed]),
            revealed,
            total: line.chars.len(),
        })
    }

    fn display_text(&self, chars: &[char]) -> String {
        match self.settings.max_display_chars {
            Some(max) if chars.len() > max => {
                let keep = max.saturating_sub(3);
                let mut text: String = chars[..keep].iter().collect();
                text.push_str("...");
                text
            }
            _ => chars.iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speech::types::ExpressionId;
    use rstest::rstest;

    fn session(id: u64, text: &str, duration_ms: Option<u64>) -> SessionInfo {
        SessionInfo {
            item_id: id,
            character: CharacterId::Grok,
            text: text.to_string(),
            expression: ExpressionId::Neutral,
            timeline: None,
            duration: duration_ms.map(Duration::from_millis),
            started_at: Instant::now(),
        }
    }

    #[rstest]
    #[case(100, Some(5000), 40)]
    #[case(100, Some(1000), 30)]
    #[case(10, None, 240)]
    #[case(0, Some(5000), 30)]
    fn test_char_delay_desktop(#[case] len: usize, #[case] duration_ms: Option<u64>, #[case] expected_ms: u64) {
        let delay = char_delay(
            &TypewriterSettings::desktop(),
            duration_ms.map(Duration::from_millis),
            len,
        );
        assert_eq!(delay, Duration::from_millis(expected_ms));
    }

    #[test]
    fn test_char_delay_mobile_floor() {
        let delay = char_delay(&TypewriterSettings::mobile(), Some(Duration::from_millis(1000)), 100);
        assert_eq!(delay, Duration::from_millis(20));
    }

    #[test]
    fn test_reveals_one_char_per_delay() {
        let t0 = Instant::now();
        let mut tw = SubtitleTypewriter::new(TypewriterSettings::desktop(), true);
        // 4 chars over 0.8 * 500ms = 100ms each
        tw.begin(&session(1, "abcd", Some(500)), t0);
        tw.advance(t0 + Duration::from_millis(50));
        assert!(tw.view().is_none());
        tw.advance(t0 + Duration::from_millis(100));
        assert_eq!(tw.view().unwrap().text, "a");
        tw.advance(t0 + Duration::from_millis(250));
        let view = tw.view().unwrap();
        assert_eq!(view.text, "ab");
        assert!(view.is_typing());
    }

    #[test]
    fn test_never_overruns() {
        let t0 = Instant::now();
        let mut tw = SubtitleTypewriter::new(TypewriterSettings::desktop(), true);
        tw.begin(&session(1, "héllo", Some(500)), t0);
        tw.advance(t0 + Duration::from_secs(60));
        let view = tw.view().unwrap();
        assert_eq!(view.text, "héllo");
        assert_eq!(view.revealed, 5);
        assert!(!view.is_typing());
        tw.advance(t0 + Duration::from_secs(120));
        assert_eq!(tw.view().unwrap().revealed, 5);
    }

    #[test]
    fn test_new_line_restarts() {
        let t0 = Instant::now();
        let mut tw = SubtitleTypewriter::new(TypewriterSettings::desktop(), true);
        tw.begin(&session(1, "first line", Some(1000)), t0);
        tw.advance(t0 + Duration::from_millis(500));
        assert!(tw.view().is_some());

        let t1 = t0 + Duration::from_millis(500);
        tw.begin(&session(2, "second", Some(1000)), t1);
        assert!(tw.view().is_none());
        tw.advance(t1 + Duration::from_secs(5));
        let view = tw.view().unwrap();
        assert_eq!(view.item_id, 2);
        assert_eq!(view.text, "second");
    }

    #[test]
    fn test_desktop_clears_when_speech_ends() {
        let t0 = Instant::now();
        let mut tw = SubtitleTypewriter::new(TypewriterSettings::desktop(), true);
        tw.begin(&session(1, "hello", Some(500)), t0);
        tw.advance(t0 + Duration::from_millis(200));
        tw.end(t0 + Duration::from_millis(200));
        assert!(!tw.is_visible());
    }

    #[test]
    fn test_mobile_lingers_then_clears() {
        let t0 = Instant::now();
        let mut tw = SubtitleTypewriter::new(TypewriterSettings::mobile(), true);
        tw.begin(&session(1, "hello", Some(5000)), t0);
        tw.advance(t0 + Duration::from_secs(1));
        let halted = tw.view().unwrap();
        let t_end = t0 + Duration::from_secs(1);
        tw.end(t_end);
        tw.advance(t_end + Duration::from_millis(1999));
        assert_eq!(tw.view(), Some(halted));
        tw.advance(t_end + Duration::from_millis(2000));
        assert!(!tw.is_visible());
    }

    #[test]
    fn test_mobile_truncates_long_lines() {
        let t0 = Instant::now();
        let mut tw = SubtitleTypewriter::new(TypewriterSettings::mobile(), true);
        let text = "x".repeat(80);
        tw.begin(&session(1, &text, Some(1000)), t0);
        tw.advance(t0 + Duration::from_millis(1600));
        let view = tw.view().unwrap();
        assert_eq!(view.revealed, 80);
        assert_eq!(view.text.chars().count(), 60);
        assert!(view.text.ends_with("..."));
    }

    #[test]
    fn test_disabled_shows_nothing() {
        let t0 = Instant::now();
        let mut tw = SubtitleTypewriter::new(TypewriterSettings::desktop(), false);
        tw.begin(&session(1, "hello", Some(500)), t0);
        tw.advance(t0 + Duration::from_secs(1));
        assert!(tw.view().is_none());
    }
}
