//! Viseme timelines
//!
//! A timeline is a sorted list of non-overlapping mouth cues measured in
//! seconds from the start of playback.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Mouth shape symbol (Rhubarb-style A..H plus X for closed)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum VisemeSymbol {
    A,
    B,
    C,
    D,
    E,
    F,
    G,
    H,
    #[default]
    X,
}

impl VisemeSymbol {
    pub const ALL: [VisemeSymbol; 9] = [
        VisemeSymbol::A,
        VisemeSymbol::B,
        VisemeSymbol::C,
        VisemeSymbol::D,
        VisemeSymbol::E,
        VisemeSymbol::F,
        VisemeSymbol::G,
        VisemeSymbol::H,
        VisemeSymbol::X,
    ];

    /// Parse a cue value. Anything unrecognised is the closed pose.
    pub fn from_symbol(s: &str) -> Self {
        match s.trim() {
            "A" | "a" => VisemeSymbol::A,
            "B" | "b" => VisemeSymbol::B,
            "C" | "c" => VisemeSymbol::C,
            "D" | "d" => VisemeSymbol::D,
            "E" | "e" => VisemeSymbol::E,
            "F" | "f" => VisemeSymbol::F,
            "G" | "g" => VisemeSymbol::G,
            "H" | "h" => VisemeSymbol::H,
            _ => VisemeSymbol::X,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VisemeSymbol::A => "A",
            VisemeSymbol::B => "B",
            VisemeSymbol::C => "C",
            VisemeSymbol::D => "D",
            VisemeSymbol::E => "E",
            VisemeSymbol::F => "F",
            VisemeSymbol::G => "G",
            VisemeSymbol::H => "H",
            VisemeSymbol::X => "X",
        }
    }
}

impl fmt::Display for VisemeSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single mouth cue
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisemeCue {
    /// Start time in seconds
    pub start: f64,
    /// End time in seconds (inclusive)
    pub end: f64,
    pub symbol: VisemeSymbol,
}

impl VisemeCue {
    pub fn new(start: f64, end: f64, symbol: VisemeSymbol) -> Self {
        Self { start, end, symbol }
    }

    /// Check if this cue covers the given time
    pub fn contains(&self, t: f64) -> bool {
        self.start <= t && t <= self.end
    }

    fn is_valid(&self) -> bool {
        self.start.is_finite() && self.end.is_finite() && self.start >= 0.0 && self.end >= self.start
    }
}

/// Errors raised while building a timeline
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TimelineError {
    #[error("cue at {next_start:.3}s overlaps cue ending at {prev_end:.3}s")]
    Overlap { prev_end: f64, next_start: f64 },
    #[error("invalid total duration {0}")]
    InvalidDuration(f64),
}

/// Ordered, non-overlapping mouth cues for one utterance
#[derive(Debug, Clone, PartialEq)]
pub struct VisemeTimeline {
    total_duration: f64,
    cues: Vec<VisemeCue>,
}

impl VisemeTimeline {
    /// Build a timeline from unordered cues.
    ///
    /// Cues with non-finite, negative or inverted bounds are dropped. The
    /// remainder is sorted by start time; any overlap rejects the timeline.
    pub fn new(total_duration: f64, cues: Vec<VisemeCue>) -> Result<Self, TimelineError> {
        if !total_duration.is_finite() || total_duration < 0.0 {
            return Err(TimelineError::InvalidDuration(total_duration));
        }

        let before = cues.len();
        let mut cues: Vec<VisemeCue> = cues.into_iter().filter(VisemeCue::is_valid).collect();
        if cues.len() != before {
            log::debug!("Dropped {} invalid viseme cues", before - cues.len());
        }
        cues.sort_by(|a, b| a.start.total_cmp(&b.start));

        for pair in cues.windows(2) {
            if pair[1].start < pair[0].end {
                return Err(TimelineError::Overlap {
                    prev_end: pair[0].end,
                    next_start: pair[1].start,
                });
            }
        }

        Ok(Self {
            total_duration,
            cues,
        })
    }

    /// Built-in demo timeline used when speech arrives without one
    pub fn fallback() -> Self {
        use VisemeSymbol::*;
        let cues = [
            (0.1, 0.3, A),
            (0.4, 0.6, B),
            (0.7, 0.9, C),
            (1.0, 1.2, D),
            (1.3, 1.5, E),
            (1.6, 1.8, F),
            (1.9, 2.1, G),
            (2.2, 2.5, X),
        ]
        .into_iter()
        .map(|(s, e, v)| VisemeCue::new(s, e, v))
        .collect();

        Self {
            total_duration: 3.0,
            cues,
        }
    }

    /// Declared length of the utterance in seconds
    pub fn total_duration(&self) -> f64 {
        self.total_duration
    }

    pub fn cues(&self) -> &[VisemeCue] {
        &self.cues
    }

    pub fn is_empty(&self) -> bool {
        self.cues.is_empty()
    }

    /// Find the cue active at `t` seconds.
    ///
    /// Past the declared total duration nothing is active, even if a cue's
    /// end runs beyond it.
    pub fn cue_at(&self, t: f64) -> Option<&VisemeCue> {
        if t < 0.0 || t > self.total_duration {
            return None;
        }
        self.cues.iter().find(|cue| cue.contains(t))
    }

    /// Same as [`cue_at`](Self::cue_at) for an elapsed playback duration
    pub fn cue_at_elapsed(&self, elapsed: Duration) -> Option<&VisemeCue> {
        self.cue_at(elapsed.as_secs_f64())
    }
}
