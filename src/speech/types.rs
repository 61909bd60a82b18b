//! Core identifiers shared by the presentation pipeline

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Reference frame rate the per-frame tunables were authored against
pub const REFERENCE_FPS: f32 = 60.0;

/// A speaking character on stage.
///
/// The roster is closed; adding a character means adding a variant here and
/// a default expression in the config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CharacterId {
    Claude,
    Gpt,
    Grok,
}

impl CharacterId {
    /// Every character, in display order
    pub const ALL: [CharacterId; 3] = [CharacterId::Claude, CharacterId::Gpt, CharacterId::Grok];

    /// Wire name of the character
    pub fn as_str(&self) -> &'static str {
        match self {
            CharacterId::Claude => "claude",
            CharacterId::Gpt => "gpt",
            CharacterId::Grok => "grok",
        }
    }

    /// Human readable name used by subtitles
    pub fn display_name(&self) -> &'static str {
        match self {
            CharacterId::Claude => "Claude",
            CharacterId::Gpt => "ChatGPT",
            CharacterId::Grok => "Grok",
        }
    }

    /// Subtitle accent colour as `#RRGGBB`
    pub fn accent_color(&self) -> &'static str {
        match self {
            CharacterId::Claude => "#FF6B35",
            CharacterId::Gpt => "#00D2FF",
            CharacterId::Grok => "#FFD700",
        }
    }

    /// Expression a character wears before it has ever spoken
    pub fn default_expression(&self) -> ExpressionId {
        match self {
            CharacterId::Claude => ExpressionId::Thinking,
            CharacterId::Gpt => ExpressionId::Happy,
            CharacterId::Grok => ExpressionId::Mischievous,
        }
    }
}

impl fmt::Display for CharacterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a character name is not on the roster
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown character '{0}'")]
pub struct UnknownCharacter(pub String);

impl FromStr for CharacterId {
    type Err = UnknownCharacter;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "claude" => Ok(CharacterId::Claude),
            "gpt" | "chatgpt" => Ok(CharacterId::Gpt),
            "grok" => Ok(CharacterId::Grok),
            _ => Err(UnknownCharacter(s.to_string())),
        }
    }
}

/// Facial expression requested alongside a speech event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpressionId {
    #[default]
    Neutral,
    Smile,
    Happy,
    Sad,
    Angry,
    Surprised,
    Thinking,
    Mischievous,
}

impl ExpressionId {
    /// Parse a wire expression name. Unknown names fall back to neutral.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "smile" => ExpressionId::Smile,
            "happy" => ExpressionId::Happy,
            "sad" => ExpressionId::Sad,
            "angry" => ExpressionId::Angry,
            "surprised" => ExpressionId::Surprised,
            "thinking" => ExpressionId::Thinking,
            "mischievous" => ExpressionId::Mischievous,
            "neutral" | "" => ExpressionId::Neutral,
            other => {
                log::debug!("Unknown expression '{}', using neutral", other);
                ExpressionId::Neutral
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExpressionId::Neutral => "neutral",
            ExpressionId::Smile => "smile",
            ExpressionId::Happy => "happy",
            ExpressionId::Sad => "sad",
            ExpressionId::Angry => "angry",
            ExpressionId::Surprised => "surprised",
            ExpressionId::Thinking => "thinking",
            ExpressionId::Mischievous => "mischievous",
        }
    }

    pub fn is_neutral(&self) -> bool {
        *self == ExpressionId::Neutral
    }
}

impl fmt::Display for ExpressionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
