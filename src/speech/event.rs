//! Speech event ingress
//!
//! Validates inbound speech payloads and normalizes them into
//! [`SpeechItem`]s ready for the playback queue. A payload is either fully
//! accepted or rejected; nothing partially formed reaches the queue.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use super::types::{CharacterId, ExpressionId};
use super::viseme::{VisemeCue, VisemeSymbol, VisemeTimeline};
use crate::sound::device::AudioSource;
use crate::sound::probe;
use crate::sound::resources::TransientAudioRegistry;

/// Reasons a speech payload is dropped
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IngressError {
    #[error("speech event has no character id")]
    MissingCharacter,
    #[error("unknown character '{0}'")]
    UnknownCharacter(String),
    #[error("speech event has no audio")]
    MissingAudio,
    #[error("inline audio is not valid base64: {0}")]
    InvalidAudioEncoding(String),
}

pub type IngressResult<T> = Result<T, IngressError>;

/// Mouth cue as it arrives on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMouthCue {
    pub start: f64,
    pub end: f64,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawLipSyncMetadata {
    #[serde(default)]
    pub duration: Option<f64>,
}

/// Lip-sync block as it arrives on the wire
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLipSync {
    #[serde(default)]
    pub metadata: RawLipSyncMetadata,
    #[serde(default)]
    pub mouth_cues: Vec<RawMouthCue>,
}

/// Unvalidated speech payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSpeechEvent {
    #[serde(default)]
    pub character_id: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_base64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lip_sync: Option<RawLipSync>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facial_expression: Option<String>,
    /// Explicit duration in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

/// Normalized speech, owned by the queue from enqueue to retirement
#[derive(Debug)]
pub struct SpeechItem {
    /// Monotonic id assigned at ingress
    pub id: u64,
    pub character: CharacterId,
    pub text: String,
    pub source: AudioSource,
    pub timeline: Option<VisemeTimeline>,
    pub expression: ExpressionId,
    /// Explicit or probed duration; the device may fill it in at load time
    pub duration: Option<Duration>,
}

/// Turns raw payloads into queue items
#[derive(Debug, Clone)]
pub struct SpeechIngress {
    registry: TransientAudioRegistry,
    next_id: u64,
}

impl SpeechIngress {
    pub fn new(registry: TransientAudioRegistry) -> Self {
        Self {
            registry,
            next_id: 0,
        }
    }

    pub fn registry(&self) -> &TransientAudioRegistry {
        &self.registry
    }

    /// Validate and normalize one payload
    pub fn normalize(&mut self, raw: RawSpeechEvent) -> IngressResult<SpeechItem> {
        let name = raw
            .character_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(IngressError::MissingCharacter)?;
        let character: CharacterId = name
            .parse()
            .map_err(|_| IngressError::UnknownCharacter(name.to_string()))?;

        let explicit = raw.duration.filter(|d| d.is_finite() && *d > 0.0).and_then(|d| {
            Duration::try_from_secs_f64(d)
                .inspect_err(|e| log::debug!("Ignoring duration {} for {}: {}", d, character, e))
                .ok()
        });

        // A fetchable reference wins over inline bytes
        let url = raw.audio_url.as_deref().map(str::trim).filter(|u| !u.is_empty());
        let (source, duration) = match url {
            Some(url) => (AudioSource::Url(url.to_string()), explicit),
            None => {
                let encoded = raw
                    .audio_base64
                    .as_deref()
                    .map(str::trim)
                    .filter(|b| !b.is_empty())
                    .ok_or(IngressError::MissingAudio)?;
                let bytes = decode_inline_audio(encoded)?;
                if bytes.is_empty() {
                    return Err(IngressError::MissingAudio);
                }
                let probed = if explicit.is_none() && probe::looks_like_wav(&bytes) {
                    match probe::probe_wav(&bytes) {
                        Ok(info) => Some(info.duration()),
                        Err(e) => {
                            log::debug!("Could not probe inline audio for {}: {}", character, e);
                            None
                        }
                    }
                } else {
                    None
                };
                let blob = self.registry.allocate(bytes);
                (AudioSource::Blob(blob), explicit.or(probed))
            }
        };

        let timeline = raw.lip_sync.and_then(|lip_sync| build_timeline(character, lip_sync));
        let expression = raw
            .facial_expression
            .as_deref()
            .map(ExpressionId::from_name)
            .unwrap_or_default();

        self.next_id += 1;
        Ok(SpeechItem {
            id: self.next_id,
            character,
            text: raw.text,
            source,
            timeline,
            expression,
            duration,
        })
    }
}

/// Decode base64 audio, accepting an optional `data:` URI prefix
pub fn decode_inline_audio(encoded: &str) -> IngressResult<Vec<u8>> {
    let payload = match encoded.strip_prefix("data:") {
        Some(rest) => rest
            .split_once(',')
            .map(|(_, data)| data)
            .ok_or_else(|| IngressError::InvalidAudioEncoding("malformed data URI".to_string()))?,
        None => encoded,
    };
    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| IngressError::InvalidAudioEncoding(e.to_string()))
}

fn build_timeline(character: CharacterId, lip_sync: RawLipSync) -> Option<VisemeTimeline> {
    let cues: Vec<VisemeCue> = lip_sync
        .mouth_cues
        .iter()
        .map(|c| VisemeCue::new(c.start, c.end, VisemeSymbol::from_symbol(&c.value)))
        .collect();
    let total = lip_sync
        .metadata
        .duration
        .unwrap_or_else(|| cues.iter().map(|c| c.end).fold(0.0, f64::max));

    match VisemeTimeline::new(total, cues) {
        Ok(timeline) => Some(timeline),
        Err(e) => {
            log::warn!("Dropping lip-sync timeline for {}: {}", character, e);
            None
        }
    }
}
