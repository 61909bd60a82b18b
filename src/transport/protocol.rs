//! Wire messages exchanged with the speech backend
//!
//! Inbound: `{ "type", "sessionId", "data": { "message" }, "timestamp" }`.
//! Outbound: `{ "type": "join_session" | "request_response", "data", "timestamp" }`.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::speech::event::RawSpeechEvent;
use crate::speech::types::CharacterId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(String),
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InboundKind {
    NewMessage,
    SessionUpdate,
    AudioReady,
    Error,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InboundData {
    pub message: Option<RawSpeechEvent>,
    /// Human-readable text on `error` messages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    #[serde(rename = "type")]
    pub kind: InboundKind,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub data: InboundData,
    #[serde(default)]
    pub timestamp: Option<u64>,
}

impl InboundMessage {
    /// A `new_message` carrying one speech payload
    pub fn speech(session_id: &str, message: RawSpeechEvent, timestamp: Option<u64>) -> Self {
        Self {
            kind: InboundKind::NewMessage,
            session_id: Some(session_id.to_string()),
            data: InboundData {
                message: Some(message),
                error: None,
            },
            timestamp,
        }
    }
}

pub fn decode_inbound(text: &str) -> ProtocolResult<InboundMessage> {
    serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboundKind {
    JoinSession,
    RequestResponse,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundData {
    pub session_id: String,
    /// Absent means any character
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character_id: Option<CharacterId>,
}

/// Fire-and-forget command to the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    #[serde(rename = "type")]
    pub kind: OutboundKind,
    pub data: OutboundData,
    pub timestamp: u64,
}

impl OutboundMessage {
    pub fn join_session(session_id: &str) -> Self {
        Self {
            kind: OutboundKind::JoinSession,
            data: OutboundData {
                session_id: session_id.to_string(),
                character_id: None,
            },
            timestamp: unix_millis(),
        }
    }

    pub fn request_response(session_id: &str, character: Option<CharacterId>) -> Self {
        Self {
            kind: OutboundKind::RequestResponse,
            data: OutboundData {
                session_id: session_id.to_string(),
                character_id: character,
            },
            timestamp: unix_millis(),
        }
    }

    pub fn encode(&self) -> ProtocolResult<String> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

/// Milliseconds since the Unix epoch, 0 if the clock is before it
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
