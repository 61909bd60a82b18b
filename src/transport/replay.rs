//! Transcript replay
//!
//! Plays back a newline-delimited JSON file of inbound messages as if a
//! backend were sending them. Messages are spaced by the gaps between their
//! `timestamp` fields, or by a fixed spacing when timestamps are missing.
//! Blank lines and `#` comments are skipped.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::Deserialize;

use super::link::{Connector, Poll, TransportError, TransportResult};

/// Longest wait honoured between two recorded messages
pub const MAX_REPLAY_GAP: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct Stamp {
    #[serde(default)]
    timestamp: Option<u64>,
}

#[derive(Debug, Clone)]
struct Frame {
    text: String,
    timestamp: Option<u64>,
}

#[derive(Debug)]
pub struct ReplayConnector {
    source: String,
    frames: VecDeque<Frame>,
    spacing: Duration,
    connected: bool,
    next_at: Option<Instant>,
    last_timestamp: Option<u64>,
    sent: Vec<String>,
}

impl ReplayConnector {
    pub fn from_path(path: &Path, spacing: Duration) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read transcript {}", path.display()))?;
        let mut connector = Self::from_lines(&text, spacing);
        connector.source = PathBuf::from(path).display().to_string();
        log::info!("Loaded {} messages from {}", connector.remaining(), connector.source);
        Ok(connector)
    }

    pub fn from_lines(text: &str, spacing: Duration) -> Self {
        let frames = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(|line| Frame {
                text: line.to_string(),
                timestamp: serde_json::from_str::<Stamp>(line).ok().and_then(|s| s.timestamp),
            })
            .collect();
        Self {
            source: "inline transcript".to_string(),
            frames,
            spacing,
            connected: false,
            next_at: None,
            last_timestamp: None,
            sent: Vec::new(),
        }
    }

    /// Messages not yet delivered
    pub fn remaining(&self) -> usize {
        self.frames.len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.frames.is_empty()
    }

    /// Commands the stage sent back, in order
    pub fn sent(&self) -> &[String] {
        &self.sent
    }

    fn gap_before(&self, frame: &Frame) -> Duration {
        match (self.last_timestamp, frame.timestamp) {
            (Some(prev), Some(next)) => Duration::from_millis(next.saturating_sub(prev)).min(MAX_REPLAY_GAP),
            _ => self.spacing,
        }
    }
}

impl Connector for ReplayConnector {
    fn describe(&self) -> String {
        format!("replay of {}", self.source)
    }

    fn connect(&mut self, now: Instant) -> TransportResult<()> {
        if self.frames.is_empty() {
            return Err(TransportError::Connect("transcript exhausted".to_string()));
        }
        self.connected = true;
        self.next_at = Some(now);
        self.last_timestamp = None;
        Ok(())
    }

    fn send(&mut self, text: &str) -> TransportResult<()> {
        if !self.connected {
            return Err(TransportError::Closed);
        }
        self.sent.push(text.to_string());
        Ok(())
    }

    fn poll(&mut self, now: Instant) -> TransportResult<Poll> {
        if !self.connected {
            return Err(TransportError::Closed);
        }
        let Some(next_at) = self.next_at else {
            return Ok(Poll::Idle);
        };
        if now < next_at {
            return Ok(Poll::Idle);
        }
        let Some(frame) = self.frames.pop_front() else {
            self.connected = false;
            return Ok(Poll::Closed);
        };
        self.last_timestamp = frame.timestamp.or(self.last_timestamp);
        self.next_at = self.frames.front().map(|f| next_at + self.gap_before(f));
        if self.next_at.is_none() {
            // Report the close on the next poll
            self.next_at = Some(next_at);
        }
        Ok(Poll::Message(frame.text))
    }
}
