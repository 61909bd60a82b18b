//! Connection supervisor
//!
//! Wraps a [`Connector`] and keeps it alive: a dropped or refused connection
//! is retried after a fixed delay, and the configured session is rejoined
//! every time the link comes back. Nothing here touches playback state.

use std::time::{Duration, Instant};

use super::protocol::{decode_inbound, InboundMessage, OutboundMessage};
use crate::config::TransportConfig;
use crate::speech::types::CharacterId;

/// Messages drained per frame at most
const MAX_MESSAGES_PER_POLL: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("send failed: {0}")]
    Send(String),
    #[error("connection closed")]
    Closed,
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Outcome of polling an open connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Poll {
    Message(String),
    Idle,
    Closed,
}

/// A duplex text channel to the backend
pub trait Connector {
    fn describe(&self) -> String;

    fn connect(&mut self, now: Instant) -> TransportResult<()>;

    fn send(&mut self, text: &str) -> TransportResult<()>;

    /// Next inbound frame, if one is ready at `now`
    fn poll(&mut self, now: Instant) -> TransportResult<Poll>;
}

impl<C: Connector + ?Sized> Connector for Box<C> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    fn connect(&mut self, now: Instant) -> TransportResult<()> {
        (**self).connect(now)
    }

    fn send(&mut self, text: &str) -> TransportResult<()> {
        (**self).send(text)
    }

    fn poll(&mut self, now: Instant) -> TransportResult<Poll> {
        (**self).poll(now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Disconnected { retry_at: Instant },
}

/// What happened on the link during one poll
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Connected,
    Disconnected { reason: String },
    Message(InboundMessage),
}

pub struct TransportLink<C: Connector> {
    connector: C,
    state: LinkState,
    reconnect_delay: Duration,
    session_id: String,
    connects: u32,
    dropped_commands: u32,
    malformed: u32,
}

impl<C: Connector> TransportLink<C> {
    /// The first connection attempt happens on the first poll
    pub fn new(connector: C, config: &TransportConfig, now: Instant) -> Self {
        Self {
            connector,
            state: LinkState::Disconnected { retry_at: now },
            reconnect_delay: config.reconnect_delay(),
            session_id: config.session_id.clone(),
            connects: 0,
            dropped_commands: 0,
            malformed: 0,
        }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Successful connections so far, the first one included
    pub fn connects(&self) -> u32 {
        self.connects
    }

    pub fn dropped_commands(&self) -> u32 {
        self.dropped_commands
    }

    pub fn malformed_messages(&self) -> u32 {
        self.malformed
    }

    /// Reconnect if due and drain whatever has arrived
    pub fn poll(&mut self, now: Instant) -> Vec<LinkEvent> {
        let mut events = Vec::new();

        if let LinkState::Disconnected { retry_at } = self.state {
            if now < retry_at {
                return events;
            }
            match self.connector.connect(now) {
                Ok(()) => {
                    self.connects += 1;
                    self.state = LinkState::Connected;
                    log::info!("Connected to {}", self.connector.describe());
                    events.push(LinkEvent::Connected);
                    let session = self.session_id.clone();
                    self.join_session(&session);
                }
                Err(err) => {
                    log::warn!("{}; retrying in {:?}", err, self.reconnect_delay);
                    self.state = LinkState::Disconnected {
                        retry_at: now + self.reconnect_delay,
                    };
                    return events;
                }
            }
        }

        for _ in 0..MAX_MESSAGES_PER_POLL {
            match self.connector.poll(now) {
                Ok(Poll::Message(text)) => match decode_inbound(&text) {
                    Ok(message) => events.push(LinkEvent::Message(message)),
                    Err(err) => {
                        self.malformed += 1;
                        log::warn!("Ignoring inbound frame: {}", err);
                    }
                },
                Ok(Poll::Idle) => break,
                Ok(Poll::Closed) => {
                    self.disconnect("closed by peer".to_string(), now, &mut events);
                    break;
                }
                Err(err) => {
                    self.disconnect(err.to_string(), now, &mut events);
                    break;
                }
            }
        }
        events
    }

    fn disconnect(&mut self, reason: String, now: Instant, events: &mut Vec<LinkEvent>) {
        log::warn!(
            "Disconnected from {} ({}); reconnecting in {:?}",
            self.connector.describe(),
            reason,
            self.reconnect_delay
        );
        self.state = LinkState::Disconnected {
            retry_at: now + self.reconnect_delay,
        };
        events.push(LinkEvent::Disconnected { reason });
    }

    /// Send a command. Commands issued while disconnected are dropped.
    pub fn send(&mut self, command: &OutboundMessage) -> TransportResult<()> {
        if !self.is_connected() {
            self.dropped_commands += 1;
            log::warn!("Not connected, dropping {:?} command", command.kind);
            return Err(TransportError::Closed);
        }
        let text = command
            .encode()
            .map_err(|e| TransportError::Send(e.to_string()))?;
        self.connector.send(&text).inspect_err(|err| {
            log::warn!("{}", err);
        })
    }

    /// Switch to (and remember) a session
    pub fn join_session(&mut self, session_id: &str) {
        self.session_id = session_id.to_string();
        if self.send(&OutboundMessage::join_session(session_id)).is_ok() {
            log::info!("Joined session {}", session_id);
        }
    }

    /// Ask the backend for a line, from `character` or anyone
    pub fn request_response(&mut self, character: Option<CharacterId>) -> TransportResult<()> {
        let command = OutboundMessage::request_response(&self.session_id, character);
        self.send(&command)?;
        log::debug!(
            "Requested response from {}",
            character.map_or("anyone", |c| c.as_str())
        );
        Ok(())
    }
}
