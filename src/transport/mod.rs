//! Link to the speech backend
//!
//! The backend is an external collaborator: it pushes `new_message` frames
//! and accepts `join_session` / `request_response` commands. Losing it only
//! means no new speech arrives; playback carries on.

pub mod auto;
pub mod link;
pub mod protocol;
pub mod replay;

pub use auto::AutoRequester;
pub use link::{Connector, LinkEvent, LinkState, Poll, TransportError, TransportLink, TransportResult};
pub use protocol::{
    decode_inbound, InboundData, InboundKind, InboundMessage, OutboundKind, OutboundMessage, ProtocolError,
};
pub use replay::ReplayConnector;
