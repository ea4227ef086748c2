use thiserror::Error;

use crate::state::ConnectionStatus;
use crate::transport::ConnectionId;

/// Errors raised while framing, decoding or encoding messages.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Frame too short: need {need} bytes, have {have}")]
    FrameTooShort { need: usize, have: usize },

    #[error("Unsupported message type: {0:#06x}")]
    UnsupportedMessageType(u16),

    #[error("Malformed {name} message (type {code:#06x}): {reason}")]
    MalformedMessage {
        code: u16,
        name: &'static str,
        reason: String,
    },

    #[error("Codec error: {0}")]
    CodecError(String),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition {
        from: ConnectionStatus,
        to: ConnectionStatus,
    },
}

/// Errors reported by a [`Transport`](crate::transport::Transport).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Send buffer exhausted ({window} frames awaiting flush)")]
    BufferExhausted { window: usize },

    #[error("Connection {0} is not established yet")]
    NotEstablished(ConnectionId),

    #[error("Unknown connection {0}")]
    UnknownConnection(ConnectionId),

    #[error("Message of {size} bytes exceeds the {max} byte limit")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Transport has been disposed")]
    Disposed,

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
