//! Connection status state machine
//!
//! ```text
//! DISCONNECTED → CONNECTING → CONNECTED
//!       ↑             ↓            ↓
//!       └─────────────┴────────────┘
//!        (failure, timeout or disconnect)
//! ```
//!
//! There is no `Disconnected → Connected` shortcut: a connection only becomes
//! `Connected` after the transport reports its connect event.

use crate::error::{ProtocolError, Result};

/// Status of the single client connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionStatus {
    /// No connection handle exists
    #[default]
    Disconnected,

    /// Connection requested, waiting for the transport connect event
    Connecting,

    /// Transport reported the connection as established
    Connected,
}

impl ConnectionStatus {
    /// Validates a state transition
    pub fn can_transition_to(&self, next: ConnectionStatus) -> bool {
        use ConnectionStatus::*;

        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Disconnected)
        )
    }

    /// Attempts to transition to a new state
    ///
    /// On an illegal transition the status is left unchanged.
    pub fn transition_to(&mut self, next: ConnectionStatus) -> Result<()> {
        if self.can_transition_to(next) {
            *self = next;
            Ok(())
        } else {
            Err(ProtocolError::InvalidStateTransition {
                from: *self,
                to: next,
            })
        }
    }

    #[inline]
    pub fn is_disconnected(&self) -> bool {
        matches!(self, ConnectionStatus::Disconnected)
    }

    #[inline]
    pub fn is_connecting(&self) -> bool {
        matches!(self, ConnectionStatus::Connecting)
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "Disconnected"),
            ConnectionStatus::Connecting => write!(f, "Connecting"),
            ConnectionStatus::Connected => write!(f, "Connected"),
        }
    }
}
