//! Built-in system messages
//!
//! Codes at or above [`SYSTEM_MESSAGES_START`] belong to the protocol itself.
//! Application messages should stay below it; an application type registered
//! under a system code is shadowed by the built-in one.

use serde::{Deserialize, Serialize};

use crate::message::WireMessage;

/// System message type codes
pub mod codes {
    /// PING (bidirectional): keepalive request
    pub const PING: u16 = 0xFF00;

    /// PONG (bidirectional): keepalive response
    pub const PONG: u16 = 0xFF01;
}

/// First type code of the reserved system range
pub const SYSTEM_MESSAGES_START: u16 = 0xFF00;

/// Returns true if `code` lies in the reserved system range
pub fn is_system_code(code: u16) -> bool {
    code >= SYSTEM_MESSAGES_START
}

/// PING message for keepalive and latency measurement
///
/// The receiver echoes the timestamp back in a [`Pong`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    /// Sender-defined timestamp, usually milliseconds since epoch
    pub timestamp: u64,
}

impl WireMessage for Ping {
    const TYPE_CODE: u16 = codes::PING;
    const NAME: &'static str = "Ping";
}

/// PONG message in response to PING
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {
    /// Timestamp copied from the PING
    pub timestamp: u64,
}

impl WireMessage for Pong {
    const TYPE_CODE: u16 = codes::PONG;
    const NAME: &'static str = "Pong";
}

impl Pong {
    /// Builds the reply to a ping
    pub fn reply_to(ping: &Ping) -> Self {
        Self {
            timestamp: ping.timestamp,
        }
    }
}
