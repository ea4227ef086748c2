//! Transport implementations
//!
//! - [`memory`]: in-process peer for tests and local play
//! - [`tcp`]: length-prefixed frames over a TCP stream

pub mod memory;
pub mod tcp;

pub use tidewire_protocol::transport::{
    ConnectionId, Pipeline, SendBuffer, TaskHandle, Transport, TransportConfig, TransportEvent,
    TransportFactory,
};
