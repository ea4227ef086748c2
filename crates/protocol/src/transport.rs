//! Transport adapter contract
//!
//! The client never touches sockets directly. It drives a [`Transport`]: a
//! reliable, ordered, packet-oriented channel that is polled from the
//! caller's tick. Implementations may run background work; that work is
//! represented by a [`TaskHandle`] which the caller completes before it reads
//! or mutates connection state again.
//!
//! A tick looks like this:
//!
//! ```text
//! complete(previous task)
//! loop poll_event(conn) until Empty
//!     begin_send / end_send for any replies
//! task = schedule_update()
//! ```

use std::fmt;
use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::TransportError;
use crate::frame::write_frame;

/// Opaque handle to one transport-level connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Opaque handle to background transport work
///
/// Handles are issued in increasing order; completing a handle also covers
/// every handle issued before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskHandle(pub u64);

/// Delivery pipeline requested for a send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pipeline {
    /// At most once, in send order, or not at all
    ReliableOrdered,
}

/// Event produced by [`Transport::poll_event`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Nothing pending for this connection
    Empty,
    /// The connection handshake completed
    Connect,
    /// One complete frame from the peer
    Data(Bytes),
    /// The connection is gone, no more events follow
    Disconnect,
}

/// One-time transport parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Frames that may be committed but not yet flushed, per connection
    pub window_size: usize,

    /// Largest frame accepted by `end_send`, type code included
    pub max_message_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            window_size: 32,
            max_message_size: 1400,
        }
    }
}

/// Writable buffer handed out by [`Transport::begin_send`]
#[derive(Debug)]
pub struct SendBuffer {
    connection: ConnectionId,
    pipeline: Pipeline,
    bytes: BytesMut,
}

impl SendBuffer {
    pub fn new(connection: ConnectionId, pipeline: Pipeline) -> Self {
        Self {
            connection,
            pipeline,
            bytes: BytesMut::new(),
        }
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    pub fn pipeline(&self) -> Pipeline {
        self.pipeline
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Writes a framed message: type code then payload
    pub fn write_message(&mut self, type_code: u16, payload: &[u8]) {
        write_frame(&mut self.bytes, type_code, payload);
    }

    /// Splits the buffer once it has been committed
    pub fn into_parts(self) -> (ConnectionId, Pipeline, Bytes) {
        (self.connection, self.pipeline, self.bytes.freeze())
    }
}

/// Reliable, ordered, poll-driven transport
///
/// All methods are called from the caller's single logical thread.
pub trait Transport: Send {
    /// Starts connecting; completion is reported as [`TransportEvent::Connect`]
    fn connect(&mut self, endpoint: SocketAddr) -> Result<ConnectionId, TransportError>;

    /// Pops the next pending event for `connection`
    fn poll_event(&mut self, connection: ConnectionId) -> TransportEvent;

    /// Acquires a send buffer on `pipeline`
    fn begin_send(
        &mut self,
        pipeline: Pipeline,
        connection: ConnectionId,
    ) -> Result<SendBuffer, TransportError>;

    /// Commits a buffer obtained from `begin_send`
    fn end_send(&mut self, buffer: SendBuffer) -> Result<(), TransportError>;

    /// Closes `connection`; unknown handles are ignored
    fn disconnect(&mut self, connection: ConnectionId);

    /// Schedules background flush/poll work until the next tick
    fn schedule_update(&mut self) -> TaskHandle;

    /// Blocks until `task` (and everything scheduled before it) has finished
    fn complete(&mut self, task: TaskHandle);

    /// Releases every resource; the transport is unusable afterwards
    fn dispose(&mut self);
}

/// Creates transports from configuration
pub trait TransportFactory: Send {
    fn create(&mut self, config: &TransportConfig) -> Result<Box<dyn Transport>, TransportError>;
}

impl<F> TransportFactory for F
where
    F: FnMut(&TransportConfig) -> Result<Box<dyn Transport>, TransportError> + Send,
{
    fn create(&mut self, config: &TransportConfig) -> Result<Box<dyn Transport>, TransportError> {
        self(config)
    }
}
