//! In-memory transport for testing and single-process play
//!
//! [`MemoryTransport`] is the client side; [`MemoryPeer`] is a scripted
//! server side sharing the same state. The peer decides when connections are
//! accepted, pushes frames and closes connections; it can also inspect every
//! frame the client flushed.
//!
//! Committed frames are not visible to the peer straight away. They are
//! handed to the task returned by the next `schedule_update` and delivered
//! when that task is completed, the same way a networked transport flushes in
//! the background.
//!
//! ```
//! use tidewire_client::transport::memory::{AcceptMode, MemoryPeer};
//! use tidewire_client::{Client, ConnectionStatus};
//!
//! let peer = MemoryPeer::new(AcceptMode::Immediate);
//! let mut client = Client::new(peer.factory());
//!
//! client.connect_default().unwrap();
//! client.update().unwrap();
//! assert_eq!(client.connection_status(), ConnectionStatus::Connected);
//! ```

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use tidewire_protocol::frame::encode_frame;
use tidewire_protocol::{
    CodecType, ConnectionId, Message, Pipeline, SendBuffer, TaskHandle, Transport,
    TransportConfig, TransportError, TransportEvent, TransportFactory,
};

/// How the peer answers connect requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptMode {
    /// The connect event is queued as soon as the client connects
    Immediate,
    /// Nothing happens until [`MemoryPeer::accept`]
    Manual,
    /// The connection is closed right away
    Refuse,
}

#[derive(Debug, Default)]
struct Link {
    established: bool,
    closed: bool,
    events: VecDeque<TransportEvent>,
    committed: Vec<Bytes>,
}

#[derive(Debug)]
struct Shared {
    accept: AcceptMode,
    config: TransportConfig,
    links: HashMap<ConnectionId, Link>,
    current: Option<ConnectionId>,
    next_connection: u64,
    in_flight: Vec<(TaskHandle, Bytes)>,
    delivered: Vec<Bytes>,
    next_task: u64,
    completed: Option<TaskHandle>,
    connect_attempts: Vec<SocketAddr>,
    disconnect_requests: usize,
    transports_created: usize,
    disposed: bool,
}

impl Shared {
    fn new(accept: AcceptMode) -> Self {
        Self {
            accept,
            config: TransportConfig::default(),
            links: HashMap::new(),
            current: None,
            next_connection: 1,
            in_flight: Vec::new(),
            delivered: Vec::new(),
            next_task: 1,
            completed: None,
            connect_attempts: Vec::new(),
            disconnect_requests: 0,
            transports_created: 0,
            disposed: false,
        }
    }

    fn current_link(&mut self) -> Option<&mut Link> {
        let id = self.current?;
        self.links.get_mut(&id).filter(|link| !link.closed)
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|e| e.into_inner())
}

/// Server side of an in-memory connection
#[derive(Debug, Clone)]
pub struct MemoryPeer {
    shared: Arc<Mutex<Shared>>,
}

impl MemoryPeer {
    pub fn new(accept: AcceptMode) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared::new(accept))),
        }
    }

    /// Factory producing transports wired to this peer
    pub fn factory(&self) -> MemoryTransportFactory {
        MemoryTransportFactory {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn set_accept_mode(&self, accept: AcceptMode) {
        lock(&self.shared).accept = accept;
    }

    /// Completes the handshake of the current connection
    ///
    /// Returns `false` if there is no pending connection to accept.
    pub fn accept(&self) -> bool {
        let mut shared = lock(&self.shared);
        match shared.current_link() {
            Some(link) if !link.established => {
                link.established = true;
                link.events.push_back(TransportEvent::Connect);
                true
            }
            _ => false,
        }
    }

    /// Queues a raw frame for the client
    pub fn push_frame(&self, frame: impl Into<Bytes>) -> Result<(), TransportError> {
        let mut shared = lock(&self.shared);
        let current = shared.current.unwrap_or(ConnectionId(0));
        let link = shared
            .current_link()
            .ok_or(TransportError::UnknownConnection(current))?;
        link.events.push_back(TransportEvent::Data(frame.into()));
        Ok(())
    }

    /// Encodes and queues a message for the client
    pub fn push_message(&self, message: &dyn Message, codec: CodecType) -> Result<(), TransportError> {
        let frame = encode_frame(message, codec).map_err(|e| TransportError::Io(e.to_string()))?;
        self.push_frame(frame)
    }

    /// Closes the current connection from the server side
    pub fn close(&self) -> bool {
        let mut shared = lock(&self.shared);
        match shared.current_link() {
            Some(link) => {
                link.closed = true;
                link.established = false;
                link.committed.clear();
                link.events.push_back(TransportEvent::Disconnect);
                true
            }
            None => false,
        }
    }

    /// Drains every frame flushed so far, oldest first
    pub fn take_delivered(&self) -> Vec<Bytes> {
        std::mem::take(&mut lock(&self.shared).delivered)
    }

    /// Frames committed by the client but not flushed yet
    pub fn unflushed(&self) -> usize {
        let shared = lock(&self.shared);
        let committed: usize = shared.links.values().map(|link| link.committed.len()).sum();
        committed + shared.in_flight.len()
    }

    /// Connections the transport still tracks, closed ones included until
    /// their disconnect has been polled
    pub fn open_links(&self) -> usize {
        lock(&self.shared).links.len()
    }

    pub fn connect_attempts(&self) -> Vec<SocketAddr> {
        lock(&self.shared).connect_attempts.clone()
    }

    pub fn disconnect_requests(&self) -> usize {
        lock(&self.shared).disconnect_requests
    }

    pub fn transports_created(&self) -> usize {
        lock(&self.shared).transports_created
    }

    pub fn last_completed(&self) -> Option<TaskHandle> {
        lock(&self.shared).completed
    }

    pub fn is_disposed(&self) -> bool {
        lock(&self.shared).disposed
    }

    /// Configuration the last transport was created with
    pub fn config(&self) -> TransportConfig {
        lock(&self.shared).config.clone()
    }
}

#[derive(Debug, Clone)]
pub struct MemoryTransportFactory {
    shared: Arc<Mutex<Shared>>,
}

impl TransportFactory for MemoryTransportFactory {
    fn create(&mut self, config: &TransportConfig) -> Result<Box<dyn Transport>, TransportError> {
        let mut shared = lock(&self.shared);
        shared.config = config.clone();
        shared.transports_created += 1;
        shared.disposed = false;
        tracing::debug!(
            window_size = config.window_size,
            max_message_size = config.max_message_size,
            "Memory transport created"
        );
        Ok(Box::new(MemoryTransport {
            shared: Arc::clone(&self.shared),
            disposed: false,
        }))
    }
}

/// Client side of an in-memory connection
#[derive(Debug)]
pub struct MemoryTransport {
    shared: Arc<Mutex<Shared>>,
    disposed: bool,
}

impl Transport for MemoryTransport {
    fn connect(&mut self, endpoint: SocketAddr) -> Result<ConnectionId, TransportError> {
        if self.disposed {
            return Err(TransportError::Disposed);
        }
        let mut shared = lock(&self.shared);
        let id = ConnectionId(shared.next_connection);
        shared.next_connection += 1;
        shared.connect_attempts.push(endpoint);

        let mut link = Link::default();
        match shared.accept {
            AcceptMode::Immediate => {
                link.established = true;
                link.events.push_back(TransportEvent::Connect);
            }
            AcceptMode::Manual => {}
            AcceptMode::Refuse => {
                link.closed = true;
                link.events.push_back(TransportEvent::Disconnect);
            }
        }
        shared.links.insert(id, link);
        shared.current = Some(id);

        tracing::debug!(connection = %id, endpoint = %endpoint, "Memory connect requested");
        Ok(id)
    }

    fn poll_event(&mut self, connection: ConnectionId) -> TransportEvent {
        if self.disposed {
            return TransportEvent::Empty;
        }
        let mut shared = lock(&self.shared);
        let event = shared
            .links
            .get_mut(&connection)
            .and_then(|link| link.events.pop_front());
        match event {
            Some(TransportEvent::Disconnect) => {
                // Nothing follows a disconnect, so the link can go.
                shared.links.remove(&connection);
                if shared.current == Some(connection) {
                    shared.current = None;
                }
                TransportEvent::Disconnect
            }
            Some(event) => event,
            None => TransportEvent::Empty,
        }
    }

    fn begin_send(
        &mut self,
        pipeline: Pipeline,
        connection: ConnectionId,
    ) -> Result<SendBuffer, TransportError> {
        if self.disposed {
            return Err(TransportError::Disposed);
        }
        let mut shared = lock(&self.shared);
        let window = shared.config.window_size;
        let link = shared
            .links
            .get_mut(&connection)
            .filter(|link| !link.closed)
            .ok_or(TransportError::UnknownConnection(connection))?;
        if !link.established {
            return Err(TransportError::NotEstablished(connection));
        }
        if link.committed.len() >= window {
            return Err(TransportError::BufferExhausted { window });
        }
        Ok(SendBuffer::new(connection, pipeline))
    }

    fn end_send(&mut self, buffer: SendBuffer) -> Result<(), TransportError> {
        if self.disposed {
            return Err(TransportError::Disposed);
        }
        let mut shared = lock(&self.shared);
        let max = shared.config.max_message_size;
        if buffer.len() > max {
            return Err(TransportError::MessageTooLarge {
                size: buffer.len(),
                max,
            });
        }
        let (connection, _, bytes) = buffer.into_parts();
        let link = shared
            .links
            .get_mut(&connection)
            .filter(|link| !link.closed)
            .ok_or(TransportError::UnknownConnection(connection))?;
        link.committed.push(bytes);
        Ok(())
    }

    fn disconnect(&mut self, connection: ConnectionId) {
        let mut shared = lock(&self.shared);
        if shared.links.remove(&connection).is_some() {
            shared.disconnect_requests += 1;
            if shared.current == Some(connection) {
                shared.current = None;
            }
            tracing::debug!(connection = %connection, "Memory connection closed by client");
        }
    }

    fn schedule_update(&mut self) -> TaskHandle {
        let mut shared = lock(&self.shared);
        let task = TaskHandle(shared.next_task);
        shared.next_task += 1;

        let mut batch = Vec::new();
        for link in shared.links.values_mut() {
            batch.append(&mut link.committed);
        }
        shared.in_flight.extend(batch.into_iter().map(|frame| (task, frame)));
        task
    }

    fn complete(&mut self, task: TaskHandle) {
        let mut shared = lock(&self.shared);
        let (done, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut shared.in_flight)
            .into_iter()
            .partition(|(handle, _)| *handle <= task);
        shared.in_flight = pending;
        shared.delivered.extend(done.into_iter().map(|(_, frame)| frame));
        shared.completed = shared.completed.max(Some(task));
    }

    fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        let mut shared = lock(&self.shared);
        shared.links.clear();
        shared.in_flight.clear();
        shared.current = None;
        shared.disposed = true;
        tracing::debug!("Memory transport disposed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidewire_protocol::Ping;

    fn endpoint() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    fn transport(peer: &MemoryPeer) -> Box<dyn Transport> {
        peer.factory().create(&TransportConfig::default()).unwrap()
    }

    #[test]
    fn test_immediate_accept_queues_connect() {
        let peer = MemoryPeer::new(AcceptMode::Immediate);
        let mut transport = transport(&peer);
        let conn = transport.connect(endpoint()).unwrap();

        assert_eq!(transport.poll_event(conn), TransportEvent::Connect);
        assert_eq!(transport.poll_event(conn), TransportEvent::Empty);
        assert_eq!(peer.connect_attempts(), vec![endpoint()]);
    }

    #[test]
    fn test_manual_accept() {
        let peer = MemoryPeer::new(AcceptMode::Manual);
        let mut transport = transport(&peer);
        let conn = transport.connect(endpoint()).unwrap();

        assert_eq!(transport.poll_event(conn), TransportEvent::Empty);
        assert!(matches!(
            transport.begin_send(Pipeline::ReliableOrdered, conn),
            Err(TransportError::NotEstablished(_))
        ));

        assert!(peer.accept());
        assert!(!peer.accept());
        assert_eq!(transport.poll_event(conn), TransportEvent::Connect);
    }

    #[test]
    fn test_refuse_closes_immediately() {
        let peer = MemoryPeer::new(AcceptMode::Refuse);
        let mut transport = transport(&peer);
        let conn = transport.connect(endpoint()).unwrap();
        assert_eq!(transport.poll_event(conn), TransportEvent::Disconnect);
    }

    #[test]
    fn test_frames_flush_on_complete() {
        let peer = MemoryPeer::new(AcceptMode::Immediate);
        let mut transport = transport(&peer);
        let conn = transport.connect(endpoint()).unwrap();

        let mut buffer = transport.begin_send(Pipeline::ReliableOrdered, conn).unwrap();
        buffer.write_message(1, b"a");
        transport.end_send(buffer).unwrap();
        assert_eq!(peer.unflushed(), 1);

        let task = transport.schedule_update();
        assert!(peer.take_delivered().is_empty());

        transport.complete(task);
        assert_eq!(peer.take_delivered(), vec![Bytes::from_static(&[0, 1, b'a'])]);
        assert_eq!(peer.unflushed(), 0);
        assert_eq!(peer.last_completed(), Some(task));
    }

    #[test]
    fn test_window_exhaustion() {
        let peer = MemoryPeer::new(AcceptMode::Immediate);
        let mut transport = peer
            .factory()
            .create(&TransportConfig {
                window_size: 1,
                ..Default::default()
            })
            .unwrap();
        let conn = transport.connect(endpoint()).unwrap();

        let buffer = transport.begin_send(Pipeline::ReliableOrdered, conn).unwrap();
        transport.end_send(buffer).unwrap();
        assert!(matches!(
            transport.begin_send(Pipeline::ReliableOrdered, conn),
            Err(TransportError::BufferExhausted { window: 1 })
        ));

        let task = transport.schedule_update();
        transport.complete(task);
        assert!(transport.begin_send(Pipeline::ReliableOrdered, conn).is_ok());
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let peer = MemoryPeer::new(AcceptMode::Immediate);
        let mut transport = peer
            .factory()
            .create(&TransportConfig {
                max_message_size: 4,
                ..Default::default()
            })
            .unwrap();
        let conn = transport.connect(endpoint()).unwrap();

        let mut buffer = transport.begin_send(Pipeline::ReliableOrdered, conn).unwrap();
        buffer.write_message(1, b"too long");
        assert!(matches!(
            transport.end_send(buffer),
            Err(TransportError::MessageTooLarge { size: 10, max: 4 })
        ));
    }

    #[test]
    fn test_peer_push_and_close() {
        let peer = MemoryPeer::new(AcceptMode::Immediate);
        let mut transport = transport(&peer);
        let conn = transport.connect(endpoint()).unwrap();

        peer.push_message(&Ping { timestamp: 5 }, CodecType::Postcard)
            .unwrap();
        assert!(peer.close());

        assert_eq!(transport.poll_event(conn), TransportEvent::Connect);
        assert!(matches!(transport.poll_event(conn), TransportEvent::Data(_)));
        assert_eq!(transport.poll_event(conn), TransportEvent::Disconnect);
        assert!(matches!(
            transport.begin_send(Pipeline::ReliableOrdered, conn),
            Err(TransportError::UnknownConnection(_))
        ));
        assert!(peer.push_frame(Bytes::from_static(&[0, 1])).is_err());
    }

    #[test]
    fn test_closed_links_are_released_once_polled() {
        let peer = MemoryPeer::new(AcceptMode::Immediate);
        let mut transport = transport(&peer);

        for _ in 0..5 {
            let conn = transport.connect(endpoint()).unwrap();
            assert_eq!(transport.poll_event(conn), TransportEvent::Connect);
            assert!(peer.close());
            assert_eq!(peer.open_links(), 1);

            assert_eq!(transport.poll_event(conn), TransportEvent::Disconnect);
            assert_eq!(transport.poll_event(conn), TransportEvent::Empty);
            assert_eq!(peer.open_links(), 0);
        }

        peer.set_accept_mode(AcceptMode::Refuse);
        let conn = transport.connect(endpoint()).unwrap();
        assert_eq!(transport.poll_event(conn), TransportEvent::Disconnect);
        assert_eq!(peer.open_links(), 0);
        assert_eq!(peer.disconnect_requests(), 0);
    }

    #[test]
    fn test_dispose_is_terminal() {
        let peer = MemoryPeer::new(AcceptMode::Immediate);
        let mut transport = transport(&peer);
        transport.dispose();
        transport.dispose();

        assert!(peer.is_disposed());
        assert!(matches!(
            transport.connect(endpoint()),
            Err(TransportError::Disposed)
        ));
    }
}
