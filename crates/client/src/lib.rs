//! # Tidewire Client
//!
//! Client-side session for the tidewire protocol: one outbound connection,
//! driven by the caller's tick.
//!
//! The [`Client`] never blocks on the network. `connect` only requests a
//! connection; everything that happens afterwards (handshake, incoming
//! frames, the peer going away) is picked up by [`Client::update`], which the
//! caller invokes once per frame or tick.
//!
//! ## Example
//!
//! ```
//! use tidewire_client::transport::memory::{AcceptMode, MemoryPeer};
//! use tidewire_client::{Client, ClientConfig, ConnectionStatus, HandlerTable, SessionEvent};
//! use tidewire_protocol::{MessageRegistry, WireMessage};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct Greeting { text: String }
//!
//! impl WireMessage for Greeting {
//!     const TYPE_CODE: u16 = 1;
//!     const NAME: &'static str = "Greeting";
//! }
//!
//! let peer = MemoryPeer::new(AcceptMode::Immediate);
//! let registry = MessageRegistry::builder().register::<Greeting>().build();
//! let handlers = HandlerTable::new().on::<Greeting, _>(|ctx, greeting| {
//!     println!("server says {}", greeting.text);
//!     ctx.send(&Greeting { text: "hi back".into() })?;
//!     Ok(())
//! });
//!
//! let mut client = Client::with_config(ClientConfig::default(), registry, handlers, peer.factory()).unwrap();
//! let mut events = client.subscribe();
//!
//! client.connect("", 9000).unwrap();
//! client.update().unwrap();
//!
//! assert_eq!(client.connection_status(), ConnectionStatus::Connected);
//! assert!(matches!(events.try_recv(), Ok(SessionEvent::Connected { .. })));
//! ```

pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod handler;
mod send;
pub mod transport;

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Instant;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ClientConfig, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_PORT};
pub use dispatcher::{Dispatch, DispatchStats, Dispatcher};
pub use error::{ClientError, HandlerError};
pub use events::{
    DisconnectReason, EventQueue, EventReceiver, NoHooks, SessionEvent, SessionHooks,
};
pub use handler::{builtin_handlers, HandlerContext, HandlerResult, HandlerTable};
pub use tidewire_protocol::ConnectionStatus;

use send::SendPath;
use tidewire_protocol::{
    ConnectionId, Message, MessageRegistry, TaskHandle, Transport, TransportError, TransportEvent,
    TransportFactory,
};

/// Connection session
///
/// Owns the transport, the connection handle and the connection status. All
/// methods are meant to be called from one thread, typically the game loop.
pub struct Client {
    config: ClientConfig,
    dispatcher: Dispatcher,
    factory: Box<dyn TransportFactory>,
    transport: Option<Box<dyn Transport>>,
    connection: Option<ConnectionId>,
    status: ConnectionStatus,
    address: Option<SocketAddr>,
    connect_started: Option<Instant>,
    pending_task: Option<TaskHandle>,
    clock: Box<dyn Clock>,
    hooks: Box<dyn SessionHooks>,
    events: EventQueue,
}

impl Client {
    /// Creates a client with the default configuration, no caller messages
    /// and no caller handlers
    pub fn new(factory: impl TransportFactory + 'static) -> Self {
        Self::build(
            ClientConfig::default(),
            MessageRegistry::default(),
            HandlerTable::new(),
            Box::new(factory),
        )
    }

    /// Creates a client with caller messages and handlers
    ///
    /// Fails if `config` does not validate.
    pub fn with_config(
        config: ClientConfig,
        registry: MessageRegistry,
        handlers: HandlerTable,
        factory: impl TransportFactory + 'static,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        Ok(Self::build(config, registry, handlers, Box::new(factory)))
    }

    fn build(
        config: ClientConfig,
        registry: MessageRegistry,
        handlers: HandlerTable,
        factory: Box<dyn TransportFactory>,
    ) -> Self {
        let dispatcher = Dispatcher::new(registry, builtin_handlers(), handlers, config.codec);
        Self {
            config,
            dispatcher,
            factory,
            transport: None,
            connection: None,
            status: ConnectionStatus::Disconnected,
            address: None,
            connect_started: None,
            pending_task: None,
            clock: Box::new(SystemClock),
            hooks: Box::new(NoHooks),
            events: EventQueue::new(),
        }
    }

    /// Replaces the time source used for the connect deadline
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn with_hooks(mut self, hooks: impl SessionHooks + 'static) -> Self {
        self.hooks = Box::new(hooks);
        self
    }

    /// Starts connecting to `address:port`
    ///
    /// An empty `address` means the loopback address. Calling this while
    /// already connecting or connected is reported and ignored.
    pub fn connect(&mut self, address: &str, port: u16) -> Result<(), ClientError> {
        if !self.status.is_disconnected() {
            tracing::warn!(status = %self.status, "Connect ignored: session is not disconnected");
            return Ok(());
        }

        let endpoint = resolve_endpoint(address, port).map_err(|e| {
            tracing::error!(address, port, error = %e, "Cannot connect");
            e
        })?;

        self.complete_pending();

        if self.transport.is_none() {
            let transport = self.factory.create(&self.config.transport).map_err(|e| {
                tracing::error!(error = %e, "Failed to create transport");
                e
            })?;
            self.transport = Some(transport);
        }
        let transport = self
            .transport
            .as_mut()
            .ok_or(ClientError::Transport(TransportError::Disposed))?;

        let connection = transport.connect(endpoint).map_err(|e| {
            tracing::error!(endpoint = %endpoint, error = %e, "Transport refused connect request");
            e
        })?;

        self.status.transition_to(ConnectionStatus::Connecting)?;
        self.connection = Some(connection);
        self.address = Some(endpoint);
        self.connect_started = Some(self.clock.now());

        tracing::info!(connection = %connection, endpoint = %endpoint, "Connecting");
        Ok(())
    }

    /// Connects to the loopback address on the configured default port
    pub fn connect_default(&mut self) -> Result<(), ClientError> {
        let port = self.config.default_port;
        self.connect("", port)
    }

    /// Closes the session from this side
    pub fn disconnect(&mut self) {
        if self.status.is_disconnected() {
            tracing::warn!("Disconnect ignored: session is already disconnected");
            return;
        }
        self.disconnect_with(DisconnectReason::ClientRequested);
    }

    /// Tears the session down and releases the transport
    ///
    /// Safe to call repeatedly. A later `connect` creates a fresh transport.
    pub fn dispose(&mut self) {
        if !self.status.is_disconnected() {
            self.disconnect_with(DisconnectReason::ClientRequested);
        }
        self.complete_pending();
        if let Some(mut transport) = self.transport.take() {
            transport.dispose();
            tracing::debug!("Transport released");
        }
    }

    /// Advances the session by one tick
    ///
    /// Checks the connect deadline, then processes every transport event that
    /// arrived since the previous tick, in order. Returns an error only when
    /// a message handler fails; the session itself stays usable.
    pub fn update(&mut self) -> Result<(), ClientError> {
        if self.status.is_disconnected() {
            return Ok(());
        }

        self.complete_pending();

        if self.connect_deadline_passed() {
            self.disconnect_with(DisconnectReason::Timeout);
            return Ok(());
        }

        let result = self.drain_events();

        if let Some(transport) = self.transport.as_mut() {
            self.pending_task = Some(transport.schedule_update());
        }

        result
    }

    /// Sends `message` on the current connection
    pub fn send(&mut self, message: &dyn Message) -> Result<(), ClientError> {
        let (Some(transport), Some(connection)) = (self.transport.as_mut(), self.connection) else {
            tracing::error!(
                message_type = message.name(),
                status = %self.status,
                "Cannot send: no connection"
            );
            return Err(ClientError::NotConnected);
        };
        SendPath::new(&mut **transport, connection, self.config.codec).send(message)
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.status
    }

    /// Endpoint of the current or most recent connection attempt
    pub fn connection_address(&self) -> Option<SocketAddr> {
        self.address
    }

    pub fn stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn registry(&self) -> &MessageRegistry {
        self.dispatcher.registry()
    }

    /// Subscribes to connect/disconnect notifications
    pub fn subscribe(&mut self) -> EventReceiver {
        self.events.subscribe()
    }

    fn complete_pending(&mut self) {
        if let Some(task) = self.pending_task.take() {
            if let Some(transport) = self.transport.as_mut() {
                transport.complete(task);
            }
        }
    }

    fn connect_deadline_passed(&self) -> bool {
        if !self.status.is_connecting() {
            return false;
        }
        let Some(started) = self.connect_started else {
            return false;
        };
        let elapsed = self.clock.now().saturating_duration_since(started);
        if elapsed <= self.config.connect_timeout() {
            return false;
        }
        tracing::error!(
            endpoint = ?self.address,
            elapsed_ms = elapsed.as_millis() as u64,
            timeout_ms = self.config.connect_timeout_ms,
            "Connection attempt timed out"
        );
        true
    }

    fn disconnect_with(&mut self, reason: DisconnectReason) {
        self.complete_pending();
        if let Some(connection) = self.connection.take() {
            if let Some(transport) = self.transport.as_mut() {
                transport.disconnect(connection);
            }
        }
        self.enter_disconnected(reason);
    }

    fn enter_disconnected(&mut self, reason: DisconnectReason) {
        if let Err(e) = self.status.transition_to(ConnectionStatus::Disconnected) {
            tracing::warn!(error = %e, "Ignoring disconnect");
            return;
        }
        self.connection = None;
        self.connect_started = None;
        tracing::info!(reason = %reason, "Disconnected");
        self.events.publish(SessionEvent::Disconnected { reason });
    }

    /// Polls the transport until it has nothing more for this connection
    fn drain_events(&mut self) -> Result<(), ClientError> {
        let (Some(transport), Some(connection)) = (self.transport.as_mut(), self.connection) else {
            return Ok(());
        };

        let mut closed_by_peer = false;
        loop {
            match transport.poll_event(connection) {
                TransportEvent::Empty => break,
                TransportEvent::Connect => {
                    if let Err(e) = self.status.transition_to(ConnectionStatus::Connected) {
                        tracing::warn!(connection = %connection, error = %e, "Unexpected connect event");
                        continue;
                    }
                    self.connect_started = None;
                    tracing::info!(connection = %connection, endpoint = ?self.address, "Connected");
                    if let Some(address) = self.address {
                        self.events.publish(SessionEvent::Connected { address });
                    }
                    let mut ctx = HandlerContext::new(SendPath::new(
                        &mut **transport,
                        connection,
                        self.config.codec,
                    ));
                    self.hooks.on_connected(&mut ctx);
                }
                TransportEvent::Data(frame) => {
                    if !self.status.is_connected() {
                        tracing::warn!(
                            connection = %connection,
                            frame_len = frame.len(),
                            "Data before connect event, dropping frame"
                        );
                        continue;
                    }
                    self.dispatcher.dispatch(&frame, &mut **transport, connection)?;
                }
                TransportEvent::Disconnect => {
                    closed_by_peer = true;
                    break;
                }
            }
        }

        if closed_by_peer {
            self.connection = None;
            self.enter_disconnected(DisconnectReason::ClosedByPeer);
            self.hooks.on_disconnected();
        }
        Ok(())
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("status", &self.status)
            .field("address", &self.address)
            .field("connection", &self.connection)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

fn resolve_endpoint(address: &str, port: u16) -> Result<SocketAddr, ClientError> {
    let address = address.trim();
    if address.is_empty() {
        return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port));
    }
    address
        .parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, port))
        .map_err(|e| ClientError::InvalidAddress {
            address: address.to_string(),
            reason: e.to_string(),
        })
}
