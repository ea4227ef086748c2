//! Lifecycle notifications
//!
//! Observers subscribe to an [`EventQueue`] and drain their receiver whenever
//! it suits them (typically right after `Client::update`). Each state
//! transition publishes exactly one event to every live subscriber.

use std::net::SocketAddr;

use tokio::sync::mpsc;

use crate::handler::HandlerContext;

/// Why the session left the connected/connecting state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `disconnect()` or `dispose()` was called
    ClientRequested,

    /// No connect event arrived before the deadline
    Timeout,

    /// The transport reported the connection as closed
    ClosedByPeer,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::ClientRequested => write!(f, "ClientRequested"),
            DisconnectReason::Timeout => write!(f, "Timeout"),
            DisconnectReason::ClosedByPeer => write!(f, "ClosedByPeer"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Connected { address: SocketAddr },
    Disconnected { reason: DisconnectReason },
}

/// Receiving end handed out by [`EventQueue::subscribe`]
pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

/// Observer list backed by unbounded channels
#[derive(Debug, Default)]
pub struct EventQueue {
    subscribers: Vec<mpsc::UnboundedSender<SessionEvent>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an observer; events published before this call are not replayed
    pub fn subscribe(&mut self) -> EventReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// Delivers `event` to every subscriber, dropping those that went away
    pub fn publish(&mut self, event: SessionEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

/// Extension points invoked from `Client::update`
///
/// Both methods default to doing nothing.
pub trait SessionHooks: Send {
    /// Called right after the transport connect event, once the status is
    /// `Connected`. Messages sent through `ctx` go out on the new connection.
    fn on_connected(&mut self, ctx: &mut HandlerContext<'_>) {
        let _ = ctx;
    }

    /// Called after the peer closed the connection
    fn on_disconnected(&mut self) {}
}

/// Hooks that do nothing
#[derive(Debug, Default)]
pub struct NoHooks;

impl SessionHooks for NoHooks {}
