//! # Tidewire
//!
//! Client-side network session manager for real-time games:
//! - One outbound connection with a connect deadline and clean teardown
//! - Type-code framed messages decoded through an immutable registry
//! - Tick-driven update loop that never blocks the caller
//! - Built-in keep-alive (PING answered with PONG)
//!
//! ## Components
//!
//! - `tidewire-protocol`: framing, messages, codecs, registry, transport contract
//! - `tidewire-protocol-derive`: `#[derive(WireMessage)]`
//! - `tidewire-client`: the `Client` session, dispatcher and transports
//!
//! ## Example
//!
//! ```
//! use tidewire::client::transport::memory::{AcceptMode, MemoryPeer};
//! use tidewire::client::{Client, ConnectionStatus};
//!
//! let peer = MemoryPeer::new(AcceptMode::Immediate);
//! let mut client = Client::new(peer.factory());
//! client.connect("", 9000).unwrap();
//! client.update().unwrap();
//! assert_eq!(client.connection_status(), ConnectionStatus::Connected);
//! ```

pub use tidewire_client as client;
pub use tidewire_protocol as protocol;
