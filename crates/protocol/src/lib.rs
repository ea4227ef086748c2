//! # Tidewire Protocol
//!
//! Wire-level building blocks shared by tidewire endpoints:
//! - Type code framing (`[u16 BE type code][payload]`)
//! - `Message` / `WireMessage` traits and the built-in PING/PONG messages
//! - JSON and Postcard payload codecs
//! - `MessageRegistry`: type code → decoder, immutable once built
//! - `ConnectionStatus`: the client connection state machine
//! - `Transport`: the contract a reliable ordered transport must satisfy
//!
//! ## Example
//!
//! ```
//! use tidewire_protocol::{frame::encode_frame, CodecType, MessageRegistry, Ping};
//!
//! let registry = MessageRegistry::default();
//! let frame = encode_frame(&Ping { timestamp: 42 }, CodecType::Postcard).unwrap();
//!
//! let message = registry.decode(CodecType::Postcard, &frame).unwrap();
//! assert_eq!(message.name(), "Ping");
//! ```

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;
pub mod message_registry;
pub mod messages;
pub mod state;
pub mod transport;

pub use codec::CodecType;
pub use error::{ProtocolError, Result, TransportError};
pub use message::{Message, WireMessage};
pub use message_registry::{MessageDescriptor, MessageRegistry, MessageRegistryBuilder};
pub use messages::{Ping, Pong, SYSTEM_MESSAGES_START};
pub use state::ConnectionStatus;
pub use transport::{
    ConnectionId, Pipeline, SendBuffer, TaskHandle, Transport, TransportConfig, TransportEvent,
    TransportFactory,
};
