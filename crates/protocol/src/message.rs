//! Message traits
//!
//! [`WireMessage`] is what application types implement (usually through
//! `#[derive(WireMessage)]`). [`Message`] is its object-safe face, used where
//! the concrete type is only known at runtime: decoded messages handed to
//! handlers and messages passed to the send path.
//!
//! ```
//! use tidewire_protocol::{Message, WireMessage};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct Greeting {
//!     text: String,
//! }
//!
//! impl WireMessage for Greeting {
//!     const TYPE_CODE: u16 = 1;
//!     const NAME: &'static str = "Greeting";
//! }
//!
//! let boxed: Box<dyn Message> = Box::new(Greeting { text: "hi".into() });
//! assert_eq!(boxed.type_code(), 1);
//! assert_eq!(boxed.downcast_ref::<Greeting>().unwrap().text, "hi");
//! ```

use std::any::Any;
use std::fmt;

use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};

use crate::codec::CodecType;
use crate::error::Result;

/// A message type with a fixed wire type code
pub trait WireMessage: Serialize + DeserializeOwned + fmt::Debug + Send + 'static {
    /// Discriminator written in front of every payload of this type
    const TYPE_CODE: u16;

    /// Name used in diagnostics
    const NAME: &'static str;
}

/// Object-safe view of a message
pub trait Message: fmt::Debug + Send + 'static {
    fn type_code(&self) -> u16;

    fn name(&self) -> &'static str;

    /// Encodes the payload only, without the type code prefix
    fn encode_payload(&self, codec: CodecType) -> Result<Bytes>;

    fn as_any(&self) -> &dyn Any;
}

impl<T: WireMessage> Message for T {
    fn type_code(&self) -> u16 {
        T::TYPE_CODE
    }

    fn name(&self) -> &'static str {
        T::NAME
    }

    fn encode_payload(&self, codec: CodecType) -> Result<Bytes> {
        codec.encode(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl dyn Message {
    /// Returns true if the message is of type `T`
    pub fn is<T: Message>(&self) -> bool {
        self.as_any().is::<T>()
    }

    /// Downcasts to a concrete message type
    pub fn downcast_ref<T: Message>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}
