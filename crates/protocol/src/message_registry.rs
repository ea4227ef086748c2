//! Message registry
//!
//! Maps wire type codes to decode functions. Each entry is a
//! [`MessageDescriptor`] that knows how to turn the payload bytes into a fresh
//! boxed message of one concrete type.
//!
//! The registry is assembled once through [`MessageRegistryBuilder`] and is
//! immutable afterwards. Caller entries are merged first and the built-in
//! system messages last, so a built-in always wins a code collision.
//!
//! # Example
//!
//! ```
//! use tidewire_protocol::{CodecType, MessageRegistry, WireMessage};
//! use tidewire_protocol::frame::encode_frame;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, PartialEq, Serialize, Deserialize)]
//! struct Greeting { text: String }
//!
//! impl WireMessage for Greeting {
//!     const TYPE_CODE: u16 = 1;
//!     const NAME: &'static str = "Greeting";
//! }
//!
//! let registry = MessageRegistry::builder().register::<Greeting>().build();
//! let frame = encode_frame(&Greeting { text: "hello".into() }, CodecType::Postcard).unwrap();
//!
//! let message = registry.decode(CodecType::Postcard, &frame).unwrap();
//! assert_eq!(message.downcast_ref::<Greeting>().unwrap().text, "hello");
//! ```

use std::collections::HashMap;
use std::fmt;

use crate::codec::CodecType;
use crate::error::{ProtocolError, Result};
use crate::frame::split_type_code;
use crate::message::{Message, WireMessage};
use crate::messages::{Ping, Pong};

type DecodeFn = fn(CodecType, &[u8]) -> Result<Box<dyn Message>>;

fn decode_as<M: WireMessage>(codec: CodecType, payload: &[u8]) -> Result<Box<dyn Message>> {
    let message: M = codec.decode(payload)?;
    Ok(Box::new(message))
}

/// Registry entry for one message type
#[derive(Clone, Copy)]
pub struct MessageDescriptor {
    code: u16,
    name: &'static str,
    decode: DecodeFn,
}

impl MessageDescriptor {
    /// Describes `M` under its own type code
    pub fn of<M: WireMessage>() -> Self {
        Self::with_code::<M>(M::TYPE_CODE)
    }

    /// Describes `M` under an explicit type code
    pub fn with_code<M: WireMessage>(code: u16) -> Self {
        Self {
            code,
            name: M::NAME,
            decode: decode_as::<M>,
        }
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Decodes a payload (without the type code prefix)
    ///
    /// Any codec failure is reported as [`ProtocolError::MalformedMessage`].
    pub fn decode(&self, codec: CodecType, payload: &[u8]) -> Result<Box<dyn Message>> {
        (self.decode)(codec, payload).map_err(|e| ProtocolError::MalformedMessage {
            code: self.code,
            name: self.name,
            reason: e.to_string(),
        })
    }
}

impl fmt::Debug for MessageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageDescriptor")
            .field("code", &format_args!("{:#06x}", self.code))
            .field("name", &self.name)
            .finish()
    }
}

/// Descriptors of the system messages every registry carries
pub fn builtin_descriptors() -> [MessageDescriptor; 2] {
    [MessageDescriptor::of::<Ping>(), MessageDescriptor::of::<Pong>()]
}

/// Collects caller message types before the registry is frozen
#[derive(Debug, Default)]
pub struct MessageRegistryBuilder {
    entries: Vec<MessageDescriptor>,
}

impl MessageRegistryBuilder {
    /// Registers `M` under its own type code
    pub fn register<M: WireMessage>(mut self) -> Self {
        self.entries.push(MessageDescriptor::of::<M>());
        self
    }

    /// Registers a prepared descriptor
    pub fn register_descriptor(mut self, descriptor: MessageDescriptor) -> Self {
        self.entries.push(descriptor);
        self
    }

    /// Merges caller entries then built-in entries and freezes the result
    pub fn build(self) -> MessageRegistry {
        let mut entries: HashMap<u16, MessageDescriptor> = HashMap::new();

        for descriptor in self.entries {
            if let Some(previous) = entries.insert(descriptor.code, descriptor) {
                tracing::warn!(
                    code = format!("{:#06x}", descriptor.code),
                    replaced = previous.name,
                    by = descriptor.name,
                    "Duplicate message type code, later registration wins"
                );
            }
        }

        for descriptor in builtin_descriptors() {
            if let Some(shadowed) = entries.insert(descriptor.code, descriptor) {
                tracing::warn!(
                    code = format!("{:#06x}", descriptor.code),
                    caller = shadowed.name,
                    builtin = descriptor.name,
                    "Message type code collides with a built-in message, built-in wins"
                );
            }
        }

        MessageRegistry { entries }
    }
}

/// Immutable map from type code to message descriptor
#[derive(Debug, Clone)]
pub struct MessageRegistry {
    entries: HashMap<u16, MessageDescriptor>,
}

impl MessageRegistry {
    pub fn builder() -> MessageRegistryBuilder {
        MessageRegistryBuilder::default()
    }

    pub fn get(&self, code: u16) -> Option<&MessageDescriptor> {
        self.entries.get(&code)
    }

    pub fn contains(&self, code: u16) -> bool {
        self.entries.contains_key(&code)
    }

    /// Returns all registered codes in ascending order
    pub fn codes(&self) -> Vec<u16> {
        let mut codes: Vec<u16> = self.entries.keys().copied().collect();
        codes.sort_unstable();
        codes
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Decodes a complete frame (type code prefix included)
    pub fn decode(&self, codec: CodecType, frame: &[u8]) -> Result<Box<dyn Message>> {
        let (code, payload) = split_type_code(frame)?;
        let descriptor = self
            .get(code)
            .ok_or(ProtocolError::UnsupportedMessageType(code))?;
        descriptor.decode(codec, payload)
    }
}

impl Default for MessageRegistry {
    /// Registry holding only the built-in system messages
    fn default() -> Self {
        Self::builder().build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{encode_frame, write_frame};
    use crate::messages::codes;
    use bytes::BytesMut;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Greeting {
        text: String,
    }

    impl WireMessage for Greeting {
        const TYPE_CODE: u16 = 1;
        const NAME: &'static str = "Greeting";
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Move {
        dx: i32,
        dy: i32,
    }

    impl WireMessage for Move {
        const TYPE_CODE: u16 = 2;
        const NAME: &'static str = "Move";
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct FakePing {
        label: String,
    }

    impl WireMessage for FakePing {
        const TYPE_CODE: u16 = codes::PING;
        const NAME: &'static str = "FakePing";
    }

    #[test]
    fn test_default_registry_has_builtins() {
        let registry = MessageRegistry::default();
        assert_eq!(registry.codes(), vec![codes::PING, codes::PONG]);
        assert_eq!(registry.get(codes::PING).unwrap().name(), "Ping");
    }

    #[test]
    fn test_caller_entries_are_merged() {
        let registry = MessageRegistry::builder()
            .register::<Greeting>()
            .register::<Move>()
            .build();

        assert_eq!(registry.len(), 4);
        assert!(registry.contains(1));
        assert!(registry.contains(2));
        assert!(!registry.contains(3));
        assert!(!registry.is_empty());
    }

    #[test]
    fn test_builtin_wins_code_collision() {
        let registry = MessageRegistry::builder().register::<FakePing>().build();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(codes::PING).unwrap().name(), "Ping");

        let frame = encode_frame(&Ping { timestamp: 9 }, CodecType::Postcard).unwrap();
        let message = registry.decode(CodecType::Postcard, &frame).unwrap();
        assert!(message.is::<Ping>());
    }

    #[test]
    fn test_later_duplicate_wins() {
        let registry = MessageRegistry::builder()
            .register::<Greeting>()
            .register_descriptor(MessageDescriptor::with_code::<Move>(1))
            .build();
        assert_eq!(registry.get(1).unwrap().name(), "Move");
    }

    #[test]
    fn test_round_trip_every_registered_variant() {
        let registry = MessageRegistry::builder()
            .register::<Greeting>()
            .register::<Move>()
            .build();

        for codec in [CodecType::Json, CodecType::Postcard] {
            let greeting = Greeting { text: "hello".into() };
            let frame = encode_frame(&greeting, codec).unwrap();
            let decoded = registry.decode(codec, &frame).unwrap();
            assert_eq!(decoded.downcast_ref::<Greeting>(), Some(&greeting));

            let mv = Move { dx: -3, dy: 4 };
            let frame = encode_frame(&mv, codec).unwrap();
            let decoded = registry.decode(codec, &frame).unwrap();
            assert_eq!(decoded.downcast_ref::<Move>(), Some(&mv));

            let ping = Ping { timestamp: u64::MAX };
            let frame = encode_frame(&ping, codec).unwrap();
            let decoded = registry.decode(codec, &frame).unwrap();
            assert_eq!(decoded.downcast_ref::<Ping>(), Some(&ping));

            let pong = Pong { timestamp: 0 };
            let frame = encode_frame(&pong, codec).unwrap();
            let decoded = registry.decode(codec, &frame).unwrap();
            assert_eq!(decoded.downcast_ref::<Pong>(), Some(&pong));
        }
    }

    #[test]
    fn test_unregistered_code_is_unsupported() {
        let registry = MessageRegistry::default();
        let mut frame = BytesMut::new();
        write_frame(&mut frame, 0x1234, &[1, 2, 3]);

        let err = registry.decode(CodecType::Postcard, &frame).unwrap_err();
        assert_eq!(err, ProtocolError::UnsupportedMessageType(0x1234));
    }

    #[test]
    fn test_payload_shape_mismatch_is_malformed() {
        let registry = MessageRegistry::builder().register::<Greeting>().build();

        // Greeting's code with a Move payload
        let payload = CodecType::Postcard.encode(&Move { dx: 100, dy: 100 }).unwrap();
        let mut frame = BytesMut::new();
        write_frame(&mut frame, Greeting::TYPE_CODE, &payload);

        match registry.decode(CodecType::Postcard, &frame) {
            Err(ProtocolError::MalformedMessage { code, name, .. }) => {
                assert_eq!(code, 1);
                assert_eq!(name, "Greeting");
            }
            other => panic!("expected malformed message, got {other:?}"),
        }
    }

    #[test]
    fn test_truncated_frame() {
        let registry = MessageRegistry::default();
        assert_eq!(
            registry.decode(CodecType::Postcard, &[0xFF]).unwrap_err(),
            ProtocolError::FrameTooShort { need: 2, have: 1 }
        );
    }
}
