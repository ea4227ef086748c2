//! Message dispatcher
//!
//! Turns one transport data frame into handler calls:
//!
//! 1. decode the type code and payload through the [`MessageRegistry`]
//! 2. run the built-in handler for the code, if any
//! 3. run the caller handler for the code, if any
//!
//! Unknown codes and malformed payloads are reported and the frame is
//! dropped; nothing about them reaches the handlers, so the next frame is
//! processed as if the bad one never arrived. Only a handler failing for a
//! reason other than a type mismatch escapes as an error.

use tidewire_protocol::{CodecType, ConnectionId, MessageRegistry, ProtocolError, Transport};

use crate::error::HandlerError;
use crate::handler::{HandlerContext, HandlerTable};
use crate::send::SendPath;

/// What happened to one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Decoded and accepted by `handlers` handlers (1 or 2)
    Handled { code: u16, handlers: usize },
    /// Decoded but nobody handles this code
    Unhandled { code: u16 },
    /// Type code not in the registry
    Unsupported { code: u16 },
    /// Frame too short, payload does not match the registered type, or no
    /// handler accepts the decoded type
    Malformed { code: Option<u16>, reason: String },
}

/// Per-session dispatch counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub received: u64,
    pub handled: u64,
    pub unhandled: u64,
    pub unsupported: u64,
    pub malformed: u64,
}

pub struct Dispatcher {
    registry: MessageRegistry,
    builtin: HandlerTable,
    handlers: HandlerTable,
    codec: CodecType,
    stats: DispatchStats,
}

impl Dispatcher {
    pub fn new(
        registry: MessageRegistry,
        builtin: HandlerTable,
        handlers: HandlerTable,
        codec: CodecType,
    ) -> Self {
        for code in registry.codes() {
            if builtin.contains(code) && handlers.contains(code) {
                tracing::debug!(
                    code = format!("{:#06x}", code),
                    "Caller handler runs after the built-in handler for this code"
                );
            }
        }
        Self {
            registry,
            builtin,
            handlers,
            codec,
            stats: DispatchStats::default(),
        }
    }

    pub fn registry(&self) -> &MessageRegistry {
        &self.registry
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Dispatches one frame received on `connection`
    ///
    /// Handlers may reply through the same transport.
    pub fn dispatch(
        &mut self,
        frame: &[u8],
        transport: &mut dyn Transport,
        connection: ConnectionId,
    ) -> Result<Dispatch, HandlerError> {
        self.stats.received += 1;

        let message = match self.registry.decode(self.codec, frame) {
            Ok(message) => message,
            Err(ProtocolError::UnsupportedMessageType(code)) => {
                self.stats.unsupported += 1;
                tracing::warn!(
                    connection = %connection,
                    code = format!("{:#06x}", code),
                    "Unsupported message type, dropping frame"
                );
                return Ok(Dispatch::Unsupported { code });
            }
            Err(ProtocolError::MalformedMessage { code, name, reason }) => {
                self.stats.malformed += 1;
                tracing::error!(
                    connection = %connection,
                    code = format!("{:#06x}", code),
                    message_type = name,
                    reason = %reason,
                    "Malformed message, dropping frame"
                );
                return Ok(Dispatch::Malformed {
                    code: Some(code),
                    reason,
                });
            }
            Err(e) => {
                self.stats.malformed += 1;
                tracing::error!(connection = %connection, error = %e, "Undecodable frame, dropping");
                return Ok(Dispatch::Malformed {
                    code: None,
                    reason: e.to_string(),
                });
            }
        };

        let code = message.type_code();
        tracing::debug!(
            connection = %connection,
            message_type = message.name(),
            frame_len = frame.len(),
            "Dispatching message"
        );

        let mut invoked = 0;
        let mut accepted = 0;
        for table in [&mut self.builtin, &mut self.handlers] {
            let Some(handler) = table.get_mut(code) else {
                continue;
            };
            invoked += 1;

            let mut ctx = HandlerContext::new(SendPath::new(&mut *transport, connection, self.codec));
            match handler(&mut ctx, message.as_ref()) {
                Ok(()) => accepted += 1,
                Err(HandlerError::TypeMismatch { expected, actual }) => {
                    tracing::error!(
                        connection = %connection,
                        code = format!("{:#06x}", code),
                        expected,
                        actual,
                        "Handler does not accept the registered message type, skipping"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        connection = %connection,
                        code = format!("{:#06x}", code),
                        error = %e,
                        "Message handler failed"
                    );
                    return Err(e);
                }
            }
        }

        if invoked == 0 {
            self.stats.unhandled += 1;
            tracing::warn!(
                connection = %connection,
                message_type = message.name(),
                "No handler registered for message"
            );
            return Ok(Dispatch::Unhandled { code });
        }

        if accepted == 0 {
            self.stats.malformed += 1;
            return Ok(Dispatch::Malformed {
                code: Some(code),
                reason: format!("no handler accepts {}", message.name()),
            });
        }

        self.stats.handled += 1;
        Ok(Dispatch::Handled {
            code,
            handlers: accepted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::builtin_handlers;
    use crate::transport::memory::{AcceptMode, MemoryPeer};
    use bytes::BytesMut;
    use serde::{Deserialize, Serialize};
    use std::sync::{Arc, Mutex};
    use tidewire_protocol::frame::{encode_frame, write_frame};
    use tidewire_protocol::messages::codes;
    use tidewire_protocol::{Ping, Pong, TransportEvent, TransportFactory, WireMessage};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Greeting {
        text: String,
    }

    impl WireMessage for Greeting {
        const TYPE_CODE: u16 = 1;
        const NAME: &'static str = "Greeting";
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Shadow {
        label: String,
    }

    impl WireMessage for Shadow {
        const TYPE_CODE: u16 = codes::PING;
        const NAME: &'static str = "Shadow";
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Impostor {
        flag: bool,
    }

    impl WireMessage for Impostor {
        const TYPE_CODE: u16 = 1;
        const NAME: &'static str = "Impostor";
    }

    const CODEC: CodecType = CodecType::Postcard;

    fn connected_transport() -> (MemoryPeer, Box<dyn Transport>, ConnectionId) {
        let peer = MemoryPeer::new(AcceptMode::Immediate);
        let mut transport = peer.factory().create(&Default::default()).unwrap();
        let connection = transport.connect("127.0.0.1:9000".parse().unwrap()).unwrap();
        assert_eq!(transport.poll_event(connection), TransportEvent::Connect);
        (peer, transport, connection)
    }

    fn greeting_log() -> (Arc<Mutex<Vec<String>>>, HandlerTable) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let table = HandlerTable::new().on::<Greeting, _>(move |_, greeting| {
            sink.lock().unwrap().push(greeting.text.clone());
            Ok(())
        });
        (log, table)
    }

    fn registry() -> MessageRegistry {
        MessageRegistry::builder().register::<Greeting>().build()
    }

    #[test]
    fn test_caller_handler_receives_message() {
        let (_peer, mut transport, conn) = connected_transport();
        let (log, handlers) = greeting_log();
        let mut dispatcher = Dispatcher::new(registry(), builtin_handlers(), handlers, CODEC);

        let frame = encode_frame(&Greeting { text: "hello".into() }, CODEC).unwrap();
        let outcome = dispatcher.dispatch(&frame, transport.as_mut(), conn).unwrap();

        assert_eq!(outcome, Dispatch::Handled { code: 1, handlers: 1 });
        assert_eq!(*log.lock().unwrap(), vec!["hello".to_string()]);
        assert_eq!(dispatcher.stats().handled, 1);
    }

    #[test]
    fn test_unsupported_code_invokes_nothing() {
        let (_peer, mut transport, conn) = connected_transport();
        let (log, handlers) = greeting_log();
        let mut dispatcher = Dispatcher::new(registry(), builtin_handlers(), handlers, CODEC);

        let mut frame = BytesMut::new();
        write_frame(&mut frame, 0x0042, b"whatever");
        let outcome = dispatcher.dispatch(&frame, transport.as_mut(), conn).unwrap();

        assert_eq!(outcome, Dispatch::Unsupported { code: 0x0042 });
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(dispatcher.stats().unsupported, 1);
    }

    #[test]
    fn test_malformed_payload_does_not_disturb_next_frame() {
        let (_peer, mut transport, conn) = connected_transport();
        let (log, handlers) = greeting_log();
        let mut dispatcher = Dispatcher::new(registry(), builtin_handlers(), handlers, CODEC);

        // String length prefix claims 5 bytes, only 1 follows
        let mut bad = BytesMut::new();
        write_frame(&mut bad, Greeting::TYPE_CODE, &[0x05, b'a']);
        let good = encode_frame(&Greeting { text: "after".into() }, CODEC).unwrap();

        let first = dispatcher.dispatch(&bad, transport.as_mut(), conn).unwrap();
        assert!(matches!(first, Dispatch::Malformed { code: Some(1), .. }));

        let second = dispatcher.dispatch(&good, transport.as_mut(), conn).unwrap();
        assert_eq!(second, Dispatch::Handled { code: 1, handlers: 1 });
        assert_eq!(*log.lock().unwrap(), vec!["after".to_string()]);

        let stats = dispatcher.stats();
        assert_eq!(stats.received, 2);
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.handled, 1);
    }

    #[test]
    fn test_truncated_frame_is_malformed() {
        let (_peer, mut transport, conn) = connected_transport();
        let mut dispatcher =
            Dispatcher::new(registry(), builtin_handlers(), HandlerTable::new(), CODEC);

        let outcome = dispatcher.dispatch(&[0x01], transport.as_mut(), conn).unwrap();
        assert!(matches!(outcome, Dispatch::Malformed { code: None, .. }));
    }

    #[test]
    fn test_registered_but_unhandled() {
        let (_peer, mut transport, conn) = connected_transport();
        let mut dispatcher =
            Dispatcher::new(registry(), builtin_handlers(), HandlerTable::new(), CODEC);

        let frame = encode_frame(&Greeting { text: "anyone?".into() }, CODEC).unwrap();
        let outcome = dispatcher.dispatch(&frame, transport.as_mut(), conn).unwrap();

        assert_eq!(outcome, Dispatch::Unhandled { code: 1 });
        assert_eq!(dispatcher.stats().unhandled, 1);
    }

    #[test]
    fn test_ping_is_answered_without_caller_handler() {
        let (peer, mut transport, conn) = connected_transport();
        let mut dispatcher =
            Dispatcher::new(registry(), builtin_handlers(), HandlerTable::new(), CODEC);

        let frame = encode_frame(&Ping { timestamp: 77 }, CODEC).unwrap();
        let outcome = dispatcher.dispatch(&frame, transport.as_mut(), conn).unwrap();
        assert_eq!(
            outcome,
            Dispatch::Handled {
                code: codes::PING,
                handlers: 1
            }
        );

        let task = transport.schedule_update();
        transport.complete(task);

        let sent = peer.take_delivered();
        assert_eq!(sent.len(), 1);
        let reply = MessageRegistry::default().decode(CODEC, &sent[0]).unwrap();
        assert_eq!(reply.downcast_ref::<Pong>(), Some(&Pong { timestamp: 77 }));
    }

    #[test]
    fn test_builtin_runs_before_caller() {
        let (_peer, mut transport, conn) = connected_transport();
        let order = Arc::new(Mutex::new(Vec::new()));

        let builtin_order = Arc::clone(&order);
        let builtin = HandlerTable::new().on::<Greeting, _>(move |_, _| {
            builtin_order.lock().unwrap().push("builtin");
            Ok(())
        });
        let caller_order = Arc::clone(&order);
        let caller = HandlerTable::new().on::<Greeting, _>(move |_, _| {
            caller_order.lock().unwrap().push("caller");
            Ok(())
        });

        let mut dispatcher = Dispatcher::new(registry(), builtin, caller, CODEC);
        let frame = encode_frame(&Greeting { text: "x".into() }, CODEC).unwrap();
        let outcome = dispatcher.dispatch(&frame, transport.as_mut(), conn).unwrap();

        assert_eq!(outcome, Dispatch::Handled { code: 1, handlers: 2 });
        assert_eq!(*order.lock().unwrap(), vec!["builtin", "caller"]);
    }

    #[test]
    fn test_type_mismatch_is_reported_not_raised() {
        let (peer, mut transport, conn) = connected_transport();
        // Caller registers its own type under the PING code; the built-in Ping wins
        let registry = MessageRegistry::builder().register::<Shadow>().build();
        let handlers = HandlerTable::new().on::<Shadow, _>(|_, _| Ok(()));
        let mut dispatcher = Dispatcher::new(registry, builtin_handlers(), handlers, CODEC);

        let frame = encode_frame(&Ping { timestamp: 1 }, CODEC).unwrap();
        let outcome = dispatcher.dispatch(&frame, transport.as_mut(), conn).unwrap();

        assert_eq!(
            outcome,
            Dispatch::Handled {
                code: codes::PING,
                handlers: 1
            }
        );
        assert_eq!(dispatcher.stats().malformed, 0);
        assert_eq!(dispatcher.stats().handled, 1);

        // The built-in reply still went out
        let task = transport.schedule_update();
        transport.complete(task);
        assert_eq!(peer.take_delivered().len(), 1);
    }

    #[test]
    fn test_frame_no_handler_accepts_is_malformed() {
        let (_peer, mut transport, conn) = connected_transport();
        // Greeting is registered for code 1 but the only handler expects Impostor
        let handlers = HandlerTable::new().on::<Impostor, _>(|_, _| Ok(()));
        let mut dispatcher = Dispatcher::new(registry(), builtin_handlers(), handlers, CODEC);

        let frame = encode_frame(&Greeting { text: "x".into() }, CODEC).unwrap();
        let outcome = dispatcher.dispatch(&frame, transport.as_mut(), conn).unwrap();

        assert!(matches!(outcome, Dispatch::Malformed { code: Some(1), .. }));
        let stats = dispatcher.stats();
        assert_eq!(stats.received, 1);
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.handled, 0);
    }

    #[test]
    fn test_handler_failure_propagates() {
        let (_peer, mut transport, conn) = connected_transport();
        let handlers =
            HandlerTable::new().on::<Greeting, _>(|_, _| Err(HandlerError::failed("boom")));
        let mut dispatcher = Dispatcher::new(registry(), builtin_handlers(), handlers, CODEC);

        let frame = encode_frame(&Greeting { text: "x".into() }, CODEC).unwrap();
        let err = dispatcher
            .dispatch(&frame, transport.as_mut(), conn)
            .unwrap_err();
        assert!(matches!(err, HandlerError::Failed(_)));
        assert_eq!(err.to_string(), "boom");
    }
}
