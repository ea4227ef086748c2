//! Handler tables
//!
//! A [`HandlerTable`] maps a type code to one handler. The client owns two:
//! the built-in table (keep-alive replies) and the caller's table. Both are
//! consulted for every decoded message, built-in first, so a caller entry can
//! never replace built-in behavior.
//!
//! ```
//! use tidewire_client::{HandlerError, HandlerTable};
//! use tidewire_protocol::WireMessage;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct Chat { text: String }
//!
//! impl WireMessage for Chat {
//!     const TYPE_CODE: u16 = 12;
//!     const NAME: &'static str = "Chat";
//! }
//!
//! let handlers = HandlerTable::new().on::<Chat, _>(|_ctx, chat| {
//!     if chat.text.is_empty() {
//!         return Err(HandlerError::failed("empty chat line"));
//!     }
//!     Ok(())
//! });
//! assert!(handlers.contains(12));
//! ```

use std::collections::HashMap;
use std::fmt;

use tidewire_protocol::{ConnectionId, Message, Ping, Pong, WireMessage};

use crate::error::{ClientError, HandlerError};
use crate::send::SendPath;

pub type HandlerResult = Result<(), HandlerError>;

type BoxedHandler = Box<dyn FnMut(&mut HandlerContext<'_>, &dyn Message) -> HandlerResult + Send>;

/// What a handler may do while it runs: reply on the current connection
pub struct HandlerContext<'a> {
    path: SendPath<'a>,
}

impl<'a> HandlerContext<'a> {
    pub(crate) fn new(path: SendPath<'a>) -> Self {
        Self { path }
    }

    /// Sends a message on the connection the current event belongs to
    pub fn send(&mut self, message: &dyn Message) -> Result<(), ClientError> {
        self.path.send(message)
    }

    pub fn connection(&self) -> ConnectionId {
        self.path.connection
    }
}

#[derive(Default)]
pub struct HandlerTable {
    handlers: HashMap<u16, BoxedHandler>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a typed handler under `M::TYPE_CODE`
    pub fn on<M, F>(self, handler: F) -> Self
    where
        M: WireMessage,
        F: FnMut(&mut HandlerContext<'_>, &M) -> HandlerResult + Send + 'static,
    {
        self.on_code::<M, F>(M::TYPE_CODE, handler)
    }

    /// Registers a typed handler under an explicit code
    ///
    /// If the registry resolves `code` to a type other than `M`, the handler
    /// fails with [`HandlerError::TypeMismatch`].
    pub fn on_code<M, F>(self, code: u16, mut handler: F) -> Self
    where
        M: WireMessage,
        F: FnMut(&mut HandlerContext<'_>, &M) -> HandlerResult + Send + 'static,
    {
        self.on_any(code, move |ctx, message| {
            let typed = message
                .downcast_ref::<M>()
                .ok_or(HandlerError::TypeMismatch {
                    expected: M::NAME,
                    actual: message.name(),
                })?;
            handler(ctx, typed)
        })
    }

    /// Registers an untyped handler
    pub fn on_any<F>(mut self, code: u16, handler: F) -> Self
    where
        F: FnMut(&mut HandlerContext<'_>, &dyn Message) -> HandlerResult + Send + 'static,
    {
        if self.handlers.insert(code, Box::new(handler)).is_some() {
            tracing::warn!(
                code = format!("{:#06x}", code),
                "Handler registered twice for the same code, keeping the last one"
            );
        }
        self
    }

    pub fn contains(&self, code: u16) -> bool {
        self.handlers.contains_key(&code)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub(crate) fn get_mut(&mut self, code: u16) -> Option<&mut BoxedHandler> {
        self.handlers.get_mut(&code)
    }
}

impl fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut codes: Vec<u16> = self.handlers.keys().copied().collect();
        codes.sort_unstable();
        f.debug_struct("HandlerTable").field("codes", &codes).finish()
    }
}

/// The fixed built-in table: answers every PING with a PONG
pub fn builtin_handlers() -> HandlerTable {
    HandlerTable::new().on::<Ping, _>(reply_to_ping)
}

fn reply_to_ping(ctx: &mut HandlerContext<'_>, ping: &Ping) -> HandlerResult {
    // A lost pong is not worth failing the tick over.
    if let Err(e) = ctx.send(&Pong::reply_to(ping)) {
        tracing::warn!(connection = %ctx.connection(), error = %e, "Failed to answer PING");
    }
    Ok(())
}
