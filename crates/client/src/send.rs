//! Send path: frames a message into a transport buffer on the reliable
//! ordered pipeline

use tidewire_protocol::{CodecType, ConnectionId, Message, Pipeline, Transport};

use crate::error::ClientError;

/// Borrowed view of everything needed to put one message on the wire
pub(crate) struct SendPath<'a> {
    pub(crate) transport: &'a mut dyn Transport,
    pub(crate) connection: ConnectionId,
    pub(crate) codec: CodecType,
}

impl<'a> SendPath<'a> {
    pub(crate) fn new(
        transport: &'a mut dyn Transport,
        connection: ConnectionId,
        codec: CodecType,
    ) -> Self {
        Self {
            transport,
            connection,
            codec,
        }
    }

    /// Encodes then commits `message`
    ///
    /// The payload is encoded before a buffer is acquired so a codec failure
    /// never leaves a half-written buffer behind.
    pub(crate) fn send(&mut self, message: &dyn Message) -> Result<(), ClientError> {
        let code = message.type_code();

        let payload = message.encode_payload(self.codec).map_err(|e| {
            tracing::error!(code = format!("{:#06x}", code), error = %e, "Failed to encode message");
            ClientError::Protocol(e)
        })?;

        let mut buffer = self
            .transport
            .begin_send(Pipeline::ReliableOrdered, self.connection)
            .map_err(|e| {
                tracing::error!(
                    connection = %self.connection,
                    code = format!("{:#06x}", code),
                    error = %e,
                    "Failed to acquire send buffer"
                );
                ClientError::Transport(e)
            })?;

        buffer.write_message(code, &payload);

        self.transport.end_send(buffer).map_err(|e| {
            tracing::error!(
                connection = %self.connection,
                code = format!("{:#06x}", code),
                error = %e,
                "Failed to commit send buffer"
            );
            ClientError::Transport(e)
        })?;

        tracing::debug!(
            connection = %self.connection,
            message_type = message.name(),
            payload_len = payload.len(),
            "Message sent"
        );
        Ok(())
    }
}
