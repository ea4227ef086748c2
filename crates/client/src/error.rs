use tidewire_protocol::{ProtocolError, TransportError};

/// Client errors
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Not connected: no live connection handle")]
    NotConnected,

    #[error("Invalid address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Handler failed: {0}")]
    Handler(#[from] HandlerError),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Errors returned by message handlers
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The handler was given a message of a different concrete type than it
    /// was registered for
    #[error("Handler expected {expected} but received {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    /// Any other handler failure
    #[error(transparent)]
    Failed(Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    /// Wraps an arbitrary error as a handler failure
    pub fn failed<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        HandlerError::Failed(error.into())
    }
}

impl From<ClientError> for HandlerError {
    fn from(error: ClientError) -> Self {
        HandlerError::Failed(Box::new(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_inside_handler() {
        let err: HandlerError = ClientError::NotConnected.into();
        assert_eq!(err.to_string(), "Not connected: no live connection handle");
    }

    #[test]
    fn test_type_mismatch_message() {
        let err = HandlerError::TypeMismatch {
            expected: "Greeting",
            actual: "Ping",
        };
        assert_eq!(err.to_string(), "Handler expected Greeting but received Ping");
    }
}
