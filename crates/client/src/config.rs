//! Client configuration
//!
//! ```
//! use tidewire_client::ClientConfig;
//! use std::time::Duration;
//!
//! let config = ClientConfig::from_json(r#"{ "default_port": 7777, "codec": "json" }"#).unwrap();
//! assert_eq!(config.default_port, 7777);
//! assert_eq!(config.connect_timeout(), Duration::from_secs(5));
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tidewire_protocol::{CodecType, TransportConfig};

use crate::error::ClientError;

/// Port used by `connect_default` unless configured otherwise
pub const DEFAULT_PORT: u16 = 9000;

/// Connect attempts older than this are abandoned by `update`
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Port used when none is given
    pub default_port: u16,

    /// Deadline for the transport connect event, in milliseconds
    pub connect_timeout_ms: u64,

    /// Payload codec; both ends must agree
    pub codec: CodecType,

    /// Parameters handed to the transport factory
    pub transport: TransportConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            default_port: DEFAULT_PORT,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            codec: CodecType::default(),
            transport: TransportConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Parses a JSON document; missing fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self, ClientError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ClientError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        if self.transport.window_size == 0 {
            return Err(ClientError::Config("transport.window_size must be > 0".into()));
        }
        if self.transport.max_message_size < tidewire_protocol::frame::TYPE_CODE_LEN {
            return Err(ClientError::Config(format!(
                "transport.max_message_size must be at least {} bytes",
                tidewire_protocol::frame::TYPE_CODE_LEN
            )));
        }
        if u32::try_from(self.transport.max_message_size).is_err() {
            return Err(ClientError::Config(format!(
                "transport.max_message_size must not exceed {} bytes",
                u32::MAX
            )));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_default_port(mut self, port: u16) -> Self {
        self.default_port = port;
        self
    }

    pub fn with_codec(mut self, codec: CodecType) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }
}
