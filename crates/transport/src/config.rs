//! Transport configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timeouts and limits shared by the socket and RPC transports.
///
/// The in-process transport ignores all of these.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Upper bound for establishing a connection, in milliseconds.
    pub connect_timeout_ms: u64,
    /// Upper bound for one request/response exchange, in milliseconds.
    pub call_timeout_ms: u64,
    /// Largest accepted frame payload, in bytes.
    pub max_frame_len: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            call_timeout_ms: 30_000,
            max_frame_len: 16 * 1024 * 1024,
        }
    }
}

impl TransportConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: TransportConfig = serde_json::from_str(r#"{"call_timeout_ms": 250}"#).unwrap();
        assert_eq!(config.call_timeout(), Duration::from_millis(250));
        assert_eq!(config.connect_timeout_ms, TransportConfig::default().connect_timeout_ms);
    }
}
