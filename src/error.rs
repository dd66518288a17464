//! Error taxonomy for the mock server core.

use thiserror::Error;

/// Error types surfaced by the server core.
#[derive(Debug, Error)]
pub enum MockError {
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("failed to bind port {port}: {cause}")]
    PortBind { port: u16, cause: String },
    #[error("upstream request to {target} failed: {cause}")]
    Upstream { target: String, cause: String },
    #[error("callback client {client_id} did not respond within {timeout_ms}ms")]
    CallbackTimeout { client_id: String, timeout_ms: u64 },
    #[error("callback channel for client {client_id} closed while a response was pending")]
    CallbackChannelClosed { client_id: String },
    #[error("no callback registered under name {name}")]
    CallbackLoad { name: String },
    #[error("no callback channel registered for client {client_id}")]
    CallbackClientMissing { client_id: String },
    #[error("server has been stopped")]
    Stopped,
    #[error("action exceeded the maximum response time of {0}ms")]
    DeadlineExceeded(u64),
}

impl MockError {
    /// Errors raised by a mismatch between configuration and reality at
    /// registration time map to 400 on the management API.
    pub fn is_configuration(&self) -> bool {
        matches!(self, MockError::Configuration(_))
    }
}
