//! Transport error types

use thiserror::Error;

/// Failures reported by an anchor transport.
///
/// These follow the steps a BLE transport goes through in `connect`: discover
/// the peer by name, open the link, enable notifications.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    /// The named peer was not found during discovery
    #[error("anchor '{name}' not found")]
    NotFound { name: String },
    /// The link could not be established
    #[error("connection to '{name}' failed: {details}")]
    ConnectFailed { name: String, details: String },
    /// Notifications could not be enabled after connecting
    #[error("subscription on '{name}' failed: {details}")]
    SubscribeFailed { name: String, details: String },
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;
