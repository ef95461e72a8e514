//! Error types for the acquisition and persistence pipeline
//!
//! Transport and storage failures are represented here, but they never travel
//! past the [`RegisterClient`](crate::client::RegisterClient) or
//! [`PersistencePipeline`](crate::persistence::PersistencePipeline) boundaries as
//! errors: those components turn them into events and status messages. The
//! remaining variants cover call-time violations such as malformed addresses or
//! invalid configuration, which are returned to the caller directly.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type MonitorResult<T> = Result<T, MonitorError>;

/// Errors produced by the monitor.
#[derive(Error, Debug)]
pub enum MonitorError {
    /// Connection could not be established or was lost
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// Operation exceeded its deadline
    #[error("Timeout during {operation} after {timeout_ms} ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Malformed or unexpected frame from the controller
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Controller answered with a Modbus exception
    #[error("Controller exception: function={function:#04X}, {exception}")]
    Exception { function: u8, exception: String },

    /// Operation requires an open connection
    #[error("Not connected to controller")]
    NotConnected,

    /// Register address that does not follow the controller's naming scheme
    #[error("Invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    /// Invalid configuration or call arguments
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// History store rejected or failed an operation
    #[error("Storage error: {message}")]
    Storage { message: String },

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MonitorError {
    /// Create a connection error
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(operation: S, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create a protocol error
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create an invalid address error
    pub fn invalid_address<A: Into<String>, R: Into<String>>(address: A, reason: R) -> Self {
        Self::InvalidAddress {
            address: address.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a storage error
    pub fn storage<S: Into<String>>(message: S) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Whether this error came from the controller link.
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::Timeout { .. }
                | Self::Protocol { .. }
                | Self::Exception { .. }
                | Self::NotConnected
                | Self::Io(_)
        )
    }

    /// Whether this error came from the history store.
    pub fn is_storage_error(&self) -> bool {
        matches!(self, Self::Storage { .. } | Self::Serialization(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = MonitorError::timeout("read D100", 1000);
        assert_eq!(err.to_string(), "Timeout during read D100 after 1000 ms");

        let err = MonitorError::Exception {
            function: 0x03,
            exception: "IllegalDataAddress".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Controller exception: function=0x03, IllegalDataAddress"
        );

        let err = MonitorError::invalid_address("X1", "unknown prefix");
        assert_eq!(err.to_string(), "Invalid address 'X1': unknown prefix");
    }

    #[test]
    fn test_classification() {
        assert!(MonitorError::connection("refused").is_transport_error());
        assert!(MonitorError::NotConnected.is_transport_error());
        assert!(!MonitorError::storage("disk full").is_transport_error());
        assert!(MonitorError::storage("disk full").is_storage_error());
        assert!(!MonitorError::configuration("bad").is_storage_error());
    }
}
