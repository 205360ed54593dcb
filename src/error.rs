//! Error handling for the mining pool
//!
//! One error type shared by every component, with helpers to build the
//! message-carrying variants and to classify errors for retries and logging.

use thiserror::Error;

/// Result type alias for mining pool operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the mining pool
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request errors
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML configuration parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Layered configuration errors
    #[error("Configuration source error: {0}")]
    ConfigSource(#[from] ::config::ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Malformed client requests
    #[error("Protocol violation: {message}")]
    Protocol { message: String },

    /// Target validation errors
    #[error("Invalid target: {message}")]
    Target { message: String },

    /// Nonce validation errors
    #[error("Invalid nonce: {message}")]
    Nonce { message: String },

    /// Durable store errors
    #[error("Store error: {message}")]
    Store { message: String },

    /// Message queue errors
    #[error("Queue error: {message}")]
    Queue { message: String },

    /// Chain node communication errors
    #[error("Chain node error: {message}")]
    Node { message: String },

    /// Signing and key errors
    #[error("Cryptographic error: {message}")]
    Crypto { message: String },

    /// Payout distribution errors
    #[error("Payout error: {message}")]
    Payout { message: String },

    /// Timeout errors
    #[error("Operation timed out: {operation}")]
    Timeout { operation: String },

    /// Network errors
    #[error("Network error: {message}")]
    Network { message: String },

    /// Invalid state errors
    #[error("Invalid state: {message}")]
    InvalidState { message: String },
}

impl Error {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a protocol violation error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a target error
    pub fn target(message: impl Into<String>) -> Self {
        Self::Target {
            message: message.into(),
        }
    }

    /// Create a nonce error
    pub fn nonce(message: impl Into<String>) -> Self {
        Self::Nonce {
            message: message.into(),
        }
    }

    /// Create a store error
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Create a queue error
    pub fn queue(message: impl Into<String>) -> Self {
        Self::Queue {
            message: message.into(),
        }
    }

    /// Create a chain node error
    pub fn node(message: impl Into<String>) -> Self {
        Self::Node {
            message: message.into(),
        }
    }

    /// Create a crypto error
    pub fn crypto(message: impl Into<String>) -> Self {
        Self::Crypto {
            message: message.into(),
        }
    }

    /// Create a payout error
    pub fn payout(message: impl Into<String>) -> Self {
        Self::Payout {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Create a network error
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(e) => {
                if let Some(status) = e.status() {
                    status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS
                } else {
                    // Network errors are typically retryable
                    e.is_timeout() || e.is_connect() || e.is_request()
                }
            }
            Error::Network { .. } => true,
            Error::Timeout { .. } => true,
            Error::Node { .. } => true,
            Error::Io(_) => true,
            _ => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::Http(_) => "http",
            Error::Json(_) => "json",
            Error::Yaml(_) => "yaml",
            Error::ConfigSource(_) => "config_source",
            Error::Io(_) => "io",
            Error::Config { .. } => "config",
            Error::Protocol { .. } => "protocol",
            Error::Target { .. } => "target",
            Error::Nonce { .. } => "nonce",
            Error::Store { .. } => "store",
            Error::Queue { .. } => "queue",
            Error::Node { .. } => "node",
            Error::Crypto { .. } => "crypto",
            Error::Payout { .. } => "payout",
            Error::Timeout { .. } => "timeout",
            Error::Network { .. } => "network",
            Error::InvalidState { .. } => "invalid_state",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_helpers() {
        let err = Error::protocol("nonce must be 16 hex digits");
        assert_eq!(
            err.to_string(),
            "Protocol violation: nonce must be 16 hex digits"
        );
        assert_eq!(err.category(), "protocol");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_retryable_errors() {
        assert!(Error::node("tip unavailable").is_retryable());
        assert!(Error::timeout("put_txs").is_retryable());
        assert!(!Error::crypto("bad seed").is_retryable());
        assert!(!Error::payout("signing failed").is_retryable());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed");
        let err: Error = io.into();
        assert_eq!(err.category(), "io");
        assert!(err.is_retryable());
    }
}
