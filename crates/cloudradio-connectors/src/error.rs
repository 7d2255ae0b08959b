//! Error types for the Event Hub and Key Vault connectors.

use thiserror::Error;

/// Errors that can occur during connector operations.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// I/O error (file, network, etc).
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// A message could not be encoded or an event body decoded.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Failed to reach the service, or it rejected the request.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Credentials were rejected.
    #[error("Authentication error: {0}")]
    AuthenticationError(String),

    /// Event hub or secret does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Error in the Event Hub sink.
    #[error("Sink error: {0}")]
    SinkError(String),

    /// Error in the Event Hub source.
    #[error("Source error: {0}")]
    SourceError(String),

    /// Receive task failures and lifecycle misuse.
    #[error("Runtime error: {0}")]
    RuntimeError(String),
}

/// Result type alias for connector operations.
pub type Result<T> = std::result::Result<T, ConnectorError>;

impl From<serde_json::Error> for ConnectorError {
    fn from(e: serde_json::Error) -> Self {
        ConnectorError::SerializationError(e.to_string())
    }
}

impl From<cloudradio_core::Error> for ConnectorError {
    fn from(e: cloudradio_core::Error) -> Self {
        match e {
            cloudradio_core::Error::Config(msg) => ConnectorError::ConfigError(msg),
            cloudradio_core::Error::Message(msg) => ConnectorError::SerializationError(msg),
            cloudradio_core::Error::Io(e) => ConnectorError::IoError(e),
            other => ConnectorError::RuntimeError(other.to_string()),
        }
    }
}

impl From<url::ParseError> for ConnectorError {
    fn from(e: url::ParseError) -> Self {
        ConnectorError::ConfigError(format!("invalid URL: {}", e))
    }
}

impl ConnectorError {
    /// Short label for the `error_type` metric dimension.
    pub fn kind(&self) -> &'static str {
        match self {
            ConnectorError::ConfigError(_) => "config",
            ConnectorError::IoError(_) => "io",
            ConnectorError::SerializationError(_) => "serialization",
            ConnectorError::ConnectionError(_) => "connection",
            ConnectorError::AuthenticationError(_) => "authentication",
            ConnectorError::NotFound(_) => "not_found",
            ConnectorError::SinkError(_) => "sink",
            ConnectorError::SourceError(_) => "source",
            ConnectorError::RuntimeError(_) => "runtime",
        }
    }
}
