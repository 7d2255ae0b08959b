//! Error types for the blob blocks.
//!
//! Remote failures are classified into a small taxonomy so callers can tell a
//! missing container from a bad credential from a flaky network:
//!
//! - `Config`: bad auth method, missing required field (raised at construction)
//! - `MalformedDestination`: a URL or connection string that does not parse
//! - `NotFound`: container or blob does not exist
//! - `Authentication`: credential rejected
//! - `Transport`: everything else on the wire (already retried by the client)

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Malformed destination: {0}")]
    MalformedDestination(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Transport error: {0}")]
    Transport(String),

    /// The committed block list does not match what was staged.
    #[error("Invalid block list: {0}")]
    InvalidBlockList(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal queue or worker fault: the staging task panicked or was
    /// cancelled, or a queue refused an item it had room for.
    #[error("Staging task failed: {0}")]
    Worker(String),

    #[error(transparent)]
    Core(#[from] cloudradio_core::Error),
}

pub type Result<T> = std::result::Result<T, BlobError>;

/// Coarse error class, used as a metrics label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Config,
    Malformed,
    NotFound,
    Authentication,
    Transport,
    Internal,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Config => "config",
            ErrorClass::Malformed => "malformed",
            ErrorClass::NotFound => "not_found",
            ErrorClass::Authentication => "authentication",
            ErrorClass::Transport => "transport",
            ErrorClass::Internal => "internal",
        }
    }
}

impl BlobError {
    pub fn class(&self) -> ErrorClass {
        match self {
            BlobError::Config(_) => ErrorClass::Config,
            BlobError::MalformedDestination(_) => ErrorClass::Malformed,
            BlobError::NotFound(_) => ErrorClass::NotFound,
            BlobError::Authentication(_) => ErrorClass::Authentication,
            BlobError::Transport(_) => ErrorClass::Transport,
            BlobError::Core(cloudradio_core::Error::Config(_)) => ErrorClass::Config,
            BlobError::InvalidBlockList(_)
            | BlobError::Serialization(_)
            | BlobError::Worker(_)
            | BlobError::Core(_) => ErrorClass::Internal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, BlobError::NotFound(_))
    }
}

impl From<serde_json::Error> for BlobError {
    fn from(e: serde_json::Error) -> Self {
        BlobError::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for BlobError {
    fn from(e: std::io::Error) -> Self {
        BlobError::Core(cloudradio_core::Error::Io(e))
    }
}

impl From<url::ParseError> for BlobError {
    fn from(e: url::ParseError) -> Self {
        BlobError::MalformedDestination(e.to_string())
    }
}

/// Map an `object_store` failure onto the blob taxonomy.
///
/// Typed variants are used where the store reports them; list and container
/// calls surface Azure's error codes only in the message text.
pub fn classify(err: object_store::Error) -> BlobError {
    match err {
        object_store::Error::NotFound { path, source } => {
            BlobError::NotFound(format!("{}: {}", path, source))
        }
        object_store::Error::Unauthenticated { path, source }
        | object_store::Error::PermissionDenied { path, source } => {
            BlobError::Authentication(format!("{}: {}", path, source))
        }
        object_store::Error::UnknownConfigurationKey { key, .. } => {
            BlobError::Config(format!("unknown configuration key: {}", key))
        }
        other => {
            let msg = other.to_string();
            if msg.contains("ContainerNotFound")
                || msg.contains("BlobNotFound")
                || msg.contains("404 Not Found")
            {
                BlobError::NotFound(msg)
            } else if msg.contains("AuthenticationFailed")
                || msg.contains("AuthorizationFailure")
                || msg.contains("403 Forbidden")
                || msg.contains("401 Unauthorized")
            {
                BlobError::Authentication(msg)
            } else {
                BlobError::Transport(msg)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generic(msg: &str) -> object_store::Error {
        object_store::Error::Generic {
            store: "MicrosoftAzure",
            source: msg.to_string().into(),
        }
    }

    #[test]
    fn test_classify_typed_not_found() {
        let err = classify(object_store::Error::NotFound {
            path: "radio/capture.bin".to_string(),
            source: "gone".into(),
        });
        assert!(err.is_not_found());
        assert_eq!(err.class(), ErrorClass::NotFound);
    }

    #[test]
    fn test_classify_typed_auth() {
        let err = classify(object_store::Error::Unauthenticated {
            path: "x".to_string(),
            source: "bad key".into(),
        });
        assert!(matches!(err, BlobError::Authentication(_)));
    }

    #[test]
    fn test_classify_container_not_found_in_message() {
        let err = classify(generic(
            "Client error with status 404 Not Found: <Code>ContainerNotFound</Code>",
        ));
        assert!(err.is_not_found());
    }

    #[test]
    fn test_classify_auth_failure_in_message() {
        let err = classify(generic("Server returned AuthenticationFailed"));
        assert_eq!(err.class(), ErrorClass::Authentication);
    }

    #[test]
    fn test_classify_everything_else_is_transport() {
        let err = classify(generic("connection reset by peer"));
        assert_eq!(err.class(), ErrorClass::Transport);
    }

    #[test]
    fn test_url_parse_error_is_malformed() {
        let err: BlobError = url::Url::parse("not a url").unwrap_err().into();
        assert_eq!(err.class(), ErrorClass::Malformed);
    }

    #[test]
    fn test_core_config_error_class() {
        let err: BlobError = cloudradio_core::Error::Config("bad".to_string()).into();
        assert_eq!(err.class(), ErrorClass::Config);
        assert_eq!(err.to_string(), "Configuration error: bad");
    }
}
