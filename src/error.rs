//! Error types for the DbCluster operator

use thiserror::Error;

/// Result type alias for operator operations
pub type Result<T> = std::result::Result<T, OperatorError>;

/// HTTP status returned by the API server when watch history has expired
pub const STATUS_GONE: u16 = 410;

/// HTTP status returned by the API server for missing objects
pub const STATUS_NOT_FOUND: u16 = 404;

/// HTTP status returned by the API server when an object already exists
pub const STATUS_CONFLICT: u16 = 409;

/// Errors that can occur during operator operations
#[derive(Debug, Error)]
pub enum OperatorError {
    /// Kubernetes API returned an error status
    #[error("Kubernetes API error ({code}): {message}")]
    Api { code: u16, message: String },
    /// Kubernetes client error without a status code
    #[error("Kubernetes API error: {0}")]
    KubeApi(String),
    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(String),
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Invalid resource state
    #[error("Invalid state: {0}")]
    InvalidState(String),
    /// Modified or Deleted received for a cluster that was never added
    #[error("unsafe state. cluster {name} was never created but we received event ({event})")]
    UnsafeState { name: String, event: &'static str },
    /// Watch history expired and the relisted clusters no longer match the cache
    #[error("requested version is outdated in apiserver")]
    VersionOutdated,
    /// A bounded poll ran out of attempts
    #[error("{operation} timed out after {attempts} attempts")]
    Timeout { operation: String, attempts: u32 },
    /// Scale request failed validation
    #[error("scale rejected: {0}")]
    ScaleRejected(String),
    /// Filesystem error while reclaiming volumes
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl OperatorError {
    /// HTTP status code of an API error, if any
    pub fn code(&self) -> Option<u16> {
        match self {
            OperatorError::Api { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.code() == Some(STATUS_NOT_FOUND)
    }

    pub fn is_conflict(&self) -> bool {
        self.code() == Some(STATUS_CONFLICT)
    }

    pub fn is_gone(&self) -> bool {
        self.code() == Some(STATUS_GONE)
    }
}

impl From<kube::Error> for OperatorError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ae) => OperatorError::Api {
                code: ae.code,
                message: ae.message,
            },
            other => OperatorError::KubeApi(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for OperatorError {
    fn from(err: serde_json::Error) -> Self {
        OperatorError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for OperatorError {
    fn from(err: reqwest::Error) -> Self {
        OperatorError::Http(err.to_string())
    }
}
