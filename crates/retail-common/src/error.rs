//! Error taxonomy for the retail ETL pipeline
//!
//! Every stage reports failure through [`EtlError`]. The variants map onto the
//! pipeline stages so the runner and the audit log can tell where a run died.

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, EtlError>;

/// Classification of an extraction failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionErrorKind {
    /// The request did not complete within the configured timeout
    Timeout,
    /// The API answered 429 Too Many Requests
    RateLimited,
    /// Any other 4xx status
    Client(u16),
    /// Any 5xx status
    Server(u16),
    /// Connection refused, DNS failure, TLS error and friends
    Transport,
    /// The response body was not the JSON shape we expect
    Decode,
}

impl ExtractionErrorKind {
    /// Classify an HTTP status code that is not a success
    pub fn from_status(status: u16) -> Self {
        match status {
            429 => Self::RateLimited,
            400..=499 => Self::Client(status),
            500..=599 => Self::Server(status),
            _ => Self::Transport,
        }
    }
}

impl std::fmt::Display for ExtractionErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::RateLimited => write!(f, "rate limited"),
            Self::Client(status) => write!(f, "client error {}", status),
            Self::Server(status) => write!(f, "server error {}", status),
            Self::Transport => write!(f, "transport"),
            Self::Decode => write!(f, "decode"),
        }
    }
}

/// Main error type for the pipeline
#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Extraction failed ({kind}): {message}")]
    Extraction {
        kind: ExtractionErrorKind,
        message: String,
    },

    #[error("Transform failed: {0}")]
    Transform(String),

    #[error("Staging failed: {0}")]
    Staging(String),

    #[error("Verification failed: {0}")]
    Verification(String),

    #[error("Promotion failed: {0}")]
    Promotion(String),

    /// The audit trail could not be written. Always fatal for the run.
    #[error("Audit write failed: {0}")]
    AuditWrite(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid batch payload: {0}")]
    Payload(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EtlError {
    /// Create an extraction error
    pub fn extraction(kind: ExtractionErrorKind, message: impl Into<String>) -> Self {
        Self::Extraction {
            kind,
            message: message.into(),
        }
    }

    /// Create a transform error
    pub fn transform(msg: impl Into<String>) -> Self {
        Self::Transform(msg.into())
    }

    /// Create a staging error
    pub fn staging(msg: impl Into<String>) -> Self {
        Self::Staging(msg.into())
    }

    /// Create a verification error
    pub fn verification(msg: impl Into<String>) -> Self {
        Self::Verification(msg.into())
    }

    /// Staged row count does not match the batch
    pub fn row_count_mismatch(expected: u64, actual: u64) -> Self {
        Self::Verification(format!(
            "staging holds {} rows but the batch has {}",
            actual, expected
        ))
    }

    /// Create a promotion error
    pub fn promotion(msg: impl Into<String>) -> Self {
        Self::Promotion(msg.into())
    }

    /// Create an audit write error
    pub fn audit_write(msg: impl Into<String>) -> Self {
        Self::AuditWrite(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a payload error
    pub fn payload(msg: impl Into<String>) -> Self {
        Self::Payload(msg.into())
    }

    /// Short stage label used in logs
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Extraction { .. } => "extract",
            Self::Transform(_) => "transform",
            Self::Staging(_) => "stage",
            Self::Verification(_) => "verify",
            Self::Promotion(_) => "promote",
            Self::AuditWrite(_) => "audit",
            Self::Config(_) => "config",
            Self::Payload(_) | Self::Io(_) | Self::Serialization(_) => "payload",
        }
    }

    /// Whether this error means the audit trail is incomplete
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::AuditWrite(_))
    }
}
