//! Error types for the sequence/topic SDK.

use std::time::Duration;
use thiserror::Error;

/// Error for invalid HTTP header configuration.
#[derive(Debug, Clone, Error)]
pub enum InvalidHeaderError {
    #[error("invalid header name: {0}")]
    InvalidName(String),
    #[error("invalid header value: {0}")]
    InvalidValue(String),
}

/// Misuse of the writer scope: use-after-close, or construction outside
/// the mandatory scoped-acquisition wrapper.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("writer is closed")]
    WriterClosed,

    #[error("sequence writer must be constructed via `with_sequence`")]
    UnsafeLifecycle,

    #[error("sequence is not in Pending state")]
    SequenceClosed,
}

/// Synchronous validation failures, returned at the offending call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("topic already exists: {0}")]
    DuplicateTopic(String),

    #[error("ontology mismatch: topic expects `{expected}`, payload is `{actual}`")]
    OntologyMismatch { expected: String, actual: String },

    #[error("negative timestamp: {0}")]
    NegativeTimestamp(i64),

    #[error("duplicate query field: {0}")]
    DuplicateField(String),

    #[error("heterogeneous catalog query: expressions reference both `{first}` and `{second}`")]
    HeterogeneousCatalogQuery { first: String, second: String },
}

/// Connection loss, batch timeout, or server-side rejection.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("sequence or topic not found: {url}")]
    NotFound { url: String },

    #[error("resource already exists with different configuration")]
    Conflict,

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("invalid request: {message}")]
    BadRequest { message: String },

    #[error("server error: {status} - {message}")]
    ServerError { status: u16, message: String },

    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),

    #[error("timeout")]
    Timeout,

    #[error("work queue overflow")]
    BufferOverflow,
}

impl Clone for TransportError {
    fn clone(&self) -> Self {
        match self {
            TransportError::NotFound { url } => TransportError::NotFound { url: url.clone() },
            TransportError::Conflict => TransportError::Conflict,
            TransportError::Unauthorized => TransportError::Unauthorized,
            TransportError::Forbidden => TransportError::Forbidden,
            TransportError::RateLimited { retry_after } => TransportError::RateLimited {
                retry_after: *retry_after,
            },
            TransportError::BadRequest { message } => TransportError::BadRequest {
                message: message.clone(),
            },
            TransportError::ServerError { status, message } => TransportError::ServerError {
                status: *status,
                message: message.clone(),
            },
            // reqwest::Error isn't Clone; fold into a ServerError with the same text.
            TransportError::Network(e) => TransportError::ServerError {
                status: 0,
                message: e.to_string(),
            },
            TransportError::Timeout => TransportError::Timeout,
            TransportError::BufferOverflow => TransportError::BufferOverflow,
        }
    }
}

impl TransportError {
    /// Build a transport error from an HTTP status code.
    pub fn from_status(status: u16, url: &str) -> Self {
        match status {
            400 => TransportError::BadRequest {
                message: "bad request".to_string(),
            },
            401 => TransportError::Unauthorized,
            403 => TransportError::Forbidden,
            404 => TransportError::NotFound {
                url: url.to_string(),
            },
            409 => TransportError::Conflict,
            429 => TransportError::RateLimited { retry_after: None },
            _ if status >= 500 => TransportError::ServerError {
                status,
                message: format!("server error {status}"),
            },
            _ => TransportError::ServerError {
                status,
                message: format!("unexpected status {status}"),
            },
        }
    }

    /// Whether the batch that produced this error may be retried once,
    /// per spec: "a single retry... is permitted only if the transport
    /// reports an idempotent-retryable code".
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::RateLimited { .. }
                | TransportError::ServerError { .. }
                | TransportError::Network(_)
                | TransportError::Timeout
        )
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            TransportError::NotFound { .. } => Some(404),
            TransportError::Conflict => Some(409),
            TransportError::Unauthorized => Some(401),
            TransportError::Forbidden => Some(403),
            TransportError::RateLimited { .. } => Some(429),
            TransportError::BadRequest { .. } => Some(400),
            TransportError::ServerError { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else {
            TransportError::Network(err)
        }
    }
}

/// Schema decode failure on read, or a corrupted record batch. The
/// streamer that raised it becomes unusable.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DataError {
    #[error("schema decode failed for topic `{topic}`: {message}")]
    DecodeFailed { topic: String, message: String },

    #[error("corrupted record batch on topic `{topic}`")]
    CorruptBatch { topic: String },
}

/// Unified error type for call sites that cross subsystem boundaries
/// (e.g. `SequenceWriter::close`, which can surface both lifecycle and
/// transport failures).
#[derive(Debug, Error)]
pub enum SdkError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error("cancelled")]
    Cancelled,

    #[error("json error: {0}")]
    Json(String),
}

impl From<reqwest::Error> for SdkError {
    fn from(err: reqwest::Error) -> Self {
        SdkError::Transport(err.into())
    }
}

impl From<serde_json::Error> for SdkError {
    fn from(err: serde_json::Error) -> Self {
        SdkError::Json(err.to_string())
    }
}
