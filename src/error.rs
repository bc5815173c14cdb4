//! Closed error taxonomy shared by every stage of the ingestion and retrieval
//! pipelines. Callers that need to branch on failure kind match on
//! [`CoreError::kind`] rather than pattern-matching the full enum, so new
//! context can be added to a variant without breaking callers.

use std::fmt;

/// Stable, closed classification of a [`CoreError`]: validation, upstream
/// unavailability, malformed content, missing resources, write conflicts,
/// deadlines, security violations, and internal bugs.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    ValidationRejected,
    UpstreamUnavailable,
    ContentMalformed,
    NotFound,
    ConflictingWrite,
    DeadlineExceeded,
    SecurityViolation,
    InternalInvariant,
}

impl ErrorKind {
    /// Lowercase, hyphenated wire form (`"validation-rejected"`) used in
    /// client-facing error payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ValidationRejected => "validation-rejected",
            ErrorKind::UpstreamUnavailable => "upstream-unavailable",
            ErrorKind::ContentMalformed => "content-malformed",
            ErrorKind::NotFound => "not-found",
            ErrorKind::ConflictingWrite => "conflicting-write",
            ErrorKind::DeadlineExceeded => "deadline-exceeded",
            ErrorKind::SecurityViolation => "security-violation",
            ErrorKind::InternalInvariant => "internal-invariant",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The core's single error type. Every fallible operation returns
/// `Result<T, CoreError>`; stages that talk to `anyhow`-flavored glue code
/// wrap it via `CoreError::internal` or the `#[from]` conversions below.
#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    #[error("validation rejected: {0}")]
    ValidationRejected(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("content malformed: {0}")]
    ContentMalformed(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflicting write: {0}")]
    ConflictingWrite(String),

    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    #[error("security violation: {0}")]
    SecurityViolation(String),

    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::ValidationRejected(_) => ErrorKind::ValidationRejected,
            CoreError::UpstreamUnavailable(_) => ErrorKind::UpstreamUnavailable,
            CoreError::ContentMalformed(_) => ErrorKind::ContentMalformed,
            CoreError::NotFound(_) => ErrorKind::NotFound,
            CoreError::ConflictingWrite(_) => ErrorKind::ConflictingWrite,
            CoreError::DeadlineExceeded(_) => ErrorKind::DeadlineExceeded,
            CoreError::SecurityViolation(_) => ErrorKind::SecurityViolation,
            CoreError::InternalInvariant(_) => ErrorKind::InternalInvariant,
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        CoreError::NotFound(what.into())
    }

    pub fn internal(what: impl Into<String>) -> Self {
        CoreError::InternalInvariant(what.into())
    }

    /// Message with sanitizer applied, safe to hand back across the
    /// external interface boundary.
    pub fn sanitized_message(&self) -> String {
        crate::sanitize::redact(&self.to_string())
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => CoreError::NotFound("row not found".to_string()),
            other => CoreError::UpstreamUnavailable(other.to_string()),
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
