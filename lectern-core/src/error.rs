//! Error types for Lectern operations

use crate::config::ConfigError;
use thiserror::Error;

/// Cache storage errors.
///
/// These are produced by key-value store implementations and never reach a
/// consumer: the cache adapter logs them and treats the operation as a miss
/// (reads) or a no-op (writes).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache read failed for {key}: {reason}")]
    Read { key: String, reason: String },

    #[error("Cache write failed for {key}: {reason}")]
    Write { key: String, reason: String },

    #[error("Cache quota exceeded writing {key}: needed {needed} bytes, {available} available")]
    QuotaExceeded {
        key: String,
        needed: u64,
        available: u64,
    },

    #[error("Cache storage unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Failure reported by the remote document database.
///
/// `code` is the collaborator's own error code, passed through unmodified so
/// callers can tell a transient network failure from a query-shape
/// configuration error (for example a missing composite index).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Remote query failed ({code}): {message}")]
pub struct RemoteQueryError {
    pub code: String,
    pub message: String,
}

impl RemoteQueryError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new("permission-denied", message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new("unavailable", message)
    }

    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::new("failed-precondition", message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new("invalid-argument", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not-found", message)
    }

    /// Raised when the task driving a query was cancelled or panicked.
    pub fn aborted(message: impl Into<String>) -> Self {
        Self::new("aborted", message)
    }

    /// True for failures worth retrying as-is.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.code.as_str(),
            "unavailable" | "deadline-exceeded" | "aborted" | "resource-exhausted"
        )
    }

    /// True when the query itself is malformed for the remote store.
    pub fn is_query_shape_error(&self) -> bool {
        matches!(self.code.as_str(), "failed-precondition" | "invalid-argument")
    }
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Field {field} is too long: {got} characters, max {max}")]
    TooLong { field: String, max: usize, got: usize },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Master error type for all Lectern errors.
#[derive(Debug, Error)]
pub enum LecternError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Query error: {0}")]
    Query(#[from] RemoteQueryError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for Lectern operations.
pub type LecternResult<T> = Result<T, LecternError>;

// =============================================================================
// TESTS
// =============================================================================
