//! Error types for docop
//!
//! This module defines the error taxonomy shared by every operation kind.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! Errors are `Clone` because an operation keeps its first failure as a sticky
//! exec-status and hands the same error back on every later call.

use std::fmt;
use thiserror::Error;

/// Result type alias for docop operations
pub type DocOpResult<T> = std::result::Result<T, DocOpError>;

/// Domain error code reported by the document store for a failed request.
///
/// The value is opaque at this layer; it is forwarded to the caller so it
/// can be surfaced as the statement's SQLSTATE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode(pub u32);

impl ErrorCode {
    /// Used when a failed response does not report a code.
    pub const INTERNAL_ERROR: ErrorCode = ErrorCode(1);
    /// Unique constraint violated.
    pub const UNIQUE_VIOLATION: ErrorCode = ErrorCode(23505);
    /// Serialization failure.
    pub const SERIALIZATION_FAILURE: ErrorCode = ErrorCode(40001);
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transaction-conflict annotation attached to a failed response.
///
/// The caller uses it to decide whether the statement may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxnErrorCode {
    /// The enclosing transaction was aborted
    Aborted,
    /// The read must be restarted at a newer read time
    ReadRestartRequired,
    /// A conflicting transaction holds an intent on the same rows
    Conflict,
    /// The requested snapshot is no longer retained
    SnapshotTooOld,
}

impl TxnErrorCode {
    /// Whether a statement failing with this code may be retried as a whole.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TxnErrorCode::ReadRestartRequired | TxnErrorCode::Conflict | TxnErrorCode::Aborted
        )
    }
}

impl fmt::Display for TxnErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TxnErrorCode::Aborted => "aborted",
            TxnErrorCode::ReadRestartRequired => "read restart required",
            TxnErrorCode::Conflict => "conflict",
            TxnErrorCode::SnapshotTooOld => "snapshot too old",
        };
        f.write_str(name)
    }
}

/// Error types for document operations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DocOpError {
    /// The operation was canceled through `abort_and_wait`
    #[error("Operation canceled")]
    OperationCanceled,

    /// A write collided with an existing key
    #[error("Duplicate key: {message} (code {code})")]
    DuplicateKey {
        /// Message reported by the store
        message: String,
        /// Domain error code
        code: ErrorCode,
        /// Optional transaction-conflict annotation
        txn: Option<TxnErrorCode>,
    },

    /// Any other failure reported for a physical request
    #[error("Query error: {message} (code {code})")]
    QueryError {
        /// Message reported by the store
        message: String,
        /// Domain error code
        code: ErrorCode,
        /// Optional transaction-conflict annotation
        txn: Option<TxnErrorCode>,
    },

    /// The transport failed to apply or flush a round
    #[error("Transport error: {0}")]
    Transport(String),

    /// An internal invariant or caller contract was violated
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// Configuration could not be loaded or failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl DocOpError {
    /// Create an illegal-state error
    pub fn illegal_state(msg: impl Into<String>) -> Self {
        DocOpError::IllegalState(msg.into())
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        DocOpError::Transport(msg.into())
    }

    /// Create an invalid-configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        DocOpError::InvalidConfig(msg.into())
    }

    /// Domain error code, for errors translated from a physical response.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            DocOpError::DuplicateKey { code, .. } | DocOpError::QueryError { code, .. } => {
                Some(*code)
            }
            _ => None,
        }
    }

    /// Transaction-conflict annotation, if the response carried one.
    pub fn txn_error_code(&self) -> Option<TxnErrorCode> {
        match self {
            DocOpError::DuplicateKey { txn, .. } | DocOpError::QueryError { txn, .. } => *txn,
            _ => None,
        }
    }

    /// Whether the caller may retry the statement.
    ///
    /// Only conflict-class transaction annotations are retryable; transport
    /// failures are retried by the transport itself.
    pub fn is_retryable(&self) -> bool {
        self.txn_error_code()
            .map(|code| code.is_retryable())
            .unwrap_or(false)
    }

    /// Whether this is a duplicate-key failure
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, DocOpError::DuplicateKey { .. })
    }
}
