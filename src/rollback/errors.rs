//! Rollback error types
//!
//! Two classes:
//! - **Unrecoverable**: the local node cannot be trusted to serve reads.
//!   The process must terminate and a full resync is required.
//! - **Recoverable**: rollback may be retried from scratch after a
//!   backoff (network failures, a sync source that rolled back itself).
//!
//! Error codes:
//! - ROLLBACK_FATAL, ROLLBACK_UNRECOVERABLE, ROLLBACK_INVARIANT_VIOLATION
//!   (unrecoverable)
//! - everything else (recoverable or handled locally)

use std::fmt;

use crate::oplog::OplogError;

/// Rollback error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackErrorKind {
    /// The process must terminate immediately
    Fatal,

    /// Rollback cannot complete; a full resync is required
    Unrecoverable,

    /// An internal invariant did not hold
    InvariantViolation,

    /// One of the oplogs has no entries to compare
    OplogStartMissing,

    /// No common point exists between the two oplogs
    NoMatchingDocument,

    /// The sync source's rollback id changed
    RollbackIdChanged,

    /// The sync source's newest oplog entry is missing or empty
    MinValidMissing,

    /// Communication with the sync source failed
    SyncSourceError,

    /// Collection or database does not exist
    NamespaceNotFound,

    /// The namespace names a view
    CommandNotSupportedOnView,

    /// Target namespace is already taken
    NamespaceExists,

    /// Capped truncation would leave the collection empty
    EmptiesCappedCollection,

    /// Local storage operation failed
    StorageError,

    /// Member state transition refused
    IllegalStateTransition,

    /// A fail point forced the failure
    FailPointEnabled,
}

impl RollbackErrorKind {
    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            RollbackErrorKind::Fatal => "ROLLBACK_FATAL",
            RollbackErrorKind::Unrecoverable => "ROLLBACK_UNRECOVERABLE",
            RollbackErrorKind::InvariantViolation => "ROLLBACK_INVARIANT_VIOLATION",
            RollbackErrorKind::OplogStartMissing => "ROLLBACK_OPLOG_START_MISSING",
            RollbackErrorKind::NoMatchingDocument => "ROLLBACK_NO_MATCHING_DOCUMENT",
            RollbackErrorKind::RollbackIdChanged => "ROLLBACK_RBID_CHANGED",
            RollbackErrorKind::MinValidMissing => "ROLLBACK_MIN_VALID_MISSING",
            RollbackErrorKind::SyncSourceError => "ROLLBACK_SYNC_SOURCE_ERROR",
            RollbackErrorKind::NamespaceNotFound => "ROLLBACK_NAMESPACE_NOT_FOUND",
            RollbackErrorKind::CommandNotSupportedOnView => "ROLLBACK_COMMAND_NOT_SUPPORTED_ON_VIEW",
            RollbackErrorKind::NamespaceExists => "ROLLBACK_NAMESPACE_EXISTS",
            RollbackErrorKind::EmptiesCappedCollection => "ROLLBACK_EMPTIES_CAPPED_COLLECTION",
            RollbackErrorKind::StorageError => "ROLLBACK_STORAGE_ERROR",
            RollbackErrorKind::IllegalStateTransition => "ROLLBACK_ILLEGAL_STATE_TRANSITION",
            RollbackErrorKind::FailPointEnabled => "ROLLBACK_FAIL_POINT_ENABLED",
        }
    }
}

impl fmt::Display for RollbackErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Rollback error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackError {
    /// Error kind
    pub kind: RollbackErrorKind,
    /// Error message
    pub message: String,
}

impl RollbackError {
    /// Create a new rollback error.
    pub fn new(kind: RollbackErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Create a fatal error.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(RollbackErrorKind::Fatal, message)
    }

    /// Create an unrecoverable rollback error.
    pub fn unrecoverable(message: impl Into<String>) -> Self {
        Self::new(RollbackErrorKind::Unrecoverable, message)
    }

    /// Create an invariant violation error.
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::new(RollbackErrorKind::InvariantViolation, message)
    }

    /// Create an oplog start missing error.
    pub fn oplog_start_missing(message: impl Into<String>) -> Self {
        Self::new(RollbackErrorKind::OplogStartMissing, message)
    }

    /// Create a no matching document error.
    pub fn no_matching_document(message: impl Into<String>) -> Self {
        Self::new(RollbackErrorKind::NoMatchingDocument, message)
    }

    /// Create a rollback id changed error.
    pub fn rollback_id_changed(message: impl Into<String>) -> Self {
        Self::new(RollbackErrorKind::RollbackIdChanged, message)
    }

    /// Create a min valid missing error.
    pub fn min_valid_missing(message: impl Into<String>) -> Self {
        Self::new(RollbackErrorKind::MinValidMissing, message)
    }

    /// Create a sync source error.
    pub fn sync_source(message: impl Into<String>) -> Self {
        Self::new(RollbackErrorKind::SyncSourceError, message)
    }

    /// Create a namespace not found error.
    pub fn namespace_not_found(message: impl Into<String>) -> Self {
        Self::new(RollbackErrorKind::NamespaceNotFound, message)
    }

    /// Create a command not supported on view error.
    pub fn command_not_supported_on_view(message: impl Into<String>) -> Self {
        Self::new(RollbackErrorKind::CommandNotSupportedOnView, message)
    }

    /// Create a namespace exists error.
    pub fn namespace_exists(message: impl Into<String>) -> Self {
        Self::new(RollbackErrorKind::NamespaceExists, message)
    }

    /// Create an empties capped collection error.
    pub fn empties_capped_collection(message: impl Into<String>) -> Self {
        Self::new(RollbackErrorKind::EmptiesCappedCollection, message)
    }

    /// Create a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(RollbackErrorKind::StorageError, message)
    }

    /// Create an illegal state transition error.
    pub fn illegal_state_transition(message: impl Into<String>) -> Self {
        Self::new(RollbackErrorKind::IllegalStateTransition, message)
    }

    /// Create a fail point error.
    pub fn fail_point(message: impl Into<String>) -> Self {
        Self::new(RollbackErrorKind::FailPointEnabled, message)
    }

    /// Get the error code string
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// Check if this error requires the process to terminate.
    pub fn is_unrecoverable(&self) -> bool {
        matches!(
            self.kind,
            RollbackErrorKind::Fatal
                | RollbackErrorKind::Unrecoverable
                | RollbackErrorKind::InvariantViolation
        )
    }

    /// Check if rollback may be retried from scratch after this error.
    pub fn is_retryable(&self) -> bool {
        !self.is_unrecoverable()
    }

    /// Rewrap as an unrecoverable error, keeping the message.
    pub fn into_unrecoverable(self, context: &str) -> Self {
        if self.is_unrecoverable() {
            return self;
        }
        Self::unrecoverable(format!("{}: {}", context, self))
    }
}

impl fmt::Display for RollbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.code(), self.message)
    }
}

impl std::error::Error for RollbackError {}

/// A local oplog entry that does not parse is untrustworthy history.
impl From<OplogError> for RollbackError {
    fn from(e: OplogError) -> Self {
        Self::unrecoverable(format!("malformed local oplog entry: {}", e.message))
    }
}

/// Result type for rollback operations
pub type RollbackResult<T> = Result<T, RollbackError>;
