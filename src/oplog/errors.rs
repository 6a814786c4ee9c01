//! Oplog parsing errors
//!
//! A local oplog entry that cannot be parsed means the node's own history is
//! untrustworthy. Callers decide how fatal that is.

use std::fmt;

/// Oplog error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OplogErrorKind {
    /// Required field absent
    MissingField,

    /// Field present with the wrong type or an invalid value
    InvalidField,

    /// Unknown `op` value
    UnknownOpType,
}

/// Oplog parsing error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OplogError {
    /// Error kind
    pub kind: OplogErrorKind,
    /// Error message
    pub message: String,
}

impl OplogError {
    /// Create a new oplog error.
    pub fn new(kind: OplogErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Create a missing field error.
    pub fn missing_field(field: &str) -> Self {
        Self::new(
            OplogErrorKind::MissingField,
            format!("missing required field '{}'", field),
        )
    }

    /// Create an invalid field error.
    pub fn invalid_field(field: &str, reason: impl Into<String>) -> Self {
        Self::new(
            OplogErrorKind::InvalidField,
            format!("invalid field '{}': {}", field, reason.into()),
        )
    }

    /// Create an unknown op type error.
    pub fn unknown_op_type(op: &str) -> Self {
        Self::new(
            OplogErrorKind::UnknownOpType,
            format!("unknown oplog op type '{}'", op),
        )
    }
}

impl fmt::Display for OplogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OplogError({:?}): {}", self.kind, self.message)
    }
}

impl std::error::Error for OplogError {}

/// Result type for oplog parsing
pub type OplogResult<T> = Result<T, OplogError>;
