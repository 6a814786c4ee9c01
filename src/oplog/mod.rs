//! Oplog data model
//!
//! Positions (`Timestamp`, `OpTime`, `RecordId`), namespaces, and parsed
//! entries of the replicated operation log. Everything here is pure data:
//! reading an oplog is done through the rollback collaborator traits.

mod entry;
mod errors;
mod namespace;
mod optime;

pub use entry::{
    CommandType, OpType, OperationSessionInfo, OplogEntry, TIMESTAMP_FIELD,
    WALL_CLOCK_TIME_FIELD,
};
pub use errors::{OplogError, OplogErrorKind, OplogResult};
pub use namespace::NamespaceString;
pub use optime::{OpTime, RecordId, Timestamp, UNINITIALIZED_TERM};
