//! oplog-rollback - undo diverged writes on a replica set member
//!
//! A member whose oplog has diverged from its sync source finds the last
//! common oplog entry, refetches the authoritative version of every
//! document touched after it, reverses collection and index DDL, and
//! truncates its oplog back to the common point.
//!
//! - `oplog`: oplog entries, OpTimes and namespaces
//! - `rollback`: the rollback algorithm itself
//! - `memory`: in-memory catalog, oplog and sync source
//! - `cli`: the `oplog-rollback` binary

pub mod cli;
pub mod document;
pub mod fail_point;
pub mod locks;
pub mod memory;
pub mod observability;
pub mod oplog;
pub mod rollback;
