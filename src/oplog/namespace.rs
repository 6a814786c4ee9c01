//! Collection namespaces (`<db>.<collection>`)

use std::fmt;

use serde::{Deserialize, Serialize};

use super::optime::OpTime;

/// Prefix of collections that were dropped but are awaiting reaping.
const DROP_PENDING_PREFIX: &str = "system.drop.";

/// A fully qualified collection name.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct NamespaceString {
    db: String,
    coll: String,
}

impl NamespaceString {
    /// Parse `db.coll`. The collection part may itself contain dots.
    pub fn new(ns: &str) -> Self {
        match ns.split_once('.') {
            Some((db, coll)) => Self {
                db: db.to_string(),
                coll: coll.to_string(),
            },
            None => Self {
                db: ns.to_string(),
                coll: String::new(),
            },
        }
    }

    /// Build from separate database and collection names.
    pub fn from_parts(db: &str, coll: &str) -> Self {
        Self {
            db: db.to_string(),
            coll: coll.to_string(),
        }
    }

    /// `config.transactions`
    pub fn session_transactions_table() -> Self {
        Self::from_parts("config", "transactions")
    }

    /// `local.oplog.rs`
    pub fn rs_oplog() -> Self {
        Self::from_parts("local", "oplog.rs")
    }

    /// Database name.
    pub fn db(&self) -> &str {
        &self.db
    }

    /// Collection name.
    pub fn coll(&self) -> &str {
        &self.coll
    }

    /// Full `db.coll` string.
    pub fn ns(&self) -> String {
        if self.coll.is_empty() {
            self.db.clone()
        } else {
            format!("{}.{}", self.db, self.coll)
        }
    }

    /// Check if no namespace was given.
    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }

    /// Check if this is the `<db>.$cmd` pseudo-collection.
    pub fn is_command(&self) -> bool {
        self.coll == "$cmd"
    }

    /// Namespace of another collection in the same database.
    pub fn sister_ns(&self, coll: &str) -> Self {
        Self::from_parts(&self.db, coll)
    }

    /// Namespace a collection is renamed to when a replicated drop starts.
    ///
    /// Format: `db.system.drop.<secs>i<inc>t<term>.<coll>`
    pub fn make_drop_pending_namespace(&self, op_time: OpTime) -> Self {
        let coll = format!(
            "{}{}i{}t{}.{}",
            DROP_PENDING_PREFIX, op_time.ts.secs, op_time.ts.inc, op_time.t, self.coll
        );
        Self::from_parts(&self.db, &coll)
    }

    /// Check if this collection is awaiting a two-phase drop.
    pub fn is_drop_pending_namespace(&self) -> bool {
        self.coll.starts_with(DROP_PENDING_PREFIX)
    }
}

impl From<String> for NamespaceString {
    fn from(ns: String) -> Self {
        Self::new(&ns)
    }
}

impl From<NamespaceString> for String {
    fn from(nss: NamespaceString) -> Self {
        nss.ns()
    }
}

impl fmt::Display for NamespaceString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ns())
    }
}
