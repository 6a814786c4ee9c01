//! Rollback lifecycle events
//!
//! Events are explicit and typed. Phase-level begin/complete pairs are
//! emitted by `ObservationScope`; the events here mark the points that
//! operators search for.

use std::fmt;

/// Observable events during rollback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Orchestration
    /// Member entered the ROLLBACK state
    RollbackStart,
    /// Rollback finished and the member moved to RECOVERING
    RollbackComplete,
    /// Rollback failed with a recoverable error and will be retried
    RollbackRetry,
    /// Rollback failed with an unrecoverable error (FATAL)
    RollbackFatal,
    /// The transition to ROLLBACK was refused
    RollbackTransitionRefused,

    // Common point
    /// Common point with the sync source found
    CommonPointFound,

    // Fix-up
    /// Refetched documents from the sync source
    DocumentsRefetched,
    /// minValid written for the rollback
    MinValidUpdated,
    /// Local oplog truncated after the common point
    OplogTruncated,
    /// Documents removed during fix-up written to a rollback data file
    RemovedDocumentsSaved,

    // Config
    /// Rollback configuration loaded
    ConfigLoaded,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::RollbackStart => "ROLLBACK_START",
            Event::RollbackComplete => "ROLLBACK_COMPLETE",
            Event::RollbackRetry => "ROLLBACK_RETRY",
            Event::RollbackFatal => "ROLLBACK_FATAL",
            Event::RollbackTransitionRefused => "ROLLBACK_TRANSITION_REFUSED",

            Event::CommonPointFound => "ROLLBACK_COMMON_POINT_FOUND",

            Event::DocumentsRefetched => "ROLLBACK_DOCUMENTS_REFETCHED",
            Event::MinValidUpdated => "ROLLBACK_MIN_VALID_UPDATED",
            Event::OplogTruncated => "ROLLBACK_OPLOG_TRUNCATED",
            Event::RemovedDocumentsSaved => "ROLLBACK_REMOVED_DOCUMENTS_SAVED",

            Event::ConfigLoaded => "CONFIG_LOADED",
        }
    }

    /// Returns true if this event indicates a fatal condition
    pub fn is_fatal(&self) -> bool {
        matches!(self, Event::RollbackFatal)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_events_have_string_representation() {
        let events = [
            Event::RollbackStart,
            Event::RollbackComplete,
            Event::RollbackRetry,
            Event::RollbackFatal,
            Event::RollbackTransitionRefused,
            Event::CommonPointFound,
            Event::DocumentsRefetched,
            Event::MinValidUpdated,
            Event::OplogTruncated,
            Event::RemovedDocumentsSaved,
            Event::ConfigLoaded,
        ];

        for event in events {
            let s = event.as_str();
            assert!(!s.is_empty());
            assert!(s.chars().all(|c| c.is_uppercase() || c == '_'));
        }
    }

    #[test]
    fn test_fatal_events() {
        assert!(Event::RollbackFatal.is_fatal());
        assert!(!Event::RollbackRetry.is_fatal());
        assert!(!Event::OplogTruncated.is_fatal());
    }

    #[test]
    fn test_event_display() {
        assert_eq!(format!("{}", Event::RollbackStart), "ROLLBACK_START");
    }
}
