//! Observability for the rollback core
//!
//! - Structured logging (JSON)
//! - Atomic counters
//! - Lifecycle events and per-phase scopes
//!
//! Observability is read-only: nothing here changes the outcome of a
//! rollback.
//!
//! ```ignore
//! use oplog_rollback::observability::{Logger, ObservationScope, RollbackMetrics};
//!
//! Logger::info("ROLLBACK_NOTE", &[("ns", "test.c")]);
//!
//! let metrics = RollbackMetrics::new();
//! metrics.increment_attempts();
//!
//! let scope = ObservationScope::new("ROLLBACK_REFETCH");
//! // ... do work ...
//! scope.complete();
//! ```

mod events;
mod logger;
mod metrics;
mod scope;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{MetricsSnapshot, RollbackMetrics};
pub use scope::ObservationScope;

fn event_severity(event: Event) -> Severity {
    if event.is_fatal() {
        Severity::Fatal
    } else {
        Severity::Info
    }
}

/// Log a lifecycle event
pub fn log_event(event: Event) {
    Logger::log(event_severity(event), event.as_str(), &[]);
}

/// Log a lifecycle event with fields
pub fn log_event_with_fields(event: Event, fields: &[(&str, &str)]) {
    Logger::log(event_severity(event), event.as_str(), fields);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_severity() {
        assert_eq!(event_severity(Event::RollbackFatal), Severity::Fatal);
        assert_eq!(event_severity(Event::RollbackStart), Severity::Info);
    }

    #[test]
    fn test_log_event_with_fields() {
        log_event(Event::RollbackStart);
        log_event_with_fields(Event::CommonPointFound, &[("op_time", "{ts: Timestamp(1, 1), t: 1}")]);
    }
}
