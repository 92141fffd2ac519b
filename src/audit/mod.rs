//! Structured audit logging.
//!
//! Events are emitted through `tracing` under the `spotcheck::audit` target
//! so any subscriber can capture them separately from diagnostic logs.

mod events;

pub use events::{
    emit_hit_detected, emit_run_finished, emit_run_started, AuditEvent, CheckAuditEvent,
    CheckEventKind, RunAuditEvent, TracingObserver,
};
