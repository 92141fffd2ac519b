//! Audit event types and emission functions.

use crate::checks::HitRecord;
use crate::core::{ArcSensor, CheckError};
use crate::scheduler::{CheckObserver, SpotCheckConfig, SpotCheckStats};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Base trait for audit events.
pub trait AuditEvent: Serialize {
    /// Returns the event type name.
    fn event_type(&self) -> &'static str;

    /// Returns the timestamp of the event.
    fn timestamp(&self) -> DateTime<Utc>;
}

/// What happened to a sensor during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckEventKind {
    /// The check is about to run.
    CheckStarted,
    /// The check finished with the sensor done.
    CheckDone,
    /// The sensor was offline or not ready and will be retried.
    SensorOffline,
    /// The check failed.
    CheckFailed,
}

impl CheckEventKind {
    /// Returns the event type name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CheckStarted => "check_started",
            Self::CheckDone => "check_done",
            Self::SensorOffline => "sensor_offline",
            Self::CheckFailed => "check_failed",
        }
    }
}

/// Audit event for a per-sensor transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckAuditEvent {
    /// Event kind.
    pub kind: CheckEventKind,

    /// Timestamp of the event.
    pub timestamp: DateTime<Utc>,

    /// Run that produced the event.
    pub run_id: String,

    /// Sensor identifier.
    pub sensor_id: String,

    /// Sensor hostname, if known.
    pub hostname: Option<String>,

    /// Failure description for `CheckFailed`.
    pub error: Option<String>,
}

impl CheckAuditEvent {
    /// Creates an event for `sensor` stamped with the current time.
    pub fn new(kind: CheckEventKind, run_id: &str, sensor: &ArcSensor) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            run_id: run_id.to_string(),
            sensor_id: sensor.id().to_string(),
            hostname: sensor.hostname().map(str::to_string),
            error: None,
        }
    }

    /// Attaches an error description.
    pub fn with_error(mut self, error: &CheckError) -> Self {
        self.error = Some(error.to_string());
        self
    }

    /// Emits the event through `tracing`.
    pub fn emit(&self) {
        match self.kind {
            CheckEventKind::CheckFailed => tracing::warn!(
                target: "spotcheck::audit",
                event_type = self.event_type(),
                run_id = %self.run_id,
                sensor_id = %self.sensor_id,
                hostname = ?self.hostname,
                error = ?self.error,
                "Check failed"
            ),
            _ => tracing::info!(
                target: "spotcheck::audit",
                event_type = self.event_type(),
                run_id = %self.run_id,
                sensor_id = %self.sensor_id,
                hostname = ?self.hostname,
                "Sensor transition"
            ),
        }
    }
}

impl AuditEvent for CheckAuditEvent {
    fn event_type(&self) -> &'static str {
        self.kind.as_str()
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Audit event summarizing a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunAuditEvent {
    /// Timestamp of the event.
    pub timestamp: DateTime<Utc>,

    /// Run identifier.
    pub run_id: String,

    /// Counters at the time of the event.
    pub stats: SpotCheckStats,
}

impl AuditEvent for RunAuditEvent {
    fn event_type(&self) -> &'static str {
        "run_finished"
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// An observer that writes every transition to the audit log.
#[derive(Debug, Clone)]
pub struct TracingObserver {
    run_id: String,
}

impl TracingObserver {
    /// Creates an observer tagging events with `run_id`.
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
        }
    }

    /// Returns the run identifier.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }
}

impl CheckObserver for TracingObserver {
    fn on_start_check(&self, sensor: &ArcSensor) {
        CheckAuditEvent::new(CheckEventKind::CheckStarted, &self.run_id, sensor).emit();
    }

    fn on_check_done(&self, sensor: &ArcSensor) {
        CheckAuditEvent::new(CheckEventKind::CheckDone, &self.run_id, sensor).emit();
    }

    fn on_offline(&self, sensor: &ArcSensor) {
        CheckAuditEvent::new(CheckEventKind::SensorOffline, &self.run_id, sensor).emit();
    }

    fn on_error(&self, sensor: &ArcSensor, error: &CheckError) {
        CheckAuditEvent::new(CheckEventKind::CheckFailed, &self.run_id, sensor)
            .with_error(error)
            .emit();
    }
}

/// Emits an audit event for a run starting.
pub fn emit_run_started(run_id: &str, enqueued: usize, config: &SpotCheckConfig) {
    tracing::info!(
        target: "spotcheck::audit",
        event_type = "run_started",
        run_id = %run_id,
        enqueued,
        concurrency = config.concurrency,
        retry_interval_secs = config.retry_interval.as_secs(),
        filter = ?config.filter,
        "Spot check started"
    );
}

/// Emits an audit event for a finished or stopped run.
pub fn emit_run_finished(run_id: &str, stats: &SpotCheckStats) -> RunAuditEvent {
    let event = RunAuditEvent {
        timestamp: Utc::now(),
        run_id: run_id.to_string(),
        stats: *stats,
    };

    tracing::info!(
        target: "spotcheck::audit",
        event_type = event.event_type(),
        run_id = %run_id,
        enqueued = stats.enqueued,
        filtered = stats.filtered,
        checks_done = stats.checks_done,
        check_errors = stats.check_errors,
        offline = stats.offline,
        retries = stats.retries,
        "Spot check finished"
    );

    event
}

/// Emits an audit event for an indicator found on a sensor.
pub fn emit_hit_detected(record: &HitRecord) {
    tracing::warn!(
        target: "spotcheck::audit",
        event_type = "hit_detected",
        sensor_id = %record.sensor_id,
        hostname = ?record.hostname,
        kind = record.hit.kind(),
        hit = %record.hit_json(),
        "Indicator found"
    );
}
