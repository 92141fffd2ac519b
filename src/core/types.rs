//! Core types used throughout the spotcheck library.
//!
//! This module defines the sensor platform and the response envelope
//! returned by sensors for a task.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Operating system family of a sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Microsoft Windows.
    Windows,
    /// Linux.
    Linux,
    /// Apple macOS.
    Macos,
}

impl Platform {
    /// Returns the platform name as used in sensor metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Windows => "windows",
            Self::Linux => "linux",
            Self::Macos => "macos",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "windows" => Ok(Self::Windows),
            "linux" => Ok(Self::Linux),
            "macos" => Ok(Self::Macos),
            other => Err(format!("unknown platform '{other}'")),
        }
    }
}

/// A single event returned by a sensor in response to a task.
///
/// Sensors answer with loosely-typed JSON; the helpers below read the
/// handful of well-known fields the checks rely on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorResponse {
    /// The event payload.
    pub event: Value,
}

impl SensorResponse {
    /// Marker sent in `ERROR_MESSAGE` when a streamed task has finished.
    pub const DONE_MARKER: &'static str = "done";

    /// Wraps an event payload.
    pub fn new(event: Value) -> Self {
        Self { event }
    }

    /// Returns the `ERROR` code of the event, `0` when absent.
    pub fn error_code(&self) -> i64 {
        self.event.get("ERROR").and_then(Value::as_i64).unwrap_or(0)
    }

    /// Returns `true` when the event reports success.
    pub fn is_success(&self) -> bool {
        self.error_code() == 0
    }

    /// Returns the `ERROR_MESSAGE` of the event, if any.
    pub fn error_message(&self) -> Option<&str> {
        self.event.get("ERROR_MESSAGE").and_then(Value::as_str)
    }

    /// Returns `true` if this event closes a streamed task.
    pub fn is_done_marker(&self) -> bool {
        self.error_message() == Some(Self::DONE_MARKER)
    }

    /// Returns the array stored under `field`, if present.
    pub fn list(&self, field: &str) -> Option<&Vec<Value>> {
        self.event.get(field).and_then(Value::as_array)
    }

    /// Returns the value stored under `field`, if present.
    pub fn field(&self, field: &str) -> Option<&Value> {
        self.event.get(field)
    }
}

impl From<Value> for SensorResponse {
    fn from(event: Value) -> Self {
        Self::new(event)
    }
}
