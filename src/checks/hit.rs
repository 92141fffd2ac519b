//! Indicator hits and where they are reported.

use crate::core::ArcSensor;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// An indicator found on a sensor, carrying the raw sensor event(s).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Hit {
    /// A file found by path or by listing. `file_hash` is `null` when the
    /// hash lookup failed or was not attempted.
    File {
        /// File metadata event or listing entry.
        file_info: Value,
        /// Hash event, if available.
        file_hash: Option<Value>,
    },
    /// A file whose hash matched.
    FileHash {
        /// Listing entry of the matching file.
        file_hash: Value,
    },
    /// A named registry value.
    RegistryValue {
        /// Root key the value was found under.
        reg_key: Value,
        /// The matching value entry.
        reg_value: Value,
    },
    /// An existing registry key.
    RegistryKey {
        /// The key listing event.
        reg_key: Value,
    },
    /// A YARA signature match.
    Yara {
        /// The scan event.
        yara: Value,
    },
}

impl Hit {
    /// Returns a short name for the kind of hit.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::File { .. } => "file",
            Self::FileHash { .. } => "file_hash",
            Self::RegistryValue { .. } => "registry_value",
            Self::RegistryKey { .. } => "registry_key",
            Self::Yara { .. } => "yara",
        }
    }
}

/// A hit together with the sensor it was found on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitRecord {
    /// Sensor identifier.
    pub sensor_id: String,
    /// Sensor hostname, if known.
    pub hostname: Option<String>,
    /// When the hit was detected.
    pub detected_at: DateTime<Utc>,
    /// The hit itself.
    pub hit: Hit,
}

impl HitRecord {
    /// Creates a record for `sensor` stamped with the current time.
    pub fn new(sensor: &ArcSensor, hit: Hit) -> Self {
        Self {
            sensor_id: sensor.id().to_string(),
            hostname: sensor.hostname().map(str::to_string),
            detected_at: Utc::now(),
            hit,
        }
    }

    /// Returns the hit as a compact JSON string.
    pub fn hit_json(&self) -> String {
        serde_json::to_string(&self.hit).unwrap_or_default()
    }
}

/// Receives hits as they are found.
///
/// Called from worker tasks; implementations must not block for long.
pub trait HitSink: Send + Sync {
    /// Reports one hit.
    fn report(&self, record: &HitRecord);
}

impl<S: HitSink + ?Sized> HitSink for Arc<S> {
    fn report(&self, record: &HitRecord) {
        (**self).report(record)
    }
}

/// A sink that keeps every hit in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    records: Mutex<Vec<HitRecord>>,
}

impl CollectingSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the hits collected so far.
    pub fn records(&self) -> Vec<HitRecord> {
        self.records.lock().clone()
    }

    /// Returns the number of hits collected so far.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns `true` if no hit was collected.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl HitSink for CollectingSink {
    fn report(&self, record: &HitRecord) {
        self.records.lock().push(record.clone());
    }
}
