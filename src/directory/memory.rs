//! In-memory sensor directory.
//!
//! This module provides configurable sensors and a directory that lists
//! them, so a run can be exercised without a live fleet. The same types
//! back the CLI's `--fleet` inventory file.

use crate::core::{
    ArcSensor, DirectoryError, Platform, ResponseStream, Sensor, SensorDirectory, SensorError,
    SensorFilter, SensorResponse,
};

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Connectivity behavior of an [`InMemorySensor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Availability {
    /// Always online.
    #[default]
    Online,
    /// Never online.
    Offline,
    /// Offline for the first `polls` status queries, online afterwards.
    OfflineFor {
        /// Number of status queries answered with "offline".
        polls: u64,
    },
}

/// A canned answer to tasks starting with `prefix`.
#[derive(Debug, Clone, Deserialize)]
pub struct CannedResponse {
    /// Task prefix this answer applies to, e.g. `file_info "c:\\\\x.exe"`.
    pub prefix: String,

    /// Events streamed back, in order.
    #[serde(default)]
    pub events: Vec<Value>,

    /// Never answer and never end the stream.
    #[serde(default)]
    pub hang: bool,
}

impl CannedResponse {
    /// Creates an answer streaming the given events.
    pub fn new(prefix: impl Into<String>, events: Vec<Value>) -> Self {
        Self {
            prefix: prefix.into(),
            events,
            hang: false,
        }
    }

    /// Creates an answer that never arrives.
    pub fn hanging(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            events: Vec::new(),
            hang: true,
        }
    }
}

/// A sensor living entirely in memory.
///
/// Tasks are answered from the first [`CannedResponse`] whose prefix
/// matches; unmatched tasks get an empty stream, which callers observe as
/// a timeout.
///
/// # Examples
///
/// ```rust
/// use spotcheck::core::Platform;
/// use spotcheck::directory::InMemorySensor;
/// use serde_json::json;
///
/// let sensor = InMemorySensor::new("sid-1", Platform::Windows)
///     .with_hostname("wks-01")
///     .with_tags(["prod"])
///     .offline_for(2)
///     .with_response("file_info", vec![json!({ "ERROR": 0 })]);
/// ```
#[derive(Debug, Deserialize)]
pub struct InMemorySensor {
    id: String,

    #[serde(default)]
    hostname: Option<String>,

    platform: Platform,

    #[serde(default)]
    tags: HashSet<String>,

    #[serde(default)]
    availability: Availability,

    #[serde(default)]
    responses: Vec<CannedResponse>,

    /// Simulated round-trip time for every request, in milliseconds.
    #[serde(default)]
    latency_ms: u64,

    /// Make platform and tag lookups fail.
    #[serde(default)]
    metadata_unavailable: bool,

    /// Make platform and tag lookups return unparseable data.
    #[serde(default)]
    metadata_malformed: bool,

    #[serde(skip)]
    forced_online: Mutex<Option<bool>>,

    #[serde(skip)]
    status_queries: AtomicU64,

    #[serde(skip)]
    metadata_queries: AtomicU64,

    #[serde(skip)]
    issued: Mutex<Vec<String>>,
}

impl InMemorySensor {
    /// Creates an online sensor with no tags and no canned responses.
    pub fn new(id: impl Into<String>, platform: Platform) -> Self {
        Self {
            id: id.into(),
            hostname: None,
            platform,
            tags: HashSet::new(),
            availability: Availability::Online,
            responses: Vec::new(),
            latency_ms: 0,
            metadata_unavailable: false,
            metadata_malformed: false,
            forced_online: Mutex::new(None),
            status_queries: AtomicU64::new(0),
            metadata_queries: AtomicU64::new(0),
            issued: Mutex::new(Vec::new()),
        }
    }

    /// Sets the hostname.
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Sets the tags.
    pub fn with_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Makes the sensor permanently offline.
    pub fn always_offline(mut self) -> Self {
        self.availability = Availability::Offline;
        self
    }

    /// Makes the sensor report offline for the first `polls` status queries.
    pub fn offline_for(mut self, polls: u64) -> Self {
        self.availability = Availability::OfflineFor { polls };
        self
    }

    /// Answers tasks starting with `prefix` with the given events.
    pub fn with_response(mut self, prefix: impl Into<String>, events: Vec<Value>) -> Self {
        self.responses.push(CannedResponse::new(prefix, events));
        self
    }

    /// Adds a canned response.
    pub fn with_canned(mut self, response: CannedResponse) -> Self {
        self.responses.push(response);
        self
    }

    /// Sets the simulated latency of every request.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency_ms = latency.as_millis() as u64;
        self
    }

    /// Makes platform and tag lookups fail.
    pub fn with_metadata_unavailable(mut self) -> Self {
        self.metadata_unavailable = true;
        self
    }

    /// Makes platform and tag lookups return data that cannot be parsed.
    pub fn with_malformed_metadata(mut self) -> Self {
        self.metadata_malformed = true;
        self
    }

    /// Overrides the configured availability until called again.
    pub fn set_online(&self, online: bool) {
        *self.forced_online.lock() = Some(online);
    }

    /// Returns how many times the online status was queried.
    pub fn status_queries(&self) -> u64 {
        self.status_queries.load(Ordering::Relaxed)
    }

    /// Returns how many times platform or tags were queried.
    pub fn metadata_queries(&self) -> u64 {
        self.metadata_queries.load(Ordering::Relaxed)
    }

    /// Returns the tasks issued to this sensor so far, in order.
    pub fn issued_tasks(&self) -> Vec<String> {
        self.issued.lock().clone()
    }

    fn metadata_lookup(&self) -> Result<(), SensorError> {
        self.metadata_queries.fetch_add(1, Ordering::Relaxed);
        if self.metadata_unavailable {
            return Err(SensorError::request(&self.id, "metadata lookup failed"));
        }
        if self.metadata_malformed {
            return Err(SensorError::Malformed {
                sensor_id: self.id.clone(),
                details: "unrecognized platform".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Sensor for InMemorySensor {
    fn id(&self) -> &str {
        &self.id
    }

    fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    async fn platform(&self) -> Result<Platform, SensorError> {
        self.metadata_lookup()?;
        Ok(self.platform)
    }

    async fn tags(&self) -> Result<HashSet<String>, SensorError> {
        self.metadata_lookup()?;
        Ok(self.tags.clone())
    }

    async fn is_online(&self) -> Result<bool, SensorError> {
        let query = self.status_queries.fetch_add(1, Ordering::Relaxed);
        if let Some(online) = *self.forced_online.lock() {
            return Ok(online);
        }
        Ok(match self.availability {
            Availability::Online => true,
            Availability::Offline => false,
            Availability::OfflineFor { polls } => query >= polls,
        })
    }

    async fn request(&self, task: &str) -> Result<ResponseStream, SensorError> {
        self.issued.lock().push(task.to_string());

        if self.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.latency_ms)).await;
        }

        let canned = self
            .responses
            .iter()
            .find(|response| task.starts_with(&response.prefix));

        let stream = match canned {
            Some(response) if response.hang => stream::pending().boxed(),
            Some(response) => stream::iter(
                response
                    .events
                    .clone()
                    .into_iter()
                    .map(SensorResponse::new),
            )
            .boxed(),
            None => stream::empty().boxed(),
        };

        Ok(stream)
    }
}

#[derive(Debug, Deserialize)]
struct FleetInventory {
    sensors: Vec<InMemorySensor>,
}

/// A directory listing a fixed set of sensors.
///
/// The filter passed to [`SensorDirectory::list_sensors`] is ignored; every
/// sensor is listed and the scheduler does the filtering.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    sensors: Vec<ArcSensor>,
    listing_error: Option<String>,
}

impl InMemoryDirectory {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a sensor.
    pub fn with_sensor<S: Sensor + 'static>(mut self, sensor: S) -> Self {
        self.sensors.push(Arc::new(sensor));
        self
    }

    /// Adds a sensor already wrapped in an Arc.
    pub fn with_arc_sensor(mut self, sensor: ArcSensor) -> Self {
        self.sensors.push(sensor);
        self
    }

    /// Makes the listing fail after every configured sensor was yielded.
    pub fn with_listing_error(mut self, reason: impl Into<String>) -> Self {
        self.listing_error = Some(reason.into());
        self
    }

    /// Parses a fleet inventory of the form `{ "sensors": [ ... ] }`.
    pub fn from_json_str(json: &str) -> Result<Self, DirectoryError> {
        let inventory: FleetInventory = serde_json::from_str(json)?;
        Ok(Self {
            sensors: inventory
                .sensors
                .into_iter()
                .map(|sensor| Arc::new(sensor) as ArcSensor)
                .collect(),
            listing_error: None,
        })
    }

    /// Loads a fleet inventory from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, DirectoryError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Returns the number of sensors.
    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    /// Returns `true` if the directory has no sensors.
    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }
}

#[async_trait]
impl SensorDirectory for InMemoryDirectory {
    async fn list_sensors(
        &self,
        _filter: &SensorFilter,
    ) -> Result<BoxStream<'static, Result<ArcSensor, DirectoryError>>, DirectoryError> {
        let mut items: Vec<Result<ArcSensor, DirectoryError>> =
            self.sensors.iter().cloned().map(Ok).collect();
        if let Some(reason) = &self.listing_error {
            items.push(Err(DirectoryError::listing(reason.clone())));
        }
        Ok(stream::iter(items).boxed())
    }
}
