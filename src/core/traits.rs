//! Collaborator traits for the spotcheck library.
//!
//! The scheduler never talks to the network itself. Everything it needs
//! from the outside world goes through [`Sensor`] and [`SensorDirectory`].

use crate::core::error::{DirectoryError, SensorError};
use crate::core::filter::SensorFilter;
use crate::core::types::{Platform, SensorResponse};

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::collections::HashSet;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

/// A stream of responses to a single task.
pub type ResponseStream = BoxStream<'static, SensorResponse>;

/// A remote endpoint agent.
///
/// Implementations must be `Send + Sync`: a sensor handle is shared between
/// the worker that checks it and any deferred re-check task.
///
/// # Implementation Notes
///
/// - `is_online` must reflect the live status; do not cache it.
/// - `platform` and `tags` may involve a network round trip.
/// - Implementations should never panic; return a `SensorError` instead.
///
/// # Example Implementation
///
/// ```rust,ignore
/// use spotcheck::core::{Platform, ResponseStream, Sensor, SensorError};
/// use async_trait::async_trait;
/// use std::collections::HashSet;
///
/// #[derive(Debug)]
/// struct MySensor { id: String }
///
/// #[async_trait]
/// impl Sensor for MySensor {
///     fn id(&self) -> &str { &self.id }
///     fn hostname(&self) -> Option<&str> { None }
///     async fn platform(&self) -> Result<Platform, SensorError> { Ok(Platform::Linux) }
///     async fn tags(&self) -> Result<HashSet<String>, SensorError> { Ok(HashSet::new()) }
///     async fn is_online(&self) -> Result<bool, SensorError> { Ok(true) }
///     async fn request(&self, task: &str) -> Result<ResponseStream, SensorError> {
///         todo!()
///     }
/// }
/// ```
#[async_trait]
pub trait Sensor: Send + Sync + Debug {
    /// Returns the unique identifier of the sensor.
    fn id(&self) -> &str;

    /// Returns the hostname of the sensor, if known. Used for reporting only.
    fn hostname(&self) -> Option<&str>;

    /// Returns the operating system family of the sensor.
    async fn platform(&self) -> Result<Platform, SensorError>;

    /// Returns the tags currently applied to the sensor.
    async fn tags(&self) -> Result<HashSet<String>, SensorError>;

    /// Queries whether the sensor is connected right now.
    async fn is_online(&self) -> Result<bool, SensorError>;

    /// Issues a task and returns the stream of its responses.
    ///
    /// The stream ends when the sensor (or transport) has nothing more to
    /// deliver. Tasks that report progress end with a response whose
    /// `ERROR_MESSAGE` is `"done"`.
    async fn request(&self, task: &str) -> Result<ResponseStream, SensorError>;

    /// Issues a task and waits for its first response.
    ///
    /// Returns `Ok(None)` if nothing arrived before `timeout`.
    async fn simple_request(
        &self,
        task: &str,
        timeout: Duration,
    ) -> Result<Option<SensorResponse>, SensorError> {
        let mut responses = self.request(task).await?;
        match tokio::time::timeout(timeout, responses.next()).await {
            Ok(response) => Ok(response),
            Err(_) => Ok(None),
        }
    }
}

/// Enumerates the sensors of an organization.
#[async_trait]
pub trait SensorDirectory: Send + Sync + Debug {
    /// Lists the sensors to consider for a run.
    ///
    /// The filter is a hint: a directory may use it to narrow its listing,
    /// but the scheduler applies it again to every sensor it dequeues.
    /// The stream is consumed exactly once.
    async fn list_sensors(
        &self,
        filter: &SensorFilter,
    ) -> Result<BoxStream<'static, Result<ArcSensor, DirectoryError>>, DirectoryError>;
}

/// An arc-wrapped sensor for shared ownership.
pub type ArcSensor = Arc<dyn Sensor>;

/// An arc-wrapped directory for shared ownership.
pub type ArcDirectory = Arc<dyn SensorDirectory>;
