//! Sensor directory implementations.
//!
//! The scheduler only depends on the [`SensorDirectory`](crate::core::SensorDirectory)
//! and [`Sensor`](crate::core::Sensor) traits; the remote fleet transport
//! lives outside this crate. This module ships an in-memory implementation
//! used by tests, the demo and the CLI's inventory mode.
//!
//! ## Implementing a Custom Directory
//!
//! ```rust,ignore
//! use spotcheck::core::{ArcSensor, DirectoryError, SensorDirectory, SensorFilter};
//! use async_trait::async_trait;
//! use futures::stream::BoxStream;
//!
//! #[derive(Debug)]
//! pub struct MyFleet;
//!
//! #[async_trait]
//! impl SensorDirectory for MyFleet {
//!     async fn list_sensors(
//!         &self,
//!         filter: &SensorFilter,
//!     ) -> Result<BoxStream<'static, Result<ArcSensor, DirectoryError>>, DirectoryError> {
//!         // Page through the remote listing...
//!         todo!()
//!     }
//! }
//! ```

pub mod memory;

pub use memory::{Availability, CannedResponse, InMemoryDirectory, InMemorySensor};
