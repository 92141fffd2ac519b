//! Core types and traits for the spotcheck library.
//!
//! - [`types`] - `Platform` and the `SensorResponse` envelope
//! - [`traits`] - The `Sensor` and `SensorDirectory` collaborator traits
//! - [`filter`] - Platform and tag inclusion filter
//! - [`error`] - Structured error types

pub mod error;
pub mod filter;
pub mod traits;
pub mod types;

pub use error::{CheckError, DirectoryError, SensorError, SpotCheckError};
pub use filter::SensorFilter;
pub use traits::{ArcDirectory, ArcSensor, ResponseStream, Sensor, SensorDirectory};
pub use types::{Platform, SensorResponse};
