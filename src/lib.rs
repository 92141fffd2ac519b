//! # Spotcheck
//!
//! Runs a check against every sensor of a fleet with bounded concurrency,
//! waiting out sensors that are offline and retrying checks that are not
//! ready yet.
//!
//! ## Overview
//!
//! A [`SpotCheck`] run:
//!
//! - Enumerates sensors from a [`SensorDirectory`]
//! - Drops sensors outside the platform and tag filter
//! - Parks offline sensors and brings them back after a fixed interval
//! - Reports progress to a [`CheckObserver`]
//! - Stops cleanly on request, cancelling pending re-checks
//!
//! The [`checks`] module ships an indicator-of-compromise check covering
//! files, hashes, registry entries and YARA signatures.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use spotcheck::prelude::*;
//! use spotcheck::directory::InMemoryDirectory;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let directory = InMemoryDirectory::from_json_file("fleet.json")?;
//!
//!     let spot_check = SpotCheck::builder()
//!         .with_directory(directory)
//!         .with_check(check_fn(|sensor| async move {
//!             println!("checking {}", sensor.id());
//!             Ok(true)
//!         }))
//!         .with_config(SpotCheckConfig::new().with_concurrency(8))
//!         .build()?;
//!
//!     spot_check.start().await?;
//!     spot_check.wait(None).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `default` - Includes the command line tool
//! - `cli` - Builds the `spotcheck` binary
//!
//! ## Architecture
//!
//! - **Core**: Sensor and directory traits, filters, errors
//! - **Directory**: In-memory fleet for tests and offline use
//! - **Scheduler**: Work queue, workers and retry handling
//! - **Checks**: Indicator-of-compromise lookups
//! - **Audit**: Structured logging of every transition

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod audit;
pub mod checks;
pub mod core;
pub mod directory;
pub mod scheduler;

// Re-export commonly used types at the crate root
pub use crate::core::{
    ArcDirectory, ArcSensor, CheckError, DirectoryError, Platform, Sensor, SensorDirectory,
    SensorError, SensorFilter, SensorResponse, SpotCheckError,
};

pub use crate::checks::{Hit, HitRecord, HitSink, IocCheck, IocCheckConfig};
pub use crate::scheduler::{
    check_fn, Check, CheckObserver, SpotCheck, SpotCheckBuilder, SpotCheckConfig, SpotCheckStats,
};

/// Prelude module for convenient imports.
///
/// ```rust
/// use spotcheck::prelude::*;
/// ```
pub mod prelude {
    pub use crate::core::{
        ArcSensor, CheckError, Platform, Sensor, SensorDirectory, SensorError, SensorFilter,
        SpotCheckError,
    };
    pub use crate::checks::{Hit, HitRecord, HitSink, IocCheck, IocCheckConfig};
    pub use crate::scheduler::{
        check_fn, Check, CheckObserver, NoopObserver, SpotCheck, SpotCheckConfig, SpotCheckStats,
    };
}
