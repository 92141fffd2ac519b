//! Fleet-wide spot-check scheduling.
//!
//! [`SpotCheck`] drains a queue of sensors with a fixed number of workers,
//! parking offline sensors and retrying not-ready checks until every sensor
//! is done, has failed, or the run is stopped.

mod config;
mod observer;
mod queue;
mod spot_check;
mod stats;

pub use config::SpotCheckConfig;
pub use observer::{check_fn, Check, CheckFn, CheckObserver, NoopObserver};
pub use spot_check::{new_run_id, SpotCheck, SpotCheckBuilder};
pub use stats::SpotCheckStats;
