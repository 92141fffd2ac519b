//! Check and observer capability interfaces.
//!
//! A run is driven by one mandatory [`Check`] and reported through an
//! optional [`CheckObserver`] whose methods all default to no-ops.

use crate::core::{ArcSensor, CheckError};

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

/// The per-sensor check run by the scheduler.
///
/// Return `Ok(true)` when the sensor is done, `Ok(false)` when it should be
/// tried again after the retry interval, and `Err` when the check failed.
/// Failed checks are reported and never retried.
#[async_trait]
pub trait Check: Send + Sync {
    /// Runs the check against one sensor.
    async fn check(&self, sensor: &ArcSensor) -> Result<bool, CheckError>;
}

#[async_trait]
impl<C: Check + ?Sized> Check for Arc<C> {
    async fn check(&self, sensor: &ArcSensor) -> Result<bool, CheckError> {
        (**self).check(sensor).await
    }
}

/// A [`Check`] backed by an async closure. See [`check_fn`].
pub struct CheckFn<F> {
    f: F,
}

/// Wraps an async closure into a [`Check`].
///
/// ```rust
/// use spotcheck::scheduler::check_fn;
///
/// let check = check_fn(|sensor| async move {
///     let _ = sensor.id();
///     Ok(true)
/// });
/// ```
pub fn check_fn<F, Fut>(f: F) -> CheckFn<F>
where
    F: Fn(ArcSensor) -> Fut + Send + Sync,
    Fut: Future<Output = Result<bool, CheckError>> + Send,
{
    CheckFn { f }
}

#[async_trait]
impl<F, Fut> Check for CheckFn<F>
where
    F: Fn(ArcSensor) -> Fut + Send + Sync,
    Fut: Future<Output = Result<bool, CheckError>> + Send,
{
    async fn check(&self, sensor: &ArcSensor) -> Result<bool, CheckError> {
        (self.f)(Arc::clone(sensor)).await
    }
}

/// Receives per-sensor progress notifications.
///
/// Callbacks run on worker tasks and must not block for long; the
/// scheduler holds no lock while invoking them.
pub trait CheckObserver: Send + Sync {
    /// A sensor passed the filters, is online, and is about to be checked.
    fn on_start_check(&self, _sensor: &ArcSensor) {}

    /// The check reported the sensor as done.
    fn on_check_done(&self, _sensor: &ArcSensor) {}

    /// The sensor is offline, or its check asked to be retried later.
    fn on_offline(&self, _sensor: &ArcSensor) {}

    /// The check failed; the sensor will not be retried.
    fn on_error(&self, _sensor: &ArcSensor, _error: &CheckError) {}
}

/// An observer that ignores every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl CheckObserver for NoopObserver {}

impl<O: CheckObserver + ?Sized> CheckObserver for Arc<O> {
    fn on_start_check(&self, sensor: &ArcSensor) {
        (**self).on_start_check(sensor)
    }

    fn on_check_done(&self, sensor: &ArcSensor) {
        (**self).on_check_done(sensor)
    }

    fn on_offline(&self, sensor: &ArcSensor) {
        (**self).on_offline(sensor)
    }

    fn on_error(&self, sensor: &ArcSensor, error: &CheckError) {
        (**self).on_error(sensor, error)
    }
}

/// Fans every notification out to both observers, first `A` then `B`.
impl<A: CheckObserver, B: CheckObserver> CheckObserver for (A, B) {
    fn on_start_check(&self, sensor: &ArcSensor) {
        self.0.on_start_check(sensor);
        self.1.on_start_check(sensor);
    }

    fn on_check_done(&self, sensor: &ArcSensor) {
        self.0.on_check_done(sensor);
        self.1.on_check_done(sensor);
    }

    fn on_offline(&self, sensor: &ArcSensor) {
        self.0.on_offline(sensor);
        self.1.on_offline(sensor);
    }

    fn on_error(&self, sensor: &ArcSensor, error: &CheckError) {
        self.0.on_error(sensor, error);
        self.1.on_error(sensor, error);
    }
}
