//! The bounded-concurrency retry scheduler.

use crate::core::{
    ArcDirectory, ArcSensor, CheckError, SensorDirectory, SensorError, SpotCheckError,
};
use crate::scheduler::config::SpotCheckConfig;
use crate::scheduler::observer::{Check, CheckObserver, NoopObserver};
use crate::scheduler::queue::WorkQueue;
use crate::scheduler::stats::{SpotCheckStats, StatsCounters};

use futures::{FutureExt, StreamExt};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;
use uuid::Uuid;

/// Builder for creating a `SpotCheck`.
pub struct SpotCheckBuilder {
    directory: Option<ArcDirectory>,
    check: Option<Arc<dyn Check>>,
    observer: Arc<dyn CheckObserver>,
    config: SpotCheckConfig,
    run_id: Option<String>,
}

impl SpotCheckBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self {
            directory: None,
            check: None,
            observer: Arc::new(NoopObserver),
            config: SpotCheckConfig::default(),
            run_id: None,
        }
    }

    /// Sets the directory the run enumerates sensors from.
    pub fn with_directory<D: SensorDirectory + 'static>(mut self, directory: D) -> Self {
        self.directory = Some(Arc::new(directory));
        self
    }

    /// Sets a directory wrapped in an Arc.
    pub fn with_arc_directory(mut self, directory: ArcDirectory) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Sets the check run against every matching online sensor.
    pub fn with_check<C: Check + 'static>(mut self, check: C) -> Self {
        self.check = Some(Arc::new(check));
        self
    }

    /// Sets the observer notified of per-sensor progress.
    pub fn with_observer<O: CheckObserver + 'static>(mut self, observer: O) -> Self {
        self.observer = Arc::new(observer);
        self
    }

    /// Sets the configuration.
    pub fn with_config(mut self, config: SpotCheckConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the run identifier instead of generating one.
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Builds the scheduler.
    pub fn build(self) -> Result<SpotCheck, SpotCheckError> {
        let directory = self
            .directory
            .ok_or_else(|| SpotCheckError::configuration("a sensor directory is required"))?;
        let check = self
            .check
            .ok_or_else(|| SpotCheckError::configuration("a check is required"))?;

        // Stays open until `start` has spawned the workers.
        let tasks = TaskTracker::new();

        Ok(SpotCheck {
            directory,
            started: AtomicBool::new(false),
            shared: Arc::new(Shared {
                run_id: self.run_id.unwrap_or_else(new_run_id),
                config: self.config,
                queue: WorkQueue::new(),
                check,
                observer: self.observer,
                shutdown: CancellationToken::new(),
                tasks,
                stats: StatsCounters::default(),
            }),
        })
    }
}

impl Default for SpotCheckBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs a check against every matching sensor of a fleet.
///
/// `start` enumerates the directory and spawns `concurrency` workers that
/// drain a shared queue. Offline sensors are parked and come back after the
/// retry interval; sensors whose check returns `false` are retried by the
/// worker after the same interval. Failed checks are reported once and
/// dropped.
///
/// Dropping a `SpotCheck` cancels the run without waiting for it.
///
/// # Example
///
/// ```rust,ignore
/// use spotcheck::prelude::*;
/// use spotcheck::directory::InMemoryDirectory;
///
/// let spot_check = SpotCheck::builder()
///     .with_directory(InMemoryDirectory::from_json_file("fleet.json")?)
///     .with_check(check_fn(|sensor| async move { Ok(true) }))
///     .with_config(SpotCheckConfig::new().with_concurrency(4))
///     .build()?;
///
/// spot_check.start().await?;
/// let finished = spot_check.wait(Some(Duration::from_secs(3600))).await;
/// ```
pub struct SpotCheck {
    directory: ArcDirectory,
    started: AtomicBool,
    shared: Arc<Shared>,
}

/// What happens to an in-flight sensor after a queue visit.
enum Settlement {
    /// No further work.
    Finish,
    /// Back in the queue right away.
    Requeue(ArcSensor),
    /// Parked until the retry interval elapses.
    Defer(ArcSensor),
}

/// State shared by the workers and the deferred re-check tasks.
struct Shared {
    run_id: String,
    config: SpotCheckConfig,
    queue: WorkQueue,
    check: Arc<dyn Check>,
    observer: Arc<dyn CheckObserver>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
    stats: StatsCounters,
}

impl SpotCheck {
    /// Creates a new builder.
    pub fn builder() -> SpotCheckBuilder {
        SpotCheckBuilder::new()
    }

    /// Returns the identifier of this run, e.g. `spotcheck-1a2b`.
    pub fn run_id(&self) -> &str {
        &self.shared.run_id
    }

    /// Returns a reference to the configuration.
    pub fn config(&self) -> &SpotCheckConfig {
        &self.shared.config
    }

    /// Returns the counters of the run so far.
    pub fn stats(&self) -> SpotCheckStats {
        self.shared.stats.snapshot()
    }

    /// Returns `true` once `stop` has been called.
    pub fn is_stopped(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    /// Enumerates the directory, enqueues every sensor and spawns the
    /// workers. Returns the number of sensors enqueued without waiting for
    /// any check to run.
    ///
    /// # Errors
    ///
    /// - `AlreadyStarted` if called more than once.
    /// - `Directory` if the listing fails; no worker is spawned then.
    pub async fn start(&self) -> Result<usize, SpotCheckError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(SpotCheckError::AlreadyStarted);
        }

        let shared = &self.shared;
        let enqueued = match self.enqueue_listing().await {
            Ok(enqueued) => enqueued,
            Err(e) => {
                shared.tasks.close();
                return Err(e);
            }
        };
        shared.stats.record_enqueued(enqueued as u64);

        tracing::debug!(run_id = %shared.run_id, enqueued, workers = shared.config.concurrency, "Spawning workers");

        for worker in 0..shared.config.concurrency {
            let span = tracing::debug_span!("worker", run_id = %shared.run_id, worker);
            shared
                .tasks
                .spawn(Arc::clone(shared).run_worker().instrument(span));
        }
        shared.tasks.close();

        Ok(enqueued)
    }

    async fn enqueue_listing(&self) -> Result<usize, SpotCheckError> {
        let mut listing = self
            .directory
            .list_sensors(&self.shared.config.filter)
            .await?;

        let mut enqueued = 0usize;
        while let Some(sensor) = listing.next().await {
            self.shared.queue.put(sensor?);
            enqueued += 1;
        }
        Ok(enqueued)
    }

    /// Stops the run and waits until every worker and every deferred
    /// re-check has exited.
    ///
    /// Checks already running are not interrupted; this returns once they
    /// complete. Calling `stop` again has no further effect.
    pub async fn stop(&self) {
        if !self.shared.shutdown.is_cancelled() {
            tracing::debug!(
                run_id = %self.shared.run_id,
                queued = self.shared.queue.len(),
                pending_rechecks = self.shared.queue.pending_rechecks(),
                in_flight = self.shared.queue.in_flight(),
                "Stopping spot check"
            );
        }
        self.shared.shutdown.cancel();
        if !self.started.load(Ordering::SeqCst) {
            self.shared.tasks.close();
        }
        self.shared.tasks.wait().await;
    }

    /// Waits for the run to finish.
    ///
    /// Returns `true` once all workers have exited, or `false` if `timeout`
    /// elapsed first. Before `start` there is nothing to wait for and this
    /// returns `true` immediately. While `start` is still listing sensors,
    /// this waits for the workers it is about to spawn.
    pub async fn wait(&self, timeout: Option<Duration>) -> bool {
        if !self.started.load(Ordering::SeqCst) {
            return true;
        }
        match timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.shared.tasks.wait())
                .await
                .is_ok(),
            None => {
                self.shared.tasks.wait().await;
                true
            }
        }
    }
}

impl Drop for SpotCheck {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

impl std::fmt::Debug for SpotCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpotCheck")
            .field("run_id", &self.shared.run_id)
            .field("config", &self.shared.config)
            .field("directory", &self.directory)
            .finish()
    }
}

impl Shared {
    async fn run_worker(self: Arc<Self>) {
        tracing::trace!("Worker started");

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let notified = self.queue.notified();
            let Some(sensor) = self.queue.try_get() else {
                if self.queue.is_drained() {
                    break;
                }
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = notified => {}
                    _ = tokio::time::sleep(self.config.idle_backoff) => {}
                }
                continue;
            };

            let sensor_id = sensor.id().to_string();
            let span = tracing::trace_span!("sensor", sensor_id = %sensor_id);
            let settlement = AssertUnwindSafe(self.process(sensor).instrument(span))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    tracing::error!(
                        sensor_id = %sensor_id,
                        panic = %panic_message(panic.as_ref()),
                        "Processing panicked, dropping sensor"
                    );
                    self.stats.record_error();
                    Settlement::Finish
                });
            self.settle(settlement);
        }

        tracing::trace!("Worker exiting");
    }

    /// Runs one queue visit of a sensor. Never touches the queue itself;
    /// the returned settlement is applied by the worker.
    async fn process(&self, sensor: ArcSensor) -> Settlement {
        match self.admit(&sensor).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::trace!("Sensor filtered out");
                self.stats.record_filtered();
                return Settlement::Finish;
            }
            Err(e) => return self.sensor_failure(sensor, e),
        }

        match sensor.is_online().await {
            Ok(true) => {}
            Ok(false) => return self.offline(sensor),
            Err(e) => return self.sensor_failure(sensor, e),
        }

        self.observer.on_start_check(&sensor);
        self.stats.record_check_started();

        let outcome = AssertUnwindSafe(self.check.check(&sensor))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(CheckError::Panicked {
                    message: panic_message(panic.as_ref()),
                })
            });

        match outcome {
            Ok(true) => {
                self.stats.record_done();
                self.observer.on_check_done(&sensor);
                Settlement::Finish
            }
            Ok(false) => {
                self.stats.record_retry();
                self.observer.on_offline(&sensor);
                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => {
                        tracing::trace!("Stopped during retry delay, abandoning sensor");
                        Settlement::Finish
                    }
                    _ = tokio::time::sleep(self.config.retry_interval) => Settlement::Requeue(sensor),
                }
            }
            Err(e) => self.failed(&sensor, e),
        }
    }

    fn offline(&self, sensor: ArcSensor) -> Settlement {
        self.stats.record_offline();
        self.observer.on_offline(&sensor);
        Settlement::Defer(sensor)
    }

    fn failed(&self, sensor: &ArcSensor, error: CheckError) -> Settlement {
        tracing::debug!(error = %error, "Check failed");
        self.stats.record_error();
        self.observer.on_error(sensor, &error);
        Settlement::Finish
    }

    /// Transient metadata or status failures are handled like an offline
    /// sensor; anything else fails the sensor once.
    fn sensor_failure(&self, sensor: ArcSensor, error: SensorError) -> Settlement {
        if error.is_transient() {
            tracing::debug!(error = %error, "Sensor unavailable, deferring");
            self.offline(sensor)
        } else {
            self.failed(&sensor, CheckError::Sensor(error))
        }
    }

    fn settle(self: &Arc<Self>, settlement: Settlement) {
        match settlement {
            Settlement::Finish => self.queue.finish(),
            Settlement::Requeue(sensor) => self.queue.requeue(sensor),
            Settlement::Defer(sensor) => self.defer_recheck(sensor),
        }
    }

    /// Applies the platform and tag filters.
    async fn admit(&self, sensor: &ArcSensor) -> Result<bool, SensorError> {
        let filter = &self.config.filter;

        if filter.restricts_platform() {
            let platform = sensor.platform().await?;
            if !filter.allows_platform(platform) {
                return Ok(false);
            }
        }

        if filter.restricts_tags() {
            let tags = sensor.tags().await?;
            if !filter.allows_tags(&tags) {
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Parks an offline sensor and lands it back in the queue after the
    /// retry interval, unless the run is stopped first.
    fn defer_recheck(self: &Arc<Self>, sensor: ArcSensor) {
        self.queue.defer();

        let shared = Arc::clone(self);
        self.tasks.spawn(async move {
            tokio::select! {
                biased;
                _ = shared.shutdown.cancelled() => shared.queue.cancel_deferred(),
                _ = tokio::time::sleep(shared.config.retry_interval) => shared.queue.land(sensor),
            }
        });
    }
}

/// Generates a short run identifier such as `spotcheck-1a2b`.
pub fn new_run_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("spotcheck-{}", &id[..4])
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Platform, SensorFilter};
    use crate::directory::{InMemoryDirectory, InMemorySensor};
    use crate::scheduler::observer::check_fn;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::Instant;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Kind {
        Start,
        Done,
        Offline,
        Error,
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(Instant, String, Kind, Option<String>)>>,
    }

    impl Recorder {
        fn push(&self, sensor: &ArcSensor, kind: Kind, error: Option<String>) {
            self.events
                .lock()
                .push((Instant::now(), sensor.id().to_string(), kind, error));
        }

        fn count(&self, sensor_id: &str, kind: Kind) -> usize {
            self.events
                .lock()
                .iter()
                .filter(|(_, id, k, _)| id == sensor_id && *k == kind)
                .count()
        }

        fn total(&self, kind: Kind) -> usize {
            self.events.lock().iter().filter(|(_, _, k, _)| *k == kind).count()
        }

        fn times(&self, sensor_id: &str, kind: Kind) -> Vec<Instant> {
            self.events
                .lock()
                .iter()
                .filter(|(_, id, k, _)| id == sensor_id && *k == kind)
                .map(|(at, _, _, _)| *at)
                .collect()
        }

        fn errors(&self) -> Vec<(String, String)> {
            self.events
                .lock()
                .iter()
                .filter_map(|(_, id, _, error)| error.clone().map(|e| (id.clone(), e)))
                .collect()
        }
    }

    impl CheckObserver for Recorder {
        fn on_start_check(&self, sensor: &ArcSensor) {
            self.push(sensor, Kind::Start, None);
        }

        fn on_check_done(&self, sensor: &ArcSensor) {
            self.push(sensor, Kind::Done, None);
        }

        fn on_offline(&self, sensor: &ArcSensor) {
            self.push(sensor, Kind::Offline, None);
        }

        fn on_error(&self, sensor: &ArcSensor, error: &CheckError) {
            self.push(sensor, Kind::Error, Some(error.to_string()));
        }
    }

    /// Counts check invocations per sensor.
    #[derive(Default)]
    struct CallLog {
        calls: Mutex<HashMap<String, usize>>,
    }

    impl CallLog {
        fn record(&self, sensor: &ArcSensor) -> usize {
            let mut calls = self.calls.lock();
            let count = calls.entry(sensor.id().to_string()).or_insert(0);
            *count += 1;
            *count
        }

        fn calls(&self, sensor_id: &str) -> usize {
            self.calls.lock().get(sensor_id).copied().unwrap_or(0)
        }
    }

    fn config(concurrency: usize, retry_secs: u64) -> SpotCheckConfig {
        SpotCheckConfig::new()
            .with_concurrency(concurrency)
            .with_retry_interval(Duration::from_secs(retry_secs))
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_sensors_checked_in_parallel() {
        let count = 6;
        let mut directory = InMemoryDirectory::new();
        for i in 0..count {
            directory = directory.with_sensor(InMemorySensor::new(format!("s{i}"), Platform::Linux));
        }

        let recorder = Arc::new(Recorder::default());
        let spot_check = SpotCheck::builder()
            .with_directory(directory)
            .with_check(check_fn(|_sensor| async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(true)
            }))
            .with_observer(Arc::clone(&recorder))
            .with_config(config(count, 60))
            .build()
            .unwrap();

        let began = Instant::now();
        assert_eq!(spot_check.start().await.unwrap(), count);
        assert!(spot_check.wait(None).await);

        assert_eq!(recorder.total(Kind::Done), count);
        assert_eq!(recorder.total(Kind::Start), count);
        assert!(began.elapsed() < Duration::from_secs(20));

        let stats = spot_check.stats();
        assert_eq!(stats.enqueued, count as u64);
        assert_eq!(stats.checks_done, count as u64);
        assert!(spot_check.shared.queue.is_drained());
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_worker_serializes_checks() {
        let directory = InMemoryDirectory::new()
            .with_sensor(InMemorySensor::new("a", Platform::Linux))
            .with_sensor(InMemorySensor::new("b", Platform::Linux))
            .with_sensor(InMemorySensor::new("c", Platform::Linux));

        let spot_check = SpotCheck::builder()
            .with_directory(directory)
            .with_check(check_fn(|_sensor| async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(true)
            }))
            .with_config(config(1, 60))
            .build()
            .unwrap();

        let began = Instant::now();
        spot_check.start().await.unwrap();
        assert!(spot_check.wait(None).await);
        assert!(began.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_filtered_sensors_are_never_checked() {
        let directory = InMemoryDirectory::new()
            .with_sensor(InMemorySensor::new("win", Platform::Windows).with_tags(["prod"]))
            .with_sensor(InMemorySensor::new("linux-prod", Platform::Linux).with_tags(["prod", "web"]))
            .with_sensor(InMemorySensor::new("linux-dev", Platform::Linux).with_tags(["dev"]))
            .with_sensor(
                InMemorySensor::new("mac-prod", Platform::Macos)
                    .with_tags(["prod"])
                    .always_offline(),
            );

        let calls = Arc::new(CallLog::default());
        let recorder = Arc::new(Recorder::default());
        let log = Arc::clone(&calls);
        let spot_check = SpotCheck::builder()
            .with_directory(directory)
            .with_check(check_fn(move |sensor| {
                let log = Arc::clone(&log);
                async move {
                    log.record(&sensor);
                    Ok(true)
                }
            }))
            .with_observer(Arc::clone(&recorder))
            .with_config(config(2, 60).with_filter(
                SensorFilter::new()
                    .with_windows(false)
                    .with_macos(false)
                    .with_required_tags(["prod"]),
            ))
            .build()
            .unwrap();

        spot_check.start().await.unwrap();
        assert!(spot_check.wait(Some(Duration::from_secs(600))).await);

        assert_eq!(calls.calls("linux-prod"), 1);
        for filtered in ["win", "linux-dev", "mac-prod"] {
            assert_eq!(calls.calls(filtered), 0, "{filtered} was checked");
            for kind in [Kind::Start, Kind::Done, Kind::Offline, Kind::Error] {
                assert_eq!(recorder.count(filtered, kind), 0, "{filtered} got {kind:?}");
            }
        }
        assert_eq!(spot_check.stats().filtered, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_offline_sensor_retries_until_stopped() {
        let sensor = Arc::new(InMemorySensor::new("ghost", Platform::Linux).always_offline());
        let calls = Arc::new(CallLog::default());
        let recorder = Arc::new(Recorder::default());

        let log = Arc::clone(&calls);
        let spot_check = SpotCheck::builder()
            .with_directory(InMemoryDirectory::new().with_arc_sensor(sensor.clone()))
            .with_check(check_fn(move |sensor| {
                let log = Arc::clone(&log);
                async move {
                    log.record(&sensor);
                    Ok(true)
                }
            }))
            .with_observer(Arc::clone(&recorder))
            .with_config(config(2, 10))
            .build()
            .unwrap();

        spot_check.start().await.unwrap();
        assert!(!spot_check.wait(Some(Duration::from_secs(35))).await);

        let times = recorder.times("ghost", Kind::Offline);
        assert!(times.len() >= 3, "only {} offline notifications", times.len());
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(10));
        }
        assert_eq!(calls.calls("ghost"), 0);

        spot_check.stop().await;
        assert!(spot_check.wait(None).await);

        let after_stop = recorder.count("ghost", Kind::Offline);
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(recorder.count("ghost", Kind::Offline), after_stop);
        assert_eq!(spot_check.shared.queue.len(), 0);
        assert_eq!(spot_check.shared.queue.pending_rechecks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sensor_coming_online_is_checked_once() {
        let recorder = Arc::new(Recorder::default());
        let spot_check = SpotCheck::builder()
            .with_directory(
                InMemoryDirectory::new()
                    .with_sensor(InMemorySensor::new("late", Platform::Windows).offline_for(2)),
            )
            .with_check(check_fn(|_sensor| async move { Ok(true) }))
            .with_observer(Arc::clone(&recorder))
            .with_config(config(1, 30))
            .build()
            .unwrap();

        let began = Instant::now();
        spot_check.start().await.unwrap();
        assert!(spot_check.wait(None).await);

        assert_eq!(recorder.count("late", Kind::Offline), 2);
        assert_eq!(recorder.count("late", Kind::Done), 1);
        assert!(began.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_ready_check_is_retried_k_times() {
        const K: usize = 3;
        let calls = Arc::new(CallLog::default());
        let recorder = Arc::new(Recorder::default());

        let log = Arc::clone(&calls);
        let spot_check = SpotCheck::builder()
            .with_directory(
                InMemoryDirectory::new().with_sensor(InMemorySensor::new("busy", Platform::Linux)),
            )
            .with_check(check_fn(move |sensor| {
                let log = Arc::clone(&log);
                async move { Ok(log.record(&sensor) > K) }
            }))
            .with_observer(Arc::clone(&recorder))
            .with_config(config(2, 5))
            .build()
            .unwrap();

        let began = Instant::now();
        spot_check.start().await.unwrap();
        assert!(spot_check.wait(None).await);

        assert_eq!(calls.calls("busy"), K + 1);
        assert_eq!(recorder.count("busy", Kind::Offline), K);
        assert_eq!(recorder.count("busy", Kind::Done), 1);
        assert!(began.elapsed() >= Duration::from_secs(5 * K as u64));
        assert_eq!(spot_check.stats().retries, K as u64);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_check_is_reported_once() {
        let calls = Arc::new(CallLog::default());
        let recorder = Arc::new(Recorder::default());

        let log = Arc::clone(&calls);
        let spot_check = SpotCheck::builder()
            .with_directory(
                InMemoryDirectory::new().with_sensor(InMemorySensor::new("bad", Platform::Macos)),
            )
            .with_check(check_fn(move |sensor| {
                let log = Arc::clone(&log);
                async move {
                    log.record(&sensor);
                    Err(CheckError::failed("registry hive unreadable"))
                }
            }))
            .with_observer(Arc::clone(&recorder))
            .with_config(config(1, 5))
            .build()
            .unwrap();

        spot_check.start().await.unwrap();
        assert!(spot_check.wait(None).await);

        assert_eq!(calls.calls("bad"), 1);
        assert_eq!(recorder.count("bad", Kind::Done), 0);
        assert_eq!(
            recorder.errors(),
            vec![("bad".to_string(), "registry hive unreadable".to_string())]
        );
        assert_eq!(spot_check.stats().check_errors, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_check_is_reported_as_error() {
        let recorder = Arc::new(Recorder::default());
        let spot_check = SpotCheck::builder()
            .with_directory(
                InMemoryDirectory::new()
                    .with_sensor(InMemorySensor::new("boom", Platform::Linux))
                    .with_sensor(InMemorySensor::new("fine", Platform::Linux)),
            )
            .with_check(check_fn(|sensor: ArcSensor| async move {
                if sensor.id() == "boom" {
                    panic!("unexpected payload");
                }
                Ok(true)
            }))
            .with_observer(Arc::clone(&recorder))
            .with_config(config(1, 5))
            .build()
            .unwrap();

        spot_check.start().await.unwrap();
        assert!(spot_check.wait(None).await);

        let errors = recorder.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, "boom");
        assert!(errors[0].1.contains("unexpected payload"));
        assert_eq!(recorder.count("fine", Kind::Done), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_retry_delay() {
        let calls = Arc::new(CallLog::default());
        let log = Arc::clone(&calls);
        let spot_check = SpotCheck::builder()
            .with_directory(
                InMemoryDirectory::new()
                    .with_sensor(InMemorySensor::new("never-ready", Platform::Linux))
                    .with_sensor(InMemorySensor::new("offline", Platform::Linux).always_offline()),
            )
            .with_check(check_fn(move |sensor| {
                let log = Arc::clone(&log);
                async move {
                    log.record(&sensor);
                    Ok(false)
                }
            }))
            .with_config(config(2, 600))
            .build()
            .unwrap();

        spot_check.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(calls.calls("never-ready"), 1);
        assert_eq!(spot_check.shared.queue.pending_rechecks(), 1);

        let began = Instant::now();
        spot_check.stop().await;
        assert!(began.elapsed() < Duration::from_secs(600));
        assert!(spot_check.is_stopped());

        tokio::time::sleep(Duration::from_secs(1200)).await;
        assert_eq!(calls.calls("never-ready"), 1);
        assert_eq!(spot_check.shared.queue.len(), 0);
        assert_eq!(spot_check.shared.queue.pending_rechecks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_waits_for_running_check() {
        let finished = Arc::new(AtomicUsize::new(0));
        let done = Arc::clone(&finished);
        let spot_check = SpotCheck::builder()
            .with_directory(
                InMemoryDirectory::new().with_sensor(InMemorySensor::new("slow", Platform::Linux)),
            )
            .with_check(check_fn(move |_sensor| {
                let done = Arc::clone(&done);
                async move {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    done.fetch_add(1, Ordering::SeqCst);
                    Ok(true)
                }
            }))
            .with_config(config(1, 5))
            .build()
            .unwrap();

        spot_check.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        let began = Instant::now();
        spot_check.stop().await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert!(began.elapsed() >= Duration::from_secs(29));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let spot_check = SpotCheck::builder()
            .with_directory(
                InMemoryDirectory::new()
                    .with_sensor(InMemorySensor::new("ghost", Platform::Linux).always_offline()),
            )
            .with_check(check_fn(|_sensor| async move { Ok(true) }))
            .with_config(config(1, 10))
            .build()
            .unwrap();

        spot_check.start().await.unwrap();
        spot_check.stop().await;
        let stats = spot_check.stats();

        spot_check.stop().await;
        assert!(spot_check.is_stopped());
        assert_eq!(spot_check.stats(), stats);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_metadata_is_treated_as_offline() {
        let recorder = Arc::new(Recorder::default());
        let spot_check = SpotCheck::builder()
            .with_directory(
                InMemoryDirectory::new().with_sensor(
                    InMemorySensor::new("flaky", Platform::Linux).with_metadata_unavailable(),
                ),
            )
            .with_check(check_fn(|_sensor| async move { Ok(true) }))
            .with_observer(Arc::clone(&recorder))
            .with_config(config(1, 10).with_filter(SensorFilter::new().with_windows(false)))
            .build()
            .unwrap();

        spot_check.start().await.unwrap();
        assert!(!spot_check.wait(Some(Duration::from_secs(15))).await);
        assert_eq!(recorder.count("flaky", Kind::Offline), 2);
        assert_eq!(recorder.count("flaky", Kind::Start), 0);
        spot_check.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_metadata_is_reported_once() {
        let recorder = Arc::new(Recorder::default());
        let spot_check = SpotCheck::builder()
            .with_directory(
                InMemoryDirectory::new().with_sensor(
                    InMemorySensor::new("garbled", Platform::Linux).with_malformed_metadata(),
                ),
            )
            .with_check(check_fn(|_sensor| async move { Ok(true) }))
            .with_observer(Arc::clone(&recorder))
            .with_config(config(1, 10).with_filter(SensorFilter::new().with_windows(false)))
            .build()
            .unwrap();

        spot_check.start().await.unwrap();
        assert!(spot_check.wait(Some(Duration::from_secs(60))).await);
        assert_eq!(recorder.count("garbled", Kind::Error), 1);
        assert_eq!(recorder.count("garbled", Kind::Offline), 0);
        assert_eq!(recorder.count("garbled", Kind::Start), 0);
        assert_eq!(spot_check.stats().check_errors, 1);
    }

    /// Panics when told a check is starting on `victim`.
    struct PanickingObserver {
        victim: &'static str,
        inner: Arc<Recorder>,
    }

    impl CheckObserver for PanickingObserver {
        fn on_start_check(&self, sensor: &ArcSensor) {
            if sensor.id() == self.victim {
                panic!("observer failed on {}", sensor.id());
            }
            self.inner.on_start_check(sensor);
        }

        fn on_check_done(&self, sensor: &ArcSensor) {
            self.inner.on_check_done(sensor);
        }

        fn on_offline(&self, sensor: &ArcSensor) {
            self.inner.on_offline(sensor);
        }

        fn on_error(&self, sensor: &ArcSensor, error: &CheckError) {
            self.inner.on_error(sensor, error);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_observer_does_not_stall_run() {
        for concurrency in [1, 2] {
            let recorder = Arc::new(Recorder::default());
            let spot_check = SpotCheck::builder()
                .with_directory(
                    InMemoryDirectory::new()
                        .with_sensor(InMemorySensor::new("a", Platform::Linux))
                        .with_sensor(InMemorySensor::new("b", Platform::Linux)),
                )
                .with_check(check_fn(|_sensor| async move { Ok(true) }))
                .with_observer(PanickingObserver {
                    victim: "a",
                    inner: Arc::clone(&recorder),
                })
                .with_config(config(concurrency, 10))
                .build()
                .unwrap();

            spot_check.start().await.unwrap();
            assert!(spot_check.wait(Some(Duration::from_secs(3600))).await);

            assert_eq!(recorder.count("b", Kind::Done), 1);
            assert_eq!(recorder.count("a", Kind::Done), 0);
            assert!(spot_check.shared.queue.is_drained());
            assert_eq!(spot_check.shared.queue.in_flight(), 0);
            assert_eq!(spot_check.stats().check_errors, 1);
        }
    }

    /// Takes a while to produce its listing.
    #[derive(Debug)]
    struct SlowDirectory {
        delay: Duration,
        inner: InMemoryDirectory,
    }

    #[async_trait::async_trait]
    impl SensorDirectory for SlowDirectory {
        async fn list_sensors(
            &self,
            filter: &SensorFilter,
        ) -> Result<
            futures::stream::BoxStream<'static, Result<ArcSensor, crate::core::DirectoryError>>,
            crate::core::DirectoryError,
        > {
            tokio::time::sleep(self.delay).await;
            self.inner.list_sensors(filter).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_during_listing_covers_the_run() {
        let recorder = Arc::new(Recorder::default());
        let spot_check = SpotCheck::builder()
            .with_directory(SlowDirectory {
                delay: Duration::from_secs(10),
                inner: InMemoryDirectory::new().with_sensor(InMemorySensor::new("a", Platform::Linux)),
            })
            .with_check(check_fn(|_sensor| async move { Ok(true) }))
            .with_observer(Arc::clone(&recorder))
            .build()
            .unwrap();

        let began = Instant::now();
        let (enqueued, (finished, done)) = tokio::join!(spot_check.start(), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let finished = spot_check.wait(None).await;
            (finished, recorder.count("a", Kind::Done))
        });

        assert_eq!(enqueued.unwrap(), 1);
        assert!(finished);
        assert_eq!(done, 1);
        assert!(began.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_stop_before_start_returns() {
        let spot_check = SpotCheck::builder()
            .with_directory(InMemoryDirectory::new())
            .with_check(check_fn(|_sensor| async move { Ok(true) }))
            .build()
            .unwrap();

        spot_check.stop().await;
        assert!(spot_check.is_stopped());
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let spot_check = SpotCheck::builder()
            .with_directory(InMemoryDirectory::new())
            .with_check(check_fn(|_sensor| async move { Ok(true) }))
            .build()
            .unwrap();

        assert_eq!(spot_check.start().await.unwrap(), 0);
        assert!(matches!(
            spot_check.start().await,
            Err(SpotCheckError::AlreadyStarted)
        ));
        assert!(spot_check.wait(None).await);
    }

    #[tokio::test]
    async fn test_listing_error_propagates() {
        let spot_check = SpotCheck::builder()
            .with_directory(
                InMemoryDirectory::new()
                    .with_sensor(InMemorySensor::new("a", Platform::Linux))
                    .with_listing_error("page token expired"),
            )
            .with_check(check_fn(|_sensor| async move { Ok(true) }))
            .build()
            .unwrap();

        let result = spot_check.start().await;
        assert!(matches!(result, Err(SpotCheckError::Directory(_))));
        assert!(spot_check.wait(Some(Duration::from_secs(1))).await);
    }

    #[tokio::test]
    async fn test_wait_before_start_returns_immediately() {
        let spot_check = SpotCheck::builder()
            .with_directory(InMemoryDirectory::new())
            .with_check(check_fn(|_sensor| async move { Ok(true) }))
            .build()
            .unwrap();

        assert!(spot_check.wait(None).await);
        assert!(spot_check.run_id().starts_with("spotcheck-"));
        assert_eq!(spot_check.run_id().len(), "spotcheck-".len() + 4);

        let named = SpotCheck::builder()
            .with_directory(InMemoryDirectory::new())
            .with_check(check_fn(|_sensor| async move { Ok(true) }))
            .with_run_id("nightly")
            .build()
            .unwrap();
        assert_eq!(named.run_id(), "nightly");
    }

    #[test]
    fn test_builder_requires_directory_and_check() {
        let missing_directory = SpotCheck::builder()
            .with_check(check_fn(|_sensor| async move { Ok(true) }))
            .build();
        assert!(matches!(
            missing_directory,
            Err(SpotCheckError::Configuration { .. })
        ));

        let missing_check = SpotCheck::builder()
            .with_directory(InMemoryDirectory::new())
            .build();
        assert!(matches!(missing_check, Err(SpotCheckError::Configuration { .. })));
    }
}
