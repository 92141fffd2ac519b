//! Scheduler configuration.

use crate::core::SensorFilter;

use std::time::Duration;

/// Configuration for a [`SpotCheck`](crate::scheduler::SpotCheck) run.
#[derive(Debug, Clone)]
pub struct SpotCheckConfig {
    /// Number of sensors checked concurrently.
    pub concurrency: usize,

    /// Delay before an offline or not-ready sensor is tried again.
    pub retry_interval: Duration,

    /// Longest an idle worker waits before polling an empty queue again.
    pub idle_backoff: Duration,

    /// Which sensors the run applies to.
    pub filter: SensorFilter,
}

impl Default for SpotCheckConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            retry_interval: Duration::from_secs(60),
            idle_backoff: Duration::from_secs(2),
            filter: SensorFilter::default(),
        }
    }
}

impl SpotCheckConfig {
    /// Creates a new configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of concurrent workers (at least one).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Sets the retry interval.
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Sets the idle backoff.
    pub fn with_idle_backoff(mut self, backoff: Duration) -> Self {
        self.idle_backoff = backoff;
        self
    }

    /// Sets the sensor filter.
    pub fn with_filter(mut self, filter: SensorFilter) -> Self {
        self.filter = filter;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SpotCheckConfig::default();
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.retry_interval, Duration::from_secs(60));
        assert_eq!(config.idle_backoff, Duration::from_secs(2));
        assert!(!config.filter.restricts_platform());
    }

    #[test]
    fn test_concurrency_is_at_least_one() {
        let config = SpotCheckConfig::new().with_concurrency(0);
        assert_eq!(config.concurrency, 1);
    }

    #[test]
    fn test_config_builder() {
        let config = SpotCheckConfig::new()
            .with_concurrency(8)
            .with_retry_interval(Duration::from_secs(5))
            .with_filter(SensorFilter::new().with_macos(false));

        assert_eq!(config.concurrency, 8);
        assert_eq!(config.retry_interval, Duration::from_secs(5));
        assert!(config.filter.restricts_platform());
    }
}
