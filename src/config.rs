//! Ingester configuration

use std::time::Duration;

/// Configuration for the ingester and its flush scheduler.
#[derive(Debug, Clone)]
pub struct IngesterConfig {
    /// Interval between flush passes over all tenants.
    pub flush_check_period: Duration,

    /// Age at which a series' head chunk is force-closed so it becomes
    /// eligible for flushing, measured from the series' first buffered
    /// timestamp.
    pub max_chunk_age: Duration,

    /// Upper bound on concurrent per-series chunk uploads.
    pub max_concurrent_flushes: usize,

    /// Number of stripes in each tenant's fingerprint lock table.
    pub fingerprint_locker_shards: usize,
}

impl Default for IngesterConfig {
    fn default() -> Self {
        Self {
            flush_check_period: Duration::from_secs(60),
            max_chunk_age: Duration::from_secs(10 * 60),
            max_concurrent_flushes: 100,
            fingerprint_locker_shards: 16,
        }
    }
}

impl IngesterConfig {
    /// Replace zero values with their defaults, so a partially filled
    /// config behaves like the original unset one.
    pub(crate) fn normalized(mut self) -> Self {
        let defaults = Self::default();
        if self.flush_check_period.is_zero() {
            self.flush_check_period = defaults.flush_check_period;
        }
        if self.max_concurrent_flushes == 0 {
            self.max_concurrent_flushes = defaults.max_concurrent_flushes;
        }
        if self.fingerprint_locker_shards == 0 {
            self.fingerprint_locker_shards = defaults.fingerprint_locker_shards;
        }
        self
    }
}
