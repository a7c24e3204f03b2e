//! Prometheus metrics for the ingester
//!
//! Collectors are owned per [`crate::ingester::Ingester`] instance rather
//! than registered through a process-global registry, so independent
//! ingesters (and parallel tests) never share counters. Call
//! [`IngesterMetrics::register`] to export them on a registry.

use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};

/// Reason label recorded when a duplicate timestamp carries a new value.
pub const REASON_DUPLICATE_SAMPLE: &str = "duplicate_sample_for_timestamp";

/// Reason label recorded when a sample's timestamp precedes its series.
pub const REASON_OUT_OF_ORDER: &str = "sample_out_of_order";

/// Metrics emitted by one ingester instance.
#[derive(Clone)]
pub struct IngesterMetrics {
    /// Total samples accepted into memory.
    pub ingested_samples: IntCounter,
    /// Samples discarded, partitioned by `reason`.
    pub out_of_order_samples: IntCounterVec,
    /// Distribution of stored chunk utilization at flush time.
    pub chunk_utilization: Histogram,
    /// Chunks currently held in memory across all tenants.
    pub memory_chunks: IntGauge,
    /// Series currently held in memory across all tenants.
    pub memory_series: IntGauge,
    /// Tenants currently resident in memory.
    pub memory_users: IntGauge,
    /// Chunks that failed to reach the chunk store.
    pub chunk_store_failures: IntCounter,
    /// Queries handled.
    pub queries: IntCounter,
    /// Samples returned from queries.
    pub queried_samples: IntCounter,
}

impl IngesterMetrics {
    /// Create the collector set for one ingester.
    pub fn new() -> Result<Self, prometheus::Error> {
        Ok(Self {
            ingested_samples: IntCounter::with_opts(Opts::new(
                "ingester_ingested_samples_total",
                "The total number of samples ingested.",
            ))?,
            out_of_order_samples: IntCounterVec::new(
                Opts::new(
                    "ingester_out_of_order_samples_total",
                    "The total number of samples that were discarded because their \
                     timestamps were at or before the last received sample for a series.",
                ),
                &["reason"],
            )?,
            chunk_utilization: Histogram::with_opts(
                HistogramOpts::new(
                    "ingester_chunk_utilization",
                    "Distribution of stored chunk utilization.",
                )
                .buckets(vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9]),
            )?,
            memory_chunks: IntGauge::with_opts(Opts::new(
                "ingester_memory_chunks",
                "The current number of chunks in memory.",
            ))?,
            memory_series: IntGauge::with_opts(Opts::new(
                "ingester_memory_series",
                "The current number of series in memory.",
            ))?,
            memory_users: IntGauge::with_opts(Opts::new(
                "ingester_memory_users",
                "The current number of users in memory.",
            ))?,
            chunk_store_failures: IntCounter::with_opts(Opts::new(
                "ingester_chunk_store_failures_total",
                "The total number of errors while storing chunks to the chunk store.",
            ))?,
            queries: IntCounter::with_opts(Opts::new(
                "ingester_queries_total",
                "The total number of queries the ingester has handled.",
            ))?,
            queried_samples: IntCounter::with_opts(Opts::new(
                "ingester_queried_samples_total",
                "The total number of samples returned from queries.",
            ))?,
        })
    }

    /// Register every collector on `registry`.
    pub fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.ingested_samples.clone()))?;
        registry.register(Box::new(self.out_of_order_samples.clone()))?;
        registry.register(Box::new(self.chunk_utilization.clone()))?;
        registry.register(Box::new(self.memory_chunks.clone()))?;
        registry.register(Box::new(self.memory_series.clone()))?;
        registry.register(Box::new(self.memory_users.clone()))?;
        registry.register(Box::new(self.chunk_store_failures.clone()))?;
        registry.register(Box::new(self.queries.clone()))?;
        registry.register(Box::new(self.queried_samples.clone()))?;
        Ok(())
    }

    /// Discarded-sample count for one reason label.
    pub fn discarded(&self, reason: &str) -> u64 {
        self.out_of_order_samples.with_label_values(&[reason]).get()
    }
}
