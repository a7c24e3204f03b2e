//! The ingester engine
//!
//! Accepts streams of timestamped samples, groups them into per-series
//! chunks held in memory, answers range queries over the in-memory window,
//! and asynchronously ships aged chunks to the durable chunk store through
//! the background flush scheduler in [`flush`].
//!
//! # Lock order
//!
//! Breaking this order is a bug:
//!
//! 1. shutdown latch (read for append/query, write for stop)
//! 2. tenant map mutex — held only to look up, create, or delete a tenant
//! 3. per-fingerprint lock — at most one held at a time, taken in
//!    ascending fingerprint order across a query
//! 4. series inner mutex / mapper mutex / index lock / series-map shard
//!
//! No lock is held across an `.await`.

mod flush;

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::IngesterConfig;
use crate::context::RequestContext;
use crate::error::{Error, IngestError};
use crate::metrics::{IngesterMetrics, REASON_DUPLICATE_SAMPLE, REASON_OUT_OF_ORDER};
use crate::series::SeriesAppend;
use crate::store::ChunkStore;
use crate::tenant::TenantState;
use crate::types::{LabelMatcher, Sample, SamplePair, SampleStream, Timestamp};

/// Multi-tenant in-memory ingestion buffer.
///
/// Create with [`Ingester::new`] (requires a running tokio runtime for the
/// flush loop), share via the returned `Arc`, and shut down with
/// [`Ingester::stop`], which flushes all remaining chunks to the store
/// before returning. The ingester is an explicit collaborator: pass the
/// handle around instead of holding it in a global.
pub struct Ingester {
    pub(crate) cfg: IngesterConfig,
    pub(crate) chunk_store: Arc<dyn ChunkStore>,
    pub(crate) metrics: IngesterMetrics,

    /// Shutdown latch: read-held for the duration of an append or query,
    /// write-held once while declaring shutdown.
    stopped: RwLock<bool>,
    quit: broadcast::Sender<()>,
    done: Mutex<Option<JoinHandle<()>>>,

    /// Bounds concurrent per-series chunk uploads.
    pub(crate) flush_limiter: Arc<Semaphore>,

    /// Tenant map. The mutex is held only for lookup, insert, and the
    /// empty-tenant delete check, never while working on a series.
    pub(crate) tenants: Mutex<HashMap<String, Arc<TenantState>>>,
}

impl Ingester {
    /// Create an ingester and start its flush loop.
    ///
    /// Zero config fields fall back to their defaults, except
    /// `max_chunk_age`, where zero means "close head chunks on every flush
    /// pass".
    pub fn new(cfg: IngesterConfig, chunk_store: Arc<dyn ChunkStore>) -> Result<Arc<Self>, Error> {
        let cfg = cfg.normalized();
        let metrics = IngesterMetrics::new()?;
        let (quit, quit_rx) = broadcast::channel(1);
        let flush_limiter = Arc::new(Semaphore::new(cfg.max_concurrent_flushes));

        let ingester = Arc::new(Self {
            cfg,
            chunk_store,
            metrics,
            stopped: RwLock::new(false),
            quit,
            done: Mutex::new(None),
            flush_limiter,
            tenants: Mutex::new(HashMap::new()),
        });

        let handle = tokio::spawn(flush::run(Arc::clone(&ingester), quit_rx));
        *ingester.done.lock() = Some(handle);
        Ok(ingester)
    }

    /// This ingester's metrics, for registration or inspection.
    pub fn metrics(&self) -> &IngesterMetrics {
        &self.metrics
    }

    /// Append a batch of samples for the tenant in `ctx`.
    ///
    /// Aborts at the first failing sample; earlier samples of the batch stay
    /// appended. Fails fast with [`IngestError::Stopping`] once shutdown has
    /// begun.
    pub async fn append(
        &self,
        ctx: &RequestContext,
        samples: Vec<Sample>,
    ) -> Result<(), IngestError> {
        for sample in samples {
            self.append_one(ctx, sample)?;
        }
        Ok(())
    }

    fn append_one(&self, ctx: &RequestContext, mut sample: Sample) -> Result<(), IngestError> {
        if ctx.is_cancelled() {
            return Err(IngestError::Cancelled);
        }
        sample.labels.strip_empty_values();

        let stopped = self.stopped.read();
        if *stopped {
            return Err(IngestError::Stopping);
        }

        let state = self.state_for(ctx)?;
        let (_fp, series, created, _guard) = state.get_or_create_series(&sample.labels)?;
        if created {
            self.metrics.memory_series.inc();
        }

        let outcome = series
            .lock()
            .append(SamplePair::new(sample.timestamp, sample.value));
        match outcome {
            Ok(SeriesAppend::Appended { new_chunks }) => {
                if new_chunks > 0 {
                    self.metrics.memory_chunks.add(new_chunks as i64);
                }
                self.metrics.ingested_samples.inc();
                Ok(())
            }
            // Repeats of the previous sample are common with client-side
            // timestamps; accept them without counting anything.
            Ok(SeriesAppend::IdempotentNoOp) => Ok(()),
            Err(err @ IngestError::DuplicateSampleForTimestamp) => {
                self.metrics
                    .out_of_order_samples
                    .with_label_values(&[REASON_DUPLICATE_SAMPLE])
                    .inc();
                Err(err)
            }
            Err(err @ IngestError::OutOfOrderSample) => {
                self.metrics
                    .out_of_order_samples
                    .with_label_values(&[REASON_OUT_OF_ORDER])
                    .inc();
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Range query over the in-memory window.
    ///
    /// Returns one [`SampleStream`] per series matching all `matchers`, with
    /// samples in the closed interval `[from, through]`. Series are visited
    /// (and their fingerprint locks taken) in ascending fingerprint order;
    /// the result is per-series consistent but not a global snapshot.
    pub async fn query(
        &self,
        ctx: &RequestContext,
        from: Timestamp,
        through: Timestamp,
        matchers: &[LabelMatcher],
    ) -> Result<Vec<SampleStream>, IngestError> {
        self.metrics.queries.inc();

        let stopped = self.stopped.read();
        if *stopped {
            return Err(IngestError::Stopping);
        }

        let state = self.state_for(ctx)?;
        if ctx.is_cancelled() {
            return Err(IngestError::Cancelled);
        }

        // Sorted, so locks are taken in ascending fingerprint order.
        let fps = state.index.lookup(matchers);

        let mut queried_samples = 0u64;
        let mut result = Vec::new();
        for fp in fps {
            if ctx.is_cancelled() {
                return Err(IngestError::Cancelled);
            }
            let _guard = state.fp_locker.lock(fp);
            // The series may have been flushed out between index lookup and
            // taking its lock.
            let Some(series) = state.fp_to_series.get(fp) else {
                continue;
            };
            let (labels, samples) = {
                let series = series.lock();
                (
                    series.metric().clone(),
                    series.samples_for_range(from, through),
                )
            };
            queried_samples += samples.len() as u64;
            result.push(SampleStream { labels, samples });
        }

        self.metrics.queried_samples.inc_by(queried_samples);
        Ok(result)
    }

    /// All values observed for a label name within the tenant in `ctx`.
    pub async fn label_values_for_label_name(
        &self,
        ctx: &RequestContext,
        name: &str,
    ) -> Result<Vec<String>, IngestError> {
        let stopped = self.stopped.read();
        if *stopped {
            return Err(IngestError::Stopping);
        }
        let state = self.state_for(ctx)?;
        Ok(state.index.lookup_label_values(name))
    }

    /// Admission-control hook. This variant never throttles.
    pub fn needs_throttling(&self, _ctx: &RequestContext) -> bool {
        false
    }

    /// Declare shutdown, flush everything, and wait for the flush loop.
    ///
    /// New appends and queries fail with [`IngestError::Stopping`] from the
    /// moment the latch flips. Idempotent: later calls return immediately.
    pub async fn stop(&self) {
        {
            let mut stopped = self.stopped.write();
            if *stopped {
                return;
            }
            *stopped = true;
        }
        debug!("ingester stop requested");

        // The flush loop exits its tick select on this signal, then runs a
        // final immediate flush before finishing.
        let _ = self.quit.send(());
        let handle = self.done.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Current number of resident tenants.
    pub fn tenant_count(&self) -> usize {
        self.tenants.lock().len()
    }

    /// Look up or lazily create the tenant state for `ctx`.
    pub(crate) fn state_for(
        &self,
        ctx: &RequestContext,
    ) -> Result<Arc<TenantState>, IngestError> {
        let tenant_id = ctx.tenant_id()?;
        let mut tenants = self.tenants.lock();
        if let Some(state) = tenants.get(tenant_id) {
            return Ok(Arc::clone(state));
        }
        let state = Arc::new(TenantState::new(tenant_id.to_string(), &self.cfg));
        tenants.insert(tenant_id.to_string(), Arc::clone(&state));
        self.metrics.memory_users.inc();
        debug!(tenant = tenant_id, "created tenant state");
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryChunkStore;
    use crate::types::LabelSet;
    use std::time::Duration;

    fn test_config() -> IngesterConfig {
        IngesterConfig {
            // Keep the scheduler quiet during unit tests.
            flush_check_period: Duration::from_secs(3600),
            ..IngesterConfig::default()
        }
    }

    fn sample(ts: Timestamp, value: f64) -> Sample {
        Sample::new(LabelSet::from_pairs([("job", "api")]), ts, value)
    }

    #[tokio::test]
    async fn test_append_requires_tenant() {
        let ingester = Ingester::new(test_config(), Arc::new(MemoryChunkStore::new())).unwrap();
        let err = ingester
            .append(&RequestContext::anonymous(), vec![sample(100, 1.0)])
            .await
            .unwrap_err();
        assert_eq!(err, IngestError::NoTenant);
        ingester.stop().await;
    }

    #[tokio::test]
    async fn test_append_strips_empty_label_values() {
        let ingester = Ingester::new(test_config(), Arc::new(MemoryChunkStore::new())).unwrap();
        let ctx = RequestContext::for_tenant("team-a");

        let mut labels = LabelSet::from_pairs([("job", "api")]);
        labels.insert("shard", "");
        ingester
            .append(&ctx, vec![Sample::new(labels, 100, 1.0)])
            .await
            .unwrap();

        // The stripped label set matches the bare one.
        let streams = ingester
            .query(&ctx, 0, 200, &[LabelMatcher::equal("job", "api")])
            .await
            .unwrap();
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].labels, LabelSet::from_pairs([("job", "api")]));
        ingester.stop().await;
    }

    #[tokio::test]
    async fn test_append_and_query_after_stop() {
        let ingester = Ingester::new(test_config(), Arc::new(MemoryChunkStore::new())).unwrap();
        let ctx = RequestContext::for_tenant("team-a");
        ingester.stop().await;

        let err = ingester
            .append(&ctx, vec![sample(100, 1.0)])
            .await
            .unwrap_err();
        assert_eq!(err, IngestError::Stopping);

        let err = ingester.query(&ctx, 0, 100, &[]).await.unwrap_err();
        assert_eq!(err, IngestError::Stopping);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let ingester = Ingester::new(test_config(), Arc::new(MemoryChunkStore::new())).unwrap();
        ingester.stop().await;
        ingester.stop().await;
    }

    #[tokio::test]
    async fn test_cancelled_context_rejected() {
        let ingester = Ingester::new(test_config(), Arc::new(MemoryChunkStore::new())).unwrap();
        let ctx = RequestContext::for_tenant("team-a");
        ctx.cancellation().cancel();

        let err = ingester
            .append(&ctx, vec![sample(100, 1.0)])
            .await
            .unwrap_err();
        assert_eq!(err, IngestError::Cancelled);
        ingester.stop().await;
    }

    #[tokio::test]
    async fn test_batch_aborts_at_first_failure() {
        let ingester = Ingester::new(test_config(), Arc::new(MemoryChunkStore::new())).unwrap();
        let ctx = RequestContext::for_tenant("team-a");

        let err = ingester
            .append(
                &ctx,
                vec![sample(200, 1.0), sample(100, 2.0), sample(300, 3.0)],
            )
            .await
            .unwrap_err();
        assert_eq!(err, IngestError::OutOfOrderSample);

        // The sample before the failure is durable in memory; the one after
        // never ran.
        let streams = ingester
            .query(&ctx, 0, 1000, &[LabelMatcher::equal("job", "api")])
            .await
            .unwrap();
        assert_eq!(streams[0].samples, vec![SamplePair::new(200, 1.0)]);
        ingester.stop().await;
    }

    #[tokio::test]
    async fn test_needs_throttling_is_false() {
        let ingester = Ingester::new(test_config(), Arc::new(MemoryChunkStore::new())).unwrap();
        assert!(!ingester.needs_throttling(&RequestContext::for_tenant("t")));
        ingester.stop().await;
    }

    #[tokio::test]
    async fn test_label_values() {
        let ingester = Ingester::new(test_config(), Arc::new(MemoryChunkStore::new())).unwrap();
        let ctx = RequestContext::for_tenant("team-a");
        for job in ["api", "web"] {
            ingester
                .append(
                    &ctx,
                    vec![Sample::new(LabelSet::from_pairs([("job", job)]), 100, 1.0)],
                )
                .await
                .unwrap();
        }

        let mut values = ingester
            .label_values_for_label_name(&ctx, "job")
            .await
            .unwrap();
        values.sort();
        assert_eq!(values, vec!["api", "web"]);
        assert!(ingester
            .label_values_for_label_name(&ctx, "zone")
            .await
            .unwrap()
            .is_empty());
        ingester.stop().await;
    }

    #[tokio::test]
    async fn test_tenants_are_isolated() {
        let ingester = Ingester::new(test_config(), Arc::new(MemoryChunkStore::new())).unwrap();
        let ctx_a = RequestContext::for_tenant("team-a");
        let ctx_b = RequestContext::for_tenant("team-b");

        ingester.append(&ctx_a, vec![sample(100, 1.0)]).await.unwrap();

        let streams = ingester
            .query(&ctx_b, 0, 200, &[LabelMatcher::equal("job", "api")])
            .await
            .unwrap();
        assert!(streams.is_empty());
        assert_eq!(ingester.tenant_count(), 2);
        assert_eq!(ingester.metrics().memory_users.get(), 2);
        ingester.stop().await;
    }
}
