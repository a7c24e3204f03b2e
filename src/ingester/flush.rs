//! Flush scheduler
//!
//! A single background task ticks every `flush_check_period` and walks all
//! tenants, closing aged head chunks, shipping closed chunks to the chunk
//! store, and reclaiming drained series and tenants. On shutdown it runs one
//! final pass with `immediate = true`, force-closing every head chunk so the
//! whole in-memory window drains to the store.
//!
//! Concurrency: tenants flush in parallel, and within a tenant each series
//! flush holds a permit from the global flush limiter, bounding in-flight
//! chunk uploads. Ticks are serialized — a pass completes before the next
//! begins — so a series can never be double-drained.

use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::chunk::CHUNK_LEN;
use crate::context::RequestContext;
use crate::error::FlushError;
use crate::ingester::Ingester;
use crate::series::{MemorySeries, ShippableChunk};
use crate::store::WireChunk;
use crate::tenant::TenantState;
use crate::types::{now_millis, Fingerprint, LabelSet};

/// Flush loop body, spawned by [`Ingester::new`].
pub(super) async fn run(ingester: Arc<Ingester>, mut quit: broadcast::Receiver<()>) {
    let mut tick = tokio::time::interval(ingester.cfg.flush_check_period);
    // An interval fires immediately once; swallow that so the first real
    // flush happens one period after start.
    tick.tick().await;

    loop {
        tokio::select! {
            _ = tick.tick() => ingester.flush_all_tenants(false).await,
            _ = quit.recv() => break,
        }
    }

    ingester.flush_all_tenants(true).await;
    info!("ingester exited gracefully");
}

impl Ingester {
    /// Flush every tenant once. With `immediate`, head chunks are
    /// force-closed so all data ships.
    pub(crate) async fn flush_all_tenants(&self, immediate: bool) {
        debug!(immediate, "flushing chunks");

        let tenant_ids: Vec<String> = self.tenants.lock().keys().cloned().collect();
        join_all(
            tenant_ids
                .into_iter()
                .map(|tenant_id| self.flush_tenant(tenant_id, immediate)),
        )
        .await;

        debug!("done flushing chunks");
    }

    async fn flush_tenant(&self, tenant_id: String, immediate: bool) {
        let state = self.tenants.lock().get(&tenant_id).cloned();
        let Some(state) = state else {
            return;
        };

        debug!(tenant = %tenant_id, "flushing tenant");
        let ctx = RequestContext::for_tenant(tenant_id.clone());
        self.flush_all_series(&ctx, &state, immediate).await;

        // Empty-check and delete are atomic under the tenant-map lock, the
        // same lock tenant creation runs under.
        let mut tenants = self.tenants.lock();
        if state.fp_to_series.is_empty() && tenants.remove(&tenant_id).is_some() {
            self.metrics.memory_users.dec();
            debug!(tenant = %tenant_id, "reclaimed empty tenant");
        }
    }

    async fn flush_all_series(
        &self,
        ctx: &RequestContext,
        state: &Arc<TenantState>,
        immediate: bool,
    ) {
        let series = state.fp_to_series.snapshot();
        join_all(series.into_iter().map(|(fp, series)| {
            let limiter = Arc::clone(&self.flush_limiter);
            async move {
                // The limiter bounds concurrent uploads; it is never closed,
                // so acquisition only fails during process teardown.
                let Ok(_permit) = limiter.acquire_owned().await else {
                    return;
                };
                if let Err(err) = self.flush_series(ctx, state, fp, &series, immediate).await {
                    error!(
                        tenant = %state.tenant_id,
                        fingerprint = %fp,
                        error = %err,
                        "failed to flush chunks for series"
                    );
                }
            }
        }))
        .await;
    }

    /// Flush one series: close the head if aged (or `immediate`), ship all
    /// closed chunks, then drop the shipped prefix and reclaim the series if
    /// it drained. The series is unlocked while chunks serialize and upload;
    /// appends proceed concurrently and new chunks land behind the shipped
    /// prefix.
    async fn flush_series(
        &self,
        ctx: &RequestContext,
        state: &TenantState,
        fp: Fingerprint,
        series: &Arc<Mutex<MemorySeries>>,
        immediate: bool,
    ) -> Result<(), FlushError> {
        let max_chunk_age_ms = self.cfg.max_chunk_age.as_millis() as i64;

        // Decide what to ship, under the series' locks.
        let (metric, to_ship) = {
            let _guard = state.fp_locker.lock(fp);
            let mut series = series.lock();
            if series.is_empty() {
                return Ok(());
            }
            if immediate || now_millis().saturating_sub(series.first_time()) > max_chunk_age_ms {
                series.close_head();
            }
            (series.metric().clone(), series.shippable_chunks())
        };
        if to_ship.is_empty() {
            return Ok(());
        }

        debug!(count = to_ship.len(), fingerprint = %fp, "flushing chunks for series");
        if let Err(err) = self.ship_chunks(ctx, fp, &metric, &to_ship).await {
            self.metrics
                .chunk_store_failures
                .inc_by(to_ship.len() as u64);
            return Err(err);
        }

        // Drop what shipped; appends may have grown the tail meanwhile.
        let _guard = state.fp_locker.lock(fp);
        let mut series_locked = series.lock();
        series_locked.drop_shipped(to_ship.len());
        self.metrics.memory_chunks.sub(to_ship.len() as i64);
        if series_locked.is_empty() {
            state.fp_to_series.del(fp);
            state.index.delete(series_locked.metric(), fp);
            self.metrics.memory_series.dec();
        }
        Ok(())
    }

    /// Serialize chunks into wire records and upload them as one batch.
    async fn ship_chunks(
        &self,
        ctx: &RequestContext,
        fp: Fingerprint,
        metric: &LabelSet,
        chunks: &[ShippableChunk],
    ) -> Result<(), FlushError> {
        let mut wire_chunks = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let mut buf = vec![0u8; CHUNK_LEN];
            chunk.chunk.marshal_to_buf(&mut buf)?;
            self.metrics
                .chunk_utilization
                .observe(chunk.chunk.utilization());
            wire_chunks.push(WireChunk {
                id: format!("{}:{}:{}", fp, chunk.first_time, chunk.last_time),
                from: chunk.first_time,
                through: chunk.last_time,
                metric: metric.clone(),
                data: buf.into(),
            });
        }
        self.chunk_store.put(ctx, wire_chunks).await?;
        Ok(())
    }
}
