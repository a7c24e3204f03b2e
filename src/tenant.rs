//! Per-tenant state
//!
//! Each tenant is an isolation unit bundling its own fingerprint locker,
//! series map, collision mapper, and inverted index. Tenant state is created
//! lazily on first use and garbage-collected by the flush scheduler once its
//! series map drains.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::config::IngesterConfig;
use crate::error::IngestError;
use crate::fingerprint::{
    fast_fingerprint, FingerprintGuard, FingerprintLocker, FpMapper, NoopPersistence,
};
use crate::index::InvertedIndex;
use crate::series::{MemorySeries, SeriesMap};
use crate::types::{Fingerprint, LabelSet};

/// All in-memory state for one tenant.
pub struct TenantState {
    /// The tenant this state belongs to.
    pub tenant_id: String,
    /// Striped per-fingerprint lock table.
    pub fp_locker: FingerprintLocker,
    /// Fingerprint → series map.
    pub fp_to_series: Arc<SeriesMap>,
    /// Fast-fingerprint collision mapper.
    pub mapper: FpMapper,
    /// Label index for matcher-based lookup.
    pub index: InvertedIndex,
}

impl TenantState {
    /// Create empty state for `tenant_id`.
    pub fn new(tenant_id: String, cfg: &IngesterConfig) -> Self {
        let fp_to_series = Arc::new(SeriesMap::new());
        let mapper = FpMapper::new(Arc::clone(&fp_to_series), Box::new(NoopPersistence));
        Self {
            tenant_id,
            fp_locker: FingerprintLocker::new(cfg.fingerprint_locker_shards),
            fp_to_series,
            mapper,
            index: InvertedIndex::new(),
        }
    }

    /// Resolve `labels` to its series, creating the series if needed.
    ///
    /// Returns the canonical fingerprint, the series handle, whether the
    /// series was created by this call, and the held fingerprint guard —
    /// the caller appends under that guard and drops it afterwards.
    ///
    /// The raw fingerprint is locked first; when the mapper resolves a
    /// collision to a different canonical fingerprint, the raw lock is
    /// released before the canonical one is taken, so at most one
    /// fingerprint lock is ever held.
    pub fn get_or_create_series(
        &self,
        labels: &LabelSet,
    ) -> Result<
        (
            Fingerprint,
            Arc<Mutex<MemorySeries>>,
            bool,
            FingerprintGuard<'_>,
        ),
        IngestError,
    > {
        let raw_fp = fast_fingerprint(labels);
        let mut guard = self.fp_locker.lock(raw_fp);
        let fp = self.mapper.map_fp(raw_fp, labels)?;
        if fp != raw_fp {
            drop(guard);
            guard = self.fp_locker.lock(fp);
        }

        if let Some(series) = self.fp_to_series.get(fp) {
            return Ok((fp, series, false, guard));
        }

        let series = self
            .fp_to_series
            .put(fp, MemorySeries::new(labels.clone()));
        self.index.add(labels, fp);
        Ok((fp, series, true, guard))
    }
}
