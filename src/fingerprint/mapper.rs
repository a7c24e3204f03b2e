//! Fingerprint collision mapper
//!
//! Fast fingerprints are hashes and may collide: two distinct label sets can
//! produce the same 64-bit value. The mapper detects collisions by comparing
//! the incoming label set against the series currently occupying the raw
//! fingerprint, and assigns colliding newcomers a synthetic canonical
//! fingerprint from a reserved counter range. Repeated calls with the same
//! label set always yield the same canonical fingerprint for the life of the
//! process; restart stability requires a real [`MapperPersistence`] backend.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::error::MapperError;
use crate::series::SeriesMap;
use crate::types::{Fingerprint, LabelSet};

/// Persistence seam for fingerprint mappings.
///
/// Called with every newly created mapping. The in-memory variant is a
/// no-op; an implementation targeting restart-stable fingerprints records
/// the mapping durably and replays it into a fresh mapper before the
/// ingester accepts appends.
pub trait MapperPersistence: Send + Sync {
    /// Durably record that `labels` (keyed by its signature) collided on
    /// `raw` and was assigned `mapped`.
    fn archive_mapping(
        &self,
        raw: Fingerprint,
        signature: &str,
        mapped: Fingerprint,
    ) -> Result<(), MapperError>;
}

/// Memory-only persistence: mappings live only as long as the process.
pub struct NoopPersistence;

impl MapperPersistence for NoopPersistence {
    fn archive_mapping(
        &self,
        _raw: Fingerprint,
        _signature: &str,
        _mapped: Fingerprint,
    ) -> Result<(), MapperError> {
        Ok(())
    }
}

#[derive(Default)]
struct MapperState {
    /// raw fingerprint → (label-set signature → canonical fingerprint)
    mappings: HashMap<Fingerprint, HashMap<String, Fingerprint>>,
    /// Highest synthetic fingerprint handed out so far.
    highest_mapped: u64,
}

/// Resolves fast-fingerprint collisions into canonical fingerprints.
///
/// Synthetic fingerprints are allocated from the low counter range starting
/// at 1, far from the values FNV-1a produces for real label sets.
pub struct FpMapper {
    state: Mutex<MapperState>,
    series: Arc<SeriesMap>,
    persistence: Box<dyn MapperPersistence>,
}

impl FpMapper {
    /// Create a mapper over the tenant's series map.
    pub fn new(series: Arc<SeriesMap>, persistence: Box<dyn MapperPersistence>) -> Self {
        Self {
            state: Mutex::new(MapperState::default()),
            series,
            persistence,
        }
    }

    /// Map a raw fast fingerprint to the canonical fingerprint for `labels`.
    ///
    /// Callers must hold the fingerprint lock for `raw`. When the result
    /// differs from `raw`, the caller releases `raw` and locks the mapped
    /// fingerprint before touching the series.
    pub fn map_fp(
        &self,
        raw: Fingerprint,
        labels: &LabelSet,
    ) -> Result<Fingerprint, MapperError> {
        let signature = labels.signature();
        let mut state = self.state.lock();

        if let Some(mapped) = state
            .mappings
            .get(&raw)
            .and_then(|per_sig| per_sig.get(&signature))
        {
            return Ok(*mapped);
        }

        // No recorded mapping. If a series already occupies the raw
        // fingerprint with different labels, this is a fresh collision.
        if let Some(series) = self.series.get(raw) {
            let occupied_by_same = {
                let series = series.lock();
                *series.metric() == *labels
            };
            if occupied_by_same {
                return Ok(raw);
            }
            return self.add_mapping(&mut state, raw, signature, labels);
        }

        Ok(raw)
    }

    fn add_mapping(
        &self,
        state: &mut MapperState,
        raw: Fingerprint,
        signature: String,
        labels: &LabelSet,
    ) -> Result<Fingerprint, MapperError> {
        state.highest_mapped += 1;
        let mapped = Fingerprint(state.highest_mapped);
        self.persistence.archive_mapping(raw, &signature, mapped)?;
        state
            .mappings
            .entry(raw)
            .or_default()
            .insert(signature, mapped);
        warn!(
            raw = %raw,
            mapped = %mapped,
            labels = %labels,
            "fingerprint collision detected, mapped to alternative fingerprint"
        );
        Ok(mapped)
    }

    /// Number of collision mappings currently recorded.
    pub fn mapping_count(&self) -> usize {
        self.state
            .lock()
            .mappings
            .values()
            .map(|per_sig| per_sig.len())
            .sum()
    }
}
