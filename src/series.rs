//! In-memory series and the per-tenant series map
//!
//! A [`MemorySeries`] is the ordered list of chunk descriptors for one label
//! set plus the last-sample state that drives duplicate and out-of-order
//! detection. All mutation happens under the series' fingerprint lock; the
//! inner mutex in [`SeriesMap`] is the aliasing cell that makes that
//! discipline expressible in safe Rust.
//!
//! Chunk-list invariants:
//!
//! - while a series exists and has received a sample, `chunk_descs` is
//!   non-empty and its last entry is the head, open iff `!head_chunk_closed`
//! - timestamps never decrease across appends
//! - `chunk_descs[i].last_time <= chunk_descs[i + 1].first_time`, so binary
//!   search over `first_time` is valid

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::chunk::{Chunk, ChunkDesc};
use crate::error::IngestError;
use crate::types::{Fingerprint, LabelSet, SamplePair, Timestamp};

/// Outcome of a successful [`MemorySeries::append`].
#[derive(Debug, PartialEq, Eq)]
pub enum SeriesAppend {
    /// The sample was stored; `new_chunks` chunks were opened doing so.
    Appended {
        /// Chunks opened by this append (0 or 1).
        new_chunks: usize,
    },
    /// The sample repeated the previous timestamp and value exactly; nothing
    /// was stored and the sample must not be counted as ingested.
    IdempotentNoOp,
}

/// A closed chunk captured for shipping, decoupled from the series.
pub struct ShippableChunk {
    /// The cloned chunk data.
    pub chunk: Box<dyn Chunk>,
    /// First timestamp in the chunk.
    pub first_time: Timestamp,
    /// Last timestamp in the chunk.
    pub last_time: Timestamp,
}

/// One series held in memory: its label set, chunks, and append state.
pub struct MemorySeries {
    metric: LabelSet,
    chunk_descs: Vec<ChunkDesc>,
    last_time: Timestamp,
    last_sample_value: f64,
    last_sample_value_set: bool,
    head_chunk_closed: bool,
    /// Set while an external iterator borrows the head chunk; cleared when
    /// the head is force-closed. Reserved: in-process queries iterate under
    /// the series lock and never set it.
    #[allow(dead_code)]
    head_chunk_used_by_iterator: bool,
}

impl MemorySeries {
    /// Create an empty series for `metric`. The first chunk is opened by the
    /// first append.
    pub fn new(metric: LabelSet) -> Self {
        Self {
            metric,
            chunk_descs: Vec::new(),
            last_time: i64::MIN,
            last_sample_value: 0.0,
            last_sample_value_set: false,
            head_chunk_closed: false,
            head_chunk_used_by_iterator: false,
        }
    }

    /// The series' label set.
    pub fn metric(&self) -> &LabelSet {
        &self.metric
    }

    /// Timestamp of the latest accepted sample, `i64::MIN` before any.
    pub fn last_time(&self) -> Timestamp {
        self.last_time
    }

    /// First buffered timestamp, `i64::MAX` while no chunk exists.
    pub fn first_time(&self) -> Timestamp {
        self.chunk_descs
            .first()
            .map(|cd| cd.first_time)
            .unwrap_or(i64::MAX)
    }

    /// Number of chunk descriptors currently held.
    pub fn chunk_count(&self) -> usize {
        self.chunk_descs.len()
    }

    /// Whether the series holds no chunks.
    pub fn is_empty(&self) -> bool {
        self.chunk_descs.is_empty()
    }

    /// Whether the head chunk has been closed.
    pub fn head_closed(&self) -> bool {
        self.head_chunk_closed
    }

    /// Append one sample. The caller holds the fingerprint lock.
    ///
    /// Duplicate and out-of-order classification:
    ///
    /// - same timestamp, same value as the previous sample: idempotent
    ///   no-op (common with client-side timestamps)
    /// - same timestamp, different value: [`IngestError::DuplicateSampleForTimestamp`]
    /// - earlier timestamp: [`IngestError::OutOfOrderSample`]
    ///
    /// Otherwise the pair goes into the head chunk, opening a new chunk
    /// first when the head is full or closed.
    pub fn append(&mut self, pair: SamplePair) -> Result<SeriesAppend, IngestError> {
        if self.last_sample_value_set {
            if pair.timestamp == self.last_time {
                if SamplePair::new(self.last_time, self.last_sample_value)
                    .value_equals(pair.value)
                {
                    return Ok(SeriesAppend::IdempotentNoOp);
                }
                return Err(IngestError::DuplicateSampleForTimestamp);
            }
            if pair.timestamp < self.last_time {
                return Err(IngestError::OutOfOrderSample);
            }
        }

        let mut new_chunks = 0;
        match self.chunk_descs.last_mut() {
            Some(head) if !self.head_chunk_closed => {
                if !head.add(pair) {
                    head.maybe_populate_last_time();
                    self.chunk_descs.push(ChunkDesc::open(pair));
                    new_chunks += 1;
                }
            }
            _ => {
                // No chunks yet, or the head was closed by a flush pass.
                self.chunk_descs.push(ChunkDesc::open(pair));
                self.head_chunk_closed = false;
                new_chunks += 1;
            }
        }

        self.last_time = pair.timestamp;
        self.last_sample_value = pair.value;
        self.last_sample_value_set = true;
        Ok(SeriesAppend::Appended { new_chunks })
    }

    /// Force-close the head chunk so every chunk becomes shippable.
    pub fn close_head(&mut self) {
        if self.chunk_descs.is_empty() || self.head_chunk_closed {
            return;
        }
        self.head_chunk_closed = true;
        self.head_chunk_used_by_iterator = false;
        if let Some(head) = self.chunk_descs.last_mut() {
            head.maybe_populate_last_time();
        }
    }

    /// Capture the chunks eligible for shipping: every chunk when the head
    /// is closed, otherwise all but the head. Chunks are cloned so callers
    /// can serialize and upload them without holding the series lock.
    pub fn shippable_chunks(&self) -> Vec<ShippableChunk> {
        let shippable = if self.head_chunk_closed {
            self.chunk_descs.len()
        } else {
            self.chunk_descs.len().saturating_sub(1)
        };
        self.chunk_descs[..shippable]
            .iter()
            .map(|cd| ShippableChunk {
                chunk: cd.chunk.clone_chunk(),
                first_time: cd.first_time,
                last_time: cd.last_time(),
            })
            .collect()
    }

    /// Drop the first `shipped` chunks after a successful upload.
    pub fn drop_shipped(&mut self, shipped: usize) {
        let shipped = shipped.min(self.chunk_descs.len());
        self.chunk_descs.drain(..shipped);
    }

    /// Extract the samples within the closed interval `[from, through]`.
    ///
    /// Selects the chunk window by binary search over `first_time`, stepping
    /// back one chunk when an earlier chunk may still reach into the range,
    /// then filters each chunk's samples to the interval. Output is ordered
    /// by timestamp.
    pub fn samples_for_range(&self, from: Timestamp, through: Timestamp) -> Vec<SamplePair> {
        let n = self.chunk_descs.len();
        if n == 0 || from > through {
            return Vec::new();
        }

        // First chunk starting after `from` / after `through`.
        let mut from_idx = self.chunk_descs.partition_point(|cd| cd.first_time <= from);
        let mut through_idx = self
            .chunk_descs
            .partition_point(|cd| cd.first_time <= through);

        if from_idx == n {
            // Even the last chunk starts at or before `from`; the series may
            // end before the range begins.
            if let Some(last) = self.chunk_descs.last() {
                if last.last_time() < from {
                    return Vec::new();
                }
            }
        }
        if from_idx > 0 {
            // The preceding chunk starts at or before `from` and may still
            // contain samples inside the range.
            from_idx -= 1;
        }
        if through_idx == n {
            through_idx = n - 1;
        }

        let mut values = Vec::new();
        for cd in &self.chunk_descs[from_idx..=through_idx] {
            values.extend(
                cd.chunk
                    .iter()
                    .filter(|p| p.timestamp >= from && p.timestamp <= through),
            );
        }
        values
    }
}

/// Concurrent fingerprint → series map for one tenant.
///
/// Iteration for flushing works over a point-in-time snapshot so no shard
/// lock is held while flush work runs.
pub struct SeriesMap {
    map: DashMap<Fingerprint, Arc<Mutex<MemorySeries>>>,
}

impl SeriesMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self {
            map: DashMap::new(),
        }
    }

    /// Look up the series for `fp`.
    pub fn get(&self, fp: Fingerprint) -> Option<Arc<Mutex<MemorySeries>>> {
        self.map.get(&fp).map(|entry| Arc::clone(entry.value()))
    }

    /// Insert a series under `fp`, returning the shared handle.
    pub fn put(&self, fp: Fingerprint, series: MemorySeries) -> Arc<Mutex<MemorySeries>> {
        let series = Arc::new(Mutex::new(series));
        self.map.insert(fp, Arc::clone(&series));
        series
    }

    /// Remove the series for `fp`.
    pub fn del(&self, fp: Fingerprint) {
        self.map.remove(&fp);
    }

    /// Number of series in the map.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the map holds no series.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Snapshot of all entries at one point in time.
    pub fn snapshot(&self) -> Vec<(Fingerprint, Arc<Mutex<MemorySeries>>)> {
        self.map
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect()
    }
}

impl Default for SeriesMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::MAX_PAIRS;

    fn series() -> MemorySeries {
        MemorySeries::new(LabelSet::from_pairs([("job", "api")]))
    }

    #[test]
    fn test_first_append_opens_chunk() {
        let mut s = series();
        assert!(s.is_empty());
        let outcome = s.append(SamplePair::new(100, 1.0)).unwrap();
        assert_eq!(outcome, SeriesAppend::Appended { new_chunks: 1 });
        assert_eq!(s.chunk_count(), 1);
        assert_eq!(s.last_time(), 100);
        assert_eq!(s.first_time(), 100);
    }

    #[test]
    fn test_append_monotonicity_invariants() {
        let mut s = series();
        let timestamps = [100, 101, 150, 151, 400, 1000];
        for (i, ts) in timestamps.iter().enumerate() {
            s.append(SamplePair::new(*ts, i as f64)).unwrap();
        }
        assert_eq!(s.last_time(), 1000);
        for window in s.chunk_descs.windows(2) {
            assert!(window[0].last_time() <= window[1].first_time);
        }
    }

    #[test]
    fn test_idempotent_duplicate_is_noop() {
        let mut s = series();
        s.append(SamplePair::new(100, 1.0)).unwrap();
        let outcome = s.append(SamplePair::new(100, 1.0)).unwrap();
        assert_eq!(outcome, SeriesAppend::IdempotentNoOp);
        assert_eq!(s.samples_for_range(0, 200).len(), 1);
    }

    #[test]
    fn test_conflicting_duplicate_rejected() {
        let mut s = series();
        s.append(SamplePair::new(100, 1.0)).unwrap();
        assert_eq!(
            s.append(SamplePair::new(100, 2.0)),
            Err(IngestError::DuplicateSampleForTimestamp)
        );
    }

    #[test]
    fn test_out_of_order_rejected() {
        let mut s = series();
        s.append(SamplePair::new(200, 1.0)).unwrap();
        assert_eq!(
            s.append(SamplePair::new(150, 2.0)),
            Err(IngestError::OutOfOrderSample)
        );
        // State is untouched by the rejection.
        assert_eq!(s.last_time(), 200);
        assert_eq!(s.samples_for_range(0, 300).len(), 1);
    }

    #[test]
    fn test_nan_duplicate_is_idempotent() {
        let mut s = series();
        s.append(SamplePair::new(100, f64::NAN)).unwrap();
        let outcome = s.append(SamplePair::new(100, f64::NAN)).unwrap();
        assert_eq!(outcome, SeriesAppend::IdempotentNoOp);
    }

    #[test]
    fn test_head_overflow_opens_new_chunk() {
        let capacity = MAX_PAIRS;
        let mut s = series();
        for i in 0..capacity {
            let outcome = s.append(SamplePair::new(i as i64, 0.0)).unwrap();
            let expected = if i == 0 { 1 } else { 0 };
            assert_eq!(
                outcome,
                SeriesAppend::Appended {
                    new_chunks: expected
                }
            );
        }
        assert_eq!(s.chunk_count(), 1);

        // One past capacity rolls over into a second chunk.
        let outcome = s.append(SamplePair::new(capacity as i64, 0.0)).unwrap();
        assert_eq!(outcome, SeriesAppend::Appended { new_chunks: 1 });
        assert_eq!(s.chunk_count(), 2);

        // The closed first chunk has its last_time populated.
        assert_eq!(s.chunk_descs[0].last_time, Some(capacity as i64 - 1));
        assert_eq!(s.chunk_descs[1].first_time, capacity as i64);
    }

    #[test]
    fn test_append_after_close_head_opens_new_chunk() {
        let mut s = series();
        s.append(SamplePair::new(100, 1.0)).unwrap();
        s.close_head();
        assert!(s.head_closed());

        let outcome = s.append(SamplePair::new(200, 2.0)).unwrap();
        assert_eq!(outcome, SeriesAppend::Appended { new_chunks: 1 });
        assert_eq!(s.chunk_count(), 2);
        assert!(!s.head_closed());
    }

    #[test]
    fn test_shippable_chunks_excludes_open_head() {
        let mut s = series();
        let capacity = MAX_PAIRS;
        for i in 0..(capacity + 1) {
            s.append(SamplePair::new(i as i64, 0.0)).unwrap();
        }
        assert_eq!(s.chunk_count(), 2);
        assert_eq!(s.shippable_chunks().len(), 1);

        s.close_head();
        assert_eq!(s.shippable_chunks().len(), 2);
    }

    #[test]
    fn test_drop_shipped_removes_prefix() {
        let mut s = series();
        let capacity = MAX_PAIRS;
        for i in 0..(2 * capacity + 1) {
            s.append(SamplePair::new(i as i64, 0.0)).unwrap();
        }
        assert_eq!(s.chunk_count(), 3);

        s.drop_shipped(2);
        assert_eq!(s.chunk_count(), 1);
        // The remaining chunk is the former head.
        assert_eq!(s.first_time(), 2 * capacity as i64);
    }

    #[test]
    fn test_range_before_first_sample() {
        let mut s = series();
        s.append(SamplePair::new(1000, 1.0)).unwrap();
        assert!(s.samples_for_range(0, 500).is_empty());
    }

    #[test]
    fn test_range_after_last_sample() {
        let mut s = series();
        s.append(SamplePair::new(1000, 1.0)).unwrap();
        assert!(s.samples_for_range(2000, 3000).is_empty());
    }

    #[test]
    fn test_range_filters_to_interval() {
        let mut s = series();
        for ts in [100, 200, 300] {
            s.append(SamplePair::new(ts, ts as f64)).unwrap();
        }
        let values = s.samples_for_range(150, 250);
        assert_eq!(values, vec![SamplePair::new(200, 200.0)]);
    }

    #[test]
    fn test_range_inverted_interval_is_empty() {
        let mut s = series();
        for ts in [100, 200, 300] {
            s.append(SamplePair::new(ts, ts as f64)).unwrap();
        }
        assert!(s.samples_for_range(250, 150).is_empty());
    }

    #[test]
    fn test_range_boundaries_inclusive() {
        let mut s = series();
        for ts in [100, 200, 300] {
            s.append(SamplePair::new(ts, ts as f64)).unwrap();
        }
        let values = s.samples_for_range(100, 300);
        assert_eq!(values.len(), 3);
    }

    #[test]
    fn test_range_spanning_chunks() {
        let capacity = MAX_PAIRS;
        let mut s = series();
        let total = 3 * capacity;
        for i in 0..total {
            s.append(SamplePair::new(i as i64, i as f64)).unwrap();
        }
        assert_eq!(s.chunk_count(), 3);

        let from = capacity as i64 - 5;
        let through = 2 * capacity as i64 + 5;
        let values = s.samples_for_range(from, through);
        assert_eq!(values.len(), (through - from + 1) as usize);
        assert!(values.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        assert_eq!(values[0].timestamp, from);
        assert_eq!(values[values.len() - 1].timestamp, through);
    }

    #[test]
    fn test_series_map_basics() {
        let map = SeriesMap::new();
        let fp = Fingerprint(9);
        assert!(map.get(fp).is_none());
        assert!(map.is_empty());

        map.put(fp, MemorySeries::new(LabelSet::from_pairs([("a", "b")])));
        assert_eq!(map.len(), 1);
        assert!(map.get(fp).is_some());
        assert_eq!(map.snapshot().len(), 1);

        map.del(fp);
        assert!(map.is_empty());
    }
}
