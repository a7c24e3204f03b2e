//! Striped per-fingerprint lock table

use parking_lot::{Mutex, MutexGuard};

use crate::types::Fingerprint;

/// A striped lock table guarding per-series critical sections.
///
/// Fingerprints map onto a fixed number of stripes (`fp % shards`), so memory
/// cost is bounded regardless of series count at the price of rare false
/// contention between series sharing a stripe.
///
/// Holding the guard for a fingerprint grants exclusive rights over that
/// series: creation, deletion, and mutation all happen under it. Two rules
/// keep the table deadlock-free:
///
/// - guards are released in LIFO order (automatic with RAII drops), and
/// - operations touching multiple series lock fingerprints in ascending
///   order — in this crate no path holds more than one guard at a time.
pub struct FingerprintLocker {
    shards: Vec<Mutex<()>>,
}

impl FingerprintLocker {
    /// Create a locker with `shards` stripes (minimum 1).
    pub fn new(shards: usize) -> Self {
        let shards = shards.max(1);
        Self {
            shards: (0..shards).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Block until the stripe for `fp` is free and lock it.
    pub fn lock(&self, fp: Fingerprint) -> FingerprintGuard<'_> {
        let shard = (fp.0 % self.shards.len() as u64) as usize;
        FingerprintGuard {
            _guard: self.shards[shard].lock(),
            fp,
        }
    }

    /// Number of stripes.
    pub fn shards(&self) -> usize {
        self.shards.len()
    }
}

/// RAII guard for one fingerprint's critical section.
pub struct FingerprintGuard<'a> {
    _guard: MutexGuard<'a, ()>,
    fp: Fingerprint,
}

impl FingerprintGuard<'_> {
    /// The fingerprint this guard locks.
    pub fn fingerprint(&self) -> Fingerprint {
        self.fp
    }
}
