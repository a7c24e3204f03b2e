//! Chunk store seam
//!
//! The durable columnar store behind the ingester is an opaque collaborator:
//! the core only needs an idempotent batch [`ChunkStore::put`]. This module
//! defines the wire record handed over, the trait, and an in-memory
//! implementation used for testing and development.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crate::context::RequestContext;
use crate::error::StoreError;
use crate::types::{LabelSet, Timestamp};

/// One serialized chunk as handed to the store.
///
/// `data` is exactly [`crate::chunk::CHUNK_LEN`] bytes, zero-padded past the
/// codec payload. `id` is `"<fingerprint>:<first>:<last>"` in decimal, which
/// makes re-uploads of the same chunk idempotent on the store side.
#[derive(Debug, Clone)]
pub struct WireChunk {
    /// Store-level identity of the chunk.
    pub id: String,
    /// First timestamp covered, milliseconds.
    pub from: Timestamp,
    /// Last timestamp covered, milliseconds.
    pub through: Timestamp,
    /// Label set of the owning series.
    pub metric: LabelSet,
    /// Marshalled chunk bytes.
    pub data: Bytes,
}

/// The durable chunk store collaborator.
///
/// `put` uploads a batch and is assumed idempotent on chunk id: the flush
/// scheduler re-ships chunks whose earlier upload failed mid-batch.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Upload a batch of chunks for the tenant in `ctx`.
    async fn put(&self, ctx: &RequestContext, chunks: Vec<WireChunk>) -> Result<(), StoreError>;
}

/// In-memory [`ChunkStore`] for tests and development.
///
/// Not suitable for production: chunks live on the heap and vanish with the
/// process. Records every received chunk, counts `put` invocations, tracks
/// the concurrent-put high-water mark, and can inject failures or a
/// per-call delay to widen concurrency windows in tests.
#[derive(Default)]
pub struct MemoryChunkStore {
    chunks: RwLock<Vec<WireChunk>>,
    puts: AtomicU64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    fail_puts: AtomicBool,
    put_delay_ms: AtomicU64,
}

impl MemoryChunkStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// All chunks received so far, in arrival order.
    pub fn chunks(&self) -> Vec<WireChunk> {
        self.chunks.read().clone()
    }

    /// Number of `put` calls observed (including failed ones).
    pub fn put_count(&self) -> u64 {
        self.puts.load(Ordering::Relaxed)
    }

    /// Highest number of concurrently in-flight `put` calls seen.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::Relaxed)
    }

    /// Make subsequent `put` calls fail (or succeed again).
    pub fn set_fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::Relaxed);
    }

    /// Delay every `put` by `delay`, to widen concurrency windows in tests.
    pub fn set_put_delay(&self, delay: Duration) {
        self.put_delay_ms
            .store(delay.as_millis() as u64, Ordering::Relaxed);
    }
}

#[async_trait]
impl ChunkStore for MemoryChunkStore {
    async fn put(&self, _ctx: &RequestContext, chunks: Vec<WireChunk>) -> Result<(), StoreError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let delay = self.put_delay_ms.load(Ordering::Relaxed);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let result = if self.fail_puts.load(Ordering::Relaxed) {
            Err(StoreError::Backend("injected put failure".to_string()))
        } else {
            self.chunks.write().extend(chunks);
            Ok(())
        };

        self.puts.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
