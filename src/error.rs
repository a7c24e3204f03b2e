//! Error types for the ingestion buffer

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    /// Ingest error
    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),

    /// Chunk codec error
    #[error("Chunk error: {0}")]
    Chunk(#[from] ChunkError),

    /// Chunk store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Fingerprint mapper error
    #[error("Mapper error: {0}")]
    Mapper(#[from] MapperError),

    /// Metrics registration error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Caller-visible errors from append and query operations.
///
/// An append batch aborts at the first failing sample; samples appended
/// before the failure stay in memory. A failing query returns no partial
/// result.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum IngestError {
    /// The request context carries no tenant id
    #[error("no tenant id in request context")]
    NoTenant,

    /// The operation arrived after shutdown began
    #[error("ingester is stopping")]
    Stopping,

    /// The request context was cancelled
    #[error("request cancelled")]
    Cancelled,

    /// A sample repeats the latest timestamp of its series with a different
    /// value
    #[error("duplicate sample for timestamp")]
    DuplicateSampleForTimestamp,

    /// A sample's timestamp precedes the latest timestamp of its series
    #[error("sample timestamp out of order")]
    OutOfOrderSample,

    /// A query matcher could not be constructed
    #[error("invalid label matcher: {0}")]
    InvalidMatcher(String),

    /// The fingerprint mapper failed while resolving a series
    #[error(transparent)]
    Mapper(#[from] MapperError),
}

/// Chunk codec errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ChunkError {
    /// The destination buffer cannot hold the marshalled chunk
    #[error("chunk buffer too small: need {need} bytes, have {have}")]
    BufferTooSmall {
        /// Bytes the marshalled chunk requires
        need: usize,
        /// Bytes the caller supplied
        have: usize,
    },

    /// The source buffer does not contain a well-formed chunk
    #[error("malformed chunk data: {0}")]
    Malformed(String),
}

/// Chunk store errors, produced by [`crate::store::ChunkStore::put`]
#[derive(Error, Debug)]
pub enum StoreError {
    /// The backing store rejected or failed the upload
    #[error("chunk store put failed: {0}")]
    Backend(String),
}

/// Fingerprint mapper errors.
///
/// Surfaced at series creation time; with the in-memory no-op persistence
/// these cannot occur, so seeing one indicates a broken persistence backend
/// or a violated mapper invariant.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum MapperError {
    /// The persistence backend failed to record a mapping
    #[error("failed to persist fingerprint mapping: {0}")]
    Persistence(String),
}

/// Errors internal to the asynchronous flush path.
///
/// Never surfaced to callers: flush failures are logged and counted, and the
/// affected chunks stay in memory to be retried on the next flush tick.
#[derive(Error, Debug)]
pub enum FlushError {
    /// A chunk failed to serialize
    #[error("chunk encoding failed: {0}")]
    Encoding(#[from] ChunkError),

    /// The chunk store rejected the batch
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result type alias
pub type Result<T, E = Error> = std::result::Result<T, E>;
