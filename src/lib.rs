//! Kuba Ingester - multi-tenant in-memory time-series ingestion buffer
//!
//! A staging layer that sits between an ingestion front-end and a durable
//! columnar chunk store:
//!
//! - accepts streams of timestamped samples tagged with label sets
//! - groups them into per-series chunks held in memory
//! - answers range queries over the recent in-memory window
//! - asynchronously flushes aged chunks to the chunk store and reclaims
//!   drained series and tenants
//!
//! Each tenant gets its own fingerprint locker, series map, collision
//! mapper, and inverted index; queries for older data are served from the
//! chunk store by other components.
//!
//! # Example
//!
//! ```rust,ignore
//! use kuba_ingester::{Ingester, IngesterConfig, RequestContext, Sample, LabelSet};
//! use kuba_ingester::store::MemoryChunkStore;
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryChunkStore::new());
//! let ingester = Ingester::new(IngesterConfig::default(), store)?;
//!
//! let ctx = RequestContext::for_tenant("team-a");
//! let labels = LabelSet::from_pairs([("job", "api")]);
//! ingester.append(&ctx, vec![Sample::new(labels, 1_700_000_000_000, 42.5)]).await?;
//!
//! ingester.stop().await; // flushes everything to the store
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chunk;
pub mod config;
pub mod context;
pub mod error;
pub mod fingerprint;
pub mod index;
pub mod ingester;
pub mod metrics;
pub mod series;
pub mod store;
pub mod tenant;
pub mod types;

// Re-export main types
pub use config::IngesterConfig;
pub use context::RequestContext;
pub use error::{Error, IngestError, Result};
pub use ingester::Ingester;
pub use store::{ChunkStore, MemoryChunkStore, WireChunk};
pub use types::{LabelMatcher, LabelSet, MatchType, Sample, SamplePair, SampleStream};
