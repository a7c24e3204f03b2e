//! Plain pair codec
//!
//! The crate's built-in chunk codec: uncompressed little-endian
//! `(timestamp, value)` pairs behind a two-byte count header. Production
//! deployments plug a compressing codec in behind the [`Chunk`] trait; this
//! one keeps the lifecycle exercisable without one.
//!
//! # Binary layout (1024 bytes total)
//!
//! ```text
//! Offset | Size | Field
//! -------|------|----------------------------
//!   0    |  2   | pair count (u16 LE)
//!   2    | 16·n | pairs: timestamp i64 LE, value f64 LE
//!   …    |  …   | zero padding up to CHUNK_LEN
//! ```

use crate::chunk::{Chunk, CHUNK_LEN};
use crate::error::ChunkError;
use crate::types::{SamplePair, Timestamp};

const HEADER_LEN: usize = 2;
const PAIR_LEN: usize = 16;

/// Pairs one chunk can hold within [`CHUNK_LEN`] bytes.
pub const MAX_PAIRS: usize = (CHUNK_LEN - HEADER_LEN) / PAIR_LEN;

/// Fixed-capacity chunk of plain little-endian sample pairs.
#[derive(Debug, Clone, Default)]
pub struct PairChunk {
    pairs: Vec<SamplePair>,
}

impl PairChunk {
    /// Create an empty chunk.
    pub fn new() -> Self {
        Self {
            pairs: Vec::with_capacity(MAX_PAIRS),
        }
    }

    /// Decode a chunk previously produced by `marshal_to_buf`.
    pub fn unmarshal_from_buf(buf: &[u8]) -> Result<Self, ChunkError> {
        if buf.len() < HEADER_LEN {
            return Err(ChunkError::Malformed("missing pair count header".into()));
        }
        let count = u16::from_le_bytes([buf[0], buf[1]]) as usize;
        if count > MAX_PAIRS {
            return Err(ChunkError::Malformed(format!(
                "pair count {} exceeds capacity {}",
                count, MAX_PAIRS
            )));
        }
        let need = HEADER_LEN + count * PAIR_LEN;
        if buf.len() < need {
            return Err(ChunkError::Malformed(format!(
                "truncated chunk: {} pairs need {} bytes, have {}",
                count,
                need,
                buf.len()
            )));
        }
        let mut pairs = Vec::with_capacity(count);
        for i in 0..count {
            let at = HEADER_LEN + i * PAIR_LEN;
            let mut ts = [0u8; 8];
            let mut val = [0u8; 8];
            ts.copy_from_slice(&buf[at..at + 8]);
            val.copy_from_slice(&buf[at + 8..at + 16]);
            pairs.push(SamplePair::new(
                i64::from_le_bytes(ts),
                f64::from_le_bytes(val),
            ));
        }
        Ok(Self { pairs })
    }
}

impl Chunk for PairChunk {
    fn add(&mut self, pair: SamplePair) -> bool {
        if self.pairs.len() >= MAX_PAIRS {
            return false;
        }
        self.pairs.push(pair);
        true
    }

    fn iter(&self) -> Box<dyn Iterator<Item = SamplePair> + '_> {
        Box::new(self.pairs.iter().copied())
    }

    fn marshal_to_buf(&self, buf: &mut [u8]) -> Result<(), ChunkError> {
        let need = HEADER_LEN + self.pairs.len() * PAIR_LEN;
        if buf.len() < need {
            return Err(ChunkError::BufferTooSmall {
                need,
                have: buf.len(),
            });
        }
        buf[..HEADER_LEN].copy_from_slice(&(self.pairs.len() as u16).to_le_bytes());
        for (i, pair) in self.pairs.iter().enumerate() {
            let at = HEADER_LEN + i * PAIR_LEN;
            buf[at..at + 8].copy_from_slice(&pair.timestamp.to_le_bytes());
            buf[at + 8..at + 16].copy_from_slice(&pair.value.to_le_bytes());
        }
        Ok(())
    }

    fn utilization(&self) -> f64 {
        self.pairs.len() as f64 / MAX_PAIRS as f64
    }

    fn first_time(&self) -> Timestamp {
        self.pairs.first().map(|p| p.timestamp).unwrap_or(i64::MIN)
    }

    fn last_time(&self) -> Timestamp {
        self.pairs.last().map(|p| p.timestamp).unwrap_or(i64::MIN)
    }

    fn len(&self) -> usize {
        self.pairs.len()
    }

    fn clone_chunk(&self) -> Box<dyn Chunk> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_until_overflow() {
        let mut chunk = PairChunk::new();
        for i in 0..MAX_PAIRS {
            assert!(chunk.add(SamplePair::new(i as i64, i as f64)));
        }
        // The pair that does not fit is not consumed.
        assert!(!chunk.add(SamplePair::new(MAX_PAIRS as i64, 0.0)));
        assert_eq!(chunk.len(), MAX_PAIRS);
        assert_eq!(chunk.utilization(), 1.0);
    }

    #[test]
    fn test_time_bounds() {
        let mut chunk = PairChunk::new();
        assert_eq!(chunk.first_time(), i64::MIN);
        chunk.add(SamplePair::new(100, 1.0));
        chunk.add(SamplePair::new(250, 2.0));
        assert_eq!(chunk.first_time(), 100);
        assert_eq!(chunk.last_time(), 250);
    }

    #[test]
    fn test_marshal_roundtrip() {
        let mut chunk = PairChunk::new();
        chunk.add(SamplePair::new(100, 1.25));
        chunk.add(SamplePair::new(200, -3.5));

        let mut buf = vec![0u8; CHUNK_LEN];
        chunk.marshal_to_buf(&mut buf).unwrap();

        let decoded = PairChunk::unmarshal_from_buf(&buf).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded.pairs[0], SamplePair::new(100, 1.25));
        assert_eq!(decoded.pairs[1], SamplePair::new(200, -3.5));

        // Padding past the payload stays zeroed.
        assert!(buf[HEADER_LEN + 2 * PAIR_LEN..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_marshal_buffer_too_small() {
        let mut chunk = PairChunk::new();
        chunk.add(SamplePair::new(100, 1.0));
        let mut buf = vec![0u8; 8];
        assert_eq!(
            chunk.marshal_to_buf(&mut buf),
            Err(ChunkError::BufferTooSmall { need: 18, have: 8 })
        );
    }

    #[test]
    fn test_unmarshal_rejects_garbage() {
        assert!(PairChunk::unmarshal_from_buf(&[1]).is_err());

        // Count claims more pairs than the buffer carries.
        let mut buf = vec![0u8; 32];
        buf[..2].copy_from_slice(&10u16.to_le_bytes());
        assert!(PairChunk::unmarshal_from_buf(&buf).is_err());

        // Count beyond capacity.
        let mut buf = vec![0u8; CHUNK_LEN];
        buf[..2].copy_from_slice(&(MAX_PAIRS as u16 + 1).to_le_bytes());
        assert!(PairChunk::unmarshal_from_buf(&buf).is_err());
    }
}
