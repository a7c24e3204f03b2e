//! Series fingerprinting
//!
//! A series is identified within its tenant by a 64-bit fingerprint derived
//! from its label set. [`fast_fingerprint`] is the cheap hash used on the hot
//! append path; it may collide across distinct label sets, which the
//! [`FpMapper`] resolves into canonical fingerprints. [`FingerprintLocker`]
//! provides the per-fingerprint critical sections that serialize all access
//! to a series.

mod locker;
mod mapper;

pub use locker::{FingerprintGuard, FingerprintLocker};
pub use mapper::{FpMapper, MapperPersistence, NoopPersistence};

use crate::types::{Fingerprint, LabelSet};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

const SEP: u8 = 0xff;

/// Hash a label set into its fast fingerprint.
///
/// FNV-1a over the name/value pairs in name order, with a separator byte
/// that cannot appear in UTF-8 label data between each component. The same
/// label set always hashes to the same value, across processes and restarts;
/// distinct label sets may collide, which the mapper disambiguates.
pub fn fast_fingerprint(labels: &LabelSet) -> Fingerprint {
    let mut hash = FNV_OFFSET;
    for (name, value) in labels.iter() {
        for &b in name.as_bytes() {
            hash = (hash ^ b as u64).wrapping_mul(FNV_PRIME);
        }
        hash = (hash ^ SEP as u64).wrapping_mul(FNV_PRIME);
        for &b in value.as_bytes() {
            hash = (hash ^ b as u64).wrapping_mul(FNV_PRIME);
        }
        hash = (hash ^ SEP as u64).wrapping_mul(FNV_PRIME);
    }
    Fingerprint(hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fast_fingerprint_deterministic() {
        let labels = LabelSet::from_pairs([("job", "api"), ("instance", "i-1")]);
        assert_eq!(fast_fingerprint(&labels), fast_fingerprint(&labels));
    }

    #[test]
    fn test_fast_fingerprint_insertion_order_irrelevant() {
        let a = LabelSet::from_pairs([("job", "api"), ("instance", "i-1")]);
        let b = LabelSet::from_pairs([("instance", "i-1"), ("job", "api")]);
        assert_eq!(fast_fingerprint(&a), fast_fingerprint(&b));
    }

    #[test]
    fn test_fast_fingerprint_distinguishes_sets() {
        let a = LabelSet::from_pairs([("job", "api")]);
        let b = LabelSet::from_pairs([("job", "web")]);
        let c = LabelSet::from_pairs([("job", "api"), ("env", "prod")]);
        assert_ne!(fast_fingerprint(&a), fast_fingerprint(&b));
        assert_ne!(fast_fingerprint(&a), fast_fingerprint(&c));
    }

    #[test]
    fn test_fast_fingerprint_separator_prevents_concatenation_aliasing() {
        // "ab" + "c" must not hash like "a" + "bc".
        let a = LabelSet::from_pairs([("ab", "c")]);
        let b = LabelSet::from_pairs([("a", "bc")]);
        assert_ne!(fast_fingerprint(&a), fast_fingerprint(&b));
    }

    #[test]
    fn test_fast_fingerprint_empty_set() {
        assert_eq!(fast_fingerprint(&LabelSet::new()).0, FNV_OFFSET);
    }
}
