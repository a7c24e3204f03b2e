//! Inverted label index
//!
//! Maps `label name → label value → sorted fingerprints` so queries can
//! resolve matchers into the set of series they select. Lookup unions the
//! fingerprint lists of all values a matcher accepts, then intersects the
//! per-matcher unions. Lists are kept strictly sorted and unique, making the
//! sort-merge union and intersection linear.

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::types::{Fingerprint, LabelMatcher, LabelSet};

/// Per-tenant inverted index over series label sets.
pub struct InvertedIndex {
    idx: RwLock<HashMap<String, HashMap<String, Vec<Fingerprint>>>>,
}

impl InvertedIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self {
            idx: RwLock::new(HashMap::new()),
        }
    }

    /// Register `fp` under every label of `labels`. Inserting a fingerprint
    /// that is already present is a no-op, preserving sortedness and
    /// uniqueness.
    pub fn add(&self, labels: &LabelSet, fp: Fingerprint) {
        let mut idx = self.idx.write();
        for (name, value) in labels.iter() {
            let fingerprints = idx
                .entry(name.to_string())
                .or_default()
                .entry(value.to_string())
                .or_default();
            if let Err(pos) = fingerprints.binary_search(&fp) {
                fingerprints.insert(pos, fp);
            }
        }
    }

    /// Remove `fp` from every label of `labels`, pruning value entries and
    /// name maps that become empty. Deleting an absent fingerprint is a
    /// no-op.
    pub fn delete(&self, labels: &LabelSet, fp: Fingerprint) {
        let mut idx = self.idx.write();
        for (name, value) in labels.iter() {
            let Some(values) = idx.get_mut(name) else {
                continue;
            };
            if let Some(fingerprints) = values.get_mut(value) {
                if let Ok(pos) = fingerprints.binary_search(&fp) {
                    fingerprints.remove(pos);
                }
                if fingerprints.is_empty() {
                    values.remove(value);
                }
            }
            if values.is_empty() {
                idx.remove(name);
            }
        }
    }

    /// Resolve matchers to the sorted fingerprints of all series satisfying
    /// every matcher.
    ///
    /// For each matcher, the fingerprint lists of all accepted values are
    /// merged into a union; unions are then intersected across matchers. The
    /// first matcher seeds the running result. A matcher naming a label with
    /// no entry in the index short-circuits to empty, as does an empty
    /// matcher list.
    pub fn lookup(&self, matchers: &[LabelMatcher]) -> Vec<Fingerprint> {
        if matchers.is_empty() {
            return Vec::new();
        }
        let idx = self.idx.read();

        let mut intersection: Option<Vec<Fingerprint>> = None;
        for matcher in matchers {
            let Some(values) = idx.get(&matcher.name) else {
                return Vec::new();
            };
            let mut union: Vec<Fingerprint> = Vec::new();
            for (value, fingerprints) in values {
                if matcher.matches(value) {
                    union = merge(&union, fingerprints);
                }
            }
            let next = match intersection {
                None => union,
                Some(current) => intersect(&current, &union),
            };
            if next.is_empty() {
                return Vec::new();
            }
            intersection = Some(next);
        }

        intersection.unwrap_or_default()
    }

    /// All values observed for a label name, in no particular order.
    pub fn lookup_label_values(&self, name: &str) -> Vec<String> {
        self.idx
            .read()
            .get(name)
            .map(|values| values.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for InvertedIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Union of two sorted unique fingerprint lists, sorted and unique.
fn merge(a: &[Fingerprint], b: &[Fingerprint]) -> Vec<Fingerprint> {
    let mut result = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => {
                result.push(a[i]);
                i += 1;
            }
            std::cmp::Ordering::Greater => {
                result.push(b[j]);
                j += 1;
            }
            std::cmp::Ordering::Equal => {
                result.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    result.extend_from_slice(&a[i..]);
    result.extend_from_slice(&b[j..]);
    result
}

/// Intersection of two sorted unique fingerprint lists.
fn intersect(a: &[Fingerprint], b: &[Fingerprint]) -> Vec<Fingerprint> {
    let mut result = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                result.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    result
}
