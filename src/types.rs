//! Core data types used throughout the ingestion buffer
//!
//! This module defines the fundamental data structures shared across the
//! system:
//!
//! - **`LabelSet`**: ordered label name/value pairs identifying a series
//! - **`Fingerprint`**: 64-bit series identifier within a tenant
//! - **`Sample`**: a single ingested measurement (labels + timestamp + value)
//! - **`SamplePair`**: a (timestamp, value) pair inside a series
//! - **`SampleStream`**: query output, one stream per matching series
//! - **`LabelMatcher`**: per-label predicate used by queries

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::IngestError;

/// Milliseconds since the Unix epoch, the timestamp unit for all samples.
pub type Timestamp = i64;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// 64-bit identifier for a series within a tenant.
///
/// Fast fingerprints are produced by [`crate::fingerprint::fast_fingerprint`]
/// and may collide across distinct label sets; canonical fingerprints are
/// collision-resolved by [`crate::fingerprint::FpMapper`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Fingerprint(pub u64);

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Fingerprint {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// An ordered set of label name/value pairs identifying a series.
///
/// Backed by a `BTreeMap` so iteration order is deterministic, which keeps
/// fingerprints and mapper signatures stable for the same logical set.
/// Labels with empty values are stripped on ingest before a sample reaches a
/// series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct LabelSet(BTreeMap<String, String>);

impl LabelSet {
    /// Create an empty label set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a label set from name/value pairs.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self(
            pairs
                .into_iter()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect(),
        )
    }

    /// Insert a label, replacing any previous value for the name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    /// Look up the value for a label name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Iterate over `(name, value)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Number of labels.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set carries no labels.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Drop labels whose value is empty. Applied to every sample on ingest.
    pub fn strip_empty_values(&mut self) {
        self.0.retain(|_, v| !v.is_empty());
    }

    /// A unique string form of the set, used as the mapper's collision key.
    ///
    /// Names and values are joined with control separators that cannot occur
    /// in real label data, so distinct sets always produce distinct
    /// signatures.
    pub fn signature(&self) -> String {
        let mut sig = String::with_capacity(self.0.len() * 16);
        for (name, value) in &self.0 {
            sig.push_str(name);
            sig.push('\u{0}');
            sig.push_str(value);
            sig.push('\u{1}');
        }
        sig
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for LabelSet {
    fn from_iter<T: IntoIterator<Item = (&'a str, &'a str)>>(iter: T) -> Self {
        Self::from_pairs(iter)
    }
}

impl fmt::Display for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, value)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={:?}", name, value)?;
        }
        write!(f, "}}")
    }
}

/// A single ingested measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Label set identifying the series this sample belongs to.
    pub labels: LabelSet,
    /// Unix timestamp in milliseconds.
    pub timestamp: Timestamp,
    /// Measurement value.
    pub value: f64,
}

impl Sample {
    /// Create a new sample.
    pub fn new(labels: LabelSet, timestamp: Timestamp, value: f64) -> Self {
        Self {
            labels,
            timestamp,
            value,
        }
    }
}

/// A (timestamp, value) pair inside a series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplePair {
    /// Unix timestamp in milliseconds.
    pub timestamp: Timestamp,
    /// Measurement value.
    pub value: f64,
}

impl SamplePair {
    /// Create a new pair.
    pub fn new(timestamp: Timestamp, value: f64) -> Self {
        Self { timestamp, value }
    }

    /// Value equality that treats two NaNs as equal, so a repeated NaN
    /// sample is recognized as an idempotent duplicate.
    pub fn value_equals(&self, other: f64) -> bool {
        self.value == other || (self.value.is_nan() && other.is_nan())
    }
}

/// One query result stream: the matched series' labels plus the samples
/// falling in the queried range, ordered by timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleStream {
    /// Label set of the matched series.
    pub labels: LabelSet,
    /// Samples within the queried range, ascending by timestamp.
    pub samples: Vec<SamplePair>,
}

/// How a [`LabelMatcher`] compares label values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    /// Value must equal the matcher value.
    Equal,
    /// Value must not equal the matcher value.
    NotEqual,
    /// Value must match the (anchored) regular expression.
    Regex,
    /// Value must not match the (anchored) regular expression.
    NotRegex,
}

/// A predicate on a single label name used by queries.
///
/// Regex matchers are anchored: the expression must match the whole value.
#[derive(Debug, Clone)]
pub struct LabelMatcher {
    /// Comparison mode.
    pub match_type: MatchType,
    /// Label name the matcher applies to.
    pub name: String,
    /// Comparison value or regular expression source.
    pub value: String,
    re: Option<Regex>,
}

impl LabelMatcher {
    /// Create a matcher. Fails with [`IngestError::InvalidMatcher`] when a
    /// regex matcher carries an expression that does not compile.
    pub fn new(
        match_type: MatchType,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self, IngestError> {
        let name = name.into();
        let value = value.into();
        let re = match match_type {
            MatchType::Regex | MatchType::NotRegex => Some(
                Regex::new(&format!("^(?:{})$", value))
                    .map_err(|e| IngestError::InvalidMatcher(e.to_string()))?,
            ),
            MatchType::Equal | MatchType::NotEqual => None,
        };
        Ok(Self {
            match_type,
            name,
            value,
            re,
        })
    }

    /// Shorthand for an equality matcher, which cannot fail.
    pub fn equal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            match_type: MatchType::Equal,
            name: name.into(),
            value: value.into(),
            re: None,
        }
    }

    /// Whether a label value satisfies this matcher.
    pub fn matches(&self, value: &str) -> bool {
        match self.match_type {
            MatchType::Equal => value == self.value,
            MatchType::NotEqual => value != self.value,
            MatchType::Regex => self.re.as_ref().is_some_and(|re| re.is_match(value)),
            MatchType::NotRegex => !self.re.as_ref().is_some_and(|re| re.is_match(value)),
        }
    }
}

impl fmt::Display for LabelMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.match_type {
            MatchType::Equal => "=",
            MatchType::NotEqual => "!=",
            MatchType::Regex => "=~",
            MatchType::NotRegex => "!~",
        };
        write!(f, "{}{}{:?}", self.name, op, self.value)
    }
}
