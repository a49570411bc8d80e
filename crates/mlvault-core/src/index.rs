//! # Index Catalogue
//!
//! Secondary indexes maintained by the store on every write.
//!
//! An index row is `(index, key, document id)`. Rows are written in the same
//! atomic commit as the document they describe, so a reader never observes
//! a document without its index rows or the reverse.
//!
//! Keys are plain strings built so that lexicographic order equals the
//! intended sort order: timestamps use a fixed-width UTC format and metric
//! values use an order-preserving hex encoding of the `f64` bits.

use chrono::{DateTime, Utc};
use std::fmt;

/// Separator between the parts of a compound key.
pub const KEY_SEPARATOR: char = '\u{1f}';

/// Every secondary index of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IndexKey {
    UserEmail,
    ModelRun,
    ModelUserCreated,
    ModelExperiment,
    ModelKind,
    ModelDataset,
    ModelStatus,
    ModelTag,
    ModelMetric,
    ComparisonUser,
    ComparisonModel,
    ComparisonStatus,
    ExplainabilityModel,
    ExplainabilityUser,
    ExplainabilityComputed,
    FairnessModel,
    FairnessUser,
    FairnessComputed,
    ActivityUserTime,
    ActivityKind,
}

impl IndexKey {
    /// Stable name used as the first component of the index row.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            IndexKey::UserEmail => "users.email",
            IndexKey::ModelRun => "models.run_id",
            IndexKey::ModelUserCreated => "models.user_created",
            IndexKey::ModelExperiment => "models.experiment_id",
            IndexKey::ModelKind => "models.model_kind",
            IndexKey::ModelDataset => "models.dataset_name",
            IndexKey::ModelStatus => "models.status",
            IndexKey::ModelTag => "models.tags",
            IndexKey::ModelMetric => "models.metrics",
            IndexKey::ComparisonUser => "comparisons.user_id",
            IndexKey::ComparisonModel => "comparisons.model_ids",
            IndexKey::ComparisonStatus => "comparisons.status",
            IndexKey::ExplainabilityModel => "explainability.model_id",
            IndexKey::ExplainabilityUser => "explainability.user_id",
            IndexKey::ExplainabilityComputed => "explainability.computed_at",
            IndexKey::FairnessModel => "fairness.model_id",
            IndexKey::FairnessUser => "fairness.user_id",
            IndexKey::FairnessComputed => "fairness.computed_at",
            IndexKey::ActivityUserTime => "activities.user_time",
            IndexKey::ActivityKind => "activities.kind",
        }
    }

    /// Unique indexes reject a second document under the same key.
    #[must_use]
    pub const fn is_unique(self) -> bool {
        matches!(self, IndexKey::UserEmail | IndexKey::ModelRun)
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One index row contributed by a document.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexEntry {
    pub index: IndexKey,
    pub key: String,
}

impl IndexEntry {
    #[must_use]
    pub fn new(index: IndexKey, key: impl Into<String>) -> Self {
        Self {
            index,
            key: key.into(),
        }
    }
}

// =============================================================================
// KEY ENCODING
// =============================================================================

/// Fixed-width, lexicographically sortable UTC timestamp.
#[must_use]
pub fn time_key(at: DateTime<Utc>) -> String {
    at.format("%Y%m%dT%H%M%S%.6fZ").to_string()
}

/// Join key parts with [`KEY_SEPARATOR`].
#[must_use]
pub fn compound_key(parts: &[&str]) -> String {
    let mut key = String::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            key.push(KEY_SEPARATOR);
        }
        key.push_str(part);
    }
    key
}

/// Prefix matching every compound key that starts with `parts`.
#[must_use]
pub fn compound_prefix(parts: &[&str]) -> String {
    let mut prefix = compound_key(parts);
    prefix.push(KEY_SEPARATOR);
    prefix
}

/// Order-preserving encoding of an `f64` as 16 hex digits.
///
/// Positive values get the sign bit set, negative values are bit-inverted,
/// so unsigned comparison of the result matches numeric order.
#[must_use]
pub fn ordered_f64_key(value: f64) -> String {
    let bits = value.to_bits();
    let mapped = if bits >> 63 == 0 {
        bits | (1 << 63)
    } else {
        !bits
    };
    format!("{mapped:016x}")
}

/// Metric index key: `<metric><SEP><ordered value>`.
///
/// `-0.0` is stored as `0.0` so range bounds compare numerically.
#[must_use]
pub fn metric_key(metric: &str, value: f64) -> String {
    let value = if value == 0.0 { 0.0 } else { value };
    compound_key(&[metric, &ordered_f64_key(value)])
}

/// Lowercased email used by the unique email index.
#[must_use]
pub fn email_key(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn ordered_keys_follow_numeric_order() {
        let values = [-3.5, -0.25, 0.0, 0.1, 0.8913, 0.9018, 12.0];
        let keys: Vec<_> = values.iter().map(|v| ordered_f64_key(*v)).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn negative_zero_metric_shares_the_zero_key() {
        assert_eq!(metric_key("accuracy", -0.0), metric_key("accuracy", 0.0));
        assert!(metric_key("accuracy", -0.0) >= metric_key("accuracy", 0.0));
    }

    #[test]
    fn time_keys_sort_chronologically() {
        let early = Utc.with_ymd_and_hms(2025, 9, 17, 14, 30, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2025, 11, 2, 8, 5, 0).unwrap();
        assert!(time_key(early) < time_key(late));
        assert_eq!(time_key(early).len(), time_key(late).len());
    }

    #[test]
    fn compound_prefix_matches_only_its_group() {
        let prefix = compound_prefix(&["ryan_001"]);
        assert!(compound_key(&["ryan_001", "x"]).starts_with(&prefix));
        assert!(!compound_key(&["ryan_0011", "x"]).starts_with(&prefix));
    }

    #[test]
    fn only_email_and_run_are_unique() {
        assert!(IndexKey::UserEmail.is_unique());
        assert!(IndexKey::ModelRun.is_unique());
        assert!(!IndexKey::ModelTag.is_unique());
    }

    #[test]
    fn email_key_is_case_insensitive() {
        assert_eq!(email_key(" Ryan@Example.com "), "ryan@example.com");
    }
}
