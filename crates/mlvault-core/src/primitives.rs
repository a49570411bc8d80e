//! # Store Primitives
//!
//! Hardcoded limits and defaults for the mlvault store.
//!
//! Limits are compiled in and immutable at runtime. Defaults can be
//! overridden through [`crate::config::VaultConfig`].

/// Common rate-like performance metrics, in declared order.
///
/// Each value must lie in `[0, 1]`. This order is also the default metric
/// precedence of the comparison engine.
pub const RATE_METRICS: [&str; 5] = ["accuracy", "precision", "recall", "f1_score", "auc_roc"];

/// Default absolute importance difference above which a feature is divergent.
pub const DEFAULT_DIVERGENCE_THRESHOLD: f64 = 0.05;

/// Default number of apply rounds before a comparison is marked failed.
pub const DEFAULT_RETRY_BUDGET: u32 = 3;

/// Default number of re-read-and-retry attempts on a version conflict.
pub const DEFAULT_CONFLICT_RETRIES: u32 = 16;

/// Default number of divergent explainability features reported.
pub const DEFAULT_MAX_DIVERGENT_FEATURES: usize = 5;

/// Default deadline for a single aggregation call.
pub const DEFAULT_AGGREGATION_TIMEOUT_MS: u64 = 5_000;

/// Inclusive bounds of the overall fairness score.
pub const FAIRNESS_SCORE_RANGE: (f64, f64) = (0.0, 10.0);

// =============================================================================
// INPUT VALIDATION LIMITS
// =============================================================================

/// Maximum length of any identifier.
pub const MAX_ID_LENGTH: usize = 128;

/// Maximum length of names, labels and tags.
pub const MAX_LABEL_LENGTH: usize = 256;

/// Maximum length of free-form text (notes, descriptions, suggestions).
pub const MAX_TEXT_LENGTH: usize = 16_384;

/// Maximum number of tags on a model.
pub const MAX_TAGS: usize = 64;

/// Maximum number of features declared by a model.
pub const MAX_FEATURES: usize = 4_096;

/// Maximum number of models in one comparison.
pub const MAX_COMPARED_MODELS: usize = 16;

/// Maximum page size of a listing query.
pub const MAX_PAGE_SIZE: usize = 500;

/// Default page size of a listing query.
pub const DEFAULT_PAGE_SIZE: usize = 50;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accuracy_is_first_declared_metric() {
        assert_eq!(RATE_METRICS[0], "accuracy");
    }

    #[test]
    fn page_limits_are_consistent() {
        assert!(DEFAULT_PAGE_SIZE <= MAX_PAGE_SIZE);
    }
}
