//! # Vault Configuration
//!
//! Runtime tunables. Every field has a default, so an empty TOML table (or
//! no file at all) yields a working configuration. Loading the file is the
//! binary's job; this crate only defines the shape and checks it.

use crate::primitives::{
    DEFAULT_AGGREGATION_TIMEOUT_MS, DEFAULT_CONFLICT_RETRIES, DEFAULT_DIVERGENCE_THRESHOLD,
    DEFAULT_MAX_DIVERGENT_FEATURES, DEFAULT_RETRY_BUDGET,
};
use crate::validation::ValidationPolicy;
use crate::VaultError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VaultConfig {
    /// Importance difference above which a feature is divergent.
    pub divergence_threshold: f64,
    /// Apply rounds before a comparison is marked `failed`.
    pub retry_budget: u32,
    /// Re-read-and-retry attempts per document on a version conflict.
    pub conflict_retries: u32,
    /// Divergent explainability features reported per comparison.
    pub max_divergent_features: usize,
    /// Deadline of one aggregation call. `0` disables the deadline.
    pub aggregation_timeout_ms: u64,
    pub validation: ValidationPolicy,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            divergence_threshold: DEFAULT_DIVERGENCE_THRESHOLD,
            retry_budget: DEFAULT_RETRY_BUDGET,
            conflict_retries: DEFAULT_CONFLICT_RETRIES,
            max_divergent_features: DEFAULT_MAX_DIVERGENT_FEATURES,
            aggregation_timeout_ms: DEFAULT_AGGREGATION_TIMEOUT_MS,
            validation: ValidationPolicy::default(),
        }
    }
}

impl VaultConfig {
    /// Reject settings that would make the store misbehave.
    pub fn check(&self) -> Result<(), VaultError> {
        if !self.divergence_threshold.is_finite() || self.divergence_threshold < 0.0 {
            return Err(VaultError::validation(
                "divergence_threshold",
                "must be a finite, non-negative number",
            ));
        }
        if self.retry_budget == 0 {
            return Err(VaultError::validation("retry_budget", "must be at least 1"));
        }
        if self.conflict_retries == 0 {
            return Err(VaultError::validation("conflict_retries", "must be at least 1"));
        }
        Ok(())
    }

    #[must_use]
    pub fn aggregation_timeout(&self) -> Option<std::time::Duration> {
        (self.aggregation_timeout_ms > 0).then(|| std::time::Duration::from_millis(self.aggregation_timeout_ms))
    }
}
