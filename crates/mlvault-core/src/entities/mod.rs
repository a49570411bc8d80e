//! # Entities
//!
//! The six document kinds of the store and the `Document` trait that lets
//! the store validate, index and version them uniformly.
//!
//! Documents reference each other by identifier only. The one exception is
//! the materialized summary blocks on [`Model`], which are derived copies of
//! the latest completed detailed analysis.

mod activity;
mod analysis;
mod comparison;
mod model;
mod user;

pub use activity::{ActivityOrigin, UserActivity};
pub use analysis::{
    DemographicParity, EqualOpportunity, EqualizedOdds, ExplainabilityAnalysis,
    ExplainabilityConfig, FairnessAnalysis, FairnessMetrics, FeatureStats, Recommendation,
    SampleExplanation,
};
pub use comparison::{Comparison, ComparisonStats, FailureRecord, Visualization};
pub(crate) use comparison::split_applied;
pub use model::{
    ArtifactRef, ExplainabilitySummary, FairnessSummary, FeatureSet, Metrics, Model, ParamValue,
    TrackingRef, TrainingParams,
};
pub use user::{User, UserPreferences};

use crate::index::IndexEntry;
use crate::validation::ValidationPolicy;
use crate::{EntityKind, VaultError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;

/// A storable entity.
///
/// The store calls `validate` before every write, `check_transition` before
/// every update, and writes `index_entries` in the same atomic commit as the
/// document itself.
pub trait Document: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static {
    /// Collection this document lives in.
    const KIND: EntityKind;

    /// Globally unique identifier.
    fn id(&self) -> &str;

    fn created_at(&self) -> DateTime<Utc>;

    fn updated_at(&self) -> DateTime<Utc>;

    /// Called by the store when a write bumps the version.
    fn set_updated_at(&mut self, at: DateTime<Utc>);

    /// Check required fields, enum sets and ranges.
    ///
    /// May normalize values in place (rate clamping, tag trimming).
    fn validate(&mut self, policy: &ValidationPolicy) -> Result<(), VaultError>;

    /// Reject updates that break the document's lifecycle rules.
    fn check_transition(_previous: &Self, _next: &Self) -> Result<(), VaultError> {
        Ok(())
    }

    /// Secondary index rows contributed by this document.
    fn index_entries(&self) -> Vec<IndexEntry>;
}
