//! # mlvault-core
//!
//! The consistency-preserving store for mlvault - THE REGISTRY.
//!
//! This crate records trained models, their explainability and fairness
//! analyses and user-requested model comparisons, and serves them for
//! search, comparison and analytics.
//!
//! ## Consistency Model
//!
//! The storage engine only offers single-document atomicity. Everything
//! that spans documents is built from idempotent single-document steps:
//! - Comparisons run as a staged commit (`coordinator`)
//! - Model summary blocks are refreshed under a freshness guard (`analysis`)
//! - Counters are guarded by a per-model ledger of applied comparison ids
//!
//! ## Architectural Constraints
//!
//! - No async, no network dependencies (pure Rust)
//! - Deterministic: ordered collections only, the comparison engine is a
//!   pure function of its inputs
//! - Never panics: every failure is a `VaultError`

// =============================================================================
// MODULES
// =============================================================================

pub mod aggregate;
pub mod analysis;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod entities;
pub mod index;
pub mod ingest;
pub mod primitives;
pub mod query;
pub mod resolver;
pub mod storage;
pub mod store;
pub mod types;
pub mod validation;
pub mod vault;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    ActivityId, ActivityKind, AnalysisId, AnalysisStatus, BiasSeverity, ComparisonId, ComparisonStatus,
    EntityKind, ExplainabilityKind, ModelId, ModelStatus, UserId, VaultError, Versioned,
};

// =============================================================================
// RE-EXPORTS: Entities
// =============================================================================

pub use entities::{
    ActivityOrigin, ArtifactRef, Comparison, ComparisonStats, Document, ExplainabilityAnalysis,
    ExplainabilityConfig, ExplainabilitySummary, FairnessAnalysis, FairnessMetrics, FairnessSummary, FeatureSet,
    FeatureStats, Metrics, Model, ParamValue, TrackingRef, TrainingParams, User, UserActivity, UserPreferences,
};

// =============================================================================
// RE-EXPORTS: Store & Protocols
// =============================================================================

pub use aggregate::{ActivitySummary, Aggregator, CancelToken, ComparisonSummary, KindSummary};
pub use analysis::{AnalysisIngest, AnalysisOutcome};
pub use config::VaultConfig;
pub use coordinator::{ComparisonOutcome, ComparisonRequest, ConsistencyCoordinator};
pub use engine::{Axis, CompareOptions, ComparisonEngine, ComparisonResult};
pub use ingest::{Ingest, IngestOutcome, ModelSubmission};
pub use query::{MetricRange, ModelFilter, ModelSort, Page, Query};
pub use resolver::ReferenceResolver;
pub use storage::{MemoryBackend, RedbBackend, StorageBackend};
pub use store::{DocumentBackend, EntityStore, RawDocument, Step, UpdateOutcome, WriteOp};
pub use validation::{RatePolicy, ValidationPolicy};
pub use vault::{Vault, VaultStats};
