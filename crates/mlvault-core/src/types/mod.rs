//! # Core Type Definitions
//!
//! This module contains the shared vocabulary of the mlvault store:
//! - Entity identifiers (`UserId`, `ModelId`, `ComparisonId`, `AnalysisId`, `ActivityId`)
//! - Closed enum sets (`ModelStatus`, `ComparisonStatus`, `AnalysisStatus`, ...)
//! - The versioned envelope returned by the store (`Versioned`)
//! - The error taxonomy (`VaultError`)
//!
//! ## Identifier Rules
//!
//! Identifiers are caller-supplied, globally unique strings. They are
//! distinct from any storage-assigned key and are never reused for a
//! different entity kind.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// =============================================================================
// IDENTIFIERS
// =============================================================================

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            /// Create an identifier from any string-like value.
            #[must_use]
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Get the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Identifier of a registered user (e.g. `ryan_001`).
    UserId
);
string_id!(
    /// Identifier of a tracked model (e.g. `model_12345`).
    ModelId
);
string_id!(
    /// Identifier of a comparison session (e.g. `comp_67890`).
    ComparisonId
);
string_id!(
    /// Identifier of an explainability or fairness analysis.
    AnalysisId
);
string_id!(
    /// Identifier of an appended user activity event.
    ActivityId
);

// =============================================================================
// ENTITY KINDS
// =============================================================================

/// The logical collections of the store.
///
/// Each kind is persisted in its own collection; cross references are by
/// identifier only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    User,
    Model,
    Comparison,
    Explainability,
    Fairness,
    Activity,
}

impl EntityKind {
    /// All kinds in collection order.
    pub const ALL: [EntityKind; 6] = [
        EntityKind::User,
        EntityKind::Model,
        EntityKind::Comparison,
        EntityKind::Explainability,
        EntityKind::Fairness,
        EntityKind::Activity,
    ];

    /// Collection name used as the storage key prefix.
    #[must_use]
    pub const fn collection(self) -> &'static str {
        match self {
            EntityKind::User => "users",
            EntityKind::Model => "models",
            EntityKind::Comparison => "comparisons",
            EntityKind::Explainability => "explainability_analyses",
            EntityKind::Fairness => "fairness_analyses",
            EntityKind::Activity => "user_activities",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::User => "user",
            EntityKind::Model => "model",
            EntityKind::Comparison => "comparison",
            EntityKind::Explainability => "explainability analysis",
            EntityKind::Fairness => "fairness analysis",
            EntityKind::Activity => "activity",
        };
        f.write_str(name)
    }
}

// =============================================================================
// CLOSED ENUM SETS
// =============================================================================

macro_rules! closed_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($variant:ident => $label:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            /// Every accepted value, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// The wire label of this value.
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = VaultError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($label => Ok($name::$variant),)+
                    other => Err(VaultError::validation(
                        stringify!($name),
                        format!("`{}` is not one of {:?}", other, [$($label),+]),
                    )),
                }
            }
        }
    };
}

closed_enum!(
    /// Lifecycle of a model. `Deleted` is a soft delete.
    ModelStatus {
        Active => "active",
        Archived => "archived",
        Deleted => "deleted",
    }
);

closed_enum!(
    /// Lifecycle of a comparison document in the staged-commit protocol.
    ComparisonStatus {
        Pending => "pending",
        Completed => "completed",
        Failed => "failed",
    }
);

closed_enum!(
    /// Lifecycle of an explainability or fairness analysis.
    AnalysisStatus {
        Pending => "pending",
        Running => "running",
        Completed => "completed",
        Failed => "failed",
    }
);

closed_enum!(
    /// Severity of detected bias or of a fairness recommendation.
    BiasSeverity {
        Low => "low",
        Moderate => "moderate",
        High => "high",
    }
);

closed_enum!(
    /// Kind of explainability view an analysis was configured for.
    ExplainabilityKind {
        Summary => "summary",
        Force => "force",
        Waterfall => "waterfall",
        Bar => "bar",
    }
);

closed_enum!(
    /// Kind of a user activity event.
    ActivityKind {
        ModelUpload => "model_upload",
        ModelView => "model_view",
        ComparisonCreated => "comparison_created",
        ExplainabilityGenerated => "explainability_generated",
        FairnessGenerated => "fairness_generated",
        Login => "login",
        Other => "other",
    }
);

// =============================================================================
// VERSIONED ENVELOPE
// =============================================================================

/// A stored document together with its optimistic-concurrency version.
///
/// Versions start at 1 and increase by exactly 1 on every successful write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

impl<T> Versioned<T> {
    /// Wrap a value with its version.
    #[must_use]
    pub const fn new(version: u64, value: T) -> Self {
        Self { version, value }
    }

    /// Discard the version.
    pub fn into_inner(self) -> T {
        self.value
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the mlvault store.
///
/// The first six variants are the user-visible taxonomy; `kind()` returns
/// the label surfaced to callers. The store never panics; every failure is
/// a recoverable `Result`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VaultError {
    /// Schema, enum or range violation. Nothing was written.
    #[error("validation failed on `{field}`: {reason}")]
    Validation { field: String, reason: String },

    /// A foreign identifier did not resolve to a live record.
    #[error("unresolved {kind} reference: {id}")]
    Reference { kind: EntityKind, id: String },

    /// Optimistic version mismatch; re-read and retry.
    #[error("version conflict on {kind} {id}: expected {expected}, found {found}")]
    Conflict {
        kind: EntityKind,
        id: String,
        expected: u64,
        found: u64,
    },

    /// A staged commit applied some members but not all of them.
    #[error("comparison {comparison} partially applied: {applied} applied, {pending} pending")]
    PartialApplication {
        comparison: String,
        applied: usize,
        pending: usize,
    },

    /// An aggregation was cancelled or ran past its deadline.
    #[error("aggregation cancelled before completion")]
    Timeout,

    /// A comparison axis could not be computed from the given inputs.
    #[error("insufficient data for {axis}: {reason}")]
    InsufficientData { axis: String, reason: String },

    /// The addressed record does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// An I/O error occurred in the storage backend.
    #[error("I/O error: {0}")]
    IoError(String),
}

impl VaultError {
    /// Build a validation error for `field`.
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Build a reference error for an unresolved identifier.
    pub fn reference(kind: EntityKind, id: impl Into<String>) -> Self {
        Self::Reference {
            kind,
            id: id.into(),
        }
    }

    /// Build a not-found error.
    pub fn not_found(kind: EntityKind, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Build an insufficient-data error for a comparison axis.
    pub fn insufficient(axis: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InsufficientData {
            axis: axis.into(),
            reason: reason.into(),
        }
    }

    /// The taxonomy label reported to users.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "ValidationError",
            Self::Reference { .. } => "ReferenceError",
            Self::Conflict { .. } => "Conflict",
            Self::PartialApplication { .. } => "PartialApplication",
            Self::Timeout => "Timeout",
            Self::InsufficientData { .. } => "InsufficientData",
            Self::NotFound { .. } => "NotFound",
            Self::SerializationError(_) => "SerializationError",
            Self::IoError(_) => "IoError",
        }
    }

    /// Whether retrying the same step with a fresh read may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::IoError(_))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn closed_enum_round_trips_labels() {
        for status in ModelStatus::ALL {
            assert_eq!(status.as_str().parse::<ModelStatus>().unwrap(), *status);
        }
        assert_eq!(
            "comparison_created".parse::<ActivityKind>().unwrap(),
            ActivityKind::ComparisonCreated
        );
    }

    #[test]
    fn closed_enum_rejects_undeclared_value() {
        let err = "purged".parse::<ModelStatus>().unwrap_err();
        assert_eq!(err.kind(), "ValidationError");
        assert!(err.to_string().contains("purged"));
    }

    #[test]
    fn error_kinds_match_taxonomy() {
        assert_eq!(
            VaultError::reference(EntityKind::Model, "m1").kind(),
            "ReferenceError"
        );
        assert_eq!(VaultError::Timeout.kind(), "Timeout");
        assert_eq!(
            VaultError::insufficient("fairness", "no data").kind(),
            "InsufficientData"
        );
    }

    #[test]
    fn only_conflicts_and_io_are_transient() {
        let conflict = VaultError::Conflict {
            kind: EntityKind::Model,
            id: "m1".into(),
            expected: 1,
            found: 2,
        };
        assert!(conflict.is_transient());
        assert!(!VaultError::validation("email", "empty").is_transient());
    }

    #[test]
    fn ids_display_as_raw_strings() {
        let id = ModelId::new("model_12345");
        assert_eq!(id.to_string(), "model_12345");
        assert_eq!(ModelId::from("model_12345"), id);
    }

    #[test]
    fn collections_are_distinct() {
        let mut names: Vec<_> = EntityKind::ALL.iter().map(|k| k.collection()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), EntityKind::ALL.len());
    }
}
