use super::Document;
use crate::engine::ComparisonResult;
use crate::index::{IndexEntry, IndexKey, compound_key, time_key};
use crate::primitives::MAX_COMPARED_MODELS;
use crate::validation::{self, ValidationPolicy};
use crate::{ComparisonId, ComparisonStatus, EntityKind, ModelId, UserId, VaultError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Bookkeeping about how a comparison was computed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ComparisonStats {
    pub total_metrics_compared: usize,
    pub models_count: usize,
    pub computation_time_seconds: f64,
}

/// Opaque visualization reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Visualization {
    pub name: String,
    pub uri: String,
}

/// Last error that left the comparison `failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Taxonomy label, see [`VaultError::kind`].
    pub kind: String,
    pub detail: String,
    pub at: DateTime<Utc>,
}

impl FailureRecord {
    #[must_use]
    pub fn from_error(error: &VaultError, at: DateTime<Utc>) -> Self {
        Self {
            kind: error.kind().to_string(),
            detail: error.to_string(),
            at,
        }
    }
}

/// A comparison of two or more models.
///
/// Staged as `pending`, then `completed` or `failed` by the coordinator.
/// Once `completed`, only sharing, `view_count` and `updated_at` change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub comparison_id: ComparisonId,
    pub user_id: UserId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// In request order.
    pub model_ids: Vec<ModelId>,
    #[serde(default)]
    pub requested_metric: Option<String>,
    #[serde(default)]
    pub result: Option<ComparisonResult>,
    #[serde(default)]
    pub stats: ComparisonStats,
    #[serde(default)]
    pub visualizations: Vec<Visualization>,
    #[serde(default)]
    pub user_notes: String,
    pub status: ComparisonStatus,
    #[serde(default)]
    pub failure: Option<FailureRecord>,
    #[serde(default)]
    pub shared_with: BTreeSet<UserId>,
    #[serde(default)]
    pub view_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Comparison {
    /// A staged comparison with no result yet.
    #[must_use]
    pub fn pending(
        comparison_id: ComparisonId,
        user_id: UserId,
        name: impl Into<String>,
        model_ids: Vec<ModelId>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            comparison_id,
            user_id,
            name: name.into(),
            description: String::new(),
            model_ids,
            requested_metric: None,
            result: None,
            stats: ComparisonStats::default(),
            visualizations: Vec::new(),
            user_notes: String::new(),
            status: ComparisonStatus::Pending,
            failure: None,
            shared_with: BTreeSet::new(),
            view_count: 0,
            created_at: at,
            updated_at: at,
        }
    }

    #[must_use]
    pub fn is_shared(&self) -> bool {
        !self.shared_with.is_empty()
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == ComparisonStatus::Completed
    }

    #[must_use]
    pub fn references(&self, model: &ModelId) -> bool {
        self.model_ids.contains(model)
    }
}

/// The parts of a comparison frozen once it is completed.
fn frozen(c: &Comparison) -> Comparison {
    Comparison {
        shared_with: BTreeSet::new(),
        view_count: 0,
        updated_at: c.created_at,
        ..c.clone()
    }
}

impl Document for Comparison {
    const KIND: EntityKind = EntityKind::Comparison;

    fn id(&self) -> &str {
        self.comparison_id.as_str()
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn set_updated_at(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }

    fn validate(&mut self, _policy: &ValidationPolicy) -> Result<(), VaultError> {
        validation::check_id("comparison_id", self.comparison_id.as_str())?;
        validation::check_id("user_id", self.user_id.as_str())?;
        validation::check_label("name", &self.name)?;
        validation::check_text("description", &self.description)?;
        validation::check_text("user_notes", &self.user_notes)?;

        if self.model_ids.len() < 2 {
            return Err(VaultError::validation(
                "model_ids",
                "a comparison needs at least 2 models",
            ));
        }
        if self.model_ids.len() > MAX_COMPARED_MODELS {
            return Err(VaultError::validation(
                "model_ids",
                format!("more than {} models", MAX_COMPARED_MODELS),
            ));
        }
        let mut seen = BTreeSet::new();
        for id in &self.model_ids {
            validation::check_id("model_ids", id.as_str())?;
            if !seen.insert(id) {
                return Err(VaultError::validation(
                    "model_ids",
                    format!("model {id} listed twice"),
                ));
            }
        }
        if let Some(metric) = &self.requested_metric {
            validation::check_label("requested_metric", metric)?;
        }
        for id in &self.shared_with {
            validation::check_id("shared_with", id.as_str())?;
        }
        for vis in &self.visualizations {
            validation::check_label("visualizations.name", &vis.name)?;
            validation::check_text("visualizations.uri", &vis.uri)?;
        }
        validation::check_non_negative(
            "stats.computation_time_seconds",
            self.stats.computation_time_seconds,
        )?;

        match self.status {
            ComparisonStatus::Completed if self.result.is_none() => {
                return Err(VaultError::validation(
                    "result",
                    "a completed comparison must carry its result",
                ));
            }
            ComparisonStatus::Failed if self.failure.is_none() => {
                return Err(VaultError::validation(
                    "failure",
                    "a failed comparison must record its last error",
                ));
            }
            _ => {}
        }
        validation::check_timestamps(self.created_at, self.updated_at)
    }

    fn check_transition(previous: &Self, next: &Self) -> Result<(), VaultError> {
        validation::check_unchanged("user_id", &previous.user_id, &next.user_id)?;
        validation::check_unchanged("model_ids", &previous.model_ids, &next.model_ids)?;
        if next.view_count < previous.view_count {
            return Err(VaultError::validation("view_count", "counters only grow"));
        }
        if previous.is_completed() && frozen(previous) != frozen(next) {
            return Err(VaultError::validation(
                "status",
                "a completed comparison only accepts sharing and view changes",
            ));
        }
        Ok(())
    }

    fn index_entries(&self) -> Vec<IndexEntry> {
        let created = time_key(self.created_at);
        let mut entries = vec![
            IndexEntry::new(
                IndexKey::ComparisonUser,
                compound_key(&[self.user_id.as_str(), &created]),
            ),
            IndexEntry::new(IndexKey::ComparisonStatus, self.status.as_str()),
        ];
        entries.extend(self.model_ids.iter().map(|id| {
            IndexEntry::new(
                IndexKey::ComparisonModel,
                compound_key(&[id.as_str(), &created]),
            )
        }));
        entries
    }
}

/// Split the members into (applied, pending) in request order.
#[must_use]
pub(crate) fn split_applied(
    comparison: &Comparison,
    applied: &BTreeSet<ModelId>,
) -> (Vec<ModelId>, Vec<ModelId>) {
    comparison
        .model_ids
        .iter()
        .cloned()
        .partition(|id| applied.contains(id))
}
