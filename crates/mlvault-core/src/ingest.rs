//! # Ingest
//!
//! Producer contracts for users, models, sharing and activity.
//!
//! - Training ingestion is keyed by tracking run id: resubmitting a run
//!   updates the training payload of the existing model and preserves its
//!   identity, counters, summaries, status and `created_at`.
//! - Lifecycle changes (archive, soft delete, purge) and counters go through
//!   conditional updates that re-read on conflict.
//! - Activity logging is fire-and-forget. A failed append is logged and
//!   dropped; it never fails the caller's operation.

use crate::config::VaultConfig;
use crate::entities::{
    ActivityOrigin, ArtifactRef, Comparison, FeatureSet, Metrics, Model, TrackingRef, TrainingParams, User,
    UserActivity, UserPreferences,
};
use crate::index::{IndexKey, compound_prefix};
use crate::resolver::ReferenceResolver;
use crate::store::{DocumentBackend, EntityStore, Step};
use crate::{ActivityId, ActivityKind, ComparisonId, EntityKind, ModelId, ModelStatus, UserId, Versioned, VaultError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// SUBMISSIONS
// =============================================================================

/// Training payload delivered by the ingestion job.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSubmission {
    /// Id to use when the run is new. Generated if absent.
    pub model_id: Option<ModelId>,
    pub user_id: UserId,
    pub tracking: TrackingRef,
    pub model_name: Option<String>,
    pub model_kind: String,
    pub model_version: String,
    pub framework: Option<String>,
    pub dataset_name: String,
    pub trained_at: Option<DateTime<Utc>>,
    pub training_duration_seconds: Option<f64>,
    pub inference_latency_ms: Option<f64>,
    pub model_size_bytes: Option<u64>,
    pub parameters: TrainingParams,
    pub metrics: Metrics,
    pub features: FeatureSet,
    pub artifacts: Vec<ArtifactRef>,
    /// Added to the model's tags; existing tags are kept.
    pub tags: BTreeSet<String>,
    pub notes: Option<String>,
}

impl ModelSubmission {
    fn apply_to(&self, model: &mut Model) {
        model.tracking = self.tracking.clone();
        if let Some(name) = &self.model_name {
            model.model_name = name.clone();
        }
        model.model_kind = self.model_kind.clone();
        model.model_version = self.model_version.clone();
        if let Some(framework) = &self.framework {
            model.framework = framework.clone();
        }
        model.dataset_name = self.dataset_name.clone();
        model.trained_at = self.trained_at;
        model.training_duration_seconds = self.training_duration_seconds;
        model.inference_latency_ms = self.inference_latency_ms;
        model.model_size_bytes = self.model_size_bytes;
        model.parameters = self.parameters.clone();
        model.metrics = self.metrics.clone();
        model.features = self.features.clone();
        model.artifacts = self.artifacts.clone();
        model.tags.extend(self.tags.iter().cloned());
        if let Some(notes) = &self.notes {
            model.notes = notes.clone();
        }
    }
}

/// Result of [`Ingest::ingest_model`].
#[derive(Debug, Clone, PartialEq)]
pub struct IngestOutcome {
    pub model: Versioned<Model>,
    /// `false` when an existing run was updated.
    pub created: bool,
}

// =============================================================================
// INGEST
// =============================================================================

pub struct Ingest<'a, B> {
    store: &'a EntityStore<B>,
    config: &'a VaultConfig,
}

impl<'a, B: DocumentBackend> Ingest<'a, B> {
    pub fn new(store: &'a EntityStore<B>, config: &'a VaultConfig) -> Self {
        Self { store, config }
    }

    fn resolver(&self) -> ReferenceResolver<'a, B> {
        ReferenceResolver::new(self.store)
    }

    // -------------------------------------------------------------------------
    // Users
    // -------------------------------------------------------------------------

    /// Create an account. The email must not be registered yet.
    pub fn register_user(
        &self,
        user_id: impl Into<UserId>,
        email: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<Versioned<User>, VaultError> {
        let user = self.store.put(User::new(user_id, email, name, Utc::now()))?;
        tracing::info!(user = %user.value.user_id, "user registered");
        Ok(user)
    }

    /// Stamp `last_login` and log a login event.
    pub fn record_login(&self, user_id: &UserId, origin: ActivityOrigin) -> Result<Versioned<User>, VaultError> {
        let now = Utc::now();
        let user = self
            .store
            .update_with_retry::<User, _>(user_id.as_str(), self.config.conflict_retries, |u| {
                u.last_login = Some(now.max(u.created_at));
                Ok(Step::Apply)
            })?
            .into_versioned();
        self.log_activity_from(user_id, ActivityKind::Login, BTreeMap::new(), origin);
        Ok(user)
    }

    pub fn update_preferences(
        &self,
        user_id: &UserId,
        preferences: UserPreferences,
    ) -> Result<Versioned<User>, VaultError> {
        let outcome = self
            .store
            .update_with_retry::<User, _>(user_id.as_str(), self.config.conflict_retries, |u| {
                if u.preferences == preferences {
                    return Ok(Step::Skip);
                }
                u.preferences = preferences.clone();
                Ok(Step::Apply)
            })?;
        Ok(outcome.into_versioned())
    }

    // -------------------------------------------------------------------------
    // Models
    // -------------------------------------------------------------------------

    /// Create or update the model of a tracking run.
    ///
    /// # Errors
    ///
    /// - `Reference` if the owner does not resolve
    /// - `Validation` if the run belongs to another user or another model
    ///   id, or if the payload is invalid
    /// - `Reference` if the run's model was soft-deleted
    pub fn ingest_model(&self, submission: ModelSubmission) -> Result<IngestOutcome, VaultError> {
        self.resolver().resolve_user(&submission.user_id)?;
        let run_id = submission.tracking.run_id.clone();

        // An insert can lose the race against a concurrent submission of the
        // same run; the second pass then takes the update path.
        for _ in 0..2 {
            if let Some(existing) = self.find_model_by_run(&run_id)? {
                return self.update_run(existing, &submission);
            }
            match self.create_model(&submission) {
                Ok(model) => {
                    self.log_activity(
                        &model.value.user_id,
                        ActivityKind::ModelUpload,
                        BTreeMap::from([("model_id".to_string(), model.value.model_id.to_string())]),
                    );
                    return Ok(IngestOutcome { model, created: true });
                }
                Err(VaultError::Validation { field, .. }) if field == IndexKey::ModelRun.name() => {
                    tracing::debug!(run = %run_id, "run registered concurrently, updating instead");
                }
                Err(e) => return Err(e),
            }
        }
        Err(VaultError::validation(
            IndexKey::ModelRun.name(),
            format!("run {run_id} is being registered concurrently"),
        ))
    }

    fn find_model_by_run(&self, run_id: &str) -> Result<Option<Versioned<Model>>, VaultError> {
        Ok(self
            .store
            .find_by_index::<Model>(IndexKey::ModelRun, run_id)?
            .into_iter()
            .next())
    }

    fn create_model(&self, submission: &ModelSubmission) -> Result<Versioned<Model>, VaultError> {
        let model_id = submission
            .model_id
            .clone()
            .unwrap_or_else(|| ModelId::new(format!("model_{}", uuid::Uuid::new_v4().simple())));
        let mut model = Model::new(
            model_id,
            submission.user_id.clone(),
            submission.tracking.clone(),
            submission.model_kind.clone(),
            Utc::now(),
        );
        submission.apply_to(&mut model);
        let model = self.store.put(model)?;
        tracing::info!(model = %model.value.model_id, run = %model.value.tracking.run_id, "model registered");
        Ok(model)
    }

    fn update_run(&self, existing: Versioned<Model>, submission: &ModelSubmission) -> Result<IngestOutcome, VaultError> {
        let id = existing.value.model_id.clone();
        if existing.value.user_id != submission.user_id {
            return Err(VaultError::validation(
                "user_id",
                format!("run {} belongs to another user", submission.tracking.run_id),
            ));
        }
        if let Some(requested) = &submission.model_id {
            if *requested != id {
                return Err(VaultError::validation(
                    "model_id",
                    format!("run {} is already registered as {id}", submission.tracking.run_id),
                ));
            }
        }
        let model = self
            .store
            .update_with_retry::<Model, _>(id.as_str(), self.config.conflict_retries, |m| {
                if m.is_deleted() {
                    return Err(VaultError::reference(EntityKind::Model, id.as_str()));
                }
                submission.apply_to(m);
                Ok(Step::Apply)
            })?
            .into_versioned();
        tracing::info!(model = %id, version = model.version, "model payload updated");
        Ok(IngestOutcome { model, created: false })
    }

    pub fn archive_model(&self, model_id: &ModelId) -> Result<Versioned<Model>, VaultError> {
        self.set_status(model_id, ModelStatus::Archived)
    }

    /// Mark a model deleted. It stops resolving as a reference but keeps
    /// its counters and index rows.
    pub fn soft_delete_model(&self, model_id: &ModelId) -> Result<Versioned<Model>, VaultError> {
        self.set_status(model_id, ModelStatus::Deleted)
    }

    fn set_status(&self, model_id: &ModelId, status: ModelStatus) -> Result<Versioned<Model>, VaultError> {
        let outcome = self
            .store
            .update_with_retry::<Model, _>(model_id.as_str(), self.config.conflict_retries, |m| {
                if m.status == status {
                    return Ok(Step::Skip);
                }
                if m.is_deleted() {
                    return Err(VaultError::validation("status", "a deleted model cannot change status"));
                }
                m.status = status;
                Ok(Step::Apply)
            })?;
        if outcome.is_applied() {
            tracing::info!(model = %model_id, %status, "model status changed");
        }
        Ok(outcome.into_versioned())
    }

    /// Remove a soft-deleted model for good.
    ///
    /// # Errors
    ///
    /// `Validation` if the model is not soft-deleted yet or any comparison
    /// still references it.
    pub fn purge_model(&self, model_id: &ModelId) -> Result<(), VaultError> {
        let model = self.store.require::<Model>(model_id.as_str())?;
        if !model.value.is_deleted() {
            return Err(VaultError::validation("status", "only deleted models can be purged"));
        }
        let referencing = self
            .store
            .find_by_prefix::<Comparison>(IndexKey::ComparisonModel, &compound_prefix(&[model_id.as_str()]))?;
        if !referencing.is_empty() {
            return Err(VaultError::validation(
                "model_id",
                format!("referenced by {} comparison(s)", referencing.len()),
            ));
        }
        self.store.delete::<Model>(model_id.as_str(), model.version)?;
        tracing::info!(model = %model_id, "model purged");
        Ok(())
    }

    /// Count a view of a live model and log it for the viewer.
    pub fn record_model_view(&self, model_id: &ModelId, viewer: &UserId) -> Result<Versioned<Model>, VaultError> {
        self.resolver().resolve_model(model_id)?;
        let model = self
            .store
            .update_with_retry::<Model, _>(model_id.as_str(), self.config.conflict_retries, |m| {
                m.view_count = m.view_count.saturating_add(1);
                Ok(Step::Apply)
            })?
            .into_versioned();
        self.log_activity(
            viewer,
            ActivityKind::ModelView,
            BTreeMap::from([("model_id".to_string(), model_id.to_string())]),
        );
        Ok(model)
    }

    /// Replace the tag set. Tags are trimmed on write.
    pub fn set_tags(&self, model_id: &ModelId, tags: BTreeSet<String>) -> Result<Versioned<Model>, VaultError> {
        let outcome = self
            .store
            .update_with_retry::<Model, _>(model_id.as_str(), self.config.conflict_retries, |m| {
                if m.tags == tags {
                    return Ok(Step::Skip);
                }
                m.tags = tags.clone();
                Ok(Step::Apply)
            })?;
        Ok(outcome.into_versioned())
    }

    // -------------------------------------------------------------------------
    // Comparisons
    // -------------------------------------------------------------------------

    /// Share a comparison with another user. Allowed after completion.
    pub fn share_comparison(&self, comparison_id: &ComparisonId, with: &UserId) -> Result<Versioned<Comparison>, VaultError> {
        self.resolver().resolve_user(with)?;
        let outcome = self
            .store
            .update_with_retry::<Comparison, _>(comparison_id.as_str(), self.config.conflict_retries, |c| {
                Ok(if c.shared_with.insert(with.clone()) {
                    Step::Apply
                } else {
                    Step::Skip
                })
            })?;
        Ok(outcome.into_versioned())
    }

    pub fn unshare_comparison(
        &self,
        comparison_id: &ComparisonId,
        with: &UserId,
    ) -> Result<Versioned<Comparison>, VaultError> {
        let outcome = self
            .store
            .update_with_retry::<Comparison, _>(comparison_id.as_str(), self.config.conflict_retries, |c| {
                Ok(if c.shared_with.remove(with) {
                    Step::Apply
                } else {
                    Step::Skip
                })
            })?;
        Ok(outcome.into_versioned())
    }

    pub fn record_comparison_view(&self, comparison_id: &ComparisonId) -> Result<Versioned<Comparison>, VaultError> {
        let outcome = self
            .store
            .update_with_retry::<Comparison, _>(comparison_id.as_str(), self.config.conflict_retries, |c| {
                c.view_count = c.view_count.saturating_add(1);
                Ok(Step::Apply)
            })?;
        Ok(outcome.into_versioned())
    }

    // -------------------------------------------------------------------------
    // Activity
    // -------------------------------------------------------------------------

    /// Append an activity event. Returns `None` if the append failed; the
    /// failure is logged and never surfaced.
    pub fn log_activity(
        &self,
        user_id: &UserId,
        kind: ActivityKind,
        details: BTreeMap<String, String>,
    ) -> Option<ActivityId> {
        self.log_activity_from(user_id, kind, details, ActivityOrigin::default())
    }

    /// [`Self::log_activity`] with origin metadata.
    pub fn log_activity_from(
        &self,
        user_id: &UserId,
        kind: ActivityKind,
        details: BTreeMap<String, String>,
        origin: ActivityOrigin,
    ) -> Option<ActivityId> {
        let result = self.resolver().resolve_user(user_id).and_then(|_| {
            let id = ActivityId::new(format!("act_{}", uuid::Uuid::new_v4().simple()));
            let mut activity = UserActivity::new(id, user_id.clone(), kind, Utc::now());
            activity.details = details;
            activity.origin = origin;
            self.store.put(activity)
        });
        match result {
            Ok(stored) => Some(stored.value.activity_id),
            Err(e) => {
                tracing::warn!(
                    user = %user_id,
                    %kind,
                    collection = EntityKind::Activity.collection(),
                    error = %e,
                    "activity dropped"
                );
                None
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
