//! # Consistency Coordinator
//!
//! Multi-entity operations over a store that only offers single-document
//! atomicity.
//!
//! A comparison touches the comparison document and the counter of every
//! model it references. The coordinator runs it as a staged commit:
//!
//! 1. **Stage**: insert the comparison as `pending`
//! 2. **Validate**: resolve the user, the share list and every model; on
//!    failure the staged document is deleted and nothing else was written.
//!    Resumes of an existing document re-resolve the user and share list
//!    before they compute or apply anything
//! 3. **Compute**: run the engine on a point-in-time read of the models and
//!    record the result on the staged document
//! 4. **Apply**: per model, add the comparison id to `applied_comparisons`
//!    and bump `comparison_count`, skipped if the id is already there
//! 5. **Commit**: re-resolve the models, then mark the comparison
//!    `completed`
//!
//! Apply is idempotent per (model, comparison) pair, so any step can be
//! re-run after a crash or a lost race. Members that fail are retried for
//! a bounded number of rounds; after that the comparison is marked `failed`
//! and already-applied increments stay in place.

use crate::config::VaultConfig;
use crate::engine::{CompareOptions, ComparisonEngine};
use crate::entities::{Comparison, ComparisonStats, FailureRecord, Model, Visualization, split_applied};
use crate::resolver::ReferenceResolver;
use crate::store::{DocumentBackend, EntityStore, Step};
use crate::validation;
use crate::{ComparisonId, ComparisonStatus, EntityKind, ModelId, UserId, Versioned, VaultError};
use chrono::Utc;
use std::collections::BTreeSet;
use std::time::Instant;

// =============================================================================
// REQUEST / OUTCOME
// =============================================================================

/// A request to compare two or more models.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ComparisonRequest {
    pub user_id: UserId,
    /// In request order. Must name at least two distinct models.
    pub model_ids: Vec<ModelId>,
    pub name: Option<String>,
    pub description: String,
    /// Metric that decides the winner. `None` means the first common one.
    pub metric: Option<String>,
    /// Makes resubmission of the same request side-effect free.
    pub idempotency_key: Option<String>,
    pub shared_with: BTreeSet<UserId>,
    pub user_notes: String,
    pub visualizations: Vec<Visualization>,
}

impl ComparisonRequest {
    #[must_use]
    pub fn new(user_id: impl Into<UserId>, model_ids: Vec<ModelId>) -> Self {
        Self {
            user_id: user_id.into(),
            model_ids,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_metric(mut self, metric: impl Into<String>) -> Self {
        self.metric = Some(metric.into());
        self
    }

    #[must_use]
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    fn comparison_id(&self) -> Result<ComparisonId, VaultError> {
        match &self.idempotency_key {
            Some(key) => {
                let id = format!("comp_{key}");
                validation::check_id("idempotency_key", &id)?;
                Ok(ComparisonId::new(id))
            }
            None => Ok(ComparisonId::new(format!("comp_{}", uuid::Uuid::new_v4().simple()))),
        }
    }

    fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| {
            self.model_ids
                .iter()
                .map(ModelId::as_str)
                .collect::<Vec<_>>()
                .join(" vs ")
        })
    }
}

/// What a comparison call did.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonOutcome {
    pub comparison: Versioned<Comparison>,
    /// The call found an existing document for its id.
    pub replayed: bool,
    /// Models whose counter was incremented by this call.
    pub newly_applied: Vec<ModelId>,
}

enum Staged {
    Fresh(Versioned<Comparison>),
    Existing(Versioned<Comparison>),
}

// =============================================================================
// COORDINATOR
// =============================================================================

/// Runs the staged-commit protocol against one store.
pub struct ConsistencyCoordinator<'a, B> {
    store: &'a EntityStore<B>,
    config: &'a VaultConfig,
}

impl<'a, B: DocumentBackend> ConsistencyCoordinator<'a, B> {
    pub fn new(store: &'a EntityStore<B>, config: &'a VaultConfig) -> Self {
        Self { store, config }
    }

    fn resolver(&self) -> ReferenceResolver<'a, B> {
        ReferenceResolver::new(self.store)
    }

    /// Create a comparison, or resume/replay the one named by the request's
    /// idempotency key.
    ///
    /// # Errors
    ///
    /// - `Validation` for a malformed request or a reused idempotency key
    /// - `Reference` if a user or model does not resolve; nothing is left
    ///   behind for a fresh request
    /// - `PartialApplication` (or the last member error) when the retry
    ///   budget runs out; the comparison is then stored as `failed`
    pub fn create_comparison(&self, request: ComparisonRequest) -> Result<ComparisonOutcome, VaultError> {
        let id = request.comparison_id()?;
        tracing::debug!(comparison = %id, models = request.model_ids.len(), "stage");

        let staged = match self.stage(&request, &id)? {
            Staged::Fresh(staged) => staged,
            Staged::Existing(existing) => {
                if existing.value.user_id != request.user_id || existing.value.model_ids != request.model_ids {
                    return Err(VaultError::validation(
                        "idempotency_key",
                        format!("already used by comparison {id} with different members"),
                    ));
                }
                if existing.value.is_completed() {
                    tracing::debug!(comparison = %id, "replay of completed comparison");
                    return Ok(ComparisonOutcome {
                        comparison: existing,
                        replayed: true,
                        newly_applied: Vec::new(),
                    });
                }
                tracing::info!(comparison = %id, status = %existing.value.status, "resuming comparison");
                return self.finish(existing, true);
            }
        };

        tracing::debug!(comparison = %id, "validate");
        let models = match self.validate(&staged.value) {
            Ok(models) => models,
            Err(e) => return Err(self.abandon(&id, e)),
        };

        tracing::debug!(comparison = %id, "compute");
        let staged = match self.record_result(&staged, &models) {
            Ok(computed) => computed,
            Err(e) => return Err(self.abandon(&id, e)),
        };

        self.finish(staged, false)
    }

    /// Re-run Apply and Commit for a `failed` or stale `pending` comparison.
    pub fn retry_comparison(&self, id: &ComparisonId) -> Result<ComparisonOutcome, VaultError> {
        let existing = self.store.require::<Comparison>(id.as_str())?;
        if existing.value.is_completed() {
            return Ok(ComparisonOutcome {
                comparison: existing,
                replayed: true,
                newly_applied: Vec::new(),
            });
        }
        tracing::info!(comparison = %id, status = %existing.value.status, "retrying comparison");
        self.finish(existing, true)
    }

    fn stage(&self, request: &ComparisonRequest, id: &ComparisonId) -> Result<Staged, VaultError> {
        let mut pending = Comparison::pending(
            id.clone(),
            request.user_id.clone(),
            request.display_name(),
            request.model_ids.clone(),
            Utc::now(),
        );
        pending.description = request.description.clone();
        pending.requested_metric = request.metric.clone();
        pending.shared_with = request.shared_with.clone();
        pending.user_notes = request.user_notes.clone();
        pending.visualizations = request.visualizations.clone();

        match self.store.put(pending) {
            Ok(staged) => Ok(Staged::Fresh(staged)),
            Err(VaultError::Conflict { .. }) => Ok(Staged::Existing(self.store.require(id.as_str())?)),
            Err(e) => Err(e),
        }
    }

    fn validate(&self, comparison: &Comparison) -> Result<Vec<Versioned<Model>>, VaultError> {
        self.resolve_parties(comparison)?;
        self.resolver().resolve_models(&comparison.model_ids)
    }

    /// The requesting user and every share target.
    fn resolve_parties(&self, comparison: &Comparison) -> Result<(), VaultError> {
        let resolver = self.resolver();
        resolver.resolve_user(&comparison.user_id)?;
        for user in &comparison.shared_with {
            resolver.resolve_user(user)?;
        }
        Ok(())
    }

    fn record_result(
        &self,
        staged: &Versioned<Comparison>,
        models: &[Versioned<Model>],
    ) -> Result<Versioned<Comparison>, VaultError> {
        let snapshot: Vec<Model> = models.iter().map(|m| m.value.clone()).collect();
        let options = CompareOptions {
            metric: staged.value.requested_metric.clone(),
            divergence_threshold: self.config.divergence_threshold,
            max_divergent_features: self.config.max_divergent_features,
        };
        let started = Instant::now();
        let result = ComparisonEngine::compare(&snapshot, &options)?;
        let elapsed = started.elapsed().as_secs_f64();

        for omitted in &result.omitted {
            tracing::debug!(
                comparison = %staged.value.comparison_id,
                axis = %omitted.axis,
                reason = %omitted.reason,
                "axis omitted"
            );
        }

        // A concurrent resume of the same key may have stored its result first.
        let stored = self
            .store
            .update_with_retry::<Comparison, _>(
                staged.value.comparison_id.as_str(),
                self.config.conflict_retries,
                |c| {
                    if c.result.is_some() {
                        return Ok(Step::Skip);
                    }
                    c.stats = ComparisonStats {
                        total_metrics_compared: result.total_metrics_compared(),
                        models_count: result.model_ids.len(),
                        computation_time_seconds: elapsed,
                    };
                    c.result = Some(result.clone());
                    Ok(Step::Apply)
                },
            )?
            .into_versioned();
        Ok(stored)
    }

    /// Drop a comparison that failed before any increment, or mark it
    /// `failed` if a member already counts it. Returns the error to report.
    fn abandon(&self, id: &ComparisonId, error: VaultError) -> VaultError {
        match self.discard(id) {
            Ok(true) => error,
            Ok(false) => self.mark_failed(id, error),
            Err(e) => {
                tracing::error!(comparison = %id, cause = %error, error = %e, "could not discard staged comparison");
                e
            }
        }
    }

    /// Delete the staged document at its current version. `Ok(false)` if it
    /// has to stay because it completed or some model has applied it.
    fn discard(&self, id: &ComparisonId) -> Result<bool, VaultError> {
        let mut last_conflict = None;
        for _ in 0..self.config.conflict_retries.max(1) {
            let Some(current) = self.store.get::<Comparison>(id.as_str())? else {
                return Ok(true);
            };
            if current.value.is_completed() || self.any_applied(&current.value)? {
                return Ok(false);
            }
            match self.store.delete::<Comparison>(id.as_str(), current.version) {
                Ok(()) => {
                    tracing::debug!(comparison = %id, "staged comparison discarded");
                    return Ok(true);
                }
                Err(e @ VaultError::Conflict { .. }) => {
                    tracing::warn!(comparison = %id, error = %e, "discard lost a race, re-reading");
                    last_conflict = Some(e);
                }
                Err(VaultError::NotFound { .. }) => return Ok(true),
                Err(e) => return Err(e),
            }
        }
        Err(last_conflict.unwrap_or_else(|| VaultError::not_found(EntityKind::Comparison, id.as_str())))
    }

    fn any_applied(&self, comparison: &Comparison) -> Result<bool, VaultError> {
        for model in &comparison.model_ids {
            if let Some(m) = self.store.get::<Model>(model.as_str())? {
                if m.value.has_applied(&comparison.comparison_id) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Add the comparison to one model's ledger. `Ok(true)` if this call
    /// did the increment.
    fn apply_member(&self, comparison: &ComparisonId, model: &ModelId) -> Result<bool, VaultError> {
        let outcome = self
            .store
            .update_with_retry::<Model, _>(model.as_str(), self.config.conflict_retries, |m| {
                if m.has_applied(comparison) {
                    return Ok(Step::Skip);
                }
                if m.is_deleted() {
                    return Err(VaultError::reference(EntityKind::Model, model.as_str()));
                }
                m.apply_comparison(comparison);
                Ok(Step::Apply)
            });
        match outcome {
            Ok(outcome) => Ok(outcome.is_applied()),
            Err(VaultError::NotFound { kind, id }) => Err(VaultError::Reference { kind, id }),
            Err(e) => Err(e),
        }
    }

    fn finish(&self, comparison: Versioned<Comparison>, replayed: bool) -> Result<ComparisonOutcome, VaultError> {
        let id = comparison.value.comparison_id.clone();

        if let Err(e) = self.resolve_parties(&comparison.value) {
            return Err(self.abandon(&id, e));
        }

        let comparison = if comparison.value.result.is_none() {
            let models = match self.resolver().resolve_models(&comparison.value.model_ids) {
                Ok(models) => models,
                Err(e) => return Err(self.abandon(&id, e)),
            };
            match self.record_result(&comparison, &models) {
                Ok(computed) => computed,
                Err(e) => return Err(self.mark_failed(&id, e)),
            }
        } else {
            comparison
        };

        tracing::debug!(comparison = %id, "apply");
        let mut applied = BTreeSet::new();
        let mut newly_applied = Vec::new();
        let mut remaining: Vec<ModelId> = comparison.value.model_ids.clone();
        let mut last_error = None;

        for round in 1..=self.config.retry_budget.max(1) {
            let mut failed = Vec::new();
            for model in remaining {
                match self.apply_member(&id, &model) {
                    Ok(did_increment) => {
                        if did_increment {
                            newly_applied.push(model.clone());
                        }
                        applied.insert(model);
                    }
                    Err(e) => {
                        tracing::warn!(comparison = %id, model = %model, round, error = %e, "apply failed");
                        failed.push(model);
                        last_error = Some(e);
                    }
                }
            }
            remaining = failed;
            let transient = last_error.as_ref().is_none_or(VaultError::is_transient);
            if remaining.is_empty() || !transient {
                break;
            }
        }

        if !remaining.is_empty() {
            let (done, pending) = split_applied(&comparison.value, &applied);
            let error = match last_error {
                Some(e @ VaultError::Reference { .. }) => e,
                _ => VaultError::PartialApplication {
                    comparison: id.to_string(),
                    applied: done.len(),
                    pending: pending.len(),
                },
            };
            return Err(self.mark_failed(&id, error));
        }

        tracing::debug!(comparison = %id, "commit");
        if let Err(e) = self.resolver().resolve_models(&comparison.value.model_ids) {
            return Err(self.mark_failed(&id, e));
        }
        let committed = self
            .store
            .update_with_retry::<Comparison, _>(id.as_str(), self.config.conflict_retries, |c| {
                if c.is_completed() {
                    return Ok(Step::Skip);
                }
                c.status = ComparisonStatus::Completed;
                c.failure = None;
                Ok(Step::Apply)
            })?
            .into_versioned();

        tracing::info!(
            comparison = %id,
            newly_applied = newly_applied.len(),
            replayed,
            "comparison completed"
        );
        Ok(ComparisonOutcome {
            comparison: committed,
            replayed,
            newly_applied,
        })
    }

    /// Store the comparison as `failed` with `error`, then hand the error
    /// back. Applied increments are left in place.
    fn mark_failed(&self, id: &ComparisonId, error: VaultError) -> VaultError {
        let marked = self
            .store
            .update_with_retry::<Comparison, _>(id.as_str(), self.config.conflict_retries, |c| {
                if c.is_completed() {
                    return Ok(Step::Skip);
                }
                c.status = ComparisonStatus::Failed;
                c.failure = Some(FailureRecord::from_error(&error, Utc::now()));
                Ok(Step::Apply)
            });
        match marked {
            Ok(_) => tracing::warn!(comparison = %id, kind = error.kind(), error = %error, "comparison failed"),
            Err(e) => tracing::warn!(comparison = %id, error = %e, "could not mark comparison failed"),
        }
        error
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::entities::{TrackingRef, User};
    use crate::storage::MemoryBackend;
    use crate::ModelStatus;

    fn seeded() -> EntityStore<MemoryBackend> {
        let store = EntityStore::new(MemoryBackend::new());
        store
            .put(User::new("ryan_001", "ryan@example.com", "Ryan", Utc::now()))
            .unwrap();
        for (id, accuracy) in [("model_12345", 0.9018), ("model_12346", 0.8913)] {
            let tracking = TrackingRef {
                run_id: format!("run_{id}"),
                experiment_id: "exp_123".into(),
                tracking_uri: "http://localhost:5000".into(),
                artifact_path: "model".into(),
            };
            let mut m = Model::new(id, "ryan_001", tracking, "RandomForest", Utc::now());
            m.metrics.accuracy = Some(accuracy);
            store.put(m).unwrap();
        }
        store
    }

    fn pair() -> Vec<ModelId> {
        vec![ModelId::new("model_12345"), ModelId::new("model_12346")]
    }

    fn count(store: &EntityStore<MemoryBackend>, id: &str) -> u64 {
        store.require::<Model>(id).unwrap().value.comparison_count
    }

    #[test]
    fn fresh_comparison_completes() {
        let store = seeded();
        let config = VaultConfig::default();
        let coordinator = ConsistencyCoordinator::new(&store, &config);
        let outcome = coordinator
            .create_comparison(ComparisonRequest::new("ryan_001", pair()).with_metric("accuracy"))
            .unwrap();
        assert!(!outcome.replayed);
        assert_eq!(outcome.newly_applied.len(), 2);
        let comparison = outcome.comparison.value;
        assert_eq!(comparison.status, ComparisonStatus::Completed);
        assert_eq!(
            comparison.result.unwrap().winner().unwrap().model_id,
            ModelId::new("model_12345")
        );
        assert_eq!(count(&store, "model_12345"), 1);
    }

    #[test]
    fn idempotency_key_replays() {
        let store = seeded();
        let config = VaultConfig::default();
        let coordinator = ConsistencyCoordinator::new(&store, &config);
        let request = ComparisonRequest::new("ryan_001", pair()).with_idempotency_key("67890");
        let first = coordinator.create_comparison(request.clone()).unwrap();
        let second = coordinator.create_comparison(request).unwrap();
        assert_eq!(first.comparison.value.comparison_id, ComparisonId::new("comp_67890"));
        assert!(second.replayed);
        assert!(second.newly_applied.is_empty());
        assert_eq!(count(&store, "model_12346"), 1);
        assert_eq!(store.count(EntityKind::Comparison).unwrap(), 1);
    }

    #[test]
    fn key_reuse_with_other_models_rejected() {
        let store = seeded();
        let config = VaultConfig::default();
        let coordinator = ConsistencyCoordinator::new(&store, &config);
        coordinator
            .create_comparison(ComparisonRequest::new("ryan_001", pair()).with_idempotency_key("k1"))
            .unwrap();
        let mut reversed = pair();
        reversed.reverse();
        let err = coordinator
            .create_comparison(ComparisonRequest::new("ryan_001", reversed).with_idempotency_key("k1"))
            .unwrap_err();
        assert!(matches!(err, VaultError::Validation { ref field, .. } if field == "idempotency_key"));
    }

    #[test]
    fn missing_model_leaves_nothing() {
        let store = seeded();
        let config = VaultConfig::default();
        let coordinator = ConsistencyCoordinator::new(&store, &config);
        let err = coordinator
            .create_comparison(ComparisonRequest::new(
                "ryan_001",
                vec![ModelId::new("model_12345"), ModelId::new("model_404")],
            ))
            .unwrap_err();
        assert_eq!(err.kind(), "ReferenceError");
        assert_eq!(store.count(EntityKind::Comparison).unwrap(), 0);
        assert_eq!(count(&store, "model_12345"), 0);
    }

    #[test]
    fn unknown_requester_leaves_nothing() {
        let store = seeded();
        let config = VaultConfig::default();
        let coordinator = ConsistencyCoordinator::new(&store, &config);
        let err = coordinator
            .create_comparison(ComparisonRequest::new("ghost_999", pair()))
            .unwrap_err();
        assert!(matches!(err, VaultError::Reference { kind: EntityKind::User, .. }));
        assert_eq!(store.count(EntityKind::Comparison).unwrap(), 0);
    }

    #[test]
    fn deleted_model_before_apply_fails_comparison() {
        let store = seeded();
        let config = VaultConfig::default();
        let coordinator = ConsistencyCoordinator::new(&store, &config);

        // A pending comparison whose result was recorded, then a member is deleted.
        let id = ComparisonId::new("comp_stale");
        let mut pending = Comparison::pending(id.clone(), UserId::new("ryan_001"), "stale", pair(), Utc::now());
        let models: Vec<Model> = pair()
            .iter()
            .map(|m| store.require::<Model>(m.as_str()).unwrap().value)
            .collect();
        pending.result = Some(ComparisonEngine::compare(&models, &CompareOptions::default()).unwrap());
        store.put(pending).unwrap();
        store
            .update::<Model, _>("model_12346", 1, |m| {
                m.status = ModelStatus::Deleted;
                Ok(())
            })
            .unwrap();

        let err = coordinator.retry_comparison(&id).unwrap_err();
        assert_eq!(err.kind(), "ReferenceError");
        let stored = store.require::<Comparison>(id.as_str()).unwrap().value;
        assert_eq!(stored.status, ComparisonStatus::Failed);
        assert_eq!(stored.failure.unwrap().kind, "ReferenceError");
        // The live member keeps its increment.
        assert_eq!(count(&store, "model_12345"), 1);
        assert_eq!(count(&store, "model_12346"), 0);
    }

    #[test]
    fn resume_for_unknown_requester_applies_nothing() {
        let store = seeded();
        let config = VaultConfig::default();
        let coordinator = ConsistencyCoordinator::new(&store, &config);
        // Staged by a request that has not validated yet.
        store
            .put(Comparison::pending(ComparisonId::new("comp_k"), UserId::new("ghost"), "ghost", pair(), Utc::now()))
            .unwrap();

        let err = coordinator
            .create_comparison(ComparisonRequest::new("ghost", pair()).with_idempotency_key("k"))
            .unwrap_err();
        assert!(matches!(err, VaultError::Reference { kind: EntityKind::User, .. }));
        assert_eq!(count(&store, "model_12345"), 0);
        assert_eq!(count(&store, "model_12346"), 0);
        assert_eq!(store.count(EntityKind::Comparison).unwrap(), 0);
    }

    #[test]
    fn retry_rechecks_share_targets() {
        let store = seeded();
        let config = VaultConfig::default();
        let coordinator = ConsistencyCoordinator::new(&store, &config);
        let id = ComparisonId::new("comp_shared");
        let mut pending = Comparison::pending(id.clone(), UserId::new("ryan_001"), "shared", pair(), Utc::now());
        pending.shared_with.insert(UserId::new("stranger"));
        store.put(pending).unwrap();

        let err = coordinator.retry_comparison(&id).unwrap_err();
        assert_eq!(err.kind(), "ReferenceError");
        assert_eq!(count(&store, "model_12345"), 0);
        assert!(store.get::<Comparison>(id.as_str()).unwrap().is_none());
    }

    #[test]
    fn discard_follows_concurrent_version_bump() {
        let store = seeded();
        let config = VaultConfig::default();
        let coordinator = ConsistencyCoordinator::new(&store, &config);
        let id = ComparisonId::new("comp_raced");
        store
            .put(Comparison::pending(id.clone(), UserId::new("ryan_001"), "raced", pair(), Utc::now()))
            .unwrap();
        // Another caller touched the staged document after it was read.
        store
            .update::<Comparison, _>(id.as_str(), 1, |c| {
                c.user_notes = "resumed elsewhere".into();
                Ok(())
            })
            .unwrap();

        let err = coordinator.abandon(&id, VaultError::reference(EntityKind::Model, "model_404"));
        assert_eq!(err.kind(), "ReferenceError");
        assert!(store.get::<Comparison>(id.as_str()).unwrap().is_none());
    }

    #[test]
    fn abandon_keeps_comparison_a_model_already_counts() {
        let store = seeded();
        let config = VaultConfig::default();
        let coordinator = ConsistencyCoordinator::new(&store, &config);
        let id = ComparisonId::new("comp_half");
        store
            .put(Comparison::pending(id.clone(), UserId::new("ryan_001"), "half", pair(), Utc::now()))
            .unwrap();
        coordinator.apply_member(&id, &ModelId::new("model_12345")).unwrap();

        coordinator.abandon(&id, VaultError::reference(EntityKind::Model, "model_12346"));
        let stored = store.require::<Comparison>(id.as_str()).unwrap().value;
        assert_eq!(stored.status, ComparisonStatus::Failed);
        assert_eq!(count(&store, "model_12345"), 1);
    }

    #[test]
    fn pending_without_result_is_recomputed_on_retry() {
        let store = seeded();
        let config = VaultConfig::default();
        let coordinator = ConsistencyCoordinator::new(&store, &config);
        let id = ComparisonId::new("comp_crashed");
        store
            .put(Comparison::pending(id.clone(), UserId::new("ryan_001"), "crashed", pair(), Utc::now()))
            .unwrap();
        let outcome = coordinator.retry_comparison(&id).unwrap();
        assert!(outcome.replayed);
        assert!(outcome.comparison.value.result.is_some());
        assert_eq!(outcome.comparison.value.status, ComparisonStatus::Completed);
    }
}
