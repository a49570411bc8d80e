//! # Analysis Ingest
//!
//! Producer contract for explainability and fairness results.
//!
//! Analyses are upserted by `analysis_id`. When a submission is
//! `completed`, the summary block on its model is refreshed with a
//! conditional update guarded by freshness: the summary always reflects the
//! completed analysis with the greatest `(computed_at, analysis_id)`, no
//! matter in which order producers deliver their results.

use crate::config::VaultConfig;
use crate::entities::{Document, ExplainabilityAnalysis, FairnessAnalysis, Model};
use crate::resolver::ReferenceResolver;
use crate::store::{DocumentBackend, EntityStore, Step};
use crate::{AnalysisId, AnalysisStatus, ModelId, Versioned, VaultError};
use chrono::{DateTime, Utc};

/// Result of a submission.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisOutcome<T> {
    pub analysis: Versioned<T>,
    /// The submission replaced the model's summary block.
    pub summary_updated: bool,
}

/// `true` if `(at, id)` should replace the summary currently on the model.
///
/// Resubmitting the analysis that already owns the summary also wins, so a
/// corrected payload with the same timestamp is picked up.
fn is_fresher(at: DateTime<Utc>, id: &AnalysisId, current: Option<(DateTime<Utc>, &AnalysisId)>) -> bool {
    match current {
        None => true,
        Some((current_at, current_id)) => (at, id) >= (current_at, current_id),
    }
}

pub struct AnalysisIngest<'a, B> {
    store: &'a EntityStore<B>,
    config: &'a VaultConfig,
}

impl<'a, B: DocumentBackend> AnalysisIngest<'a, B> {
    pub fn new(store: &'a EntityStore<B>, config: &'a VaultConfig) -> Self {
        Self { store, config }
    }

    /// Upsert an explainability analysis.
    ///
    /// Missing per-feature statistics are derived from `feature_values`
    /// before validation.
    ///
    /// # Errors
    ///
    /// `Reference` if the model (live) or user does not resolve, and the
    /// usual store errors. A terminal analysis cannot be overwritten with a
    /// different status.
    pub fn submit_explainability(
        &self,
        mut analysis: ExplainabilityAnalysis,
    ) -> Result<AnalysisOutcome<ExplainabilityAnalysis>, VaultError> {
        let resolver = ReferenceResolver::new(self.store);
        resolver.resolve_model(&analysis.model_id)?;
        resolver.resolve_user(&analysis.user_id)?;
        analysis.derive_feature_summary();

        let stored = self.upsert(analysis)?;
        let summary_updated = if stored.value.status == AnalysisStatus::Completed {
            let summary = stored.value.summary();
            self.refresh_model(&stored.value.model_id, |m| {
                let current = m.explainability.as_ref().map(|s| (s.computed_at, &s.analysis_id));
                if !is_fresher(summary.computed_at, &summary.analysis_id, current)
                    || m.explainability.as_ref() == Some(&summary)
                {
                    return false;
                }
                m.explainability = Some(summary.clone());
                true
            })?
        } else {
            false
        };

        tracing::info!(
            analysis = %stored.value.analysis_id,
            model = %stored.value.model_id,
            status = %stored.value.status,
            summary_updated,
            "explainability analysis stored"
        );
        Ok(AnalysisOutcome {
            analysis: stored,
            summary_updated,
        })
    }

    /// Upsert a fairness analysis.
    pub fn submit_fairness(&self, analysis: FairnessAnalysis) -> Result<AnalysisOutcome<FairnessAnalysis>, VaultError> {
        let resolver = ReferenceResolver::new(self.store);
        resolver.resolve_model(&analysis.model_id)?;
        resolver.resolve_user(&analysis.user_id)?;

        let stored = self.upsert(analysis)?;
        let summary_updated = if stored.value.status == AnalysisStatus::Completed {
            let summary = stored.value.summary();
            self.refresh_model(&stored.value.model_id, |m| {
                let current = m.fairness.as_ref().map(|s| (s.computed_at, &s.analysis_id));
                if !is_fresher(summary.computed_at, &summary.analysis_id, current)
                    || m.fairness.as_ref() == Some(&summary)
                {
                    return false;
                }
                m.fairness = Some(summary.clone());
                true
            })?
        } else {
            false
        };

        if stored.value.bias_detected {
            tracing::warn!(
                analysis = %stored.value.analysis_id,
                model = %stored.value.model_id,
                severity = ?stored.value.bias_severity,
                "bias detected"
            );
        }
        tracing::info!(
            analysis = %stored.value.analysis_id,
            model = %stored.value.model_id,
            status = %stored.value.status,
            summary_updated,
            "fairness analysis stored"
        );
        Ok(AnalysisOutcome {
            analysis: stored,
            summary_updated,
        })
    }

    /// Insert, or replace the stored payload while keeping `created_at`.
    fn upsert<T: StoredAnalysis>(&self, analysis: T) -> Result<Versioned<T>, VaultError> {
        let id = analysis.id().to_string();
        if self.store.get::<T>(&id)?.is_none() {
            match self.store.put(analysis.clone()) {
                Ok(stored) => return Ok(stored),
                // Lost the insert race; fall through to the update path.
                Err(VaultError::Conflict { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        let outcome = self.store.update_with_retry::<T, _>(&id, self.config.conflict_retries, |doc| {
            let created_at = doc.created_at();
            *doc = analysis.clone();
            doc.keep_created_at(created_at);
            Ok(Step::Apply)
        })?;
        tracing::debug!(analysis = %id, "analysis replaced");
        Ok(outcome.into_versioned())
    }

    /// Conditionally rewrite the summary block of a model. `decide` returns
    /// whether it changed anything.
    fn refresh_model<F>(&self, model: &ModelId, mut decide: F) -> Result<bool, VaultError>
    where
        F: FnMut(&mut Model) -> bool,
    {
        let outcome = self
            .store
            .update_with_retry::<Model, _>(model.as_str(), self.config.conflict_retries, |m| {
                if m.is_deleted() || !decide(m) {
                    return Ok(Step::Skip);
                }
                Ok(Step::Apply)
            })?;
        Ok(outcome.is_applied())
    }
}

/// Analysis documents that can be upserted.
trait StoredAnalysis: Document {
    fn keep_created_at(&mut self, at: DateTime<Utc>);
}

impl StoredAnalysis for ExplainabilityAnalysis {
    fn keep_created_at(&mut self, at: DateTime<Utc>) {
        self.created_at = at;
    }
}

impl StoredAnalysis for FairnessAnalysis {
    fn keep_created_at(&mut self, at: DateTime<Utc>) {
        self.created_at = at;
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::entities::{ExplainabilityConfig, FairnessMetrics, FeatureStats, TrackingRef, User};
    use crate::storage::MemoryBackend;
    use crate::{BiasSeverity, ModelStatus, UserId};
    use chrono::{Duration, TimeZone};
    use std::collections::BTreeMap;

    fn seeded() -> EntityStore<MemoryBackend> {
        let store = EntityStore::new(MemoryBackend::new());
        let at = Utc.with_ymd_and_hms(2025, 9, 1, 0, 0, 0).unwrap();
        store.put(User::new("ryan_001", "ryan@example.com", "Ryan", at)).unwrap();
        let tracking = TrackingRef {
            run_id: "run_001".into(),
            experiment_id: "exp_123".into(),
            tracking_uri: "http://localhost:5000".into(),
            artifact_path: "model".into(),
        };
        store
            .put(Model::new("model_12345", "ryan_001", tracking, "RandomForest", at))
            .unwrap();
        store
    }

    fn explainability(id: &str, computed_at: DateTime<Utc>, status: AnalysisStatus) -> ExplainabilityAnalysis {
        let mut feature_values = BTreeMap::new();
        feature_values.insert("Age".to_string(), vec![0.2, -0.4, 0.3]);
        ExplainabilityAnalysis {
            analysis_id: AnalysisId::new(id),
            model_id: ModelId::new("model_12345"),
            user_id: UserId::new("ryan_001"),
            run_id: "run_001".into(),
            config: ExplainabilityConfig::default(),
            base_value: 0.38,
            feature_values,
            feature_summary: BTreeMap::new(),
            sample_explanations: Vec::new(),
            plots: BTreeMap::new(),
            computed_at,
            computation_time_seconds: 12.5,
            explainer_type: "TreeExplainer".into(),
            status,
            created_at: computed_at,
            updated_at: computed_at,
        }
    }

    fn fairness(id: &str, computed_at: DateTime<Utc>, score: f64) -> FairnessAnalysis {
        FairnessAnalysis {
            analysis_id: AnalysisId::new(id),
            model_id: ModelId::new("model_12345"),
            user_id: UserId::new("ryan_001"),
            run_id: "run_001".into(),
            sensitive_attributes: vec!["Sex".into()],
            metrics: FairnessMetrics::default(),
            bias_detected: true,
            bias_severity: Some(BiasSeverity::Moderate),
            problematic_features: vec!["Sex".into()],
            recommendations: Vec::new(),
            mitigation_applied: false,
            mitigation_strategies: Vec::new(),
            overall_fairness_score: score,
            test_dataset_size: 179,
            confidence_level: 0.95,
            plots: BTreeMap::new(),
            computed_at,
            computation_time_seconds: 3.0,
            status: AnalysisStatus::Completed,
            created_at: computed_at,
            updated_at: computed_at,
        }
    }

    fn model(store: &EntityStore<MemoryBackend>) -> Model {
        store.require::<Model>("model_12345").unwrap().value
    }

    #[test]
    fn completed_analysis_fills_summary() {
        let store = seeded();
        let config = VaultConfig::default();
        let ingest = AnalysisIngest::new(&store, &config);
        let t0 = Utc.with_ymd_and_hms(2025, 9, 17, 14, 30, 0).unwrap();
        let outcome = ingest
            .submit_explainability(explainability("shap_1", t0, AnalysisStatus::Completed))
            .unwrap();
        assert!(outcome.summary_updated);
        let stats: &FeatureStats = &outcome.analysis.value.feature_summary["Age"];
        assert!((stats.mean_abs - 0.3).abs() < 1e-9);
        let summary = model(&store).explainability.unwrap();
        assert_eq!(summary.analysis_id, AnalysisId::new("shap_1"));
    }

    #[test]
    fn older_analysis_does_not_replace_newer() {
        let store = seeded();
        let config = VaultConfig::default();
        let ingest = AnalysisIngest::new(&store, &config);
        let t1 = Utc.with_ymd_and_hms(2025, 9, 17, 14, 30, 0).unwrap();
        let t0 = t1 - Duration::hours(1);
        ingest
            .submit_explainability(explainability("shap_new", t1, AnalysisStatus::Completed))
            .unwrap();
        let late = ingest
            .submit_explainability(explainability("shap_old", t0, AnalysisStatus::Completed))
            .unwrap();
        assert!(!late.summary_updated);
        assert_eq!(
            model(&store).explainability.unwrap().analysis_id,
            AnalysisId::new("shap_new")
        );
        // Both detailed analyses are kept.
        assert!(store.get::<ExplainabilityAnalysis>("shap_old").unwrap().is_some());
    }

    #[test]
    fn equal_timestamps_break_ties_by_id() {
        let store = seeded();
        let config = VaultConfig::default();
        let ingest = AnalysisIngest::new(&store, &config);
        let t = Utc.with_ymd_and_hms(2025, 9, 17, 14, 30, 0).unwrap();
        ingest.submit_fairness(fairness("fair_b", t, 6.0)).unwrap();
        ingest.submit_fairness(fairness("fair_a", t, 9.0)).unwrap();
        let summary = model(&store).fairness.unwrap();
        assert_eq!(summary.analysis_id, AnalysisId::new("fair_b"));
        assert!((summary.overall_fairness_score - 6.0).abs() < 1e-9);
    }

    #[test]
    fn running_analysis_leaves_summary_alone() {
        let store = seeded();
        let config = VaultConfig::default();
        let ingest = AnalysisIngest::new(&store, &config);
        let t = Utc.with_ymd_and_hms(2025, 9, 17, 14, 30, 0).unwrap();
        let outcome = ingest
            .submit_explainability(explainability("shap_1", t, AnalysisStatus::Running))
            .unwrap();
        assert!(!outcome.summary_updated);
        assert!(model(&store).explainability.is_none());

        // Completing it later publishes the summary and keeps created_at.
        let mut done = explainability("shap_1", t, AnalysisStatus::Completed);
        done.created_at = t + Duration::minutes(5);
        done.updated_at = done.created_at;
        let outcome = ingest.submit_explainability(done).unwrap();
        assert!(outcome.summary_updated);
        assert_eq!(outcome.analysis.version, 2);
        assert_eq!(outcome.analysis.value.created_at, t);
    }

    #[test]
    fn analysis_for_deleted_model_is_rejected() {
        let store = seeded();
        store
            .update::<Model, _>("model_12345", 1, |m| {
                m.status = ModelStatus::Deleted;
                Ok(())
            })
            .unwrap();
        let config = VaultConfig::default();
        let err = AnalysisIngest::new(&store, &config)
            .submit_fairness(fairness("fair_1", Utc::now(), 7.0))
            .unwrap_err();
        assert_eq!(err.kind(), "ReferenceError");
        assert!(store.get::<FairnessAnalysis>("fair_1").unwrap().is_none());
    }
}
