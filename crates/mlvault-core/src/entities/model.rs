use super::Document;
use crate::index::{IndexEntry, IndexKey, compound_key, metric_key, time_key};
use crate::primitives::{FAIRNESS_SCORE_RANGE, MAX_FEATURES, MAX_TAGS, RATE_METRICS};
use crate::validation::{self, ValidationPolicy};
use crate::{AnalysisId, BiasSeverity, ComparisonId, EntityKind, ModelId, ModelStatus, UserId, VaultError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// TRACKING & TRAINING PAYLOAD
// =============================================================================

/// Opaque references into the experiment-tracking system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingRef {
    pub run_id: String,
    pub experiment_id: String,
    pub tracking_uri: String,
    #[serde(default = "default_artifact_path")]
    pub artifact_path: String,
}

fn default_artifact_path() -> String {
    "model".to_string()
}

impl Default for TrackingRef {
    fn default() -> Self {
        Self {
            run_id: String::new(),
            experiment_id: String::new(),
            tracking_uri: String::new(),
            artifact_path: default_artifact_path(),
        }
    }
}

/// A single training parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
}

/// Training parameters: common fields plus an open per-framework map.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TrainingParams {
    #[serde(default)]
    pub n_estimators: Option<u64>,
    #[serde(default)]
    pub max_depth: Option<u64>,
    #[serde(default)]
    pub learning_rate: Option<f64>,
    #[serde(default)]
    pub random_state: Option<u64>,
    #[serde(default)]
    pub extra: BTreeMap<String, ParamValue>,
}

/// Performance metrics: the common rate fields plus named extras.
///
/// Rate fields are validated to `[0, 1]`; extras are only checked for
/// finiteness (e.g. `log_loss`, `rmse`).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Metrics {
    #[serde(default)]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub precision: Option<f64>,
    #[serde(default)]
    pub recall: Option<f64>,
    #[serde(default)]
    pub f1_score: Option<f64>,
    #[serde(default)]
    pub auc_roc: Option<f64>,
    #[serde(default)]
    pub extra: BTreeMap<String, f64>,
}

impl Metrics {
    /// Look up any metric by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<f64> {
        match name {
            "accuracy" => self.accuracy,
            "precision" => self.precision,
            "recall" => self.recall,
            "f1_score" => self.f1_score,
            "auc_roc" => self.auc_roc,
            other => self.extra.get(other).copied(),
        }
    }

    /// Set any metric by name.
    pub fn set(&mut self, name: &str, value: f64) {
        match name {
            "accuracy" => self.accuracy = Some(value),
            "precision" => self.precision = Some(value),
            "recall" => self.recall = Some(value),
            "f1_score" => self.f1_score = Some(value),
            "auc_roc" => self.auc_roc = Some(value),
            other => {
                self.extra.insert(other.to_string(), value);
            }
        }
    }

    /// Present metrics in declared order: rate fields first, extras by name.
    #[must_use]
    pub fn declared(&self) -> Vec<(String, f64)> {
        let mut out: Vec<(String, f64)> = RATE_METRICS
            .iter()
            .filter_map(|name| self.get(name).map(|v| ((*name).to_string(), v)))
            .collect();
        out.extend(
            self.extra
                .iter()
                .filter(|(name, _)| !RATE_METRICS.contains(&name.as_str()))
                .map(|(name, v)| (name.clone(), *v)),
        );
        out
    }

    fn validate(&mut self, policy: &ValidationPolicy) -> Result<(), VaultError> {
        let rates = [
            ("metrics.accuracy", &mut self.accuracy),
            ("metrics.precision", &mut self.precision),
            ("metrics.recall", &mut self.recall),
            ("metrics.f1_score", &mut self.f1_score),
            ("metrics.auc_roc", &mut self.auc_roc),
        ];
        for (field, slot) in rates {
            if let Some(value) = slot.as_mut() {
                validation::check_rate(field, value, policy)?;
            }
        }
        for (name, value) in &self.extra {
            validation::check_label("metrics", name)?;
            if RATE_METRICS.contains(&name.as_str()) {
                return Err(VaultError::validation(
                    format!("metrics.extra.{name}"),
                    "shadows a common rate metric",
                ));
            }
            validation::check_finite(&format!("metrics.{name}"), *value)?;
        }
        Ok(())
    }
}

/// Declared features and their importances.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureSet {
    #[serde(default)]
    pub feature_names: Vec<String>,
    #[serde(default)]
    pub feature_importance: BTreeMap<String, f64>,
}

impl FeatureSet {
    #[must_use]
    pub fn feature_count(&self) -> usize {
        self.feature_names.len()
    }

    fn validate(&self) -> Result<(), VaultError> {
        if self.feature_names.len() > MAX_FEATURES {
            return Err(VaultError::validation(
                "features.feature_names",
                format!("more than {} features", MAX_FEATURES),
            ));
        }
        let mut seen = BTreeSet::new();
        for name in &self.feature_names {
            validation::check_label("features.feature_names", name)?;
            if !seen.insert(name.as_str()) {
                return Err(VaultError::validation(
                    "features.feature_names",
                    format!("duplicate feature `{name}`"),
                ));
            }
        }
        for (name, importance) in &self.feature_importance {
            if !seen.contains(name.as_str()) {
                return Err(VaultError::validation(
                    "features.feature_importance",
                    format!("`{name}` is not a declared feature"),
                ));
            }
            validation::check_non_negative(&format!("features.feature_importance.{name}"), *importance)?;
        }
        Ok(())
    }
}

/// Stored model artifact. The URI is opaque.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub name: String,
    pub kind: String,
    pub size_bytes: u64,
    pub uri: String,
}

// =============================================================================
// MATERIALIZED SUMMARIES
// =============================================================================

/// Latest completed explainability analysis, materialized on the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplainabilitySummary {
    pub analysis_id: AnalysisId,
    pub computed_at: DateTime<Utc>,
    pub base_value: f64,
    /// Mean absolute contribution per feature.
    pub mean_abs: BTreeMap<String, f64>,
    #[serde(default)]
    pub plots: BTreeMap<String, String>,
}

/// Latest completed fairness analysis, materialized on the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FairnessSummary {
    pub analysis_id: AnalysisId,
    pub computed_at: DateTime<Utc>,
    pub demographic_parity_difference: f64,
    pub equalized_odds_difference: f64,
    pub equal_opportunity_difference: f64,
    pub sensitive_features: Vec<String>,
    pub overall_fairness_score: f64,
    pub bias_detected: bool,
    #[serde(default)]
    pub bias_severity: Option<BiasSeverity>,
}

// =============================================================================
// MODEL
// =============================================================================

/// A tracked model and its denormalized state.
///
/// `comparison_count` always equals the size of `applied_comparisons`; the
/// set is the idempotency ledger of the staged-commit protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub model_id: ModelId,
    pub user_id: UserId,
    pub tracking: TrackingRef,
    pub model_name: String,
    pub model_kind: String,
    #[serde(default)]
    pub model_version: String,
    pub framework: String,
    #[serde(default)]
    pub dataset_name: String,
    #[serde(default)]
    pub trained_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub training_duration_seconds: Option<f64>,
    #[serde(default)]
    pub inference_latency_ms: Option<f64>,
    #[serde(default)]
    pub model_size_bytes: Option<u64>,
    #[serde(default)]
    pub parameters: TrainingParams,
    #[serde(default)]
    pub metrics: Metrics,
    #[serde(default)]
    pub features: FeatureSet,
    #[serde(default)]
    pub explainability: Option<ExplainabilitySummary>,
    #[serde(default)]
    pub fairness: Option<FairnessSummary>,
    #[serde(default)]
    pub artifacts: Vec<ArtifactRef>,
    pub status: ModelStatus,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default)]
    pub view_count: u64,
    #[serde(default)]
    pub comparison_count: u64,
    #[serde(default)]
    pub applied_comparisons: BTreeSet<ComparisonId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    /// A new active model with empty payload.
    #[must_use]
    pub fn new(
        model_id: impl Into<ModelId>,
        user_id: impl Into<UserId>,
        tracking: TrackingRef,
        model_kind: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        let model_id = model_id.into();
        let model_kind = model_kind.into();
        Self {
            model_name: format!("{}_{}", model_kind, model_id),
            model_id,
            user_id: user_id.into(),
            tracking,
            model_kind,
            model_version: String::new(),
            framework: "unknown".to_string(),
            dataset_name: String::new(),
            trained_at: None,
            training_duration_seconds: None,
            inference_latency_ms: None,
            model_size_bytes: None,
            parameters: TrainingParams::default(),
            metrics: Metrics::default(),
            features: FeatureSet::default(),
            explainability: None,
            fairness: None,
            artifacts: Vec::new(),
            status: ModelStatus::Active,
            tags: BTreeSet::new(),
            notes: String::new(),
            is_favorite: false,
            view_count: 0,
            comparison_count: 0,
            applied_comparisons: BTreeSet::new(),
            created_at: at,
            updated_at: at,
        }
    }

    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.status == ModelStatus::Deleted
    }

    /// Declared size, falling back to the sum of `model_file` artifacts.
    #[must_use]
    pub fn size_bytes(&self) -> Option<u64> {
        self.model_size_bytes.or_else(|| {
            let files: Vec<u64> = self
                .artifacts
                .iter()
                .filter(|a| a.kind == "model_file")
                .map(|a| a.size_bytes)
                .collect();
            if files.is_empty() {
                None
            } else {
                Some(files.iter().fold(0u64, |acc, s| acc.saturating_add(*s)))
            }
        })
    }

    /// Whether the comparison has already been counted on this model.
    #[must_use]
    pub fn has_applied(&self, comparison: &ComparisonId) -> bool {
        self.applied_comparisons.contains(comparison)
    }

    /// Count a comparison exactly once. Returns `false` if already counted.
    pub fn apply_comparison(&mut self, comparison: &ComparisonId) -> bool {
        if !self.applied_comparisons.insert(comparison.clone()) {
            return false;
        }
        self.comparison_count = self.comparison_count.saturating_add(1);
        true
    }
}

impl Document for Model {
    const KIND: EntityKind = EntityKind::Model;

    fn id(&self) -> &str {
        self.model_id.as_str()
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

    fn validate(&mut self, policy: &ValidationPolicy) -> Result<(), VaultError> {
        validation::check_id("model_id", self.model_id.as_str())?;
        validation::check_id("user_id", self.user_id.as_str())?;
        validation::check_id("tracking.run_id", &self.tracking.run_id)?;
        validation::check_id("tracking.experiment_id", &self.tracking.experiment_id)?;
        validation::check_text("tracking.tracking_uri", &self.tracking.tracking_uri)?;
        validation::check_label("model_name", &self.model_name)?;
        validation::check_label("model_kind", &self.model_kind)?;
        validation::check_label("framework", &self.framework)?;
        validation::check_label_length("model_version", &self.model_version)?;
        validation::check_label_length("dataset_name", &self.dataset_name)?;
        validation::check_text("notes", &self.notes)?;

        if let Some(seconds) = self.training_duration_seconds {
            validation::check_non_negative("training_duration_seconds", seconds)?;
        }
        if let Some(latency) = self.inference_latency_ms {
            validation::check_non_negative("inference_latency_ms", latency)?;
        }
        if let Some(rate) = self.parameters.learning_rate {
            validation::check_non_negative("parameters.learning_rate", rate)?;
        }
        for (name, value) in &self.parameters.extra {
            validation::check_label("parameters", name)?;
            if let ParamValue::Float(v) = value {
                validation::check_finite(&format!("parameters.{name}"), *v)?;
            }
        }

        self.metrics.validate(policy)?;
        self.features.validate()?;

        for artifact in &self.artifacts {
            validation::check_label("artifacts.name", &artifact.name)?;
            validation::check_label("artifacts.kind", &artifact.kind)?;
            validation::check_text("artifacts.uri", &artifact.uri)?;
        }

        self.tags = self
            .tags
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if self.tags.len() > MAX_TAGS {
            return Err(VaultError::validation(
                "tags",
                format!("more than {} tags", MAX_TAGS),
            ));
        }
        for tag in &self.tags {
            validation::check_label("tags", tag)?;
        }

        if let Some(summary) = &self.explainability {
            validation::check_finite("explainability.base_value", summary.base_value)?;
            for (feature, value) in &summary.mean_abs {
                validation::check_non_negative(&format!("explainability.mean_abs.{feature}"), *value)?;
            }
        }
        if let Some(summary) = &self.fairness {
            let (lo, hi) = FAIRNESS_SCORE_RANGE;
            validation::check_range("fairness.overall_fairness_score", summary.overall_fairness_score, lo, hi)?;
            validation::check_range(
                "fairness.demographic_parity_difference",
                summary.demographic_parity_difference,
                -1.0,
                1.0,
            )?;
            validation::check_range(
                "fairness.equalized_odds_difference",
                summary.equalized_odds_difference,
                -1.0,
                1.0,
            )?;
            validation::check_range(
                "fairness.equal_opportunity_difference",
                summary.equal_opportunity_difference,
                -1.0,
                1.0,
            )?;
        }

        if self.comparison_count != self.applied_comparisons.len() as u64 {
            return Err(VaultError::validation(
                "comparison_count",
                format!(
                    "{} does not match {} applied comparisons",
                    self.comparison_count,
                    self.applied_comparisons.len()
                ),
            ));
        }
        validation::check_timestamps(self.created_at, self.updated_at)
    }

    fn check_transition(previous: &Self, next: &Self) -> Result<(), VaultError> {
        validation::check_unchanged("user_id", &previous.user_id, &next.user_id)?;
        if next.comparison_count < previous.comparison_count {
            return Err(VaultError::validation(
                "comparison_count",
                "applied comparisons are never rolled back",
            ));
        }
        if !previous.applied_comparisons.is_subset(&next.applied_comparisons) {
            return Err(VaultError::validation(
                "applied_comparisons",
                "applied comparisons are never removed",
            ));
        }
        if next.view_count < previous.view_count {
            return Err(VaultError::validation("view_count", "counters only grow"));
        }
        Ok(())
    }

    fn index_entries(&self) -> Vec<IndexEntry> {
        let mut entries = vec![
            IndexEntry::new(IndexKey::ModelRun, self.tracking.run_id.clone()),
            IndexEntry::new(
                IndexKey::ModelUserCreated,
                compound_key(&[self.user_id.as_str(), &time_key(self.created_at)]),
            ),
            IndexEntry::new(IndexKey::ModelExperiment, self.tracking.experiment_id.clone()),
            IndexEntry::new(IndexKey::ModelKind, self.model_kind.clone()),
            IndexEntry::new(IndexKey::ModelStatus, self.status.as_str()),
        ];
        if !self.dataset_name.is_empty() {
            entries.push(IndexEntry::new(IndexKey::ModelDataset, self.dataset_name.clone()));
        }
        entries.extend(
            self.tags
                .iter()
                .map(|tag| IndexEntry::new(IndexKey::ModelTag, tag.clone())),
        );
        entries.extend(
            self.metrics
                .declared()
                .into_iter()
                .map(|(name, value)| IndexEntry::new(IndexKey::ModelMetric, metric_key(&name, value))),
        );
        entries
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    fn tracking() -> TrackingRef {
        TrackingRef {
            run_id: "run_001".into(),
            experiment_id: "exp_123".into(),
            tracking_uri: "http://localhost:5000".into(),
            artifact_path: "model".into(),
        }
    }

    fn titanic() -> Model {
        let mut model = Model::new("model_12345", "ryan_001", tracking(), "RandomForest", Utc::now());
        model.metrics.accuracy = Some(0.9018);
        model.metrics.f1_score = Some(0.899);
        model.features.feature_names = vec!["Sex".into(), "Fare".into(), "Age".into()];
        model.features.feature_importance =
            [("Sex".to_string(), 0.4567), ("Fare".to_string(), 0.2341)].into();
        model
    }

    #[test]
    fn valid_model_passes() {
        let mut model = titanic();
        model.validate(&ValidationPolicy::default()).unwrap();
    }

    #[test]
    fn importance_for_undeclared_feature_rejected() {
        let mut model = titanic();
        model.features.feature_importance.insert("Cabin".into(), 0.1);
        let err = model.validate(&ValidationPolicy::default()).unwrap_err();
        assert!(
            matches!(err, VaultError::Validation { ref field, .. } if field == "features.feature_importance")
        );
    }

    #[test]
    fn out_of_range_accuracy_rejected() {
        let mut model = titanic();
        model.metrics.accuracy = Some(90.18);
        assert!(model.validate(&ValidationPolicy::default()).is_err());
    }

    #[test]
    fn declared_metric_order() {
        let mut metrics = Metrics::default();
        metrics.set("log_loss", 0.3);
        metrics.set("recall", 0.87);
        metrics.set("accuracy", 0.9);
        let names: Vec<_> = metrics.declared().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["accuracy", "recall", "log_loss"]);
    }

    #[test]
    fn apply_comparison_is_idempotent() {
        let mut model = titanic();
        let comp = ComparisonId::new("comp_1");
        assert!(model.apply_comparison(&comp));
        assert!(!model.apply_comparison(&comp));
        assert_eq!(model.comparison_count, 1);
        model.validate(&ValidationPolicy::default()).unwrap();
    }

    #[test]
    fn counter_without_ledger_rejected() {
        let mut model = titanic();
        model.comparison_count = 3;
        assert!(model.validate(&ValidationPolicy::default()).is_err());
    }

    #[test]
    fn counters_never_roll_back() {
        let mut before = titanic();
        before.apply_comparison(&ComparisonId::new("comp_1"));
        let mut after = before.clone();
        after.applied_comparisons.clear();
        after.comparison_count = 0;
        assert!(Model::check_transition(&before, &after).is_err());
    }

    #[test]
    fn size_falls_back_to_model_files() {
        let mut model = titanic();
        model.artifacts = vec![
            ArtifactRef {
                name: "model.pkl".into(),
                kind: "model_file".into(),
                size_bytes: 1_024_000,
                uri: "s3://mlflow-artifacts/exp_123/run_001/model.pkl".into(),
            },
            ArtifactRef {
                name: "confusion_matrix.png".into(),
                kind: "visualization".into(),
                size_bytes: 45_000,
                uri: "s3://mlflow-artifacts/exp_123/run_001/confusion_matrix.png".into(),
            },
        ];
        assert_eq!(model.size_bytes(), Some(1_024_000));
        model.model_size_bytes = Some(10);
        assert_eq!(model.size_bytes(), Some(10));
    }

    #[test]
    fn tags_and_metrics_are_indexed() {
        let mut model = titanic();
        model.tags.insert("production".into());
        let entries = model.index_entries();
        assert!(entries.iter().any(|e| e.index == IndexKey::ModelTag && e.key == "production"));
        assert_eq!(
            entries.iter().filter(|e| e.index == IndexKey::ModelMetric).count(),
            2
        );
    }
}
