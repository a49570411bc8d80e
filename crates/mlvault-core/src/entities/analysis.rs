use super::Document;
use super::model::{ExplainabilitySummary, FairnessSummary};
use crate::index::{IndexEntry, IndexKey, compound_key, time_key};
use crate::primitives::{FAIRNESS_SCORE_RANGE, MAX_FEATURES};
use crate::validation::{self, ValidationPolicy};
use crate::{
    AnalysisId, AnalysisStatus, BiasSeverity, EntityKind, ExplainabilityKind, ModelId, UserId,
    VaultError,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn check_terminal(previous: AnalysisStatus, next: AnalysisStatus) -> Result<(), VaultError> {
    let terminal = matches!(previous, AnalysisStatus::Completed | AnalysisStatus::Failed);
    if terminal && previous != next {
        return Err(VaultError::validation(
            "status",
            format!("analysis already {previous}, cannot become {next}"),
        ));
    }
    Ok(())
}

fn check_plots(plots: &BTreeMap<String, String>) -> Result<(), VaultError> {
    for (name, uri) in plots {
        validation::check_label("plots", name)?;
        validation::check_text("plots", uri)?;
    }
    Ok(())
}

// =============================================================================
// EXPLAINABILITY
// =============================================================================

/// How the explainer was configured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplainabilityConfig {
    pub analysis_type: ExplainabilityKind,
    pub max_features: usize,
    pub sample_size: usize,
    pub background_samples: usize,
}

impl Default for ExplainabilityConfig {
    fn default() -> Self {
        Self {
            analysis_type: ExplainabilityKind::Summary,
            max_features: 10,
            sample_size: 1000,
            background_samples: 200,
        }
    }
}

/// Aggregate contribution statistics of one feature.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureStats {
    pub mean_abs: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

impl FeatureStats {
    /// Statistics of per-sample contributions. `None` for an empty slice.
    #[must_use]
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Some(Self {
            mean_abs: values.iter().map(|v| v.abs()).sum::<f64>() / n,
            std: variance.sqrt(),
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        })
    }
}

/// Contributions explaining one prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleExplanation {
    pub sample_index: u64,
    pub prediction: f64,
    pub contributions: BTreeMap<String, f64>,
}

/// A detailed per-feature attribution analysis of one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplainabilityAnalysis {
    pub analysis_id: AnalysisId,
    pub model_id: ModelId,
    pub user_id: UserId,
    pub run_id: String,
    #[serde(default)]
    pub config: ExplainabilityConfig,
    pub base_value: f64,
    #[serde(default)]
    pub feature_values: BTreeMap<String, Vec<f64>>,
    #[serde(default)]
    pub feature_summary: BTreeMap<String, FeatureStats>,
    #[serde(default)]
    pub sample_explanations: Vec<SampleExplanation>,
    #[serde(default)]
    pub plots: BTreeMap<String, String>,
    pub computed_at: DateTime<Utc>,
    #[serde(default)]
    pub computation_time_seconds: f64,
    #[serde(default)]
    pub explainer_type: String,
    pub status: AnalysisStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExplainabilityAnalysis {
    /// Fill `feature_summary` for every feature that has raw values but no
    /// statistics yet.
    pub fn derive_feature_summary(&mut self) {
        for (feature, values) in &self.feature_values {
            if self.feature_summary.contains_key(feature) {
                continue;
            }
            if let Some(stats) = FeatureStats::from_values(values) {
                self.feature_summary.insert(feature.clone(), stats);
            }
        }
    }

    /// The block materialized on the model when this analysis is the latest.
    #[must_use]
    pub fn summary(&self) -> ExplainabilitySummary {
        ExplainabilitySummary {
            analysis_id: self.analysis_id.clone(),
            computed_at: self.computed_at,
            base_value: self.base_value,
            mean_abs: self
                .feature_summary
                .iter()
                .map(|(feature, stats)| (feature.clone(), stats.mean_abs))
                .collect(),
            plots: self.plots.clone(),
        }
    }
}

impl Document for ExplainabilityAnalysis {
    const KIND: EntityKind = EntityKind::Explainability;

    fn id(&self) -> &str {
        self.analysis_id.as_str()
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
        validation::check_id("analysis_id", self.analysis_id.as_str())?;
        validation::check_id("model_id", self.model_id.as_str())?;
        validation::check_id("user_id", self.user_id.as_str())?;
        validation::check_id("run_id", &self.run_id)?;
        validation::check_label_length("explainer_type", &self.explainer_type)?;
        validation::check_finite("base_value", self.base_value)?;
        validation::check_non_negative("computation_time_seconds", self.computation_time_seconds)?;
        if self.config.max_features == 0 {
            return Err(VaultError::validation("config.max_features", "must be positive"));
        }
        if self.feature_values.len() > MAX_FEATURES || self.feature_summary.len() > MAX_FEATURES {
            return Err(VaultError::validation(
                "feature_values",
                format!("more than {} features", MAX_FEATURES),
            ));
        }

        for (feature, values) in &self.feature_values {
            validation::check_label("feature_values", feature)?;
            for v in values {
                validation::check_finite(&format!("feature_values.{feature}"), *v)?;
            }
        }
        for (feature, stats) in &self.feature_summary {
            let field = format!("feature_summary.{feature}");
            validation::check_label("feature_summary", feature)?;
            validation::check_non_negative(&field, stats.mean_abs)?;
            validation::check_non_negative(&field, stats.std)?;
            validation::check_finite(&field, stats.min)?;
            validation::check_finite(&field, stats.max)?;
            if stats.min > stats.max {
                return Err(VaultError::validation(field, "min exceeds max"));
            }
        }
        for sample in &self.sample_explanations {
            validation::check_finite("sample_explanations.prediction", sample.prediction)?;
            for (feature, v) in &sample.contributions {
                validation::check_finite(&format!("sample_explanations.{feature}"), *v)?;
            }
        }
        check_plots(&self.plots)?;

        if self.status == AnalysisStatus::Completed && self.feature_summary.is_empty() {
            return Err(VaultError::validation(
                "feature_summary",
                "a completed analysis must summarize at least one feature",
            ));
        }
        validation::check_timestamps(self.created_at, self.updated_at)
    }

    fn check_transition(previous: &Self, next: &Self) -> Result<(), VaultError> {
        validation::check_unchanged("model_id", &previous.model_id, &next.model_id)?;
        validation::check_unchanged("user_id", &previous.user_id, &next.user_id)?;
        check_terminal(previous.status, next.status)
    }

    fn index_entries(&self) -> Vec<IndexEntry> {
        let computed = time_key(self.computed_at);
        vec![
            IndexEntry::new(
                IndexKey::ExplainabilityModel,
                compound_key(&[self.model_id.as_str(), &computed]),
            ),
            IndexEntry::new(
                IndexKey::ExplainabilityUser,
                compound_key(&[self.user_id.as_str(), &computed]),
            ),
            IndexEntry::new(IndexKey::ExplainabilityComputed, computed),
        ]
    }
}

// =============================================================================
// FAIRNESS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DemographicParity {
    pub difference: f64,
    pub ratio: f64,
    #[serde(default)]
    pub by_group: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EqualizedOdds {
    pub difference: f64,
    #[serde(default)]
    pub tpr_by_group: BTreeMap<String, f64>,
    #[serde(default)]
    pub fpr_by_group: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EqualOpportunity {
    pub difference: f64,
    #[serde(default)]
    pub by_group: BTreeMap<String, f64>,
}

/// Group disparity metrics.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FairnessMetrics {
    pub demographic_parity: DemographicParity,
    pub equalized_odds: EqualizedOdds,
    pub equal_opportunity: EqualOpportunity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    pub issue: String,
    pub severity: BiasSeverity,
    pub suggestion: String,
    #[serde(default)]
    pub estimated_impact: String,
}

/// Outcome disparity measurement of one model across sensitive groups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FairnessAnalysis {
    pub analysis_id: AnalysisId,
    pub model_id: ModelId,
    pub user_id: UserId,
    pub run_id: String,
    pub sensitive_attributes: Vec<String>,
    pub metrics: FairnessMetrics,
    pub bias_detected: bool,
    #[serde(default)]
    pub bias_severity: Option<BiasSeverity>,
    #[serde(default)]
    pub problematic_features: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<Recommendation>,
    #[serde(default)]
    pub mitigation_applied: bool,
    #[serde(default)]
    pub mitigation_strategies: Vec<String>,
    pub overall_fairness_score: f64,
    #[serde(default)]
    pub test_dataset_size: u64,
    pub confidence_level: f64,
    #[serde(default)]
    pub plots: BTreeMap<String, String>,
    pub computed_at: DateTime<Utc>,
    #[serde(default)]
    pub computation_time_seconds: f64,
    pub status: AnalysisStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FairnessAnalysis {
    /// The block materialized on the model when this analysis is the latest.
    #[must_use]
    pub fn summary(&self) -> FairnessSummary {
        FairnessSummary {
            analysis_id: self.analysis_id.clone(),
            computed_at: self.computed_at,
            demographic_parity_difference: self.metrics.demographic_parity.difference,
            equalized_odds_difference: self.metrics.equalized_odds.difference,
            equal_opportunity_difference: self.metrics.equal_opportunity.difference,
            sensitive_features: self.sensitive_attributes.clone(),
            overall_fairness_score: self.overall_fairness_score,
            bias_detected: self.bias_detected,
            bias_severity: self.bias_severity,
        }
    }
}

fn check_group_rates(field: &str, groups: &BTreeMap<String, f64>) -> Result<(), VaultError> {
    for (group, rate) in groups {
        validation::check_label(field, group)?;
        validation::check_range(&format!("{field}.{group}"), *rate, 0.0, 1.0)?;
    }
    Ok(())
}

impl Document for FairnessAnalysis {
    const KIND: EntityKind = EntityKind::Fairness;

    fn id(&self) -> &str {
        self.analysis_id.as_str()
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
        validation::check_id("analysis_id", self.analysis_id.as_str())?;
        validation::check_id("model_id", self.model_id.as_str())?;
        validation::check_id("user_id", self.user_id.as_str())?;
        validation::check_id("run_id", &self.run_id)?;
        if self.sensitive_attributes.is_empty() {
            return Err(VaultError::validation(
                "sensitive_attributes",
                "at least one attribute is required",
            ));
        }
        for attr in self.sensitive_attributes.iter().chain(&self.problematic_features) {
            validation::check_label("sensitive_attributes", attr)?;
        }
        for strategy in &self.mitigation_strategies {
            validation::check_label("mitigation_strategies", strategy)?;
        }

        let metrics = &self.metrics;
        validation::check_range(
            "metrics.demographic_parity.difference",
            metrics.demographic_parity.difference,
            -1.0,
            1.0,
        )?;
        validation::check_non_negative("metrics.demographic_parity.ratio", metrics.demographic_parity.ratio)?;
        validation::check_range(
            "metrics.equalized_odds.difference",
            metrics.equalized_odds.difference,
            -1.0,
            1.0,
        )?;
        validation::check_range(
            "metrics.equal_opportunity.difference",
            metrics.equal_opportunity.difference,
            -1.0,
            1.0,
        )?;
        check_group_rates("metrics.demographic_parity.by_group", &metrics.demographic_parity.by_group)?;
        check_group_rates("metrics.equalized_odds.tpr_by_group", &metrics.equalized_odds.tpr_by_group)?;
        check_group_rates("metrics.equalized_odds.fpr_by_group", &metrics.equalized_odds.fpr_by_group)?;
        check_group_rates("metrics.equal_opportunity.by_group", &metrics.equal_opportunity.by_group)?;

        let (lo, hi) = FAIRNESS_SCORE_RANGE;
        validation::check_range("overall_fairness_score", self.overall_fairness_score, lo, hi)?;
        validation::check_finite("confidence_level", self.confidence_level)?;
        if self.confidence_level <= 0.0 || self.confidence_level > 1.0 {
            return Err(VaultError::validation("confidence_level", "must lie in (0, 1]"));
        }
        if self.bias_detected && self.bias_severity.is_none() {
            return Err(VaultError::validation(
                "bias_severity",
                "required when bias is detected",
            ));
        }
        for rec in &self.recommendations {
            validation::check_label("recommendations.issue", &rec.issue)?;
            validation::check_text("recommendations.suggestion", &rec.suggestion)?;
            validation::check_text("recommendations.estimated_impact", &rec.estimated_impact)?;
        }
        validation::check_non_negative("computation_time_seconds", self.computation_time_seconds)?;
        check_plots(&self.plots)?;
        validation::check_timestamps(self.created_at, self.updated_at)
    }

    fn check_transition(previous: &Self, next: &Self) -> Result<(), VaultError> {
        validation::check_unchanged("model_id", &previous.model_id, &next.model_id)?;
        validation::check_unchanged("user_id", &previous.user_id, &next.user_id)?;
        check_terminal(previous.status, next.status)
    }

    fn index_entries(&self) -> Vec<IndexEntry> {
        let computed = time_key(self.computed_at);
        vec![
            IndexEntry::new(
                IndexKey::FairnessModel,
                compound_key(&[self.model_id.as_str(), &computed]),
            ),
            IndexEntry::new(
                IndexKey::FairnessUser,
                compound_key(&[self.user_id.as_str(), &computed]),
            ),
            IndexEntry::new(IndexKey::FairnessComputed, computed),
        ]
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn shap() -> ExplainabilityAnalysis {
        let at = Utc.with_ymd_and_hms(2025, 9, 17, 15, 0, 0).unwrap();
        ExplainabilityAnalysis {
            analysis_id: AnalysisId::new("shap_abc123"),
            model_id: ModelId::new("model_12345"),
            user_id: UserId::new("ryan_001"),
            run_id: "run_001".into(),
            config: ExplainabilityConfig::default(),
            base_value: 0.5234,
            feature_values: [
                ("Sex".to_string(), vec![0.3876, 0.2341, -0.1567, 0.4123]),
                ("Fare".to_string(), vec![-0.1987, 0.1234, 0.0456, -0.2341]),
            ]
            .into(),
            feature_summary: BTreeMap::new(),
            sample_explanations: Vec::new(),
            plots: BTreeMap::new(),
            computed_at: at,
            computation_time_seconds: 45.2,
            explainer_type: "TreeExplainer".into(),
            status: AnalysisStatus::Completed,
            created_at: at,
            updated_at: at,
        }
    }

    fn fairness() -> FairnessAnalysis {
        let at = Utc.with_ymd_and_hms(2025, 9, 17, 15, 5, 0).unwrap();
        FairnessAnalysis {
            analysis_id: AnalysisId::new("fair_xyz789"),
            model_id: ModelId::new("model_12345"),
            user_id: UserId::new("ryan_001"),
            run_id: "run_001".into(),
            sensitive_attributes: vec!["Sex".into(), "Age_Group".into()],
            metrics: FairnessMetrics {
                demographic_parity: DemographicParity {
                    difference: 0.0742,
                    ratio: 0.89,
                    by_group: [("Male".to_string(), 0.85), ("Female".to_string(), 0.78)].into(),
                },
                equalized_odds: EqualizedOdds {
                    difference: -0.0231,
                    ..EqualizedOdds::default()
                },
                equal_opportunity: EqualOpportunity {
                    difference: 0.0856,
                    by_group: BTreeMap::new(),
                },
            },
            bias_detected: true,
            bias_severity: Some(BiasSeverity::Moderate),
            problematic_features: vec!["Sex".into()],
            recommendations: vec![Recommendation {
                issue: "High demographic parity difference".into(),
                severity: BiasSeverity::Moderate,
                suggestion: "Consider rebalancing training data".into(),
                estimated_impact: "Could improve fairness score by 15-20%".into(),
            }],
            mitigation_applied: false,
            mitigation_strategies: Vec::new(),
            overall_fairness_score: 7.2,
            test_dataset_size: 5000,
            confidence_level: 0.95,
            plots: BTreeMap::new(),
            computed_at: at,
            computation_time_seconds: 23.7,
            status: AnalysisStatus::Completed,
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn stats_from_values() {
        let stats = FeatureStats::from_values(&[1.0, -1.0, 3.0, -3.0]).unwrap();
        assert!((stats.mean_abs - 2.0).abs() < 1e-12);
        assert_eq!(stats.min, -3.0);
        assert_eq!(stats.max, 3.0);
        assert!((stats.std - 5.0_f64.sqrt()).abs() < 1e-12);
        assert!(FeatureStats::from_values(&[]).is_none());
    }

    #[test]
    fn completed_without_summary_rejected() {
        let mut analysis = shap();
        assert!(analysis.validate(&ValidationPolicy::default()).is_err());
        analysis.derive_feature_summary();
        analysis.validate(&ValidationPolicy::default()).unwrap();
        assert_eq!(analysis.summary().mean_abs.len(), 2);
    }

    #[test]
    fn derived_summary_keeps_supplied_stats() {
        let mut analysis = shap();
        let supplied = FeatureStats {
            mean_abs: 0.3876,
            std: 0.1234,
            min: -0.5432,
            max: 0.6789,
        };
        analysis.feature_summary.insert("Sex".into(), supplied);
        analysis.derive_feature_summary();
        assert_eq!(analysis.feature_summary["Sex"], supplied);
    }

    #[test]
    fn terminal_status_is_final() {
        let done = shap();
        let mut reopened = done.clone();
        reopened.status = AnalysisStatus::Running;
        assert!(ExplainabilityAnalysis::check_transition(&done, &reopened).is_err());
    }

    #[test]
    fn fairness_sample_is_valid() {
        let mut analysis = fairness();
        analysis.validate(&ValidationPolicy::default()).unwrap();
        let summary = analysis.summary();
        assert_eq!(summary.overall_fairness_score, 7.2);
        assert_eq!(summary.sensitive_features.len(), 2);
    }

    #[test]
    fn fairness_score_out_of_range_rejected() {
        let mut analysis = fairness();
        analysis.overall_fairness_score = 11.0;
        let err = analysis.validate(&ValidationPolicy::default()).unwrap_err();
        assert!(matches!(err, VaultError::Validation { ref field, .. } if field == "overall_fairness_score"));
    }

    #[test]
    fn detected_bias_needs_severity() {
        let mut analysis = fairness();
        analysis.bias_severity = None;
        assert!(analysis.validate(&ValidationPolicy::default()).is_err());
    }
}
