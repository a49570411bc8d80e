//! # Comparison Engine
//!
//! Pure computation of comparison results from resolved model snapshots.
//!
//! - No side effects, no store access
//! - Deterministic: inputs are ordered by model id before any computation,
//!   so the caller's ordering never changes the result
//! - Per-axis failures omit that axis instead of failing the comparison
//!
//! The only fatal error is [`VaultError::InsufficientData`] on the `models`
//! axis, returned when fewer than two distinct models are supplied.

use crate::entities::Model;
use crate::primitives::{DEFAULT_DIVERGENCE_THRESHOLD, DEFAULT_MAX_DIVERGENT_FEATURES};
use crate::{AnalysisId, ModelId, VaultError};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// =============================================================================
// OPTIONS
// =============================================================================

/// Knobs of a single comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompareOptions {
    /// Metric that decides the performance winner. `None` means the first
    /// declared metric common to all models.
    pub metric: Option<String>,
    /// Importance difference above which a feature is divergent.
    pub divergence_threshold: f64,
    /// Number of divergent explainability features reported.
    pub max_divergent_features: usize,
}

impl Default for CompareOptions {
    fn default() -> Self {
        Self {
            metric: None,
            divergence_threshold: DEFAULT_DIVERGENCE_THRESHOLD,
            max_divergent_features: DEFAULT_MAX_DIVERGENT_FEATURES,
        }
    }
}

impl CompareOptions {
    #[must_use]
    pub fn with_metric(mut self, metric: impl Into<String>) -> Self {
        self.metric = Some(metric.into());
        self
    }
}

/// The axes a comparison is computed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    Performance,
    Features,
    Explainability,
    Fairness,
    Efficiency,
}

impl Axis {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Axis::Performance => "performance",
            Axis::Features => "features",
            Axis::Explainability => "explainability",
            Axis::Fairness => "fairness",
            Axis::Efficiency => "efficiency",
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// RESULT BLOCKS
// =============================================================================

/// Declared performance winner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Winner {
    pub metric: String,
    pub model_id: ModelId,
    pub value: f64,
}

/// Values of one metric across all compared models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricValues {
    pub metric: String,
    pub values: BTreeMap<ModelId, f64>,
    /// `max - min` over the compared models.
    pub spread: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceComparison {
    /// Metrics common to every model, in declared order.
    pub metrics: Vec<MetricValues>,
    pub winner: Winner,
}

/// Importance of one common feature across all compared models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureDelta {
    pub feature: String,
    pub importances: BTreeMap<ModelId, f64>,
    /// Maximum pairwise absolute difference.
    pub difference: f64,
    pub divergent: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureComparison {
    pub threshold: f64,
    /// Common features by name.
    pub deltas: Vec<FeatureDelta>,
    /// Divergent features, largest difference first.
    pub divergent: Vec<String>,
}

/// Rank of one feature in each model's explainability ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRank {
    pub feature: String,
    /// Zero-based rank, most important first.
    pub ranks: BTreeMap<ModelId, usize>,
    /// Maximum pairwise rank distance, normalized to `[0, 1]`.
    pub distance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplainabilityComparison {
    /// `1 - mean(distance)` over the common features.
    pub agreement: f64,
    pub features: Vec<FeatureRank>,
    pub divergent_features: Vec<String>,
    /// Analysis each model's summary was derived from.
    pub analyses: BTreeMap<ModelId, AnalysisId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FairnessEntry {
    pub model_id: ModelId,
    pub analysis_id: AnalysisId,
    pub overall_fairness_score: f64,
    pub demographic_parity_difference: f64,
    pub equalized_odds_difference: f64,
    pub bias_detected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FairnessComparison {
    pub entries: Vec<FairnessEntry>,
    pub fairer_model: ModelId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EfficiencyEntry {
    pub model_id: ModelId,
    pub training_duration_seconds: Option<f64>,
    pub model_size_bytes: Option<u64>,
    pub inference_latency_ms: Option<f64>,
}

/// Informational only. No winner is declared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EfficiencyComparison {
    pub entries: Vec<EfficiencyEntry>,
}

/// An axis left out of the result, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OmittedAxis {
    pub axis: Axis,
    pub reason: String,
}

/// Full output of [`ComparisonEngine::compare`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    /// Compared models, ordered by id.
    pub model_ids: Vec<ModelId>,
    pub performance: Option<PerformanceComparison>,
    pub features: Option<FeatureComparison>,
    pub explainability: Option<ExplainabilityComparison>,
    pub fairness: Option<FairnessComparison>,
    pub efficiency: EfficiencyComparison,
    pub omitted: Vec<OmittedAxis>,
}

impl ComparisonResult {
    #[must_use]
    pub fn winner(&self) -> Option<&Winner> {
        self.performance.as_ref().map(|p| &p.winner)
    }

    #[must_use]
    pub fn fairer_model(&self) -> Option<&ModelId> {
        self.fairness.as_ref().map(|f| &f.fairer_model)
    }

    #[must_use]
    pub fn is_omitted(&self, axis: Axis) -> bool {
        self.omitted.iter().any(|o| o.axis == axis)
    }

    /// Number of metric values compared across all axes.
    #[must_use]
    pub fn total_metrics_compared(&self) -> usize {
        self.performance.as_ref().map_or(0, |p| p.metrics.len())
    }
}

// =============================================================================
// ENGINE
// =============================================================================

/// Stateless comparison engine.
pub struct ComparisonEngine;

impl ComparisonEngine {
    /// Compare two or more models.
    ///
    /// # Errors
    ///
    /// `InsufficientData` on the `models` axis if fewer than two distinct
    /// models are supplied. Per-axis gaps are reported in `omitted`.
    pub fn compare(models: &[Model], options: &CompareOptions) -> Result<ComparisonResult, VaultError> {
        let mut ordered: Vec<&Model> = models.iter().collect();
        ordered.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        ordered.dedup_by(|a, b| a.model_id == b.model_id);
        if ordered.len() < 2 {
            return Err(VaultError::insufficient(
                "models",
                format!("{} distinct model(s) supplied, at least 2 required", ordered.len()),
            ));
        }

        let mut omitted = Vec::new();
        let performance = axis(Axis::Performance, performance(&ordered, options), &mut omitted);
        let features = axis(Axis::Features, features(&ordered, options), &mut omitted);
        let explainability = axis(
            Axis::Explainability,
            explainability(&ordered, options),
            &mut omitted,
        );
        let fairness = axis(Axis::Fairness, fairness(&ordered), &mut omitted);

        Ok(ComparisonResult {
            model_ids: ordered.iter().map(|m| m.model_id.clone()).collect(),
            performance,
            features,
            explainability,
            fairness,
            efficiency: efficiency(&ordered),
            omitted,
        })
    }
}

fn axis<T>(axis: Axis, outcome: Result<T, String>, omitted: &mut Vec<OmittedAxis>) -> Option<T> {
    match outcome {
        Ok(block) => Some(block),
        Err(reason) => {
            omitted.push(OmittedAxis { axis, reason });
            None
        }
    }
}

fn spread<'a>(values: impl Iterator<Item = &'a f64>) -> f64 {
    let (lo, hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(*v), hi.max(*v))
    });
    if lo.is_finite() && hi.is_finite() {
        hi - lo
    } else {
        0.0
    }
}

fn performance(models: &[&Model], options: &CompareOptions) -> Result<PerformanceComparison, String> {
    let Some((first, rest)) = models.split_first() else {
        return Err("no models".to_string());
    };
    let common: Vec<String> = first
        .metrics
        .declared()
        .into_iter()
        .map(|(name, _)| name)
        .filter(|name| rest.iter().all(|m| m.metrics.get(name).is_some()))
        .collect();

    let metric = match &options.metric {
        Some(requested) if common.contains(requested) => requested.clone(),
        Some(requested) => {
            return Err(format!("metric `{requested}` is not reported by every model"));
        }
        None => match common.first() {
            Some(name) => name.clone(),
            None => return Err("no metric is reported by every model".to_string()),
        },
    };

    let metrics: Vec<MetricValues> = common
        .iter()
        .map(|name| {
            let values: BTreeMap<ModelId, f64> = models
                .iter()
                .filter_map(|m| m.metrics.get(name).map(|v| (m.model_id.clone(), v)))
                .collect();
            MetricValues {
                metric: name.clone(),
                spread: spread(values.values()),
                values,
            }
        })
        .collect();

    // Models are ordered by id, so a strict comparison keeps the smaller id on ties.
    let mut best: Option<(&ModelId, f64)> = None;
    for model in models {
        let Some(value) = model.metrics.get(&metric) else {
            continue;
        };
        match best {
            Some((_, top)) if value.total_cmp(&top) != Ordering::Greater => {}
            _ => best = Some((&model.model_id, value)),
        }
    }
    let Some((model_id, value)) = best else {
        return Err(format!("metric `{metric}` has no values"));
    };

    Ok(PerformanceComparison {
        winner: Winner {
            metric,
            model_id: model_id.clone(),
            value,
        },
        metrics,
    })
}

fn common_keys<'a, I>(mut maps: I) -> BTreeSet<String>
where
    I: Iterator<Item = &'a BTreeMap<String, f64>>,
{
    let Some(first) = maps.next() else {
        return BTreeSet::new();
    };
    let mut common: BTreeSet<String> = first.keys().cloned().collect();
    for map in maps {
        common.retain(|k| map.contains_key(k));
    }
    common
}

fn features(models: &[&Model], options: &CompareOptions) -> Result<FeatureComparison, String> {
    if let Some(model) = models.iter().find(|m| m.features.feature_importance.is_empty()) {
        return Err(format!("model {} has no feature importances", model.model_id));
    }
    let common = common_keys(models.iter().map(|m| &m.features.feature_importance));
    if common.is_empty() {
        return Err("no feature is shared by every model".to_string());
    }

    let deltas: Vec<FeatureDelta> = common
        .into_iter()
        .map(|feature| {
            let importances: BTreeMap<ModelId, f64> = models
                .iter()
                .filter_map(|m| {
                    m.features
                        .feature_importance
                        .get(&feature)
                        .map(|v| (m.model_id.clone(), *v))
                })
                .collect();
            let difference = spread(importances.values());
            FeatureDelta {
                divergent: difference > options.divergence_threshold,
                feature,
                importances,
                difference,
            }
        })
        .collect();

    let mut divergent: Vec<&FeatureDelta> = deltas.iter().filter(|d| d.divergent).collect();
    divergent.sort_by(|a, b| {
        b.difference
            .total_cmp(&a.difference)
            .then_with(|| a.feature.cmp(&b.feature))
    });

    Ok(FeatureComparison {
        threshold: options.divergence_threshold,
        divergent: divergent.into_iter().map(|d| d.feature.clone()).collect(),
        deltas,
    })
}

/// Rank features by importance, descending, ties broken by name.
fn ranking(importance: &BTreeMap<String, f64>, common: &BTreeSet<String>) -> BTreeMap<String, usize> {
    let mut ordered: Vec<(&String, f64)> = importance
        .iter()
        .filter(|(name, _)| common.contains(*name))
        .map(|(name, v)| (name, *v))
        .collect();
    ordered.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ordered
        .into_iter()
        .enumerate()
        .map(|(rank, (name, _))| (name.clone(), rank))
        .collect()
}

fn explainability(models: &[&Model], options: &CompareOptions) -> Result<ExplainabilityComparison, String> {
    let mut summaries = Vec::with_capacity(models.len());
    for model in models {
        match &model.explainability {
            Some(summary) => summaries.push((&model.model_id, summary)),
            None => return Err(format!("model {} has no explainability summary", model.model_id)),
        }
    }
    let common = common_keys(summaries.iter().map(|(_, s)| &s.mean_abs));
    if common.is_empty() {
        return Err("no explained feature is shared by every model".to_string());
    }

    let rankings: Vec<(&ModelId, BTreeMap<String, usize>)> = summaries
        .iter()
        .map(|(id, s)| (*id, ranking(&s.mean_abs, &common)))
        .collect();
    let denominator = common.len().saturating_sub(1).max(1) as f64;

    let features: Vec<FeatureRank> = common
        .iter()
        .map(|feature| {
            let ranks: BTreeMap<ModelId, usize> = rankings
                .iter()
                .filter_map(|(id, r)| r.get(feature).map(|rank| ((*id).clone(), *rank)))
                .collect();
            let lo = ranks.values().min().copied().unwrap_or(0);
            let hi = ranks.values().max().copied().unwrap_or(0);
            FeatureRank {
                feature: feature.clone(),
                distance: (hi - lo) as f64 / denominator,
                ranks,
            }
        })
        .collect();

    let mean = features.iter().map(|f| f.distance).sum::<f64>() / features.len() as f64;

    let mut divergent: Vec<&FeatureRank> = features.iter().filter(|f| f.distance > 0.0).collect();
    divergent.sort_by(|a, b| {
        b.distance
            .total_cmp(&a.distance)
            .then_with(|| a.feature.cmp(&b.feature))
    });
    divergent.truncate(options.max_divergent_features);

    Ok(ExplainabilityComparison {
        agreement: (1.0 - mean).clamp(0.0, 1.0),
        divergent_features: divergent.into_iter().map(|f| f.feature.clone()).collect(),
        analyses: summaries
            .iter()
            .map(|(id, s)| ((*id).clone(), s.analysis_id.clone()))
            .collect(),
        features,
    })
}

fn fairness(models: &[&Model]) -> Result<FairnessComparison, String> {
    let mut entries = Vec::with_capacity(models.len());
    for model in models {
        let Some(summary) = &model.fairness else {
            return Err(format!("model {} has no fairness summary", model.model_id));
        };
        entries.push(FairnessEntry {
            model_id: model.model_id.clone(),
            analysis_id: summary.analysis_id.clone(),
            overall_fairness_score: summary.overall_fairness_score,
            demographic_parity_difference: summary.demographic_parity_difference,
            equalized_odds_difference: summary.equalized_odds_difference,
            bias_detected: summary.bias_detected,
        });
    }

    // Higher score, then smaller |dpd|, then smaller id.
    let fairer = entries.iter().min_by(|a, b| {
        b.overall_fairness_score
            .total_cmp(&a.overall_fairness_score)
            .then_with(|| {
                a.demographic_parity_difference
                    .abs()
                    .total_cmp(&b.demographic_parity_difference.abs())
            })
            .then_with(|| a.model_id.cmp(&b.model_id))
    });
    let Some(fairer) = fairer else {
        return Err("no fairness entries".to_string());
    };

    Ok(FairnessComparison {
        fairer_model: fairer.model_id.clone(),
        entries,
    })
}

fn efficiency(models: &[&Model]) -> EfficiencyComparison {
    EfficiencyComparison {
        entries: models
            .iter()
            .map(|m| EfficiencyEntry {
                model_id: m.model_id.clone(),
                training_duration_seconds: m.training_duration_seconds,
                model_size_bytes: m.size_bytes(),
                inference_latency_ms: m.inference_latency_ms,
            })
            .collect(),
    }
}

// =============================================================================
// TESTS
// =============================================================================
