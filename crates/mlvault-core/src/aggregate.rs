//! # Aggregation Layer
//!
//! Read-only analytics computed on demand. Nothing here is persisted.
//!
//! Every aggregation takes a [`CancelToken`] and checks it once per
//! document visited. A cancelled or expired token yields
//! `VaultError::Timeout` and the partial accumulation is dropped, so a
//! caller either gets the full answer or none.

use crate::entities::{Comparison, Model, UserActivity};
use crate::index::{IndexKey, compound_prefix};
use crate::store::{DocumentBackend, EntityStore};
use crate::{ActivityKind, ComparisonStatus, ModelStatus, UserId, VaultError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

// =============================================================================
// CANCELLATION
// =============================================================================

/// Cancellation signal shared between a caller and a running aggregation.
///
/// Clones share the same flag. The deadline, if any, is fixed at creation.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    /// A token that only fires on [`CancelToken::cancel`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that also fires once `timeout` has elapsed.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    fn check(&self) -> Result<(), VaultError> {
        if self.is_cancelled() {
            return Err(VaultError::Timeout);
        }
        Ok(())
    }
}

// =============================================================================
// RESULTS
// =============================================================================

/// Per model kind: how many models and the mean of each metric over the
/// models that report it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KindSummary {
    pub model_kind: String,
    pub count: usize,
    pub metric_averages: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonSummary {
    pub user_id: UserId,
    pub completed: usize,
    pub pending: usize,
    pub failed: usize,
    /// Mean over completed comparisons. `None` if there are none.
    pub average_computation_seconds: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivitySummary {
    pub user_id: UserId,
    pub total: usize,
    pub by_kind: BTreeMap<ActivityKind, usize>,
    pub first: Option<DateTime<Utc>>,
    pub last: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct MeanAcc {
    sum: f64,
    n: usize,
}

impl MeanAcc {
    fn push(&mut self, value: f64) {
        self.sum += value;
        self.n += 1;
    }

    fn mean(&self) -> Option<f64> {
        (self.n > 0).then(|| self.sum / self.n as f64)
    }
}

// =============================================================================
// AGGREGATOR
// =============================================================================

pub struct Aggregator<'a, B> {
    store: &'a EntityStore<B>,
}

impl<'a, B: DocumentBackend> Aggregator<'a, B> {
    pub fn new(store: &'a EntityStore<B>) -> Self {
        Self { store }
    }

    /// Group models by kind. `None` covers every model that is not deleted.
    ///
    /// Sorted by count descending, then kind ascending.
    pub fn models_by_kind(
        &self,
        status: Option<ModelStatus>,
        token: &CancelToken,
    ) -> Result<Vec<KindSummary>, VaultError> {
        token.check()?;
        let models = match status {
            Some(status) => self.store.find_by_index::<Model>(IndexKey::ModelStatus, status.as_str())?,
            None => self.store.scan::<Model>()?,
        };

        let mut groups: BTreeMap<String, (usize, BTreeMap<String, MeanAcc>)> = BTreeMap::new();
        for model in &models {
            token.check()?;
            let model = &model.value;
            if status.is_none() && model.is_deleted() {
                continue;
            }
            let (count, metrics) = groups.entry(model.model_kind.clone()).or_default();
            *count += 1;
            for (name, value) in model.metrics.declared() {
                metrics.entry(name).or_default().push(value);
            }
        }

        let mut summaries: Vec<KindSummary> = groups
            .into_iter()
            .map(|(model_kind, (count, metrics))| KindSummary {
                model_kind,
                count,
                metric_averages: metrics
                    .into_iter()
                    .filter_map(|(name, acc)| acc.mean().map(|m| (name, m)))
                    .collect(),
            })
            .collect();
        summaries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.model_kind.cmp(&b.model_kind)));
        tracing::debug!(groups = summaries.len(), models = models.len(), "models grouped by kind");
        Ok(summaries)
    }

    /// Comparison counts for one user and the mean computation time of the
    /// completed ones.
    pub fn user_comparison_summary(&self, user: &UserId, token: &CancelToken) -> Result<ComparisonSummary, VaultError> {
        token.check()?;
        let rows = self
            .store
            .find_by_prefix::<Comparison>(IndexKey::ComparisonUser, &compound_prefix(&[user.as_str()]))?;

        let mut summary = ComparisonSummary {
            user_id: user.clone(),
            completed: 0,
            pending: 0,
            failed: 0,
            average_computation_seconds: None,
        };
        let mut time = MeanAcc::default();
        for (_, comparison) in &rows {
            token.check()?;
            match comparison.value.status {
                ComparisonStatus::Completed => {
                    summary.completed += 1;
                    time.push(comparison.value.stats.computation_time_seconds);
                }
                ComparisonStatus::Pending => summary.pending += 1,
                ComparisonStatus::Failed => summary.failed += 1,
            }
        }
        summary.average_computation_seconds = time.mean();
        Ok(summary)
    }

    /// Event counts per kind for one user.
    pub fn user_activity_summary(&self, user: &UserId, token: &CancelToken) -> Result<ActivitySummary, VaultError> {
        token.check()?;
        let rows = self
            .store
            .find_by_prefix::<UserActivity>(IndexKey::ActivityUserTime, &compound_prefix(&[user.as_str()]))?;

        let mut summary = ActivitySummary {
            user_id: user.clone(),
            total: 0,
            by_kind: BTreeMap::new(),
            first: None,
            last: None,
        };
        for (_, activity) in &rows {
            token.check()?;
            let activity = &activity.value;
            summary.total += 1;
            *summary.by_kind.entry(activity.kind).or_default() += 1;
            summary.first = Some(summary.first.map_or(activity.timestamp, |t| t.min(activity.timestamp)));
            summary.last = Some(summary.last.map_or(activity.timestamp, |t| t.max(activity.timestamp)));
        }
        Ok(summary)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::entities::TrackingRef;
    use crate::storage::MemoryBackend;
    use crate::{ActivityId, ComparisonId, ModelId};

    fn model(id: &str, kind: &str, accuracy: Option<f64>) -> Model {
        let tracking = TrackingRef {
            run_id: format!("run_{id}"),
            experiment_id: "exp_123".into(),
            tracking_uri: "http://localhost:5000".into(),
            artifact_path: "model".into(),
        };
        let mut m = Model::new(id, "ryan_001", tracking, kind, Utc::now());
        m.metrics.accuracy = accuracy;
        m
    }

    fn store() -> EntityStore<MemoryBackend> {
        let store = EntityStore::new(MemoryBackend::new());
        store.put(model("m1", "RandomForest", Some(0.9))).unwrap();
        store.put(model("m2", "RandomForest", Some(0.8))).unwrap();
        store.put(model("m3", "RandomForest", None)).unwrap();
        store.put(model("m4", "XGBoost", Some(0.95))).unwrap();
        store.put(model("m5", "LogisticRegression", Some(0.7))).unwrap();
        store
    }

    #[test]
    fn groups_sorted_by_count_then_kind() {
        let store = store();
        let groups = Aggregator::new(&store).models_by_kind(None, &CancelToken::new()).unwrap();
        let kinds: Vec<&str> = groups.iter().map(|g| g.model_kind.as_str()).collect();
        assert_eq!(kinds, ["RandomForest", "LogisticRegression", "XGBoost"]);
        assert_eq!(groups[0].count, 3);
        // m3 reports no accuracy and is left out of the mean.
        assert!((groups[0].metric_averages["accuracy"] - 0.85).abs() < 1e-9);
    }

    #[test]
    fn cancelled_token_times_out() {
        let store = store();
        let token = CancelToken::new();
        token.cancel();
        let err = Aggregator::new(&store).models_by_kind(None, &token).unwrap_err();
        assert_eq!(err, VaultError::Timeout);
    }

    #[test]
    fn expired_deadline_times_out() {
        let store = store();
        let token = CancelToken::with_timeout(Duration::ZERO);
        let err = Aggregator::new(&store)
            .user_activity_summary(&UserId::new("ryan_001"), &token)
            .unwrap_err();
        assert_eq!(err.kind(), "Timeout");
    }

    #[test]
    fn cancel_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn comparison_summary_averages_completed_only() {
        let store = store();
        for (i, status, seconds) in [
            (1, ComparisonStatus::Completed, 2.0),
            (2, ComparisonStatus::Completed, 4.0),
            (3, ComparisonStatus::Pending, 100.0),
        ] {
            let mut c = Comparison::pending(
                ComparisonId::new(format!("comp_{i}")),
                UserId::new("ryan_001"),
                "c",
                vec![ModelId::new("m1"), ModelId::new("m2")],
                Utc::now(),
            );
            c.stats.computation_time_seconds = seconds;
            if status == ComparisonStatus::Completed {
                let models = vec![
                    store.require::<Model>("m1").unwrap().value,
                    store.require::<Model>("m2").unwrap().value,
                ];
                c.result = Some(crate::engine::ComparisonEngine::compare(&models, &Default::default()).unwrap());
            }
            c.status = status;
            store.put(c).unwrap();
        }
        let summary = Aggregator::new(&store)
            .user_comparison_summary(&UserId::new("ryan_001"), &CancelToken::new())
            .unwrap();
        assert_eq!(summary.completed, 2);
        assert_eq!(summary.pending, 1);
        assert_eq!(summary.average_computation_seconds, Some(3.0));
    }

    #[test]
    fn activity_summary_counts_kinds() {
        let store = store();
        let t0 = Utc::now();
        for (i, kind) in [ActivityKind::Login, ActivityKind::ModelView, ActivityKind::ModelView]
            .into_iter()
            .enumerate()
        {
            store
                .put(UserActivity::new(
                    ActivityId::new(format!("act_{i}")),
                    UserId::new("ryan_001"),
                    kind,
                    t0 + chrono::Duration::seconds(i as i64),
                ))
                .unwrap();
        }
        let summary = Aggregator::new(&store)
            .user_activity_summary(&UserId::new("ryan_001"), &CancelToken::new())
            .unwrap();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.by_kind[&ActivityKind::ModelView], 2);
        assert_eq!(summary.first, Some(t0));
    }
}
