//! # Query Module
//!
//! Read paths over the secondary indexes.
//!
//! - Every listing starts from the most selective index the request allows
//!   and filters the rest in memory
//! - Results are deterministic: ties are always broken by identifier
//! - Page sizes are capped by [`MAX_PAGE_SIZE`]

use crate::entities::{Comparison, Document, ExplainabilityAnalysis, FairnessAnalysis, Model, User, UserActivity};
use crate::index::{IndexKey, compound_prefix, email_key, metric_key};
use crate::primitives::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use crate::store::{DocumentBackend, EntityStore};
use crate::{ActivityKind, ComparisonStatus, ModelId, ModelStatus, UserId, Versioned, VaultError};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

// =============================================================================
// FILTERS
// =============================================================================

/// Inclusive bounds on one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRange {
    pub metric: String,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl MetricRange {
    fn contains(&self, value: f64) -> bool {
        self.min.is_none_or(|lo| value >= lo) && self.max.is_none_or(|hi| value <= hi)
    }
}

/// Ordering of [`Query::list_models`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSort {
    /// Newest first.
    #[default]
    CreatedDesc,
    /// Highest value first; models without the metric come last.
    MetricDesc(String),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelFilter {
    pub user_id: Option<UserId>,
    /// `None` lists every model that is not deleted.
    pub status: Option<ModelStatus>,
    pub model_kind: Option<String>,
    pub dataset_name: Option<String>,
    pub experiment_id: Option<String>,
    pub tag: Option<String>,
    pub metric_range: Option<MetricRange>,
    pub sort: ModelSort,
    pub offset: usize,
    /// Defaults to [`DEFAULT_PAGE_SIZE`].
    pub limit: Option<usize>,
}

impl ModelFilter {
    fn matches(&self, model: &Model) -> bool {
        let status_ok = match self.status {
            Some(status) => model.status == status,
            None => !model.is_deleted(),
        };
        status_ok
            && self.user_id.as_ref().is_none_or(|u| model.user_id == *u)
            && self.model_kind.as_ref().is_none_or(|k| model.model_kind == *k)
            && self.dataset_name.as_ref().is_none_or(|d| model.dataset_name == *d)
            && self.experiment_id.as_ref().is_none_or(|e| model.tracking.experiment_id == *e)
            && self.tag.as_ref().is_none_or(|t| model.tags.contains(t))
            && self
                .metric_range
                .as_ref()
                .is_none_or(|r| model.metrics.get(&r.metric).is_some_and(|v| r.contains(v)))
    }

    fn page_size(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE)
    }
}

/// One page of a listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<Versioned<T>>,
    /// Matches before pagination.
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
}

fn by_metric_desc(metric: &str) -> impl Fn(&Versioned<Model>, &Versioned<Model>) -> Ordering + '_ {
    move |a, b| {
        let va = a.value.metrics.get(metric);
        let vb = b.value.metrics.get(metric);
        match (va, vb) {
            (Some(x), Some(y)) => y.total_cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
        .then_with(|| a.value.model_id.cmp(&b.value.model_id))
    }
}

fn newest_first<T>(mut rows: Vec<(String, Versioned<T>)>) -> Vec<Versioned<T>> {
    rows.reverse();
    rows.into_iter().map(|(_, doc)| doc).collect()
}

// =============================================================================
// QUERY
// =============================================================================

pub struct Query<'a, B> {
    store: &'a EntityStore<B>,
}

impl<'a, B: DocumentBackend> Query<'a, B> {
    pub fn new(store: &'a EntityStore<B>) -> Self {
        Self { store }
    }

    /// Filtered, sorted, paginated model listing.
    pub fn list_models(&self, filter: &ModelFilter) -> Result<Page<Model>, VaultError> {
        let mut models: Vec<Versioned<Model>> = self
            .candidates(filter)?
            .into_iter()
            .filter(|m| filter.matches(&m.value))
            .collect();

        match &filter.sort {
            ModelSort::CreatedDesc => models.sort_by(|a, b| {
                b.value
                    .created_at
                    .cmp(&a.value.created_at)
                    .then_with(|| a.value.model_id.cmp(&b.value.model_id))
            }),
            ModelSort::MetricDesc(metric) => models.sort_by(by_metric_desc(metric)),
        }

        let total = models.len();
        let limit = filter.page_size();
        let items = models.into_iter().skip(filter.offset).take(limit).collect();
        Ok(Page {
            items,
            total,
            offset: filter.offset,
            limit,
        })
    }

    /// Models from the narrowest index the filter names.
    fn candidates(&self, filter: &ModelFilter) -> Result<Vec<Versioned<Model>>, VaultError> {
        if let Some(user) = &filter.user_id {
            let rows = self
                .store
                .find_by_prefix::<Model>(IndexKey::ModelUserCreated, &compound_prefix(&[user.as_str()]))?;
            return Ok(rows.into_iter().map(|(_, m)| m).collect());
        }
        if let Some(experiment) = &filter.experiment_id {
            return self.store.find_by_index(IndexKey::ModelExperiment, experiment);
        }
        if let Some(tag) = &filter.tag {
            return self.store.find_by_index(IndexKey::ModelTag, tag);
        }
        if let Some(dataset) = &filter.dataset_name {
            return self.store.find_by_index(IndexKey::ModelDataset, dataset);
        }
        if let Some(kind) = &filter.model_kind {
            return self.store.find_by_index(IndexKey::ModelKind, kind);
        }
        if let Some(range) = &filter.metric_range {
            return self.metric_rows(range);
        }
        if let Some(status) = filter.status {
            return self.store.find_by_index(IndexKey::ModelStatus, status.as_str());
        }
        self.store.scan()
    }

    /// Index rows of one metric within the range, in ascending value order.
    fn metric_rows(&self, range: &MetricRange) -> Result<Vec<Versioned<Model>>, VaultError> {
        let lo = range.min.map(|v| metric_key(&range.metric, v));
        let hi = range.max.map(|v| metric_key(&range.metric, v));
        let rows = self
            .store
            .find_by_prefix::<Model>(IndexKey::ModelMetric, &compound_prefix(&[&range.metric]))?;
        Ok(rows
            .into_iter()
            .filter(|(key, _)| lo.as_ref().is_none_or(|lo| key >= lo) && hi.as_ref().is_none_or(|hi| key <= hi))
            .map(|(_, m)| m)
            .collect())
    }

    /// Best active models on `metric`. Ties go to the smaller id.
    pub fn top_models(&self, metric: &str, limit: usize) -> Result<Vec<Versioned<Model>>, VaultError> {
        let mut models: Vec<Versioned<Model>> = self
            .store
            .find_by_prefix::<Model>(IndexKey::ModelMetric, &compound_prefix(&[metric]))?
            .into_iter()
            .map(|(_, m)| m)
            .filter(|m| m.value.status == ModelStatus::Active)
            .collect();
        models.sort_by(by_metric_desc(metric));
        models.truncate(limit.min(MAX_PAGE_SIZE));
        Ok(models)
    }

    pub fn get_model(&self, id: &ModelId) -> Result<Versioned<Model>, VaultError> {
        self.store.require(id.as_str())
    }

    pub fn find_model_by_run(&self, run_id: &str) -> Result<Option<Versioned<Model>>, VaultError> {
        Ok(self.store.find_by_index::<Model>(IndexKey::ModelRun, run_id)?.into_iter().next())
    }

    pub fn find_user_by_email(&self, email: &str) -> Result<Option<Versioned<User>>, VaultError> {
        Ok(self
            .store
            .find_by_index::<User>(IndexKey::UserEmail, &email_key(email))?
            .into_iter()
            .next())
    }

    // -------------------------------------------------------------------------
    // Comparisons
    // -------------------------------------------------------------------------

    /// Comparisons that list `model`, newest first.
    pub fn comparisons_for_model(&self, model: &ModelId) -> Result<Vec<Versioned<Comparison>>, VaultError> {
        let rows = self
            .store
            .find_by_prefix(IndexKey::ComparisonModel, &compound_prefix(&[model.as_str()]))?;
        Ok(newest_first(rows))
    }

    /// Comparisons owned by `user`, newest first.
    pub fn comparisons_for_user(&self, user: &UserId) -> Result<Vec<Versioned<Comparison>>, VaultError> {
        let rows = self
            .store
            .find_by_prefix(IndexKey::ComparisonUser, &compound_prefix(&[user.as_str()]))?;
        Ok(newest_first(rows))
    }

    /// Used to find stale `pending` and `failed` comparisons.
    pub fn comparisons_by_status(&self, status: ComparisonStatus) -> Result<Vec<Versioned<Comparison>>, VaultError> {
        self.store.find_by_index(IndexKey::ComparisonStatus, status.as_str())
    }

    // -------------------------------------------------------------------------
    // Analyses
    // -------------------------------------------------------------------------

    pub fn explainability_for_model(&self, model: &ModelId) -> Result<Vec<Versioned<ExplainabilityAnalysis>>, VaultError> {
        self.newest_by_owner(IndexKey::ExplainabilityModel, model.as_str())
    }

    pub fn explainability_for_user(&self, user: &UserId) -> Result<Vec<Versioned<ExplainabilityAnalysis>>, VaultError> {
        self.newest_by_owner(IndexKey::ExplainabilityUser, user.as_str())
    }

    pub fn fairness_for_model(&self, model: &ModelId) -> Result<Vec<Versioned<FairnessAnalysis>>, VaultError> {
        self.newest_by_owner(IndexKey::FairnessModel, model.as_str())
    }

    pub fn fairness_for_user(&self, user: &UserId) -> Result<Vec<Versioned<FairnessAnalysis>>, VaultError> {
        self.newest_by_owner(IndexKey::FairnessUser, user.as_str())
    }

    fn newest_by_owner<T: Document>(&self, index: IndexKey, owner: &str) -> Result<Vec<Versioned<T>>, VaultError> {
        let rows = self.store.find_by_prefix(index, &compound_prefix(&[owner]))?;
        Ok(newest_first(rows))
    }

    /// Live models that carry an explainability summary, by id.
    pub fn models_with_explainability(&self) -> Result<Vec<Versioned<Model>>, VaultError> {
        Ok(self
            .store
            .scan::<Model>()?
            .into_iter()
            .filter(|m| !m.value.is_deleted() && m.value.explainability.is_some())
            .collect())
    }

    /// Live models whose demographic parity gap exceeds `threshold`,
    /// largest gap first.
    pub fn fairness_concerns(&self, threshold: f64) -> Result<Vec<Versioned<Model>>, VaultError> {
        let gap = |m: &Versioned<Model>| {
            m.value
                .fairness
                .as_ref()
                .map_or(0.0, |f| f.demographic_parity_difference.abs())
        };
        let mut models: Vec<Versioned<Model>> = self
            .store
            .scan::<Model>()?
            .into_iter()
            .filter(|m| !m.value.is_deleted() && m.value.fairness.is_some() && gap(m) > threshold)
            .collect();
        models.sort_by(|a, b| {
            gap(b)
                .total_cmp(&gap(a))
                .then_with(|| a.value.model_id.cmp(&b.value.model_id))
        });
        Ok(models)
    }

    // -------------------------------------------------------------------------
    // Activity
    // -------------------------------------------------------------------------

    /// Latest events of one user, newest first.
    pub fn recent_activity(&self, user: &UserId, limit: usize) -> Result<Vec<Versioned<UserActivity>>, VaultError> {
        let mut events: Vec<Versioned<UserActivity>> =
            newest_first(self.store.find_by_prefix(IndexKey::ActivityUserTime, &compound_prefix(&[user.as_str()]))?);
        events.truncate(limit.min(MAX_PAGE_SIZE));
        Ok(events)
    }

    /// Events of one kind across users, newest first.
    pub fn activity_by_kind(&self, kind: ActivityKind, limit: usize) -> Result<Vec<Versioned<UserActivity>>, VaultError> {
        let mut events: Vec<Versioned<UserActivity>> =
            newest_first(self.store.find_by_prefix(IndexKey::ActivityKind, &compound_prefix(&[kind.as_str()]))?);
        events.truncate(limit.min(MAX_PAGE_SIZE));
        Ok(events)
    }
}

// =============================================================================
// TESTS
// =============================================================================
