//! # Vault
//!
//! Shared handle over one store and its configuration.
//!
//! `Vault` is cheap to clone and safe to share across threads. Every
//! producer and reader in the crate borrows the same [`EntityStore`], so
//! all coordination happens through the store's version checks.

use crate::aggregate::{Aggregator, CancelToken};
use crate::analysis::{AnalysisIngest, AnalysisOutcome};
use crate::config::VaultConfig;
use crate::coordinator::{ComparisonOutcome, ComparisonRequest, ConsistencyCoordinator};
use crate::entities::{ExplainabilityAnalysis, FairnessAnalysis};
use crate::ingest::Ingest;
use crate::query::Query;
use crate::storage::StorageBackend;
use crate::store::EntityStore;
use crate::{ActivityKind, AnalysisStatus, EntityKind, VaultError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Document counts per collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VaultStats {
    pub persistent: bool,
    pub documents: BTreeMap<&'static str, usize>,
}

#[derive(Debug, Clone)]
pub struct Vault {
    store: Arc<EntityStore<StorageBackend>>,
    config: Arc<VaultConfig>,
}

impl Vault {
    /// A volatile vault.
    pub fn in_memory(config: VaultConfig) -> Result<Self, VaultError> {
        Self::with_backend(StorageBackend::default(), config)
    }

    /// A redb-backed vault at `path`, created if missing.
    pub fn open(path: impl AsRef<Path>, config: VaultConfig) -> Result<Self, VaultError> {
        let path = path.as_ref();
        let vault = Self::with_backend(StorageBackend::persistent(path)?, config)?;
        tracing::info!(path = %path.display(), "vault opened");
        Ok(vault)
    }

    fn with_backend(backend: StorageBackend, config: VaultConfig) -> Result<Self, VaultError> {
        config.check()?;
        Ok(Self {
            store: Arc::new(EntityStore::with_policy(backend, config.validation)),
            config: Arc::new(config),
        })
    }

    pub fn store(&self) -> &EntityStore<StorageBackend> {
        &self.store
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn coordinator(&self) -> ConsistencyCoordinator<'_, StorageBackend> {
        ConsistencyCoordinator::new(&self.store, &self.config)
    }

    pub fn ingest(&self) -> Ingest<'_, StorageBackend> {
        Ingest::new(&self.store, &self.config)
    }

    pub fn analyses(&self) -> AnalysisIngest<'_, StorageBackend> {
        AnalysisIngest::new(&self.store, &self.config)
    }

    pub fn query(&self) -> Query<'_, StorageBackend> {
        Query::new(&self.store)
    }

    pub fn aggregator(&self) -> Aggregator<'_, StorageBackend> {
        Aggregator::new(&self.store)
    }

    /// A token carrying the configured aggregation deadline.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        match self.config.aggregation_timeout() {
            Some(timeout) => CancelToken::with_timeout(timeout),
            None => CancelToken::new(),
        }
    }

    /// Create a comparison and log it for the requester.
    pub fn compare(&self, request: ComparisonRequest) -> Result<ComparisonOutcome, VaultError> {
        let user = request.user_id.clone();
        let outcome = self.coordinator().create_comparison(request)?;
        if !outcome.replayed {
            self.ingest().log_activity(
                &user,
                ActivityKind::ComparisonCreated,
                BTreeMap::from([(
                    "comparison_id".to_string(),
                    outcome.comparison.value.comparison_id.to_string(),
                )]),
            );
        }
        Ok(outcome)
    }

    /// Store an explainability analysis and log it once completed.
    pub fn submit_explainability(
        &self,
        analysis: ExplainabilityAnalysis,
    ) -> Result<AnalysisOutcome<ExplainabilityAnalysis>, VaultError> {
        let outcome = self.analyses().submit_explainability(analysis)?;
        let stored = &outcome.analysis.value;
        if stored.status == AnalysisStatus::Completed {
            self.ingest().log_activity(
                &stored.user_id,
                ActivityKind::ExplainabilityGenerated,
                BTreeMap::from([
                    ("analysis_id".to_string(), stored.analysis_id.to_string()),
                    ("model_id".to_string(), stored.model_id.to_string()),
                ]),
            );
        }
        Ok(outcome)
    }

    /// Store a fairness analysis and log it once completed.
    pub fn submit_fairness(&self, analysis: FairnessAnalysis) -> Result<AnalysisOutcome<FairnessAnalysis>, VaultError> {
        let outcome = self.analyses().submit_fairness(analysis)?;
        let stored = &outcome.analysis.value;
        if stored.status == AnalysisStatus::Completed {
            self.ingest().log_activity(
                &stored.user_id,
                ActivityKind::FairnessGenerated,
                BTreeMap::from([
                    ("analysis_id".to_string(), stored.analysis_id.to_string()),
                    ("model_id".to_string(), stored.model_id.to_string()),
                ]),
            );
        }
        Ok(outcome)
    }

    pub fn stats(&self) -> Result<VaultStats, VaultError> {
        let mut documents = BTreeMap::new();
        for kind in EntityKind::ALL {
            documents.insert(kind.collection(), self.store.count(kind)?);
        }
        Ok(VaultStats {
            persistent: self.store.backend().is_persistent(),
            documents,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::ModelId;
    use crate::entities::{Model, TrackingRef};

    #[test]
    fn invalid_config_is_rejected() {
        let config = VaultConfig {
            conflict_retries: 0,
            ..VaultConfig::default()
        };
        assert!(Vault::in_memory(config).is_err());
    }

    #[test]
    fn compare_logs_activity_once() {
        let vault = Vault::in_memory(VaultConfig::default()).unwrap();
        vault.ingest().register_user("ryan_001", "ryan@example.com", "Ryan").unwrap();
        for id in ["model_a", "model_b"] {
            let tracking = TrackingRef {
                run_id: format!("run_{id}"),
                experiment_id: "exp_123".into(),
                tracking_uri: "http://localhost:5000".into(),
                artifact_path: "model".into(),
            };
            let mut m = Model::new(id, "ryan_001", tracking, "RandomForest", chrono::Utc::now());
            m.metrics.accuracy = Some(0.9);
            vault.store().put(m).unwrap();
        }
        let request = ComparisonRequest::new("ryan_001", vec![ModelId::new("model_a"), ModelId::new("model_b")])
            .with_idempotency_key("once");
        vault.compare(request.clone()).unwrap();
        vault.compare(request).unwrap();

        let stats = vault.stats().unwrap();
        assert!(!stats.persistent);
        assert_eq!(stats.documents["comparisons"], 1);
        assert_eq!(stats.documents["user_activities"], 1);
    }

    #[test]
    fn clones_share_the_store() {
        let vault = Vault::in_memory(VaultConfig::default()).unwrap();
        let clone = vault.clone();
        clone.ingest().register_user("ryan_001", "ryan@example.com", "Ryan").unwrap();
        assert_eq!(vault.store().count(EntityKind::User).unwrap(), 1);
    }
}
