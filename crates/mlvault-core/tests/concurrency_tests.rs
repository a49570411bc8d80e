//! # Concurrency Tests
//!
//! Many producers against one shared store, on both backends. No locks are
//! held across documents; every result below must hold under any
//! interleaving.

use chrono::{Duration, TimeZone, Utc};
use mlvault_core::{
    AnalysisId, AnalysisStatus, ComparisonRequest, ComparisonStatus, ExplainabilityAnalysis, ExplainabilityConfig,
    Model, ModelId, TrackingRef, User, UserId, Vault, VaultConfig,
};
use std::collections::BTreeMap;
use std::thread;

const THREADS: usize = 8;

fn seed(vault: &Vault) {
    vault
        .store()
        .put(User::new("ryan_001", "ryan@example.com", "Ryan", Utc::now()))
        .expect("user");
    for (id, accuracy) in [("model_12345", 0.9018), ("model_12346", 0.8913)] {
        let tracking = TrackingRef {
            run_id: format!("run_{id}"),
            experiment_id: "exp_123".into(),
            tracking_uri: "http://localhost:5000".into(),
            artifact_path: "model".into(),
        };
        let mut model = Model::new(id, "ryan_001", tracking, "RandomForest", Utc::now());
        model.metrics.accuracy = Some(accuracy);
        vault.store().put(model).expect("model");
    }
}

/// Retries generously so that contention alone never exhausts the budget.
fn config() -> VaultConfig {
    VaultConfig {
        conflict_retries: 64,
        retry_budget: 8,
        ..VaultConfig::default()
    }
}

fn memory_vault() -> Vault {
    let vault = Vault::in_memory(config()).expect("vault");
    seed(&vault);
    vault
}

fn pair() -> Vec<ModelId> {
    vec![ModelId::new("model_12345"), ModelId::new("model_12346")]
}

fn count(vault: &Vault, id: &str) -> u64 {
    vault.store().require::<Model>(id).expect("model").value.comparison_count
}

fn same_key_increments_once(vault: &Vault) {
    thread::scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                let request = ComparisonRequest::new("ryan_001", pair()).with_idempotency_key("67890");
                // A loser may see the staged doc mid-flight and resume it.
                vault.compare(request).expect("compare");
            });
        }
    });
    assert_eq!(count(vault, "model_12345"), 1);
    assert_eq!(count(vault, "model_12346"), 1);
    let completed = vault
        .query()
        .comparisons_by_status(ComparisonStatus::Completed)
        .expect("completed");
    assert_eq!(completed.len(), 1);
}

fn distinct_comparisons_all_count(vault: &Vault) {
    thread::scope(|s| {
        for i in 0..THREADS {
            s.spawn(move || {
                let request = ComparisonRequest::new("ryan_001", pair()).with_idempotency_key(format!("run{i}"));
                vault.compare(request).expect("compare");
            });
        }
    });
    assert_eq!(count(vault, "model_12345"), THREADS as u64);
    assert_eq!(count(vault, "model_12346"), THREADS as u64);
}

#[test]
fn memory_same_key_increments_once() {
    same_key_increments_once(&memory_vault());
}

#[test]
fn memory_distinct_comparisons_all_count() {
    distinct_comparisons_all_count(&memory_vault());
}

#[test]
fn redb_same_key_increments_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let vault = Vault::open(dir.path().join("vault.redb"), config()).expect("open");
    seed(&vault);
    same_key_increments_once(&vault);
}

#[test]
fn redb_distinct_comparisons_all_count() {
    let dir = tempfile::tempdir().expect("tempdir");
    let vault = Vault::open(dir.path().join("vault.redb"), config()).expect("open");
    seed(&vault);
    distinct_comparisons_all_count(&vault);
}

#[test]
fn concurrent_views_are_not_lost() {
    let vault = memory_vault();
    let id = ModelId::new("model_12345");
    let viewer = UserId::new("ryan_001");
    thread::scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                for _ in 0..10 {
                    vault.ingest().record_model_view(&id, &viewer).expect("view");
                }
            });
        }
    });
    let model = vault.store().require::<Model>("model_12345").expect("model");
    assert_eq!(model.value.view_count, (THREADS * 10) as u64);
}

#[test]
fn out_of_order_analyses_leave_the_newest_summary() {
    let vault = memory_vault();
    let base = Utc
        .with_ymd_and_hms(2025, 9, 17, 8, 0, 0)
        .single()
        .expect("timestamp");

    thread::scope(|s| {
        // Spawn newest first so the writes tend to land out of order.
        for i in (0..THREADS).rev() {
            let vault = vault.clone();
            s.spawn(move || {
                let at = base + Duration::minutes(i as i64);
                let value = 0.1 * (i as f64 + 1.0);
                let analysis = ExplainabilityAnalysis {
                    analysis_id: AnalysisId::new(format!("shap_{i}")),
                    model_id: ModelId::new("model_12345"),
                    user_id: UserId::new("ryan_001"),
                    run_id: "run_model_12345".into(),
                    config: ExplainabilityConfig::default(),
                    base_value: 0.38,
                    feature_values: BTreeMap::from([("Age".to_string(), vec![value, -value])]),
                    feature_summary: BTreeMap::new(),
                    sample_explanations: Vec::new(),
                    plots: BTreeMap::new(),
                    computed_at: at,
                    computation_time_seconds: 1.0,
                    explainer_type: "TreeExplainer".into(),
                    status: AnalysisStatus::Completed,
                    created_at: at,
                    updated_at: at,
                };
                vault.submit_explainability(analysis).expect("submit");
            });
        }
    });

    let summary = vault
        .store()
        .require::<Model>("model_12345")
        .expect("model")
        .value
        .explainability
        .expect("summary");
    assert_eq!(summary.analysis_id, AnalysisId::new(format!("shap_{}", THREADS - 1)));
    assert_eq!(summary.computed_at, base + Duration::minutes(THREADS as i64 - 1));
}
