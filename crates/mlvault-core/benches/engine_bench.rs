//! # Engine Benchmarks
//!
//! Comparison engine and staged-commit throughput.
//!
//! Run with: `cargo bench -p mlvault-core`

use chrono::Utc;
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use mlvault_core::{
    CompareOptions, ComparisonEngine, ComparisonRequest, Model, ModelId, TrackingRef, User, Vault, VaultConfig,
};
use std::hint::black_box;

/// A model reporting accuracy and f1 with `features` weighted features.
fn create_model(i: usize, features: usize) -> Model {
    let tracking = TrackingRef {
        run_id: format!("run_{i:05}"),
        experiment_id: "exp_bench".into(),
        tracking_uri: "http://localhost:5000".into(),
        artifact_path: "model".into(),
    };
    let mut model = Model::new(format!("model_{i:05}"), "bench_user", tracking, "RandomForest", Utc::now());
    model.metrics.accuracy = Some(0.5 + (i % 50) as f64 / 100.0);
    model.metrics.f1_score = Some(0.4 + (i % 40) as f64 / 100.0);
    for f in 0..features {
        let name = format!("feature_{f:03}");
        model
            .features
            .feature_importance
            .insert(name.clone(), ((i + f) % 17) as f64 / 17.0);
        model.features.feature_names.push(name);
    }
    model
}

fn seeded_vault(models: usize) -> Vault {
    let vault = Vault::in_memory(VaultConfig::default()).expect("vault");
    vault
        .store()
        .put(User::new("bench_user", "bench@example.com", "Bench", Utc::now()))
        .expect("user");
    for i in 0..models {
        vault.store().put(create_model(i, 8)).expect("model");
    }
    vault
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_engine_models(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_models");

    for size in [2, 5, 10].iter() {
        let models: Vec<Model> = (0..*size).map(|i| create_model(i, 20)).collect();
        group.bench_with_input(BenchmarkId::from_parameter(size), &models, |b, models| {
            b.iter(|| black_box(ComparisonEngine::compare(models, &CompareOptions::default())));
        });
    }

    group.finish();
}

fn bench_engine_features(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_features");

    for features in [10, 50, 200].iter() {
        let models: Vec<Model> = (0..3).map(|i| create_model(i, *features)).collect();
        group.bench_with_input(BenchmarkId::from_parameter(features), &models, |b, models| {
            b.iter(|| black_box(ComparisonEngine::compare(models, &CompareOptions::default())));
        });
    }

    group.finish();
}

fn bench_staged_commit(c: &mut Criterion) {
    let vault = seeded_vault(2);
    let pair = vec![ModelId::new("model_00000"), ModelId::new("model_00001")];

    c.bench_function("staged_commit", |b| {
        b.iter(|| black_box(vault.compare(ComparisonRequest::new("bench_user", pair.clone()))));
    });
}

fn bench_replay(c: &mut Criterion) {
    let vault = seeded_vault(2);
    let request = ComparisonRequest::new(
        "bench_user",
        vec![ModelId::new("model_00000"), ModelId::new("model_00001")],
    )
    .with_idempotency_key("bench");
    vault.compare(request.clone()).expect("first");

    c.bench_function("idempotent_replay", |b| {
        b.iter(|| black_box(vault.compare(request.clone())));
    });
}

fn bench_top_models(c: &mut Criterion) {
    let mut group = c.benchmark_group("top_models");

    for size in [100, 1000].iter() {
        let vault = seeded_vault(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &vault, |b, vault| {
            b.iter(|| black_box(vault.query().top_models("accuracy", 10)));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_engine_models,
    bench_engine_features,
    bench_staged_commit,
    bench_replay,
    bench_top_models,
);
criterion_main!(benches);
