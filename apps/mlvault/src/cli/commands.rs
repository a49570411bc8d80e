//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use super::{AnalysisKind, ModelAction, Report, ShowKind, UserAction};
use mlvault_core::{
    ActivityKind, ActivityOrigin, Comparison, ComparisonId, ComparisonRequest, ComparisonStatus,
    ExplainabilityAnalysis, FairnessAnalysis, MetricRange, Model, ModelFilter, ModelId, ModelSort, ModelStatus,
    ModelSubmission, User, UserId, Vault, VaultConfig, VaultError, Versioned,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

// =============================================================================
// FILE LIMITS
// =============================================================================

/// Maximum size of a JSON input file (100 MB).
const MAX_INPUT_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Resolve `path` to a regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, VaultError> {
    let canonical = path
        .canonicalize()
        .map_err(|e| VaultError::IoError(format!("Invalid file path '{}': {}", path.display(), e)))?;

    if !canonical.is_file() {
        return Err(VaultError::IoError(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }
    Ok(canonical)
}

fn validate_file_size(path: &Path, max_size: u64) -> Result<(), VaultError> {
    let metadata =
        std::fs::metadata(path).map_err(|e| VaultError::IoError(format!("Cannot read file metadata: {}", e)))?;

    if metadata.len() > max_size {
        return Err(VaultError::SerializationError(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

/// Read a JSON file holding one `T` or an array of them.
pub fn read_json_items<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, VaultError> {
    let path = validate_file_path(path)?;
    validate_file_size(&path, MAX_INPUT_FILE_SIZE)?;
    let contents = std::fs::read(&path).map_err(|e| VaultError::IoError(format!("Read file: {}", e)))?;

    let value: serde_json::Value =
        serde_json::from_slice(&contents).map_err(|e| VaultError::SerializationError(e.to_string()))?;
    let values = match value {
        serde_json::Value::Array(items) => items,
        other => vec![other],
    };
    values
        .into_iter()
        .enumerate()
        .map(|(i, v)| {
            serde_json::from_value(v).map_err(|e| VaultError::SerializationError(format!("item {}: {}", i, e)))
        })
        .collect()
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

// =============================================================================
// VAULT LIFECYCLE
// =============================================================================

/// Open the vault named by the global flags.
pub fn open_vault(db_path: &Path, backend: &str, config: VaultConfig) -> Result<Vault, VaultError> {
    match backend {
        "redb" => Vault::open(db_path, config),
        "memory" => Vault::in_memory(config),
        other => Err(VaultError::validation(
            "backend",
            format!("unknown backend `{}`, use redb or memory", other),
        )),
    }
}

/// Create an empty vault.
pub fn cmd_init(db_path: &Path, backend: &str, config: VaultConfig, force: bool) -> Result<(), VaultError> {
    if backend == "redb" && db_path.exists() {
        if !force {
            return Err(VaultError::validation(
                "database",
                format!("'{}' already exists, use --force to replace it", db_path.display()),
            ));
        }
        std::fs::remove_file(db_path).map_err(|e| VaultError::IoError(format!("Remove db: {}", e)))?;
        tracing::warn!(path = %db_path.display(), "existing database removed");
    }
    open_vault(db_path, backend, config)?;
    println!("Initialized empty vault at {:?} ({})", db_path, backend);
    Ok(())
}

/// Show document counts.
pub fn cmd_status(vault: &Vault, db_path: &Path, json_mode: bool) -> Result<(), VaultError> {
    let stats = vault.stats()?;

    if json_mode {
        let output = serde_json::json!({
            "database": db_path.to_string_lossy(),
            "persistent": stats.persistent,
            "documents": stats.documents,
        });
        print_json(&output);
        return Ok(());
    }

    println!("mlvault Status");
    println!("==============");
    println!("Database:   {:?}", db_path);
    println!("Persistent: {}", stats.persistent);
    println!();
    for (collection, count) in &stats.documents {
        println!("{:<22} {}", collection, count);
    }
    Ok(())
}

// =============================================================================
// PRODUCERS
// =============================================================================

pub fn cmd_user(vault: &Vault, json_mode: bool, action: UserAction) -> Result<(), VaultError> {
    let user = match action {
        UserAction::Register { id, email, name } => vault.ingest().register_user(id, email, name)?,
        UserAction::Login { id, ip, user_agent } => {
            let origin = ActivityOrigin {
                ip_address: ip,
                user_agent,
            };
            vault.ingest().record_login(&UserId::new(id), origin)?
        }
    };
    if json_mode {
        print_json(&user);
    } else {
        println!("User {} <{}> (version {})", user.value.user_id, user.value.email, user.version);
    }
    Ok(())
}

/// Ingest model submissions from a file.
pub fn cmd_ingest(vault: &Vault, json_mode: bool, file: &Path) -> Result<(), VaultError> {
    tracing::info!("Ingesting models from {:?}", file);
    let submissions: Vec<ModelSubmission> = read_json_items(file)?;

    let mut created = 0usize;
    let mut updated = 0usize;
    let mut models = Vec::with_capacity(submissions.len());
    for submission in submissions {
        let outcome = vault.ingest().ingest_model(submission)?;
        if outcome.created {
            created += 1;
        } else {
            updated += 1;
        }
        models.push(outcome.model);
    }

    if json_mode {
        print_json(&serde_json::json!({
            "created": created,
            "updated": updated,
            "models": models,
        }));
    } else {
        for model in &models {
            println!(
                "{} run={} kind={} (version {})",
                model.value.model_id, model.value.tracking.run_id, model.value.model_kind, model.version
            );
        }
        println!("{} created, {} updated", created, updated);
    }
    Ok(())
}

/// Submit analyses from a file.
pub fn cmd_analysis(vault: &Vault, json_mode: bool, kind: AnalysisKind, file: &Path) -> Result<(), VaultError> {
    tracing::info!("Submitting {:?} analyses from {:?}", kind, file);
    let mut rows = Vec::new();
    match kind {
        AnalysisKind::Explainability => {
            for analysis in read_json_items::<ExplainabilityAnalysis>(file)? {
                let outcome = vault.submit_explainability(analysis)?;
                rows.push(serde_json::json!({
                    "analysis_id": outcome.analysis.value.analysis_id,
                    "model_id": outcome.analysis.value.model_id,
                    "status": outcome.analysis.value.status,
                    "summary_updated": outcome.summary_updated,
                }));
            }
        }
        AnalysisKind::Fairness => {
            for analysis in read_json_items::<FairnessAnalysis>(file)? {
                let outcome = vault.submit_fairness(analysis)?;
                rows.push(serde_json::json!({
                    "analysis_id": outcome.analysis.value.analysis_id,
                    "model_id": outcome.analysis.value.model_id,
                    "status": outcome.analysis.value.status,
                    "summary_updated": outcome.summary_updated,
                    "bias_detected": outcome.analysis.value.bias_detected,
                }));
            }
        }
    }

    if json_mode {
        print_json(&rows);
    } else {
        for row in &rows {
            println!(
                "{} -> {} [{}] summary_updated={}",
                row["analysis_id"], row["model_id"], row["status"], row["summary_updated"]
            );
        }
    }
    Ok(())
}

// =============================================================================
// COMPARISONS
// =============================================================================

fn print_comparison(comparison: &Versioned<Comparison>, json_mode: bool) {
    if json_mode {
        print_json(comparison);
        return;
    }
    let c = &comparison.value;
    println!("Comparison {} ({})", c.comparison_id, c.name);
    println!("  Status:  {}", c.status);
    println!(
        "  Models:  {}",
        c.model_ids.iter().map(ModelId::as_str).collect::<Vec<_>>().join(", ")
    );
    if let Some(result) = &c.result {
        if let Some(winner) = result.winner() {
            println!("  Winner:  {} ({} = {:.4})", winner.model_id, winner.metric, winner.value);
        }
        if let Some(fairer) = result.fairer_model() {
            println!("  Fairer:  {}", fairer);
        }
        for omitted in &result.omitted {
            println!("  Omitted: {} ({})", omitted.axis, omitted.reason);
        }
    }
    if let Some(failure) = &c.failure {
        println!("  Failure: {} - {}", failure.kind, failure.detail);
    }
}

/// Request a comparison.
pub fn cmd_compare(
    vault: &Vault,
    json_mode: bool,
    user: String,
    models: Vec<String>,
    metric: Option<String>,
    key: Option<String>,
    name: Option<String>,
) -> Result<(), VaultError> {
    let mut request = ComparisonRequest::new(user, models.into_iter().map(ModelId::new).collect());
    request.metric = metric;
    request.idempotency_key = key;
    request.name = name;

    let outcome = vault.compare(request)?;
    if !json_mode && outcome.replayed {
        println!("(replayed existing comparison)");
    }
    print_comparison(&outcome.comparison, json_mode);
    Ok(())
}

pub fn cmd_retry(vault: &Vault, json_mode: bool, id: &str) -> Result<(), VaultError> {
    let outcome = vault.coordinator().retry_comparison(&ComparisonId::new(id))?;
    print_comparison(&outcome.comparison, json_mode);
    Ok(())
}

pub fn cmd_share(vault: &Vault, json_mode: bool, id: &str, with: &str, revoke: bool) -> Result<(), VaultError> {
    let id = ComparisonId::new(id);
    let with = UserId::new(with);
    let comparison = if revoke {
        vault.ingest().unshare_comparison(&id, &with)?
    } else {
        vault.ingest().share_comparison(&id, &with)?
    };
    if json_mode {
        print_json(&comparison);
    } else {
        let shared: Vec<&str> = comparison.value.shared_with.iter().map(UserId::as_str).collect();
        println!("Comparison {} shared with: [{}]", comparison.value.comparison_id, shared.join(", "));
    }
    Ok(())
}

// =============================================================================
// READS
// =============================================================================

/// Print one stored document.
pub fn cmd_show(vault: &Vault, kind: ShowKind, id: &str) -> Result<(), VaultError> {
    let store = vault.store();
    match kind {
        ShowKind::User => print_json(&store.require::<User>(id)?),
        ShowKind::Model => print_json(&store.require::<Model>(id)?),
        ShowKind::Comparison => print_json(&vault.ingest().record_comparison_view(&ComparisonId::new(id))?),
        ShowKind::Explainability => print_json(&store.require::<ExplainabilityAnalysis>(id)?),
        ShowKind::Fairness => print_json(&store.require::<FairnessAnalysis>(id)?),
    }
    Ok(())
}

pub fn cmd_model(vault: &Vault, json_mode: bool, action: ModelAction) -> Result<(), VaultError> {
    let ingest = vault.ingest();
    let model = match action {
        ModelAction::Archive { id } => ingest.archive_model(&ModelId::new(id))?,
        ModelAction::Delete { id } => ingest.soft_delete_model(&ModelId::new(id))?,
        ModelAction::Purge { id } => {
            ingest.purge_model(&ModelId::new(id.as_str()))?;
            println!("Model {} purged", id);
            return Ok(());
        }
        ModelAction::View { id, user } => ingest.record_model_view(&ModelId::new(id), &UserId::new(user))?,
    };
    if json_mode {
        print_json(&model);
    } else {
        println!(
            "Model {} is {} (views {}, comparisons {})",
            model.value.model_id, model.value.status, model.value.view_count, model.value.comparison_count
        );
    }
    Ok(())
}

/// Raw `models` arguments before parsing.
#[derive(Debug, Default)]
pub struct ModelArgs {
    pub user: Option<String>,
    pub status: Option<String>,
    pub kind: Option<String>,
    pub dataset: Option<String>,
    pub experiment: Option<String>,
    pub tag: Option<String>,
    pub metric: Option<String>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub top: bool,
    pub offset: usize,
    pub limit: Option<usize>,
}

/// Turn `models` arguments into a filter.
pub fn build_filter(args: ModelArgs) -> Result<ModelFilter, VaultError> {
    let status = args.status.as_deref().map(str::parse::<ModelStatus>).transpose()?;
    let bounded = args.min.is_some() || args.max.is_some();
    if (bounded || args.top) && args.metric.is_none() {
        return Err(VaultError::validation("metric", "--min, --max and --top need --metric"));
    }

    let metric_range = match (&args.metric, bounded) {
        (Some(metric), true) => Some(MetricRange {
            metric: metric.clone(),
            min: args.min,
            max: args.max,
        }),
        _ => None,
    };
    let sort = match (&args.metric, args.top) {
        (Some(metric), true) => ModelSort::MetricDesc(metric.clone()),
        _ => ModelSort::CreatedDesc,
    };

    Ok(ModelFilter {
        user_id: args.user.map(UserId::new),
        status,
        model_kind: args.kind,
        dataset_name: args.dataset,
        experiment_id: args.experiment,
        tag: args.tag,
        metric_range,
        sort,
        offset: args.offset,
        limit: args.limit,
    })
}

pub fn cmd_models(vault: &Vault, json_mode: bool, filter: &ModelFilter) -> Result<(), VaultError> {
    let page = vault.query().list_models(filter)?;

    if json_mode {
        print_json(&serde_json::json!({
            "total": page.total,
            "offset": page.offset,
            "limit": page.limit,
            "items": page.items,
        }));
        return Ok(());
    }

    for model in &page.items {
        let m = &model.value;
        let accuracy = m
            .metrics
            .accuracy
            .map_or_else(|| "-".to_string(), |a| format!("{:.4}", a));
        println!(
            "{:<20} {:<18} {:<12} acc={:<8} status={}",
            m.model_id, m.model_kind, m.dataset_name, accuracy, m.status
        );
    }
    println!(
        "showing {} of {} (offset {})",
        page.items.len(),
        page.total,
        page.offset
    );
    Ok(())
}

pub fn cmd_comparisons(
    vault: &Vault,
    json_mode: bool,
    user: Option<String>,
    model: Option<String>,
    status: Option<String>,
) -> Result<(), VaultError> {
    let query = vault.query();
    let comparisons = match (user, model, status) {
        (Some(user), None, None) => query.comparisons_for_user(&UserId::new(user))?,
        (None, Some(model), None) => query.comparisons_for_model(&ModelId::new(model))?,
        (None, None, Some(status)) => query.comparisons_by_status(status.parse::<ComparisonStatus>()?)?,
        _ => {
            return Err(VaultError::validation(
                "comparisons",
                "give exactly one of --user, --model or --status",
            ));
        }
    };

    if json_mode {
        print_json(&comparisons);
        return Ok(());
    }
    for comparison in &comparisons {
        let c = &comparison.value;
        let winner = c
            .result
            .as_ref()
            .and_then(|r| r.winner())
            .map_or_else(|| "-".to_string(), |w| w.model_id.to_string());
        println!(
            "{:<40} {:<10} models={} winner={}",
            c.comparison_id,
            c.status,
            c.model_ids.len(),
            winner
        );
    }
    Ok(())
}

/// Aggregations are always printed as JSON.
pub fn cmd_aggregate(
    vault: &Vault,
    report: Report,
    user: Option<String>,
    status: Option<String>,
) -> Result<(), VaultError> {
    let token = vault.cancel_token();
    let aggregator = vault.aggregator();
    let require_user = || {
        user.clone()
            .map(UserId::new)
            .ok_or_else(|| VaultError::validation("user", "this report needs --user"))
    };

    match report {
        Report::Kinds => {
            let status = status.as_deref().map(str::parse::<ModelStatus>).transpose()?;
            print_json(&aggregator.models_by_kind(status, &token)?);
        }
        Report::Comparisons => print_json(&aggregator.user_comparison_summary(&require_user()?, &token)?),
        Report::Activity => print_json(&aggregator.user_activity_summary(&require_user()?, &token)?),
    }
    Ok(())
}

pub fn cmd_activity(
    vault: &Vault,
    json_mode: bool,
    user: Option<String>,
    kind: Option<String>,
    limit: usize,
) -> Result<(), VaultError> {
    let query = vault.query();
    let events = match (user, kind) {
        (Some(user), None) => query.recent_activity(&UserId::new(user), limit)?,
        (None, Some(kind)) => query.activity_by_kind(kind.parse::<ActivityKind>()?, limit)?,
        _ => {
            return Err(VaultError::validation("activity", "give exactly one of --user or --kind"));
        }
    };

    if json_mode {
        print_json(&events);
        return Ok(());
    }
    for event in &events {
        let a = &event.value;
        let details: Vec<String> = a.details.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        println!(
            "{} {:<10} {:<24} {}",
            a.timestamp.to_rfc3339(),
            a.user_id,
            a.kind,
            details.join(" ")
        );
    }
    Ok(())
}
