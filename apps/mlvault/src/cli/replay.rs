//! # Event Replay
//!
//! Replays a JSON array of producer events against one vault with several
//! concurrent workers, the way independent ingestion jobs, analysis
//! workers and comparison requests hit the store in production.
//!
//! Events run in phases (users, models, analyses, comparisons) so that
//! references exist before they are needed. Within a phase, events are
//! dealt round-robin to `workers` blocking tasks and interleave freely.

use super::commands::read_json_items;
use mlvault_core::{
    ComparisonRequest, ExplainabilityAnalysis, FairnessAnalysis, ModelId, ModelSubmission, Vault, VaultError,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// One producer event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplayEvent {
    User {
        user_id: String,
        email: String,
        name: String,
    },
    Model(ModelSubmission),
    Explainability(ExplainabilityAnalysis),
    Fairness(FairnessAnalysis),
    Compare {
        user_id: String,
        model_ids: Vec<String>,
        #[serde(default)]
        metric: Option<String>,
        #[serde(default)]
        idempotency_key: Option<String>,
    },
}

impl ReplayEvent {
    fn phase(&self) -> u8 {
        match self {
            ReplayEvent::User { .. } => 0,
            ReplayEvent::Model(_) => 1,
            ReplayEvent::Explainability(_) | ReplayEvent::Fairness(_) => 2,
            ReplayEvent::Compare { .. } => 3,
        }
    }

    fn apply(self, vault: &Vault) -> Result<(), VaultError> {
        match self {
            ReplayEvent::User { user_id, email, name } => {
                vault.ingest().register_user(user_id, email, name)?;
            }
            ReplayEvent::Model(submission) => {
                vault.ingest().ingest_model(submission)?;
            }
            ReplayEvent::Explainability(analysis) => {
                vault.submit_explainability(analysis)?;
            }
            ReplayEvent::Fairness(analysis) => {
                vault.submit_fairness(analysis)?;
            }
            ReplayEvent::Compare {
                user_id,
                model_ids,
                metric,
                idempotency_key,
            } => {
                let mut request = ComparisonRequest::new(user_id, model_ids.into_iter().map(ModelId::new).collect());
                request.metric = metric;
                request.idempotency_key = idempotency_key;
                vault.compare(request)?;
            }
        }
        Ok(())
    }
}

/// What a replay did. Failures are counted by error kind.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ReplayReport {
    pub applied: usize,
    pub failed: usize,
    pub errors: BTreeMap<String, usize>,
}

impl ReplayReport {
    fn record(&mut self, result: Result<(), VaultError>) {
        match result {
            Ok(()) => self.applied += 1,
            Err(e) => {
                self.failed += 1;
                *self.errors.entry(e.kind().to_string()).or_default() += 1;
            }
        }
    }
}

/// Replay the events in `file`.
pub async fn cmd_replay(vault: Vault, file: &Path, workers: usize) -> Result<ReplayReport, VaultError> {
    let events: Vec<ReplayEvent> = read_json_items(file)?;
    tracing::info!(events = events.len(), workers, "replay started");
    replay_events(vault, events, workers).await
}

/// Replay `events` phase by phase with `workers` concurrent tasks.
pub async fn replay_events(vault: Vault, events: Vec<ReplayEvent>, workers: usize) -> Result<ReplayReport, VaultError> {
    let workers = workers.max(1);
    let mut phases: BTreeMap<u8, Vec<ReplayEvent>> = BTreeMap::new();
    for event in events {
        phases.entry(event.phase()).or_default().push(event);
    }

    let mut report = ReplayReport::default();
    for (phase, events) in phases {
        let mut lanes: Vec<Vec<ReplayEvent>> = vec![Vec::new(); workers];
        for (i, event) in events.into_iter().enumerate() {
            lanes[i % workers].push(event);
        }

        let mut handles = Vec::with_capacity(workers);
        for lane in lanes.into_iter().filter(|lane| !lane.is_empty()) {
            let vault = vault.clone();
            handles.push(tokio::task::spawn_blocking(move || {
                lane.into_iter()
                    .map(|event| {
                        let result = event.apply(&vault);
                        if let Err(e) = &result {
                            tracing::warn!(phase, kind = e.kind(), error = %e, "replay event failed");
                        }
                        result
                    })
                    .collect::<Vec<_>>()
            }));
        }

        for handle in handles {
            let results = handle
                .await
                .map_err(|e| VaultError::IoError(format!("replay worker: {}", e)))?;
            for result in results {
                report.record(result);
            }
        }
        tracing::debug!(phase, applied = report.applied, failed = report.failed, "replay phase done");
    }

    tracing::info!(applied = report.applied, failed = report.failed, "replay finished");
    Ok(report)
}

pub fn print_replay_report(report: &ReplayReport, json_mode: bool) {
    if json_mode {
        println!("{}", serde_json::to_string_pretty(report).unwrap_or_default());
        return;
    }
    println!("Replay: {} applied, {} failed", report.applied, report.failed);
    for (kind, count) in &report.errors {
        println!("  {:<20} {}", kind, count);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn events_parse_by_type_tag() {
        let events: Vec<ReplayEvent> = serde_json::from_str(
            r#"[
                {"type": "user", "user_id": "ryan_001", "email": "ryan@example.com", "name": "Ryan"},
                {"type": "compare", "user_id": "ryan_001", "model_ids": ["a", "b"], "idempotency_key": "k"}
            ]"#,
        )
        .unwrap();
        assert_eq!(events[0].phase(), 0);
        assert!(matches!(
            &events[1],
            ReplayEvent::Compare { idempotency_key: Some(key), metric: None, .. } if key == "k"
        ));
    }

    #[test]
    fn report_counts_error_kinds() {
        let mut report = ReplayReport::default();
        report.record(Ok(()));
        report.record(Err(VaultError::Timeout));
        report.record(Err(VaultError::Timeout));
        assert_eq!(report.applied, 1);
        assert_eq!(report.errors["Timeout"], 2);
    }
}
