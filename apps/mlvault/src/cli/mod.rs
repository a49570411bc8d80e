//! # mlvault CLI Module
//!
//! This module implements the CLI interface for mlvault.
//!
//! ## Available Commands
//!
//! - `init` - Create a new vault database
//! - `status` - Show document counts
//! - `user` - Register users, record logins
//! - `ingest` - Ingest model submissions from a JSON file
//! - `analysis` - Submit explainability or fairness analyses from a JSON file
//! - `compare` - Compare two or more models
//! - `show` - Print one stored document
//! - `models` - List models with filters
//! - `comparisons` - List comparisons by user, model or status
//! - `aggregate` - On-demand analytics
//! - `activity` - Recent activity of a user or of one kind
//! - `replay` - Replay a JSON event file concurrently

mod commands;
mod replay;

use crate::config::AppConfig;
use clap::{Parser, Subcommand, ValueEnum};
use mlvault_core::VaultError;
use std::path::PathBuf;

pub use commands::*;
pub use replay::{ReplayEvent, ReplayReport, cmd_replay, print_replay_report, replay_events};

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// mlvault - model registry
///
/// Records trained models with their explainability and fairness analyses
/// and keeps model comparisons consistent with the models they reference.
#[derive(Parser, Debug)]
#[command(name = "mlvault")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the vault database
    #[arg(short = 'D', long, global = true, default_value = "mlvault.redb")]
    pub database: PathBuf,

    /// Storage backend: "redb" (persistent) or "memory" (volatile)
    #[arg(short = 'B', long, global = true, default_value = "redb")]
    pub backend: String,

    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new empty vault
    Init {
        /// Replace an existing database
        #[arg(short, long)]
        force: bool,
    },

    /// Show document counts per collection
    Status,

    /// Manage users
    User {
        #[command(subcommand)]
        action: UserAction,
    },

    /// Ingest model submissions (one object or an array) from a JSON file
    Ingest {
        /// Path to the input file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Submit analyses (one object or an array) from a JSON file
    Analysis {
        /// Analysis type
        #[arg(short = 't', long, value_enum)]
        kind: AnalysisKind,

        /// Path to the input file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Compare two or more models
    Compare {
        /// Requesting user
        #[arg(short, long)]
        user: String,

        /// Model ids (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        models: Vec<String>,

        /// Metric that decides the winner
        #[arg(long)]
        metric: Option<String>,

        /// Idempotency key; resubmitting the same key never double counts
        #[arg(short, long)]
        key: Option<String>,

        /// Display name
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Re-run a failed or stalled comparison
    Retry {
        /// Comparison id
        id: String,
    },

    /// Share a completed comparison with another user
    Share {
        /// Comparison id
        id: String,

        /// User to share with
        #[arg(short, long)]
        with: String,

        /// Remove the user instead
        #[arg(long)]
        revoke: bool,
    },

    /// Print one stored document as JSON
    Show {
        #[arg(value_enum)]
        kind: ShowKind,

        /// Document id
        id: String,
    },

    /// Change a model's lifecycle status
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },

    /// List models
    Models {
        #[arg(short, long)]
        user: Option<String>,

        /// active, archived or deleted (default: everything not deleted)
        #[arg(short, long)]
        status: Option<String>,

        #[arg(short = 't', long)]
        kind: Option<String>,

        #[arg(long)]
        dataset: Option<String>,

        #[arg(long)]
        experiment: Option<String>,

        #[arg(long)]
        tag: Option<String>,

        /// Metric for --min/--max and --top
        #[arg(long)]
        metric: Option<String>,

        #[arg(long)]
        min: Option<f64>,

        #[arg(long)]
        max: Option<f64>,

        /// Sort by --metric, best first
        #[arg(long)]
        top: bool,

        #[arg(long, default_value = "0")]
        offset: usize,

        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// List comparisons
    Comparisons {
        #[arg(short, long)]
        user: Option<String>,

        #[arg(short, long)]
        model: Option<String>,

        /// pending, completed or failed
        #[arg(short, long)]
        status: Option<String>,
    },

    /// On-demand analytics
    Aggregate {
        #[arg(value_enum)]
        report: Report,

        /// User for the per-user reports
        #[arg(short, long)]
        user: Option<String>,

        /// Model status filter for `kinds`
        #[arg(short, long)]
        status: Option<String>,
    },

    /// Show recent activity
    Activity {
        #[arg(short, long)]
        user: Option<String>,

        /// Activity kind, e.g. model_upload
        #[arg(short = 't', long)]
        kind: Option<String>,

        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Replay a JSON event file with concurrent producers
    Replay {
        /// Path to the event file
        #[arg(short, long)]
        file: PathBuf,

        /// Concurrent producers per phase
        #[arg(short, long, default_value = "4")]
        workers: usize,
    },
}

#[derive(Subcommand, Debug)]
pub enum UserAction {
    /// Register a new user
    Register {
        id: String,
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        name: String,
    },

    /// Record a login
    Login {
        id: String,
        #[arg(long)]
        ip: Option<String>,
        #[arg(long)]
        user_agent: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ModelAction {
    /// Archive a model
    Archive { id: String },

    /// Soft-delete a model
    Delete { id: String },

    /// Remove a soft-deleted model that no comparison references
    Purge { id: String },

    /// Count a view
    View {
        id: String,
        #[arg(short, long)]
        user: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnalysisKind {
    Explainability,
    Fairness,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShowKind {
    User,
    Model,
    Comparison,
    Explainability,
    Fairness,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Report {
    /// Model counts and metric averages per model kind
    Kinds,
    /// Comparison counts of one user
    Comparisons,
    /// Activity counts of one user
    Activity,
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli, config: AppConfig) -> Result<(), VaultError> {
    let json_mode = cli.json_mode;

    if let Some(Commands::Init { force }) = cli.command {
        return cmd_init(&cli.database, &cli.backend, config.vault, force);
    }
    let vault = open_vault(&cli.database, &cli.backend, config.vault)?;

    match cli.command {
        Some(Commands::Init { .. }) | Some(Commands::Status) | None => cmd_status(&vault, &cli.database, json_mode),
        Some(Commands::User { action }) => cmd_user(&vault, json_mode, action),
        Some(Commands::Ingest { file }) => cmd_ingest(&vault, json_mode, &file),
        Some(Commands::Analysis { kind, file }) => cmd_analysis(&vault, json_mode, kind, &file),
        Some(Commands::Compare {
            user,
            models,
            metric,
            key,
            name,
        }) => cmd_compare(&vault, json_mode, user, models, metric, key, name),
        Some(Commands::Retry { id }) => cmd_retry(&vault, json_mode, &id),
        Some(Commands::Share { id, with, revoke }) => cmd_share(&vault, json_mode, &id, &with, revoke),
        Some(Commands::Show { kind, id }) => cmd_show(&vault, kind, &id),
        Some(Commands::Model { action }) => cmd_model(&vault, json_mode, action),
        Some(Commands::Models {
            user,
            status,
            kind,
            dataset,
            experiment,
            tag,
            metric,
            min,
            max,
            top,
            offset,
            limit,
        }) => {
            let filter = build_filter(ModelArgs {
                user,
                status,
                kind,
                dataset,
                experiment,
                tag,
                metric,
                min,
                max,
                top,
                offset,
                limit,
            })?;
            cmd_models(&vault, json_mode, &filter)
        }
        Some(Commands::Comparisons { user, model, status }) => {
            cmd_comparisons(&vault, json_mode, user, model, status)
        }
        Some(Commands::Aggregate { report, user, status }) => cmd_aggregate(&vault, report, user, status),
        Some(Commands::Activity { user, kind, limit }) => cmd_activity(&vault, json_mode, user, kind, limit),
        Some(Commands::Replay { file, workers }) => {
            let report = cmd_replay(vault, &file, workers).await?;
            print_replay_report(&report, json_mode);
            Ok(())
        }
    }
}
