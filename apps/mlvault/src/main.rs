//! # mlvault - Model Registry
//!
//! The main binary for the mlvault model registry.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                 apps/mlvault (THE BINARY)               │
//! │                                                         │
//! │  ┌─────────────┐   ┌─────────────┐   ┌──────────────┐   │
//! │  │    CLI      │   │   Config    │   │    Replay    │   │
//! │  │   (clap)    │   │   (toml)    │   │   (tokio)    │   │
//! │  └──────┬──────┘   └──────┬──────┘   └──────┬───────┘   │
//! │         └─────────────────┼─────────────────┘           │
//! │                           ▼                             │
//! │                  ┌─────────────────┐                    │
//! │                  │  mlvault-core   │                    │
//! │                  │   (THE STORE)   │                    │
//! │                  └─────────────────┘                    │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! mlvault init
//! mlvault user register ryan_001 -e ryan@example.com -n Ryan
//! mlvault ingest -f models.json
//! mlvault compare -u ryan_001 -m model_12345,model_12346 --metric accuracy -k 67890
//! mlvault aggregate kinds
//! mlvault replay -f events.json -w 8
//! ```

use clap::Parser;
use mlvault::cli;
use mlvault::config::{AppConfig, LogFormat};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();

    // Tracing is not up yet, so configuration errors go straight to stderr.
    let mut config = match AppConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    };
    config.apply_env();

    let default_filter = if cli.verbose {
        "mlvault=debug,mlvault_core=debug"
    } else {
        config.log.filter_or_default()
    };
    let filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());

    // Logs go to stderr; stdout carries command output.
    match config.log.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    if let Err(e) = cli::execute(cli, config).await {
        tracing::error!(kind = e.kind(), "Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the startup banner.
fn print_banner() {
    println!(
        r#"
  mlvault v{}
  models · explainability · fairness · comparisons
"#,
        env!("CARGO_PKG_VERSION")
    );
}
