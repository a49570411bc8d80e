//! # mlvault
//!
//! Command-line front end of the mlvault model registry.
//!
//! The binary in `main.rs` only sets up tracing and parses arguments; the
//! commands and the configuration loader live here so that integration
//! tests can drive them directly.

pub mod cli;
pub mod config;
