//! Command-line interface.
//!
//! Loads configuration and installs tracing; the HTTP surface that would
//! actually serve these components is external to this crate.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Token-issuing OIDC gateway core.
#[derive(Parser, Debug)]
#[command(name = "token-gateway")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML).
    #[arg(short, long, default_value = "config.yaml", env = "GATEWAY_CONFIG_PATH")]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error). Overridden by `RUST_LOG` if set.
    #[arg(long, env = "GATEWAY_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Log format (text, json).
    #[arg(long, env = "GATEWAY_LOG_FORMAT")]
    pub log_format: Option<String>,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load configuration, install tracing, and initialize the core
    /// components, ready for an external HTTP layer to drive them.
    Serve,
    /// Load and validate configuration, then exit.
    Config,
}
