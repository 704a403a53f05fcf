//! CLI argument types.
//!
//! Defined separately from `main.rs` so integration tests can construct and
//! parse them directly.
//!
//! The binary has two subcommand groups (`auth`, `logs`) and a default wrap
//! mode: either `--wrapper-profile <name>` to run a configured profile, or a
//! direct command after `--`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use ithena_core::sink::DEFAULT_OBSERVE_URL;

/// Observability wrapper for MCP stdio servers.
#[derive(Parser, Debug)]
#[command(
    name = "ithena-cli",
    disable_version_flag = true,
    after_help = "Wrap modes:\n  \
        ithena-cli --wrapper-profile <name> [flags]\n  \
        ithena-cli [flags] -- <command> [args...]"
)]
pub struct Cli {
    /// Name of the wrapper profile to use from the config file.
    #[arg(long)]
    pub wrapper_profile: Option<String>,

    /// Path to the wrapper configuration file (YAML).
    #[arg(long)]
    pub wrapper_config_file: Option<PathBuf>,

    /// URL for the observability API endpoint.
    #[arg(long, default_value = DEFAULT_OBSERVE_URL)]
    pub observe_url: String,

    /// Human-readable label for the wrapped server in audit records
    /// (direct-wrap mode).
    #[arg(long)]
    pub alias: Option<String>,

    /// Enable verbose logging output.
    #[arg(long)]
    pub verbose: bool,

    /// Print version information and exit.
    #[arg(long)]
    pub version: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Command to wrap directly (everything after `--`).
    #[arg(last = true)]
    pub wrapped: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage authentication.
    Auth {
        #[command(subcommand)]
        action: Option<AuthAction>,
    },
    /// Interact with locally stored logs.
    Logs {
        #[command(subcommand)]
        action: LogsAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum AuthAction {
    /// Initiate the device authorization flow to log in.
    Login,
    /// Check the current authentication status.
    Status,
    /// Log out and remove the locally stored authentication token.
    #[command(alias = "logout")]
    Deauth,
}

#[derive(Subcommand, Debug)]
pub enum LogsAction {
    /// Display locally stored MCP logs in a web interface.
    Show {
        /// Port for the local logs web UI.
        #[arg(long, default_value_t = crate::webui::DEFAULT_PORT)]
        port: u16,
    },
    /// Delete all locally stored MCP logs.
    Clear,
}
