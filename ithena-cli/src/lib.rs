//! ithena-cli library surface.
//!
//! The binary in `main.rs` is a thin dispatcher; the actual machinery lives
//! here so integration tests can drive it directly.

pub mod auth_cmd;
pub mod cli;
pub mod error;
pub mod logs_cmd;
pub mod webui;
pub mod wrap;

/// Version printed by `--version` and served by the query API.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build commit, injected at build time via `ITHENA_BUILD_COMMIT`.
pub const BUILD_COMMIT: Option<&str> = option_env!("ITHENA_BUILD_COMMIT");

/// Build date, injected at build time via `ITHENA_BUILD_DATE`.
pub const BUILD_DATE: Option<&str> = option_env!("ITHENA_BUILD_DATE");
