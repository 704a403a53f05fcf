//! Core library for ithena-cli.
//!
//! This crate holds everything the wrapper binary shares between its modes:
//! the canonical audit record model, passive JSON-RPC snooping and request/
//! response correlation keys, wrapper-profile configuration, environment
//! placeholder resolution, token storage, the embedded local log store, and
//! the batching audit sink that ships records to the platform or persists
//! them locally.

pub mod auth;
pub mod config;
pub mod jsonrpc;
pub mod placeholder;
pub mod record;
pub mod sink;
pub mod store;
pub mod telemetry;

/// Version stamped into audit records as `proxy_version`.
pub const PROXY_VERSION: &str = env!("CARGO_PKG_VERSION");
