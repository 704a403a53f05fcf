//! Transparent stdio proxy with JSON-RPC correlation.
//!
//! [`run_wrap`] spawns the configured server as a child process and runs
//! three concurrent stream workers for its lifetime:
//!
//! 1. client stdin → child stdin, snooping requests into the request store
//! 2. child stdout → client stdout, correlating responses and emitting one
//!    audit record per matched pair
//! 3. child stderr → client stderr, byte-for-byte
//!
//! Forwarding always precedes inspection: a malformed line reaches the peer
//! untouched and is merely invisible to observability. The wrapper never
//! cancels the child; it waits and inherits the exit status.

mod downstream;
mod upstream;

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::process::Command;

use ithena_core::record::AuditRecord;
use ithena_core::sink::AuditSink;

use crate::error::WrapError;

pub(crate) use downstream::pump_responses;
pub(crate) use upstream::pump_requests;

/// Lines longer than this are still forwarded but not snooped, to keep a
/// hostile or chatty peer from ballooning parsed `serde_json::Value` trees.
pub(crate) const MAX_SNOOP_BYTES: usize = 10 * 1024 * 1024;

// ─────────────────────────────────────────────────────────────────────────────
// Options
// ─────────────────────────────────────────────────────────────────────────────

/// Everything `run_wrap` needs, resolved ahead of time.
#[derive(Debug, Clone)]
pub struct WrapOptions {
    pub command: String,
    pub args: Vec<String>,
    /// Resolved environment overrides; merged over the inherited environment,
    /// overrides win.
    pub env: HashMap<String, String>,
    pub alias: Option<String>,
    pub observe_url: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Request store
// ─────────────────────────────────────────────────────────────────────────────

/// What we remember about an in-flight request until its response arrives.
#[derive(Debug)]
pub(crate) struct PendingRequest {
    pub method: Option<String>,
    /// Wall-clock start, used as the record timestamp.
    pub started_wall: DateTime<Utc>,
    /// Monotonic start, used for the duration.
    pub started: Instant,
    pub params: Option<Value>,
}

/// In-flight requests keyed by canonical JSON-RPC id.
///
/// Shared between the two parsing workers; critical sections are a single
/// map operation.
#[derive(Debug, Default)]
pub(crate) struct RequestStore {
    entries: Mutex<HashMap<String, PendingRequest>>,
}

impl RequestStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: String, pending: PendingRequest) {
        self.lock().insert(key, pending);
    }

    /// Fetch-and-remove: a response consumes its request entry.
    pub fn take(&self, key: &str) -> Option<PendingRequest> {
        self.lock().remove(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, PendingRequest>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// run_wrap
// ─────────────────────────────────────────────────────────────────────────────

/// Spawn the wrapped command and proxy its stdio until it exits.
///
/// Returns the child's exit status on success. A spawn failure submits a
/// synthesized failure record before returning; the caller flushes the sink
/// and exits 1.
pub async fn run_wrap(sink: &AuditSink, opts: WrapOptions) -> Result<i32, WrapError> {
    run_wrap_with_io(sink, opts, tokio::io::stdin(), tokio::io::stdout()).await
}

/// [`run_wrap`] with injectable client streams, so tests can drive the full
/// proxy without touching the process's own stdio.
pub async fn run_wrap_with_io<I, O>(
    sink: &AuditSink,
    opts: WrapOptions,
    client_in: I,
    client_out: O,
) -> Result<i32, WrapError>
where
    I: AsyncRead + Unpin,
    O: AsyncWrite + Unpin,
{
    let mut cmd = Command::new(&opts.command);
    cmd.args(&opts.args)
        .envs(&opts.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    tracing::debug!(
        command = %opts.command,
        args = ?opts.args,
        env_overrides = opts.env.len(),
        alias = opts.alias.as_deref().unwrap_or("-"),
        "starting wrapped command"
    );

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(source) => {
            let msg = format!("Failed to start command '{}': {source}", opts.command);
            tracing::error!(command = %opts.command, error = %source, "spawn failed");
            sink.submit(
                AuditRecord::early_error(&msg, opts.alias.as_deref(), None, None),
                &opts.observe_url,
            );
            return Err(WrapError::Spawn {
                command: opts.command,
                source,
            });
        }
    };

    let child_stdin = take_pipe(child.stdin.take(), "stdin", &opts, sink)?;
    let child_stdout = take_pipe(child.stdout.take(), "stdout", &opts, sink)?;
    let mut child_stderr = take_pipe(child.stderr.take(), "stderr", &opts, sink)?;

    tracing::debug!(pid = child.id(), "wrapped command started");

    let store = RequestStore::new();

    // The three workers run until their source stream closes. They only
    // synchronize through the child's pipes and the request store.
    let up = pump_requests(BufReader::new(client_in), child_stdin, &store);
    let down = pump_responses(
        BufReader::new(child_stdout),
        client_out,
        &store,
        sink,
        opts.alias.as_deref(),
        &opts.observe_url,
    );
    let err = async {
        let mut stderr = tokio::io::stderr();
        if let Err(e) = tokio::io::copy(&mut child_stderr, &mut stderr).await {
            tracing::warn!(error = %e, "error forwarding child stderr");
        }
    };
    tokio::join!(up, down, err);

    tracing::debug!("stream workers finished, reaping child");

    let status = match child.wait().await {
        Ok(status) => status,
        Err(source) => {
            let msg = format!("Error waiting for command '{}': {source}", opts.command);
            tracing::error!(command = %opts.command, error = %source, "wait failed");
            sink.submit(
                AuditRecord::early_error(&msg, opts.alias.as_deref(), None, None),
                &opts.observe_url,
            );
            return Err(WrapError::Wait {
                command: opts.command,
                source,
            });
        }
    };

    let orphaned = store.len();
    if orphaned > 0 {
        tracing::warn!(count = orphaned, "requests still unanswered at child exit");
    }

    let code = status.code().unwrap_or(1);
    if code != 0 {
        let msg = format!(
            "Backend command '{}' exited with non-zero status {code}",
            opts.command
        );
        tracing::warn!(command = %opts.command, code, "child exited non-zero");
        sink.submit(
            AuditRecord::early_error(&msg, opts.alias.as_deref(), None, None),
            &opts.observe_url,
        );
    } else {
        tracing::debug!(command = %opts.command, "child exited cleanly");
    }

    Ok(code)
}

fn take_pipe<T>(
    pipe: Option<T>,
    stream: &'static str,
    opts: &WrapOptions,
    sink: &AuditSink,
) -> Result<T, WrapError> {
    pipe.ok_or_else(|| {
        let msg = format!("Failed to capture {stream} of command '{}'", opts.command);
        sink.submit(
            AuditRecord::early_error(&msg, opts.alias.as_deref(), None, None),
            &opts.observe_url,
        );
        WrapError::Pipe {
            command: opts.command.clone(),
            stream,
        }
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_store_insert_take() {
        let store = RequestStore::new();
        store.insert(
            "7".into(),
            PendingRequest {
                method: Some("tool/call".into()),
                started_wall: Utc::now(),
                started: Instant::now(),
                params: None,
            },
        );
        assert_eq!(store.len(), 1);

        let pending = store.take("7").expect("entry should exist");
        assert_eq!(pending.method.as_deref(), Some("tool/call"));
        assert_eq!(store.len(), 0);
        assert!(store.take("7").is_none(), "take removes the entry");
    }
}
