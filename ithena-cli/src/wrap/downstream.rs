//! Child → client worker: forward stdout lines, correlate responses, emit
//! audit records.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use ithena_core::jsonrpc::snoop_response;
use ithena_core::record::AuditRecord;
use ithena_core::sink::AuditSink;

use super::{RequestStore, MAX_SNOOP_BYTES};

/// Read line-delimited output from the child and forward each line to the
/// client, pairing responses with stored requests.
///
/// The client sees the bytes before any inspection happens. A response whose
/// id matches a stored request produces exactly one audit record; an unknown
/// id is logged and dropped without blocking or retrying.
pub(crate) async fn pump_responses<R, W>(
    mut reader: R,
    mut out: W,
    store: &RequestStore,
    sink: &AuditSink,
    alias: Option<&str>,
    observe_url: &str,
) where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line: Vec<u8> = Vec::new();

    loop {
        line.clear();
        let n = match reader.read_until(b'\n', &mut line).await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "error reading child stdout, stopping forwarder");
                break;
            }
        };
        if n == 0 {
            tracing::debug!("child stdout closed");
            break;
        }

        if !line.ends_with(b"\n") {
            line.push(b'\n');
        }

        if let Err(e) = out.write_all(&line).await {
            tracing::warn!(error = %e, "error writing to client stdout, stopping forwarder");
            break;
        }
        if let Err(e) = out.flush().await {
            tracing::warn!(error = %e, "error flushing client stdout, stopping forwarder");
            break;
        }

        if line.len() > MAX_SNOOP_BYTES {
            tracing::debug!(len = line.len(), "line exceeds snoop limit, forwarded unparsed");
            continue;
        }

        let Ok(text) = std::str::from_utf8(&line) else {
            tracing::debug!("non-UTF-8 line on child stdout, forwarded unparsed");
            continue;
        };

        let Some(response) = snoop_response(text) else {
            tracing::debug!("unparseable line on child stdout, forwarded verbatim");
            continue;
        };
        let Some(ref id) = response.id else {
            tracing::debug!("notification on child stdout");
            continue;
        };

        let key = id.canonical_key();
        match store.take(&key) {
            Some(pending) => {
                let duration = pending.started.elapsed();
                tracing::debug!(
                    id = %key,
                    method = pending.method.as_deref().unwrap_or("-"),
                    duration_ms = duration.as_millis() as u64,
                    failed = response.is_error(),
                    "correlated response"
                );
                let record = AuditRecord::completion(
                    pending.method,
                    pending.params,
                    response.result,
                    response.error,
                    duration,
                    pending.started_wall,
                    alias.map(str::to_string),
                );
                sink.submit(record, observe_url);
            }
            None => {
                tracing::warn!(id = %key, "response with unknown or duplicate id, cannot correlate");
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
