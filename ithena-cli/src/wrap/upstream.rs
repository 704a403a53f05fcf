//! Client → child worker: forward stdin lines, snoop requests.

use std::time::Instant;

use chrono::Utc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use ithena_core::jsonrpc::snoop_request;

use super::{PendingRequest, RequestStore, MAX_SNOOP_BYTES};

/// Read line-delimited input from the client and forward each line to the
/// child's stdin, recording correlatable requests along the way.
///
/// Forwarding comes first: only after the bytes are on their way to the child
/// is the line inspected. Parse failures and notifications are invisible.
/// A write failure stops the worker; dropping the writer closes the child's
/// stdin pipe.
pub(crate) async fn pump_requests<R, W>(mut reader: R, mut child_stdin: W, store: &RequestStore)
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line: Vec<u8> = Vec::new();

    loop {
        line.clear();
        let n = match reader.read_until(b'\n', &mut line).await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "error reading client stdin, stopping forwarder");
                break;
            }
        };
        if n == 0 {
            tracing::debug!("client stdin closed");
            break;
        }

        // Start the clock before the write so the recorded duration spans the
        // child's full turnaround.
        let started_wall = Utc::now();
        let started = Instant::now();

        // NDJSON framing for the final unterminated line.
        if !line.ends_with(b"\n") {
            line.push(b'\n');
        }

        if let Err(e) = child_stdin.write_all(&line).await {
            tracing::warn!(error = %e, "error writing to child stdin, stopping forwarder");
            break;
        }
        if let Err(e) = child_stdin.flush().await {
            tracing::warn!(error = %e, "error flushing child stdin, stopping forwarder");
            break;
        }

        if line.len() > MAX_SNOOP_BYTES {
            tracing::debug!(len = line.len(), "line exceeds snoop limit, forwarded unparsed");
            continue;
        }

        let Ok(text) = std::str::from_utf8(&line) else {
            tracing::debug!("non-UTF-8 line on client stdin, forwarded unparsed");
            continue;
        };

        match snoop_request(text) {
            Some(request) => match request.id {
                Some(id) => {
                    let key = id.canonical_key();
                    tracing::debug!(
                        id = %key,
                        method = request.method.as_deref().unwrap_or("-"),
                        "stored request for correlation"
                    );
                    store.insert(
                        key,
                        PendingRequest {
                            method: request.method,
                            started_wall,
                            started,
                            params: request.params,
                        },
                    );
                }
                None => {
                    tracing::debug!(
                        method = request.method.as_deref().unwrap_or("-"),
                        "notification on client stdin"
                    );
                }
            },
            None => {
                tracing::debug!("unparseable line on client stdin, forwarded verbatim");
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, BufReader};

    /// Run the pump over fixed input and return what the child would see.
    async fn run_pump(input: &[u8], store: &RequestStore) -> Vec<u8> {
        let (child_writer, mut child_reader) = tokio::io::duplex(64 * 1024);

        let reader = BufReader::new(input);
        pump_requests(reader, child_writer, store).await;

        let mut forwarded = Vec::new();
        child_reader.read_to_end(&mut forwarded).await.unwrap();
        forwarded
    }

    #[tokio::test]
    async fn forwards_bytes_verbatim_regardless_of_parseability() {
        let input = b"{\"id\":7,\"method\":\"tool/call\",\"params\":{\"x\":1}}\nnot json\n{\"id\":null,\"method\":\"note\"}\n";
        let store = RequestStore::new();
        let forwarded = run_pump(input, &store).await;
        assert_eq!(forwarded, input);
    }

    #[tokio::test]
    async fn stores_only_correlatable_requests() {
        let input = b"{\"id\":7,\"method\":\"a\"}\n{\"id\":null,\"method\":\"b\"}\n{\"method\":\"c\"}\ngarbage\n";
        let store = RequestStore::new();
        run_pump(input, &store).await;

        assert_eq!(store.len(), 1);
        let pending = store.take("7").expect("request 7 should be stored");
        assert_eq!(pending.method.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn unterminated_final_line_gains_a_newline() {
        let input = b"{\"id\":1,\"method\":\"m\"}";
        let store = RequestStore::new();
        let forwarded = run_pump(input, &store).await;
        assert_eq!(forwarded, b"{\"id\":1,\"method\":\"m\"}\n");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn params_snapshot_is_kept_for_the_record() {
        let input = b"{\"id\":\"a\",\"method\":\"tool/call\",\"params\":{\"tool_name\":\"echo\"}}\n";
        let store = RequestStore::new();
        run_pump(input, &store).await;

        let pending = store.take("\"a\"").expect("string id stored with quoting");
        assert_eq!(
            pending.params,
            Some(serde_json::json!({"tool_name": "echo"}))
        );
    }
}
