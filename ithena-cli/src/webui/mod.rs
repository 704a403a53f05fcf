//! Local HTTP server exposing the record store to the log viewer.
//!
//! Endpoints:
//!
//! - `GET /api/logs` — paginated, filterable log listing
//! - `GET /api/logs/{id}` — single record, 404 when absent
//! - `GET /api/auth/status` — whether a platform token is stored
//! - `GET /api/version` — build version
//!
//! Anything else that is not under `/assets/` serves the embedded entry
//! document so client-side routes resolve. The server binds localhost only,
//! launches the system browser best-effort, and drains for up to five
//! seconds on SIGINT/SIGTERM.

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::watch;

use ithena_core::auth::TokenProvider;
use ithena_core::store::{LocalStore, LogFilters};

/// Default port for `logs show`.
pub const DEFAULT_PORT: u16 = 8675;

/// Platform URL surfaced to the viewer for sign-in links.
pub const PLATFORM_URL: &str = "https://ithena.one";

/// Time allowed for open connections to drain after a termination signal.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(5);

/// The log-viewer entry document, embedded at build time.
static INDEX_HTML: &str = include_str!("assets/index.html");

#[derive(Debug, thiserror::Error)]
pub enum WebUiError {
    #[error("failed to bind localhost:{port}: {source}")]
    Bind {
        port: u16,
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

// ─────────────────────────────────────────────────────────────────────────────
// State
// ─────────────────────────────────────────────────────────────────────────────

/// Shared state for all handlers.
pub struct WebUiState {
    pub store: Arc<LocalStore>,
    pub provider: Arc<dyn TokenProvider>,
    pub version: String,
}

type SharedState = Arc<WebUiState>;

/// Build the application router.
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/api/logs", get(logs_handler))
        .route("/api/logs/{id}", get(log_detail_handler))
        .route("/api/auth/status", get(auth_status_handler))
        .route("/api/version", get(version_handler))
        .route("/assets/{*path}", get(asset_handler))
        .fallback(get(index_handler))
        .with_state(state)
}

/// Serve the query API until SIGINT/SIGTERM.
pub async fn serve(state: SharedState, port: u16) -> Result<(), WebUiError> {
    let listener = TcpListener::bind(("127.0.0.1", port))
        .await
        .map_err(|source| WebUiError::Bind { port, source })?;
    let addr = listener.local_addr().map_err(WebUiError::Serve)?;

    tracing::info!(%addr, "log viewer listening");
    open_browser(&format!("http://localhost:{}", addr.port()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        termination_signal().await;
        tracing::info!("termination signal received, shutting down log viewer");
        let _ = shutdown_tx.send(true);
    });

    let mut graceful_rx = shutdown_rx.clone();
    let mut deadline_rx = shutdown_rx;
    let server = axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = graceful_rx.changed().await;
        })
        .into_future();

    tokio::select! {
        result = server => result.map_err(WebUiError::Serve)?,
        _ = async {
            let _ = deadline_rx.changed().await;
            tokio::time::sleep(SHUTDOWN_DRAIN).await;
        } => {
            tracing::warn!("drain window elapsed, forcing shutdown");
        }
    }

    Ok(())
}

async fn termination_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Query string for `/api/logs`. Numbers arrive as raw strings so malformed
/// values clamp to defaults instead of rejecting the request.
#[derive(Debug, Default, Deserialize)]
struct LogsQuery {
    page: Option<String>,
    limit: Option<String>,
    status: Option<String>,
    tool_name: Option<String>,
    mcp_method: Option<String>,
    search: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

async fn logs_handler(State(state): State<SharedState>, Query(query): Query<LogsQuery>) -> Response {
    let page = query
        .page
        .as_deref()
        .and_then(|p| p.parse::<i64>().ok())
        .unwrap_or(1);
    let limit = query
        .limit
        .as_deref()
        .and_then(|l| l.parse::<i64>().ok())
        .unwrap_or(20);

    let filters = LogFilters {
        status: non_empty(query.status),
        tool_name: non_empty(query.tool_name),
        mcp_method: non_empty(query.mcp_method),
        search_term: non_empty(query.search),
    };

    let store = state.store.clone();
    let result =
        tokio::task::spawn_blocking(move || store.query_logs(&filters, page, limit)).await;

    match result {
        Ok(Ok(result_page)) => Json(result_page).into_response(),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "failed to query logs");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to retrieve logs")
        }
        Err(e) => {
            tracing::error!(error = %e, "log query task failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to retrieve logs")
        }
    }
}

async fn log_detail_handler(State(state): State<SharedState>, Path(id): Path<String>) -> Response {
    let store = state.store.clone();
    let result = tokio::task::spawn_blocking(move || store.get_log(&id)).await;

    match result {
        Ok(Ok(Some(record))) => Json(record).into_response(),
        Ok(Ok(None)) => error_response(StatusCode::NOT_FOUND, "Log not found"),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "failed to load log detail");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to retrieve log details",
            )
        }
        Err(e) => {
            tracing::error!(error = %e, "log detail task failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to retrieve log details",
            )
        }
    }
}

async fn auth_status_handler(State(state): State<SharedState>) -> Response {
    let provider = state.provider.clone();
    let token = tokio::task::spawn_blocking(move || provider.token()).await;

    let authenticated = match token {
        Ok(Ok(token)) => token.is_some(),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "token lookup failed for auth status");
            false
        }
        Err(e) => {
            tracing::warn!(error = %e, "auth status task failed");
            false
        }
    };

    Json(serde_json::json!({
        "authenticated": authenticated,
        "platformURL": PLATFORM_URL,
    }))
    .into_response()
}

async fn version_handler(State(state): State<SharedState>) -> Response {
    Json(serde_json::json!({ "version": state.version })).into_response()
}

async fn asset_handler(Path(path): Path<String>) -> Response {
    // No bundled assets beyond the entry document.
    tracing::debug!(path, "asset not found");
    StatusCode::NOT_FOUND.into_response()
}

/// Catch-all: serve the entry document so client-side routing works.
async fn index_handler() -> Response {
    Html(INDEX_HTML).into_response()
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

// ─────────────────────────────────────────────────────────────────────────────
// Browser launch
// ─────────────────────────────────────────────────────────────────────────────

/// Best-effort launch of the system browser; failure is informational only.
fn open_browser(url: &str) {
    #[cfg(target_os = "macos")]
    let launch = std::process::Command::new("open").arg(url).spawn();
    #[cfg(target_os = "windows")]
    let launch = std::process::Command::new("rundll32")
        .args(["url.dll,FileProtocolHandler", url])
        .spawn();
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    let launch = std::process::Command::new("xdg-open").arg(url).spawn();

    if let Err(e) = launch {
        tracing::info!(error = %e, url, "could not open browser automatically");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use ithena_core::auth::MemoryTokenProvider;
    use ithena_core::record::{AuditRecord, Status};
    use tower::util::ServiceExt;

    fn record(id: &str, timestamp: &str, status: Status) -> AuditRecord {
        AuditRecord {
            id: id.to_string(),
            timestamp: timestamp.to_string(),
            mcp_method: Some("tool/call".into()),
            tool_name: Some("echo".into()),
            duration_ms: Some(5),
            status,
            proxy_version: Some("0.1.0".into()),
            target_server_alias: None,
            request_preview: Some(serde_json::json!({"x": 1})),
            response_preview: None,
            error_details: None,
        }
    }

    fn test_router(provider: Arc<dyn TokenProvider>) -> (tempfile::TempDir, Router) {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(&dir.path().join("logs.db")).unwrap();
        store
            .save_batch(&[
                record("a", "2024-05-01T12:00:00.000000000Z", Status::Success),
                record("b", "2024-05-01T12:00:01.000000000Z", Status::Failure),
                record("c", "2024-05-01T12:00:02.000000000Z", Status::Success),
            ])
            .unwrap();

        let state = Arc::new(WebUiState {
            store: Arc::new(store),
            provider,
            version: "1.2.3".into(),
        });
        (dir, router(state))
    }

    async fn get_json(router: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn logs_endpoint_paginates_and_filters() {
        let (_dir, app) = test_router(Arc::new(MemoryTokenProvider::new()));

        let (status, body) = get_json(&app, "/api/logs").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_count"], 3);
        assert_eq!(body["page"], 1);
        assert_eq!(body["limit"], 20);
        assert_eq!(body["logs"][0]["id"], "c", "newest first");

        let (_, body) = get_json(&app, "/api/logs?status=success&limit=10").await;
        assert_eq!(body["total_count"], 2);
        assert_eq!(body["logs"].as_array().unwrap().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn malformed_page_and_limit_clamp_to_defaults() {
        let (_dir, app) = test_router(Arc::new(MemoryTokenProvider::new()));

        let (status, body) = get_json(&app, "/api/logs?page=abc&limit=-2").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["page"], 1);
        assert_eq!(body["limit"], 20);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn log_detail_found_and_missing() {
        let (_dir, app) = test_router(Arc::new(MemoryTokenProvider::new()));

        let (status, body) = get_json(&app, "/api/logs/b").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], "b");
        assert_eq!(body["status"], "failure");

        let (status, _) = get_json(&app, "/api/logs/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn auth_status_reflects_the_provider() {
        let (_dir, app) = test_router(Arc::new(MemoryTokenProvider::new()));
        let (_, body) = get_json(&app, "/api/auth/status").await;
        assert_eq!(body["authenticated"], false);
        assert_eq!(body["platformURL"], PLATFORM_URL);

        let (_dir, app) = test_router(Arc::new(MemoryTokenProvider::with_token("tok")));
        let (_, body) = get_json(&app, "/api/auth/status").await;
        assert_eq!(body["authenticated"], true);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn version_endpoint_reports_the_build() {
        let (_dir, app) = test_router(Arc::new(MemoryTokenProvider::new()));
        let (_, body) = get_json(&app, "/api/version").await;
        assert_eq!(body["version"], "1.2.3");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_paths_serve_the_entry_document() {
        let (_dir, app) = test_router(Arc::new(MemoryTokenProvider::new()));

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/some/client/route")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("<html"), "entry document expected");

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/assets/missing.js")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
