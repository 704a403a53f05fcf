//! Anonymous, fire-and-forget usage telemetry.
//!
//! Disabled unless an API key is configured at build/run time, and always
//! disabled when `ITHENA_TELEMETRY_OPTOUT=true`. Events carry only
//! non-sensitive, aggregate-friendly properties. Posts happen on detached
//! tasks and are never on a critical path: failures are logged at debug and
//! forgotten.
//!
//! The anonymous machine id persists at `~/.ithena/telemetry_id.txt`, mode
//! 0600.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use serde_json::json;

use crate::record::AuditRecord;

/// Setting this to `true` disables all telemetry.
pub const OPTOUT_ENV: &str = "ITHENA_TELEMETRY_OPTOUT";

const API_KEY_ENV: &str = "ITHENA_POSTHOG_KEY";
const ENDPOINT_ENV: &str = "ITHENA_POSTHOG_ENDPOINT";
const DEFAULT_ENDPOINT: &str = "https://app.posthog.com";
const ID_DIR_NAME: &str = ".ithena";
const ID_FILE_NAME: &str = "telemetry_id.txt";

struct TelemetryState {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    distinct_id: String,
}

static STATE: OnceLock<Option<TelemetryState>> = OnceLock::new();

fn state() -> Option<&'static TelemetryState> {
    STATE
        .get_or_init(|| {
            if std::env::var(OPTOUT_ENV).as_deref() == Ok("true") {
                return None;
            }
            // No key means telemetry stays off; source builds send nothing.
            let api_key = std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty())?;
            let endpoint =
                std::env::var(ENDPOINT_ENV).unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());

            let id_dir = dirs::home_dir()?.join(ID_DIR_NAME);
            let distinct_id = match load_or_generate_id(&id_dir) {
                Ok(id) => id,
                Err(e) => {
                    tracing::debug!(error = %e, "could not persist telemetry id, telemetry disabled");
                    return None;
                }
            };

            Some(TelemetryState {
                client: reqwest::Client::new(),
                endpoint,
                api_key,
                distinct_id,
            })
        })
        .as_ref()
}

/// Record a telemetry event. No-op without a runtime, without a key, or when
/// opted out.
pub fn track_event(event: &str, properties: serde_json::Map<String, serde_json::Value>) {
    let Some(state) = state() else { return };
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        return;
    };

    let payload = json!({
        "api_key": state.api_key,
        "event": event,
        "distinct_id": state.distinct_id,
        "properties": properties,
    });
    let url = format!("{}/capture", state.endpoint.trim_end_matches('/'));
    let client = state.client.clone();
    let event = event.to_string();

    handle.spawn(async move {
        match client.post(&url).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => tracing::debug!(event, status = %resp.status(), "telemetry event rejected"),
            Err(e) => tracing::debug!(event, error = %e, "telemetry event failed"),
        }
    });
}

/// Emit the per-record capture event with non-sensitive properties only.
pub fn track_record(record: &AuditRecord) {
    let mut properties = serde_json::Map::new();
    if let Some(alias) = &record.target_server_alias {
        properties.insert("target_alias".into(), json!(alias));
    }
    if let Some(method) = &record.mcp_method {
        properties.insert("mcp_method".into(), json!(method));
    }
    if let Some(tool) = &record.tool_name {
        properties.insert("tool_name".into(), json!(tool));
    }
    properties.insert("status".into(), json!(record.status.as_str()));

    track_event("mcp_log_captured", properties);
}

/// Load the anonymous id from `dir`, generating and persisting one if absent.
fn load_or_generate_id(dir: &Path) -> std::io::Result<String> {
    let path: PathBuf = dir.join(ID_FILE_NAME);
    if let Ok(existing) = std::fs::read_to_string(&path) {
        let existing = existing.trim();
        if !existing.is_empty() {
            return Ok(existing.to_string());
        }
    }

    std::fs::create_dir_all(dir)?;
    let id = uuid::Uuid::new_v4().to_string();
    std::fs::write(&path, &id)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(id)
}
