//! The canonical audit record emitted by the observability pipeline.
//!
//! One record is produced per correlated JSON-RPC request/response pair, or
//! per early wrapper error (spawn failure, non-zero child exit). Records are
//! serialized as-is both onto the wire (remote batches) and into the local
//! store's JSON columns.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// The JSON-RPC method whose `params.tool_name` names the invoked tool.
pub const TOOL_CALL_METHOD: &str = "tool/call";

// ─────────────────────────────────────────────────────────────────────────────
// Status
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of a recorded interaction.
///
/// `Failure` iff the response carried a JSON-RPC error object, or the record
/// was synthesized for an early wrapper error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Failure,
}

impl Status {
    /// Stable string form, used for storage and query filters.
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Success => "success",
            Status::Failure => "failure",
        }
    }
}

/// A stored status string that is neither `success` nor `failure`.
#[derive(Debug, thiserror::Error)]
#[error("unrecognized status '{0}'")]
pub struct UnknownStatus(pub String);

impl std::str::FromStr for Status {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Status::Success),
            "failure" => Ok(Status::Failure),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Audit Record
// ─────────────────────────────────────────────────────────────────────────────

/// A single observability record.
///
/// `id`, `timestamp`, and `proxy_version` may be left empty by producers; the
/// sink fills them at enqueue time. Exactly one of `response_preview` and
/// `error_details` is populated for a completed interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Unique identifier (UUIDv4). Filled by the sink when empty.
    #[serde(default)]
    pub id: String,
    /// Request start time, RFC 3339 with nanosecond precision, UTC.
    #[serde(default)]
    pub timestamp: String,
    /// JSON-RPC method observed on the request side.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcp_method: Option<String>,
    /// Tool name, extracted from `params.tool_name` on `tool/call` requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Milliseconds between request dispatch and matching response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    pub status: Status,
    /// Wrapper version. Filled by the sink when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_version: Option<String>,
    /// Human label for the wrapped server, from configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_server_alias: Option<String>,
    /// The request params as observed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_preview: Option<Value>,
    /// The response result; present only on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_preview: Option<Value>,
    /// The response error object, or a synthesized `{error, message}` map.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<Value>,
}

impl AuditRecord {
    /// Build the record for a completed request/response pair.
    ///
    /// `result` and `error` come from the response envelope; an error object
    /// wins and flips the status to `failure`.
    #[allow(clippy::too_many_arguments)]
    pub fn completion(
        method: Option<String>,
        params: Option<Value>,
        result: Option<Value>,
        error: Option<Value>,
        duration: Duration,
        started_at: DateTime<Utc>,
        alias: Option<String>,
    ) -> AuditRecord {
        let (status, response_preview, error_details) = match error {
            Some(e) => (Status::Failure, None, Some(e)),
            None => (Status::Success, result, None),
        };

        let tool_name = extract_tool_name(method.as_deref(), params.as_ref());

        AuditRecord {
            id: String::new(),
            timestamp: rfc3339_nanos(started_at),
            mcp_method: method,
            tool_name,
            duration_ms: Some(duration.as_millis() as i64),
            status,
            proxy_version: None,
            target_server_alias: alias,
            request_preview: params,
            response_preview,
            error_details,
        }
    }

    /// Build a failure record for an error that happened before (or outside)
    /// a full RPC interaction, e.g. a spawn failure or a non-zero child exit.
    ///
    /// `correlation_id`, when provided, becomes the record id; otherwise the
    /// sink assigns a fresh UUID.
    pub fn early_error(
        message: &str,
        alias: Option<&str>,
        method: Option<&str>,
        correlation_id: Option<&str>,
    ) -> AuditRecord {
        AuditRecord {
            id: correlation_id.unwrap_or_default().to_string(),
            timestamp: rfc3339_nanos(Utc::now()),
            mcp_method: method.map(str::to_string),
            tool_name: None,
            duration_ms: Some(0),
            status: Status::Failure,
            proxy_version: None,
            target_server_alias: alias.map(str::to_string),
            request_preview: None,
            response_preview: None,
            error_details: Some(serde_json::json!({
                "error": message,
                "message": "Failed during CLI operation",
            })),
        }
    }
}

/// Pull the tool name out of `params.tool_name` for `tool/call` requests.
pub fn extract_tool_name(method: Option<&str>, params: Option<&Value>) -> Option<String> {
    if method != Some(TOOL_CALL_METHOD) {
        return None;
    }
    params?.get("tool_name")?.as_str().map(str::to_string)
}

/// RFC 3339 with nanosecond precision, UTC (`2024-05-01T12:00:00.000000000Z`).
pub fn rfc3339_nanos(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
