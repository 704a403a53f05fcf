//! Passive JSON-RPC 2.0 envelope snooping.
//!
//! The wrapper forwards traffic byte-for-byte and only *looks* at it, so the
//! parsers here are deliberately lenient: a line that does not parse is not an
//! error, it is simply invisible to observability. No `jsonrpc` version field
//! is enforced; the pipeline cares about envelope shape (`id`, `method`,
//! `params`, `result`, `error`) and nothing else.
//!
//! Correlation keys normalize the numeric-vs-string ambiguity of JSON-RPC ids:
//! `1` and `1.0` canonicalize identically, `"1"` does not.

use serde_json::Value;

// ─────────────────────────────────────────────────────────────────────────────
// Request Ids
// ─────────────────────────────────────────────────────────────────────────────

/// A non-null JSON-RPC request id.
///
/// `null` ids mark notifications and never participate in correlation, so
/// they have no representation here: parsing a `null` id yields `None`.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcId {
    /// Integer-valued id (`"id": 7`).
    Number(i64),
    /// Non-integer numeric id (`"id": 1.5`). Unusual but seen in the wild.
    Float(f64),
    /// String id (`"id": "abc-123"`).
    String(String),
}

impl RpcId {
    /// Canonical map key for this id.
    ///
    /// Integer-valued numbers render as their decimal form with no point, so
    /// a request sent with `"id": 1` matches a response echoed back as
    /// `"id": 1.0`. Other numeric values use the shortest decimal that
    /// round-trips. String ids keep their JSON quoting so `"1"` never
    /// collides with the number `1`.
    pub fn canonical_key(&self) -> String {
        match self {
            RpcId::String(s) => Value::String(s.clone()).to_string(),
            RpcId::Number(n) => n.to_string(),
            // Rust's float formatting already yields the shortest round-trip
            // decimal, and prints integer-valued floats without a point.
            RpcId::Float(f) => f.to_string(),
        }
    }
}

/// Parse the `id` field of an envelope.
///
/// Returns `Ok(None)` for an absent or `null` id (a notification), and `Err`
/// for value types JSON-RPC does not allow as ids (booleans, arrays, objects).
fn parse_id(value: Option<&Value>) -> Result<Option<RpcId>, ()> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => {
            if let Some(i) = n.as_i64() {
                Ok(Some(RpcId::Number(i)))
            } else if let Some(f) = n.as_f64() {
                Ok(Some(RpcId::Float(f)))
            } else {
                Err(())
            }
        }
        Some(Value::String(s)) => Ok(Some(RpcId::String(s.clone()))),
        Some(_) => Err(()),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Envelopes
// ─────────────────────────────────────────────────────────────────────────────

/// Request-side envelope as observed on the client→server stream.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestEnvelope {
    /// Correlation id; `None` for notifications.
    pub id: Option<RpcId>,
    /// The JSON-RPC method, when present and a string.
    pub method: Option<String>,
    /// The request params, verbatim.
    pub params: Option<Value>,
}

/// Response-side envelope as observed on the server→client stream.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEnvelope {
    /// Correlation id; `None` when absent or `null`.
    pub id: Option<RpcId>,
    /// The `result` value on success.
    pub result: Option<Value>,
    /// The `error` object on failure.
    pub error: Option<Value>,
}

impl ResponseEnvelope {
    /// Whether the response carried a JSON-RPC error object.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Snoop a request envelope out of a raw line.
///
/// Returns `None` for anything that is not a JSON object with a plausible
/// envelope shape. The caller has already forwarded the bytes, so there is
/// nothing to do with an unparseable line.
pub fn snoop_request(line: &str) -> Option<RequestEnvelope> {
    let mut value: Value = serde_json::from_str(line.trim()).ok()?;
    let obj = value.as_object_mut()?;

    let id = parse_id(obj.get("id")).ok()?;
    let method = match obj.get("method") {
        None => None,
        Some(Value::String(m)) => Some(m.clone()),
        // A non-string method means this is not a JSON-RPC envelope.
        Some(_) => return None,
    };
    // Remove rather than clone: the Value is ours.
    let params = obj.remove("params");

    Some(RequestEnvelope { id, method, params })
}

/// Snoop a response envelope out of a raw line.
pub fn snoop_response(line: &str) -> Option<ResponseEnvelope> {
    let mut value: Value = serde_json::from_str(line.trim()).ok()?;
    let obj = value.as_object_mut()?;

    let id = parse_id(obj.get("id")).ok()?;
    let result = obj.remove("result");
    let error = obj.remove("error");

    Some(ResponseEnvelope { id, result, error })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
