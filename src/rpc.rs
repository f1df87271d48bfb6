//! JSON-RPC 2.0 request/response types and the PHD2 parameter-wrapping rule.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::Phd2Event;

/// A PHD2 JSON-RPC request. Note there is no `jsonrpc` property on the
/// request side of this protocol, only on responses.
#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest {
    pub method: String,
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// The one request id this client ever uses. The protocol is strictly
/// single-in-flight, so there is never a need to distinguish calls by id.
pub const REQUEST_ID: u64 = 1;

impl RpcRequest {
    /// Build a request, applying PHD2's `_make_jsonrpc` parameter rule:
    /// `None` omits `params` entirely; an array or object is passed through
    /// verbatim; any other scalar is wrapped as a one-element array.
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        let params = params.map(|p| match p {
            Value::Array(_) | Value::Object(_) => p,
            scalar => Value::Array(vec![scalar]),
        });
        Self {
            method: method.into(),
            id: REQUEST_ID,
            params,
        }
    }

    /// Serialize to the exact wire form: no insignificant whitespace.
    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// A PHD2 JSON-RPC response.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcResponse {
    #[allow(dead_code)]
    pub jsonrpc: String,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcErrorObject>,
    #[serde(default)]
    pub id: Option<u64>,
}

/// A JSON-RPC error object.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcErrorObject {
    #[allow(dead_code)]
    pub code: i32,
    pub message: String,
}

/// One parsed inbound line: either a JSON-RPC response (has a `jsonrpc`
/// property) or an event (keyed by `Event`). Whichever arm the line
/// deserializes into determines whether it's routed to the pending
/// response slot or the state projector.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Phd2Message {
    Response(RpcResponse),
    Event(Phd2Event),
}
