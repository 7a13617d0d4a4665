use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One configured upstream coin daemon.
#[derive(Debug, Clone)]
pub struct DaemonEndpoint {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl DaemonEndpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            password: None,
        }
    }

    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcWireResponse {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcError>,
}

/// The `error` member of a JSON-RPC 2.0 response object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// The outcome of a single daemon call, as seen by a caller: either a decoded result or an
/// RpcError. Network errors, non-2xx statuses, parse failures, and id mismatches are all
/// folded into `error` rather than propagated as a transport exception — callers treat error
/// responses as ordinary data (spec §4.1 failure semantics).
#[derive(Debug, Clone)]
pub struct DaemonResponse<T> {
    pub result: Option<T>,
    pub error: Option<RpcError>,
    /// Which configured endpoint (by index into the client's endpoint list) produced this
    /// response. `executeAll` preserves endpoint order using this field.
    pub endpoint_index: usize,
}

impl<T> DaemonResponse<T> {
    pub fn ok(result: T, endpoint_index: usize) -> Self {
        Self {
            result: Some(result),
            error: None,
            endpoint_index,
        }
    }

    pub fn err(error: RpcError, endpoint_index: usize) -> Self {
        Self {
            result: None,
            error: Some(error),
            endpoint_index,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.result.is_some()
    }
}

pub(crate) fn transport_error(message: impl Into<String>) -> RpcError {
    RpcError {
        code: -32000,
        message: message.into(),
        data: None,
    }
}
