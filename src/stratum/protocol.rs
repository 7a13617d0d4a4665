use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StratumErrorCode;

/// One line of the newline-delimited JSON-RPC 2.0 wire protocol (spec §4.1/§7): requests and
/// notifications carry `method`/`params`; responses carry `result` xor `error`. A single
/// struct covers all three shapes, matching what actually crosses the wire line by line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StratumMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StratumError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StratumError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl StratumError {
    pub fn new(code: StratumErrorCode) -> Self {
        Self {
            code: code.code(),
            message: code.message().to_string(),
            data: None,
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self {
            code: StratumErrorCode::Other.code(),
            message: message.into(),
            data: None,
        }
    }
}

/// A parsed `mining.*` request (spec §4.2), decoupled from the raw JSON shape.
#[derive(Debug, Clone)]
pub enum StratumRequest {
    Configure {
        id: Value,
        extensions: Vec<String>,
        extension_params: Value,
    },
    Subscribe {
        id: Value,
        user_agent: Option<String>,
        session_id: Option<String>,
    },
    Authorize {
        id: Value,
        worker_name: String,
        password: Option<String>,
    },
    Submit {
        id: Value,
        worker_name: String,
        job_id: String,
        extra_nonce2: String,
        n_time: String,
        nonce: String,
    },
    ExtraNonceSubscribe {
        id: Value,
    },
}

impl StratumMessage {
    /// Decode the method-specific request shape, per the fixed positional param arrays each
    /// `mining.*` method uses on the wire.
    pub fn parse_request(&self) -> Result<StratumRequest, StratumError> {
        let method = self
            .method
            .as_ref()
            .ok_or_else(|| StratumError::malformed("missing method"))?;
        let id = self.id.clone().unwrap_or(Value::Null);

        match method.as_str() {
            "mining.configure" => {
                let params = self.params.as_ref().and_then(Value::as_array);
                let extensions = params
                    .and_then(|p| p.first())
                    .and_then(Value::as_array)
                    .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
                    .unwrap_or_default();
                let extension_params = params
                    .and_then(|p| p.get(1))
                    .cloned()
                    .unwrap_or(Value::Null);
                Ok(StratumRequest::Configure {
                    id,
                    extensions,
                    extension_params,
                })
            }
            "mining.subscribe" => {
                let params = self.params.as_ref().and_then(Value::as_array);
                let user_agent = params
                    .and_then(|p| p.first())
                    .and_then(Value::as_str)
                    .map(String::from);
                let session_id = params
                    .and_then(|p| p.get(1))
                    .and_then(Value::as_str)
                    .map(String::from);
                Ok(StratumRequest::Subscribe {
                    id,
                    user_agent,
                    session_id,
                })
            }
            "mining.authorize" => {
                let params = self
                    .params
                    .as_ref()
                    .and_then(Value::as_array)
                    .ok_or_else(|| StratumError::malformed("invalid params"))?;
                let worker_name = params
                    .first()
                    .and_then(Value::as_str)
                    .ok_or_else(|| StratumError::malformed("missing worker name"))?
                    .to_string();
                let password = params.get(1).and_then(Value::as_str).map(String::from);
                Ok(StratumRequest::Authorize {
                    id,
                    worker_name,
                    password,
                })
            }
            "mining.submit" => {
                let params = self
                    .params
                    .as_ref()
                    .and_then(Value::as_array)
                    .ok_or_else(|| StratumError::malformed("invalid params"))?;
                let at = |i: usize| -> Result<String, StratumError> {
                    params
                        .get(i)
                        .and_then(Value::as_str)
                        .map(String::from)
                        .ok_or_else(|| StratumError::malformed("missing submit parameter"))
                };
                Ok(StratumRequest::Submit {
                    id,
                    worker_name: at(0)?,
                    job_id: at(1)?,
                    extra_nonce2: at(2)?,
                    n_time: at(3)?,
                    nonce: at(4)?,
                })
            }
            "mining.extranonce.subscribe" => Ok(StratumRequest::ExtraNonceSubscribe { id }),
            other => Err(StratumError::malformed(format!("unknown method: {other}"))),
        }
    }
}

/// An outbound line: either a response to a request `id`, or an unsolicited notification.
#[derive(Debug, Clone)]
pub enum StratumResponse {
    Result { id: Value, result: Value },
    Error { id: Value, error: StratumError },
    Notification { method: String, params: Value },
}

impl StratumResponse {
    pub fn to_message(&self) -> StratumMessage {
        match self {
            StratumResponse::Result { id, result } => StratumMessage {
                id: Some(id.clone()),
                method: None,
                params: None,
                result: Some(result.clone()),
                error: None,
            },
            StratumResponse::Error { id, error } => StratumMessage {
                id: Some(id.clone()),
                method: None,
                params: None,
                result: None,
                error: Some(error.clone()),
            },
            StratumResponse::Notification { method, params } => StratumMessage {
                id: None,
                method: Some(method.clone()),
                params: Some(params.clone()),
                result: None,
                error: None,
            },
        }
    }

    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.to_message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_rpc_round_trips_through_message() {
        let resp = StratumResponse::Notification {
            method: "mining.notify".to_string(),
            params: serde_json::json!(["1", "prevhash", true]),
        };
        let line = resp.to_line().unwrap();
        let decoded: StratumMessage = serde_json::from_str(&line).unwrap();
        assert_eq!(decoded.method.as_deref(), Some("mining.notify"));
        assert_eq!(decoded.params, Some(serde_json::json!(["1", "prevhash", true])));
    }

    #[test]
    fn parses_submit_positional_params() {
        let msg = StratumMessage {
            id: Some(serde_json::json!(7)),
            method: Some("mining.submit".to_string()),
            params: Some(serde_json::json!(["alice.worker1", "1", "00000001", "5f5e100", "1a2b3c4d"])),
            result: None,
            error: None,
        };
        match msg.parse_request().unwrap() {
            StratumRequest::Submit { worker_name, job_id, extra_nonce2, n_time, nonce, .. } => {
                assert_eq!(worker_name, "alice.worker1");
                assert_eq!(job_id, "1");
                assert_eq!(extra_nonce2, "00000001");
                assert_eq!(n_time, "5f5e100");
                assert_eq!(nonce, "1a2b3c4d");
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn unknown_method_is_rejected() {
        let msg = StratumMessage {
            id: Some(serde_json::json!(1)),
            method: Some("mining.frobnicate".to_string()),
            params: None,
            result: None,
            error: None,
        };
        assert!(msg.parse_request().is_err());
    }
}
