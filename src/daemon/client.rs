use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::types::{transport_error, DaemonEndpoint, DaemonResponse, JsonRpcRequest, JsonRpcWireResponse, RpcError};

/// A single JSON-RPC command as used by [`DaemonClient::execute_batch_any`].
#[derive(Debug, Clone)]
pub struct BatchCommand {
    pub method: String,
    pub params: Value,
}

impl BatchCommand {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

/// Redundant JSON-RPC 2.0 client fanning calls out across N configured upstream daemons.
///
/// `executeAny` (first success) and `executeAll` (every response) mirror the two consumption
/// patterns the Job Manager needs: racing redundant daemons for latency, or polling every
/// daemon's view of health/sync state before startup.
pub struct DaemonClient {
    endpoints: Vec<DaemonEndpoint>,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl DaemonClient {
    pub fn new(endpoints: Vec<DaemonEndpoint>) -> Self {
        Self::with_timeout(endpoints, Duration::from_secs(15))
    }

    pub fn with_timeout(endpoints: Vec<DaemonEndpoint>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client builder with static configuration cannot fail");

        Self {
            endpoints,
            http,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn call_endpoint(
        &self,
        index: usize,
        request: &JsonRpcRequest,
        cancel: Option<&CancellationToken>,
    ) -> DaemonResponse<Value> {
        let endpoint = &self.endpoints[index];

        let send = async {
            let mut builder = self.http.post(&endpoint.url).json(request);
            if let Some(user) = &endpoint.username {
                builder = builder.basic_auth(user, endpoint.password.as_ref());
            }

            let response = match builder.send().await {
                Ok(r) => r,
                Err(e) => return DaemonResponse::err(transport_error(e.to_string()), index),
            };

            if !response.status().is_success() {
                let status = response.status();
                return DaemonResponse::err(
                    transport_error(format!("http status {status}")),
                    index,
                );
            }

            let wire: JsonRpcWireResponse = match response.json().await {
                Ok(w) => w,
                Err(e) => return DaemonResponse::err(transport_error(format!("parse error: {e}")), index),
            };

            let response_id = wire.id.as_ref().and_then(Value::as_u64);
            if response_id != Some(request.id) {
                return DaemonResponse::err(
                    transport_error(format!(
                        "response id mismatch: expected {}, got {:?}",
                        request.id, wire.id
                    )),
                    index,
                );
            }

            if let Some(err) = wire.error {
                return DaemonResponse::err(err, index);
            }

            DaemonResponse::ok(wire.result.unwrap_or(Value::Null), index)
        };

        if let Some(cancel) = cancel {
            tokio::select! {
                result = send => result,
                _ = cancel.cancelled() => {
                    debug!(endpoint = %endpoint.url, "daemon call cancelled");
                    DaemonResponse::err(transport_error("call cancelled"), index)
                }
            }
        } else {
            send.await
        }
    }

    /// Issue `method` concurrently to every endpoint, return the first success.
    ///
    /// If every endpoint fails, the aggregate error from the first (index 0) endpoint is
    /// returned rather than raised — callers treat a fully-failed `executeAny` as ordinary
    /// error data, not an exception.
    pub async fn execute_any<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
        cancel: Option<&CancellationToken>,
    ) -> DaemonResponse<T> {
        if self.endpoints.is_empty() {
            return DaemonResponse::err(transport_error("no daemon endpoints configured"), 0);
        }

        let id = self.next_request_id();
        let request = JsonRpcRequest::new(id, method, params);

        let calls = (0..self.endpoints.len()).map(|i| self.call_endpoint(i, &request, cancel));
        let mut results = join_all(calls).await;

        if let Some(pos) = results.iter().position(DaemonResponse::is_success) {
            let raw = results.swap_remove(pos);
            return decode_response(raw, method);
        }

        warn!(method, "all daemon endpoints failed for executeAny");
        let aggregate = results.into_iter().next().expect("non-empty endpoint list");
        DaemonResponse {
            result: None,
            error: aggregate.error,
            endpoint_index: aggregate.endpoint_index,
        }
    }

    /// Issue `method` to every endpoint and await every response, preserving endpoint order.
    pub async fn execute_all<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
        cancel: Option<&CancellationToken>,
    ) -> Vec<DaemonResponse<T>> {
        if self.endpoints.is_empty() {
            return Vec::new();
        }

        let id = self.next_request_id();
        let request = JsonRpcRequest::new(id, method, params);

        let calls = (0..self.endpoints.len()).map(|i| self.call_endpoint(i, &request, cancel));
        join_all(calls)
            .await
            .into_iter()
            .map(|raw| decode_response(raw, method))
            .collect()
    }

    /// Send one JSON-RPC batch request per endpoint; return results in `cmds` order from the
    /// first endpoint that returns a successfully-parsed batch.
    pub async fn execute_batch_any(
        &self,
        cmds: &[BatchCommand],
        cancel: Option<&CancellationToken>,
    ) -> Vec<DaemonResponse<Value>> {
        if self.endpoints.is_empty() || cmds.is_empty() {
            return Vec::new();
        }

        let requests: Vec<JsonRpcRequest> = cmds
            .iter()
            .map(|c| JsonRpcRequest::new(self.next_request_id(), &c.method, c.params.clone()))
            .collect();

        for index in 0..self.endpoints.len() {
            match self.send_batch(index, &requests, cancel).await {
                Some(results) => return results,
                None => continue,
            }
        }

        cmds.iter()
            .map(|_| DaemonResponse::err(transport_error("all endpoints failed batch request"), 0))
            .collect()
    }

    async fn send_batch(
        &self,
        index: usize,
        requests: &[JsonRpcRequest],
        cancel: Option<&CancellationToken>,
    ) -> Option<Vec<DaemonResponse<Value>>> {
        let endpoint = &self.endpoints[index];

        let send = async {
            let mut builder = self.http.post(&endpoint.url).json(requests);
            if let Some(user) = &endpoint.username {
                builder = builder.basic_auth(user, endpoint.password.as_ref());
            }
            let response = builder.send().await.ok()?;
            if !response.status().is_success() {
                return None;
            }
            let wires: Vec<JsonRpcWireResponse> = response.json().await.ok()?;
            Some(wires)
        };

        let wires = if let Some(cancel) = cancel {
            tokio::select! {
                result = send => result,
                _ = cancel.cancelled() => None,
            }
        } else {
            send.await
        }?;

        let mut by_id: std::collections::HashMap<u64, JsonRpcWireResponse> = wires
            .into_iter()
            .filter_map(|w| w.id.as_ref().and_then(Value::as_u64).map(|id| (id, w)))
            .collect();

        Some(
            requests
                .iter()
                .map(|req| match by_id.remove(&req.id) {
                    Some(wire) => match wire.error {
                        Some(err) => DaemonResponse::err(err, index),
                        None => DaemonResponse::ok(wire.result.unwrap_or(Value::Null), index),
                    },
                    None => DaemonResponse::err(
                        transport_error(format!("missing batch response for id {}", req.id)),
                        index,
                    ),
                })
                .collect(),
        )
    }
}

fn decode_response<T: DeserializeOwned>(raw: DaemonResponse<Value>, method: &str) -> DaemonResponse<T> {
    match raw.result {
        Some(value) => match serde_json::from_value::<T>(value) {
            Ok(decoded) => DaemonResponse::ok(decoded, raw.endpoint_index),
            Err(e) => DaemonResponse::err(
                RpcError {
                    code: -32001,
                    message: format!("failed to decode {method} result: {e}"),
                    data: None,
                },
                raw.endpoint_index,
            ),
        },
        None => DaemonResponse {
            result: None,
            error: raw.error,
            endpoint_index: raw.endpoint_index,
        },
    }
}
