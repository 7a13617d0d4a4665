pub mod client;
pub mod types;

pub use client::{BatchCommand, DaemonClient};
pub use types::{DaemonEndpoint, DaemonResponse, RpcError};

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Json, Router};
    use serde_json::{json, Value};
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    async fn spawn_daemon(behavior: fn(Value) -> Value) -> String {
        let app = Router::new().route(
            "/",
            post(move |Json(body): Json<Value>| async move { Json(behavior(body)) }),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        format!("http://{addr}/")
    }

    fn echo_getinfo(body: Value) -> Value {
        json!({"jsonrpc": "2.0", "id": body["id"], "result": {"blocks": 800000}})
    }

    fn always_error(body: Value) -> Value {
        json!({"jsonrpc": "2.0", "id": body["id"], "error": {"code": -10, "message": "not synched"}})
    }

    #[tokio::test]
    async fn execute_any_returns_first_success() {
        let good = spawn_daemon(echo_getinfo).await;
        let bad = spawn_daemon(always_error).await;

        let client = DaemonClient::new(vec![
            DaemonEndpoint::new(bad),
            DaemonEndpoint::new(good),
        ]);

        let resp: DaemonResponse<Value> = client.execute_any("getinfo", json!([]), None).await;
        assert!(resp.is_success());
        assert_eq!(resp.result.unwrap()["blocks"], 800000);
    }

    #[tokio::test]
    async fn execute_any_aggregates_error_when_all_fail() {
        let bad1 = spawn_daemon(always_error).await;
        let bad2 = spawn_daemon(always_error).await;

        let client = DaemonClient::new(vec![DaemonEndpoint::new(bad1), DaemonEndpoint::new(bad2)]);

        let resp: DaemonResponse<Value> = client.execute_any("getblocktemplate", json!([]), None).await;
        assert!(!resp.is_success());
        assert_eq!(resp.error.unwrap().code, -10);
    }

    #[tokio::test]
    async fn execute_all_preserves_endpoint_order() {
        let a = spawn_daemon(echo_getinfo).await;
        let b = spawn_daemon(always_error).await;

        let client = DaemonClient::new(vec![DaemonEndpoint::new(a), DaemonEndpoint::new(b)]);

        let results: Vec<DaemonResponse<Value>> = client.execute_all("getinfo", json!([]), None).await;
        assert_eq!(results.len(), 2);
        assert!(results[0].is_success());
        assert!(!results[1].is_success());
        assert_eq!(results[0].endpoint_index, 0);
        assert_eq!(results[1].endpoint_index, 1);
    }

    #[tokio::test]
    async fn execute_any_with_no_endpoints_is_an_error_not_a_panic() {
        let client = DaemonClient::new(vec![]);
        let resp: DaemonResponse<Value> = client.execute_any("getinfo", json!([]), None).await;
        assert!(!resp.is_success());
    }
}
