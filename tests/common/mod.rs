//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    http::{HeaderMap, Method, StatusCode, Uri},
    Json, Router,
};
use chaos_proxy::config::{ChaosSettings, ProxyConfig};
use chaos_proxy::lifecycle::OrchestratorState;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::watch;

pub const JSON_BODY: &str = r#"{"status":"ok","items":[1,2,3],"message":"hello from upstream"}"#;

/// Upstream that echoes what it received as JSON and counts its hits.
pub async fn start_echo_backend() -> (SocketAddr, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();

    let app = Router::new().fallback(
        move |method: Method, uri: Uri, headers: HeaderMap, body: Bytes| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                let header = |name: &str| {
                    headers
                        .get(name)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string)
                };
                Json(json!({
                    "method": method.as_str(),
                    "path": uri.path(),
                    "query": uri.query(),
                    "host": header("host"),
                    "user_agent": header("user-agent"),
                    "forwarded_host": header("x-forwarded-host"),
                    "body": String::from_utf8_lossy(&body),
                }))
            }
        },
    );

    (serve(app).await, hits)
}

/// Upstream that always answers with the fixed JSON document.
pub async fn start_json_backend() -> SocketAddr {
    let app = Router::new().fallback(|| async {
        (
            StatusCode::OK,
            [("content-type", "application/json")],
            JSON_BODY,
        )
    });
    serve(app).await
}

/// Upstream that answers only after `delay`.
pub async fn start_slow_backend(delay: Duration) -> SocketAddr {
    let app = Router::new().fallback(move || async move {
        tokio::time::sleep(delay).await;
        "slow"
    });
    serve(app).await
}

async fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

/// Proxy config on an ephemeral port in front of `upstream`.
pub fn proxy_config(upstream: SocketAddr, chaos: ChaosSettings) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.upstream.url = format!("http://{upstream}");
    config.upstream.timeout_secs = 2;
    config.timeouts.shutdown_grace_secs = 1;
    config.chaos = chaos;
    config
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// Wait until the orchestrator serves `generation` and return its address.
pub async fn serving(state: &mut watch::Receiver<OrchestratorState>, generation: u64) -> SocketAddr {
    let found = tokio::time::timeout(
        Duration::from_secs(10),
        state.wait_for(|s| matches!(s, OrchestratorState::Serving { generation: g, .. } if *g == generation)),
    )
    .await
    .expect("timed out waiting for server")
    .expect("orchestrator gone");

    match *found {
        OrchestratorState::Serving { addr, .. } => addr,
        _ => unreachable!(),
    }
}

pub async fn json(response: reqwest::Response) -> Value {
    response.json().await.unwrap()
}
