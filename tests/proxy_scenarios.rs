//! End-to-end tests: real client → proxy → real upstream.

use std::time::{Duration, Instant};

use chaos_proxy::config::{ChaosSettings, FileConfigSource, Overrides};
use chaos_proxy::lifecycle::{Orchestrator, OrchestratorState, ServerInstance};
use tokio::sync::{mpsc, oneshot};

mod common;

use common::{client, json, proxy_config, JSON_BODY};

#[tokio::test]
async fn passthrough_forwards_request_unchanged() {
    let (upstream, hits) = common::start_echo_backend().await;
    let proxy = ServerInstance::start(&proxy_config(upstream, ChaosSettings::default()), 1)
        .await
        .unwrap();
    let proxy_addr = proxy.local_addr();

    let res = client()
        .post(format!("http://{proxy_addr}/api/items?limit=5"))
        .body("payload")
        .send()
        .await
        .expect("Proxy unreachable");

    assert_eq!(res.status(), 200);
    assert!(res.headers().contains_key("x-request-id"));

    let echo = json(res).await;
    assert_eq!(echo["method"], "POST");
    assert_eq!(echo["path"], "/api/items");
    assert_eq!(echo["query"], "limit=5");
    assert_eq!(echo["body"], "payload");
    assert_eq!(echo["host"], upstream.to_string());
    assert_eq!(echo["forwarded_host"], proxy_addr.to_string());
    assert!(echo["user_agent"].as_str().unwrap().starts_with("chaos-proxy/"));
    assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 1);

    proxy.drain().await.unwrap();
}

#[tokio::test]
async fn dropped_request_times_out_client() {
    let (upstream, hits) = common::start_echo_backend().await;
    let chaos = ChaosSettings {
        drop_rate: 100.0,
        ..Default::default()
    };
    let proxy = ServerInstance::start(&proxy_config(upstream, chaos), 1)
        .await
        .unwrap();

    let result = client()
        .get(format!("http://{}/", proxy.local_addr()))
        .timeout(Duration::from_millis(500))
        .send()
        .await;

    let err = result.expect_err("dropped request got a response");
    assert!(err.is_timeout(), "expected timeout, got {err}");
    assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 0);

    proxy.drain().await.unwrap();
}

#[tokio::test]
async fn injected_error_never_reaches_upstream() {
    let (upstream, hits) = common::start_echo_backend().await;
    let chaos = ChaosSettings {
        error_rate: 100.0,
        error_code: 503,
        ..Default::default()
    };
    let proxy = ServerInstance::start(&proxy_config(upstream, chaos), 1)
        .await
        .unwrap();

    let res = client()
        .get(format!("http://{}/anything", proxy.local_addr()))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 503);
    assert_eq!(res.text().await.unwrap(), "Chaos injected error 503\n");
    assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 0);

    proxy.drain().await.unwrap();
}

#[tokio::test]
async fn fixed_latency_delays_response() {
    let upstream = common::start_json_backend().await;
    let chaos = ChaosSettings {
        latency_ms: 100,
        ..Default::default()
    };
    let proxy = ServerInstance::start(&proxy_config(upstream, chaos), 1)
        .await
        .unwrap();

    let start = Instant::now();
    let res = client()
        .get(format!("http://{}/", proxy.local_addr()))
        .send()
        .await
        .unwrap();

    assert!(start.elapsed() >= Duration::from_millis(100));
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), JSON_BODY);

    proxy.drain().await.unwrap();
}

#[tokio::test]
async fn corrupted_responses_differ_from_upstream() {
    let upstream = common::start_json_backend().await;
    let chaos = ChaosSettings {
        corrupt_rate: 100.0,
        seed: Some(7),
        ..Default::default()
    };
    let proxy = ServerInstance::start(&proxy_config(upstream, chaos), 1)
        .await
        .unwrap();

    let client = client();
    let half = JSON_BODY.len() / 2;
    let mut halved = 0;
    for _ in 0..40 {
        let res = client
            .get(format!("http://{}/", proxy.local_addr()))
            .send()
            .await
            .expect("corrupted response never arrived");
        assert_eq!(res.status(), 200);

        let advertised = res
            .headers()
            .get("content-length")
            .map(|v| v.to_str().unwrap().parse::<usize>().unwrap());
        let body = res.bytes().await.expect("corrupted body was cut off");
        assert_ne!(&body[..], JSON_BODY.as_bytes(), "body passed through uncorrupted");
        if let Some(length) = advertised {
            assert_eq!(length, body.len());
        }
        if advertised == Some(half) {
            assert_eq!(&body[..], &JSON_BODY.as_bytes()[..half]);
            halved += 1;
        }
    }
    assert!(halved > 0, "no response advertised half the upstream length");

    proxy.drain().await.unwrap();
}

#[tokio::test]
async fn unreachable_upstream_is_bad_gateway() {
    let dead = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let upstream = dead.local_addr().unwrap();
    drop(dead);

    let proxy = ServerInstance::start(&proxy_config(upstream, ChaosSettings::default()), 1)
        .await
        .unwrap();

    let res = client()
        .get(format!("http://{}/", proxy.local_addr()))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 502);

    proxy.drain().await.unwrap();
}

#[tokio::test]
async fn slow_upstream_is_gateway_timeout() {
    let upstream = common::start_slow_backend(Duration::from_secs(5)).await;
    let mut config = proxy_config(upstream, ChaosSettings::default());
    config.upstream.timeout_secs = 1;
    let proxy = ServerInstance::start(&config, 1).await.unwrap();

    let res = client()
        .get(format!("http://{}/", proxy.local_addr()))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 504);

    proxy.drain().await.unwrap();
}

#[tokio::test]
async fn drain_lets_in_flight_request_finish() {
    let upstream = common::start_json_backend().await;
    let chaos = ChaosSettings {
        latency_ms: 300,
        ..Default::default()
    };
    let proxy = ServerInstance::start(&proxy_config(upstream, chaos), 1)
        .await
        .unwrap();
    let url = format!("http://{}/", proxy.local_addr());

    let request = tokio::spawn(async move { client().get(url).send().await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    proxy.drain().await.unwrap();

    let res = request.await.unwrap().expect("in-flight request was cut off");
    assert_eq!(res.status(), 200);
}

#[tokio::test]
async fn drain_gives_up_after_grace_period() {
    let upstream = common::start_json_backend().await;
    let chaos = ChaosSettings {
        latency_ms: 10_000,
        ..Default::default()
    };
    let proxy = ServerInstance::start(&proxy_config(upstream, chaos), 1)
        .await
        .unwrap();
    let url = format!("http://{}/", proxy.local_addr());

    let request = tokio::spawn(async move { client().get(url).send().await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let start = Instant::now();
    proxy.drain().await.unwrap();
    assert!(start.elapsed() < Duration::from_secs(3));

    let result = request.await.unwrap();
    assert!(result.is_err(), "request outlived the drain deadline");
}

#[tokio::test]
async fn reload_applies_valid_config_and_rejects_invalid_one() {
    let (upstream, _) = common::start_echo_backend().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chaos-proxy.toml");
    let write = |extra: &str, url: &str| {
        let content = format!(
            "[listener]\nbind_address = \"127.0.0.1:0\"\n\n\
             [upstream]\nurl = \"{url}\"\n\n\
             [timeouts]\nshutdown_grace_secs = 1\n\n\
             [chaos]\n{extra}\n"
        );
        std::fs::write(&path, content).unwrap();
    };
    let upstream_url = format!("http://{upstream}");
    write("", &upstream_url);

    let orchestrator = Orchestrator::new(FileConfigSource::new(&path, Overrides::default()));
    let mut state = orchestrator.subscribe();
    let (reload_tx, reload_rx) = mpsc::channel(1);
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let run = tokio::spawn(orchestrator.run(Some(reload_rx), async {
        let _ = stop_rx.await;
    }));

    let client = client();
    let addr = common::serving(&mut state, 1).await;
    let res = client.get(format!("http://{addr}/")).send().await.unwrap();
    assert_eq!(res.status(), 200);

    // Invalid reload: previous snapshot keeps serving.
    write("", "");
    reload_tx.send(()).await.unwrap();
    let addr = common::serving(&mut state, 2).await;
    let res = client.get(format!("http://{addr}/")).send().await.unwrap();
    assert_eq!(res.status(), 200);

    // Valid reload: new behavior applies.
    write("error_rate = 100.0\nerror_code = 503", &upstream_url);
    reload_tx.send(()).await.unwrap();
    let addr = common::serving(&mut state, 3).await;
    let res = client.get(format!("http://{addr}/")).send().await.unwrap();
    assert_eq!(res.status(), 503);

    stop_tx.send(()).unwrap();
    run.await.unwrap().unwrap();
    assert_eq!(*state.borrow(), OrchestratorState::Terminated);
}
