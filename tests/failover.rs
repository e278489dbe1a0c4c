//! Failure injection: dead backends, exhausted pools, expired deadlines.

use std::net::SocketAddr;
use std::time::Duration;

mod common;

use common::{
    backend_config, base_config, route_config, spawn_proxy, start_mock_backend,
    start_programmable_backend, start_recording_backend, test_client,
};

/// Bind then drop a listener to get a port with nothing behind it.
async fn dead_port() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

#[tokio::test]
async fn connect_failure_fails_over_to_alternate_backend() {
    let dead = dead_port().await;
    let live = start_mock_backend("alive").await;

    let mut config = base_config();
    // Registration order makes the dead backend the first pick.
    config.backends.push(backend_config("dead", "web", dead, 1));
    config.backends.push(backend_config("live", "web", live, 1));
    config.routes.push(route_config("r", "/", "web"));
    config.limits.retry_alternates = 1;

    let proxy = spawn_proxy(config).await;
    let client = test_client();

    let resp = client
        .get(format!("http://{}/x", proxy.addr))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "alive");
}

#[tokio::test]
async fn passive_marking_steers_traffic_off_dead_backend() {
    let dead = dead_port().await;
    let (live, seen) = start_recording_backend("alive").await;

    let mut config = base_config();
    config.backends.push(backend_config("dead", "web", dead, 1));
    config.backends.push(backend_config("live", "web", live, 1));
    config.routes.push(route_config("r", "/", "web"));
    config.limits.retry_alternates = 1;
    // One connect failure is enough to take the backend out.
    config.health_check.unhealthy_threshold = 1;

    let proxy = spawn_proxy(config).await;
    let client = test_client();

    let total = 50;
    for _ in 0..total {
        let resp = client
            .get(format!("http://{}/x", proxy.addr))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }

    // Every request landed on the live backend; the dead one was marked
    // down after the first failed connect and never silently retried.
    assert_eq!(seen.lock().unwrap().len(), total);
}

#[tokio::test]
async fn exhausted_group_maps_to_bad_gateway_then_unavailable() {
    let d1 = dead_port().await;
    let d2 = dead_port().await;

    let mut config = base_config();
    config.backends.push(backend_config("d1", "web", d1, 1));
    config.backends.push(backend_config("d2", "web", d2, 1));
    config.routes.push(route_config("r", "/", "web"));
    config.limits.retry_alternates = 1;
    config.health_check.unhealthy_threshold = 1;

    let proxy = spawn_proxy(config).await;
    let client = test_client();

    // First request exhausts the bounded retries across both backends.
    let resp = client
        .get(format!("http://{}/x", proxy.addr))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 502);
    assert_eq!(resp.text().await.unwrap(), "Upstream request failed");

    // Both backends are now marked down, so selection itself fails.
    let resp = client
        .get(format!("http://{}/x", proxy.addr))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);
    assert_eq!(resp.text().await.unwrap(), "No healthy backends");
}

#[tokio::test]
async fn pool_cap_holds_second_request_until_timeout() {
    // One slow backend with a single connection slot.
    let slow = start_programmable_backend(|_path| async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        (200, "slow".to_string())
    })
    .await;

    let mut config = base_config();
    let mut backend = backend_config("slow", "web", slow, 1);
    backend.max_connections = 1;
    config.backends.push(backend);
    config.routes.push(route_config("r", "/", "web"));
    config.pool.acquire_timeout_ms = 200;
    config.limits.retry_alternates = 0;

    let proxy = spawn_proxy(config).await;
    let client = test_client();

    let first = {
        let client = client.clone();
        let addr = proxy.addr;
        tokio::spawn(async move {
            client
                .get(format!("http://{addr}/x"))
                .send()
                .await
                .unwrap()
                .status()
        })
    };
    // Let the first request claim the only slot.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let second = client
        .get(format!("http://{}/x", proxy.addr))
        .send()
        .await
        .unwrap();

    assert_eq!(second.status(), 502, "second request should hit PoolExhausted");
    assert_eq!(first.await.unwrap(), 200);
}

#[tokio::test]
async fn expired_deadline_maps_to_gateway_timeout() {
    let slow = start_programmable_backend(|_path| async {
        tokio::time::sleep(Duration::from_secs(5)).await;
        (200, "too late".to_string())
    })
    .await;

    let mut config = base_config();
    config.backends.push(backend_config("slow", "web", slow, 1));
    config.routes.push(route_config("r", "/", "web"));
    config.timeouts.request_secs = 1;

    let proxy = spawn_proxy(config).await;
    let client = test_client();

    let started = std::time::Instant::now();
    let resp = client
        .get(format!("http://{}/x", proxy.addr))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 504);
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn probes_evict_unhealthy_backend() {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    let healthy = Arc::new(AtomicBool::new(true));
    let flag = healthy.clone();
    let flaky = start_programmable_backend(move |_path| {
        let flag = flag.clone();
        async move {
            if flag.load(Ordering::SeqCst) {
                (200, "flaky".to_string())
            } else {
                (503, "down".to_string())
            }
        }
    })
    .await;
    let (steady, seen) = start_recording_backend("steady").await;

    let mut config = base_config();
    config.backends.push(backend_config("flaky", "web", flaky, 1));
    config.backends.push(backend_config("steady", "web", steady, 1));
    config.routes.push(route_config("r", "/", "web"));
    config.health_check.enabled = true;
    config.health_check.interval_secs = 1;
    config.health_check.unhealthy_threshold = 2;
    config.health_check.healthy_threshold = 2;

    let proxy = spawn_proxy(config).await;
    let client = test_client();

    // Take the flaky backend down and give the prober time to notice.
    healthy.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(4)).await;

    seen.lock().unwrap().clear();
    for _ in 0..20 {
        let resp = client
            .get(format!("http://{}/x", proxy.addr))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.text().await.unwrap(), "steady");
    }
    assert_eq!(seen.lock().unwrap().len(), 20);
}
