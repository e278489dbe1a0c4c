//! Shared utilities for integration testing.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use reproxy::config::{BackendConfig, ProxyConfig, RouteConfig};
use reproxy::{HttpServer, Listener, Shutdown};

/// Read one HTTP/1.1 request from the socket: head plus any body declared
/// by content-length. Returns the request path.
async fn read_request(socket: &mut TcpStream) -> Option<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];

    let head_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        if buf.len() > 64 * 1024 {
            return None;
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let path = head.split_whitespace().nth(1)?.to_string();

    let content_length: usize = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            if name.eq_ignore_ascii_case("content-length") {
                value.trim().parse().ok()
            } else {
                None
            }
        })
        .unwrap_or(0);

    let mut remaining = content_length.saturating_sub(buf.len() - head_end);
    while remaining > 0 {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        remaining = remaining.saturating_sub(n);
    }

    Some(path)
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "200 OK",
        404 => "404 Not Found",
        429 => "429 Too Many Requests",
        500 => "500 Internal Server Error",
        502 => "502 Bad Gateway",
        503 => "503 Service Unavailable",
        _ => "200 OK",
    }
}

/// Start a mock backend whose response is computed per request from the
/// request path.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        while let Some(path) = read_request(&mut socket).await {
                            let (status, body) = f(path).await;
                            let response = format!(
                                "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                                reason(status),
                                body.len(),
                                body
                            );
                            if socket.write_all(response.as_bytes()).await.is_err() {
                                break;
                            }
                            let _ = socket.shutdown().await;
                            break;
                        }
                    });
                }
                Err(_) => break,
            }
        }
    });
    addr
}

/// Start a mock backend that returns a fixed body and responds 200 to
/// health probes.
pub async fn start_mock_backend(body: &'static str) -> SocketAddr {
    start_programmable_backend(move |_path| async move { (200, body.to_string()) }).await
}

/// Start a mock backend that records every non-probe request path.
pub async fn start_recording_backend(
    body: &'static str,
) -> (SocketAddr, Arc<Mutex<Vec<String>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let record = seen.clone();
    let addr = start_programmable_backend(move |path| {
        let record = record.clone();
        async move {
            if path != "/health" {
                record.lock().unwrap().push(path);
            }
            (200, body.to_string())
        }
    })
    .await;
    (addr, seen)
}

pub fn backend_config(name: &str, group: &str, addr: SocketAddr, weight: u32) -> BackendConfig {
    BackendConfig {
        name: name.into(),
        group: group.into(),
        address: addr.to_string(),
        weight,
        max_connections: 100,
    }
}

pub fn route_config(name: &str, prefix: &str, group: &str) -> RouteConfig {
    RouteConfig {
        name: name.into(),
        host: None,
        path_prefix: Some(prefix.into()),
        methods: vec![],
        backend_group: group.into(),
        rewrite: None,
        headers: Default::default(),
    }
}

/// A config with health probing and retries tuned for fast, quiet tests.
pub fn base_config() -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.health_check.enabled = false;
    config.pool.acquire_timeout_ms = 300;
    config.timeouts.connect_secs = 1;
    config
}

/// Running proxy instance for one test.
pub struct ProxyHandle {
    pub addr: SocketAddr,
    pub shutdown: Arc<Shutdown>,
    pub reload_tx: mpsc::UnboundedSender<ProxyConfig>,
}

impl Drop for ProxyHandle {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Bind an ephemeral port, start the proxy on it and wait until it accepts.
pub async fn spawn_proxy(config: ProxyConfig) -> ProxyHandle {
    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = tcp.local_addr().unwrap();
    let listener = Listener::from_tcp(tcp, config.listener.max_connections);

    let shutdown = Arc::new(Shutdown::new());
    let (reload_tx, reload_rx) = mpsc::unbounded_channel();

    let server = HttpServer::new(config);
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, reload_rx, server_shutdown).await;
    });

    // Wait for the accept loop to come up.
    for _ in 0..50 {
        if TcpStream::connect(addr).await.is_ok() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    ProxyHandle {
        addr,
        shutdown,
        reload_tx,
    }
}

/// A reqwest client that neither pools nor proxies.
pub fn test_client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
