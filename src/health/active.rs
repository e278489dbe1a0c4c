//! Active health probing.
//!
//! # Responsibilities
//! - Run one probe loop per backend, independently scheduled
//! - Update backend health state through the hysteresis counters
//! - Reconcile probe tasks when the backend set changes
//!
//! # Design Decisions
//! - Each loop starts with a random jitter so probes never align into a
//!   thundering herd against the backends
//! - Probes dial their own ephemeral connection; the request pool is never
//!   borrowed for probing
//! - A probe failure only updates state, it is never fatal

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::Request;
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, timeout};

use crate::config::schema::HealthCheckConfig;
use crate::load_balancer::backend::{Backend, BackendStatus};
use crate::load_balancer::registry::BackendRegistry;
use crate::observability::metrics;

/// Drives active health probes for every registered backend.
pub struct HealthMonitor {
    registry: Arc<BackendRegistry>,
    config: HealthCheckConfig,
}

impl HealthMonitor {
    pub fn new(registry: Arc<BackendRegistry>, config: HealthCheckConfig) -> Self {
        Self { registry, config }
    }

    /// Run until shutdown. Periodically reconciles the probe-task set
    /// against the registry so reloads pick up new backends and drop
    /// removed ones.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Active health probes disabled");
            return;
        }

        tracing::info!(
            interval = self.config.interval_secs,
            path = %self.config.path,
            "Health monitor starting"
        );

        let mut probes: HashMap<SocketAddr, JoinHandle<()>> = HashMap::new();
        let mut ticker = time::interval(Duration::from_secs(self.config.interval_secs.max(1)));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.reconcile(&mut probes);
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor shutting down");
                    break;
                }
            }
        }

        for (_, handle) in probes {
            handle.abort();
        }
    }

    fn reconcile(&self, probes: &mut HashMap<SocketAddr, JoinHandle<()>>) {
        let backends = self.registry.snapshot();

        probes.retain(|addr, handle| {
            let keep = !handle.is_finished()
                && backends
                    .iter()
                    .any(|b| b.addr == *addr && b.status() != BackendStatus::Draining);
            if !keep {
                handle.abort();
            }
            keep
        });

        for backend in backends {
            if backend.status() == BackendStatus::Draining {
                continue;
            }
            probes.entry(backend.addr).or_insert_with(|| {
                tokio::spawn(probe_loop(backend.clone(), self.config.clone()))
            });
        }
    }
}

/// Probe one backend forever, on its own schedule.
async fn probe_loop(backend: Arc<Backend>, config: HealthCheckConfig) {
    let interval = Duration::from_secs(config.interval_secs.max(1));

    // Spread probe start times across the interval.
    let jitter = fastrand::u64(..interval.as_millis().max(1) as u64);
    time::sleep(Duration::from_millis(jitter)).await;

    loop {
        if backend.status() == BackendStatus::Draining {
            return;
        }

        let healthy = probe_once(&backend, &config).await;
        backend.touch_probe();

        let transition = if healthy {
            backend.mark_success(config.healthy_threshold as usize)
        } else {
            backend.mark_failure(config.unhealthy_threshold as usize)
        };

        if let Some(status) = transition {
            tracing::warn!(
                backend = %backend.name,
                addr = %backend.addr,
                status = ?status,
                "Backend health transition"
            );
            metrics::record_health_transition(&backend.name, status);
        }
        metrics::record_backend_health(&backend.name, backend.is_selectable());

        time::sleep(interval).await;
    }
}

/// One liveness check over a fresh, throwaway connection.
async fn probe_once(backend: &Backend, config: &HealthCheckConfig) -> bool {
    let probe_timeout = Duration::from_secs(config.timeout_secs.max(1));

    let stream = match timeout(probe_timeout, TcpStream::connect(backend.addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            tracing::debug!(addr = %backend.addr, error = %e, "Probe connect failed");
            return false;
        }
        Err(_) => {
            tracing::debug!(addr = %backend.addr, "Probe connect timed out");
            return false;
        }
    };

    let (mut sender, conn) = match http1::handshake::<_, Body>(TokioIo::new(stream)).await {
        Ok(pair) => pair,
        Err(e) => {
            tracing::debug!(addr = %backend.addr, error = %e, "Probe handshake failed");
            return false;
        }
    };
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let request = match Request::builder()
        .method("GET")
        .uri(config.path.as_str())
        .header("host", backend.addr.to_string())
        .header("user-agent", "reproxy-health")
        .body(Body::empty())
    {
        Ok(req) => req,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build probe request");
            return false;
        }
    };

    match timeout(probe_timeout, sender.send_request(request)).await {
        Ok(Ok(response)) => {
            let success = response.status().is_success();
            if !success {
                tracing::debug!(addr = %backend.addr, status = %response.status(), "Probe returned non-success");
            }
            success
        }
        Ok(Err(e)) => {
            tracing::debug!(addr = %backend.addr, error = %e, "Probe request failed");
            false
        }
        Err(_) => {
            tracing::debug!(addr = %backend.addr, "Probe timed out");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    async fn serve_status(status: &'static str) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let response = format!(
                        "HTTP/1.1 {status}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        addr
    }

    fn probe_config() -> HealthCheckConfig {
        HealthCheckConfig {
            enabled: true,
            interval_secs: 1,
            timeout_secs: 1,
            path: "/health".into(),
            unhealthy_threshold: 2,
            healthy_threshold: 1,
        }
    }

    #[tokio::test]
    async fn probe_succeeds_against_healthy_backend() {
        let addr = serve_status("200 OK").await;
        let backend = Backend::new("b1", addr, 1, 10);
        assert!(probe_once(&backend, &probe_config()).await);
    }

    #[tokio::test]
    async fn probe_fails_on_server_error() {
        let addr = serve_status("503 Service Unavailable").await;
        let backend = Backend::new("b1", addr, 1, 10);
        assert!(!probe_once(&backend, &probe_config()).await);
    }

    #[tokio::test]
    async fn probe_fails_on_refused_connection() {
        // Bind then drop to get a port with nothing listening.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let backend = Backend::new("b1", addr, 1, 10);
        assert!(!probe_once(&backend, &probe_config()).await);
    }

    #[tokio::test]
    async fn consecutive_failures_mark_backend_down() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let backend = Arc::new(Backend::new("b1", addr, 1, 10));
        let config = probe_config();

        assert!(!probe_once(&backend, &config).await);
        backend.mark_failure(config.unhealthy_threshold as usize);
        assert!(!probe_once(&backend, &config).await);
        backend.mark_failure(config.unhealthy_threshold as usize);

        assert_eq!(backend.status(), BackendStatus::Down);
    }
}
