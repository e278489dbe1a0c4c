//! Per-backend upstream connection pool.
//!
//! # Responsibilities
//! - Bound concurrent connections per backend (slot semaphore)
//! - Reuse idle HTTP/1.1 transports across exchanges
//! - Evict stale idle transports lazily on acquire
//! - Refuse connections to backends marked down

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::body::Body;
use dashmap::DashMap;
use hyper::client::conn::http1::{self, SendRequest};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::time::timeout;

use crate::load_balancer::backend::{Backend, BackendStatus};
use crate::observability::metrics;
use crate::upstream::connection::PooledConnection;

/// Why an acquire failed.
#[derive(Debug, thiserror::Error)]
pub enum AcquireError {
    /// The target backend is marked down; the pool never dials it.
    #[error("backend {addr} is down")]
    BackendDown { addr: SocketAddr },

    /// All slots stayed busy past the acquire timeout.
    #[error("pool exhausted for backend {addr}")]
    Exhausted { addr: SocketAddr },

    /// TCP connect failed or timed out.
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The HTTP/1.1 handshake failed on a fresh transport.
    #[error("handshake with {addr} failed: {source}")]
    Handshake {
        addr: SocketAddr,
        #[source]
        source: hyper::Error,
    },
}

impl AcquireError {
    /// Pool exhaustion and backend-down are policy outcomes; connect and
    /// handshake failures count against the backend's health.
    pub fn is_connect_failure(&self) -> bool {
        matches!(self, AcquireError::Connect { .. } | AcquireError::Handshake { .. })
    }
}

/// Tuning knobs, derived from `[pool]` and `[timeouts]` config.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub connect_timeout: Duration,
    pub acquire_timeout: Duration,
    /// Idle transports older than this are evicted instead of reused.
    pub idle_max_age: Duration,
    pub max_idle_per_backend: usize,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            acquire_timeout: Duration::from_secs(1),
            idle_max_age: Duration::from_secs(60),
            max_idle_per_backend: 32,
        }
    }
}

struct IdleEntry {
    sender: SendRequest<Body>,
    since: Instant,
}

struct PoolInner {
    idle: Mutex<VecDeque<IdleEntry>>,
    slots: Arc<Semaphore>,
}

/// Pools of reusable upstream connections, keyed by backend address.
pub struct ConnectionPool {
    pools: DashMap<SocketAddr, Arc<PoolInner>>,
    options: PoolOptions,
}

impl ConnectionPool {
    pub fn new(options: PoolOptions) -> Self {
        Self {
            pools: DashMap::new(),
            options,
        }
    }

    fn inner_for(&self, backend: &Backend) -> Arc<PoolInner> {
        self.pools
            .entry(backend.addr)
            .or_insert_with(|| {
                Arc::new(PoolInner {
                    idle: Mutex::new(VecDeque::new()),
                    slots: Arc::new(Semaphore::new(backend.max_connections)),
                })
            })
            .clone()
    }

    /// Check out a connection to `backend`.
    ///
    /// Waits up to the acquire timeout for a free slot, then reuses the
    /// freshest viable idle transport or dials a new one. Stale or closed
    /// idle entries found along the way are discarded.
    pub async fn acquire(
        &self,
        backend: &Arc<Backend>,
    ) -> Result<PooledConnection, AcquireError> {
        if backend.status() == BackendStatus::Down {
            return Err(AcquireError::BackendDown { addr: backend.addr });
        }

        let inner = self.inner_for(backend);

        let permit = match timeout(
            self.options.acquire_timeout,
            inner.slots.clone().acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => unreachable!("pool semaphore never closes"),
            Err(_) => {
                metrics::record_pool_exhausted(&backend.name);
                return Err(AcquireError::Exhausted { addr: backend.addr });
            }
        };

        // Lazy eviction: walk the idle list oldest-first, dropping entries
        // that aged out or whose transport died underneath us.
        loop {
            let entry = match inner.idle.lock().unwrap().pop_front() {
                Some(entry) => entry,
                None => break,
            };
            if entry.since.elapsed() > self.options.idle_max_age {
                tracing::trace!(addr = %backend.addr, "Idle connection aged out");
                continue;
            }
            if entry.sender.is_closed() {
                tracing::trace!(addr = %backend.addr, "Idle connection closed by peer");
                continue;
            }
            let mut sender = entry.sender;
            if sender.ready().await.is_err() {
                continue;
            }
            tracing::debug!(addr = %backend.addr, "Reusing pooled connection");
            let active = backend.track_active();
            return Ok(PooledConnection::new(
                backend.clone(),
                sender,
                true,
                active,
                permit,
            ));
        }

        let stream = match timeout(self.options.connect_timeout, TcpStream::connect(backend.addr))
            .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(AcquireError::Connect {
                    addr: backend.addr,
                    source: e,
                })
            }
            Err(_) => {
                return Err(AcquireError::Connect {
                    addr: backend.addr,
                    source: std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "connect timed out",
                    ),
                })
            }
        };
        let _ = stream.set_nodelay(true);

        let (sender, conn) = http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| AcquireError::Handshake {
                addr: backend.addr,
                source: e,
            })?;

        let addr = backend.addr;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!(addr = %addr, error = %e, "Upstream connection ended");
            }
        });

        tracing::debug!(addr = %backend.addr, "Dialed new upstream connection");
        metrics::record_upstream_connect(&backend.name);

        let active = backend.track_active();
        Ok(PooledConnection::new(
            backend.clone(),
            sender,
            false,
            active,
            permit,
        ))
    }

    /// Return a connection. `reusable` means the exchange completed cleanly
    /// and the protocol allows another request on this transport; anything
    /// else discards it. The slot and active count release either way.
    pub fn release(&self, mut conn: PooledConnection, reusable: bool) {
        let backend = conn.backend().clone();
        if reusable && backend.status() != BackendStatus::Down {
            if let Some(sender) = conn.take_sender() {
                if !sender.is_closed() {
                    if let Some(inner) = self.pools.get(&backend.addr) {
                        let mut idle = inner.idle.lock().unwrap();
                        idle.push_back(IdleEntry {
                            sender,
                            since: Instant::now(),
                        });
                        while idle.len() > self.options.max_idle_per_backend {
                            idle.pop_front();
                        }
                        tracing::trace!(addr = %backend.addr, idle = idle.len(), "Connection returned to pool");
                    }
                }
            }
        } else {
            tracing::trace!(addr = %backend.addr, "Connection discarded");
        }
        // conn drops here: active count and slot permit release.
    }

    /// Idle connections currently held for a backend.
    pub fn idle_count(&self, addr: SocketAddr) -> usize {
        self.pools
            .get(&addr)
            .map(|inner| inner.idle.lock().unwrap().len())
            .unwrap_or(0)
    }
}
