//! Per-request proxy engine.
//!
//! # Responsibilities
//! - Drive each request through the lifecycle state machine
//! - Map routing/selection/connect failures to stable client responses
//! - Retry a bounded number of alternate backends on connect failure
//! - Enforce the request deadline at every stage
//!
//! # Design Decisions
//! - The retry loop is an explicit attempt counter over not-yet-tried
//!   backends of the same group; no backoff, no hidden retries
//! - Idempotent request bodies are buffered (bounded) so a retry can
//!   replay them; streaming bodies disable retry instead
//! - A connection held when anything goes wrong is discarded, never
//!   returned to the idle pool

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::header::CONTENT_LENGTH;
use axum::http::{request, HeaderMap, HeaderValue, Request, Response};
use hyper::body::Incoming;
use tokio::time::timeout_at;

use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::http::request::{RequestIdExt, X_REQUEST_ID};
use crate::http::response;
use crate::load_balancer::backend::Backend;
use crate::load_balancer::registry::BackendRegistry;
use crate::observability::metrics;
use crate::proxy::relay::{ByteCounters, CompletionInfo, RelayBody};
use crate::routing::{HeaderAction, Route, Router};
use crate::upstream::{ConnectionPool, PooledConnection};

/// Lifecycle states of one in-flight request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Accepted,
    Routed,
    BackendSelected,
    Connected,
    Forwarding,
    Relaying,
    /// Reached when the relay finishes cleanly; the completion event marks it.
    Done,
    Error,
}

/// Engine tuning, derived from config.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub request_timeout: Duration,
    pub max_body_bytes: usize,
    pub retry_alternates: u32,
    pub unhealthy_threshold: usize,
    pub healthy_threshold: usize,
}

impl EngineOptions {
    pub fn from_config(config: &ProxyConfig) -> Self {
        Self {
            request_timeout: Duration::from_secs(config.timeouts.request_secs),
            max_body_bytes: config.limits.max_body_bytes,
            retry_alternates: config.limits.retry_alternates,
            unhealthy_threshold: config.health_check.unhealthy_threshold as usize,
            healthy_threshold: config.health_check.healthy_threshold as usize,
        }
    }
}

/// Book-keeping for one request as it moves through the engine.
struct InFlight {
    id: String,
    state: RequestState,
    deadline: tokio::time::Instant,
    started: Instant,
    counters: Arc<ByteCounters>,
}

impl InFlight {
    fn new(id: String, timeout: Duration) -> Self {
        Self {
            id,
            state: RequestState::Accepted,
            deadline: tokio::time::Instant::now() + timeout,
            started: Instant::now(),
            counters: Arc::new(ByteCounters::default()),
        }
    }

    fn transition(&mut self, next: RequestState) {
        tracing::trace!(
            request_id = %self.id,
            from = ?self.state,
            to = ?next,
            "Request state"
        );
        self.state = next;
    }
}

/// The request-routing and connection-management core.
pub struct ProxyEngine {
    router: Arc<Router>,
    registry: Arc<BackendRegistry>,
    pool: Arc<ConnectionPool>,
    options: EngineOptions,
}

impl ProxyEngine {
    pub fn new(
        router: Arc<Router>,
        registry: Arc<BackendRegistry>,
        pool: Arc<ConnectionPool>,
        options: EngineOptions,
    ) -> Self {
        Self {
            router,
            registry,
            pool,
            options,
        }
    }

    /// Handle one request end to end. Never panics, never returns an
    /// unmapped error.
    pub async fn handle(&self, req: Request<Body>) -> Response<Body> {
        let started = Instant::now();
        let request_id = req.request_id().unwrap_or("unknown").to_string();
        let method = req.method().to_string();

        let mut flight = InFlight::new(request_id, self.options.request_timeout);

        match self.drive(req, &mut flight).await {
            Ok(resp) => resp,
            Err(err) => {
                flight.transition(RequestState::Error);
                tracing::warn!(
                    request_id = %flight.id,
                    error = %err,
                    kind = err.kind(),
                    "Request failed"
                );
                metrics::record_request(&method, err.status().as_u16(), "none", started);
                response::error_response(&err)
            }
        }
    }

    async fn drive(
        &self,
        req: Request<Body>,
        flight: &mut InFlight,
    ) -> Result<Response<Body>, ProxyError> {
        let route = self.router.resolve(&req).ok_or(ProxyError::NoRoute)?;
        flight.transition(RequestState::Routed);
        tracing::debug!(
            request_id = %flight.id,
            route = %route.name,
            group = %route.backend_group,
            "Route matched"
        );

        let (parts, body) = req.into_parts();
        let headers = apply_header_policy(&parts.headers, &route, &flight.id)?;

        // Idempotent bodies are buffered so an alternate attempt can
        // replay them; anything else streams through on a single attempt.
        let (buffered, mut streaming) = if parts.method.is_idempotent() {
            match axum::body::to_bytes(body, self.options.max_body_bytes).await {
                Ok(bytes) => {
                    flight.counters.add_request(bytes.len() as u64);
                    (Some(bytes), None)
                }
                Err(_) => return Err(ProxyError::BodyTooLarge),
            }
        } else {
            if let Some(len) = parts
                .headers
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
            {
                flight.counters.add_request(len);
            }
            (None, Some(body))
        };

        let max_attempts = if buffered.is_some() {
            1 + self.options.retry_alternates
        } else {
            1
        };

        let mut tried: Vec<SocketAddr> = Vec::new();
        let mut last_err: Option<ProxyError> = None;

        for _ in 0..max_attempts {
            let backend = match self.registry.select_excluding(&route.backend_group, &tried) {
                Some(backend) => backend,
                None => break,
            };
            flight.transition(RequestState::BackendSelected);
            tried.push(backend.addr);

            let mut conn = match timeout_at(flight.deadline, self.pool.acquire(&backend)).await {
                Err(_) => return Err(ProxyError::DeadlineExceeded),
                Ok(Err(e)) => {
                    if e.is_connect_failure() {
                        self.note_backend_failure(&backend);
                    }
                    tracing::warn!(
                        request_id = %flight.id,
                        backend = %backend.name,
                        error = %e,
                        "Could not obtain upstream connection"
                    );
                    last_err = Some(e.into());
                    continue;
                }
                Ok(Ok(conn)) => conn,
            };
            flight.transition(RequestState::Connected);

            let attempt_body = match &buffered {
                Some(bytes) => Body::from(bytes.clone()),
                None => match streaming.take() {
                    Some(body) => body,
                    None => break,
                },
            };

            let upstream_req =
                match build_upstream_request(&parts, &route, &headers, backend.addr, attempt_body)
                {
                    Ok(req) => req,
                    Err(e) => {
                        self.pool.release(conn, false);
                        return Err(e);
                    }
                };
            flight.transition(RequestState::Forwarding);

            let sent = timeout_at(flight.deadline, conn.send(upstream_req)).await;
            match sent {
                Err(_) => {
                    self.pool.release(conn, false);
                    return Err(ProxyError::DeadlineExceeded);
                }
                Ok(Err(e)) => {
                    self.pool.release(conn, false);
                    self.note_backend_failure(&backend);
                    tracing::warn!(
                        request_id = %flight.id,
                        backend = %backend.name,
                        error = %e,
                        "Upstream exchange failed"
                    );
                    last_err = Some(ProxyError::Unavailable {
                        reason: e.to_string(),
                    });
                    continue;
                }
                Ok(Ok(upstream)) => {
                    // Passive health signal: gateway-class statuses count
                    // against the backend, everything else in its favor.
                    match upstream.status().as_u16() {
                        502 | 503 | 504 => self.note_backend_failure(&backend),
                        _ => {
                            if let Some(status) =
                                backend.mark_success(self.options.healthy_threshold)
                            {
                                tracing::info!(backend = %backend.name, status = ?status, "Backend recovered");
                                metrics::record_health_transition(&backend.name, status);
                            }
                        }
                    }
                    flight.transition(RequestState::Relaying);
                    let method = parts.method.clone();
                    return Ok(self.relay_response(upstream, conn, &route, &backend, &method, flight));
                }
            }
        }

        Err(last_err.unwrap_or(ProxyError::NoHealthyBackend {
            group: route.backend_group.clone(),
        }))
    }

    fn relay_response(
        &self,
        upstream: hyper::Response<Incoming>,
        conn: PooledConnection,
        route: &Route,
        backend: &Arc<Backend>,
        method: &axum::http::Method,
        flight: &mut InFlight,
    ) -> Response<Body> {
        let (mut parts, incoming) = upstream.into_parts();
        let reusable = response::transport_reusable(parts.version, &parts.headers);
        response::strip_hop_by_hop(&mut parts.headers);
        if let Ok(value) = HeaderValue::from_str(&flight.id) {
            parts.headers.insert(X_REQUEST_ID, value);
        }

        tracing::info!(
            request_id = %flight.id,
            route = %route.name,
            backend = %backend.name,
            forwarded = %backend.addr,
            status = parts.status.as_u16(),
            "Forwarding response"
        );

        let info = CompletionInfo {
            request_id: flight.id.clone(),
            route: route.name.clone(),
            backend: backend.name.clone(),
            method: method.to_string(),
            status: parts.status.as_u16(),
            started: flight.started,
        };
        let relay = RelayBody::new(
            Body::new(incoming).into_data_stream(),
            Some(conn),
            self.pool.clone(),
            flight.counters.clone(),
            reusable,
            self.options.max_body_bytes as u64,
            flight.deadline,
            info,
        );

        Response::from_parts(parts, Body::from_stream(relay))
    }

    fn note_backend_failure(&self, backend: &Arc<Backend>) {
        if let Some(status) = backend.mark_failure(self.options.unhealthy_threshold) {
            tracing::warn!(backend = %backend.name, status = ?status, "Backend marked down");
            metrics::record_health_transition(&backend.name, status);
        }
    }
}

/// Apply a route's header policy to the incoming headers, producing the
/// header set forwarded upstream. Hop-by-hop headers are stripped first;
/// host is set per attempt; the request id always survives.
fn apply_header_policy(
    incoming: &HeaderMap,
    route: &Route,
    request_id: &str,
) -> Result<HeaderMap, ProxyError> {
    let mut cleaned = incoming.clone();
    response::strip_hop_by_hop(&mut cleaned);
    cleaned.remove("host");

    let mut out = HeaderMap::with_capacity(cleaned.len() + 1);
    for (name, value) in cleaned.iter() {
        match route.header_action(name.as_str()) {
            HeaderAction::Passthrough => {
                out.append(name.clone(), value.clone());
            }
            HeaderAction::Ignore => {}
            HeaderAction::Replace { pattern, replace } => {
                let text = value.to_str().map_err(|_| ProxyError::HeaderRewrite {
                    name: name.to_string(),
                })?;
                if !pattern.is_match(text) {
                    return Err(ProxyError::HeaderRewrite {
                        name: name.to_string(),
                    });
                }
                let rewritten = pattern.replace(text, replace.as_str());
                let value = HeaderValue::from_str(rewritten.as_ref()).map_err(|_| {
                    ProxyError::HeaderRewrite {
                        name: name.to_string(),
                    }
                })?;
                out.append(name.clone(), value);
            }
        }
    }

    if let Ok(value) = HeaderValue::from_str(request_id) {
        out.insert(X_REQUEST_ID, value);
    }
    Ok(out)
}

/// Build the origin-form request for one attempt against one backend.
fn build_upstream_request(
    parts: &request::Parts,
    route: &Route,
    headers: &HeaderMap,
    backend_addr: SocketAddr,
    body: Body,
) -> Result<Request<Body>, ProxyError> {
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let target = route.rewrite_path(path_and_query);

    let mut builder = Request::builder()
        .method(parts.method.clone())
        .uri(target.as_str());
    if let Some(map) = builder.headers_mut() {
        *map = headers.clone();
        if let Ok(host) = HeaderValue::from_str(&backend_addr.to_string()) {
            map.insert("host", host);
        }
    }

    builder.body(body).map_err(|e| ProxyError::Unavailable {
        reason: format!("invalid forwarded request: {e}"),
    })
}
