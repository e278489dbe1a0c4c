//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with the wildcard proxy handler
//! - Wire up middleware (request id, timeout, body limit, tracing)
//! - Assemble the engine from router, registry and pool
//! - Apply config reloads and run until shutdown
//!
//! # Design Decisions
//! - One handler; all real dispatch happens in the proxy engine
//! - Reloads swap the rule table and reconcile the registry atomically;
//!   in-flight requests finish on the snapshot they started with
//! - Serving stops accepting on shutdown and drains what is in flight

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    response::IntoResponse,
    routing::any,
    Router,
};
use tokio::sync::{broadcast, mpsc};
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::ProxyConfig;
use crate::health::HealthMonitor;
use crate::http::request::RequestIdLayer;
use crate::load_balancer::registry::BackendRegistry;
use crate::net::Listener;
use crate::proxy::{EngineOptions, ProxyEngine};
use crate::routing::Router as ProxyRouter;
use crate::upstream::{ConnectionPool, PoolOptions};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ProxyEngine>,
}

/// HTTP server for the reverse proxy.
pub struct HttpServer {
    app: Router,
    config: ProxyConfig,
    proxy_router: Arc<ProxyRouter>,
    registry: Arc<BackendRegistry>,
}

impl HttpServer {
    /// Assemble all subsystems from a validated configuration.
    pub fn new(config: ProxyConfig) -> Self {
        let proxy_router = Arc::new(ProxyRouter::from_config(&config.routes));
        let registry = Arc::new(BackendRegistry::from_config(
            &config.backends,
            &config.load_balancing.algorithm,
        ));
        let pool = Arc::new(ConnectionPool::new(PoolOptions {
            connect_timeout: Duration::from_secs(config.timeouts.connect_secs),
            acquire_timeout: Duration::from_millis(config.pool.acquire_timeout_ms),
            idle_max_age: Duration::from_secs(config.timeouts.idle_secs),
            max_idle_per_backend: config.pool.max_idle_per_backend,
        }));
        let engine = Arc::new(ProxyEngine::new(
            proxy_router.clone(),
            registry.clone(),
            pool,
            EngineOptions::from_config(&config),
        ));

        let app = Self::build_router(&config, AppState { engine });

        Self {
            app,
            config,
            proxy_router,
            registry,
        }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &ProxyConfig, state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            // The engine enforces the real per-stage deadline; this outer
            // timeout is a backstop for anything before the handler runs.
            .layer(TimeoutLayer::new(Duration::from_secs(
                config.timeouts.request_secs + 5,
            )))
            .layer(RequestBodyLimitLayer::new(config.limits.max_body_bytes))
            .layer(RequestIdLayer)
            .layer(TraceLayer::new_for_http())
    }

    /// Run the server: spawn the health monitor, apply config updates,
    /// serve until shutdown, then drain.
    pub async fn run(
        self,
        listener: Listener,
        mut config_updates: mpsc::UnboundedReceiver<ProxyConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let monitor = HealthMonitor::new(self.registry.clone(), self.config.health_check.clone());
        tokio::spawn(monitor.run(shutdown.resubscribe()));

        let proxy_router = self.proxy_router.clone();
        let registry = self.registry.clone();
        let mut reload_shutdown = shutdown.resubscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    update = config_updates.recv() => match update {
                        Some(new_config) => {
                            proxy_router.reload(&new_config.routes);
                            registry.apply(&new_config.backends);
                            tracing::info!(
                                routes = new_config.routes.len(),
                                backends = new_config.backends.len(),
                                "Configuration reload applied"
                            );
                        }
                        None => break,
                    },
                    _ = reload_shutdown.recv() => break,
                }
            }
        });

        axum::serve(listener, self.app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown requested, draining in-flight requests");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }
}

/// Main proxy handler: every request funnels into the engine.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> impl IntoResponse {
    state.engine.handle(request).await
}
