//! OS signal handling.
//!
//! # Responsibilities
//! - SIGTERM / SIGINT: graceful shutdown; a second signal exits immediately
//! - SIGHUP: reload the config file and push it down the reload channel
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - A reload that fails validation is logged and ignored; the running
//!   config stays in effect

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[cfg(unix)]
use crate::config::loader::load_config;
use crate::config::ProxyConfig;
use crate::lifecycle::shutdown::Shutdown;

/// Spawn the signal listener task.
///
/// `config_path` enables SIGHUP reload; without it SIGHUP is ignored.
pub fn spawn_signal_listener(
    shutdown: Arc<Shutdown>,
    config_path: Option<PathBuf>,
    reload_tx: mpsc::UnboundedSender<ProxyConfig>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        listen(shutdown, config_path, reload_tx).await;
    })
}

#[cfg(unix)]
async fn listen(
    shutdown: Arc<Shutdown>,
    config_path: Option<PathBuf>,
    reload_tx: mpsc::UnboundedSender<ProxyConfig>,
) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Failed to install SIGTERM handler");
            return;
        }
    };
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Failed to install SIGINT handler");
            return;
        }
    };
    let mut sighup = match signal(SignalKind::hangup()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Failed to install SIGHUP handler");
            return;
        }
    };

    loop {
        tokio::select! {
            _ = sigterm.recv() => handle_terminate(&shutdown, "SIGTERM"),
            _ = sigint.recv() => handle_terminate(&shutdown, "SIGINT"),
            _ = sighup.recv() => handle_reload(config_path.as_deref(), &reload_tx),
        }
    }
}

#[cfg(not(unix))]
async fn listen(
    shutdown: Arc<Shutdown>,
    _config_path: Option<PathBuf>,
    _reload_tx: mpsc::UnboundedSender<ProxyConfig>,
) {
    loop {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        handle_terminate(&shutdown, "Ctrl+C");
    }
}

fn handle_terminate(shutdown: &Shutdown, name: &str) {
    if shutdown.trigger() {
        tracing::info!(signal = name, "Graceful shutdown requested");
    } else {
        tracing::warn!(signal = name, "Repeated signal, terminating immediately");
        std::process::exit(1);
    }
}

#[cfg(unix)]
fn handle_reload(
    config_path: Option<&std::path::Path>,
    reload_tx: &mpsc::UnboundedSender<ProxyConfig>,
) {
    let Some(path) = config_path else {
        tracing::warn!("SIGHUP received but no config file to reload");
        return;
    };
    match load_config(path) {
        Ok(config) => {
            tracing::info!(path = %path.display(), "SIGHUP reload");
            let _ = reload_tx.send(config);
        }
        Err(e) => {
            tracing::error!(
                path = %path.display(),
                error = %e,
                "Reload rejected, keeping current configuration"
            );
        }
    }
}
