//! reproxy binary: load config, wire subsystems, serve until shutdown.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;

use reproxy::config::loader::load_config;
use reproxy::config::watcher::ConfigWatcher;
use reproxy::lifecycle::signals::spawn_signal_listener;
use reproxy::observability::{logging, metrics};
use reproxy::{HttpServer, Listener, ProxyConfig, Shutdown};

/// reproxy - regex-rewriting reverse proxy
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Configuration file (TOML). Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener host.
    #[arg(long)]
    host: Option<String>,

    /// Override the listener port.
    #[arg(short, long)]
    port: Option<u16>,

    /// Validate the configuration and exit.
    #[arg(long)]
    validate: bool,

    /// Watch the config file and hot-reload on change.
    #[arg(long)]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Startup config errors are fatal before any traffic is accepted.
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };

    if let Some(host) = &cli.host {
        let port = config
            .listener
            .bind_address
            .rsplit(':')
            .next()
            .unwrap_or("3333")
            .to_string();
        config.listener.bind_address = format!("{host}:{port}");
    }
    if let Some(port) = cli.port {
        let host = config
            .listener
            .bind_address
            .rsplit_once(':')
            .map(|(h, _)| h.to_string())
            .unwrap_or_else(|| "127.0.0.1".to_string());
        config.listener.bind_address = format!("{host}:{port}");
    }

    if cli.validate {
        println!("configuration OK");
        return Ok(());
    }

    logging::init(&config.observability.log_level);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address,
        routes = config.routes.len(),
        backends = config.backends.len(),
        "reproxy starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Arc::new(Shutdown::new());
    let (reload_tx, reload_rx) = mpsc::unbounded_channel();

    spawn_signal_listener(shutdown.clone(), cli.config.clone(), reload_tx.clone());

    // Keep the watcher handle alive for the life of the process.
    let _watcher = match (&cli.config, cli.watch) {
        (Some(path), true) => Some(ConfigWatcher::new(path, reload_tx).run()?),
        _ => None,
    };

    let listener = Listener::bind(&config.listener).await?;
    let server = HttpServer::new(config);
    server.run(listener, reload_rx, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
