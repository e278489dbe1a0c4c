//! Configuration file watcher for hot reload.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::ProxyConfig;

/// Watches the config file and emits validated configs on change.
///
/// A config that fails to load or validate is dropped with an error log;
/// the running configuration stays in effect.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<ProxyConfig>,
}

impl ConfigWatcher {
    /// Create a watcher feeding the given reload channel.
    pub fn new(path: &Path, update_tx: mpsc::UnboundedSender<ProxyConfig>) -> Self {
        Self {
            path: path.to_path_buf(),
            update_tx,
        }
    }

    /// Start watching. The returned handle must be kept alive for the
    /// watch to stay registered.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx;
        let path = self.path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    match load_config(&path) {
                        Ok(new_config) => {
                            tracing::info!(path = %path.display(), "Config file changed, reloading");
                            let _ = tx.send(new_config);
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
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = %self.path.display(), "Config watcher started");
        Ok(watcher)
    }
}
