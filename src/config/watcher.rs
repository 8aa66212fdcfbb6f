//! Hot reload of the proxy configuration file.
//!
//! Editors commonly emit several modify events per save, so the watcher
//! remembers the last content it accepted and only forwards a configuration
//! when the file actually changed and still validates.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::{parse_config, ConfigError};
use crate::config::schema::HeaderProxyConfig;
use crate::directive::Transport;
use crate::proxy::HeaderProxy;

pub struct ConfigWatcher {
    path: PathBuf,
    last_content: Arc<Mutex<Option<String>>>,
    update_tx: mpsc::UnboundedSender<HeaderProxyConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and the receiving end for validated updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<HeaderProxyConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let watcher = Self {
            path: path.to_path_buf(),
            last_content: Arc::new(Mutex::new(std::fs::read_to_string(path).ok())),
            update_tx,
        };
        (watcher, update_rx)
    }

    /// Start watching. The returned watcher must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let Self {
            path,
            last_content,
            update_tx,
        } = self;
        let watched = path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    match reload_if_changed(&path, &last_content) {
                        Ok(Some(config)) => {
                            tracing::info!(path = ?path, "Configuration change accepted");
                            let _ = update_tx.send(config);
                        }
                        Ok(None) => tracing::trace!(path = ?path, "Configuration unchanged"),
                        Err(e) => {
                            tracing::error!(error = %e, "Rejected configuration change, keeping current settings");
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&watched, RecursiveMode::NonRecursive)?;
        tracing::info!(path = ?watched, "Config watcher started");
        Ok(watcher)
    }
}

/// Parse `path` if its content differs from the last accepted content.
/// Invalid content is not remembered, so fixing the file triggers a reload.
fn reload_if_changed(
    path: &Path,
    last_content: &Mutex<Option<String>>,
) -> Result<Option<HeaderProxyConfig>, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut last = last_content.lock().expect("config content mutex poisoned");
    if last.as_deref() == Some(content.as_str()) {
        return Ok(None);
    }
    let config = parse_config(&content)?;
    *last = Some(content);
    Ok(Some(config))
}

/// Apply every queued update to `proxy`. Returns how many were applied.
pub fn apply_pending<T: Transport>(
    proxy: &HeaderProxy<T>,
    updates: &mut mpsc::UnboundedReceiver<HeaderProxyConfig>,
) -> usize {
    let mut applied = 0;
    while let Ok(config) = updates.try_recv() {
        match proxy.reload(&config) {
            Ok(()) => applied += 1,
            Err(e) => tracing::error!(error = %e, "Rejected configuration update"),
        }
    }
    applied
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("header-proxy-{}-{}.toml", name, std::process::id()));
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_unchanged_content_is_skipped() {
        let path = temp_config("unchanged", "[pool]\ncapacity = 10\n");
        let last = Mutex::new(None);

        let first = reload_if_changed(&path, &last).unwrap().unwrap();
        assert_eq!(first.pool.capacity, 10);
        assert!(reload_if_changed(&path, &last).unwrap().is_none());

        std::fs::write(&path, "[pool]\ncapacity = 20\n").unwrap();
        assert_eq!(reload_if_changed(&path, &last).unwrap().unwrap().pool.capacity, 20);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_invalid_content_is_not_remembered() {
        let path = temp_config("invalid", "[pool]\ncapacity = 0\n");
        let last = Mutex::new(None);

        assert!(matches!(reload_if_changed(&path, &last), Err(ConfigError::Validation(_))));
        assert!(last.lock().unwrap().is_none());
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_apply_pending_reloads_proxy() {
        let proxy = HeaderProxy::new(&HeaderProxyConfig::default()).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut config = HeaderProxyConfig::default();
        config.pool.capacity = 7;
        tx.send(config).unwrap();
        let mut invalid = HeaderProxyConfig::default();
        invalid.pool.capacity = 0;
        tx.send(invalid).unwrap();

        assert_eq!(apply_pending(&proxy, &mut rx), 1);
        assert_eq!(proxy.pool().settings().capacity, 7);
    }
}
