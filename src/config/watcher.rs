//! Configuration file watcher for hot reload.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::event::ModifyKind;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::sync::mpsc;

/// Error raised when the file watch cannot be set up.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("config path {0:?} has no file name")]
    NoFileName(PathBuf),

    #[error("failed to watch config file: {0}")]
    Notify(#[from] notify::Error),
}

/// A watcher that monitors the configuration file for changes.
///
/// Dropping it stops the watch.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
}

impl ConfigWatcher {
    /// Start watching `path`, sending one trigger per change into `reload_tx`.
    ///
    /// Triggers are sent with `try_send`: with a capacity-1 channel, bursts of
    /// writes coalesce into a single pending reload.
    pub fn spawn(path: &Path, reload_tx: mpsc::Sender<()>) -> Result<Self, WatchError> {
        let file_name = path
            .file_name()
            .map(OsString::from)
            .ok_or_else(|| WatchError::NoFileName(path.to_path_buf()))?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if is_content_change(&event.kind)
                        && event.paths.iter().any(|p| p.file_name() == Some(file_name.as_os_str()))
                    {
                        tracing::info!(paths = ?event.paths, "Config file changed, triggering reload");
                        // Full means a reload is already pending.
                        let _ = reload_tx.try_send(());
                    }
                }
                Err(e) => tracing::error!(error = %e, "File watcher error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        // Watch the directory so editors that replace the file are still seen.
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        tracing::info!(path = %path.display(), "Config file watching enabled");
        Ok(Self { _watcher: watcher })
    }
}

fn is_content_change(kind: &EventKind) -> bool {
    match kind {
        EventKind::Create(_) => true,
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        EventKind::Modify(_) => true,
        _ => false,
    }
}
