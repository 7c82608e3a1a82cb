//! Hot reload of the identity file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::ConfigError;
use crate::worker::identity::load_identities;
use crate::worker::registry::WorkerRegistry;

/// Quiet period after the last change before the file is re-read.
const DEBOUNCE: Duration = Duration::from_millis(500);

/// Watches the identity file and re-syncs the registry on change.
///
/// Dropping the watcher stops it.
pub struct IdentityWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl Drop for IdentityWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Start watching `path`.
///
/// The parent directory is watched rather than the file itself so editors
/// that replace the file on save are still seen.
pub fn watch_identities(
    path: PathBuf,
    registry: Arc<WorkerRegistry>,
) -> Result<IdentityWatcher, ConfigError> {
    let watch_error = |e: notify::Error| ConfigError::Watch {
        path: path.display().to_string(),
        reason: e.to_string(),
    };
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
        .to_path_buf();
    let file_name = path.file_name().map(|n| n.to_os_string());

    let (tx, mut rx) = mpsc::unbounded_channel::<()>();
    let mut watcher = RecommendedWatcher::new(
        move |res: std::result::Result<Event, notify::Error>| match res {
            Ok(event) => {
                let relevant = matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
                    && event
                        .paths
                        .iter()
                        .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                if relevant {
                    let _ = tx.send(());
                }
            }
            Err(e) => tracing::error!(error = %e, "Identity watch error"),
        },
        Config::default(),
    )
    .map_err(watch_error)?;
    watcher
        .watch(&dir, RecursiveMode::NonRecursive)
        .map_err(watch_error)?;
    tracing::info!(path = %path.display(), "Watching identity file");

    let task = tokio::spawn(async move {
        while rx.recv().await.is_some() {
            // Coalesce the burst of events a single save produces.
            tokio::time::sleep(DEBOUNCE).await;
            while rx.try_recv().is_ok() {}
            reload(&path, &registry).await;
        }
    });

    Ok(IdentityWatcher {
        _watcher: watcher,
        task,
    })
}

/// Re-read `path` and sync. A file that fails to parse leaves the running
/// set untouched.
pub async fn reload(path: &Path, registry: &WorkerRegistry) {
    match load_identities(path) {
        Ok(rows) => {
            let report = registry.sync(rows).await;
            tracing::info!(
                path = %path.display(),
                added = ?report.added,
                restarted = ?report.restarted,
                removed = ?report.removed,
                "Identity file reloaded"
            );
        }
        Err(e) => tracing::error!(path = %path.display(), error = %e, "Identity file rejected"),
    }
}
