//! Debounced polling file watcher: a `tokio::select!` /
//! `tokio::time::sleep` poll-compare-debounce cycle over a work directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_secs(2);
const DEBOUNCE: Duration = Duration::from_millis(500);

const SKIPPED_DIRS: &[&str] = &[".git", "node_modules", "__pycache__", ".forge-output", "venv", ".venv"];
const WATCHED_EXTENSIONS: &[&str] = &["py", "go", "ts", "js", "yaml", "yml"];

/// Builds a path→mtime snapshot of every watched file under `root`,
/// skipping well-known non-source directories.
fn snapshot(root: &Path) -> HashMap<PathBuf, SystemTime> {
    let mut out = HashMap::new();
    walk(root, &mut out);
    out
}

fn walk(dir: &Path, out: &mut HashMap<PathBuf, SystemTime>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(path = %dir.display(), error = %err, "failed to read directory during watch scan");
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if let Some(name) = path.file_name().and_then(|n| n.to_str())
                && SKIPPED_DIRS.contains(&name)
            {
                continue;
            }
            walk(&path, out);
            continue;
        }
        let is_watched = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| WATCHED_EXTENSIONS.contains(&ext))
            .unwrap_or(false);
        if !is_watched {
            continue;
        }
        if let Ok(metadata) = entry.metadata()
            && let Ok(modified) = metadata.modified()
        {
            out.insert(path, modified);
        }
    }
}

/// A debounced poll watcher over a single work directory. Every
/// [`POLL_INTERVAL`], the mtime map is rebuilt and diffed against the
/// previous snapshot (guarded by a mutex, since only one poll cycle should
/// ever be comparing-and-replacing it at a time). On any difference —
/// added, removed, or changed mtime — it logs, waits out the debounce
/// window, then invokes the caller-supplied callback.
pub struct FileWatcher {
    root: PathBuf,
    previous: Mutex<HashMap<PathBuf, SystemTime>>,
}

impl FileWatcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let initial = snapshot(&root);
        Self {
            root,
            previous: Mutex::new(initial),
        }
    }

    /// Runs the poll loop until `cancel` fires. Watcher failures (e.g. a
    /// transient read error) are swallowed — best-effort, not fatal.
    pub async fn run<F, Fut>(&self, cancel: CancellationToken, on_change: F)
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("file watcher shutting down");
                    return;
                }
                () = tokio::time::sleep(POLL_INTERVAL) => {}
            }

            let current = snapshot(&self.root);
            let changed = {
                let mut previous = self.previous.lock().await;
                let changed = *previous != current;
                *previous = current;
                changed
            };

            if !changed {
                continue;
            }

            info!("file change detected");
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(DEBOUNCE) => {}
            }

            on_change().await;
            debug!("watcher callback completed");
        }
    }
}
