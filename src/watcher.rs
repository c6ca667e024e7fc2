//! Re-indexes files as they change on disk.
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::indexer::{FileStatus, Indexer};

/// Events arriving within this window are handled together.
const SETTLE: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Written,
    Removed,
}

fn touches_content(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

/// Decided by the path's current state rather than the event kind, which
/// also covers renames and editors that replace files.
fn change_at(path: &Path) -> Option<Change> {
    if path.is_file() {
        Some(Change::Written)
    } else if path.exists() {
        None
    } else {
        Some(Change::Removed)
    }
}

pub struct IndexWatcher {
    _watcher: RecommendedWatcher,
    handle: JoinHandle<()>,
}

impl IndexWatcher {
    /// Watch `root` recursively and keep `repo_id` in sync with it.
    ///
    /// # Errors
    ///
    /// Fails if `root` does not exist or the OS watcher cannot be created.
    pub fn start(root: &Path, repo_id: &str, indexer: Arc<Indexer>) -> Result<Self> {
        let root = root.canonicalize()?;
        let (tx, mut rx) = mpsc::channel::<PathBuf>(256);

        let mut watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
            match event {
                Ok(event) if touches_content(&event.kind) => {
                    for path in event.paths {
                        let _ = tx.blocking_send(path);
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("index watcher error: {e}"),
            }
        })?;
        watcher.watch(&root, RecursiveMode::Recursive)?;
        info!("Watching {} for repository {repo_id}", root.display());

        let repo_id = repo_id.to_string();
        let handle = tokio::spawn(async move {
            while let Some(first) = rx.recv().await {
                tokio::time::sleep(SETTLE).await;
                let mut paths = BTreeSet::from([first]);
                while let Ok(path) = rx.try_recv() {
                    paths.insert(path);
                }
                for path in paths {
                    if indexer.accepts(&root, &path) {
                        sync_path(&indexer, &root, &path, &repo_id).await;
                    }
                }
            }
        });

        Ok(Self {
            _watcher: watcher,
            handle,
        })
    }

    /// Stops re-indexing; pending events are dropped.
    pub fn stop(self) {
        self.handle.abort();
    }
}

async fn sync_path(indexer: &Indexer, root: &Path, path: &Path, repo_id: &str) {
    match change_at(path) {
        Some(Change::Written) => {
            let content = match tokio::fs::read_to_string(path).await {
                Ok(content) => content,
                Err(e) => {
                    warn!(path = %path.display(), "reindex skipped: {e}");
                    return;
                }
            };
            let outcome = indexer
                .index_file_under(Some(root), path, &content, repo_id, false)
                .await;
            match outcome.status {
                FileStatus::Failed => warn!(
                    path = %path.display(),
                    "reindex failed: {}",
                    outcome.message.unwrap_or_default()
                ),
                status => debug!(path = %path.display(), "reindexed: {status:?}"),
            }
        }
        Some(Change::Removed) => match indexer.remove_file(path, repo_id).await {
            Ok(chunks) => debug!(path = %path.display(), "removed {chunks} chunks"),
            Err(e) => warn!(path = %path.display(), "removal failed: {e}"),
        },
        None => {}
    }
}
