//! Debounced filesystem watching.
//!
//! Raw notify events arrive in bursts (editors write temp files, rename,
//! touch metadata). [`EventCoalescer`] folds a burst down to one pending
//! change per path, and the watch loop only flushes after the tree has
//! been quiet for the configured debounce window. The flush timer resets
//! on every event, so a sustained burst produces a single sync at the end
//! rather than one per write.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::{ChangeKind, SyncPipeline};
use crate::error::{EngineError, Result};

/// Folds raw events into one pending change per path.
///
/// Within a window, a later event overrides an earlier one for the same
/// path, with one exception: once a path is marked removed, a subsequent
/// modify does not resurrect it — the flush re-checks the filesystem
/// anyway, and treating remove as sticky avoids indexing a path that a
/// rename burst has already vacated.
#[derive(Debug, Default)]
pub struct EventCoalescer {
    pending: HashMap<PathBuf, ChangeKind>,
}

impl EventCoalescer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn note(&mut self, path: PathBuf, kind: ChangeKind) {
        match self.pending.get(&path) {
            Some(ChangeKind::Removed) => {}
            _ => {
                self.pending.insert(path, kind);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Take all pending changes, in deterministic path order.
    pub fn drain(&mut self) -> Vec<(PathBuf, ChangeKind)> {
        let mut changes: Vec<(PathBuf, ChangeKind)> = self.pending.drain().collect();
        changes.sort_by(|a, b| a.0.cmp(&b.0));
        changes
    }
}

/// Handle to a running watch loop. Dropping it (or calling [`stop`]) ends
/// the loop after any in-flight flush completes.
///
/// [`stop`]: WatcherHandle::stop
pub struct WatcherHandle {
    stop: Option<tokio::sync::oneshot::Sender<()>>,
    task: tokio::task::JoinHandle<()>,
    // Keeps the OS watcher registered for the lifetime of the handle.
    _watcher: RecommendedWatcher,
}

impl WatcherHandle {
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let _ = self.task.await;
    }
}

/// Watch `project_path` recursively and feed debounced changes into the
/// sync pipeline.
pub fn watch(
    pipeline: Arc<SyncPipeline>,
    project_path: &Path,
    debounce: Duration,
) -> Result<WatcherHandle> {
    let (event_tx, event_rx) = mpsc::unbounded_channel::<Event>();

    let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
        match result {
            Ok(event) => {
                let _ = event_tx.send(event);
            }
            Err(e) => tracing::warn!(error = %e, "filesystem watch error"),
        }
    })
    .map_err(|e| EngineError::sync(project_path, format!("failed to create watcher: {e}")))?;

    watcher
        .watch(project_path, RecursiveMode::Recursive)
        .map_err(|e| EngineError::sync(project_path, format!("failed to watch: {e}")))?;

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel();
    let root = project_path.to_path_buf();
    let task = tokio::spawn(watch_loop(pipeline, root, debounce, event_rx, stop_rx));

    Ok(WatcherHandle {
        stop: Some(stop_tx),
        task,
        _watcher: watcher,
    })
}

async fn watch_loop(
    pipeline: Arc<SyncPipeline>,
    root: PathBuf,
    debounce: Duration,
    mut events: mpsc::UnboundedReceiver<Event>,
    mut stop: tokio::sync::oneshot::Receiver<()>,
) {
    let mut coalescer = EventCoalescer::new();
    // One timer for the whole tree; pushed forward on every event.
    let mut deadline: Option<Instant> = None;

    loop {
        let sleep_until = deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

        tokio::select! {
            _ = &mut stop => {
                break;
            }
            maybe_event = events.recv() => {
                let Some(event) = maybe_event else { break };
                if let Some((paths, kind)) = classify(&event) {
                    for path in paths {
                        coalescer.note(path, kind);
                    }
                    if !coalescer.is_empty() {
                        deadline = Some(Instant::now() + debounce);
                    }
                }
            }
            _ = tokio::time::sleep_until(sleep_until), if deadline.is_some() => {
                deadline = None;
                flush(&pipeline, &root, &mut coalescer).await;
            }
        }
    }

    // Drain whatever is pending so a stop right after a save is not lost.
    if !coalescer.is_empty() {
        flush(&pipeline, &root, &mut coalescer).await;
    }
}

async fn flush(pipeline: &SyncPipeline, root: &Path, coalescer: &mut EventCoalescer) {
    let changes = coalescer.drain();
    tracing::debug!(count = changes.len(), "flushing debounced changes");
    for (path, kind) in changes {
        if let Err(e) = pipeline.apply_change(root, &path, kind).await {
            tracing::warn!(path = %path.display(), error = %e, "failed to apply change");
        }
    }
}

/// Map a notify event to a change kind, dropping the kinds we don't act on.
fn classify(event: &Event) -> Option<(Vec<PathBuf>, ChangeKind)> {
    let kind = match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) => ChangeKind::Modified,
        EventKind::Remove(_) => ChangeKind::Removed,
        _ => return None,
    };
    Some((event.paths.clone(), kind))
}
