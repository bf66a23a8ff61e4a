use crate::{ChangeBatch, ChangeEvent, ChangeSource, ModGraphError, Result, WatcherConfig};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

/// Host-driven change source: whoever owns the file map pushes batches in.
pub struct ChangeEmitter {
    sender: broadcast::Sender<ChangeBatch>,
}

impl ChangeEmitter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish one batch. Returns how many subscribers received it.
    pub fn emit(&self, events: Vec<ChangeEvent>) -> usize {
        if events.is_empty() {
            return 0;
        }
        self.sender.send(Arc::new(events)).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ChangeEmitter {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl ChangeSource for ChangeEmitter {
    fn subscribe(&self) -> broadcast::Receiver<ChangeBatch> {
        self.sender.subscribe()
    }
}

/// Filesystem change source backed by `notify`, debounced into batches.
pub struct FsChangeSource {
    emitter: Arc<ChangeEmitter>,
    stop: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl FsChangeSource {
    pub fn spawn(roots: Vec<PathBuf>, config: &WatcherConfig) -> Result<Self> {
        let (raw_tx, raw_rx) = std::sync::mpsc::channel::<notify::Result<Event>>();
        let mut watcher: RecommendedWatcher = Watcher::new(raw_tx, notify::Config::default())
            .map_err(|e| ModGraphError::Watch(e.to_string()))?;
        for root in &roots {
            watcher
                .watch(root, RecursiveMode::Recursive)
                .map_err(|e| ModGraphError::Watch(format!("{}: {}", root.display(), e)))?;
        }

        let emitter = Arc::new(ChangeEmitter::new(config.channel_capacity));
        let stop = Arc::new(AtomicBool::new(false));
        let debounce = Duration::from_millis(config.debounce_ms);
        let extensions: HashSet<String> = config.extensions.iter().cloned().collect();

        let handle = {
            let emitter = emitter.clone();
            let stop = stop.clone();
            std::thread::Builder::new()
                .name("modgraph-watch".to_string())
                .spawn(move || {
                    // keep the watcher alive for the lifetime of the loop
                    let _watcher = watcher;
                    let mut buf: HashMap<PathBuf, (EventKind, Instant)> = HashMap::new();

                    while !stop.load(Ordering::Acquire) {
                        match raw_rx.recv_timeout(debounce) {
                            // open/close notifications must not overwrite a pending change
                            Ok(Ok(event)) if !is_change(&event.kind) => {}
                            Ok(Ok(event)) => {
                                for path in event.paths.iter().filter(|p| has_extension(p, &extensions)) {
                                    let kind = match buf.get(path) {
                                        Some((prev, _)) => fold_kind(prev, &event.kind),
                                        None => event.kind.clone(),
                                    };
                                    buf.insert(path.clone(), (kind, Instant::now()));
                                }
                            }
                            Ok(Err(e)) => error!("watcher error: {:?}", e),
                            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
                            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                                warn!("file watcher disconnected");
                                break;
                            }
                        }

                        let now = Instant::now();
                        let ready: Vec<PathBuf> = buf
                            .iter()
                            .filter(|(_, (_, t))| now.duration_since(*t) >= debounce)
                            .map(|(p, _)| p.clone())
                            .collect();
                        let batch: Vec<ChangeEvent> = ready
                            .into_iter()
                            .filter_map(|path| {
                                let (kind, _) = buf.remove(&path)?;
                                classify(&path, &kind)
                            })
                            .collect();
                        if !batch.is_empty() {
                            debug!("Flushing {} file change(s)", batch.len());
                            emitter.emit(batch);
                        }
                    }
                })
                .map_err(ModGraphError::Io)?
        };

        Ok(Self {
            emitter,
            stop,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                warn!("file watcher thread panicked");
            }
        }
    }
}

impl ChangeSource for FsChangeSource {
    fn subscribe(&self) -> broadcast::Receiver<ChangeBatch> {
        self.emitter.subscribe()
    }
}

impl Drop for FsChangeSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn has_extension(path: &Path, extensions: &HashSet<String>) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|ext| extensions.contains(ext))
        .unwrap_or(false)
}

fn is_change(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_))
}

/// A create followed by writes inside one debounce window is still a create.
fn fold_kind(prev: &EventKind, next: &EventKind) -> EventKind {
    match (prev, next) {
        (EventKind::Create(_), EventKind::Modify(_)) => prev.clone(),
        _ => next.clone(),
    }
}

fn classify(path: &Path, kind: &EventKind) -> Option<ChangeEvent> {
    let path_str = path.to_string_lossy().to_string();
    match kind {
        EventKind::Create(_) => Some(ChangeEvent::Added(path_str)),
        EventKind::Modify(_) if path.exists() => Some(ChangeEvent::Modified(path_str)),
        EventKind::Modify(_) | EventKind::Remove(_) => Some(ChangeEvent::Deleted(path_str)),
        _ => None,
    }
}
