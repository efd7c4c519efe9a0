//! Intent Watcher: turns files dropped into the intents directory into
//! dispatched intents.
//!
//! A [`notify`] watcher forwards filesystem events over a channel to a tokio
//! task, which processes files one at a time.  Every well-formed file is
//! submitted and then archived; malformed files are moved to the rejected
//! directory with the parse error attached.  Either way a file is handled at
//! most once, so a watcher restart never replays it.
//!
//! Event-driven reads wait for the file to go quiet for the settle period.
//! A file that fails to parse is only rejected once a second look, one
//! settle period later, finds it unchanged; until then it is assumed to be
//! still being written.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use notify::event::{AccessKind, AccessMode, ModifyKind};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::dispatcher::{DispatchResult, IntentSink};
use crate::error::{IntentError, Result};
use crate::files::IntentArchive;
use crate::intent::{DocumentFormat, IntentDocument, IntentSource};

/// What the watcher did with one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Dispatched(DispatchResult),
    Rejected { reason: String },
    /// Parsing failed while the file may still be written; retried later.
    Incomplete { reason: String },
}

/// Default quiet period before an event-driven read.
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(500);

/// Size and modification time of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    len: u64,
    modified: Option<SystemTime>,
}

impl FileStamp {
    fn of(path: &Path) -> Option<Self> {
        let meta = std::fs::metadata(path).ok()?;
        Some(Self {
            len: meta.len(),
            modified: meta.modified().ok(),
        })
    }
}

/// A path waiting for its settle deadline.  `stamp` is set after a failed
/// parse and holds the file's state at that time.
struct Settling {
    due: Instant,
    stamp: Option<FileStamp>,
}

/// Watches one directory for intent files.
#[derive(Clone)]
pub struct IntentWatcher {
    intents_dir: PathBuf,
    sink: Arc<dyn IntentSink>,
    archive: IntentArchive,
    settle: Duration,
}

impl IntentWatcher {
    pub fn new(intents_dir: impl Into<PathBuf>, sink: Arc<dyn IntentSink>, archive: IntentArchive) -> Self {
        Self {
            intents_dir: intents_dir.into(),
            sink,
            archive,
            settle: DEFAULT_SETTLE,
        }
    }

    /// Quiet period a file must observe before an event-driven read.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn intents_dir(&self) -> &Path {
        &self.intents_dir
    }

    /// Whether `path` names a file the watcher should consider: a `.json`
    /// or `.toml` file directly inside the intents directory that is
    /// neither hidden nor temporary.
    pub fn is_candidate(&self, path: &Path) -> bool {
        if path.parent() != Some(self.intents_dir.as_path()) {
            return false;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        !name.starts_with('.') && !name.ends_with(".tmp") && DocumentFormat::from_path(path).is_some()
    }

    /// Process a single file.  Returns `None` when the file was skipped
    /// (not a candidate, already gone, or still empty).  Malformed files are
    /// rejected immediately.
    pub fn process_file(&self, path: &Path) -> Option<FileOutcome> {
        self.process(path, true)
    }

    /// Like [`process_file`](Self::process_file), but a parse failure only
    /// rejects the file when `settled`; otherwise the file is left in place
    /// and reported as [`FileOutcome::Incomplete`].
    fn process(&self, path: &Path, settled: bool) -> Option<FileOutcome> {
        if !self.is_candidate(path) {
            return None;
        }

        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read intent file");
                return None;
            }
        };
        if text.trim().is_empty() {
            tracing::debug!(path = %path.display(), "intent file empty, waiting for content");
            return None;
        }

        let doc = match IntentDocument::parse(path, &text) {
            Ok(doc) => doc,
            Err(e) if !settled => {
                tracing::debug!(path = %path.display(), error = %e, "intent file incomplete, retrying");
                return Some(FileOutcome::Incomplete { reason: e.to_string() });
            }
            Err(e) => {
                let reason = e.to_string();
                if let Err(archive_err) = self.archive.reject(path, &reason) {
                    tracing::error!(path = %path.display(), error = %archive_err, "failed to reject intent file");
                }
                return Some(FileOutcome::Rejected { reason });
            }
        };

        let intent = doc.into_intent(IntentSource::File).with_origin(path);
        tracing::info!(path = %path.display(), intent = %intent.name, "intent file picked up");
        let result = self.sink.submit(intent);

        // The dispatcher archives on its own; other sinks leave the file.
        if path.exists()
            && let Err(e) = self.archive.archive(path)
        {
            tracing::error!(path = %path.display(), error = %e, "failed to archive intent file");
        }
        Some(FileOutcome::Dispatched(result))
    }

    /// Process every file already waiting in the intents directory, oldest
    /// name first.
    pub fn process_pending(&self) -> Vec<FileOutcome> {
        let entries = match std::fs::read_dir(&self.intents_dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(dir = %self.intents_dir.display(), error = %e, "cannot list intents directory");
                return Vec::new();
            }
        };
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();
        paths.sort();
        paths.iter().filter_map(|path| self.process_file(path)).collect()
    }

    /// Start watching.  Pending files are processed first; the task ends
    /// when `token` is cancelled.
    pub fn spawn(mut self, token: CancellationToken) -> Result<JoinHandle<()>> {
        std::fs::create_dir_all(&self.intents_dir).map_err(|e| IntentError::io(&self.intents_dir, e))?;
        self.archive.ensure_dirs()?;
        // Event paths are reported against the resolved directory.
        if let Ok(resolved) = std::fs::canonicalize(&self.intents_dir) {
            self.intents_dir = resolved;
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<(PathBuf, bool)>();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) if is_relevant(&event.kind) => {
                let finished = is_finished(&event.kind);
                for path in event.paths {
                    let _ = tx.send((path, finished));
                }
            }
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "intent watcher error"),
        })?;
        watcher.watch(&self.intents_dir, RecursiveMode::NonRecursive)?;
        tracing::info!(dir = %self.intents_dir.display(), "intent watcher started");

        let this = Arc::new(self);
        Ok(tokio::spawn(async move {
            // Keep the OS watcher alive for the lifetime of the task.
            let _watcher = watcher;

            let pending = Arc::clone(&this);
            match tokio::task::spawn_blocking(move || pending.process_pending()).await {
                Ok(outcomes) if !outcomes.is_empty() => {
                    tracing::info!(count = outcomes.len(), "processed pending intent files");
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "pending intent scan panicked"),
            }

            let mut settling: HashMap<PathBuf, Settling> = HashMap::new();
            loop {
                let next_due = settling.values().map(|s| s.due).min();
                tokio::select! {
                    _ = token.cancelled() => break,
                    received = rx.recv() => {
                        let Some((path, finished)) = received else { break };
                        if !this.is_candidate(&path) {
                            continue;
                        }
                        let due = if finished { Instant::now() } else { Instant::now() + this.settle };
                        settling
                            .entry(path)
                            .and_modify(|s| s.due = due)
                            .or_insert(Settling { due, stamp: None });
                    }
                    _ = tokio::time::sleep_until(next_due.unwrap_or_else(Instant::now)),
                        if next_due.is_some() =>
                    {
                        let now = Instant::now();
                        let ready: Vec<PathBuf> = settling
                            .iter()
                            .filter(|(_, s)| s.due <= now)
                            .map(|(path, _)| path.clone())
                            .collect();
                        for path in ready {
                            let Some(entry) = settling.remove(&path) else { continue };
                            this.process_settled(path, entry, &mut settling).await;
                        }
                    }
                }
            }
            tracing::info!(dir = %this.intents_dir.display(), "intent watcher stopped");
        }))
    }

    /// Read a file whose settle deadline passed.  An incomplete file goes
    /// back into `settling` with the stamp it had when it failed to parse.
    async fn process_settled(
        self: &Arc<Self>,
        path: PathBuf,
        entry: Settling,
        settling: &mut HashMap<PathBuf, Settling>,
    ) {
        let worker = Arc::clone(self);
        let job = tokio::task::spawn_blocking(move || {
            let stamp = FileStamp::of(&path);
            let settled = entry.stamp.is_some() && entry.stamp == stamp;
            let outcome = worker.process(&path, settled);
            (path, stamp, outcome)
        });
        match job.await {
            Ok((path, stamp, Some(FileOutcome::Incomplete { .. }))) => {
                settling.insert(
                    path,
                    Settling {
                        due: Instant::now() + self.settle,
                        stamp,
                    },
                );
            }
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "intent file processing panicked"),
        }
    }
}

fn is_relevant(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_)
            | EventKind::Modify(ModifyKind::Name(_) | ModifyKind::Data(_) | ModifyKind::Any)
            | EventKind::Access(AccessKind::Close(AccessMode::Write))
    )
}

/// Events after which the writer is done with the file: it was closed or
/// renamed into place.
fn is_finished(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Modify(ModifyKind::Name(_)) | EventKind::Access(AccessKind::Close(AccessMode::Write))
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
