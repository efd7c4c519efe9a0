//! Single-lane run executor.
//!
//! The executor accepts run submissions from any thread, enqueues them into a
//! lock-free [`crossbeam::queue::SegQueue`], and drives execution via a
//! background tokio task.  Exactly one run executes at a time; runs are taken
//! in submission order.
//!
//! Run bodies are blocking code (native UI calls, sleeps while waiting for a
//! window) and are executed on tokio's blocking pool so they never stall the
//! async producers.
//!
//! # Run lifecycle
//!
//! ```text
//! Pending  -->  Running  -->  Completed
//!                        \->  Failed
//!                        \->  Cancelled
//! ```
//!
//! Runs may be cancelled through [`Executor::cancel`] while still `Pending`.
//! Once running, cancellation is cooperative: the run body observes the
//! interrupt signal itself and reports [`RunStatus::Cancelled`].
//!
//! Metadata of finished runs is kept for the most recent
//! [`DEFAULT_RUN_HISTORY`] runs only; older entries are evicted in the order
//! they finished.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam::queue::SegQueue;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{KernelError, Result};
use crate::ipc::{Event, IpcBus};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Finished runs whose metadata is retained by default.
pub const DEFAULT_RUN_HISTORY: usize = 1024;

/// Unique, time-ordered run identifier (UUID v7).
pub type RunId = Uuid;

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunStatus {
    /// Waiting in the queue.
    Pending,
    /// Currently executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Cancelled before or during execution.
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// What a run body reports back when it returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub status: RunStatus,
    pub detail: Option<String>,
}

impl RunReport {
    pub fn completed() -> Self {
        Self {
            status: RunStatus::Completed,
            detail: None,
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Failed,
            detail: Some(detail.into()),
        }
    }

    pub fn cancelled(detail: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Cancelled,
            detail: Some(detail.into()),
        }
    }
}

/// The blocking closure the executor will run.
pub type RunFn = Box<dyn FnOnce() -> RunReport + Send + 'static>;

/// Metadata snapshot of a run visible to external callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunInfo {
    pub id: RunId,
    pub name: String,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub detail: Option<String>,
}

/// Internal representation of a run that lives on the queue.
struct QueuedRun {
    id: RunId,
    name: String,
    work: RunFn,
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Serialized FIFO run executor.
///
/// The executor is cheaply cloneable (`Arc`-backed) and safe to share across
/// threads and async tasks.
#[derive(Clone)]
pub struct Executor {
    inner: Arc<ExecutorInner>,
}

struct ExecutorInner {
    /// Lock-free FIFO of submitted runs.
    queue: SegQueue<QueuedRun>,

    /// Authoritative run metadata.
    runs: DashMap<RunId, RunInfo>,

    /// Finished runs, oldest first.
    finished: Mutex<VecDeque<RunId>>,
    history_limit: AtomicUsize,

    /// Wakes the background worker when new work arrives.
    notify: Notify,

    /// When `true` the executor will not accept new work.
    shutdown: AtomicBool,

    /// Optional bus for run lifecycle events.
    bus: Option<IpcBus>,
}

impl Executor {
    /// Create a new executor **without** starting the background worker.
    ///
    /// Call [`Executor::start`] to spawn the worker onto the tokio runtime.
    #[must_use]
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Create an executor that publishes run lifecycle events to `bus`.
    #[must_use]
    pub fn with_bus(bus: IpcBus) -> Self {
        Self::build(Some(bus))
    }

    fn build(bus: Option<IpcBus>) -> Self {
        Self {
            inner: Arc::new(ExecutorInner {
                queue: SegQueue::new(),
                runs: DashMap::new(),
                finished: Mutex::new(VecDeque::new()),
                history_limit: AtomicUsize::new(DEFAULT_RUN_HISTORY),
                notify: Notify::new(),
                shutdown: AtomicBool::new(false),
                bus,
            }),
        }
    }

    /// Keep metadata for at most `limit` finished runs.
    #[must_use]
    pub fn with_history_limit(self, limit: usize) -> Self {
        self.inner.history_limit.store(limit, Ordering::Relaxed);
        self
    }

    /// Spawn the background worker that drains the queue.
    ///
    /// Returns a [`JoinHandle`] that resolves when the executor is shut down
    /// and the queue is empty.
    pub fn start(&self) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tracing::info!("executor worker started");
            Self::worker_loop(&inner).await;
            tracing::info!("executor worker stopped");
        })
    }

    /// Queue a run.  It starts once every run submitted before it has
    /// finished.
    pub fn submit(&self, name: impl Into<String>, work: RunFn) -> Result<RunId> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(KernelError::ExecutorShutdown);
        }

        let id = Uuid::now_v7();
        let name = name.into();

        self.inner.runs.insert(
            id,
            RunInfo {
                id,
                name: name.clone(),
                status: RunStatus::Pending,
                created_at: Utc::now(),
                started_at: None,
                completed_at: None,
                detail: None,
            },
        );
        tracing::debug!(run_id = %id, run_name = %name, "run queued");

        self.inner.queue.push(QueuedRun { id, name, work });
        self.inner.notify.notify_one();
        Ok(id)
    }

    /// Cancel a run that has not yet started.
    pub fn cancel(&self, run_id: RunId) -> Result<()> {
        {
            let mut entry = self
                .inner
                .runs
                .get_mut(&run_id)
                .ok_or(KernelError::RunNotFound { run_id })?;

            if entry.status != RunStatus::Pending {
                return Err(KernelError::InvalidRunState {
                    run_id,
                    reason: format!("cannot cancel run in state {:?}", entry.status),
                });
            }
            entry.status = RunStatus::Cancelled;
            entry.completed_at = Some(Utc::now());
            entry.detail = Some("cancelled before start".into());
        }
        tracing::info!(run_id = %run_id, "run cancelled");
        Self::retire(&self.inner, run_id);
        Ok(())
    }

    /// Cancel every run still waiting in the queue.  Returns how many were
    /// cancelled.
    pub fn cancel_pending(&self) -> usize {
        let pending: Vec<RunId> = self
            .inner
            .runs
            .iter()
            .filter(|e| e.status == RunStatus::Pending)
            .map(|e| *e.key())
            .collect();
        pending
            .into_iter()
            .filter(|id| self.cancel(*id).is_ok())
            .count()
    }

    /// Query the current status of a run.
    pub fn status(&self, run_id: RunId) -> Result<RunInfo> {
        self.inner
            .runs
            .get(&run_id)
            .map(|entry| entry.clone())
            .ok_or(KernelError::RunNotFound { run_id })
    }

    /// Return a snapshot of all known runs keyed by their ID.
    pub fn all_runs(&self) -> HashMap<RunId, RunInfo> {
        self.inner
            .runs
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    /// Wait until the run reaches a terminal state.
    pub async fn wait(&self, run_id: RunId) -> Result<RunInfo> {
        loop {
            let info = self.status(run_id)?;
            if info.status.is_terminal() {
                return Ok(info);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Signal the executor to stop accepting new work.  The worker exits
    /// once the runs already queued have drained.
    pub fn shutdown(&self) {
        tracing::info!("executor shutdown requested");
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.notify.notify_one();
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    // -- Private helpers ----------------------------------------------------

    /// Record `id` as finished and evict the oldest finished runs past the
    /// history limit.  Must not be called while holding a `runs` entry.
    fn retire(inner: &ExecutorInner, id: RunId) {
        let limit = inner.history_limit.load(Ordering::Relaxed);
        let mut finished = inner.finished.lock().unwrap_or_else(PoisonError::into_inner);
        finished.push_back(id);
        while finished.len() > limit {
            if let Some(old) = finished.pop_front() {
                inner.runs.remove(&old);
                tracing::trace!(run_id = %old, "run metadata evicted");
            }
        }
    }

    fn publish_status(inner: &ExecutorInner, id: RunId, name: &str, status: RunStatus) {
        if let Some(bus) = &inner.bus {
            bus.publish(Event::RunStatusChanged {
                run_id: id,
                run_name: name.to_owned(),
                new_status: format!("{status:?}"),
                timestamp: Utc::now(),
            });
        }
    }

    /// Background worker loop.
    async fn worker_loop(inner: &ExecutorInner) {
        loop {
            match inner.queue.pop() {
                Some(queued) => Self::run_one(inner, queued).await,
                None => {
                    if inner.shutdown.load(Ordering::Acquire) {
                        break;
                    }
                    // Park until notified of new work or shutdown.
                    inner.notify.notified().await;
                }
            }
        }
    }

    async fn run_one(inner: &ExecutorInner, queued: QueuedRun) {
        // Transition to Running unless cancelled while queued.
        {
            let Some(mut entry) = inner.runs.get_mut(&queued.id) else {
                return;
            };
            if entry.status != RunStatus::Pending {
                tracing::debug!(run_id = %queued.id, "skipping cancelled run");
                return;
            }
            entry.status = RunStatus::Running;
            entry.started_at = Some(Utc::now());
        }
        Self::publish_status(inner, queued.id, &queued.name, RunStatus::Running);
        tracing::info!(run_id = %queued.id, run_name = %queued.name, "run started");

        let report = match tokio::task::spawn_blocking(queued.work).await {
            Ok(report) => report,
            Err(err) => RunReport::failed(format!("run panicked: {err}")),
        };
        // A body must report a terminal status; treat anything else as a bug.
        let report = if report.status.is_terminal() {
            report
        } else {
            RunReport::failed(format!("run returned non-terminal status {:?}", report.status))
        };

        if let Some(mut entry) = inner.runs.get_mut(&queued.id) {
            entry.status = report.status;
            entry.completed_at = Some(Utc::now());
            entry.detail = report.detail.clone();
        }
        Self::retire(inner, queued.id);

        match report.status {
            RunStatus::Completed => {
                tracing::info!(run_id = %queued.id, run_name = %queued.name, "run completed");
            }
            RunStatus::Cancelled => tracing::warn!(
                run_id = %queued.id,
                run_name = %queued.name,
                detail = report.detail.as_deref().unwrap_or(""),
                "run cancelled"
            ),
            _ => tracing::error!(
                run_id = %queued.id,
                run_name = %queued.name,
                detail = report.detail.as_deref().unwrap_or(""),
                "run failed"
            ),
        }

        Self::publish_status(inner, queued.id, &queued.name, report.status);
        if let Some(bus) = &inner.bus {
            bus.publish(Event::RunFinished {
                run_id: queued.id,
                run_name: queued.name,
                status: format!("{:?}", report.status),
                detail: report.detail,
                timestamp: Utc::now(),
            });
        }
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
