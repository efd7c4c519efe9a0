//! Run outcome reporter.
//!
//! Subscribes to the event bus and logs every finished run together with the
//! producer (`file`, `ocr`, `chat`) whose intent started it.  Outcomes are
//! tallied per source for the end-of-session summary.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use intentd_kernel::{Event, IpcBus};

/// Per-source counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceTally {
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub suppressed: usize,
    pub rejected: usize,
}

#[derive(Default)]
struct State {
    /// Source of every run that has not finished yet.
    pending: HashMap<Uuid, String>,
    tallies: BTreeMap<String, SourceTally>,
}

#[derive(Clone, Default)]
pub struct Reporter {
    state: Arc<Mutex<State>>,
}

impl Reporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Follow `bus` until `token` is cancelled.  Events already buffered at
    /// cancellation time are still recorded.
    pub fn spawn(&self, bus: &IpcBus, token: CancellationToken) -> JoinHandle<()> {
        let mut rx = bus.subscribe();
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        loop {
                            match rx.try_recv() {
                                Ok(event) => this.record(&event),
                                Err(TryRecvError::Lagged(_)) => continue,
                                Err(_) => break,
                            }
                        }
                        break;
                    }
                    received = rx.recv() => match received {
                        Ok(event) => this.record(&event),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "reporter fell behind the event bus");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        })
    }

    pub fn record(&self, event: &Event) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match event {
            Event::IntentReceived { run_id, source, .. } => {
                state.pending.insert(*run_id, source.clone());
            }
            Event::IntentSuppressed { source, .. } => {
                state.tallies.entry(source.clone()).or_default().suppressed += 1;
            }
            Event::IntentRejected { source, .. } => {
                state.tallies.entry(source.clone()).or_default().rejected += 1;
            }
            Event::RunFinished {
                run_id,
                run_name,
                status,
                detail,
                ..
            } => {
                let source = state
                    .pending
                    .remove(run_id)
                    .unwrap_or_else(|| "unknown".to_owned());
                let detail = detail.as_deref().unwrap_or("");
                let tally = state.tallies.entry(source.clone()).or_default();
                match status.as_str() {
                    "Completed" => {
                        tally.completed += 1;
                        info!(run = %run_name, source = %source, "run completed");
                    }
                    "Failed" => {
                        tally.failed += 1;
                        error!(run = %run_name, source = %source, detail, "run failed");
                    }
                    _ => {
                        tally.cancelled += 1;
                        warn!(run = %run_name, source = %source, detail, "run cancelled");
                    }
                }
            }
            Event::EmergencyStop { reason, .. } => {
                warn!(reason = %reason, "emergency stop");
            }
            Event::RunStatusChanged { .. } | Event::SystemEvent { .. } => {}
        }
    }

    pub fn summary(&self) -> BTreeMap<String, SourceTally> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .tallies
            .clone()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
