//! Emergency Hotkey Coordinator.
//!
//! Ties the kill switch together.  Pressing the registered combo (or sending
//! the process interrupt) triggers the shared [`InterruptSignal`], which the
//! recipe runner and click engine poll between steps and attempts.  It also
//! cancels every run still waiting in the executor queue, cancels the
//! producer token the OCR scanner and chat bridge loops select on, and
//! publishes [`Event::EmergencyStop`].
//!
//! The switch is one-shot: further presses are no-ops until [`rearm`] is
//! called, which also hands out a fresh producer token.
//!
//! [`rearm`]: EmergencyCoordinator::rearm

use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use intentd_kernel::{Event, Executor, InterruptSignal, IpcBus};
use intentd_platform::{HotkeyCallback, HotkeyListener, KeyCombo};

use crate::error::Result;

struct Inner {
    combo: KeyCombo,
    signal: InterruptSignal,
    executor: Executor,
    bus: IpcBus,
    producers: Mutex<CancellationToken>,
}

/// Cheaply cloneable handle to the process kill switch.
#[derive(Clone)]
pub struct EmergencyCoordinator {
    inner: Arc<Inner>,
}

impl EmergencyCoordinator {
    pub fn new(combo: KeyCombo, signal: InterruptSignal, executor: Executor, bus: IpcBus) -> Self {
        Self {
            inner: Arc::new(Inner {
                combo,
                signal,
                executor,
                bus,
                producers: Mutex::new(CancellationToken::new()),
            }),
        }
    }

    pub fn combo(&self) -> KeyCombo {
        self.inner.combo
    }

    pub fn signal(&self) -> &InterruptSignal {
        &self.inner.signal
    }

    /// Token for producer loops.  Cancelled when the switch fires.
    pub fn producer_token(&self) -> CancellationToken {
        self.inner
            .producers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.signal.is_triggered()
    }

    /// Fire the switch.  Returns `false` if it had already fired.
    pub fn trigger(&self, reason: &str) -> bool {
        let inner = &self.inner;
        if !inner.signal.trigger(reason) {
            tracing::debug!(reason, "emergency stop already active");
            return false;
        }

        let cancelled = inner.executor.cancel_pending();
        self.producer_token().cancel();
        inner.bus.publish(Event::EmergencyStop {
            reason: reason.to_owned(),
            timestamp: Utc::now(),
        });
        tracing::warn!(reason, cancelled_runs = cancelled, "emergency stop triggered");
        true
    }

    /// Register the combo with the platform hotkey listener.
    pub fn register(&self, hotkeys: &dyn HotkeyListener) -> Result<()> {
        let this = self.clone();
        let combo = self.inner.combo;
        let callback: HotkeyCallback = Arc::new(move || {
            this.trigger(&format!("hotkey {combo}"));
        });
        hotkeys.register(combo, callback)?;
        if hotkeys.is_system_wide() {
            tracing::info!(combo = %combo, "emergency hotkey armed");
        } else {
            tracing::warn!(
                combo = %combo,
                "no global hotkey backend on this host; emergency hotkey is inert, use Ctrl-C"
            );
        }
        Ok(())
    }

    pub fn unregister(&self, hotkeys: &dyn HotkeyListener) -> Result<()> {
        hotkeys.unregister(self.inner.combo)?;
        Ok(())
    }

    /// Treat the process interrupt (Ctrl-C) as an emergency trigger.  The
    /// task ends after the first interrupt or when `token` is cancelled.
    pub fn spawn_ctrl_c(&self, token: CancellationToken) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                res = tokio::signal::ctrl_c() => match res {
                    Ok(()) => {
                        this.trigger("process interrupt");
                    }
                    Err(e) => tracing::error!(error = %e, "cannot listen for process interrupt"),
                },
            }
        })
    }

    /// Clear the switch for a fresh run.  Producers must be restarted with
    /// a new [`producer_token`](Self::producer_token).
    pub fn rearm(&self) {
        self.inner.signal.rearm();
        *self
            .inner
            .producers
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = CancellationToken::new();
        tracing::info!("emergency stop re-armed");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
