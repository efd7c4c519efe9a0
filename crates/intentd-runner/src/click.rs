//! UI click resolution engine.
//!
//! [`ClickEngine::click`] resolves a [`ClickTarget`] on every call and walks
//! the fallback chain in [`ClickMethod::PRIORITY`] order, stopping at the
//! first method the control reacts to.
//!
//! Guardrails:
//!
//! - A disabled or hidden control is reported as unreachable before any
//!   synthetic input is generated.
//! - The focus-tap fallback only runs when [`ClickOptions::allow_focus_tap`]
//!   is set.
//! - Each attempt runs on its own thread bounded by
//!   [`ClickOptions::attempt_timeout`].  A timed-out attempt falls through to
//!   the next method; it is never retried.
//! - The interrupt signal is checked before resolution and between attempts.

use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{self, RecvTimeoutError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use intentd_kernel::InterruptSignal;
use intentd_platform::{ClickMethod, ClickTarget, ElementHandle, UiAutomation};

use crate::error::ClickError;

/// Default per-attempt timeout.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_millis(1500);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Which click methods may run, and how long each may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClickOptions {
    pub allow_focus_tap: bool,
    /// Permit the accessibility-tree pointer click.
    pub allow_coordinate_click: bool,
    pub attempt_timeout: Duration,
}

impl Default for ClickOptions {
    fn default() -> Self {
        Self {
            allow_focus_tap: false,
            allow_coordinate_click: true,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }
}

impl ClickOptions {
    /// Apply a per-step focus-tap preference.  A step can only take the
    /// permission away, never grant it.
    pub fn narrowed(mut self, step_focus_tap: Option<bool>) -> Self {
        if let Some(step) = step_focus_tap {
            self.allow_focus_tap &= step;
        }
        self
    }

    fn permits(&self, method: ClickMethod) -> bool {
        match method {
            ClickMethod::FocusTap => self.allow_focus_tap,
            ClickMethod::AccessibleClick => self.allow_coordinate_click,
            ClickMethod::Invoke | ClickMethod::ClickMessage => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded,
    /// The method ran but the control did not react.
    NoEffect,
    Error(String),
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickAttempt {
    pub method: ClickMethod,
    pub outcome: AttemptOutcome,
}

/// Result of walking the fallback chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickResult {
    /// The method that succeeded, if any.
    pub method_used: Option<ClickMethod>,
    pub success: bool,
    /// Every attempt made, in order.
    pub attempts: Vec<ClickAttempt>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Stateless click resolver over a [`UiAutomation`] backend.
#[derive(Clone)]
pub struct ClickEngine {
    ui: Arc<dyn UiAutomation>,
    interrupt: InterruptSignal,
    defaults: ClickOptions,
}

impl ClickEngine {
    pub fn new(ui: Arc<dyn UiAutomation>, interrupt: InterruptSignal) -> Self {
        Self {
            ui,
            interrupt,
            defaults: ClickOptions::default(),
        }
    }

    /// Set the options used by step handlers (normally derived from the
    /// active profile).
    pub fn with_defaults(mut self, defaults: ClickOptions) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn defaults(&self) -> ClickOptions {
        self.defaults
    }

    pub fn click(&self, target: &ClickTarget, options: &ClickOptions) -> Result<ClickResult, ClickError> {
        if self.interrupt.is_triggered() {
            return Err(ClickError::Interrupted { attempts: 0 });
        }

        let element = self
            .ui
            .resolve(target)?
            .ok_or_else(|| ClickError::TargetNotFound {
                target: target.to_string(),
            })?;

        if !element.state.is_interactive() {
            warn!(
                target = %target,
                enabled = element.state.enabled,
                visible = element.state.visible,
                "click target is not interactive; no input sent"
            );
            return Err(ClickError::Unreachable {
                target: target.to_string(),
                enabled: element.state.enabled,
                visible: element.state.visible,
            });
        }

        let mut attempts = Vec::new();
        for method in ClickMethod::PRIORITY {
            if !options.permits(method) {
                debug!(target = %target, %method, "click method not permitted; skipping");
                continue;
            }
            if self.interrupt.is_triggered() {
                return Err(ClickError::Interrupted {
                    attempts: attempts.len(),
                });
            }

            let outcome = self.attempt(method, element.handle, options.attempt_timeout);
            debug!(target = %target, %method, ?outcome, "click attempt");
            let succeeded = outcome == AttemptOutcome::Succeeded;
            attempts.push(ClickAttempt { method, outcome });

            if succeeded {
                info!(target = %target, %method, attempts = attempts.len(), "click succeeded");
                return Ok(ClickResult {
                    method_used: Some(method),
                    success: true,
                    attempts,
                });
            }
        }

        warn!(target = %target, attempts = attempts.len(), "every click method failed");
        Ok(ClickResult {
            method_used: None,
            success: false,
            attempts,
        })
    }

    /// Run one method on a helper thread so a hung native call cannot stall
    /// the chain.  The helper is abandoned on timeout.
    fn attempt(&self, method: ClickMethod, handle: ElementHandle, timeout: Duration) -> AttemptOutcome {
        let (tx, rx) = channel::bounded(1);
        let ui = Arc::clone(&self.ui);
        let spawned = std::thread::Builder::new()
            .name(format!("click-{method}"))
            .spawn(move || {
                // The receiver may be gone after a timeout.
                let _ = tx.send(ui.perform(method, handle));
            });
        if let Err(e) = spawned {
            return AttemptOutcome::Error(format!("failed to spawn click thread: {e}"));
        }

        match rx.recv_timeout(timeout) {
            Ok(Ok(true)) => AttemptOutcome::Succeeded,
            Ok(Ok(false)) => AttemptOutcome::NoEffect,
            Ok(Err(e)) => AttemptOutcome::Error(e.to_string()),
            Err(RecvTimeoutError::Timeout) => AttemptOutcome::TimedOut,
            Err(RecvTimeoutError::Disconnected) => {
                AttemptOutcome::Error("click thread exited without reporting".into())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
