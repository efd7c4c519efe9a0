//! Process-wide interrupt signal.
//!
//! [`InterruptSignal`] carries the emergency [`HotkeyState`].  Blocking code
//! polls [`InterruptSignal::is_triggered`]; async loops await
//! [`InterruptSignal::cancelled`] or select on the [`CancellationToken`].
//!
//! Once triggered the signal stays triggered.  Only an explicit
//! [`InterruptSignal::rearm`] at the start of a fresh top-level run clears it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HotkeyState {
    Armed,
    Triggered,
}

/// Cheaply cloneable handle to the shared interrupt flag.
#[derive(Clone)]
pub struct InterruptSignal {
    inner: Arc<InterruptInner>,
}

struct InterruptInner {
    triggered: AtomicBool,
    token: Mutex<CancellationToken>,
    reason: Mutex<Option<String>>,
}

impl InterruptSignal {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(InterruptInner {
                triggered: AtomicBool::new(false),
                token: Mutex::new(CancellationToken::new()),
                reason: Mutex::new(None),
            }),
        }
    }

    /// Trigger the interrupt.  Returns `true` only for the call that moved
    /// the state from armed to triggered.
    pub fn trigger(&self, reason: impl Into<String>) -> bool {
        if self.inner.triggered.swap(true, Ordering::AcqRel) {
            return false;
        }
        let reason = reason.into();
        tracing::warn!(reason = %reason, "interrupt triggered");
        *self.inner.reason.lock().unwrap_or_else(PoisonError::into_inner) = Some(reason);
        self.token().cancel();
        true
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::Acquire)
    }

    pub fn state(&self) -> HotkeyState {
        if self.is_triggered() {
            HotkeyState::Triggered
        } else {
            HotkeyState::Armed
        }
    }

    /// Why the interrupt was triggered, if it has been.
    pub fn reason(&self) -> Option<String> {
        self.inner
            .reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Token cancelled when the current arming is triggered.
    pub fn token(&self) -> CancellationToken {
        self.inner
            .token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Resolves once the signal is triggered.
    pub async fn cancelled(&self) {
        let token = self.token();
        if self.is_triggered() {
            return;
        }
        token.cancelled().await;
    }

    /// Clear a triggered signal for a fresh run.  Loops that already stopped
    /// stay stopped; callers restart them explicitly.
    pub fn rearm(&self) {
        let mut token = self.inner.token.lock().unwrap_or_else(PoisonError::into_inner);
        if token.is_cancelled() {
            *token = CancellationToken::new();
        }
        *self.inner.reason.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.inner.triggered.store(false, Ordering::Release);
        tracing::info!("interrupt re-armed");
    }
}

impl Default for InterruptSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InterruptSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterruptSignal")
            .field("state", &self.state())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn trigger_is_one_shot_and_sticky() {
        let signal = InterruptSignal::new();
        assert_eq!(signal.state(), HotkeyState::Armed);

        assert!(signal.trigger("hotkey"));
        assert!(!signal.trigger("again"));
        assert_eq!(signal.state(), HotkeyState::Triggered);
        assert_eq!(signal.reason().as_deref(), Some("hotkey"));
        assert!(signal.token().is_cancelled());
    }

    #[test]
    fn clones_share_state() {
        let signal = InterruptSignal::new();
        let other = signal.clone();
        other.trigger("from clone");
        assert!(signal.is_triggered());
    }

    #[test]
    fn rearm_installs_fresh_token() {
        let signal = InterruptSignal::new();
        let old = signal.token();
        signal.trigger("stop");
        signal.rearm();

        assert_eq!(signal.state(), HotkeyState::Armed);
        assert!(signal.reason().is_none());
        assert!(old.is_cancelled());
        assert!(!signal.token().is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_resolves_on_trigger() {
        let signal = InterruptSignal::new();
        let waiter = signal.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.trigger("test");

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("waiter should wake")
            .expect("task should not panic");
    }
}
