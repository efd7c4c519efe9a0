//! In-process event bus.
//!
//! The bus provides a lightweight publish/subscribe mechanism built on top of
//! [`tokio::sync::broadcast`].  The dispatcher, executor and emergency
//! coordinator publish [`Event`]s here; the CLI reporter and tests subscribe.
//!
//! Events are wrapped in [`Arc`] so that broadcasting to multiple subscribers
//! does not require cloning the payload.
//!
//! # Usage
//!
//! ```rust,no_run
//! # use intentd_kernel::ipc::{IpcBus, Event};
//! # async fn example() {
//! let bus = IpcBus::new(256);
//! let mut rx = bus.subscribe();
//!
//! bus.publish(Event::SystemEvent {
//!     kind: "startup".into(),
//!     message: "runtime initialized".into(),
//! });
//!
//! let event = rx.recv().await.unwrap();
//! # }
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// An event that flows through the bus.
///
/// Sources and statuses are carried as strings so that subscribers outside
/// the producing crate can log them without extra dependencies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    /// An intent passed dedupe and catalog lookup and was queued for a run.
    IntentReceived {
        run_id: Uuid,
        intent: String,
        fingerprint: String,
        /// Producer that submitted the intent (`file`, `ocr`, `chat`).
        source: String,
        timestamp: DateTime<Utc>,
    },

    /// A duplicate intent was dropped by the dedupe window.
    IntentSuppressed {
        intent: String,
        fingerprint: String,
        source: String,
        timestamp: DateTime<Utc>,
    },

    /// An intent was rejected before reaching the executor (unknown intent,
    /// unloadable recipe, executor shut down).
    IntentRejected {
        intent: String,
        source: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A run changed state in the executor.
    RunStatusChanged {
        run_id: Uuid,
        run_name: String,
        /// New status as a string (e.g. "Running", "Completed").
        new_status: String,
        timestamp: DateTime<Utc>,
    },

    /// A run reached a terminal state.
    RunFinished {
        run_id: Uuid,
        run_name: String,
        /// Terminal status: "Completed", "Failed" or "Cancelled".
        status: String,
        detail: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// The emergency interrupt fired.
    EmergencyStop {
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Generic system-level event for anything that does not fit the above.
    SystemEvent {
        /// A short, machine-readable event kind (e.g. "startup", "shutdown").
        kind: String,
        /// Human-readable description.
        message: String,
    },
}

impl Event {
    /// Short variant name used in log fields.
    pub fn name(&self) -> &'static str {
        match self {
            Self::IntentReceived { .. } => "intent_received",
            Self::IntentSuppressed { .. } => "intent_suppressed",
            Self::IntentRejected { .. } => "intent_rejected",
            Self::RunStatusChanged { .. } => "run_status_changed",
            Self::RunFinished { .. } => "run_finished",
            Self::EmergencyStop { .. } => "emergency_stop",
            Self::SystemEvent { .. } => "system",
        }
    }

    /// Producer recorded on intent admission events.
    pub fn source(&self) -> Option<&str> {
        match self {
            Self::IntentReceived { source, .. }
            | Self::IntentSuppressed { source, .. }
            | Self::IntentRejected { source, .. } => Some(source),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// IPC Bus
// ---------------------------------------------------------------------------

/// Broadcast bus shared by every component that reports progress.
///
/// Clones share one channel.  A subscriber that falls more than `capacity`
/// events behind gets [`broadcast::error::RecvError::Lagged`] and resumes
/// from the oldest retained event.
#[derive(Clone)]
pub struct IpcBus {
    sender: Arc<broadcast::Sender<Arc<Event>>>,
}

impl IpcBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Deliver `event` to the current subscribers and return how many there
    /// were.  With nobody listening the event is dropped.
    pub fn publish(&self, event: Event) -> usize {
        let name = event.name();
        let delivered = self.sender.send(Arc::new(event)).unwrap_or(0);
        tracing::trace!(event = name, receivers = delivered, "bus event");
        delivered
    }

    /// Subscribe to events published from now on.  Nothing is replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Event>> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
