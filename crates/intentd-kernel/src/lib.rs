//! intentd kernel.
//!
//! Shared runtime state that every producer and the executor rely on:
//!
//! - **[`context`]** -- mutex-guarded [`ContextStore`] of session variables
//!   and activity history, plus the per-run [`ExecutionContext`].
//! - **[`dedupe`]** -- time-windowed [`DedupeCache`] keyed by intent
//!   [`Fingerprint`].
//! - **[`interrupt`]** -- the process-wide [`InterruptSignal`] carrying the
//!   emergency [`HotkeyState`].
//! - **[`ipc`]** -- publish/subscribe event bus backed by
//!   [`tokio::sync::broadcast`].
//! - **[`executor`]** -- single-lane FIFO run executor built on
//!   [`crossbeam::queue::SegQueue`].
//! - **[`error`]** -- unified kernel error types via [`thiserror`].
//!
//! All public types are `Send + Sync` and designed for use within a
//! multi-threaded tokio runtime.

pub mod context;
pub mod dedupe;
pub mod error;
pub mod executor;
pub mod interrupt;
pub mod ipc;

// Re-export the most commonly used types at the crate root for convenience.
pub use context::{ActivityRecord, ActivityStatus, ContextStore, ExecutionContext, Variables};
pub use dedupe::{DedupeCache, DedupeDecision, Fingerprint};
pub use error::{KernelError, Result};
pub use executor::{Executor, RunFn, RunId, RunInfo, RunReport, RunStatus};
pub use interrupt::{HotkeyState, InterruptSignal};
pub use ipc::{Event, IpcBus};
