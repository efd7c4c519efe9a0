//! Kernel error types.
//!
//! All kernel subsystems surface errors through [`KernelError`], which is the
//! single error type returned by every public API in this crate.  Each variant
//! carries enough context for callers to decide how to handle the failure
//! without inspecting opaque strings.

use uuid::Uuid;

/// Unified error type for the intentd kernel.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    // -- Executor errors ----------------------------------------------------
    /// The referenced run does not exist in the executor.
    #[error("run not found: {run_id}")]
    RunNotFound {
        /// The [`Uuid`] that was looked up.
        run_id: Uuid,
    },

    /// The run has already started or finished and cannot be transitioned
    /// to the requested state.
    #[error("invalid run state transition for {run_id}: {reason}")]
    InvalidRunState { run_id: Uuid, reason: String },

    /// The executor has been shut down and will not accept new work.
    #[error("executor is shut down")]
    ExecutorShutdown,

    // -- Context errors -----------------------------------------------------
    /// A value could not be converted to or from its JSON representation.
    #[error("context value `{key}` is invalid: {reason}")]
    InvalidValue { key: String, reason: String },

    // -- Generic ------------------------------------------------------------
    /// Catch-all for unexpected internal errors that don't fit a specific
    /// variant.  Prefer a typed variant whenever possible.
    #[error("internal kernel error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the kernel crate.
pub type Result<T> = std::result::Result<T, KernelError>;
