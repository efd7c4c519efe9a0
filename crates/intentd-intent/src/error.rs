//! Intent engine error types.
//!
//! All intent subsystems surface errors through [`IntentError`].  Each variant
//! carries enough context for callers to decide how to handle the failure.

use std::path::PathBuf;

/// Unified error type for the intent engine.
#[derive(Debug, thiserror::Error)]
pub enum IntentError {
    // -- Intent document errors ----------------------------------------------
    /// An intent file or document could not be parsed.
    #[error("invalid intent: {reason}")]
    InvalidIntent { reason: String },

    /// The file extension is not a supported intent format.
    #[error("unsupported intent file format: {path}")]
    UnsupportedFormat { path: PathBuf },

    // -- Macro errors --------------------------------------------------------
    /// Text looked like a macro but could not be parsed as one.
    #[error("malformed macro `{text}`: {reason}")]
    MalformedMacro { text: String, reason: String },

    // -- Catalog errors ------------------------------------------------------
    /// The intent catalog could not be loaded.
    #[error("invalid intent catalog: {reason}")]
    CatalogInvalid { reason: String },

    /// Two catalog rows declare the same intent.
    #[error("duplicate intent in catalog: {intent}")]
    DuplicateIntent { intent: String },

    /// Building the keyword automaton failed.
    #[error("keyword matcher build error: {reason}")]
    MatcherBuild { reason: String },

    // -- Filesystem errors ---------------------------------------------------
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The filesystem watcher could not be started.
    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),

    // -- Upstream crate errors -----------------------------------------------
    /// An error propagated from the kernel crate.
    #[error("kernel error: {0}")]
    Kernel(#[from] intentd_kernel::KernelError),

    /// An error propagated from the runner crate.
    #[error("runner error: {0}")]
    Runner(#[from] intentd_runner::RunnerError),

    /// An error propagated from the platform crate.
    #[error("platform error: {0}")]
    Platform(#[from] intentd_platform::PlatformError),

    // -- Serialization -------------------------------------------------------
    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    // -- Generic -------------------------------------------------------------
    /// Catch-all for unexpected internal errors.
    #[error("internal intent error: {0}")]
    Internal(String),
}

impl IntentError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Convenience alias used throughout the intent crate.
pub type Result<T> = std::result::Result<T, IntentError>;
