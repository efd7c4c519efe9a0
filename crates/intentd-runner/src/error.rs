//! Runner error types.
//!
//! [`RunnerError`] covers loading recipes.  [`StepError`] is what a step
//! handler returns and what a failed run carries; [`ClickError`] is the click
//! engine's own failure type and converts into the matching [`StepError`].

use std::path::PathBuf;

use intentd_platform::PlatformError;

/// Errors raised while locating, parsing or validating recipes.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    // -- Recipe errors -------------------------------------------------------
    /// No recipe with this identifier exists in the source.
    #[error("recipe not found: {recipe}")]
    RecipeNotFound { recipe: String },

    /// The recipe exists but could not be parsed or failed validation.
    #[error("invalid recipe `{recipe}`: {reason}")]
    RecipeInvalid { recipe: String, reason: String },

    // -- I/O -----------------------------------------------------------------
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure of a single recipe step.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StepError {
    /// Variables the step requires are absent from the execution context.
    #[error("missing context variables: {}", missing.join(", "))]
    MissingContext { missing: Vec<String> },

    /// The click target could not be found.
    #[error("target not found: {target}")]
    TargetNotFound { target: String },

    /// The click target exists but is disabled or hidden.
    #[error("target unreachable: {target} (enabled: {enabled}, visible: {visible})")]
    Unreachable {
        target: String,
        enabled: bool,
        visible: bool,
    },

    /// Every permitted click method was tried without success.
    #[error("no click method succeeded on {target} after {attempts} attempts")]
    ClickFailed { target: String, attempts: usize },

    /// The emergency interrupt fired while the step was running.
    #[error("interrupted")]
    Interrupted,

    /// An `assert` step evaluated to false.
    #[error("assertion failed: {reason}")]
    AssertionFailed { reason: String },

    /// Any other handler-level failure.
    #[error("step execution failed: {reason}")]
    Execution { reason: String },
}

impl StepError {
    pub fn execution(reason: impl Into<String>) -> Self {
        Self::Execution {
            reason: reason.into(),
        }
    }
}

/// Failure of a [`crate::click::ClickEngine::click`] call.
#[derive(Debug, thiserror::Error)]
pub enum ClickError {
    #[error("target not found: {target}")]
    TargetNotFound { target: String },

    #[error("target unreachable: {target} (enabled: {enabled}, visible: {visible})")]
    Unreachable {
        target: String,
        enabled: bool,
        visible: bool,
    },

    /// The interrupt fired before or between attempts.
    #[error("click interrupted after {attempts} attempts")]
    Interrupted { attempts: usize },

    /// Resolving the target failed inside the platform backend.
    #[error("failed to resolve target: {0}")]
    Resolve(#[from] PlatformError),
}

impl From<ClickError> for StepError {
    fn from(err: ClickError) -> Self {
        match err {
            ClickError::TargetNotFound { target } => Self::TargetNotFound { target },
            ClickError::Unreachable {
                target,
                enabled,
                visible,
            } => Self::Unreachable {
                target,
                enabled,
                visible,
            },
            ClickError::Interrupted { .. } => Self::Interrupted,
            ClickError::Resolve(e) => Self::execution(e.to_string()),
        }
    }
}

/// Convenience alias used throughout the runner crate.
pub type Result<T> = std::result::Result<T, RunnerError>;
