//! Platform error types.
//!
//! Every capability trait in this crate returns [`PlatformError`].  Backends
//! map their native failures onto these variants so the orchestration core
//! never has to know which OS it is running on.

/// Unified error type for platform capabilities.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    // -- UI automation errors -----------------------------------------------
    /// A previously resolved element no longer exists.
    #[error("element is gone: {element}")]
    ElementGone { element: String },

    /// The automation backend failed while performing an operation.
    #[error("ui automation backend failed during {operation}: {reason}")]
    Backend { operation: String, reason: String },

    // -- Screen errors ------------------------------------------------------
    /// Capturing the screen (or a region of it) failed.
    #[error("screen capture failed: {reason}")]
    CaptureFailed { reason: String },

    /// The text recognizer could not process the bitmap.
    #[error("text recognition failed: {reason}")]
    RecognitionFailed { reason: String },

    // -- Clipboard errors ---------------------------------------------------
    #[error("clipboard error: {reason}")]
    Clipboard { reason: String },

    // -- Hotkey errors ------------------------------------------------------
    /// The key combination string could not be parsed.
    #[error("invalid hotkey `{combo}`: {reason}")]
    InvalidHotkey { combo: String, reason: String },

    /// The OS refused to register the global hotkey.
    #[error("failed to register hotkey `{combo}`: {reason}")]
    HotkeyRegistration { combo: String, reason: String },

    // -- Generic ------------------------------------------------------------
    /// The running host does not provide this capability.
    #[error("capability not supported on this host: {capability}")]
    Unsupported { capability: &'static str },
}

/// Convenience alias used throughout the platform crate.
pub type Result<T> = std::result::Result<T, PlatformError>;
