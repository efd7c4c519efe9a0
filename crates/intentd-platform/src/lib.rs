//! Platform capability interface for intentd.
//!
//! Global hotkeys, native UI clicks, screen capture, OCR and the clipboard are
//! OS-specific.  This crate hides each behind a small trait so the
//! orchestration core never touches a native API:
//!
//! - **[`ui`]** -- [`UiAutomation`]: resolve a [`ClickTarget`] and perform one
//!   [`ClickMethod`] against it.
//! - **[`screen`]** -- [`ScreenCapture`], [`TextRecognizer`] and [`Clipboard`].
//! - **[`hotkey`]** -- [`KeyCombo`] parsing and the [`HotkeyListener`] trait.
//! - **[`simulated`]** -- in-memory implementations used on unsupported hosts
//!   and throughout the test suites.
//! - **`win32`** (Windows only) -- `RegisterHotKey`-backed global hotkeys.

pub mod error;
pub mod hotkey;
pub mod screen;
pub mod simulated;
pub mod ui;
#[cfg(windows)]
pub mod win32;

use std::sync::Arc;

pub use error::{PlatformError, Result};
pub use hotkey::{HotkeyCallback, HotkeyListener, Key, KeyCombo, Modifiers, NamedKey};
pub use screen::{Bitmap, BoundingBox, Clipboard, RecognizedText, Region, ScreenCapture, TextRecognizer};
pub use ui::{Bounds, ClickMethod, ClickTarget, ElementHandle, ElementState, ResolvedElement, UiAutomation};

/// The set of capabilities available on the running host.
///
/// Screen capture and OCR are optional: when either is missing the OCR
/// scanner is simply not started.
#[derive(Clone)]
pub struct Platform {
    pub ui: Arc<dyn UiAutomation>,
    pub capture: Option<Arc<dyn ScreenCapture>>,
    pub recognizer: Option<Arc<dyn TextRecognizer>>,
    pub clipboard: Arc<dyn Clipboard>,
    pub hotkeys: Arc<dyn HotkeyListener>,
}

impl Platform {
    /// Capabilities for a host without native backends: an empty simulated
    /// desktop, no screen capture, an in-memory clipboard and a hotkey
    /// listener that only fires when pressed programmatically.
    pub fn headless() -> Self {
        tracing::debug!("using headless platform backends");
        Self {
            ui: Arc::new(simulated::SimulatedDesktop::new()),
            capture: None,
            recognizer: None,
            clipboard: Arc::new(simulated::MemoryClipboard::new()),
            hotkeys: Arc::new(simulated::ManualHotkeys::new()),
        }
    }

    /// The best backends this build has for the running OS.  Windows gets
    /// system-wide hotkeys; everything else falls back to [`headless`].
    /// UI automation, capture and OCR are simulated on every host.
    ///
    /// [`headless`]: Self::headless
    pub fn native() -> Self {
        let platform = Self::headless();
        #[cfg(windows)]
        let platform = match win32::Win32Hotkeys::new() {
            Ok(hotkeys) => Self {
                hotkeys: Arc::new(hotkeys),
                ..platform
            },
            Err(e) => {
                tracing::warn!(error = %e, "win32 hotkeys unavailable, falling back to headless");
                platform
            }
        };
        tracing::warn!(
            "no native UI automation backend in this build; ui_click steps cannot reach real windows"
        );
        platform
    }

    /// Whether the emergency hotkey can be pressed on the physical keyboard.
    pub fn has_global_hotkeys(&self) -> bool {
        self.hotkeys.is_system_wide()
    }

    /// Whether the OCR scanner can run on this host.
    pub fn supports_ocr(&self) -> bool {
        self.capture.is_some() && self.recognizer.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headless_hotkeys_are_not_global() {
        let platform = Platform::headless();
        assert!(!platform.has_global_hotkeys());
        assert!(!platform.supports_ocr());
    }

    #[cfg(not(windows))]
    #[test]
    fn native_falls_back_to_headless_off_windows() {
        assert!(!Platform::native().has_global_hotkeys());
    }

    #[cfg(windows)]
    #[test]
    fn native_uses_global_hotkeys_on_windows() {
        assert!(Platform::native().has_global_hotkeys());
    }
}
