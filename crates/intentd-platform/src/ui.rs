//! UI automation capability.
//!
//! The click engine never talks to a windowing system directly.  It asks a
//! [`UiAutomation`] backend to resolve a logical [`ClickTarget`] into a live
//! element and then to perform one [`ClickMethod`] at a time against it.
//! Resolution happens on every call; handles are never cached because window
//! layouts change between clicks.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;

// ---------------------------------------------------------------------------
// Targets
// ---------------------------------------------------------------------------

/// Logical description of a control to click.
///
/// `window_title` is matched case-insensitively as a substring of the
/// top-level window title.  The remaining fields narrow the match to one
/// control inside that window; `None` means "don't care".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickTarget {
    pub window_title: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub automation_id: Option<String>,
}

impl ClickTarget {
    /// Target a window by title.  Narrow it with the builder methods.
    pub fn window(title: impl Into<String>) -> Self {
        Self {
            window_title: title.into(),
            ..Self::default()
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_automation_id(mut self, id: impl Into<String>) -> Self {
        self.automation_id = Some(id.into());
        self
    }
}

impl fmt::Display for ClickTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "window~{:?}", self.window_title)?;
        if let Some(role) = &self.role {
            write!(f, " role={role}")?;
        }
        if let Some(name) = &self.name {
            write!(f, " name={name:?}")?;
        }
        if let Some(id) = &self.automation_id {
            write!(f, " id={id}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Resolved elements
// ---------------------------------------------------------------------------

/// Opaque backend handle for a resolved control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementHandle(pub u64);

/// Interactivity of a resolved control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementState {
    pub enabled: bool,
    pub visible: bool,
}

impl ElementState {
    /// A control that can receive input.
    pub const INTERACTIVE: Self = Self {
        enabled: true,
        visible: true,
    };

    pub fn is_interactive(&self) -> bool {
        self.enabled && self.visible
    }
}

impl Default for ElementState {
    fn default() -> Self {
        Self::INTERACTIVE
    }
}

/// Screen rectangle in physical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// The result of resolving a [`ClickTarget`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedElement {
    pub handle: ElementHandle,
    pub state: ElementState,
    pub bounds: Option<Bounds>,
}

// ---------------------------------------------------------------------------
// Click methods
// ---------------------------------------------------------------------------

/// Techniques for activating a control, from least to most invasive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClickMethod {
    /// Invoke the control's default action through its automation pattern.
    Invoke,
    /// Pointer click at the coordinates reported by the accessibility tree.
    AccessibleClick,
    /// Send the control a native "clicked" message.
    ClickMessage,
    /// Move keyboard focus to the control and synthesize an activation key.
    FocusTap,
}

impl ClickMethod {
    /// Every method in fallback priority order.
    pub const PRIORITY: [ClickMethod; 4] = [
        ClickMethod::Invoke,
        ClickMethod::AccessibleClick,
        ClickMethod::ClickMessage,
        ClickMethod::FocusTap,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Invoke => "invoke",
            Self::AccessibleClick => "accessible_click",
            Self::ClickMessage => "click_message",
            Self::FocusTap => "focus_tap",
        }
    }
}

impl fmt::Display for ClickMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Capability trait
// ---------------------------------------------------------------------------

/// Native UI automation backend.
///
/// Both methods may block on the windowing system; callers are expected to
/// bound them with their own timeouts.
pub trait UiAutomation: Send + Sync {
    /// Find the control described by `target`, or `Ok(None)` when nothing
    /// matches right now.
    fn resolve(&self, target: &ClickTarget) -> Result<Option<ResolvedElement>>;

    /// Attempt one click method.  `Ok(false)` means the backend ran the
    /// method but the control did not react.
    fn perform(&self, method: ClickMethod, element: ElementHandle) -> Result<bool>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_order_is_least_invasive_first() {
        let mut sorted = ClickMethod::PRIORITY;
        sorted.sort();
        assert_eq!(sorted, ClickMethod::PRIORITY);
        assert_eq!(ClickMethod::PRIORITY[0], ClickMethod::Invoke);
        assert_eq!(ClickMethod::PRIORITY[3], ClickMethod::FocusTap);
    }

    #[test]
    fn target_display_includes_narrowing_fields() {
        let target = ClickTarget::window("Chrome")
            .with_role("edit")
            .with_name("Address and search bar");
        let text = target.to_string();
        assert!(text.contains("Chrome"));
        assert!(text.contains("role=edit"));
        assert!(text.contains("Address and search bar"));
    }

    #[test]
    fn target_deserializes_with_optional_fields() {
        let target: ClickTarget =
            serde_json::from_str(r#"{"window_title": "Notepad", "name": "Save"}"#)
                .expect("target should deserialize");
        assert_eq!(target.window_title, "Notepad");
        assert_eq!(target.name.as_deref(), Some("Save"));
        assert!(target.role.is_none());
    }

    #[test]
    fn disabled_or_hidden_is_not_interactive() {
        assert!(ElementState::INTERACTIVE.is_interactive());
        assert!(
            !ElementState {
                enabled: false,
                visible: true
            }
            .is_interactive()
        );
        assert!(
            !ElementState {
                enabled: true,
                visible: false
            }
            .is_interactive()
        );
    }
}
