//! Global hotkey capability and key-combo parsing.
//!
//! Combos are written as `+`-separated tokens, e.g. `ctrl+alt+shift+esc`.
//! Any number of modifiers may appear, but exactly one non-modifier key is
//! required.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{PlatformError, Result};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Modifier keys held while the main key is pressed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Modifiers {
    pub ctrl: bool,
    pub alt: bool,
    pub shift: bool,
    pub logo: bool,
}

/// Named non-character keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamedKey {
    Escape,
    Space,
    Tab,
    Enter,
    Backspace,
    Delete,
    Insert,
    Home,
    End,
    PageUp,
    PageDown,
    Up,
    Down,
    Left,
    Right,
}

impl NamedKey {
    fn from_token(token: &str) -> Option<Self> {
        let key = match token {
            "esc" | "escape" => Self::Escape,
            "space" => Self::Space,
            "tab" => Self::Tab,
            "enter" | "return" => Self::Enter,
            "backspace" => Self::Backspace,
            "delete" | "del" => Self::Delete,
            "insert" => Self::Insert,
            "home" => Self::Home,
            "end" => Self::End,
            "pageup" => Self::PageUp,
            "pagedown" => Self::PageDown,
            "up" => Self::Up,
            "down" => Self::Down,
            "left" => Self::Left,
            "right" => Self::Right,
            _ => return None,
        };
        Some(key)
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Escape => "esc",
            Self::Space => "space",
            Self::Tab => "tab",
            Self::Enter => "enter",
            Self::Backspace => "backspace",
            Self::Delete => "delete",
            Self::Insert => "insert",
            Self::Home => "home",
            Self::End => "end",
            Self::PageUp => "pageup",
            Self::PageDown => "pagedown",
            Self::Up => "up",
            Self::Down => "down",
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

/// The single non-modifier key of a combo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    /// ASCII letter (stored lowercase) or digit.
    Char(char),
    /// `F1` through `F24`.
    Function(u8),
    Named(NamedKey),
}

/// A parsed global key combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyCombo {
    pub modifiers: Modifiers,
    pub key: Key,
}

impl KeyCombo {
    /// Parse a combo such as `ctrl+alt+shift+esc`.
    pub fn parse(text: &str) -> Result<Self> {
        let invalid = |reason: String| PlatformError::InvalidHotkey {
            combo: text.to_owned(),
            reason,
        };

        let mut modifiers = Modifiers::default();
        let mut key: Option<Key> = None;

        for raw in text.split('+') {
            let token = raw.trim().to_lowercase();
            if token.is_empty() {
                return Err(invalid("empty token".into()));
            }
            match token.as_str() {
                "ctrl" | "control" => modifiers.ctrl = true,
                "alt" => modifiers.alt = true,
                "shift" => modifiers.shift = true,
                "win" | "windows" | "logo" | "super" | "meta" | "cmd" => modifiers.logo = true,
                other => {
                    if key.is_some() {
                        return Err(invalid("more than one non-modifier key".into()));
                    }
                    key = Some(parse_key(other).ok_or_else(|| invalid(format!("unknown key `{other}`")))?);
                }
            }
        }

        let key = key.ok_or_else(|| invalid("no non-modifier key".into()))?;
        Ok(Self { modifiers, key })
    }
}

fn parse_key(token: &str) -> Option<Key> {
    let mut chars = token.chars();
    if let (Some(ch), None) = (chars.next(), chars.next()) {
        return ch.is_ascii_alphanumeric().then_some(Key::Char(ch));
    }
    if let Some(n) = token.strip_prefix('f').and_then(|rest| rest.parse::<u8>().ok()) {
        return (1..=24).contains(&n).then_some(Key::Function(n));
    }
    NamedKey::from_token(token).map(Key::Named)
}

impl FromStr for KeyCombo {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for KeyCombo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.modifiers;
        for (held, name) in [
            (m.ctrl, "ctrl"),
            (m.alt, "alt"),
            (m.shift, "shift"),
            (m.logo, "win"),
        ] {
            if held {
                write!(f, "{name}+")?;
            }
        }
        match self.key {
            Key::Char(c) => write!(f, "{c}"),
            Key::Function(n) => write!(f, "f{n}"),
            Key::Named(named) => f.write_str(named.as_str()),
        }
    }
}

// ---------------------------------------------------------------------------
// Capability trait
// ---------------------------------------------------------------------------

/// Invoked from the listener's own thread when the combo is pressed.
pub type HotkeyCallback = Arc<dyn Fn() + Send + Sync>;

/// System-wide hotkey registration.
pub trait HotkeyListener: Send + Sync {
    fn register(&self, combo: KeyCombo, callback: HotkeyCallback) -> Result<()>;
    fn unregister(&self, combo: KeyCombo) -> Result<()>;

    /// Whether presses on the physical keyboard reach this listener.
    fn is_system_wide(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
