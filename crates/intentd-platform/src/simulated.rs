//! Simulated platform backends.
//!
//! These stand in for the native capabilities on hosts without a supported
//! desktop and in tests.  Every backend records what was asked of it so tests
//! can assert on the exact sequence of synthetic input.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{PlatformError, Result};
use crate::hotkey::{HotkeyCallback, HotkeyListener, KeyCombo};
use crate::screen::{Bitmap, BoundingBox, Clipboard, RecognizedText, Region, ScreenCapture, TextRecognizer};
use crate::ui::{ClickMethod, ClickTarget, ElementHandle, ElementState, ResolvedElement, UiAutomation};

/// Recover the guard from a poisoned lock.  A panicking test thread must not
/// take the simulated desktop down with it.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// UI automation
// ---------------------------------------------------------------------------

/// How a simulated control reacts to one click method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodOutcome {
    /// The control activates.
    Succeed,
    /// The method runs but the control ignores it.
    Ignore,
    /// The backend reports an error.
    Error(String),
    /// The call blocks for the given duration, then reports no reaction.
    Hang(Duration),
}

/// A scriptable control on the simulated desktop.
#[derive(Debug, Clone)]
pub struct SimulatedElement {
    pub window_title: String,
    pub role: Option<String>,
    pub name: Option<String>,
    pub automation_id: Option<String>,
    pub state: ElementState,
    outcomes: HashMap<ClickMethod, MethodOutcome>,
}

impl SimulatedElement {
    /// An enabled, visible control that ignores every click method until
    /// told otherwise.
    pub fn new(window_title: impl Into<String>) -> Self {
        Self {
            window_title: window_title.into(),
            role: None,
            name: None,
            automation_id: None,
            state: ElementState::INTERACTIVE,
            outcomes: HashMap::new(),
        }
    }

    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn automation_id(mut self, id: impl Into<String>) -> Self {
        self.automation_id = Some(id.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.state.enabled = false;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.state.visible = false;
        self
    }

    pub fn on(mut self, method: ClickMethod, outcome: MethodOutcome) -> Self {
        self.outcomes.insert(method, outcome);
        self
    }

    fn matches(&self, target: &ClickTarget) -> bool {
        let title_ok = self
            .window_title
            .to_lowercase()
            .contains(&target.window_title.to_lowercase());
        let field_ok = |want: &Option<String>, have: &Option<String>| match want {
            None => true,
            Some(w) => have.as_deref().is_some_and(|h| h.eq_ignore_ascii_case(w)),
        };
        title_ok
            && field_ok(&target.role, &self.role)
            && field_ok(&target.name, &self.name)
            && field_ok(&target.automation_id, &self.automation_id)
    }
}

/// One synthetic input event delivered by the simulated desktop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputEvent {
    pub handle: ElementHandle,
    pub method: ClickMethod,
}

/// In-memory desktop of scriptable controls.
#[derive(Debug, Default)]
pub struct SimulatedDesktop {
    elements: Mutex<Vec<SimulatedElement>>,
    events: Mutex<Vec<InputEvent>>,
}

impl SimulatedDesktop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a control on the desktop and return its handle.
    pub fn add(&self, element: SimulatedElement) -> ElementHandle {
        let mut elements = lock(&self.elements);
        elements.push(element);
        ElementHandle((elements.len() - 1) as u64)
    }

    /// Every synthetic input event delivered so far, in order.
    pub fn events(&self) -> Vec<InputEvent> {
        lock(&self.events).clone()
    }

    /// The click methods attempted so far, in order.
    pub fn methods_attempted(&self) -> Vec<ClickMethod> {
        lock(&self.events).iter().map(|e| e.method).collect()
    }
}

impl UiAutomation for SimulatedDesktop {
    fn resolve(&self, target: &ClickTarget) -> Result<Option<ResolvedElement>> {
        let elements = lock(&self.elements);
        Ok(elements
            .iter()
            .enumerate()
            .find(|(_, el)| el.matches(target))
            .map(|(idx, el)| ResolvedElement {
                handle: ElementHandle(idx as u64),
                state: el.state,
                bounds: None,
            }))
    }

    fn perform(&self, method: ClickMethod, element: ElementHandle) -> Result<bool> {
        let outcome = {
            let elements = lock(&self.elements);
            let el = elements
                .get(element.0 as usize)
                .ok_or_else(|| PlatformError::ElementGone {
                    element: format!("{element:?}"),
                })?;
            el.outcomes
                .get(&method)
                .cloned()
                .unwrap_or(MethodOutcome::Ignore)
        };

        lock(&self.events).push(InputEvent {
            handle: element,
            method,
        });
        tracing::trace!(?element, %method, ?outcome, "simulated click");

        match outcome {
            MethodOutcome::Succeed => Ok(true),
            MethodOutcome::Ignore => Ok(false),
            MethodOutcome::Error(reason) => Err(PlatformError::Backend {
                operation: method.to_string(),
                reason,
            }),
            MethodOutcome::Hang(duration) => {
                std::thread::sleep(duration);
                Ok(false)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Screen
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Frame {
    Text(Vec<String>),
    Failure(String),
}

/// Scripted screen whose captures carry text instead of pixels.
///
/// Each capture consumes the next queued frame.  Once the queue is empty the
/// last text frame keeps being returned, like a static screen.  Pair it with
/// [`TextFrameRecognizer`], which reads the text back out of the bitmap.
#[derive(Debug, Default)]
pub struct ScriptedScreen {
    frames: Mutex<VecDeque<Frame>>,
    last: Mutex<Vec<String>>,
    captures: Mutex<usize>,
}

impl ScriptedScreen {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a frame showing the given lines of text.
    pub fn push_frame<I, S>(&self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        lock(&self.frames).push_back(Frame::Text(lines.into_iter().map(Into::into).collect()));
    }

    /// Queue a capture that fails.
    pub fn push_failure(&self, reason: impl Into<String>) {
        lock(&self.frames).push_back(Frame::Failure(reason.into()));
    }

    /// Number of captures taken so far.
    pub fn captures(&self) -> usize {
        *lock(&self.captures)
    }
}

impl ScreenCapture for ScriptedScreen {
    fn capture(&self, _region: Option<Region>) -> Result<Bitmap> {
        *lock(&self.captures) += 1;
        let next = lock(&self.frames).pop_front();
        let lines = match next {
            Some(Frame::Failure(reason)) => return Err(PlatformError::CaptureFailed { reason }),
            Some(Frame::Text(lines)) => {
                *lock(&self.last) = lines.clone();
                lines
            }
            None => lock(&self.last).clone(),
        };
        Ok(Bitmap {
            width: 0,
            height: lines.len() as u32,
            data: lines.join("\n").into_bytes(),
        })
    }
}

/// Recognizer for bitmaps produced by [`ScriptedScreen`]: one fragment per
/// non-empty line.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextFrameRecognizer;

impl TextRecognizer for TextFrameRecognizer {
    fn recognize(&self, bitmap: &Bitmap) -> Result<Vec<RecognizedText>> {
        let text = std::str::from_utf8(&bitmap.data).map_err(|e| PlatformError::RecognitionFailed {
            reason: e.to_string(),
        })?;
        Ok(text
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(row, line)| RecognizedText {
                text: line.to_owned(),
                bounds: BoundingBox {
                    left: 0.0,
                    top: row as f32 * 20.0,
                    width: line.len() as f32 * 8.0,
                    height: 20.0,
                },
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Clipboard
// ---------------------------------------------------------------------------

/// Process-local clipboard.
#[derive(Debug, Default)]
pub struct MemoryClipboard {
    text: Mutex<String>,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clipboard for MemoryClipboard {
    fn read(&self) -> Result<String> {
        Ok(lock(&self.text).clone())
    }

    fn write(&self, text: &str) -> Result<()> {
        *lock(&self.text) = text.to_owned();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Hotkeys
// ---------------------------------------------------------------------------

/// Hotkey listener driven by explicit [`ManualHotkeys::press`] calls.
#[derive(Default)]
pub struct ManualHotkeys {
    registered: Mutex<Vec<(KeyCombo, HotkeyCallback)>>,
}

impl ManualHotkeys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate pressing `combo`.  Returns whether any callback fired.
    pub fn press(&self, combo: KeyCombo) -> bool {
        let callbacks: Vec<HotkeyCallback> = lock(&self.registered)
            .iter()
            .filter(|(c, _)| *c == combo)
            .map(|(_, cb)| cb.clone())
            .collect();
        for cb in &callbacks {
            cb();
        }
        !callbacks.is_empty()
    }

    pub fn is_registered(&self, combo: KeyCombo) -> bool {
        lock(&self.registered).iter().any(|(c, _)| *c == combo)
    }
}

impl HotkeyListener for ManualHotkeys {
    fn register(&self, combo: KeyCombo, callback: HotkeyCallback) -> Result<()> {
        let mut registered = lock(&self.registered);
        if registered.iter().any(|(c, _)| *c == combo) {
            return Err(PlatformError::HotkeyRegistration {
                combo: combo.to_string(),
                reason: "already registered".into(),
            });
        }
        registered.push((combo, callback));
        Ok(())
    }

    fn unregister(&self, combo: KeyCombo) -> Result<()> {
        lock(&self.registered).retain(|(c, _)| *c != combo);
        Ok(())
    }

    fn is_system_wide(&self) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn resolve_matches_title_substring_and_name() {
        let desktop = SimulatedDesktop::new();
        desktop.add(SimulatedElement::new("Untitled - Notepad").name("File"));
        let save = desktop.add(SimulatedElement::new("Untitled - Notepad").name("Save"));

        let found = desktop
            .resolve(&ClickTarget::window("notepad").with_name("save"))
            .expect("resolve should not fail")
            .expect("element should be found");
        assert_eq!(found.handle, save);

        let missing = desktop
            .resolve(&ClickTarget::window("Chrome"))
            .expect("resolve should not fail");
        assert!(missing.is_none());
    }

    #[test]
    fn perform_records_events_and_follows_script() {
        let desktop = SimulatedDesktop::new();
        let handle = desktop.add(
            SimulatedElement::new("App")
                .on(ClickMethod::Invoke, MethodOutcome::Error("no pattern".into()))
                .on(ClickMethod::ClickMessage, MethodOutcome::Succeed),
        );

        assert!(desktop.perform(ClickMethod::Invoke, handle).is_err());
        assert!(!desktop.perform(ClickMethod::AccessibleClick, handle).expect("ok"));
        assert!(desktop.perform(ClickMethod::ClickMessage, handle).expect("ok"));
        assert_eq!(
            desktop.methods_attempted(),
            vec![
                ClickMethod::Invoke,
                ClickMethod::AccessibleClick,
                ClickMethod::ClickMessage
            ]
        );
    }

    #[test]
    fn scripted_screen_repeats_last_frame() {
        let screen = ScriptedScreen::new();
        screen.push_frame(["hello", "", "world"]);
        screen.push_failure("display asleep");

        let recognizer = TextFrameRecognizer;
        let first = screen.capture(None).expect("first capture");
        let texts: Vec<String> = recognizer
            .recognize(&first)
            .expect("recognize")
            .into_iter()
            .map(|t| t.text)
            .collect();
        assert_eq!(texts, vec!["hello", "world"]);

        assert!(matches!(
            screen.capture(None),
            Err(PlatformError::CaptureFailed { .. })
        ));

        let again = screen.capture(None).expect("static screen");
        assert_eq!(again, first);
        assert_eq!(screen.captures(), 3);
    }

    #[test]
    fn manual_hotkeys_fire_registered_callback() {
        let hotkeys = ManualHotkeys::new();
        let combo = KeyCombo::parse("ctrl+alt+shift+esc").expect("parse");
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        hotkeys
            .register(combo, Arc::new(move || {
                f.fetch_add(1, Ordering::SeqCst);
            }))
            .expect("register");

        assert!(hotkeys.register(combo, Arc::new(|| {})).is_err());
        assert!(hotkeys.press(combo));
        assert!(!hotkeys.press(KeyCombo::parse("ctrl+q").expect("parse")));
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        hotkeys.unregister(combo).expect("unregister");
        assert!(!hotkeys.is_registered(combo));
    }

    #[test]
    fn memory_clipboard_round_trip() {
        let clipboard = MemoryClipboard::new();
        clipboard.write("quote 42").expect("write");
        assert_eq!(clipboard.read().expect("read"), "quote 42");
    }
}
