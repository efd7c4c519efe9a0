//! Win32 global hotkeys.
//!
//! `RegisterHotKey` delivers `WM_HOTKEY` to the message queue of the thread
//! that registered the key, so every registration happens on one dedicated
//! pump thread.  Callers hand it requests over a channel and wake it with a
//! posted `WM_APP` message; `WM_QUIT` ends the thread when the listener is
//! dropped.

use std::collections::HashMap;
use std::sync::mpsc;
use std::thread::JoinHandle;

use windows::Win32::Foundation::{LPARAM, WPARAM};
use windows::Win32::System::Threading::GetCurrentThreadId;
use windows::Win32::UI::Input::KeyboardAndMouse::{
    HOT_KEY_MODIFIERS, MOD_ALT, MOD_CONTROL, MOD_NOREPEAT, MOD_SHIFT, MOD_WIN, RegisterHotKey,
    UnregisterHotKey, VIRTUAL_KEY, VK_BACK, VK_DELETE, VK_DOWN, VK_END, VK_ESCAPE, VK_F1, VK_HOME,
    VK_INSERT, VK_LEFT, VK_NEXT, VK_PRIOR, VK_RETURN, VK_RIGHT, VK_SPACE, VK_TAB, VK_UP,
};
use windows::Win32::UI::WindowsAndMessaging::{
    GetMessageW, MSG, PM_NOREMOVE, PeekMessageW, PostThreadMessageW, WM_APP, WM_HOTKEY, WM_QUIT,
    WM_USER,
};

use crate::error::{PlatformError, Result};
use crate::hotkey::{HotkeyCallback, HotkeyListener, Key, KeyCombo, NamedKey};

enum Request {
    Register {
        combo: KeyCombo,
        callback: HotkeyCallback,
        reply: mpsc::Sender<Result<()>>,
    },
    Unregister {
        combo: KeyCombo,
        reply: mpsc::Sender<Result<()>>,
    },
}

/// System-wide hotkeys backed by `RegisterHotKey`.
pub struct Win32Hotkeys {
    thread_id: u32,
    requests: mpsc::Sender<Request>,
    pump: Option<JoinHandle<()>>,
}

impl Win32Hotkeys {
    /// Start the pump thread.
    pub fn new() -> Result<Self> {
        let (requests, inbox) = mpsc::channel::<Request>();
        let (ready_tx, ready_rx) = mpsc::channel::<u32>();

        let pump = std::thread::Builder::new()
            .name("intentd-hotkeys".into())
            .spawn(move || {
                let mut msg = MSG::default();
                // Forces creation of the thread's message queue before
                // anyone posts to it.
                unsafe {
                    let _ = PeekMessageW(&mut msg, None, WM_USER, WM_USER, PM_NOREMOVE);
                }
                let _ = ready_tx.send(unsafe { GetCurrentThreadId() });
                pump_messages(&inbox);
            })
            .map_err(|e| backend("start hotkey thread", e))?;

        let thread_id = ready_rx
            .recv()
            .map_err(|_| backend("start hotkey thread", "pump thread exited early"))?;
        tracing::debug!(thread_id, "win32 hotkey pump started");

        Ok(Self {
            thread_id,
            requests,
            pump: Some(pump),
        })
    }

    fn call(&self, request: Request, reply: mpsc::Receiver<Result<()>>) -> Result<()> {
        self.requests
            .send(request)
            .map_err(|_| backend("hotkey request", "pump thread is gone"))?;
        unsafe { PostThreadMessageW(self.thread_id, WM_APP, WPARAM(0), LPARAM(0)) }
            .map_err(|e| backend("hotkey request", e))?;
        reply
            .recv()
            .map_err(|_| backend("hotkey request", "pump thread dropped the reply"))?
    }
}

impl HotkeyListener for Win32Hotkeys {
    fn register(&self, combo: KeyCombo, callback: HotkeyCallback) -> Result<()> {
        let (reply, rx) = mpsc::channel();
        self.call(
            Request::Register {
                combo,
                callback,
                reply,
            },
            rx,
        )
    }

    fn unregister(&self, combo: KeyCombo) -> Result<()> {
        let (reply, rx) = mpsc::channel();
        self.call(Request::Unregister { combo, reply }, rx)
    }
}

impl Drop for Win32Hotkeys {
    fn drop(&mut self) {
        let _ = unsafe { PostThreadMessageW(self.thread_id, WM_QUIT, WPARAM(0), LPARAM(0)) };
        if let Some(pump) = self.pump.take()
            && pump.join().is_err()
        {
            tracing::error!("win32 hotkey pump panicked");
        }
    }
}

// ---------------------------------------------------------------------------
// Pump thread
// ---------------------------------------------------------------------------

fn pump_messages(inbox: &mpsc::Receiver<Request>) {
    let mut registered: HashMap<i32, (KeyCombo, HotkeyCallback)> = HashMap::new();
    let mut next_id: i32 = 1;
    let mut msg = MSG::default();

    loop {
        // 0 is WM_QUIT, -1 an error.
        let status = unsafe { GetMessageW(&mut msg, None, 0, 0) }.0;
        if status == 0 {
            break;
        }
        if status == -1 {
            tracing::error!("GetMessageW failed in hotkey pump");
            break;
        }

        match msg.message {
            WM_HOTKEY => {
                let id = msg.wParam.0 as i32;
                if let Some((combo, callback)) = registered.get(&id) {
                    tracing::debug!(combo = %combo, "global hotkey pressed");
                    callback();
                }
            }
            WM_APP => {
                while let Ok(request) = inbox.try_recv() {
                    handle_request(request, &mut registered, &mut next_id);
                }
            }
            _ => {}
        }
    }

    for (id, (combo, _)) in registered {
        if let Err(e) = unsafe { UnregisterHotKey(None, id) } {
            tracing::warn!(combo = %combo, error = %e, "failed to unregister hotkey on shutdown");
        }
    }
    tracing::debug!("win32 hotkey pump stopped");
}

fn handle_request(
    request: Request,
    registered: &mut HashMap<i32, (KeyCombo, HotkeyCallback)>,
    next_id: &mut i32,
) {
    match request {
        Request::Register {
            combo,
            callback,
            reply,
        } => {
            let result = if registered.values().any(|(c, _)| *c == combo) {
                Err(PlatformError::HotkeyRegistration {
                    combo: combo.to_string(),
                    reason: "already registered".into(),
                })
            } else {
                let (modifiers, vk) = native_combo(&combo);
                let id = *next_id;
                unsafe { RegisterHotKey(None, id, modifiers, u32::from(vk.0)) }
                    .map(|()| {
                        *next_id += 1;
                        registered.insert(id, (combo, callback));
                    })
                    .map_err(|e| PlatformError::HotkeyRegistration {
                        combo: combo.to_string(),
                        reason: e.to_string(),
                    })
            };
            let _ = reply.send(result);
        }
        Request::Unregister { combo, reply } => {
            let id = registered
                .iter()
                .find(|(_, (c, _))| *c == combo)
                .map(|(id, _)| *id);
            let result = match id {
                Some(id) => {
                    registered.remove(&id);
                    unsafe { UnregisterHotKey(None, id) }.map_err(|e| backend("unregister hotkey", e))
                }
                None => Ok(()),
            };
            let _ = reply.send(result);
        }
    }
}

/// Modifier flags and virtual-key code for `combo`.
fn native_combo(combo: &KeyCombo) -> (HOT_KEY_MODIFIERS, VIRTUAL_KEY) {
    let m = &combo.modifiers;
    let mut modifiers = MOD_NOREPEAT;
    for (held, flag) in [
        (m.ctrl, MOD_CONTROL),
        (m.alt, MOD_ALT),
        (m.shift, MOD_SHIFT),
        (m.logo, MOD_WIN),
    ] {
        if held {
            modifiers = modifiers | flag;
        }
    }

    let vk = match combo.key {
        // Letter and digit virtual keys equal their uppercase ASCII codes.
        Key::Char(c) => VIRTUAL_KEY(c.to_ascii_uppercase() as u16),
        Key::Function(n) => VIRTUAL_KEY(VK_F1.0 + u16::from(n) - 1),
        Key::Named(named) => match named {
            NamedKey::Escape => VK_ESCAPE,
            NamedKey::Space => VK_SPACE,
            NamedKey::Tab => VK_TAB,
            NamedKey::Enter => VK_RETURN,
            NamedKey::Backspace => VK_BACK,
            NamedKey::Delete => VK_DELETE,
            NamedKey::Insert => VK_INSERT,
            NamedKey::Home => VK_HOME,
            NamedKey::End => VK_END,
            NamedKey::PageUp => VK_PRIOR,
            NamedKey::PageDown => VK_NEXT,
            NamedKey::Up => VK_UP,
            NamedKey::Down => VK_DOWN,
            NamedKey::Left => VK_LEFT,
            NamedKey::Right => VK_RIGHT,
        },
    };
    (modifiers, vk)
}

fn backend(operation: &str, reason: impl ToString) -> PlatformError {
    PlatformError::Backend {
        operation: operation.to_owned(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_combo_maps_to_native_codes() {
        let combo = KeyCombo::parse("ctrl+alt+shift+esc").expect("valid");
        let (modifiers, vk) = native_combo(&combo);
        assert_eq!(modifiers, MOD_NOREPEAT | MOD_CONTROL | MOD_ALT | MOD_SHIFT);
        assert_eq!(vk, VK_ESCAPE);
    }

    #[test]
    fn characters_and_function_keys_map_to_virtual_keys() {
        let (_, vk) = native_combo(&KeyCombo::parse("win+q").expect("valid"));
        assert_eq!(vk, VIRTUAL_KEY(b'Q' as u16));
        let (_, vk) = native_combo(&KeyCombo::parse("f12").expect("valid"));
        assert_eq!(vk.0, VK_F1.0 + 11);
    }

    #[test]
    fn register_and_unregister_round_trip() {
        let hotkeys = Win32Hotkeys::new().expect("pump starts");
        let combo = KeyCombo::parse("ctrl+alt+shift+f24").expect("valid");
        hotkeys
            .register(combo, std::sync::Arc::new(|| {}))
            .expect("registers");
        assert!(hotkeys.register(combo, std::sync::Arc::new(|| {})).is_err());
        hotkeys.unregister(combo).expect("unregisters");
    }
}
