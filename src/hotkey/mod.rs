//! Global push-to-talk key, backed by `rdev`.
//!
//! `rdev::listen()` blocks forever, so it runs on a dedicated OS thread
//! ([`HotkeyListener::start`]) and forwards [`HotkeyEvent`]s over a tokio
//! channel.  Holding a key makes the OS repeat `KeyPress`; only the first
//! press of each hold is forwarded.
//!
//! ```no_run
//! use tokio::sync::mpsc;
//! use voice_workflow::hotkey::{parse_key, HotkeyListener};
//!
//! let (tx, mut rx) = mpsc::channel(16);
//! let key = parse_key("F9").expect("unknown key");
//! let _listener = HotkeyListener::start(key, tx).expect("listener thread");
//! ```

pub mod listener;

pub use listener::HotkeyListener;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotkeyEvent {
    PushToTalkPressed,
    PushToTalkReleased,
}

/// Parse a key name from config into an [`rdev::Key`].
///
/// Accepts F1–F12, a handful of named keys and single ASCII letters, all
/// case-insensitively.
///
/// ```
/// use voice_workflow::hotkey::parse_key;
///
/// assert_eq!(parse_key("F9"), Some(rdev::Key::F9));
/// assert_eq!(parse_key("space"), Some(rdev::Key::Space));
/// assert_eq!(parse_key("r"), Some(rdev::Key::KeyR));
/// assert_eq!(parse_key("Ctrl+R"), None);
/// ```
pub fn parse_key(name: &str) -> Option<rdev::Key> {
    use rdev::Key::*;

    let upper = name.trim().to_ascii_uppercase();
    let key = match upper.as_str() {
        "F1" => F1,
        "F2" => F2,
        "F3" => F3,
        "F4" => F4,
        "F5" => F5,
        "F6" => F6,
        "F7" => F7,
        "F8" => F8,
        "F9" => F9,
        "F10" => F10,
        "F11" => F11,
        "F12" => F12,
        "SPACE" => Space,
        "ESC" | "ESCAPE" => Escape,
        "TAB" => Tab,
        "CAPSLOCK" => CapsLock,
        "SCROLLLOCK" => ScrollLock,
        "PAUSE" => Pause,
        "INSERT" => Insert,
        "HOME" => Home,
        "END" => End,
        "ALTGR" => AltGr,
        "RIGHTCTRL" => ControlRight,
        letter if letter.len() == 1 => return letter_key(letter.as_bytes()[0]),
        _ => return None,
    };
    Some(key)
}

fn letter_key(c: u8) -> Option<rdev::Key> {
    use rdev::Key::*;

    const LETTERS: [rdev::Key; 26] = [
        KeyA, KeyB, KeyC, KeyD, KeyE, KeyF, KeyG, KeyH, KeyI, KeyJ, KeyK, KeyL, KeyM, KeyN, KeyO,
        KeyP, KeyQ, KeyR, KeyS, KeyT, KeyU, KeyV, KeyW, KeyX, KeyY, KeyZ,
    ];
    c.is_ascii_uppercase()
        .then(|| LETTERS[usize::from(c - b'A')])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
