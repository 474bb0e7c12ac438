//! Dedicated OS-thread hotkey listener using `rdev::listen`.
//!
//! `rdev::listen` has no shutdown API.  Dropping [`HotkeyListener`] sets a
//! stop flag so the callback forwards nothing more; the thread itself stays
//! blocked in rdev until the process exits.

use std::io;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::sync::mpsc;

use super::HotkeyEvent;

// ---------------------------------------------------------------------------
// PushToTalkFilter
// ---------------------------------------------------------------------------

/// Collapses OS key-repeat into one press per hold.
#[derive(Debug)]
struct PushToTalkFilter {
    key: rdev::Key,
    held: bool,
}

impl PushToTalkFilter {
    fn new(key: rdev::Key) -> Self {
        Self { key, held: false }
    }

    fn filter(&mut self, event: &rdev::EventType) -> Option<HotkeyEvent> {
        match *event {
            rdev::EventType::KeyPress(k) if k == self.key && !self.held => {
                self.held = true;
                Some(HotkeyEvent::PushToTalkPressed)
            }
            rdev::EventType::KeyRelease(k) if k == self.key && self.held => {
                self.held = false;
                Some(HotkeyEvent::PushToTalkReleased)
            }
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// HotkeyListener
// ---------------------------------------------------------------------------

/// Handle to the listener thread.  Drop it to stop forwarding events.
pub struct HotkeyListener {
    stop: Arc<AtomicBool>,
    _thread: std::thread::JoinHandle<()>,
}

impl HotkeyListener {
    /// Spawn the listener thread; press/release of `key` is sent on `tx`
    /// with `blocking_send`.
    pub fn start(key: rdev::Key, tx: mpsc::Sender<HotkeyEvent>) -> io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let thread = std::thread::Builder::new()
            .name("hotkey-listener".into())
            .spawn(move || {
                let mut filter = PushToTalkFilter::new(key);
                let result = rdev::listen(move |event| {
                    if stop_flag.load(Ordering::Relaxed) {
                        return;
                    }
                    if let Some(ev) = filter.filter(&event.event_type) {
                        let _ = tx.blocking_send(ev);
                    }
                });

                if let Err(e) = result {
                    log::error!("hotkey-listener: rdev::listen exited with error: {e:?}");
                }
            })?;

        log::info!("hotkey-listener: push-to-talk on {key:?}");
        Ok(Self {
            stop,
            _thread: thread,
        })
    }
}

impl Drop for HotkeyListener {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
