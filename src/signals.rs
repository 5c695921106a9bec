//! Named shutdown signals shared across the capture pipeline.
//!
//! Each signal is level-set: once raised it stays raised, and any number of
//! tasks can await it independently without consuming it. This mirrors the
//! three `threading.Event` objects the original implementation passes
//! between threads (`sleep_event`, `keyboard_interrupt_event`,
//! `csv_writer_exit_event`) — they carry distinct meanings and are never
//! collapsed into one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// A single level-set, multi-waiter signal.
#[derive(Debug, Default)]
struct SignalInner {
    set: AtomicBool,
    notify: Notify,
}

#[derive(Debug, Clone)]
pub struct Signal(Arc<SignalInner>);

impl Signal {
    pub fn new() -> Self {
        Self(Arc::new(SignalInner::default()))
    }

    /// Raise the signal. Idempotent — raising an already-set signal is a no-op.
    pub fn set(&self) {
        if !self.0.set.swap(true, Ordering::SeqCst) {
            self.0.notify.notify_waiters();
        }
    }

    pub fn is_set(&self) -> bool {
        self.0.set.load(Ordering::SeqCst)
    }

    /// Waits until the signal is raised. Returns immediately if already set.
    pub async fn wait(&self) {
        if self.is_set() {
            return;
        }
        let notified = self.0.notify.notified();
        if self.is_set() {
            return;
        }
        notified.await;
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}
