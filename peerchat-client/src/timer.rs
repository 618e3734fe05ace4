use std::time::Duration;

use tokio::task::JoinHandle;

use crate::event::{EventSink, SessionEvent};

/// Single-shot timer that posts [`SessionEvent::TypingTimeout`] when it fires.
/// Restarting cancels the pending tick; every restart gets a new sequence number so
/// a tick that was already queued when the timer was restarted can be told
/// apart from the current one.
#[derive(Debug, Default)]
pub struct CancellableTimer {
    seq: u64,
    handle: Option<JoinHandle<()>>,
}

impl CancellableTimer {
    pub fn restart(&mut self, after: Duration, sink: EventSink) {
        self.cancel();
        self.seq = self.seq.wrapping_add(1);
        let seq = self.seq;
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            sink.session(SessionEvent::TypingTimeout { seq });
        }));
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.handle.is_some()
    }

    /// Accepts a tick only if it belongs to the latest restart. Consumes the pending tick.
    pub fn fire(&mut self, seq: u64) -> bool {
        if seq != self.seq || self.handle.is_none() {
            return false;
        }
        self.handle = None;
        true
    }
}

impl Drop for CancellableTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
