//! Cross-thread interruption of a running session call.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

const IDLE: u8 = 0;
const CANCEL: u8 = 1;
const DISCONNECT: u8 = 2;

/// What the session has been asked to do from another thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Interrupt {
    Cancel,
    Disconnect,
}

/// A cloneable handle to interrupt whatever the session is waiting on.
///
/// Every wait inside the session checks the handle at least once per
/// mode-entry retry interval.
///
/// **Example** - Disconnecting on Ctrl+C:
/// ```ignore
/// let handle = session.handle();
/// ctrlc::set_handler(move || handle.disconnect()).unwrap();
/// ```
#[derive(Debug, Clone, Default)]
pub struct SessionHandle {
    request: Arc<AtomicU8>,
}

impl SessionHandle {
    /// Abort the current wait. Mode entry goes back to waiting for the device;
    /// an outstanding command fails with `Cancelled` and the session stays in
    /// service mode.
    pub fn cancel(&self) {
        // A pending disconnect is never downgraded.
        let _ = self
            .request
            .compare_exchange(IDLE, CANCEL, Ordering::SeqCst, Ordering::SeqCst);
    }

    /// Abort the current wait and tear the session down.
    pub fn disconnect(&self) {
        self.request.store(DISCONNECT, Ordering::SeqCst);
    }

    /// Take the pending request, if any.
    pub(crate) fn take(&self) -> Option<Interrupt> {
        match self.request.swap(IDLE, Ordering::SeqCst) {
            CANCEL => Some(Interrupt::Cancel),
            DISCONNECT => Some(Interrupt::Disconnect),
            _ => None,
        }
    }

    /// Forget a cancel issued while nothing was waiting. Disconnect requests
    /// stay pending.
    pub(crate) fn clear_cancel(&self) {
        let _ = self
            .request
            .compare_exchange(CANCEL, IDLE, Ordering::SeqCst, Ordering::SeqCst);
    }

    pub(crate) fn clear(&self) {
        self.request.store(IDLE, Ordering::SeqCst);
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn requests() {
    let handle = SessionHandle::default();
    assert_eq!(handle.take(), None);

    handle.clone().cancel();
    assert_eq!(handle.take(), Some(Interrupt::Cancel));
    assert_eq!(handle.take(), None);

    handle.disconnect();
    handle.cancel();
    assert_eq!(handle.take(), Some(Interrupt::Disconnect));
}

#[test]
fn stale_cancel_is_dropped() {
    let handle = SessionHandle::default();
    handle.cancel();
    handle.clear_cancel();
    assert_eq!(handle.take(), None);

    handle.disconnect();
    handle.clear_cancel();
    assert_eq!(handle.take(), Some(Interrupt::Disconnect));
}
