//! # Notification Stream
//!
//! The host transport may deliver notifications from a different execution
//! context than the task consuming them. This FIFO hand-off lets the
//! delivery side push without ever blocking, while the consumer suspends
//! only on "wait for the next record, with a timeout".
//!
//! Timeouts are per-wait: a timed-out wait changes nothing and simply
//! tells the caller to proceed (record a timeout sample, re-check a
//! deadline, and so on).

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

/// Consumer end of the notification FIFO.
pub struct NotificationStream {
    rx: mpsc::UnboundedReceiver<Bytes>,
}

impl NotificationStream {
    /// Fresh stream plus the sender handed to the delivery callback path.
    pub fn channel() -> (mpsc::UnboundedSender<Bytes>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, NotificationStream { rx })
    }

    /// Wrap a receiver handed back by a transport's subscribe call.
    pub fn from_receiver(rx: mpsc::UnboundedReceiver<Bytes>) -> Self {
        NotificationStream { rx }
    }

    /// Wait for the next notification. `None` means the wait timed out
    /// (or the delivery side is gone and the queue is drained).
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<Bytes> {
        tokio::time::timeout(timeout, self.rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Take a notification only if one is already queued.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.rx.try_recv().ok()
    }

    /// Discard everything currently queued (between measurement iterations).
    pub fn clear(&mut self) {
        while self.rx.try_recv().is_ok() {}
    }
}
