//! A minimal WaitGroup, grounded on the teacher's `TaskTracker` (an atomic
//! in-flight counter plus a waker for graceful shutdown), adapted to
//! `tokio::sync::Notify` since this crate always runs on a `tokio` runtime
//! rather than the teacher's no_std-compatible `AtomicWaker`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Default)]
struct Inner {
    count: AtomicUsize,
    idle: Notify,
}

/// Tracks in-flight work so shutdown can wait for it to drain even though
/// the tasks themselves are fire-and-forget `tokio::spawn`s.
#[derive(Clone, Default)]
pub struct WaitGroup {
    inner: Arc<Inner>,
}

/// Dropped automatically when the tracked task finishes or panics, so the
/// count is decremented on every exit path without the task body needing to
/// remember to do it.
pub struct Guard(Arc<Inner>);

impl Drop for Guard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

impl WaitGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one unit of in-flight work; drop the returned guard when it
    /// completes.
    pub fn track(&self) -> Guard {
        self.inner.count.fetch_add(1, Ordering::AcqRel);
        Guard(Arc::clone(&self.inner))
    }

    pub fn in_flight(&self) -> usize {
        self.inner.count.load(Ordering::Acquire)
    }

    /// Waits until the in-flight count reaches zero, or `timeout` elapses,
    /// whichever comes first.
    pub async fn wait_for_idle(&self, timeout: std::time::Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Subscribe before checking the count: otherwise a notify fired
            // between the check and the `await` below would be missed.
            let notified = self.inner.idle.notified();
            if self.inner.count.load(Ordering::Acquire) == 0 {
                return;
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => return,
            }
        }
    }
}
