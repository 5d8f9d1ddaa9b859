use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

#[derive(Default)]
struct Shared {
    cancelled: AtomicBool,
    wake: Condvar,
    lock: Mutex<()>,
}

/// Stops object scans and `wait_for` loops; clones share one flag, so a
/// Ctrl+C handler can hold its own copy.
///
/// Scans poll it between nodes, never inside a read.
#[derive(Clone, Default)]
pub struct CancelSignal {
    shared: Arc<Shared>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.shared.cancelled.store(true, Ordering::SeqCst);
        // Taking the lock orders the store before any waiter's predicate check
        drop(self.shared.lock.lock().unwrap_or_else(PoisonError::into_inner));
        self.shared.wake.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::SeqCst)
    }

    /// Sleep between retries; `true` when woken by `trigger`
    pub fn wait(&self, delay: Duration) -> bool {
        let guard = self.shared.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (_guard, _) = self
            .shared
            .wake
            .wait_timeout_while(guard, delay, |_| !self.is_cancelled())
            .unwrap_or_else(PoisonError::into_inner);
        self.is_cancelled()
    }
}
