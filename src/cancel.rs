// logtrail - cancel.rs
//
// Cooperative cancellation shared by the watcher, tail engine, and pipeline
// threads. A thin wrapper over Arc<AtomicBool> plus a Condvar: the flag
// alone is enough to notice cancellation on the next poll, but the condvar
// lets a thread blocked in `await_exists` or a heartbeat sleep wake the
// instant cancellation fires, rather than at the next fixed poll tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

struct Inner {
    flag: AtomicBool,
    mutex: Mutex<()>,
    condvar: Condvar,
}

/// A cloneable handle to one cancellation signal. All clones observe the
/// same underlying flag.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                flag: AtomicBool::new(false),
                mutex: Mutex::new(()),
                condvar: Condvar::new(),
            }),
        }
    }

    /// Fire the signal and wake anyone parked in `sleep` or `wait`.
    pub fn cancel(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        let _guard = self.inner.mutex.lock().unwrap();
        self.inner.condvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Sleep for up to `duration`, waking early if cancelled. Returns
    /// whether cancellation fired during the sleep.
    pub fn sleep(&self, duration: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }
        let guard = self.inner.mutex.lock().unwrap();
        let (_guard, timeout) = self
            .inner
            .condvar
            .wait_timeout_while(guard, duration, |_| !self.is_cancelled())
            .unwrap();
        !timeout.timed_out() || self.is_cancelled()
    }

    /// Block indefinitely until cancelled.
    pub fn wait(&self) {
        if self.is_cancelled() {
            return;
        }
        let mut guard = self.inner.mutex.lock().unwrap();
        while !self.is_cancelled() {
            guard = self.inner.condvar.wait(guard).unwrap();
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
