// logtrail - limiter.rs
//
// Process-wide bounded token pool. Any component about to perform a blocking
// I/O syscall acquires a permit first and releases it on completion, so
// aggregate file-descriptor/syscall pressure stays bounded when many sources
// run at once. Hand-rolled over Mutex+Condvar, the same primitives-over-
// dependency approach as the cancellation token: a bounded counting
// semaphore needs nothing more.

use std::sync::{Arc, Condvar, Mutex};

struct State {
    available: usize,
}

/// A shared, cloneable handle to a bounded pool of work tokens.
#[derive(Clone)]
pub struct WorkLimiter {
    inner: Arc<(Mutex<State>, Condvar)>,
}

impl WorkLimiter {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new((
                Mutex::new(State {
                    available: capacity,
                }),
                Condvar::new(),
            )),
        }
    }

    /// Block until a token is available, then return a guard that releases
    /// it on drop.
    pub fn acquire(&self) -> WorkPermit {
        let (lock, cvar) = &*self.inner;
        let mut state = lock.lock().unwrap();
        while state.available == 0 {
            state = cvar.wait(state).unwrap();
        }
        state.available -= 1;
        WorkPermit {
            inner: self.inner.clone(),
        }
    }
}

/// RAII guard for one acquired token; dropping it returns the token to the
/// pool and wakes one waiter.
pub struct WorkPermit {
    inner: Arc<(Mutex<State>, Condvar)>,
}

impl Drop for WorkPermit {
    fn drop(&mut self) {
        let (lock, cvar) = &*self.inner;
        let mut state = lock.lock().unwrap();
        state.available += 1;
        cvar.notify_one();
    }
}
