//! One-shot completion used for start/stop handshakes with worker threads.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use minstant::Instant;

/// Single-fire synchronization point.
///
/// The worker calls [`complete`](Self::complete) exactly once (extra calls
/// are harmless); the controller blocks in [`wait`](Self::wait) or
/// [`wait_timeout`](Self::wait_timeout). Used in pairs per worker: one fired
/// when the loop reaches running state, one fired on the way out.
#[derive(Clone, Default)]
pub struct Completion {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    done: Mutex<bool>,
    cond: Condvar,
}

impl Completion {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the completion, waking every current and future waiter.
    pub fn complete(&self) {
        let mut done = self
            .inner
            .done
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *done = true;
        self.inner.cond.notify_all();
    }

    /// Blocks until the completion fires.
    pub fn wait(&self) {
        let mut done = self
            .inner
            .done
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while !*done {
            done = self
                .inner
                .cond
                .wait(done)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Blocks until the completion fires or `timeout` elapses.
    ///
    /// Returns `false` on timeout.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut done = self
            .inner
            .done
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while !*done {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .inner
                .cond
                .wait_timeout(done, deadline.duration_since(now))
                .unwrap_or_else(PoisonError::into_inner);
            done = guard;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_then_wait_returns_immediately() {
        let completion = Completion::new();
        completion.complete();
        completion.wait();
        assert!(completion.wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn wait_timeout_expires_when_never_completed() {
        let completion = Completion::new();
        assert!(!completion.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn wakes_waiter_across_threads() {
        let completion = Completion::new();
        let fired = completion.clone();

        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(5));
            fired.complete();
        });

        assert!(completion.wait_timeout(Duration::from_secs(5)));
        handle.join().unwrap();
    }
}
