//! Cooperative cancellation shared between a controller and its workers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cancellation flag observed by worker loops and blocking transport calls.
///
/// Clones are cheap and all observe the same flag. Cancellation is one-way:
/// once set, the token stays cancelled. Workers check the token between loop
/// iterations; blocking transport reads take a reference so they can return
/// promptly instead of waiting out their timeout.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Returns `true` once [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_clear_and_latches() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());

        token.cancel();
        assert!(token.is_cancelled());

        // Still cancelled, and idempotent.
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn clones_share_the_flag() {
        let token = CancelToken::new();
        let seen_by_worker = token.clone();

        let handle = std::thread::spawn(move || {
            while !seen_by_worker.is_cancelled() {
                std::hint::spin_loop();
            }
        });

        token.cancel();
        handle.join().unwrap();
    }
}
