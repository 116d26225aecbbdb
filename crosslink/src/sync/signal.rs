//! Counting signal pairing a pending-work queue with its worker.

use std::sync::{Condvar, Mutex, PoisonError};

/// Outcome of a [`WorkSignal::wait`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalWait {
    /// A permit was consumed; there is work to dequeue.
    Ready,
    /// The signal was closed; the worker should wind down.
    Closed,
}

/// Counting wakeup for a queue-driven worker.
///
/// Each [`notify`](Self::notify) adds one permit; each successful
/// [`wait`](Self::wait) consumes one. Permits accumulate, so notifications
/// sent while the worker is busy are not lost. [`close`](Self::close) wakes
/// every waiter and makes all subsequent waits return
/// [`SignalWait::Closed`], which is how shutdown reaches a worker parked on
/// an empty queue.
#[derive(Default)]
pub struct WorkSignal {
    state: Mutex<State>,
    cond: Condvar,
}

#[derive(Default)]
struct State {
    permits: u32,
    closed: bool,
}

impl WorkSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one permit and wakes a parked waiter.
    pub fn notify(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.permits = state.permits.saturating_add(1);
        self.cond.notify_one();
    }

    /// Blocks until a permit is available or the signal is closed.
    pub fn wait(&self) -> SignalWait {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if state.closed {
                return SignalWait::Closed;
            }
            if state.permits > 0 {
                state.permits -= 1;
                return SignalWait::Ready;
            }
            state = self
                .cond
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Closes the signal, waking every waiter. One-way.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.closed = true;
        self.cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn notify_then_wait_consumes_a_permit() {
        let signal = WorkSignal::new();
        signal.notify();
        assert_eq!(signal.wait(), SignalWait::Ready);
    }

    #[test]
    fn permits_accumulate() {
        let signal = WorkSignal::new();
        signal.notify();
        signal.notify();
        signal.notify();
        assert_eq!(signal.wait(), SignalWait::Ready);
        assert_eq!(signal.wait(), SignalWait::Ready);
        assert_eq!(signal.wait(), SignalWait::Ready);
    }

    #[test]
    fn close_wakes_a_parked_waiter() {
        let signal = Arc::new(WorkSignal::new());
        let waiter = Arc::clone(&signal);

        let handle = std::thread::spawn(move || waiter.wait());

        std::thread::sleep(std::time::Duration::from_millis(5));
        signal.close();
        assert_eq!(handle.join().unwrap(), SignalWait::Closed);
    }

    #[test]
    fn closed_signal_ignores_remaining_permits() {
        let signal = WorkSignal::new();
        signal.notify();
        signal.close();
        assert_eq!(signal.wait(), SignalWait::Closed);
    }
}
