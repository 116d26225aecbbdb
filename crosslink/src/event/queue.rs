//! Bounded FIFO of events shared by concurrent producers and consumers.
//!
//! One queue type serves two roles: the per-link buffer pool (a free list,
//! hard-capped at its fixed pre-allocation) and the pending-work queue of
//! the IPC bridge, which refuses new work above 70% of capacity so the
//! remaining headroom absorbs requeued retries.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use super::Event;

/// Mutex-guarded bounded FIFO. Insertion order is processing order; the
/// lock covers only enqueue/dequeue/count and is never held across a
/// blocking call.
pub struct EventQueue {
    inner: Mutex<VecDeque<Event>>,
    capacity: usize,
}

impl EventQueue {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Hard-capped enqueue.
    ///
    /// # Errors
    /// Hands the event back when the queue is at capacity.
    pub fn push(&self, event: Event) -> Result<(), Event> {
        let mut queue = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if queue.len() >= self.capacity {
            return Err(event);
        }
        queue.push_back(event);
        Ok(())
    }

    /// Soft-capped enqueue for pending work: refuses once the queue holds
    /// 70% of its capacity.
    ///
    /// # Errors
    /// Hands the event back when the soft cap is reached.
    pub fn push_soft(&self, event: Event) -> Result<(), Event> {
        let mut queue = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if queue.len() >= (self.capacity / 10) * 7 {
            return Err(event);
        }
        queue.push_back(event);
        Ok(())
    }

    /// Dequeues the oldest event, `None` when empty.
    #[must_use]
    pub fn pop(&self) -> Option<Event> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    /// Removes and returns every queued event, oldest first.
    #[must_use]
    pub fn drain(&self) -> Vec<Event> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::LinkId;

    fn event() -> Event {
        Event::vacant(LinkId::new(0))
    }

    #[test]
    fn fifo_order_is_preserved() {
        let queue = EventQueue::with_capacity(8);
        for size in [10u32, 20, 30] {
            let mut e = event();
            e.header.size = size;
            queue.push(e).unwrap();
        }

        assert_eq!(queue.pop().unwrap().header.size, 10);
        assert_eq!(queue.pop().unwrap().header.size, 20);
        assert_eq!(queue.pop().unwrap().header.size, 30);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn push_refuses_at_capacity() {
        let queue = EventQueue::with_capacity(2);
        queue.push(event()).unwrap();
        queue.push(event()).unwrap();
        assert!(queue.push(event()).is_err());

        let _ = queue.pop().unwrap();
        queue.push(event()).unwrap();
    }

    #[test]
    fn soft_cap_refuses_above_seventy_percent() {
        // Capacity 10: seven enqueues fit, the eighth crosses the cap.
        let queue = EventQueue::with_capacity(10);
        for _ in 0..7 {
            queue.push_soft(event()).unwrap();
        }
        assert!(queue.push_soft(event()).is_err());

        // Freeing one slot admits the retry.
        let _ = queue.pop().unwrap();
        queue.push_soft(event()).unwrap();
        assert_eq!(queue.len(), 7);
    }

    #[test]
    fn drain_empties_in_order() {
        let queue = EventQueue::with_capacity(4);
        for size in [1u32, 2, 3] {
            let mut e = event();
            e.header.size = size;
            queue.push(e).unwrap();
        }

        let drained = queue.drain();
        assert_eq!(drained.len(), 3);
        assert_eq!(drained[0].header.size, 1);
        assert_eq!(drained[2].header.size, 3);
        assert!(queue.is_empty());
    }
}
