//! Fixed free list of pre-allocated events.
//!
//! Each link owns one pool, populated with vacant events at system
//! initialization so the steady-state transmit and receive paths never
//! allocate an event object. Acquire and release move owned values: an
//! event is either in the pool, held by a worker, or in flight through the
//! multiplexer, never two of those at once.

use super::{Event, EventQueue, LinkId};

/// Free list of vacant events for one link.
pub struct EventPool {
    free: EventQueue,
}

impl EventPool {
    /// Pre-populates `capacity` vacant events owned by `link_id`. The
    /// capacity is fixed for the pool's lifetime.
    #[must_use]
    pub fn new(link_id: LinkId, capacity: usize) -> Self {
        let free = EventQueue::with_capacity(capacity);
        for _ in 0..capacity {
            // Cannot overflow: we push exactly `capacity` events.
            let _ = free.push(Event::vacant(link_id));
        }
        Self { free }
    }

    /// Draws one event from the free list, `None` when exhausted.
    #[must_use]
    pub fn acquire(&self) -> Option<Event> {
        self.free.pop()
    }

    /// Returns an event to the free list, clearing its transient fields.
    pub fn release(&self, mut event: Event) {
        event.reset();
        // Bounded by the fixed pre-allocation; release cannot overfill.
        let _ = self.free.push(event);
    }

    /// Events currently available for acquisition.
    #[must_use]
    pub fn available(&self) -> usize {
        self.free.len()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.free.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_drains_to_exhaustion() {
        let pool = EventPool::new(LinkId::new(2), 4);
        assert_eq!(pool.available(), 4);

        let held: Vec<Event> = (0..4).map(|_| pool.acquire().unwrap()).collect();
        assert!(pool.acquire().is_none());
        assert_eq!(pool.available(), 0);

        for event in held {
            assert_eq!(event.link_id, LinkId::new(2));
            pool.release(event);
        }
        assert_eq!(pool.available(), 4);
    }

    #[test]
    fn release_restores_the_count() {
        let pool = EventPool::new(LinkId::new(0), 8);
        let before = pool.available();

        let event = pool.acquire().unwrap();
        assert_eq!(pool.available(), before - 1);

        pool.release(event);
        assert_eq!(pool.available(), before);
    }

    #[test]
    fn release_clears_transient_state() {
        let pool = EventPool::new(LinkId::new(0), 1);
        let mut event = pool.acquire().unwrap();
        event.header.size = 128;
        event.header.magic = 0xdead_beef;
        pool.release(event);

        let recycled = pool.acquire().unwrap();
        assert_eq!(recycled.header.size, 0);
        assert!(!recycled.header.is_valid());
        assert!(recycled.payload.is_none());
    }
}
