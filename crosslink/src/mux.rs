//! Routing collaborator interfaces.
//!
//! The dispatcher validates inbound events and hands them to the
//! [`Multiplexer`], which owns channel-level delivery; it never interprets
//! payload semantics itself. [`BufferRegistry`] resolves pre-registered
//! DMA buffers for the IPC passthrough bridge.

use crate::event::Event;
use crate::transport::{Payload, PhysAddr};

/// Delivers validated inbound events to their destination channels.
pub trait Multiplexer: Send + Sync {
    /// Delivers one inbound event.
    ///
    /// # Errors
    /// Hands the event back when the owning channel cannot accept it; the
    /// receive worker then decides its disposition.
    fn deliver_inbound(&self, event: Event) -> Result<(), Event>;
}

/// Registry of caller-registered DMA buffers, keyed by physical address.
pub trait BufferRegistry: Send + Sync {
    /// Claims a registered buffer, removing its registration. `None` for
    /// unknown keys.
    fn claim(&self, paddr: PhysAddr) -> Option<Payload>;
}
