//! Event objects flowing through the dispatcher, their wire header, and the
//! bounded queues that hold them.

pub mod header;
pub mod pool;
pub mod queue;

use std::fmt;

pub use header::{CONTROL_DATA_MAX, HEADER_MAGIC, Header, HeaderError, MessageKind};
pub use pool::EventPool;
pub use queue::EventQueue;

use crate::transport::{LinkTarget, Payload};

/// Slot id of one logical link, in `[0, max_links)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LinkId(u32);

impl LinkId {
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    pub(crate) const fn as_index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where an event entered the dispatcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    /// Originated on this host; gets a fresh message id at submission.
    Local,
    /// Received from, or on behalf of, the remote side.
    Remote,
}

/// One protocol message, inbound or outbound: the wire header plus an
/// optional owned payload and the link context it travels on.
///
/// Events live in a per-link pool and are recycled rather than allocated;
/// the payload buffer is allocated and released separately.
#[derive(Debug)]
pub struct Event {
    pub header: Header,
    pub payload: Option<Payload>,
    /// The link slot whose pool owns this event.
    pub link_id: LinkId,
    /// Wire destination, stamped when the event is filled for transmission
    /// or received from a running link.
    pub target: Option<LinkTarget>,
    pub origin: Origin,
}

impl Event {
    /// A pooled event that has not been filled yet.
    pub(crate) fn vacant(link_id: LinkId) -> Self {
        Self {
            header: Header::vacant(),
            payload: None,
            link_id,
            target: None,
            origin: Origin::Local,
        }
    }

    /// Fills the event for outbound use: header fields stamped, id left
    /// unassigned, any stale payload discarded.
    pub(crate) fn fill(
        &mut self,
        kind: MessageKind,
        target: LinkTarget,
        channel: header::ChannelId,
        size: u32,
        timeout: header::TimeoutMs,
    ) {
        self.header = Header::new(kind, channel, size, timeout);
        self.payload = None;
        self.target = Some(target);
        self.origin = Origin::Local;
    }

    /// Clears transient state before the event re-enters its pool.
    pub(crate) fn reset(&mut self) {
        self.header = Header::vacant();
        self.payload = None;
        self.target = None;
        self.origin = Origin::Local;
    }
}
