//! Per-link receive worker.
//!
//! Responsibilities:
//! - Read fixed-size headers off the transport with the link's configured
//!   timeout, retrying transient failures with the same event.
//! - Validate the header magic; invalid headers are retried silently and
//!   never forwarded or leaked.
//! - Stamp validated events with the link context and hand them to the
//!   multiplexer; delivery failures drop the message and recycle the event.
//! - Observe cancellation between read attempts and complete the start/stop
//!   handshakes with the controller.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::event::header::{Header, TimeoutMs};
use crate::event::{Event, Origin};
use crate::mux::Multiplexer;
use crate::sync::{CancelToken, Completion};
use crate::trace::{debug, info, trace, warn};
use crate::transport::{LinkTarget, Transport, TransportError};

use super::LinkCore;

/// Pause between pool-acquisition retries when every event is in flight.
const POOL_RETRY_DELAY: Duration = Duration::from_millis(1);

/// Receive worker state and event loop.
pub(crate) struct RxThread {
    core: Arc<LinkCore>,
    transport: Arc<dyn Transport>,
    mux: Arc<dyn Multiplexer>,
    target: LinkTarget,
    timeout: TimeoutMs,
    cancel: CancelToken,
    started: Completion,
    stopped: Completion,
}

impl RxThread {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        core: Arc<LinkCore>,
        transport: Arc<dyn Transport>,
        mux: Arc<dyn Multiplexer>,
        target: LinkTarget,
        timeout: TimeoutMs,
        cancel: CancelToken,
        started: Completion,
        stopped: Completion,
    ) -> Self {
        Self {
            core,
            transport,
            mux,
            target,
            timeout,
            cancel,
            started,
            stopped,
        }
    }

    /// Runs the receive loop until cancellation.
    pub(crate) fn run(&mut self) {
        info!(link = %self.core.link_id, target = %self.target, "receive worker running");
        self.started.complete();

        // The event in hand; reused across retries, replaced after a
        // successful delivery.
        let mut slot: Option<Event> = None;

        while !self.cancel.is_cancelled() {
            let Some(event) = slot.take().or_else(|| self.core.pool.acquire()) else {
                // Every event is in flight; wait for the multiplexer to
                // recycle one rather than giving up the loop.
                thread::sleep(POOL_RETRY_DELAY);
                continue;
            };

            slot = self.receive_one(event);
        }

        if let Some(event) = slot.take() {
            self.core.pool.release(event);
        }
        info!(link = %self.core.link_id, "receive worker exiting");
        self.stopped.complete();
    }

    /// Reads and processes one header. Returns the event back when it is
    /// still owned by the loop (transient failure, invalid header, rejected
    /// delivery), or `None` once the multiplexer has taken it.
    fn receive_one(&self, mut event: Event) -> Option<Event> {
        let mut buf = [0u8; Header::WIRE_SIZE];
        let n = match self
            .transport
            .read(self.target, &mut buf, self.timeout, &self.cancel, None)
        {
            Ok(n) => n,
            Err(TransportError::Cancelled) => return Some(event),
            Err(_e) => {
                // Transient: timeouts and bus hiccups retry with the same
                // event.
                trace!(link = %self.core.link_id, error = %_e, "header read failed, retrying");
                return Some(event);
            }
        };
        if n != Header::WIRE_SIZE {
            trace!(link = %self.core.link_id, got = n, "short header read, retrying");
            return Some(event);
        }

        let header = match Header::decode(&buf) {
            Ok(header) => header,
            Err(_e) => {
                warn!(link = %self.core.link_id, error = %_e, "undecodable header, retrying");
                return Some(event);
            }
        };
        if !header.is_valid() {
            // Wrong magic: not our peer's framing; skip without forwarding.
            warn!(link = %self.core.link_id, magic = header.magic, "invalid header magic");
            return Some(event);
        }

        event.header = header;
        event.link_id = self.core.link_id;
        event.target = Some(self.target);
        event.origin = Origin::Remote;
        trace!(
            link = %self.core.link_id,
            id = %header.id,
            chan = %header.channel,
            size = header.size,
            "inbound event"
        );

        match self.mux.deliver_inbound(event) {
            Ok(()) => None,
            Err(rejected) => {
                // Drop-and-continue: the message is lost to the channel but
                // the event goes straight back into rotation.
                debug!(link = %self.core.link_id, "multiplexer rejected inbound event");
                Some(rejected)
            }
        }
    }
}
