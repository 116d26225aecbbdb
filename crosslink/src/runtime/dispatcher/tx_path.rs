//! Synchronous transmit path.
//!
//! One event is serialized at a time on the submitter's thread, under the
//! per-link submission mutex taken by [`DispatcherSystem::submit`]. That
//! mutex is the entire ordering story: header and payload writes of one
//! message stay adjacent on the wire, and concurrent submitters observe a
//! total order.
//!
//! [`DispatcherSystem::submit`]: super::DispatcherSystem::submit

use std::sync::atomic::{AtomicBool, Ordering};

use crate::event::header::{CONTROL_DATA_MAX, Header, MessageKind};
use crate::event::Event;
use crate::trace::{error, trace};
use crate::transport::{release_payload, Payload, Transport, TransportError};

use super::DispatchError;

/// Serializes `event` to the wire: fixed header (extended inline for
/// control writes), then the payload for payload-bearing kinds.
///
/// The payload buffer is released through the transport whatever the write
/// outcome; the event object itself stays with the caller, which recycles
/// it to its pool.
pub(crate) fn send_event(
    transport: &dyn Transport,
    error_logged: &AtomicBool,
    event: &mut Event,
) -> Result<(), DispatchError> {
    let target = event
        .target
        .ok_or(DispatchError::InvalidArgument("event has no resolved target"))?;
    let header = event.header;

    let mut wire = [0u8; Header::MAX_WIRE_SIZE];
    header.encode(&mut wire);
    let mut wire_len = Header::WIRE_SIZE;

    // Control writes carry their payload inline in the reserved region.
    if header.kind == MessageKind::WriteControl {
        let inline = header.size as usize;
        let data = event.payload.as_ref().map_or(&[][..], Payload::bytes);
        if inline > CONTROL_DATA_MAX || inline > data.len() {
            return Err(DispatchError::InvalidArgument(
                "control data exceeds the reserved header region",
            ));
        }
        wire[wire_len..wire_len + inline].copy_from_slice(&data[..inline]);
        wire_len += inline;
    }

    trace!(
        target_link = %target,
        id = %header.id,
        chan = %header.channel,
        size = header.size,
        "sending header"
    );
    match transport.write(target, &wire[..wire_len], header.timeout, None) {
        Ok(written) if written == wire_len => {}
        Ok(written) => {
            log_once(error_logged, "short header write");
            return Err(TransportError::ShortTransfer {
                want: wire_len,
                got: written,
            }
            .into());
        }
        Err(e) => {
            log_once(error_logged, "header write failed");
            return Err(DispatchError::Transport(e));
        }
    }

    if !header.kind.carries_payload() {
        return Ok(());
    }

    error_logged.store(false, Ordering::Relaxed);
    let payload = event
        .payload
        .take()
        .ok_or(DispatchError::InvalidArgument("write event without payload"))?;
    let want = header.size as usize;
    if want > payload.len() {
        release_payload(transport, payload);
        return Err(DispatchError::InvalidArgument(
            "header size exceeds payload length",
        ));
    }

    let result = transport.write(target, &payload.bytes()[..want], header.timeout, None);
    // The payload has left the event either way; give it back to its owner.
    release_payload(transport, payload);

    match result {
        Ok(written) if written == want => Ok(()),
        Ok(written) => {
            error!(target_link = %target, want, got = written, "short payload write");
            Err(TransportError::ShortTransfer {
                want,
                got: written,
            }
            .into())
        }
        Err(e) => {
            error!(target_link = %target, error = %e, "payload write failed");
            Err(DispatchError::Transport(e))
        }
    }
}

/// Reports one failure and suppresses repeats until a successful payload
/// write clears the flag.
fn log_once(error_logged: &AtomicBool, _what: &'static str) {
    if !error_logged.swap(true, Ordering::Relaxed) {
        error!("{}", _what);
    }
}
