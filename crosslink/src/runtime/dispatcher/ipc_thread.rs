//! IPC passthrough bridge worker.
//!
//! A single worker, started lazily with the first link, proxies host-local
//! IPC read requests over an established link so a process without direct
//! device access can still move data. Two request shapes:
//!
//! - **Buffered read**: copy whatever the IPC channel holds into a scratch
//!   buffer and send it back to the remote as a write event.
//! - **Direct read**: the IPC channel yields a physical-address key; claim
//!   the pre-registered buffer behind it and forward that as a write event.
//!
//! An IPC channel with nothing to read is the one case handled by retrying:
//! the request goes to the back of the pending queue instead of failing.

use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use crate::event::header::{MessageKind, TimeoutMs};
use crate::event::{Event, LinkId, Origin};
use crate::sync::{CancelToken, Completion, SignalWait};
use crate::trace::{debug, info, trace, warn};
use crate::transport::{
    InterfaceKind, IpcContext, LinkTarget, MemoryClass, PACKET_ALIGNMENT, PhysAddr,
    release_payload,
};

use super::{BridgeCore, DispatcherSystem};

/// Largest buffered passthrough transfer.
pub const MAX_PASSTHRU_BUF: usize = 16 * 1024;

/// Pause before a no-data requeue so an idle channel does not spin the
/// worker.
const REQUEUE_DELAY: Duration = Duration::from_millis(1);

/// Bridge worker state and event loop.
pub(crate) struct IpcThread {
    system: Weak<DispatcherSystem>,
    core: Arc<BridgeCore>,
    /// Link whose pool backs synthesized response events.
    pool_link: LinkId,
    cancel: CancelToken,
    started: Completion,
    stopped: Completion,
}

impl IpcThread {
    pub(crate) fn new(
        system: Weak<DispatcherSystem>,
        core: Arc<BridgeCore>,
        pool_link: LinkId,
        cancel: CancelToken,
        started: Completion,
        stopped: Completion,
    ) -> Self {
        Self {
            system,
            core,
            pool_link,
            cancel,
            started,
            stopped,
        }
    }

    /// Runs the bridge loop until the signal closes or the system goes
    /// away.
    pub(crate) fn run(&mut self) {
        info!(pool_link = %self.pool_link, "ipc bridge worker running");
        self.started.complete();

        loop {
            if self.core.signal.wait() == SignalWait::Closed || self.cancel.is_cancelled() {
                break;
            }
            let Some(event) = self.core.pending.pop() else {
                continue;
            };
            let Some(system) = self.system.upgrade() else {
                break;
            };
            self.service(&system, event);
        }

        info!("ipc bridge worker exiting");
        self.stopped.complete();
    }

    fn service(&self, system: &Arc<DispatcherSystem>, event: Event) {
        match event.header.kind {
            MessageKind::PassthruReadToBuffer => self.buffered_read(system, event),
            MessageKind::PassthruRead => self.direct_read(system, event),
            _kind => {
                warn!(kind = ?_kind, "unexpected request kind on the bridge queue");
                system.destroy_event(event);
            }
        }
    }

    /// Copies channel data into a scratch buffer and ships it back as a
    /// write event.
    fn buffered_read(&self, system: &Arc<DispatcherSystem>, event: Event) {
        let Some(target) = event.target else {
            warn!("bridge request without a resolved target");
            system.destroy_event(event);
            return;
        };
        let ipc = IpcContext {
            channel: event.header.channel,
            volatile: true,
        };
        let ipc_target = LinkTarget::new(target.device, InterfaceKind::Ipc);

        let mut scratch = match system.transport.allocate(
            MAX_PASSTHRU_BUF,
            PACKET_ALIGNMENT,
            MemoryClass::Normal,
        ) {
            Ok(scratch) => scratch,
            Err(_e) => {
                warn!(error = %_e, "scratch allocation failed, requeueing request");
                self.requeue(system, event);
                return;
            }
        };
        let read = system.transport.read(
            ipc_target,
            scratch.bytes_mut(),
            TimeoutMs::BLOCKING,
            &self.cancel,
            Some(ipc),
        );
        let n = match read {
            Ok(n) => n,
            Err(_e) => {
                trace!(chan = %ipc.channel, error = %_e, "no channel data, requeueing request");
                release_payload(system.transport.as_ref(), scratch);
                self.requeue(system, event);
                return;
            }
        };

        match system.create_event(
            self.pool_link,
            MessageKind::Write,
            target.device,
            event.header.channel,
            n as u32,
            event.header.timeout,
        ) {
            Ok(mut response) => {
                response.payload = Some(scratch);
                if let Err(_e) = system.submit(Origin::Remote, response) {
                    warn!(chan = %ipc.channel, error = %_e, "passthrough response submit failed");
                }
                system.destroy_event(event);
            }
            Err(_e) => {
                // Pool pressure: hold the request and retry once events
                // free up.
                debug!(error = %_e, "no response event available, requeueing request");
                release_payload(system.transport.as_ref(), scratch);
                self.requeue(system, event);
            }
        }
    }

    /// Resolves a registered buffer by the key read from the channel and
    /// forwards it as a write event.
    fn direct_read(&self, system: &Arc<DispatcherSystem>, event: Event) {
        let Some(target) = event.target else {
            warn!("bridge request without a resolved target");
            system.destroy_event(event);
            return;
        };
        let ipc = IpcContext {
            channel: event.header.channel,
            volatile: false,
        };
        let ipc_target = LinkTarget::new(target.device, InterfaceKind::Ipc);

        let mut key = [0u8; 8];
        let read = system.transport.read(
            ipc_target,
            &mut key,
            TimeoutMs::BLOCKING,
            &self.cancel,
            Some(ipc),
        );
        match read {
            Ok(n) if n == key.len() => {}
            Ok(_short) => {
                trace!(chan = %ipc.channel, got = _short, "short key read, requeueing request");
                self.requeue(system, event);
                return;
            }
            Err(_e) => {
                trace!(chan = %ipc.channel, error = %_e, "no channel data, requeueing request");
                self.requeue(system, event);
                return;
            }
        }
        let paddr = PhysAddr::new(u64::from_le_bytes(key));

        let Some(payload) = system
            .registry
            .as_ref()
            .and_then(|registry| registry.claim(paddr))
        else {
            // Unknown key: nothing to forward, the request is spent.
            warn!(paddr = %paddr, "no registered buffer for key");
            system.destroy_event(event);
            return;
        };

        match system.create_event(
            self.pool_link,
            MessageKind::Write,
            target.device,
            event.header.channel,
            payload.len() as u32,
            event.header.timeout,
        ) {
            Ok(mut response) => {
                response.payload = Some(payload);
                if let Err(_e) = system.submit(Origin::Remote, response) {
                    warn!(paddr = %paddr, error = %_e, "passthrough response submit failed");
                }
                system.destroy_event(event);
            }
            Err(_e) => {
                // The claim is already spent; return the buffer to the
                // transport and drop the request.
                debug!(error = %_e, "no response event available, releasing claimed buffer");
                release_payload(system.transport.as_ref(), payload);
                system.destroy_event(event);
            }
        }
    }

    /// Puts a not-yet-serviceable request at the back of the queue.
    fn requeue(&self, system: &Arc<DispatcherSystem>, event: Event) {
        thread::sleep(REQUEUE_DELAY);
        match self.core.pending.push_soft(event) {
            Ok(()) => self.core.signal.notify(),
            Err(event) => {
                warn!("pending queue refused a requeue; dropping the request");
                system.destroy_event(event);
            }
        }
    }
}
