//! Per-link dispatch: the lifecycle state machine, event submission, and
//! the system object owning every link slot.
//!
//! # Architecture
//!
//! Each started link runs one **receive worker** that reads headers off the
//! wire, validates them, and hands good events to the multiplexer. Outbound
//! traffic is serialized **synchronously on the submitter's thread** under a
//! per-link submission mutex, which is what guarantees at most one in-flight
//! wire write per link and a total order among concurrent submitters. A
//! singleton **IPC passthrough bridge** worker, started lazily with the
//! first link, proxies host-local IPC read requests over an active link.
//!
//! The [`DispatcherSystem`] is constructed explicitly with its collaborators
//! (transport, multiplexer, optional buffer registry) and owns a fixed array
//! of dispatcher slots; there is no module-global state beyond the outbound
//! message-id counter.

pub mod ipc_thread;
pub mod rx_thread;
mod tx_path;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;

use crate::event::header::{ChannelId, MessageId, MessageKind, TimeoutMs};
use crate::event::{Event, EventPool, EventQueue, LinkId, Origin};
use crate::mux::{BufferRegistry, Multiplexer};
use crate::sync::{CancelToken, Completion, WorkSignal};
use crate::trace::{debug, error, info};
use crate::transport::{self, DeviceId, LinkTarget, Transport, TransportError};

use ipc_thread::IpcThread;
use rx_thread::RxThread;

/// Link slots a system owns by default.
pub const DEFAULT_MAX_LINKS: usize = 16;

/// Events pre-allocated per link pool by default.
pub const DEFAULT_POOL_CAPACITY: usize = 1024;

/// Default capacity of the bridge's pending-work queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// How long `stop_link` waits for a worker's exit handshake before the
/// dispatcher is declared lost.
const WORKER_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Configuration for a dispatcher system.
pub struct SystemConfig {
    /// Number of link slots, i.e. valid link ids are `[0, max_links)`.
    pub max_links: usize,
    /// Events pre-allocated per link pool.
    pub pool_capacity: usize,
    /// Capacity of the IPC bridge's pending-work queue.
    pub queue_capacity: usize,
    /// Timeout handed to blocking receive reads. [`TimeoutMs::BLOCKING`]
    /// waits until traffic arrives or the worker is cancelled.
    pub rx_timeout: TimeoutMs,
    /// Whether this host exposes local IPC and runs the passthrough bridge.
    pub local_ipc: bool,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            max_links: DEFAULT_MAX_LINKS,
            pool_capacity: DEFAULT_POOL_CAPACITY,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            rx_timeout: TimeoutMs::BLOCKING,
            local_ipc: false,
        }
    }
}

/// Lifecycle of one link's dispatcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    /// Initialized but never started: pool populated, no worker.
    Init,
    /// Worker running, link servicing traffic.
    Running,
    /// Worker torn down cleanly; the link may be started again.
    Stopped,
    /// A worker failed to honor termination. Restart is forbidden; the
    /// dispatcher can only be destroyed.
    Error,
}

/// Errors surfaced by the dispatch entry points.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown link id {0}")]
    UnknownLink(LinkId),
    #[error("link {link} is {state:?}")]
    WrongState { link: LinkId, state: LinkState },
    #[error("ipc bridge is not running")]
    BridgeDown,
    #[error("ipc bridge worker failed to stop")]
    BridgeStuck,
    #[error("pending queue full")]
    QueueFull,
    #[error("event pool exhausted on link {0}")]
    Exhausted(LinkId),
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("worker failed to stop on link {0}")]
    WorkerStuck(LinkId),
    #[error("failed to spawn worker: {0}")]
    Spawn(std::io::Error),
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
}

/// Process-wide outbound id counter. Ids correlate in-flight requests with
/// responses, so uniqueness is only needed at that horizon; 32-bit
/// wraparound is deliberate.
static NEXT_MESSAGE_ID: AtomicU32 = AtomicU32::new(0xa);

fn next_message_id() -> MessageId {
    MessageId::new(NEXT_MESSAGE_ID.fetch_add(1, Ordering::Relaxed))
}

/// State a link's workers share with the controller side.
struct LinkCore {
    link_id: LinkId,
    pool: EventPool,
}

/// State the bridge worker shares with the controller side.
struct BridgeCore {
    pending: EventQueue,
    signal: WorkSignal,
}

/// Controller-side worker supervision for one dispatcher.
struct Lifecycle {
    state: LinkState,
    target: Option<LinkTarget>,
    cancel: CancelToken,
    worker: Option<JoinHandle<()>>,
    stopped: Completion,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            state: LinkState::Init,
            target: None,
            cancel: CancelToken::new(),
            worker: None,
            stopped: Completion::new(),
        }
    }
}

/// One per link slot: the link's pool, lifecycle, and submission mutex.
struct Dispatcher {
    core: Arc<LinkCore>,
    lifecycle: Mutex<Lifecycle>,
    /// Serializes synchronous sends: at most one in-flight wire write per
    /// link. Held across the whole header+payload sequence, which can block
    /// on transport I/O.
    submit_lock: Mutex<()>,
    /// Set after the first unreported write failure, cleared on the next
    /// successful payload write.
    write_error_logged: AtomicBool,
}

impl Dispatcher {
    fn new(link_id: LinkId, pool_capacity: usize) -> Self {
        Self {
            core: Arc::new(LinkCore {
                link_id,
                pool: EventPool::new(link_id, pool_capacity),
            }),
            lifecycle: Mutex::new(Lifecycle::new()),
            submit_lock: Mutex::new(()),
            write_error_logged: AtomicBool::new(false),
        }
    }
}

/// The singleton IPC passthrough dispatcher: same lifecycle shape, but
/// queue-driven and not slot-indexed.
struct IpcBridge {
    core: Arc<BridgeCore>,
    lifecycle: Mutex<Lifecycle>,
}

impl IpcBridge {
    fn new(queue_capacity: usize) -> Self {
        Self {
            core: Arc::new(BridgeCore {
                pending: EventQueue::with_capacity(queue_capacity),
                signal: WorkSignal::new(),
            }),
            lifecycle: Mutex::new(Lifecycle::new()),
        }
    }
}

/// The transport dispatcher system: a fixed array of per-link dispatchers,
/// the IPC bridge, and the injected collaborators.
///
/// Construct once per device context, start links as they come up, and call
/// [`shutdown`](Self::shutdown) before dropping the last handle so worker
/// threads are joined and queued events are drained.
pub struct DispatcherSystem {
    links: Vec<Dispatcher>,
    ipc: IpcBridge,
    transport: Arc<dyn Transport>,
    mux: Arc<dyn Multiplexer>,
    registry: Option<Arc<dyn BufferRegistry>>,
    /// Serializes the start/stop control path across links; never touched
    /// on the data path.
    start_lock: Mutex<()>,
    config: SystemConfig,
    /// Handed to the bridge worker so it does not keep the system alive.
    weak_self: Weak<Self>,
}

impl DispatcherSystem {
    /// Builds the system: every link slot in [`LinkState::Init`] with a
    /// fully populated pool, no workers running.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        mux: Arc<dyn Multiplexer>,
        registry: Option<Arc<dyn BufferRegistry>>,
        config: SystemConfig,
    ) -> Arc<Self> {
        let links = (0..config.max_links)
            .map(|slot| Dispatcher::new(LinkId::new(slot as u32), config.pool_capacity))
            .collect();
        Arc::new_cyclic(|weak_self| Self {
            links,
            ipc: IpcBridge::new(config.queue_capacity),
            transport,
            mux,
            registry,
            start_lock: Mutex::new(()),
            config,
            weak_self: weak_self.clone(),
        })
    }

    fn link(&self, link_id: LinkId) -> Result<&Dispatcher, DispatchError> {
        self.links
            .get(link_id.as_index())
            .ok_or(DispatchError::UnknownLink(link_id))
    }

    /// Draws an event from `link_id`'s pool and fills its header.
    ///
    /// # Errors
    /// Fails for unknown link ids, device ids with no interface encoding,
    /// or an exhausted pool.
    pub fn create_event(
        &self,
        link_id: LinkId,
        kind: MessageKind,
        device: DeviceId,
        channel: ChannelId,
        size: u32,
        timeout: TimeoutMs,
    ) -> Result<Event, DispatchError> {
        let disp = self.link(link_id)?;
        let target = LinkTarget::resolve(device).ok_or(DispatchError::InvalidArgument(
            "device id encodes no interface",
        ))?;
        let mut event = disp
            .core
            .pool
            .acquire()
            .ok_or(DispatchError::Exhausted(link_id))?;
        event.fill(kind, target, channel, size, timeout);
        Ok(event)
    }

    /// Returns an event to its owning pool, releasing any payload memory
    /// through the transport. Events whose link id no longer resolves are
    /// dropped outright.
    pub fn destroy_event(&self, mut event: Event) {
        if let Some(payload) = event.payload.take() {
            transport::release_payload(self.transport.as_ref(), payload);
        }
        if let Ok(disp) = self.link(event.link_id) {
            disp.core.pool.release(event);
        }
    }

    /// Starts servicing `link_id` against `device`.
    ///
    /// Allowed from [`LinkState::Init`] and [`LinkState::Stopped`]. Spawns
    /// the receive worker and blocks until it signals running. The first
    /// successful start also brings up the IPC passthrough bridge when the
    /// system is configured with `local_ipc`.
    ///
    /// # Errors
    /// Fails for unknown links, wrong lifecycle states, unresolvable device
    /// ids, or a worker that cannot be spawned (the link is left
    /// [`LinkState::Stopped`]).
    pub fn start_link(&self, link_id: LinkId, device: DeviceId) -> Result<(), DispatchError> {
        let _start = self
            .start_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let disp = self.link(link_id)?;
        let mut lc = disp
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match lc.state {
            LinkState::Init | LinkState::Stopped => {}
            state => return Err(DispatchError::WrongState { link: link_id, state }),
        }

        let target = LinkTarget::resolve(device).ok_or(DispatchError::InvalidArgument(
            "device id encodes no interface",
        ))?;
        lc.target = Some(target);
        lc.cancel = CancelToken::new();
        lc.stopped = Completion::new();

        let started = Completion::new();
        let rx = RxThread::new(
            Arc::clone(&disp.core),
            Arc::clone(&self.transport),
            Arc::clone(&self.mux),
            target,
            self.config.rx_timeout,
            lc.cancel.clone(),
            started.clone(),
            lc.stopped.clone(),
        );
        let handle = thread::Builder::new()
            .name(format!("crosslink-rx-{link_id}"))
            .spawn(move || {
                let mut rx = rx;
                rx.run();
            });
        match handle {
            Ok(handle) => lc.worker = Some(handle),
            Err(e) => {
                error!(link = %link_id, error = %e, "receive worker spawn failed");
                lc.state = LinkState::Stopped;
                return Err(DispatchError::Spawn(e));
            }
        }
        started.wait();
        lc.state = LinkState::Running;
        drop(lc);
        info!(link = %link_id, target = %target, "link started");

        if self.config.local_ipc {
            self.start_ipc_bridge(link_id);
        }
        Ok(())
    }

    /// Lazily starts the passthrough bridge once. A spawn failure is logged
    /// and retried on the next link start.
    fn start_ipc_bridge(&self, pool_link: LinkId) {
        let mut lc = self
            .ipc
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if lc.state == LinkState::Running {
            return;
        }

        lc.cancel = CancelToken::new();
        lc.stopped = Completion::new();
        let started = Completion::new();
        let worker = IpcThread::new(
            self.weak_self.clone(),
            Arc::clone(&self.ipc.core),
            pool_link,
            lc.cancel.clone(),
            started.clone(),
            lc.stopped.clone(),
        );
        let handle = thread::Builder::new()
            .name("crosslink-ipc".into())
            .spawn(move || {
                let mut worker = worker;
                worker.run();
            });
        match handle {
            Ok(handle) => {
                lc.worker = Some(handle);
                lc.state = LinkState::Running;
                drop(lc);
                started.wait();
                info!(pool_link = %pool_link, "ipc passthrough bridge started");
            }
            Err(_e) => {
                error!(error = %_e, "ipc bridge spawn failed; will retry on next link start");
            }
        }
    }

    /// Submits an outbound event for synchronous transmission.
    ///
    /// Locally originated events are assigned a message id. The event is
    /// serialized under the link's submission mutex and always recycled to
    /// its pool afterwards, whatever the wire outcome.
    ///
    /// # Errors
    /// Fails for unknown links, links that are not running, or transport
    /// write failures (surfaced to the caller's retry policy; no retry
    /// happens here).
    pub fn submit(&self, origin: Origin, mut event: Event) -> Result<(), DispatchError> {
        let disp = self.link(event.link_id)?;
        {
            let lc = disp
                .lifecycle
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if lc.state != LinkState::Running {
                let state = lc.state;
                drop(lc);
                let link = event.link_id;
                self.destroy_event(event);
                return Err(DispatchError::WrongState { link, state });
            }
        }

        if origin == Origin::Local {
            event.header.id = next_message_id();
        }
        event.origin = origin;

        let result = {
            let _wire = disp
                .submit_lock
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            tx_path::send_event(
                self.transport.as_ref(),
                &disp.write_error_logged,
                &mut event,
            )
        };
        self.destroy_event(event);
        result
    }

    /// Accepts a passthrough request for the bridge worker.
    ///
    /// # Errors
    /// Fails when the bridge is not running or the pending queue is above
    /// its soft cap; a refused event is recycled to its pool.
    pub fn ipc_passthrough_submit(&self, event: Event) -> Result<(), DispatchError> {
        {
            let lc = self
                .ipc
                .lifecycle
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if lc.state != LinkState::Running {
                self.destroy_event(event);
                return Err(DispatchError::BridgeDown);
            }
        }
        match self.ipc.core.pending.push_soft(event) {
            Ok(()) => {
                self.ipc.core.signal.notify();
                Ok(())
            }
            Err(event) => {
                self.destroy_event(event);
                Err(DispatchError::QueueFull)
            }
        }
    }

    /// Stops servicing `link_id`.
    ///
    /// Allowed from [`LinkState::Running`] only. Cancels the receive worker
    /// and waits for its exit handshake.
    ///
    /// # Errors
    /// A worker that misses the handshake window forces the dispatcher into
    /// [`LinkState::Error`], from which it cannot be restarted.
    pub fn stop_link(&self, link_id: LinkId) -> Result<(), DispatchError> {
        let _start = self
            .start_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let disp = self.link(link_id)?;
        let mut lc = disp
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if lc.state != LinkState::Running {
            return Err(DispatchError::WrongState {
                link: link_id,
                state: lc.state,
            });
        }

        lc.cancel.cancel();
        if !lc.stopped.wait_timeout(WORKER_STOP_TIMEOUT) {
            error!(link = %link_id, "receive worker missed its exit handshake");
            lc.state = LinkState::Error;
            return Err(DispatchError::WorkerStuck(link_id));
        }
        if let Some(handle) = lc.worker.take() {
            let _ = handle.join();
        }
        lc.state = LinkState::Stopped;
        info!(link = %link_id, "link stopped");
        Ok(())
    }

    /// Tears the whole system down: stops the bridge, stops every running
    /// link, and drains the pending-work queue, releasing payload memory of
    /// anything still queued. Safe to call from any per-link state; links
    /// in [`LinkState::Error`] are skipped best-effort.
    ///
    /// # Errors
    /// Returns the first worker-shutdown failure encountered, after
    /// completing the rest of the teardown.
    pub fn shutdown(&self) -> Result<(), DispatchError> {
        debug!("dispatcher system shutdown initiated");
        let mut result = Ok(());

        if self.stop_bridge().is_err() && result.is_ok() {
            result = Err(DispatchError::BridgeStuck);
        }

        for slot in 0..self.links.len() {
            let link_id = LinkId::new(slot as u32);
            let running = {
                let lc = self.links[slot]
                    .lifecycle
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                lc.state == LinkState::Running
            };
            if running {
                if let Err(e) = self.stop_link(link_id) {
                    error!(link = %link_id, error = %e, "link failed to stop during shutdown");
                    if result.is_ok() {
                        result = Err(e);
                    }
                }
            }
        }

        // Anything still pending goes back through the release path so
        // payload memory is returned to the transport.
        for event in self.ipc.core.pending.drain() {
            self.destroy_event(event);
        }
        info!("dispatcher system shutdown complete");
        result
    }

    fn stop_bridge(&self) -> Result<(), ()> {
        let mut lc = self
            .ipc
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if lc.state != LinkState::Running {
            return Ok(());
        }
        lc.cancel.cancel();
        self.ipc.core.signal.close();
        if !lc.stopped.wait_timeout(WORKER_STOP_TIMEOUT) {
            error!("ipc bridge missed its exit handshake");
            lc.state = LinkState::Error;
            return Err(());
        }
        if let Some(handle) = lc.worker.take() {
            let _ = handle.join();
        }
        lc.state = LinkState::Stopped;
        Ok(())
    }

    /// Lifecycle state of one link slot.
    ///
    /// # Errors
    /// Fails for unknown link ids.
    pub fn link_state(&self, link_id: LinkId) -> Result<LinkState, DispatchError> {
        let disp = self.link(link_id)?;
        let lc = disp
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(lc.state)
    }
}

impl Drop for DispatcherSystem {
    fn drop(&mut self) {
        // Best-effort: signal every worker without joining. Normal teardown
        // goes through shutdown().
        for disp in &self.links {
            let lc = disp
                .lifecycle
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            lc.cancel.cancel();
        }
        let lc = self
            .ipc
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        lc.cancel.cancel();
        self.ipc.core.signal.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_ids_increase() {
        let a = next_message_id();
        let b = next_message_id();
        assert!(b.as_u32() > a.as_u32() || b.as_u32() < 0xa); // wrap tolerated
        assert_ne!(a, b);
    }

    #[test]
    fn config_defaults_are_sane() {
        let config = SystemConfig::default();
        assert_eq!(config.max_links, DEFAULT_MAX_LINKS);
        assert_eq!(config.pool_capacity, DEFAULT_POOL_CAPACITY);
        assert!(config.rx_timeout.is_blocking());
        assert!(!config.local_ipc);
    }
}
