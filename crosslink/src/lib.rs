//! Transport dispatcher bridging a host to remote compute devices over
//! heterogeneous links (PCIe, USB, on-chip IPC).
//!
//! For each logical link the dispatcher serializes outbound events onto the
//! wire, validates inbound headers and hands them to a routing multiplexer,
//! and proxies host-local IPC read requests through the passthrough bridge.
//! Byte-level I/O and channel-level routing are collaborator traits
//! ([`transport::Transport`], [`mux::Multiplexer`]) supplied at
//! construction.

pub mod event;
pub mod mux;
pub mod runtime;
pub mod sync;
pub mod trace;
pub mod transport;

pub use event::header::{ChannelId, Header, MessageId, MessageKind, TimeoutMs};
pub use event::{Event, LinkId, Origin};
pub use runtime::dispatcher::{DispatchError, DispatcherSystem, LinkState, SystemConfig};
pub use sync::CancelToken;
pub use trace::init_tracing;
pub use transport::{DeviceId, InterfaceKind, LinkTarget, Payload, PhysAddr, Transport};
