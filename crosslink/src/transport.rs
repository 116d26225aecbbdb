//! Physical transport interface consumed by the dispatcher.
//!
//! The dispatcher never touches hardware: byte-level I/O and DMA-capable
//! memory management are supplied by a platform implementation of
//! [`Transport`] covering whichever interfaces exist (PCIe, USB, on-chip
//! IPC, Ethernet). The dispatcher only decides *what* to move and *when*;
//! the transport decides *how*.

use std::time::Duration;
use std::{fmt, io};

use thiserror::Error;

use crate::event::header::{ChannelId, TimeoutMs};
use crate::sync::CancelToken;

/// Alignment required of packet buffers handed to the transport.
pub const PACKET_ALIGNMENT: usize = 64;

/// Physical interface classes a link can ride on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InterfaceKind {
    /// On-chip inter-processor channel.
    Ipc,
    Pcie,
    Usb,
    Ethernet,
}

impl fmt::Display for InterfaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ipc => "ipc",
            Self::Pcie => "pcie",
            Self::Usb => "usb",
            Self::Ethernet => "eth",
        };
        f.write_str(name)
    }
}

/// Identifies one remote device on the fabric.
///
/// The interface class is encoded in the top byte of the raw id, the way
/// the platform enumerates devices; the low bits are the per-interface
/// device index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DeviceId(u32);

impl DeviceId {
    const INTERFACE_SHIFT: u32 = 24;

    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Builds a device id for `index` on the given interface.
    #[must_use]
    pub const fn on_interface(interface: InterfaceKind, index: u32) -> Self {
        let class = match interface {
            InterfaceKind::Ipc => 0u32,
            InterfaceKind::Pcie => 1,
            InterfaceKind::Usb => 2,
            InterfaceKind::Ethernet => 3,
        };
        Self((class << Self::INTERFACE_SHIFT) | (index & 0x00ff_ffff))
    }

    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Decodes the interface class, `None` if the encoding is unknown.
    #[must_use]
    pub const fn interface(self) -> Option<InterfaceKind> {
        match self.0 >> Self::INTERFACE_SHIFT {
            0 => Some(InterfaceKind::Ipc),
            1 => Some(InterfaceKind::Pcie),
            2 => Some(InterfaceKind::Usb),
            3 => Some(InterfaceKind::Ethernet),
            _ => None,
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Resolved wire destination: a device and the interface carrying it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinkTarget {
    pub device: DeviceId,
    pub interface: InterfaceKind,
}

impl LinkTarget {
    #[must_use]
    pub const fn new(device: DeviceId, interface: InterfaceKind) -> Self {
        Self { device, interface }
    }

    /// Resolves the interface from the device id encoding.
    #[must_use]
    pub fn resolve(device: DeviceId) -> Option<Self> {
        device
            .interface()
            .map(|interface| Self { device, interface })
    }
}

impl fmt::Display for LinkTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.interface, self.device)
    }
}

/// Physical address of a DMA-capable buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PhysAddr(u64);

impl PhysAddr {
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Memory classes a transport can allocate packet buffers from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryClass {
    Normal,
    /// DMA-coherent memory with a stable physical address.
    DmaCoherent,
}

/// Owned payload bytes attached to an event.
///
/// A payload is either caller-owned plain memory ([`Payload::from_vec`]) or
/// transport-owned memory produced by [`Transport::allocate`], which must go
/// back through [`Transport::deallocate`]. Ownership moves with the event,
/// so a buffer cannot be freed twice or observed after release.
#[derive(Debug)]
pub struct Payload {
    bytes: Vec<u8>,
    paddr: Option<PhysAddr>,
    transport_owned: bool,
}

impl Payload {
    /// Wraps caller-owned bytes; released by an ordinary drop.
    #[must_use]
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            paddr: None,
            transport_owned: false,
        }
    }

    /// Wraps transport-owned memory. Transport implementations use this for
    /// [`Transport::allocate`] results; a physical address marks the buffer
    /// DMA-coherent.
    #[must_use]
    pub fn transport_owned(bytes: Vec<u8>, paddr: Option<PhysAddr>) -> Self {
        Self {
            bytes,
            paddr,
            transport_owned: true,
        }
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[must_use]
    pub const fn paddr(&self) -> Option<PhysAddr> {
        self.paddr
    }

    #[must_use]
    pub const fn is_transport_owned(&self) -> bool {
        self.transport_owned
    }

    /// The memory class this payload must be released under.
    #[must_use]
    pub const fn memory_class(&self) -> MemoryClass {
        if self.paddr.is_some() {
            MemoryClass::DmaCoherent
        } else {
            MemoryClass::Normal
        }
    }
}

/// Releases a payload, routing transport-owned memory back to the transport.
pub(crate) fn release_payload(transport: &dyn Transport, payload: Payload) {
    if payload.is_transport_owned() {
        transport.deallocate(payload);
    }
}

/// Channel addressing for reads that traverse the local IPC interface.
#[derive(Clone, Copy, Debug)]
pub struct IpcContext {
    pub channel: ChannelId,
    /// Volatile reads copy into a caller buffer; non-volatile reads yield a
    /// registered-buffer key.
    pub volatile: bool,
}

/// Errors surfaced by transport implementations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// A read or write moved fewer bytes than requested.
    #[error("short transfer: {got} of {want} bytes")]
    ShortTransfer { want: usize, got: usize },
    /// The transfer did not complete within its timeout.
    #[error("transfer timed out")]
    Timeout,
    /// A blocking call observed cancellation and returned early.
    #[error("cancelled")]
    Cancelled,
    /// Nothing buffered on the addressed IPC channel.
    #[error("no data available")]
    NoData,
    /// The requested allocation could not be satisfied.
    #[error("allocation of {0} bytes failed")]
    AllocFailed(usize),
    /// Device or bus level I/O failure.
    #[error("transport i/o: {0}")]
    Io(#[from] io::Error),
}

/// Byte-level I/O and packet-memory management for one or more interfaces.
///
/// Implementations are shared across worker threads and must be internally
/// synchronized. Contract details the dispatcher relies on:
///
/// - `read` blocks up to `timeout` ([`TimeoutMs::BLOCKING`] means
///   indefinitely) but must return [`TransportError::Cancelled`] promptly
///   once `cancel` fires.
/// - Reads carrying an [`IpcContext`] address a local IPC channel and return
///   [`TransportError::NoData`] immediately when the channel has nothing
///   buffered, rather than blocking.
/// - A return of `Ok(n)` with `n` smaller than requested is a short
///   transfer; the dispatcher treats short reads as transient and short
///   writes as failures.
pub trait Transport: Send + Sync {
    /// Writes `buf` to the device. Returns the number of bytes written.
    ///
    /// # Errors
    /// Fails on device I/O errors or timeout.
    fn write(
        &self,
        target: LinkTarget,
        buf: &[u8],
        timeout: TimeoutMs,
        ipc: Option<IpcContext>,
    ) -> Result<usize, TransportError>;

    /// Reads up to `buf.len()` bytes from the device into `buf`.
    ///
    /// # Errors
    /// Fails on device I/O errors, timeout, cancellation, or an empty IPC
    /// channel (see the trait-level contract).
    fn read(
        &self,
        target: LinkTarget,
        buf: &mut [u8],
        timeout: TimeoutMs,
        cancel: &CancelToken,
        ipc: Option<IpcContext>,
    ) -> Result<usize, TransportError>;

    /// Allocates a packet buffer of `len` bytes with the given alignment.
    ///
    /// # Errors
    /// Fails when the memory class cannot satisfy the request.
    fn allocate(
        &self,
        len: usize,
        align: usize,
        class: MemoryClass,
    ) -> Result<Payload, TransportError>;

    /// Releases a payload previously produced by this transport.
    fn deallocate(&self, payload: Payload);
}

/// Converts a header timeout into a [`Duration`], `None` meaning block
/// until cancelled.
#[must_use]
pub fn timeout_duration(timeout: TimeoutMs) -> Option<Duration> {
    if timeout.is_blocking() {
        None
    } else {
        Some(Duration::from_millis(u64::from(timeout.as_millis())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_id_roundtrips_interface_class() {
        let device = DeviceId::on_interface(InterfaceKind::Pcie, 7);
        assert_eq!(device.interface(), Some(InterfaceKind::Pcie));
        assert_eq!(device.as_u32() & 0x00ff_ffff, 7);

        let ipc = DeviceId::on_interface(InterfaceKind::Ipc, 0);
        assert_eq!(ipc.interface(), Some(InterfaceKind::Ipc));
    }

    #[test]
    fn unknown_interface_class_resolves_to_none() {
        let bogus = DeviceId::new(0xff00_0001);
        assert_eq!(bogus.interface(), None);
        assert!(LinkTarget::resolve(bogus).is_none());
    }

    #[test]
    fn payload_memory_class_follows_paddr() {
        let plain = Payload::from_vec(vec![0u8; 8]);
        assert_eq!(plain.memory_class(), MemoryClass::Normal);
        assert!(!plain.is_transport_owned());

        let dma = Payload::transport_owned(vec![0u8; 8], Some(PhysAddr::new(0x1000)));
        assert_eq!(dma.memory_class(), MemoryClass::DmaCoherent);
        assert!(dma.is_transport_owned());
    }
}
