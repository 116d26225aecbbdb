//! Fixed-size wire header shared by every transport class.
//!
//! ## Wire layout
//!
//! All multi-byte integers are little-endian:
//!
//! `[magic:4][id:4][kind:4][chan:2][size:4][timeout:4]`
//!
//! A reserved control-data region of [`CONTROL_DATA_MAX`] bytes follows the
//! fixed fields in the in-memory representation. Only control-write
//! messages occupy it (their payload rides inline and extends the header
//! write by `size`); every other kind excludes the region from the header
//! length on the wire, so [`Header::WIRE_SIZE`] is what both ends transfer.

use std::fmt;

use thiserror::Error;

/// Marks a header as produced by a peer dispatcher.
pub const HEADER_MAGIC: u32 = 0x4352_4C4B; // "CRLK"

/// Reserved inline control-data capacity within the header region.
pub const CONTROL_DATA_MAX: usize = 64;

/// Message kinds carried in the header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum MessageKind {
    /// Read request against a registered buffer.
    Read = 0,
    /// Read request into a caller buffer.
    ReadToBuffer = 1,
    /// Data write; payload follows the header on the wire.
    Write = 2,
    /// Data write from caller-volatile memory; payload follows the header.
    WriteVolatile = 3,
    /// Control write; payload rides inline in the reserved header region.
    WriteControl = 4,
    /// Passthrough read resolved against the buffer registry.
    PassthruRead = 5,
    /// Passthrough read into a scratch buffer.
    PassthruReadToBuffer = 6,
    /// Passthrough data write; payload follows the header.
    PassthruWrite = 7,
    /// Passthrough volatile write; payload follows the header.
    PassthruWriteVolatile = 8,
}

impl MessageKind {
    /// Kinds whose payload is written to the wire after the header.
    #[must_use]
    pub const fn carries_payload(self) -> bool {
        matches!(
            self,
            Self::Write | Self::WriteVolatile | Self::PassthruWrite | Self::PassthruWriteVolatile
        )
    }

    const fn from_u32(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => Self::Read,
            1 => Self::ReadToBuffer,
            2 => Self::Write,
            3 => Self::WriteVolatile,
            4 => Self::WriteControl,
            5 => Self::PassthruRead,
            6 => Self::PassthruReadToBuffer,
            7 => Self::PassthruWrite,
            8 => Self::PassthruWriteVolatile,
            _ => return None,
        })
    }
}

/// Outbound message correlation id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageId(u32);

impl MessageId {
    /// Placeholder for headers whose id has not been assigned yet.
    pub const INVALID: Self = Self(u32::MAX);

    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Channel number within a link.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChannelId(u16);

impl ChannelId {
    #[must_use]
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Millisecond timeout carried in the header; zero blocks indefinitely,
/// subject to cancellation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeoutMs(u32);

impl TimeoutMs {
    /// Block until the transfer completes or the worker is cancelled.
    pub const BLOCKING: Self = Self(0);

    #[must_use]
    pub const fn from_millis(ms: u32) -> Self {
        Self(ms)
    }

    #[must_use]
    pub const fn as_millis(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn is_blocking(self) -> bool {
        self.0 == 0
    }
}

/// Decoding failures for inbound header bytes.
///
/// A wrong magic is *not* a decode error: the receive path checks
/// [`Header::is_valid`] separately and retries silently.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeaderError {
    #[error("input buffer too small for a header")]
    TooShort,
    #[error("unknown message kind {0}")]
    UnknownKind(u32),
}

/// The transport-independent message header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    pub magic: u32,
    pub id: MessageId,
    pub kind: MessageKind,
    pub channel: ChannelId,
    pub size: u32,
    pub timeout: TimeoutMs,
}

impl Header {
    /// Bytes of the fixed fields on the wire (the reserved control region
    /// is excluded).
    pub const WIRE_SIZE: usize = 22;

    /// Largest header write: fixed fields plus inline control data.
    pub const MAX_WIRE_SIZE: usize = Self::WIRE_SIZE + CONTROL_DATA_MAX;

    /// Builds an outbound header. The magic is stamped; the id stays
    /// [`MessageId::INVALID`] until submission assigns one.
    #[must_use]
    pub const fn new(kind: MessageKind, channel: ChannelId, size: u32, timeout: TimeoutMs) -> Self {
        Self {
            magic: HEADER_MAGIC,
            id: MessageId::INVALID,
            kind,
            channel,
            size,
            timeout,
        }
    }

    /// Header of a pooled event that has not been filled yet.
    pub(crate) const fn vacant() -> Self {
        Self {
            magic: 0,
            id: MessageId::INVALID,
            kind: MessageKind::Read,
            channel: ChannelId::new(0),
            size: 0,
            timeout: TimeoutMs::BLOCKING,
        }
    }

    /// Whether the magic matches [`HEADER_MAGIC`].
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.magic == HEADER_MAGIC
    }

    /// Encodes the fixed fields into the first [`Self::WIRE_SIZE`] bytes of
    /// `buf`.
    ///
    /// # Panics
    /// Panics if `buf` is shorter than [`Self::WIRE_SIZE`].
    pub fn encode(&self, buf: &mut [u8]) {
        let mut w = FieldWriter::new(&mut buf[..Self::WIRE_SIZE]);
        w.put_u32(self.magic);
        w.put_u32(self.id.as_u32());
        w.put_u32(self.kind as u32);
        w.put_u16(self.channel.as_u16());
        w.put_u32(self.size);
        w.put_u32(self.timeout.as_millis());
    }

    /// Decodes a header from the start of `buf`.
    ///
    /// # Errors
    /// Fails when `buf` is shorter than [`Self::WIRE_SIZE`] or the kind tag
    /// is unknown.
    pub fn decode(buf: &[u8]) -> Result<Self, HeaderError> {
        let mut r = FieldReader::new(buf);
        let magic = r.take_u32()?;
        let id = MessageId::new(r.take_u32()?);
        let raw_kind = r.take_u32()?;
        let kind = MessageKind::from_u32(raw_kind).ok_or(HeaderError::UnknownKind(raw_kind))?;
        let channel = ChannelId::new(r.take_u16()?);
        let size = r.take_u32()?;
        let timeout = TimeoutMs::from_millis(r.take_u32()?);
        Ok(Self {
            magic,
            id,
            kind,
            channel,
            size,
            timeout,
        })
    }
}

/// Writer for the fixed header fields.
struct FieldWriter<'a> {
    buf: &'a mut [u8],
    cursor: usize,
}

impl<'a> FieldWriter<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, cursor: 0 }
    }

    fn put_u16(&mut self, v: u16) {
        self.buf[self.cursor..self.cursor + 2].copy_from_slice(&v.to_le_bytes());
        self.cursor += 2;
    }

    fn put_u32(&mut self, v: u32) {
        self.buf[self.cursor..self.cursor + 4].copy_from_slice(&v.to_le_bytes());
        self.cursor += 4;
    }
}

/// Reader for the fixed header fields.
struct FieldReader<'a> {
    buf: &'a [u8],
    cursor: usize,
}

impl<'a> FieldReader<'a> {
    const fn new(buf: &'a [u8]) -> Self {
        Self { buf, cursor: 0 }
    }

    fn take_u16(&mut self) -> Result<u16, HeaderError> {
        if self.cursor + 2 > self.buf.len() {
            return Err(HeaderError::TooShort);
        }
        let mut arr = [0u8; 2];
        arr.copy_from_slice(&self.buf[self.cursor..self.cursor + 2]);
        self.cursor += 2;
        Ok(u16::from_le_bytes(arr))
    }

    fn take_u32(&mut self) -> Result<u32, HeaderError> {
        if self.cursor + 4 > self.buf.len() {
            return Err(HeaderError::TooShort);
        }
        let mut arr = [0u8; 4];
        arr.copy_from_slice(&self.buf[self.cursor..self.cursor + 4]);
        self.cursor += 4;
        Ok(u32::from_le_bytes(arr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_preserves_fields() {
        let mut header = Header::new(
            MessageKind::Write,
            ChannelId::new(3),
            64,
            TimeoutMs::from_millis(500),
        );
        header.id = MessageId::new(0x2a);

        let mut buf = [0u8; Header::WIRE_SIZE];
        header.encode(&mut buf);
        let decoded = Header::decode(&buf).unwrap();

        assert_eq!(decoded, header);
        assert!(decoded.is_valid());
    }

    #[test]
    fn decode_rejects_short_buffer() {
        let buf = [0u8; Header::WIRE_SIZE - 1];
        assert_eq!(Header::decode(&buf), Err(HeaderError::TooShort));
    }

    #[test]
    fn decode_rejects_unknown_kind() {
        let header = Header::new(MessageKind::Write, ChannelId::new(0), 0, TimeoutMs::BLOCKING);
        let mut buf = [0u8; Header::WIRE_SIZE];
        header.encode(&mut buf);
        buf[8..12].copy_from_slice(&0xffu32.to_le_bytes());

        assert_eq!(Header::decode(&buf), Err(HeaderError::UnknownKind(0xff)));
    }

    #[test]
    fn corrupted_magic_decodes_but_is_invalid() {
        let header = Header::new(MessageKind::Read, ChannelId::new(1), 0, TimeoutMs::BLOCKING);
        let mut buf = [0u8; Header::WIRE_SIZE];
        header.encode(&mut buf);
        buf[0] ^= 0xff;

        let decoded = Header::decode(&buf).unwrap();
        assert!(!decoded.is_valid());
    }

    #[test]
    fn only_write_kinds_carry_payload() {
        assert!(MessageKind::Write.carries_payload());
        assert!(MessageKind::WriteVolatile.carries_payload());
        assert!(MessageKind::PassthruWrite.carries_payload());
        assert!(MessageKind::PassthruWriteVolatile.carries_payload());

        assert!(!MessageKind::WriteControl.carries_payload());
        assert!(!MessageKind::Read.carries_payload());
        assert!(!MessageKind::PassthruReadToBuffer.carries_payload());
    }
}
