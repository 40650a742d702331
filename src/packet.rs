//! Segment definitions and the on-wire codec.
//!
//! Every unit exchanged between the two endpoints is a [`Segment`].  This
//! module is responsible for:
//! - Naming the two endpoints ([`EndpointId`]).
//! - Defining the segment fields, the flag bits, and how a segment is
//!   classified ([`SegmentKind`]).
//! - Serialising a [`Segment`] into a datagram and parsing it back, returning
//!   errors for malformed or truncated input.
//!
//! No I/O happens here; this is pure data transformation.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.  The two endpoint ids are
//! length-prefixed UTF-8 strings, so the header is variable-length.
//!
//! ```text
//! +---------+-------------+---------+-------------+
//! | src_len |  src bytes  | dst_len |  dst bytes  |
//! +---------+-------------+---------+-------------+
//! |   Sequence Number (32)  |  Ack Number (32)    |
//! +-------------------------+---------------------+
//! |  Flags  | Payload Len (16)  |  Payload ...    |
//! +---------+-------------------+-----------------+
//! ```
//!
//! There is deliberately no checksum: payload integrity is left to the link.

use std::fmt;

use thiserror::Error;

/// Bit-flag constants for the `flags` field.
pub mod flags {
    /// Synchronise (handshake initiation).
    pub const SYN: u8 = 0b0000_0001;
    /// Acknowledgement field is valid.
    pub const ACK: u8 = 0b0000_0010;
    /// Finish: the sender has no more data.
    pub const FIN: u8 = 0b0000_0100;
    /// Every bit this protocol defines.
    pub const ALL: u8 = SYN | ACK | FIN;
}

/// Longest endpoint id the codec can carry, in bytes.
pub const MAX_ID_LEN: usize = u8::MAX as usize;

/// Largest payload the codec can carry, in bytes.
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

/// src_len(1) + dst_len(1) + seq(4) + ack(4) + flags(1) + payload_len(2)
const FIXED_LEN: usize = 13;

// ---------------------------------------------------------------------------
// EndpointId
// ---------------------------------------------------------------------------

/// Symbolic name of one end of the link (e.g. `"A"` or `"B"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(String);

impl EndpointId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EndpointId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for EndpointId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Segment
// ---------------------------------------------------------------------------

/// What a segment means to the connection, derived from its flags and
/// payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Syn,
    SynAck,
    /// Pure ACK: handshake completion, teardown completion, or a data ACK
    /// depending on the receiving endpoint's phase.
    Ack,
    Fin,
    FinAck,
    /// Flagless segment carrying stream bytes.
    Data,
    /// Any other combination (payload on a control segment, empty data,
    /// SYN|FIN, ...).
    Malformed,
}

/// One unit of transfer.
///
/// Control segments carry `payload: None`; data segments carry no flags and
/// a non-empty payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub src: EndpointId,
    pub dst: EndpointId,
    /// Sender-assigned index of a data segment, dense from 0.
    pub seq: u32,
    /// Sequence number being acknowledged (meaningful on pure ACKs).
    pub ack: u32,
    /// Bitmask of [`flags`] constants.
    pub flags: u8,
    pub payload: Option<Vec<u8>>,
}

impl Segment {
    /// Build a data segment for sequence number `seq`.
    pub fn data(src: EndpointId, dst: EndpointId, seq: u32, payload: Vec<u8>) -> Self {
        Self {
            src,
            dst,
            seq,
            ack: 0,
            flags: 0,
            payload: Some(payload),
        }
    }

    /// Build a payload-free control segment.
    pub fn control(src: EndpointId, dst: EndpointId, seq: u32, ack: u32, flags: u8) -> Self {
        Self {
            src,
            dst,
            seq,
            ack,
            flags,
            payload: None,
        }
    }

    /// `true` if every bit in `flag` is set.
    pub fn has(&self, flag: u8) -> bool {
        self.flags & flag == flag
    }

    pub fn kind(&self) -> SegmentKind {
        const SYN_ACK: u8 = flags::SYN | flags::ACK;
        const FIN_ACK: u8 = flags::FIN | flags::ACK;

        match (self.flags, self.payload.as_deref()) {
            (0, Some(p)) if !p.is_empty() => SegmentKind::Data,
            (flags::SYN, None) => SegmentKind::Syn,
            (SYN_ACK, None) => SegmentKind::SynAck,
            (flags::ACK, None) => SegmentKind::Ack,
            (flags::FIN, None) => SegmentKind::Fin,
            (FIN_ACK, None) => SegmentKind::FinAck,
            _ => SegmentKind::Malformed,
        }
    }

    /// Number of bytes [`encode`](Self::encode) produces.
    pub fn encoded_len(&self) -> usize {
        FIXED_LEN
            + self.src.as_str().len()
            + self.dst.as_str().len()
            + self.payload.as_ref().map_or(0, Vec::len)
    }

    /// Serialise this segment into a newly allocated byte vector.
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        let src = self.src.as_str().as_bytes();
        let dst = self.dst.as_str().as_bytes();
        let payload = self.payload.as_deref().unwrap_or(&[]);

        for id in [src, dst] {
            if id.len() > MAX_ID_LEN {
                return Err(PacketError::IdTooLong(id.len()));
            }
        }
        if payload.len() > MAX_PAYLOAD {
            return Err(PacketError::PayloadTooLarge(payload.len()));
        }

        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.push(src.len() as u8);
        buf.extend_from_slice(src);
        buf.push(dst.len() as u8);
        buf.extend_from_slice(dst);
        buf.extend_from_slice(&self.seq.to_be_bytes());
        buf.extend_from_slice(&self.ack.to_be_bytes());
        buf.push(self.flags);
        buf.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        buf.extend_from_slice(payload);
        Ok(buf)
    }

    /// Parse a [`Segment`] from a raw datagram.
    ///
    /// Returns [`Err`] if:
    /// - `buf` ends before the header does,
    /// - the `payload_len` field disagrees with the remaining bytes,
    /// - an endpoint id is not UTF-8,
    /// - undefined flag bits are set, or
    /// - a control segment carries payload bytes.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        let mut r = Reader { buf, pos: 0 };

        let src = r.id()?;
        let dst = r.id()?;
        let seq = r.u32()?;
        let ack = r.u32()?;
        let flag_bits = r.u8()?;
        let payload_len = r.u16()? as usize;

        if flag_bits & !flags::ALL != 0 {
            return Err(PacketError::UnknownFlags(flag_bits));
        }
        if r.remaining() != payload_len {
            return Err(PacketError::LengthMismatch);
        }
        let body = r.take(payload_len)?;

        let payload = if flag_bits == 0 {
            Some(body.to_vec())
        } else if body.is_empty() {
            None
        } else {
            return Err(PacketError::PayloadOnControl);
        };

        Ok(Segment {
            src,
            dst,
            seq,
            ack,
            flags: flag_bits,
            payload,
        })
    }
}

impl fmt::Display for Segment {
    /// One log line: `A→B seq=3 ack=0 syn=0 ack_flag=0 fin=0 payload=512B`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}→{} seq={} ack={} syn={} ack_flag={} fin={} payload=",
            self.src,
            self.dst,
            self.seq,
            self.ack,
            u8::from(self.has(flags::SYN)),
            u8::from(self.has(flags::ACK)),
            u8::from(self.has(flags::FIN)),
        )?;
        match &self.payload {
            Some(p) => write!(f, "{}B", p.len()),
            None => f.write_str("none"),
        }
    }
}

// ---------------------------------------------------------------------------
// Decoding cursor
// ---------------------------------------------------------------------------

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], PacketError> {
        if self.remaining() < n {
            return Err(PacketError::BufferTooShort);
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, PacketError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, PacketError> {
        let mut raw = [0u8; 2];
        raw.copy_from_slice(self.take(2)?);
        Ok(u16::from_be_bytes(raw))
    }

    fn u32(&mut self) -> Result<u32, PacketError> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4)?);
        Ok(u32::from_be_bytes(raw))
    }

    fn id(&mut self) -> Result<EndpointId, PacketError> {
        let len = self.u8()? as usize;
        let raw = self.take(len)?;
        let name = std::str::from_utf8(raw).map_err(|_| PacketError::InvalidId)?;
        Ok(EndpointId::new(name))
    }
}

/// Errors that can arise when encoding or parsing a datagram.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("buffer too short to contain a segment header")]
    BufferTooShort,
    #[error("payload_len field does not match remaining bytes")]
    LengthMismatch,
    #[error("undefined flag bits set: {0:#010b}")]
    UnknownFlags(u8),
    #[error("endpoint id is not valid UTF-8")]
    InvalidId,
    #[error("endpoint id of {0} bytes exceeds the 255 byte limit")]
    IdTooLong(usize),
    #[error("payload of {0} bytes exceeds the 65535 byte limit")]
    PayloadTooLarge(usize),
    #[error("control segment carries a payload")]
    PayloadOnControl,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> (EndpointId, EndpointId) {
        (EndpointId::from("A"), EndpointId::from("B"))
    }

    #[test]
    fn data_segment_roundtrip() {
        let (a, b) = ids();
        let seg = Segment::data(a, b, 7, b"hello".to_vec());
        let decoded = Segment::decode(&seg.encode().unwrap()).unwrap();
        assert_eq!(decoded, seg);
        assert_eq!(decoded.kind(), SegmentKind::Data);
    }

    #[test]
    fn control_segment_decodes_without_payload() {
        let (a, b) = ids();
        let seg = Segment::control(b, a, 0, 0, flags::FIN | flags::ACK);
        let decoded = Segment::decode(&seg.encode().unwrap()).unwrap();
        assert_eq!(decoded.payload, None);
        assert_eq!(decoded.kind(), SegmentKind::FinAck);
    }

    #[test]
    fn encoded_length_matches_prediction() {
        let (a, b) = ids();
        let seg = Segment::data(a, b, 0, vec![0u8; 40]);
        assert_eq!(seg.encode().unwrap().len(), seg.encoded_len());
        assert_eq!(seg.encoded_len(), FIXED_LEN + 1 + 1 + 40);
    }

    #[test]
    fn seq_ack_big_endian_on_wire() {
        let (a, b) = ids();
        let seg = Segment::control(a, b, 0x0102_0304, 0x0506_0708, flags::ACK);
        let bytes = seg.encode().unwrap();
        // src_len, 'A', dst_len, 'B' precede the numbers.
        assert_eq!(&bytes[4..8], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&bytes[8..12], &[0x05, 0x06, 0x07, 0x08]);
    }

    #[test]
    fn decode_empty_buffer_returns_error() {
        assert_eq!(Segment::decode(&[]), Err(PacketError::BufferTooShort));
    }

    #[test]
    fn decode_truncated_payload_returns_error() {
        let (a, b) = ids();
        let mut bytes = Segment::data(a, b, 0, b"data".to_vec()).encode().unwrap();
        bytes.pop();
        assert_eq!(Segment::decode(&bytes), Err(PacketError::LengthMismatch));
    }

    #[test]
    fn decode_rejects_unknown_flag_bits() {
        let (a, b) = ids();
        let mut bytes = Segment::control(a, b, 0, 0, flags::SYN).encode().unwrap();
        bytes[12] |= 0b1000_0000;
        assert!(matches!(
            Segment::decode(&bytes),
            Err(PacketError::UnknownFlags(_))
        ));
    }

    #[test]
    fn decode_rejects_payload_on_control_segment() {
        let (a, b) = ids();
        let mut bytes = Segment::data(a, b, 0, b"xy".to_vec()).encode().unwrap();
        bytes[12] = flags::SYN;
        assert_eq!(Segment::decode(&bytes), Err(PacketError::PayloadOnControl));
    }

    #[test]
    fn encode_rejects_oversized_id() {
        let seg = Segment::control(EndpointId::new("x".repeat(300)), "B".into(), 0, 0, flags::SYN);
        assert_eq!(seg.encode(), Err(PacketError::IdTooLong(300)));
    }

    #[test]
    fn kind_classification() {
        let (a, b) = ids();
        let ctl = |f| Segment::control(a.clone(), b.clone(), 0, 0, f).kind();
        assert_eq!(ctl(flags::SYN), SegmentKind::Syn);
        assert_eq!(ctl(flags::SYN | flags::ACK), SegmentKind::SynAck);
        assert_eq!(ctl(flags::ACK), SegmentKind::Ack);
        assert_eq!(ctl(flags::FIN), SegmentKind::Fin);
        assert_eq!(ctl(flags::SYN | flags::FIN), SegmentKind::Malformed);
        assert_eq!(ctl(0), SegmentKind::Malformed);

        let empty = Segment::data(a.clone(), b.clone(), 0, Vec::new());
        assert_eq!(empty.kind(), SegmentKind::Malformed);
    }

    #[test]
    fn display_reports_flags_and_payload() {
        let (a, b) = ids();
        let line = Segment::data(a, b, 3, vec![1, 2, 3]).to_string();
        assert_eq!(line, "A→B seq=3 ack=0 syn=0 ack_flag=0 fin=0 payload=3B");
    }
}
