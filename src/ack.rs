//! Acknowledgment and control segment construction.
//!
//! ACKs are per-segment, never cumulative: a data ACK names exactly one
//! sequence number in its `ack` field and carries no other flag.  The same
//! flag pattern is used for the handshake-completing ACK and the final
//! teardown ACK; the receiving endpoint tells them apart by its own phase
//! (see [`crate::connection`]).

use std::time::Duration;

use crate::packet::{flags, EndpointId, Segment};

/// What a data ACK did to the sender's window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// The segment left the in-flight set.  `rtt_sample` is present only if
    /// the segment was transmitted exactly once.
    Retired { rtt_sample: Option<Duration> },
    /// The segment had already been acknowledged.
    Duplicate,
    /// No such segment, or it was never sent.
    Unknown,
}

pub fn syn(src: &EndpointId, dst: &EndpointId) -> Segment {
    Segment::control(src.clone(), dst.clone(), 0, 0, flags::SYN)
}

pub fn syn_ack(src: &EndpointId, dst: &EndpointId) -> Segment {
    Segment::control(src.clone(), dst.clone(), 0, 0, flags::SYN | flags::ACK)
}

pub fn fin(src: &EndpointId, dst: &EndpointId) -> Segment {
    Segment::control(src.clone(), dst.clone(), 0, 0, flags::FIN)
}

pub fn fin_ack(src: &EndpointId, dst: &EndpointId) -> Segment {
    Segment::control(src.clone(), dst.clone(), 0, 0, flags::FIN | flags::ACK)
}

/// Pure ACK answering a SYN-ACK or FIN-ACK.
pub fn control_ack(src: &EndpointId, dst: &EndpointId) -> Segment {
    Segment::control(src.clone(), dst.clone(), 0, 0, flags::ACK)
}

/// ACK for data segment `seq`.
pub fn data_ack(src: &EndpointId, dst: &EndpointId, seq: u32) -> Segment {
    Segment::control(src.clone(), dst.clone(), seq, seq, flags::ACK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::SegmentKind;

    #[test]
    fn builders_produce_expected_kinds() {
        let (a, b) = (EndpointId::from("A"), EndpointId::from("B"));
        assert_eq!(syn(&a, &b).kind(), SegmentKind::Syn);
        assert_eq!(syn_ack(&b, &a).kind(), SegmentKind::SynAck);
        assert_eq!(fin(&a, &b).kind(), SegmentKind::Fin);
        assert_eq!(fin_ack(&b, &a).kind(), SegmentKind::FinAck);
        assert_eq!(control_ack(&a, &b).kind(), SegmentKind::Ack);
    }

    #[test]
    fn data_ack_names_one_sequence_number() {
        let (a, b) = (EndpointId::from("A"), EndpointId::from("B"));
        let ack = data_ack(&b, &a, 42);
        assert_eq!(ack.kind(), SegmentKind::Ack);
        assert_eq!(ack.ack, 42);
        assert_eq!(ack.src, b);
        assert_eq!(ack.dst, a);
        assert!(ack.payload.is_none());
    }
}
