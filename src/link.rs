//! The packet link both endpoints talk through.
//!
//! A [`Link`] is best-effort: `send` never reports failure and may lose,
//! duplicate, or delay the segment; `receive` never blocks and hands back at
//! most one segment addressed to the asking endpoint.  Implementations:
//! - [`crate::simulator::LossyLink`]: in-memory, fault-injecting.
//! - [`crate::socket::UdpLink`]: one UDP socket per process.

use crate::packet::{EndpointId, Segment};

pub trait Link {
    /// Hand `segment` to the link on behalf of endpoint `from`.
    fn send(&mut self, segment: Segment, from: &EndpointId);

    /// Next segment waiting for endpoint `at`, if any.
    fn receive(&mut self, at: &EndpointId) -> Option<Segment>;
}

impl<L: Link + ?Sized> Link for &mut L {
    fn send(&mut self, segment: Segment, from: &EndpointId) {
        (**self).send(segment, from)
    }

    fn receive(&mut self, at: &EndpointId) -> Option<Segment> {
        (**self).receive(at)
    }
}
