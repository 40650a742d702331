//! FIFO of packets waiting for a send tick.
//!
//! Becoming eligible to send (a window slot freed, a timer expired, a segment
//! arrived that needs an ACK) only pushes an entry here.  The send tick pops
//! entries until one produces a segment and puts that one segment on the
//! link, so each endpoint transmits at most one packet per tick.

use std::collections::VecDeque;

use crate::packet::Segment;

/// One pending transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Fire-and-forget control segment (SYN-ACK, FIN-ACK, any ACK).
    Control(Segment),
    /// Control segment guarded by the sender's control timer (SYN, FIN).
    /// Dropped at drain time if the timer no longer expects it.
    Tracked(Segment),
    /// Data segment by sequence number; the payload is looked up in the
    /// send window when it reaches the link.
    Data(u32),
}

#[derive(Debug, Default)]
pub struct OutboundQueue {
    entries: VecDeque<Outbound>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: Outbound) {
        self.entries.push_back(entry);
    }

    pub fn pop(&mut self) -> Option<Outbound> {
        self.entries.pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
