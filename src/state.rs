//! Connection phase types.
//!
//! Each endpoint owns one [`ConnectionPhase`].  The two endpoints never share
//! a phase; they converge through the control segments they exchange.  The
//! transitions themselves are driven by [`crate::connection`], which asks
//! [`ConnectionPhase::can_advance_to`] before every change so the phase only
//! ever moves forward.
//!
//! ```text
//!  CLOSED ──SYN──▶ HANDSHAKING ──ACK / SYN-ACK──▶ ESTABLISHED
//!    ▲                                                 │
//!    │                                          FIN    │
//!    └────────── final ACK / FIN-ACK ── TERMINATING ◀──┘
//! ```

use std::fmt;

/// Where an endpoint is in the connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionPhase {
    /// Before the handshake, and again once teardown completes.
    #[default]
    Closed,
    /// SYN sent (sender) or SYN-ACK sent (receiver); waiting for the peer.
    Handshaking,
    /// Data transfer in progress.
    Established,
    /// FIN sent (sender) or FIN-ACK sent (receiver); waiting for the peer.
    Terminating,
}

impl ConnectionPhase {
    /// Position along the lifecycle; terminal `Closed` is handled separately.
    fn rank(self) -> u8 {
        match self {
            Self::Closed => 0,
            Self::Handshaking => 1,
            Self::Established => 2,
            Self::Terminating => 3,
        }
    }

    /// `true` if moving from `self` to `next` is exactly one step forward.
    ///
    /// `Terminating → Closed` is the only edge that lowers the rank.
    pub fn can_advance_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Terminating, Self::Closed) => true,
            _ => next.rank() == self.rank() + 1,
        }
    }
}

impl fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Closed => "CLOSED",
            Self::Handshaking => "HANDSHAKING",
            Self::Established => "ESTABLISHED",
            Self::Terminating => "TERMINATING",
        };
        f.write_str(name)
    }
}
