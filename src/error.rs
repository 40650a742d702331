//! Error types surfaced by the engine.
//!
//! Loss and duplication are absorbed by the protocol and never appear here.
//! What remains are configuration mistakes, I/O failures on the byte stream
//! endpoints, and a receive buffer that still has holes when the peer's FIN
//! arrives.

use std::time::Duration;

use thiserror::Error;

/// An [`crate::config::EngineConfig`] parameter out of range.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("mss must be greater than 0")]
    ZeroMss,
    #[error("mss of {0} bytes does not fit in a single segment")]
    MssTooLarge(usize),
    #[error("max_in_flight must be at least 1")]
    ZeroWindow,
    #[error("send_timeout must be non-zero")]
    ZeroTimeout,
    #[error("max_timeout {ceiling:?} is below send_timeout {floor:?}")]
    TimeoutCeilingBelowFloor { floor: Duration, ceiling: Duration },
    #[error("max_reorder_slots must be at least 1")]
    ZeroReorderSlots,
}

/// Failure returned from a tick entry point.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Reading the source or writing the sink failed.
    #[error("stream I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer's FIN arrived while slots were still empty.  Nothing was
    /// written to the sink and the FIN was not acknowledged.
    #[error("receive buffer incomplete at FIN: missing sequence numbers {missing:?}")]
    IncompleteStream { missing: Vec<u32> },

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}
