//! `tick-tcp` — a TCP-like reliable byte stream driven by periodic ticks over
//! a best-effort packet link.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────┐   segments   ┌──────────┐
//!  │  Sender  │─────────────▶│ Receiver │
//!  └────┬─────┘              └─────┬────┘
//!       │        ACKs              │
//!       │◀─────────────────────────┘
//!       │
//!  ┌────▼──────────────────────────────┐
//!  │            Endpoint               │
//!  │  (phase machine + outbound queue) │
//!  └────┬──────────────────────────────┘
//!       │ Segment values, one per send tick
//!  ┌────▼──────┐
//!  │   Link    │  (LossyLink in memory, or UdpLink over tokio)
//!  └───────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]     — segment type, flags, and wire codec
//! - [`state`]      — connection phase ordering
//! - [`timer`]      — per-segment status and retransmission timeout
//! - [`ack`]        — control-segment builders and ACK outcomes
//! - [`sender`]     — stream chunking and the bounded send window
//! - [`receiver`]   — out-of-order reassembly and the final flush
//! - [`outbound`]   — FIFO of packets waiting for a send tick
//! - [`connection`] — per-endpoint engine and tick entry points
//! - [`link`]       — the best-effort link trait
//! - [`simulator`]  — seeded lossy/duplicating/reordering in-memory link
//! - [`socket`]     — UDP link on a tokio socket
//! - [`driver`]     — two-endpoint tick loop and transfer report
//! - [`config`]     — engine tunables
//! - [`error`]      — error types

pub mod ack;
pub mod config;
pub mod connection;
pub mod driver;
pub mod error;
pub mod link;
pub mod outbound;
pub mod packet;
pub mod receiver;
pub mod sender;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod timer;

pub use config::{EngineConfig, TimeoutPolicy};
pub use connection::{Endpoint, Stats};
pub use error::{ConfigError, EngineError};
pub use link::Link;
pub use packet::{EndpointId, Segment, SegmentKind};
pub use state::ConnectionPhase;
