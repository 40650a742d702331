//! Tick driver for a sender/receiver pair sharing one in-process link.
//!
//! ```text
//!   every tick, at time `now`:
//!     sender.on_receive_tick   → sender.on_send_tick
//!     receiver.on_receive_tick → receiver.on_send_tick
//! ```
//!
//! [`Simulation::step`] runs on a virtual clock that advances by exactly one
//! tick per call, so a whole transfer finishes in microseconds and every
//! timeout lands on a predictable tick.  [`Simulation::step_at`] takes the
//! time from the caller instead, for wall-clock pacing.

use std::cell::RefCell;
use std::fmt;
use std::io::{self, Write};
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::connection::{Endpoint, Stats};
use crate::error::EngineError;
use crate::simulator::{LinkStats, LossyLink};

/// Cadence used when none is given.
pub const DEFAULT_TICK: Duration = Duration::from_millis(100);

pub struct Simulation {
    pub sender: Endpoint,
    pub receiver: Endpoint,
    pub link: LossyLink,
    tick: Duration,
    start: Instant,
    now: Instant,
    ticks: u64,
}

impl Simulation {
    pub fn new(sender: Endpoint, receiver: Endpoint, link: LossyLink, tick: Duration) -> Self {
        let start = Instant::now();
        Self {
            sender,
            receiver,
            link,
            tick,
            start,
            now: start,
            ticks: 0,
        }
    }

    /// Time of the next virtual tick.
    pub fn now(&self) -> Instant {
        self.now
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn elapsed(&self) -> Duration {
        self.now.saturating_duration_since(self.start)
    }

    /// Run one tick at the virtual time, then advance the clock.
    pub fn step(&mut self) -> Result<(), EngineError> {
        self.step_at(self.now)?;
        self.now += self.tick;
        Ok(())
    }

    /// Run one tick at `now`.
    pub fn step_at(&mut self, now: Instant) -> Result<(), EngineError> {
        self.now = self.now.max(now);
        self.sender.on_receive_tick(&mut self.link, now)?;
        self.sender.on_send_tick(&mut self.link, now)?;
        self.receiver.on_receive_tick(&mut self.link, now)?;
        self.receiver.on_send_tick(&mut self.link, now)?;
        self.ticks += 1;
        Ok(())
    }

    /// The sender has closed and the receiver has committed the stream.
    ///
    /// The receiver may still be waiting for the final ACK; nothing it could
    /// learn from it changes the delivered data.
    pub fn is_complete(&self) -> bool {
        self.sender.is_finished() && self.receiver.delivered_bytes().is_some()
    }

    /// Step until complete or until `max_ticks` ticks have run in total.
    pub fn run(&mut self, max_ticks: u64) -> Result<TransferReport, EngineError> {
        while !self.is_complete() && self.ticks < max_ticks {
            self.step()?;
        }
        if !self.is_complete() {
            log::warn!("[sim] gave up after {} tick(s)", self.ticks);
        }
        Ok(self.report())
    }

    pub fn report(&self) -> TransferReport {
        TransferReport {
            completed: self.is_complete(),
            ticks: self.ticks,
            elapsed: self.elapsed(),
            delivered_bytes: self.receiver.delivered_bytes().unwrap_or(0),
            link: self.link.stats().clone(),
            sender: self.sender.stats().clone(),
            receiver: self.receiver.stats().clone(),
        }
    }
}

/// Summary of one simulated transfer.
#[derive(Debug, Clone)]
pub struct TransferReport {
    pub completed: bool,
    pub ticks: u64,
    pub elapsed: Duration,
    pub delivered_bytes: usize,
    pub link: LinkStats,
    pub sender: Stats,
    pub receiver: Stats,
}

impl fmt::Display for TransferReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total bytes sent = {}", self.link.bytes_sent)?;
        writeln!(f, "Total time of transfer = {:.3}", self.elapsed.as_secs_f64())?;
        writeln!(
            f,
            "Segments: {} sent, {} dropped, {} retransmitted, {} ticks",
            self.link.segments_sent, self.link.dropped, self.sender.retransmissions, self.ticks
        )?;
        write!(f, "Delivered bytes = {}", self.delivered_bytes)
    }
}

/// In-memory sink that can be inspected after the receiver has taken it.
#[derive(Debug, Clone, Default)]
pub struct MemorySink(Rc<RefCell<Vec<u8>>>);

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.0.borrow().clone()
    }
}

impl Write for MemorySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
