//! Per-endpoint protocol engine.
//!
//! An [`Endpoint`] owns the complete state for one side of the transfer.  Its
//! responsibilities are:
//! - Driving the connection phase (see [`crate::state`]) through handshake,
//!   transfer, and teardown.
//! - Dispatching each inbound [`Segment`] to the sender or receiver logic
//!   according to its [`Role`].
//! - Feeding the send window ([`crate::sender`]) or reorder buffer
//!   ([`crate::receiver`]).
//! - Pushing every outgoing packet through the [`OutboundQueue`] and putting
//!   at most one of them on the link per send tick.
//!
//! Nothing here blocks or spawns.  The two entry points,
//! [`Endpoint::on_receive_tick`] and [`Endpoint::on_send_tick`], are called
//! by an external driver at a fixed cadence with the current time; every
//! timeout is a timestamp comparison against that time.
//!
//! # Control segments
//!
//! ```text
//!  sender                              receiver
//!  CLOSED ── SYN ──────────────────▶   CLOSED → HANDSHAKING
//!  HANDSHAKING ◀──────────── SYN-ACK
//!  → ESTABLISHED ── ACK ───────────▶   → ESTABLISHED
//!       data / per-segment ACKs
//!  → TERMINATING ── FIN ───────────▶   flush, → TERMINATING
//!  ◀───────────────────────── FIN-ACK
//!  → CLOSED ── ACK ────────────────▶   → CLOSED
//! ```
//!
//! The sender retransmits SYN and FIN on timeout; the receiver answers a
//! repeated SYN or FIN again without repeating the transition.  Once closed,
//! each side still re-answers the peer's last control segment.

use std::io::{Read, Write};
use std::time::Instant;

use crate::ack::{self, AckOutcome};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::link::Link;
use crate::outbound::{Outbound, OutboundQueue};
use crate::packet::{EndpointId, Segment, SegmentKind};
use crate::receiver::{ReceiveBuffer, StoreOutcome};
use crate::sender::{chunk_stream, SendWindow};
use crate::state::ConnectionPhase;
use crate::timer::{RetransmitTimer, SegmentStatus};

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Counters kept by one endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stats {
    /// Segments put on the link.
    pub segments_sent: u64,
    /// Encoded bytes put on the link.
    pub bytes_sent: u64,
    /// Data and control segments sent again after a timeout.
    pub retransmissions: u64,
    pub segments_received: u64,
    /// Segments dropped as malformed or misaddressed.
    pub malformed: u64,
    /// Data ACKs that retired an in-flight segment.
    pub acks_retired: u64,
    pub duplicate_acks: u64,
    pub unknown_acks: u64,
    /// Data segments written into an empty buffer slot.
    pub segments_stored: u64,
    pub duplicate_segments: u64,
    /// Per-segment ACKs queued by the receiver.
    pub data_acks_generated: u64,
}

impl Stats {
    /// Every data ACK the sender has seen, whatever it did to the window.
    pub fn data_acks_received(&self) -> u64 {
        self.acks_retired + self.duplicate_acks + self.unknown_acks
    }
}

// ---------------------------------------------------------------------------
// Session: state shared by both roles
// ---------------------------------------------------------------------------

struct Session {
    id: EndpointId,
    peer: EndpointId,
    phase: ConnectionPhase,
    /// Set on the terminal transition into `Closed`.
    finished: bool,
    outbound: OutboundQueue,
    stats: Stats,
}

impl Session {
    fn new(id: EndpointId, peer: EndpointId) -> Self {
        Self {
            id,
            peer,
            phase: ConnectionPhase::Closed,
            finished: false,
            outbound: OutboundQueue::new(),
            stats: Stats::default(),
        }
    }

    /// The only place the phase changes.
    fn advance(&mut self, next: ConnectionPhase) {
        if self.finished || !self.phase.can_advance_to(next) {
            log::warn!(
                "[{}] refusing phase change {} → {}",
                self.id,
                self.phase,
                next
            );
            return;
        }
        log::debug!("[{}] {} → {}", self.id, self.phase, next);
        self.phase = next;
        if next == ConnectionPhase::Closed {
            self.finished = true;
        }
    }

    fn enqueue(&mut self, entry: Outbound) {
        self.outbound.push(entry);
    }

    fn ignore(&self, segment: &Segment) {
        log::debug!(
            "[{}] ignoring {:?} in {}: {}",
            self.id,
            segment.kind(),
            self.phase,
            segment
        );
    }

    fn reject(&mut self, segment: &Segment) {
        self.stats.malformed += 1;
        log::warn!("[{}] dropping malformed segment: {}", self.id, segment);
    }

    /// Pop queue entries until one resolves to a segment, then send it.
    fn transmit_next<L: Link + ?Sized>(
        &mut self,
        link: &mut L,
        mut resolve: impl FnMut(Outbound, &mut Stats) -> Option<Segment>,
    ) {
        while let Some(entry) = self.outbound.pop() {
            if let Some(segment) = resolve(entry, &mut self.stats) {
                self.stats.segments_sent += 1;
                self.stats.bytes_sent += segment.encoded_len() as u64;
                log::trace!("[{}] → {}", self.id, segment);
                link.send(segment, &self.id);
                return;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Sender role
// ---------------------------------------------------------------------------

/// State held only by the sending endpoint.
pub struct SenderState {
    /// Consumed on the first send tick.
    source: Option<Box<dyn Read>>,
    /// Lives from handshake start until every segment is acknowledged.
    window: Option<SendWindow>,
    /// Status of the SYN or FIN currently awaiting a reply.
    control: SegmentStatus,
    timer: RetransmitTimer,
    mss: usize,
    max_in_flight: usize,
}

impl SenderState {
    fn new(source: Box<dyn Read>, config: &EngineConfig) -> Self {
        Self {
            source: Some(source),
            window: None,
            control: SegmentStatus::Unsent,
            timer: RetransmitTimer::new(config),
            mss: config.mss,
            max_in_flight: config.max_in_flight,
        }
    }

    fn on_segment(&mut self, session: &mut Session, segment: Segment, now: Instant) {
        match (segment.kind(), session.phase) {
            (SegmentKind::SynAck, ConnectionPhase::Handshaking) => {
                self.control = SegmentStatus::Acknowledged;
                session.enqueue(Outbound::Control(ack::control_ack(&session.id, &session.peer)));
                session.advance(ConnectionPhase::Established);
            }
            (SegmentKind::SynAck, ConnectionPhase::Established) => {
                log::debug!("[{}] repeated SYN-ACK; re-sending handshake ACK", session.id);
                session.enqueue(Outbound::Control(ack::control_ack(&session.id, &session.peer)));
            }
            (SegmentKind::FinAck, ConnectionPhase::Terminating) => {
                self.control = SegmentStatus::Acknowledged;
                session.enqueue(Outbound::Control(ack::control_ack(&session.id, &session.peer)));
                session.advance(ConnectionPhase::Closed);
                log::info!("[{}] connection closed", session.id);
            }
            (SegmentKind::FinAck, ConnectionPhase::Closed) if session.finished => {
                log::debug!("[{}] FIN-ACK after close; re-sending final ACK", session.id);
                session.enqueue(Outbound::Control(ack::control_ack(&session.id, &session.peer)));
            }
            (SegmentKind::Ack, ConnectionPhase::Established | ConnectionPhase::Terminating) => {
                self.on_ack(session, segment.ack, now);
            }
            (SegmentKind::Malformed, _) => session.reject(&segment),
            _ => session.ignore(&segment),
        }
    }

    fn on_ack(&mut self, session: &mut Session, seq: u32, now: Instant) {
        let Some(window) = self.window.as_mut() else {
            // The window is released once everything is acknowledged.
            session.stats.duplicate_acks += 1;
            return;
        };
        match window.acknowledge(seq, now) {
            AckOutcome::Retired { rtt_sample } => {
                session.stats.acks_retired += 1;
                if let Some(sample) = rtt_sample {
                    self.timer.record_rtt_sample(sample);
                }
                log::trace!(
                    "[{}] seq={seq} acknowledged ({}/{})",
                    session.id,
                    window.acknowledged(),
                    window.len()
                );
            }
            AckOutcome::Duplicate => {
                session.stats.duplicate_acks += 1;
                log::debug!("[{}] duplicate ACK for seq={seq}", session.id);
            }
            AckOutcome::Unknown => {
                session.stats.unknown_acks += 1;
                log::warn!("[{}] ACK for unknown seq={seq}", session.id);
            }
        }
    }

    fn on_tick(&mut self, session: &mut Session, now: Instant) -> Result<(), EngineError> {
        match session.phase {
            ConnectionPhase::Closed => self.open(session)?,
            ConnectionPhase::Handshaking => self.resend_control_if_expired(session, now, ack::syn),
            ConnectionPhase::Established => self.pump(session, now),
            ConnectionPhase::Terminating => self.resend_control_if_expired(session, now, ack::fin),
        }
        Ok(())
    }

    /// Read the whole source, build the window, and send SYN.
    fn open(&mut self, session: &mut Session) -> Result<(), EngineError> {
        let chunks = match self.source.as_mut() {
            Some(source) => chunk_stream(source.as_mut(), self.mss)?,
            None => Vec::new(),
        };
        self.source = None;

        let bytes: usize = chunks.iter().map(Vec::len).sum();
        log::info!(
            "[{}] read {bytes} byte(s) into {} segment(s)",
            session.id,
            chunks.len()
        );
        self.window = Some(SendWindow::new(chunks, self.max_in_flight));
        self.send_control(session, ack::syn(&session.id, &session.peer));
        session.advance(ConnectionPhase::Handshaking);
        Ok(())
    }

    /// Run the window for one tick, or start teardown once it is done.
    fn pump(&mut self, session: &mut Session, now: Instant) {
        let Some(window) = self.window.as_mut() else {
            return;
        };
        if window.is_complete() {
            log::info!(
                "[{}] all {} segment(s) acknowledged; sending FIN",
                session.id,
                window.len()
            );
            self.window = None;
            self.send_control(session, ack::fin(&session.id, &session.peer));
            session.advance(ConnectionPhase::Terminating);
            return;
        }
        for seq in window.poll(now, self.timer.timeout()) {
            session.enqueue(Outbound::Data(seq));
        }
    }

    fn send_control(&mut self, session: &mut Session, segment: Segment) {
        self.control = SegmentStatus::Queued;
        session.enqueue(Outbound::Tracked(segment));
    }

    fn resend_control_if_expired(
        &mut self,
        session: &mut Session,
        now: Instant,
        build: fn(&EndpointId, &EndpointId) -> Segment,
    ) {
        if !self.control.is_expired(now, self.timer.timeout()) {
            return;
        }
        let segment = build(&session.id, &session.peer);
        log::debug!(
            "[{}] no reply to {:?} within {:?}; re-sending",
            session.id,
            segment.kind(),
            self.timer.timeout()
        );
        session.stats.retransmissions += 1;
        self.send_control(session, segment);
    }

    fn transmit<L: Link + ?Sized>(&mut self, session: &mut Session, link: &mut L, now: Instant) {
        let phase = session.phase;
        let (me, peer) = (session.id.clone(), session.peer.clone());
        let control = &mut self.control;
        let window = &mut self.window;

        session.transmit_next(link, |entry, stats| match entry {
            Outbound::Control(segment) => Some(segment),
            Outbound::Tracked(segment) => {
                let current = matches!(
                    (phase, segment.kind()),
                    (ConnectionPhase::Handshaking, SegmentKind::Syn)
                        | (ConnectionPhase::Terminating, SegmentKind::Fin)
                );
                if !current || *control != SegmentStatus::Queued {
                    return None;
                }
                *control = SegmentStatus::InFlight { sent_at: now };
                Some(segment)
            }
            Outbound::Data(seq) => {
                let record = window.as_mut()?.mark_sent(seq, now)?;
                if record.tx_count > 1 {
                    stats.retransmissions += 1;
                }
                Some(Segment::data(me.clone(), peer.clone(), seq, record.payload.clone()))
            }
        });
    }
}

// ---------------------------------------------------------------------------
// Receiver role
// ---------------------------------------------------------------------------

/// State held only by the receiving endpoint.
pub struct ReceiverState {
    sink: Box<dyn Write>,
    /// Lives from the first SYN until the stream is committed to the sink.
    buffer: Option<ReceiveBuffer>,
    /// Bytes written to the sink, once the flush has happened.
    delivered: Option<usize>,
    max_reorder_slots: usize,
}

impl ReceiverState {
    fn new(sink: Box<dyn Write>, config: &EngineConfig) -> Self {
        Self {
            sink,
            buffer: None,
            delivered: None,
            max_reorder_slots: config.max_reorder_slots,
        }
    }

    fn on_segment(&mut self, session: &mut Session, segment: Segment) -> Result<(), EngineError> {
        let kind = segment.kind();
        if matches!(kind, SegmentKind::Data | SegmentKind::Fin)
            && session.phase == ConnectionPhase::Handshaking
        {
            // The handshake ACK was lost but the sender is already past it.
            log::debug!(
                "[{}] {kind:?} before handshake ACK; treating handshake as complete",
                session.id
            );
            session.advance(ConnectionPhase::Established);
        }

        match (kind, session.phase) {
            (SegmentKind::Syn, ConnectionPhase::Closed) if !session.finished => {
                self.buffer = Some(ReceiveBuffer::new(self.max_reorder_slots));
                session.enqueue(Outbound::Control(ack::syn_ack(&session.id, &session.peer)));
                session.advance(ConnectionPhase::Handshaking);
            }
            (SegmentKind::Syn, ConnectionPhase::Handshaking) => {
                log::debug!("[{}] repeated SYN; re-sending SYN-ACK", session.id);
                session.enqueue(Outbound::Control(ack::syn_ack(&session.id, &session.peer)));
            }
            (SegmentKind::Ack, ConnectionPhase::Handshaking) => {
                session.advance(ConnectionPhase::Established);
            }
            (SegmentKind::Ack, ConnectionPhase::Terminating) => {
                session.advance(ConnectionPhase::Closed);
                log::info!("[{}] connection closed", session.id);
            }
            (SegmentKind::Data, ConnectionPhase::Established | ConnectionPhase::Terminating) => {
                self.on_data(session, segment);
            }
            (SegmentKind::Fin, ConnectionPhase::Established) => {
                self.flush(session)?;
                session.enqueue(Outbound::Control(ack::fin_ack(&session.id, &session.peer)));
                session.advance(ConnectionPhase::Terminating);
            }
            (SegmentKind::Fin, ConnectionPhase::Terminating) => {
                log::debug!("[{}] repeated FIN; re-sending FIN-ACK", session.id);
                session.enqueue(Outbound::Control(ack::fin_ack(&session.id, &session.peer)));
            }
            (SegmentKind::Fin, ConnectionPhase::Closed) if session.finished => {
                log::debug!("[{}] FIN after close; re-sending FIN-ACK", session.id);
                session.enqueue(Outbound::Control(ack::fin_ack(&session.id, &session.peer)));
            }
            (SegmentKind::Malformed, _) => session.reject(&segment),
            _ => session.ignore(&segment),
        }
        Ok(())
    }

    /// Store the payload (first writer wins) and ACK the sequence number.
    fn on_data(&mut self, session: &mut Session, segment: Segment) {
        let seq = segment.seq;
        match self.buffer.as_mut() {
            Some(buffer) => match buffer.store(seq, segment.payload.unwrap_or_default()) {
                StoreOutcome::Stored => session.stats.segments_stored += 1,
                StoreOutcome::Duplicate => {
                    session.stats.duplicate_segments += 1;
                    log::debug!("[{}] duplicate data seq={seq}", session.id);
                }
                StoreOutcome::OutOfRange => {
                    log::warn!(
                        "[{}] seq={seq} beyond {} reorder slots; dropping",
                        session.id,
                        self.max_reorder_slots
                    );
                    return;
                }
            },
            // Late retransmission after the stream was committed.
            None => session.stats.duplicate_segments += 1,
        }
        session.stats.data_acks_generated += 1;
        session.enqueue(Outbound::Control(ack::data_ack(&session.id, &session.peer, seq)));
    }

    /// Commit the reorder buffer to the sink and release it.
    ///
    /// On a sink error the buffer is kept, with its write position, for the
    /// peer's next FIN.
    fn flush(&mut self, session: &mut Session) -> Result<(), EngineError> {
        let written = match &mut self.buffer {
            Some(buffer) => buffer.flush_to(self.sink.as_mut()).inspect_err(|err| {
                log::error!("[{}] cannot commit stream: {err}", session.id);
            })?,
            None => 0,
        };
        let segments = self.buffer.take().map_or(0, |b| b.len());
        self.delivered = Some(written);
        log::info!(
            "[{}] committed {written} byte(s) from {segments} segment(s) to sink",
            session.id
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Endpoint
// ---------------------------------------------------------------------------

/// What an endpoint does with the stream.
pub enum Role {
    Sender(SenderState),
    Receiver(ReceiverState),
}

/// One side of the connection.
pub struct Endpoint {
    session: Session,
    role: Role,
}

impl Endpoint {
    /// Create the sending endpoint `id`, which will stream `source` to `peer`.
    pub fn sender(
        id: impl Into<EndpointId>,
        peer: impl Into<EndpointId>,
        source: impl Read + 'static,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            session: Session::new(id.into(), peer.into()),
            role: Role::Sender(SenderState::new(Box::new(source), &config)),
        })
    }

    /// Create the receiving endpoint `id`, which will write `peer`'s stream
    /// into `sink`.
    pub fn receiver(
        id: impl Into<EndpointId>,
        peer: impl Into<EndpointId>,
        sink: impl Write + 'static,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            session: Session::new(id.into(), peer.into()),
            role: Role::Receiver(ReceiverState::new(Box::new(sink), &config)),
        })
    }

    pub fn id(&self) -> &EndpointId {
        &self.session.id
    }

    pub fn peer(&self) -> &EndpointId {
        &self.session.peer
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.session.phase
    }

    /// `true` once the connection has been torn down on this side.
    pub fn is_finished(&self) -> bool {
        self.session.finished
    }

    pub fn stats(&self) -> &Stats {
        &self.session.stats
    }

    /// Packets waiting for a send tick.
    pub fn pending_outbound(&self) -> usize {
        self.session.outbound.len()
    }

    /// Data segments holding an in-flight slot (always 0 for a receiver).
    pub fn in_flight(&self) -> usize {
        match &self.role {
            Role::Sender(s) => s.window.as_ref().map_or(0, SendWindow::in_flight),
            Role::Receiver(_) => 0,
        }
    }

    /// Total data segments in the stream, once the sender has read it.
    pub fn stream_segments(&self) -> Option<usize> {
        match &self.role {
            Role::Sender(s) => s.window.as_ref().map(SendWindow::len),
            Role::Receiver(_) => None,
        }
    }

    /// Slots in the reorder buffer, while it exists.
    pub fn buffered_slots(&self) -> Option<usize> {
        match &self.role {
            Role::Receiver(r) => r.buffer.as_ref().map(ReceiveBuffer::len),
            Role::Sender(_) => None,
        }
    }

    /// Bytes committed to the sink, once the receiver has flushed.
    pub fn delivered_bytes(&self) -> Option<usize> {
        match &self.role {
            Role::Receiver(r) => r.delivered,
            Role::Sender(_) => None,
        }
    }

    /// Receive-side entry point: take at most one segment off the link and
    /// process it.
    ///
    /// A finished endpoint still answers a repeated FIN-ACK (sender) or FIN
    /// (receiver), without any transition, so a peer whose last reply was
    /// lost can close too.
    pub fn on_receive_tick<L: Link + ?Sized>(
        &mut self,
        link: &mut L,
        now: Instant,
    ) -> Result<(), EngineError> {
        let Some(segment) = link.receive(&self.session.id) else {
            return Ok(());
        };
        log::debug!("[{}] ← {}", self.session.id, segment);
        self.session.stats.segments_received += 1;

        if segment.dst != self.session.id || segment.src != self.session.peer {
            self.session.reject(&segment);
            return Ok(());
        }

        match &mut self.role {
            Role::Sender(s) => {
                s.on_segment(&mut self.session, segment, now);
                Ok(())
            }
            Role::Receiver(r) => r.on_segment(&mut self.session, segment),
        }
    }

    /// Send-side entry point: advance the role's timers and window, then put
    /// at most one queued packet on the link.
    pub fn on_send_tick<L: Link + ?Sized>(
        &mut self,
        link: &mut L,
        now: Instant,
    ) -> Result<(), EngineError> {
        match &mut self.role {
            Role::Sender(s) => {
                if !self.session.finished {
                    s.on_tick(&mut self.session, now)?;
                }
                s.transmit(&mut self.session, link, now);
            }
            Role::Receiver(_) => {
                self.session.transmit_next(link, |entry, _| match entry {
                    Outbound::Control(segment) => Some(segment),
                    Outbound::Tracked(_) | Outbound::Data(_) => None,
                });
            }
        }
        Ok(())
    }
}
