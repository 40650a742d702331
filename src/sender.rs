//! Outbound segment state: stream chunking and the send window.
//!
//! [`SendWindow`] tracks every segment of the stream at once.  The whole
//! source is read and chunked before the handshake completes, so the window
//! never slides; what is bounded is how many of its records may hold an
//! in-flight slot at the same time.
//!
//! It does **not** touch the link; [`crate::connection`] asks it which
//! sequence numbers to queue ([`SendWindow::poll`]), tells it when one
//! actually went out ([`SendWindow::mark_sent`]), and feeds it ACKs
//! ([`SendWindow::acknowledge`]).
//!
//! # Window contract
//! - At most `max_in_flight` records are `Queued` or `InFlight`.
//! - An `InFlight` record older than the timeout is re-queued and keeps its
//!   slot.
//! - An ACK retires exactly one record; a second ACK for it is a no-op.

use std::io::{self, Read};
use std::time::{Duration, Instant};

use crate::ack::AckOutcome;
use crate::timer::SegmentStatus;

/// Read `source` to exhaustion in pieces of at most `mss` bytes.
///
/// Every returned chunk is non-empty; an empty source yields no chunks.
pub fn chunk_stream<R: Read + ?Sized>(source: &mut R, mss: usize) -> io::Result<Vec<Vec<u8>>> {
    let mut chunks = Vec::new();
    loop {
        let mut chunk = Vec::with_capacity(mss);
        Read::take(&mut *source, mss as u64).read_to_end(&mut chunk)?;
        if chunk.is_empty() {
            return Ok(chunks);
        }
        chunks.push(chunk);
    }
}

// ---------------------------------------------------------------------------
// SendRecord
// ---------------------------------------------------------------------------

/// One segment of the stream and its transmission state.
#[derive(Debug, Clone)]
pub struct SendRecord {
    pub payload: Vec<u8>,
    pub status: SegmentStatus,
    /// Times this segment has been put on the link.
    pub tx_count: u32,
}

// ---------------------------------------------------------------------------
// SendWindow
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct SendWindow {
    records: Vec<SendRecord>,
    max_in_flight: usize,
    /// Records currently `Queued` or `InFlight`.
    in_flight: usize,
    acknowledged: usize,
}

impl SendWindow {
    /// Create a window over pre-chunked `payloads`, numbered from 0.
    pub fn new(payloads: Vec<Vec<u8>>, max_in_flight: usize) -> Self {
        debug_assert!(max_in_flight >= 1, "max_in_flight must be at least 1");
        let records = payloads
            .into_iter()
            .map(|payload| SendRecord {
                payload,
                status: SegmentStatus::Unsent,
                tx_count: 0,
            })
            .collect();
        Self {
            records,
            max_in_flight,
            in_flight: 0,
            acknowledged: 0,
        }
    }

    /// Total number of segments in the stream.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Segments holding an in-flight slot (queued or on the link).
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn acknowledged(&self) -> usize {
        self.acknowledged
    }

    /// `true` once every segment has been acknowledged.
    pub fn is_complete(&self) -> bool {
        self.acknowledged == self.records.len()
    }

    pub fn status(&self, seq: u32) -> Option<SegmentStatus> {
        self.records.get(seq as usize).map(|r| r.status)
    }

    /// Decide which segments go to the outbound queue this tick.
    ///
    /// Expired in-flight segments are re-queued first-come by sequence
    /// number; unsent segments are queued while slots remain.  Returned
    /// sequence numbers are now `Queued`.
    pub fn poll(&mut self, now: Instant, timeout: Duration) -> Vec<u32> {
        let mut ready = Vec::new();
        for (seq, record) in self.records.iter_mut().enumerate() {
            let status = record.status;
            match status {
                SegmentStatus::InFlight { .. } if status.is_expired(now, timeout) => {
                    log::debug!(
                        "seq={seq} timed out after {} transmission(s); re-queueing",
                        record.tx_count
                    );
                    record.status = SegmentStatus::Queued;
                    ready.push(seq as u32);
                }
                SegmentStatus::Unsent if self.in_flight < self.max_in_flight => {
                    record.status = SegmentStatus::Queued;
                    self.in_flight += 1;
                    ready.push(seq as u32);
                }
                _ => {}
            }
        }
        debug_assert_eq!(
            self.in_flight,
            self.records.iter().filter(|r| r.status.holds_slot()).count()
        );
        ready
    }

    /// Record that queued segment `seq` is being put on the link at `now`.
    ///
    /// Returns the record so the caller can build the segment, or `None` if
    /// the segment was acknowledged while it waited in the queue.
    pub fn mark_sent(&mut self, seq: u32, now: Instant) -> Option<&SendRecord> {
        let record = self.records.get_mut(seq as usize)?;
        if record.status != SegmentStatus::Queued {
            return None;
        }
        record.status = SegmentStatus::InFlight { sent_at: now };
        record.tx_count += 1;
        Some(&*record)
    }

    /// Apply a per-segment ACK for `seq` received at `now`.
    pub fn acknowledge(&mut self, seq: u32, now: Instant) -> AckOutcome {
        let Some(record) = self.records.get_mut(seq as usize) else {
            return AckOutcome::Unknown;
        };
        let rtt_sample = match record.status {
            SegmentStatus::Acknowledged => return AckOutcome::Duplicate,
            SegmentStatus::Unsent => return AckOutcome::Unknown,
            SegmentStatus::InFlight { sent_at } if record.tx_count == 1 => {
                Some(now.saturating_duration_since(sent_at))
            }
            _ => None,
        };
        if record.status.holds_slot() {
            self.in_flight -= 1;
        }
        record.status = SegmentStatus::Acknowledged;
        self.acknowledged += 1;
        AckOutcome::Retired { rtt_sample }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(500);

    fn window(n: usize, max_in_flight: usize) -> SendWindow {
        SendWindow::new((0..n).map(|i| vec![i as u8; 4]).collect(), max_in_flight)
    }

    #[test]
    fn chunking_respects_mss() {
        let data: Vec<u8> = (0..25).collect();
        let chunks = chunk_stream(&mut data.as_slice(), 10).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], (0..10).collect::<Vec<u8>>());
        assert_eq!(chunks[2], (20..25).collect::<Vec<u8>>());
    }

    #[test]
    fn empty_source_yields_no_chunks() {
        let chunks = chunk_stream(&mut io::empty(), 10).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn initial_state() {
        let w = window(3, 2);
        assert_eq!(w.len(), 3);
        assert_eq!(w.in_flight(), 0);
        assert!(!w.is_complete());
        assert_eq!(w.status(0), Some(SegmentStatus::Unsent));
    }

    #[test]
    fn poll_fills_only_free_slots() {
        let mut w = window(5, 2);
        let now = Instant::now();
        assert_eq!(w.poll(now, TIMEOUT), vec![0, 1]);
        assert_eq!(w.in_flight(), 2);
        // No slots left, nothing expired.
        assert!(w.poll(now, TIMEOUT).is_empty());
    }

    #[test]
    fn ack_frees_slot_for_next_segment() {
        let mut w = window(3, 1);
        let now = Instant::now();
        assert_eq!(w.poll(now, TIMEOUT), vec![0]);
        w.mark_sent(0, now).unwrap();
        assert!(matches!(w.acknowledge(0, now), AckOutcome::Retired { .. }));
        assert_eq!(w.in_flight(), 0);
        assert_eq!(w.poll(now, TIMEOUT), vec![1]);
    }

    #[test]
    fn expired_segment_is_requeued_without_new_slot() {
        let mut w = window(3, 1);
        let t0 = Instant::now();
        w.poll(t0, TIMEOUT);
        w.mark_sent(0, t0).unwrap();

        assert!(w.poll(t0 + TIMEOUT, TIMEOUT).is_empty());
        assert_eq!(w.poll(t0 + TIMEOUT * 2, TIMEOUT), vec![0]);
        assert_eq!(w.status(0), Some(SegmentStatus::Queued));
        assert_eq!(w.in_flight(), 1);

        let record = w.mark_sent(0, t0 + TIMEOUT * 2).unwrap();
        assert_eq!(record.tx_count, 2);
    }

    #[test]
    fn duplicate_ack_decrements_once() {
        let mut w = window(2, 5);
        let now = Instant::now();
        w.poll(now, TIMEOUT);
        w.mark_sent(0, now).unwrap();

        assert!(matches!(w.acknowledge(0, now), AckOutcome::Retired { .. }));
        assert_eq!(w.acknowledge(0, now), AckOutcome::Duplicate);
        assert_eq!(w.in_flight(), 1);
        assert_eq!(w.acknowledged(), 1);
    }

    #[test]
    fn ack_for_unknown_or_unsent_segment_is_ignored() {
        let mut w = window(2, 1);
        assert_eq!(w.acknowledge(9, Instant::now()), AckOutcome::Unknown);
        assert_eq!(w.acknowledge(1, Instant::now()), AckOutcome::Unknown);
        assert_eq!(w.in_flight(), 0);
    }

    #[test]
    fn ack_while_requeued_skips_pending_send() {
        let mut w = window(1, 1);
        let t0 = Instant::now();
        w.poll(t0, TIMEOUT);
        w.mark_sent(0, t0).unwrap();
        w.poll(t0 + TIMEOUT * 2, TIMEOUT);

        assert!(matches!(
            w.acknowledge(0, t0 + TIMEOUT * 2),
            AckOutcome::Retired { rtt_sample: None }
        ));
        assert!(w.mark_sent(0, t0 + TIMEOUT * 2).is_none());
        assert!(w.is_complete());
    }

    #[test]
    fn rtt_sample_only_for_single_transmission() {
        let mut w = window(1, 1);
        let t0 = Instant::now();
        w.poll(t0, TIMEOUT);
        w.mark_sent(0, t0).unwrap();
        let outcome = w.acknowledge(0, t0 + Duration::from_millis(120));
        assert_eq!(
            outcome,
            AckOutcome::Retired {
                rtt_sample: Some(Duration::from_millis(120))
            }
        );
    }

    #[test]
    fn empty_window_is_complete() {
        assert!(window(0, 3).is_complete());
    }
}
