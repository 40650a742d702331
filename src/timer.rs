//! Per-segment transmission status and the retransmission timeout.
//!
//! Timers are never armed as real events.  A segment's [`SegmentStatus`]
//! records when it was last put on the link, and the sender compares that
//! timestamp against the tick's `now` on every send tick.  This module
//! provides:
//! - [`SegmentStatus`]: the tagged lifecycle of one data or control segment.
//! - [`RetransmitTimer`]: the timeout those timestamps are compared against,
//!   either fixed or estimated from round-trip samples.
//!
//! The adaptive estimator follows Jacobson's algorithm (RFC 6298):
//!   `RTO = SRTT + 4 × RTTVAR`
//! clamped between the configured floor and ceiling.  Timeouts do not back
//! off: a lost segment is resent after the same timeout as the first time.

use std::time::{Duration, Instant};

use crate::config::{EngineConfig, TimeoutPolicy};

// ---------------------------------------------------------------------------
// SegmentStatus
// ---------------------------------------------------------------------------

/// Transmission state of one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentStatus {
    /// Never offered to the outbound queue.
    Unsent,
    /// Sitting in the outbound queue; already holds an in-flight slot.
    Queued,
    /// On the link since `sent_at`, awaiting its ACK.
    InFlight { sent_at: Instant },
    /// Retired by an ACK.  Final.
    Acknowledged,
}

impl SegmentStatus {
    /// Whether this segment counts against `max_in_flight`.
    pub fn holds_slot(self) -> bool {
        matches!(self, Self::Queued | Self::InFlight { .. })
    }

    /// `true` if the segment has been on the link for longer than `timeout`.
    pub fn is_expired(self, now: Instant, timeout: Duration) -> bool {
        match self {
            Self::InFlight { sent_at } => now.saturating_duration_since(sent_at) > timeout,
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// RetransmitTimer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct RttEstimate {
    srtt: Duration,
    rttvar: Duration,
}

/// The retransmission timeout shared by every segment of one sender.
#[derive(Debug, Clone)]
pub struct RetransmitTimer {
    policy: TimeoutPolicy,
    floor: Duration,
    ceiling: Duration,
    current: Duration,
    estimate: Option<RttEstimate>,
}

impl RetransmitTimer {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            policy: config.timeout_policy,
            floor: config.send_timeout,
            ceiling: config.max_timeout,
            current: config.send_timeout,
            estimate: None,
        }
    }

    /// Timeout to compare in-flight timestamps against.
    pub fn timeout(&self) -> Duration {
        self.current
    }

    /// Smoothed RTT, once at least one sample has been taken.
    pub fn srtt(&self) -> Option<Duration> {
        self.estimate.map(|e| e.srtt)
    }

    /// Record a round-trip sample and update SRTT / RTTVAR / RTO (RFC 6298 §2).
    ///
    /// Callers pass only samples from segments sent exactly once, since an
    /// ACK for a retransmitted segment cannot be matched to one send.  A
    /// no-op under [`TimeoutPolicy::Fixed`].
    ///
    /// On the first sample:  SRTT = R,  RTTVAR = R/2.
    /// Subsequent samples:   RTTVAR = 3/4·RTTVAR + 1/4·|SRTT − R|
    ///                       SRTT   = 7/8·SRTT   + 1/8·R
    pub fn record_rtt_sample(&mut self, sample: Duration) {
        if self.policy == TimeoutPolicy::Fixed {
            return;
        }
        let next = match self.estimate {
            None => RttEstimate {
                srtt: sample,
                rttvar: sample / 2,
            },
            Some(RttEstimate { srtt, rttvar }) => RttEstimate {
                rttvar: rttvar * 3 / 4 + sample.abs_diff(srtt) / 4,
                srtt: srtt * 7 / 8 + sample / 8,
            },
        };
        self.estimate = Some(next);
        self.current = (next.srtt + next.rttvar * 4).clamp(self.floor, self.ceiling);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adaptive(floor_ms: u64) -> RetransmitTimer {
        RetransmitTimer::new(&EngineConfig {
            send_timeout: Duration::from_millis(floor_ms),
            max_timeout: Duration::from_secs(10),
            timeout_policy: TimeoutPolicy::Adaptive,
            ..Default::default()
        })
    }

    #[test]
    fn in_flight_expires_only_after_timeout() {
        let t0 = Instant::now();
        let status = SegmentStatus::InFlight { sent_at: t0 };
        let timeout = Duration::from_millis(500);
        assert!(!status.is_expired(t0 + Duration::from_millis(500), timeout));
        assert!(status.is_expired(t0 + Duration::from_millis(600), timeout));
    }

    #[test]
    fn only_in_flight_can_expire() {
        let far = Instant::now() + Duration::from_secs(3600);
        for status in [
            SegmentStatus::Unsent,
            SegmentStatus::Queued,
            SegmentStatus::Acknowledged,
        ] {
            assert!(!status.is_expired(far, Duration::ZERO));
        }
    }

    #[test]
    fn slot_accounting() {
        let t0 = Instant::now();
        assert!(SegmentStatus::Queued.holds_slot());
        assert!(SegmentStatus::InFlight { sent_at: t0 }.holds_slot());
        assert!(!SegmentStatus::Unsent.holds_slot());
        assert!(!SegmentStatus::Acknowledged.holds_slot());
    }

    #[test]
    fn fixed_policy_ignores_samples() {
        let mut timer = RetransmitTimer::new(&EngineConfig::default());
        timer.record_rtt_sample(Duration::from_secs(30));
        assert_eq!(timer.timeout(), Duration::from_secs(1));
        assert_eq!(timer.srtt(), None);
    }

    #[test]
    fn first_sample_sets_rto_to_three_rtt() {
        let mut timer = adaptive(100);
        timer.record_rtt_sample(Duration::from_millis(400));
        // SRTT = 400, RTTVAR = 200 → RTO = 400 + 800.
        assert_eq!(timer.timeout(), Duration::from_millis(1200));
    }

    #[test]
    fn adaptive_timeout_never_drops_below_floor() {
        let mut timer = adaptive(1000);
        for _ in 0..10 {
            timer.record_rtt_sample(Duration::from_millis(10));
        }
        assert_eq!(timer.timeout(), Duration::from_millis(1000));
    }

    #[test]
    fn adaptive_timeout_is_capped() {
        let mut timer = adaptive(100);
        timer.record_rtt_sample(Duration::from_secs(20));
        assert_eq!(timer.timeout(), Duration::from_secs(10));
    }
}
