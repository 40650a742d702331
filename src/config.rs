//! Engine configuration.
//!
//! One [`EngineConfig`] is shared by both roles.  The defaults match the
//! protocol's nominal operating point: 1000-byte segments, five segments in
//! flight, and a one second retransmission timeout.

use std::time::Duration;

use crate::error::ConfigError;
use crate::packet::MAX_PAYLOAD;

/// How the sender derives the retransmission timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum TimeoutPolicy {
    /// Always wait exactly `send_timeout`.
    #[default]
    Fixed,
    /// Estimate the timeout from measured round trips (RFC 6298), never
    /// below `send_timeout` nor above `max_timeout`.
    Adaptive,
}

/// Tunables for one endpoint.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum payload bytes per data segment.
    pub mss: usize,
    /// Upper bound on data segments queued or in flight at once.
    pub max_in_flight: usize,
    /// Retransmission timeout (the floor when adaptive).
    pub send_timeout: Duration,
    /// Ceiling for the adaptive timeout.
    pub max_timeout: Duration,
    pub timeout_policy: TimeoutPolicy,
    /// Largest sequence number + 1 the receiver will allocate a slot for.
    pub max_reorder_slots: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mss: 1000,
            max_in_flight: 5,
            send_timeout: Duration::from_secs(1),
            max_timeout: Duration::from_secs(60),
            timeout_policy: TimeoutPolicy::Fixed,
            max_reorder_slots: 1 << 20,
        }
    }
}

impl EngineConfig {
    /// Check every parameter, returning the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mss == 0 {
            return Err(ConfigError::ZeroMss);
        }
        if self.mss > MAX_PAYLOAD {
            return Err(ConfigError::MssTooLarge(self.mss));
        }
        if self.max_in_flight == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        if self.send_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.max_timeout < self.send_timeout {
            return Err(ConfigError::TimeoutCeilingBelowFloor {
                floor: self.send_timeout,
                ceiling: self.max_timeout,
            });
        }
        if self.max_reorder_slots == 0 {
            return Err(ConfigError::ZeroReorderSlots);
        }
        Ok(())
    }
}
