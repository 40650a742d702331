//! In-memory network simulator for deterministic testing.
//!
//! Real networks drop, reorder, and duplicate packets.  To exercise the
//! reliability mechanisms without depending on actual network conditions,
//! [`LossyLink`] implements [`Link`] over one FIFO per destination endpoint
//! and applies a configurable fault model on every `send`:
//!
//! | Fault            | Description                                      |
//! |------------------|--------------------------------------------------|
//! | Packet loss      | Drop a packet with probability `loss_rate`.      |
//! | Duplication      | Deliver a packet twice.                          |
//! | Reordering       | Slip a packet in ahead of the last one queued    |
//! |                  | for the same destination.                        |
//!
//! All randomness comes from a `StdRng` seeded from [`SimulatorConfig::seed`],
//! so a failing run is reproduced by rerunning with the same seed.  Tests that
//! need one particular packet lost use [`LossyLink::drop_once`] instead.

use std::collections::{HashMap, VecDeque};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::link::Link;
use crate::packet::{EndpointId, Segment};

/// Configuration for the fault-injection model.
///
/// All probabilities are in the range `[0.0, 1.0]`; values outside it are
/// clamped.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Probability that any given packet is silently dropped.
    pub loss_rate: f64,
    /// Probability that a delivered packet is delivered twice.
    pub duplicate_rate: f64,
    /// Probability that a packet overtakes the one queued before it.
    pub reorder_rate: f64,
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // No faults: a transparent pass-through.
        Self {
            loss_rate: 0.0,
            duplicate_rate: 0.0,
            reorder_rate: 0.0,
            seed: 0x5eed,
        }
    }
}

impl SimulatorConfig {
    /// Loss only, at `loss_rate`, from `seed`.
    pub fn lossy(loss_rate: f64, seed: u64) -> Self {
        Self {
            loss_rate,
            seed,
            ..Default::default()
        }
    }
}

/// What the link did with the traffic it was handed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Segments handed to `send`, including ones later dropped.
    pub segments_sent: u64,
    /// Encoded bytes handed to `send`.
    pub bytes_sent: u64,
    pub dropped: u64,
    pub duplicated: u64,
    pub reordered: u64,
    pub delivered: u64,
}

type DropRule = Box<dyn FnMut(&Segment) -> bool>;

/// A fault-injecting in-memory [`Link`].
pub struct LossyLink {
    config: SimulatorConfig,
    rng: StdRng,
    queues: HashMap<EndpointId, VecDeque<Segment>>,
    drop_rules: Vec<DropRule>,
    stats: LinkStats,
}

impl LossyLink {
    pub fn new(config: SimulatorConfig) -> Self {
        let config = SimulatorConfig {
            loss_rate: config.loss_rate.clamp(0.0, 1.0),
            duplicate_rate: config.duplicate_rate.clamp(0.0, 1.0),
            reorder_rate: config.reorder_rate.clamp(0.0, 1.0),
            seed: config.seed,
        };
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            queues: HashMap::new(),
            drop_rules: Vec::new(),
            stats: LinkStats::default(),
        }
    }

    /// A link that delivers everything, in order, exactly once.
    pub fn perfect() -> Self {
        Self::new(SimulatorConfig::default())
    }

    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    /// Drop the first future segment matching `rule`, then forget the rule.
    pub fn drop_once(&mut self, rule: impl FnMut(&Segment) -> bool + 'static) {
        self.drop_rules.push(Box::new(rule));
    }

    /// Deliver `segment` straight to its destination's queue, bypassing the
    /// fault model and the counters.
    pub fn inject(&mut self, segment: Segment) {
        self.queues
            .entry(segment.dst.clone())
            .or_default()
            .push_back(segment);
    }

    /// Segments waiting for endpoint `at`.
    pub fn pending(&self, at: &EndpointId) -> usize {
        self.queues.get(at).map_or(0, VecDeque::len)
    }

    fn deliver(&mut self, segment: Segment) {
        let queue = self.queues.entry(segment.dst.clone()).or_default();
        if !queue.is_empty() && self.rng.random_bool(self.config.reorder_rate) {
            let last = queue.len() - 1;
            queue.insert(last, segment);
            self.stats.reordered += 1;
        } else {
            queue.push_back(segment);
        }
    }
}

impl Link for LossyLink {
    fn send(&mut self, segment: Segment, from: &EndpointId) {
        self.stats.segments_sent += 1;
        self.stats.bytes_sent += segment.encoded_len() as u64;

        if let Some(idx) = self.drop_rules.iter_mut().position(|rule| (*rule)(&segment)) {
            self.drop_rules.remove(idx);
            self.stats.dropped += 1;
            log::debug!("[sim] scripted drop from {from}: {segment}");
            return;
        }
        if self.rng.random_bool(self.config.loss_rate) {
            self.stats.dropped += 1;
            log::debug!("[sim] lost from {from}: {segment}");
            return;
        }

        if self.rng.random_bool(self.config.duplicate_rate) {
            self.stats.duplicated += 1;
            log::debug!("[sim] duplicating: {segment}");
            self.deliver(segment.clone());
        }
        self.deliver(segment);
    }

    fn receive(&mut self, at: &EndpointId) -> Option<Segment> {
        let segment = self.queues.get_mut(at)?.pop_front()?;
        self.stats.delivered += 1;
        Some(segment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::flags;

    fn seg(seq: u32) -> Segment {
        Segment::data("A".into(), "B".into(), seq, vec![seq as u8])
    }

    fn drain(link: &mut LossyLink, at: &str) -> Vec<u32> {
        let at = EndpointId::from(at);
        std::iter::from_fn(|| link.receive(&at)).map(|s| s.seq).collect()
    }

    #[test]
    fn perfect_link_is_fifo_per_destination() {
        let mut link = LossyLink::perfect();
        let a = EndpointId::from("A");
        for seq in 0..3 {
            link.send(seg(seq), &a);
        }
        link.send(
            Segment::control("B".into(), "A".into(), 0, 0, flags::ACK),
            &"B".into(),
        );
        assert_eq!(drain(&mut link, "B"), vec![0, 1, 2]);
        assert_eq!(drain(&mut link, "A"), vec![0]);
        assert_eq!(link.stats().delivered, 4);
    }

    #[test]
    fn drop_once_fires_a_single_time() {
        let mut link = LossyLink::perfect();
        link.drop_once(|s| s.seq == 1);
        let a = EndpointId::from("A");
        for seq in [0, 1, 1, 2] {
            link.send(seg(seq), &a);
        }
        assert_eq!(drain(&mut link, "B"), vec![0, 1, 2]);
        assert_eq!(link.stats().dropped, 1);
    }

    #[test]
    fn full_loss_drops_everything() {
        let mut link = LossyLink::new(SimulatorConfig::lossy(1.0, 7));
        link.send(seg(0), &"A".into());
        assert_eq!(link.pending(&"B".into()), 0);
        assert_eq!(link.stats().bytes_sent, seg(0).encoded_len() as u64);
    }

    #[test]
    fn full_duplication_delivers_twice() {
        let mut link = LossyLink::new(SimulatorConfig {
            duplicate_rate: 1.0,
            ..Default::default()
        });
        link.send(seg(4), &"A".into());
        assert_eq!(drain(&mut link, "B"), vec![4, 4]);
    }

    #[test]
    fn same_seed_same_faults() {
        let run = |seed| {
            let mut link = LossyLink::new(SimulatorConfig {
                loss_rate: 0.3,
                reorder_rate: 0.3,
                seed,
                ..Default::default()
            });
            for seq in 0..50 {
                link.send(seg(seq), &"A".into());
            }
            drain(&mut link, "B")
        };
        assert_eq!(run(11), run(11));
    }
}
