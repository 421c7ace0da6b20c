//! Lossy radio channel.
//!
//! Every packet crosses the channel once per receiver. A packet may be
//! dropped because the receiver is out of range, by a matching
//! [`DropRule`], or at random with the configured loss probability. Loss
//! is drawn from a seeded RNG so runs are reproducible.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use wavefront_cluster::time::{duration_ms, option_duration_ms};
use wavefront_cluster::{MessageKind, NodeId};

use crate::error::{Result, SimError};

/// Channel parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Probability in `[0, 1]` that a single transmission is lost.
    pub loss_probability: f64,
    /// One-way delivery latency.
    #[serde(with = "duration_ms")]
    pub latency: Duration,
    /// Broadcasts reach only nodes within this distance. `None` reaches
    /// everyone and leaves range filtering to the protocol.
    pub broadcast_range: Option<f64>,
    pub seed: u64,
    /// Extra latency per receiver, drawn uniformly from `[0, jitter]`.
    #[serde(with = "option_duration_ms")]
    pub jitter: Option<Duration>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            loss_probability: 0.0,
            latency: Duration::from_millis(1),
            broadcast_range: None,
            seed: 42,
            jitter: None,
        }
    }
}

impl ChannelConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.loss_probability) {
            return Err(SimError::InvalidChannel(format!(
                "loss_probability {} outside [0, 1]",
                self.loss_probability
            )));
        }
        if let Some(range) = self.broadcast_range {
            if !(range > 0.0) {
                return Err(SimError::InvalidChannel(format!("broadcast_range {range} must be positive")));
            }
        }
        Ok(())
    }
}

/// Drop the next `count` packets from `from` to `to` that carry a message
/// of `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropRule {
    pub from: NodeId,
    pub to: NodeId,
    pub kind: MessageKind,
    #[serde(default = "one")]
    pub count: u32,
}

fn one() -> u32 {
    1
}

impl DropRule {
    pub fn once(from: NodeId, to: NodeId, kind: MessageKind) -> Self {
        Self { from, to, kind, count: 1 }
    }

    fn matches(&self, from: NodeId, to: NodeId, kinds: &[MessageKind]) -> bool {
        self.count > 0 && self.from == from && self.to == to && kinds.contains(&self.kind)
    }
}

/// Why a transmission did not arrive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Random loss.
    Loss,
    /// A [`DropRule`] fired.
    Rule,
    /// Receiver outside the broadcast range.
    OutOfRange,
    /// Destination is not in the directory.
    UnknownNode,
    /// Receiver left the network before delivery.
    Departed,
}

/// Outcome of one transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Deliver { latency: Duration },
    Drop(DropReason),
}

/// Seeded lossy channel.
#[derive(Debug)]
pub struct UnreliableChannel {
    config: ChannelConfig,
    rules: Vec<DropRule>,
    rng: StdRng,
}

impl UnreliableChannel {
    pub fn new(config: ChannelConfig) -> Result<Self> {
        config.validate()?;
        let rng = StdRng::seed_from_u64(config.seed);
        Ok(Self {
            config,
            rules: Vec::new(),
            rng,
        })
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn add_rule(&mut self, rule: DropRule) {
        self.rules.push(rule);
    }

    /// Rules that still have drops left.
    pub fn pending_rules(&self) -> impl Iterator<Item = &DropRule> {
        self.rules.iter().filter(|r| r.count > 0)
    }

    /// Decide the fate of one transmission. `distance` is `None` for
    /// point-to-point sends, which ignore the broadcast range.
    pub fn transmit(&mut self, from: NodeId, to: NodeId, kinds: &[MessageKind], distance: Option<f64>) -> Verdict {
        if let (Some(range), Some(d)) = (self.config.broadcast_range, distance) {
            if d > range {
                return Verdict::Drop(DropReason::OutOfRange);
            }
        }

        if let Some(rule) = self.rules.iter_mut().find(|r| r.matches(from, to, kinds)) {
            rule.count -= 1;
            return Verdict::Drop(DropReason::Rule);
        }

        if self.config.loss_probability > 0.0 && self.rng.gen::<f64>() < self.config.loss_probability {
            return Verdict::Drop(DropReason::Loss);
        }

        let jitter = match self.config.jitter {
            Some(max) if !max.is_zero() => max.mul_f64(self.rng.gen::<f64>()),
            _ => Duration::ZERO,
        };
        Verdict::Deliver {
            latency: self.config.latency + jitter,
        }
    }
}
