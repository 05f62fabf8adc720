//! Capture socket lifecycle: `RingOpt`, cluster membership, bloom sets, and
//! the socket-option surface used to configure per-ring filtering.

use crate::bitmask::BitmaskSet;
use crate::config::RuntimeConfig;
use crate::error::{Result, RingtapError};
use crate::filter::Program;
use crate::matcher::{Automaton, AutomatonKind, RowFormat};
use crate::ring::CaptureRing;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Opaque identifier for a bound network device.
pub type DeviceId = u32;

/// Opaque identifier for a ring within a [`crate::dispatch::CaptureRuntime`].
pub type RingId = u32;

/// Which traffic direction a ring accepts, independent of the global
/// transmit-capture module parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Only frames received on the device.
    #[default]
    RxOnly,
    /// Only frames transmitted on the device.
    TxOnly,
    /// Both directions.
    RxAndTx,
}

/// How a cluster selects a member for a given frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashingMode {
    /// Monotonic counter modulo member count.
    RoundRobin,
    /// 5-tuple hash modulo member count; preserves per-flow ordering.
    PerFlow,
}

/// Maximum members a cluster may hold.
pub const MAX_CLUSTER_MEMBERS: usize = 8;

/// A named group of up to [`MAX_CLUSTER_MEMBERS`] sockets sharing one
/// dispatch selection function.
pub struct Cluster {
    /// Cluster identifier, as passed to `ADD_TO_CLUSTER`.
    pub cluster_id: u16,
    /// How members are selected for a given frame.
    pub hashing_mode: HashingMode,
    members: Vec<RingId>,
    round_robin_counter: AtomicU32,
}

impl Cluster {
    /// Create an empty cluster.
    pub fn new(cluster_id: u16, hashing_mode: HashingMode) -> Self {
        Self {
            cluster_id,
            hashing_mode,
            members: Vec::new(),
            round_robin_counter: AtomicU32::new(0),
        }
    }

    /// Current member rings, in join order.
    pub fn members(&self) -> &[RingId] {
        &self.members
    }

    /// Add `ring` as a member. Fails if the cluster is already full.
    pub fn join(&mut self, ring: RingId) -> Result<()> {
        if self.members.len() >= MAX_CLUSTER_MEMBERS {
            return Err(RingtapError::config("cluster is full"));
        }
        self.members.push(ring);
        Ok(())
    }

    /// Remove `ring` from the cluster.
    pub fn leave(&mut self, ring: RingId) {
        self.members.retain(|&m| m != ring);
    }

    /// Whether the cluster has no members left (a candidate for teardown).
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Select a member index for a frame using `flow_key` (the `per_flow`
    /// 5-tuple sum, or packet length for frames without an L4 header).
    /// Returns `None` if the cluster has no members.
    pub fn select(&self, flow_key: u64) -> Option<RingId> {
        if self.members.is_empty() {
            return None;
        }
        let idx = match self.hashing_mode {
            HashingMode::RoundRobin => {
                self.round_robin_counter.fetch_add(1, Ordering::Relaxed) as usize
                    % self.members.len()
            }
            HashingMode::PerFlow => (flow_key % self.members.len() as u64) as usize,
        };
        Some(self.members[idx])
    }
}

/// Simple multiplicative hash used to probe a second bloom set with an
/// independent-looking distribution, reducing false negatives across the
/// `ip`/`twin_ip` and `port`/`twin_port` set pairs.
pub fn sdb_hash(value: u64) -> u64 {
    value.wrapping_mul(0x9E3779B97F4A7C15).rotate_left(31)
}

/// The seven bloom-style membership sets attached to a ring, plus their
/// enable flag.
pub struct BloomSets {
    /// MAC address membership.
    pub mac: BitmaskSet,
    /// VLAN id membership.
    pub vlan: BitmaskSet,
    /// IP address membership.
    pub ip: BitmaskSet,
    /// Auxiliary IP set probed via [`sdb_hash`].
    pub twin_ip: BitmaskSet,
    /// L4 port membership.
    pub port: BitmaskSet,
    /// Auxiliary port set probed via [`sdb_hash`].
    pub twin_port: BitmaskSet,
    /// IP protocol number membership.
    pub proto: BitmaskSet,
    /// Whether the bloom stage is active for this ring.
    pub enabled: bool,
}

const BLOOM_SET_BITS: usize = 4096;

impl Default for BloomSets {
    fn default() -> Self {
        Self {
            mac: BitmaskSet::new(BLOOM_SET_BITS),
            vlan: BitmaskSet::new(BLOOM_SET_BITS),
            ip: BitmaskSet::new(BLOOM_SET_BITS),
            twin_ip: BitmaskSet::new(BLOOM_SET_BITS),
            port: BitmaskSet::new(BLOOM_SET_BITS),
            twin_port: BitmaskSet::new(BLOOM_SET_BITS),
            proto: BitmaskSet::new(BLOOM_SET_BITS),
            enabled: false,
        }
    }
}

impl BloomSets {
    /// Clear every set and its collision tracking. Idempotent.
    pub fn reset(&mut self) {
        self.mac.reset();
        self.vlan.reset();
        self.ip.reset();
        self.twin_ip.reset();
        self.port.reset();
        self.twin_port.reset();
        self.proto.reset();
    }

    /// Insert `value` into `ip` and its twin set.
    pub fn insert_ip(&mut self, value: u32) {
        self.ip.set(value as u64);
        self.twin_ip.set(sdb_hash(value as u64));
    }

    /// Remove `value` from `ip` and its twin set.
    pub fn remove_ip(&mut self, value: u32) {
        self.ip.clear(value as u64);
        self.twin_ip.clear(sdb_hash(value as u64));
    }

    /// Whether `value` is present in `ip` or its twin set.
    pub fn test_ip(&self, value: u32) -> bool {
        self.ip.test(value as u64) || self.twin_ip.test(sdb_hash(value as u64))
    }

    /// Insert `value` into `port` and its twin set.
    pub fn insert_port(&mut self, value: u16) {
        self.port.set(value as u64);
        self.twin_port.set(sdb_hash(value as u64));
    }

    /// Remove `value` from `port` and its twin set.
    pub fn remove_port(&mut self, value: u16) {
        self.port.clear(value as u64);
        self.twin_port.clear(sdb_hash(value as u64));
    }

    /// Whether `value` is present in `port` or its twin set.
    pub fn test_port(&self, value: u16) -> bool {
        self.port.test(value as u64) || self.twin_port.test(sdb_hash(value as u64))
    }
}

/// A bloom rule tag, as used in `SET_BLOOM` rule strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BloomTag {
    /// `vlan`
    Vlan,
    /// `mac`
    Mac,
    /// `ip`
    Ip,
    /// `port`
    Port,
    /// `proto`
    Proto,
}

/// A parsed `SET_BLOOM` rule: `+tag=value` inserts, `-tag=value` removes.
#[derive(Debug, Clone, Copy)]
pub struct BloomRule {
    /// Whether this is an insertion (`true`, `+`) or removal (`false`, `-`).
    pub insert: bool,
    /// Which set the rule targets.
    pub tag: BloomTag,
    /// The raw numeric value, parsed according to `tag`.
    pub value: u64,
}

/// Parse a `SET_BLOOM` rule string of the form `"+tag=value"` or
/// `"-tag=value"`.
pub fn parse_bloom_rule(rule: &str) -> Result<BloomRule> {
    let mut chars = rule.chars();
    let sign = chars.next().ok_or_else(|| RingtapError::malformed_bloom_rule(rule))?;
    let insert = match sign {
        '+' => true,
        '-' => false,
        _ => return Err(RingtapError::malformed_bloom_rule(rule)),
    };
    let rest = chars.as_str();
    let (tag_str, value_str) = rest
        .split_once('=')
        .ok_or_else(|| RingtapError::malformed_bloom_rule(rule))?;
    let tag = match tag_str {
        "vlan" => BloomTag::Vlan,
        "mac" => BloomTag::Mac,
        "ip" => BloomTag::Ip,
        "port" => BloomTag::Port,
        "proto" => BloomTag::Proto,
        _ => return Err(RingtapError::malformed_bloom_rule(rule)),
    };
    let value: u64 = match tag {
        BloomTag::Mac => u64::from_str_radix(value_str.replace(':', "").trim(), 16)
            .map_err(|_| RingtapError::malformed_bloom_rule(rule))?,
        BloomTag::Ip => value_str
            .parse::<std::net::Ipv4Addr>()
            .map(|addr| u32::from(addr) as u64)
            .map_err(|_| RingtapError::malformed_bloom_rule(rule))?,
        _ => value_str
            .parse::<u64>()
            .map_err(|_| RingtapError::malformed_bloom_rule(rule))?,
    };
    Ok(BloomRule { insert, tag, value })
}

/// A capture socket: owns its ring, an optional filter/matcher/reflector,
/// bloom sets, and cluster/sampling state.
pub struct RingOpt {
    /// The backing shared-memory ring.
    pub ring: CaptureRing,
    /// Bound device (weak reference by id; never owns the device).
    pub bound_device: Option<DeviceId>,
    /// Optional reflector device the frame is re-transmitted through.
    pub reflector_device: Option<DeviceId>,
    /// Whether the last reflector transmit attempt for this ring failed, so
    /// the dispatch path only logs the failure once per transition instead
    /// of on every frame.
    pub(crate) reflector_warned: AtomicBool,
    /// Optional installed byte-code filter.
    pub filter: Option<Program>,
    /// Optional attached Aho–Corasick matcher.
    pub matcher: Option<Automaton>,
    /// The seven bloom-style membership sets.
    pub bloom: BloomSets,
    /// `0` means the ring is not a cluster member.
    pub cluster_id: u16,
    /// Which traffic direction this ring accepts.
    pub direction: Direction,
    /// Configured sampling rate; kept in sync with the ring header's copy.
    pub sample_rate: u32,
    sample_countdown: AtomicU32,
    /// Optional poll watermark: a blocking reader is only woken once at
    /// least this many slots are queued.
    pub poll_watermark: Option<usize>,
}

impl RingOpt {
    /// Create a socket with a freshly allocated ring per `config`.
    pub fn new(config: &RuntimeConfig) -> Result<Self> {
        let ring = CaptureRing::new(config)?;
        Ok(Self {
            ring,
            bound_device: None,
            reflector_device: None,
            reflector_warned: AtomicBool::new(false),
            filter: None,
            matcher: None,
            bloom: BloomSets::default(),
            cluster_id: 0,
            direction: Direction::RxOnly,
            sample_rate: config.sample_rate(),
            sample_countdown: AtomicU32::new(config.sample_rate()),
            poll_watermark: None,
        })
    }

    /// Bind to `device`, marking the ring dispatchable.
    pub fn bind(&mut self, device: DeviceId, direction: Direction) {
        self.direction = direction;
        self.bound_device = Some(device);
    }

    /// Apply the sampling decision: decrements the countdown, returns `true`
    /// once every `sample_rate` calls and resets the countdown.
    pub fn sample_tick(&self) -> bool {
        let prev = self.sample_countdown.fetch_update(
            Ordering::Relaxed,
            Ordering::Relaxed,
            |count| Some(if count <= 1 { self.sample_rate } else { count - 1 }),
        );
        matches!(prev, Ok(1))
    }

    /// Install a validated byte-code filter.
    pub fn attach_filter(&mut self, program: Program) {
        self.filter = Some(program);
    }

    /// Remove the installed byte-code filter.
    pub fn detach_filter(&mut self) {
        self.filter = None;
    }

    /// Replace the Aho–Corasick matcher with a freshly compiled one
    /// containing a single banded pattern, per `SET_STRING`.
    pub fn set_string(&mut self, pattern: &str) -> Result<()> {
        let mut automaton = Automaton::new(AutomatonKind::Dfa, RowFormat::Banded);
        automaton.add_pattern(0, pattern.as_bytes(), true)?;
        automaton.compile()?;
        self.matcher = Some(automaton);
        Ok(())
    }

    /// Apply a parsed bloom rule.
    pub fn apply_bloom_rule(&mut self, rule: BloomRule) {
        match (rule.tag, rule.insert) {
            (BloomTag::Vlan, true) => self.bloom.vlan.set(rule.value),
            (BloomTag::Vlan, false) => self.bloom.vlan.clear(rule.value),
            (BloomTag::Mac, true) => self.bloom.mac.set(rule.value),
            (BloomTag::Mac, false) => self.bloom.mac.clear(rule.value),
            (BloomTag::Ip, true) => self.bloom.insert_ip(rule.value as u32),
            (BloomTag::Ip, false) => self.bloom.remove_ip(rule.value as u32),
            (BloomTag::Port, true) => self.bloom.insert_port(rule.value as u16),
            (BloomTag::Port, false) => self.bloom.remove_port(rule.value as u16),
            (BloomTag::Proto, true) => self.bloom.proto.set(rule.value),
            (BloomTag::Proto, false) => self.bloom.proto.clear(rule.value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bloom_rule_vlan() {
        let rule = parse_bloom_rule("+vlan=42").unwrap();
        assert!(rule.insert);
        assert_eq!(rule.tag, BloomTag::Vlan);
        assert_eq!(rule.value, 42);
    }

    #[test]
    fn test_parse_bloom_rule_rejects_unknown_tag() {
        assert!(parse_bloom_rule("+bogus=1").is_err());
    }

    #[test]
    fn test_parse_bloom_rule_rejects_missing_sign() {
        assert!(parse_bloom_rule("vlan=1").is_err());
    }

    #[test]
    fn test_cluster_per_flow_selection_is_deterministic() {
        let mut cluster = Cluster::new(1, HashingMode::PerFlow);
        cluster.join(100).unwrap();
        cluster.join(200).unwrap();
        let a = cluster.select(555);
        let b = cluster.select(555);
        assert_eq!(a, b);
    }

    #[test]
    fn test_cluster_rejects_ninth_member() {
        let mut cluster = Cluster::new(1, HashingMode::RoundRobin);
        for i in 0..MAX_CLUSTER_MEMBERS as u32 {
            cluster.join(i).unwrap();
        }
        assert!(cluster.join(99).is_err());
    }

    #[test]
    fn test_bloom_reset_idempotent() {
        let mut bloom = BloomSets::default();
        bloom.insert_ip(u32::from(std::net::Ipv4Addr::new(10, 0, 0, 1)));
        bloom.reset();
        bloom.reset();
        assert!(!bloom.test_ip(u32::from(std::net::Ipv4Addr::new(10, 0, 0, 1))));
    }
}
