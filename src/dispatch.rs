//! Dispatch pipeline: the per-frame path that selects candidate rings,
//! applies per-ring filters, and enqueues, reflects, or drops each frame.

use crate::config::RuntimeConfig;
use crate::packet;
use crate::ring::CaptureHeader;
use crate::socket::{Cluster, DeviceId, Direction, RingId, RingOpt};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, trace, warn};

const HTTP_PORT: u16 = 80;

/// Which way a frame was moving when it was captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDirection {
    /// Received on the interface.
    Rx,
    /// Transmitted on the interface.
    Tx,
}

/// Collaborator seam for `SET_REFLECTOR`: actually retransmits a frame on a
/// device. Without one installed, reflection always falls through to normal
/// enqueue.
pub trait ReflectorTransmit: Send + Sync {
    /// Attempt to transmit `bytes` out `device`. Returns whether the
    /// transmit succeeded; on success the frame is consumed and not
    /// enqueued.
    fn transmit(&self, device: DeviceId, bytes: &[u8]) -> bool;
}

/// A captured frame as handed to the dispatch pipeline.
pub struct Frame<'a> {
    /// The device the frame was seen on.
    pub device: DeviceId,
    /// Raw frame bytes.
    pub bytes: &'a [u8],
    /// Whether this is an RX or TX observation.
    pub direction: FrameDirection,
    /// Whether the frame originated from the real network-stack path (as
    /// opposed to a synthetic buffer-only path).
    pub real: bool,
}

/// Owns the global ring and cluster tables, replacing the original's
/// free-standing kernel globals with a value threaded through every
/// dispatch call.
pub struct CaptureRuntime {
    config: RuntimeConfig,
    management: RwLock<Management>,
    reflector_transmit: RwLock<Option<Arc<dyn ReflectorTransmit>>>,
}

struct Management {
    rings: HashMap<RingId, RingOpt>,
    clusters: HashMap<u16, Cluster>,
    next_ring_id: RingId,
}

impl CaptureRuntime {
    /// Create a runtime with the given module-parameter defaults.
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            management: RwLock::new(Management {
                rings: HashMap::new(),
                clusters: HashMap::new(),
                next_ring_id: 1,
            }),
            reflector_transmit: RwLock::new(None),
        }
    }

    /// The module-parameter defaults this runtime was created with.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Install the collaborator used to actually retransmit reflected
    /// frames. Without one, `SET_REFLECTOR` is accepted but reflection
    /// always falls through to normal enqueue.
    pub fn set_reflector_transmit(&self, transmit: Arc<dyn ReflectorTransmit>) {
        *self.reflector_transmit.write() = Some(transmit);
    }

    /// Create a new ring socket, not yet bound to any device.
    pub fn create_ring(&self) -> crate::error::Result<RingId> {
        let ring = RingOpt::new(&self.config)?;
        let mut mgmt = self.management.write();
        let id = mgmt.next_ring_id;
        mgmt.next_ring_id += 1;
        mgmt.rings.insert(id, ring);
        Ok(id)
    }

    /// Bind `ring` to `device`, making it dispatchable.
    pub fn bind(&self, ring: RingId, device: DeviceId, direction: Direction) {
        let mut mgmt = self.management.write();
        if let Some(opt) = mgmt.rings.get_mut(&ring) {
            opt.bind(device, direction);
            debug!(ring, device, "ring bound");
        }
    }

    /// Join `ring` to `cluster_id`, creating the cluster on first member.
    pub fn add_to_cluster(
        &self,
        ring: RingId,
        cluster_id: u16,
        hashing_mode: crate::socket::HashingMode,
    ) -> crate::error::Result<()> {
        let mut mgmt = self.management.write();
        mgmt.clusters
            .entry(cluster_id)
            .or_insert_with(|| Cluster::new(cluster_id, hashing_mode))
            .join(ring)?;
        if let Some(opt) = mgmt.rings.get_mut(&ring) {
            opt.cluster_id = cluster_id;
        }
        Ok(())
    }

    /// Remove `ring` from its cluster, destroying the cluster if it becomes
    /// empty.
    pub fn remove_from_cluster(&self, ring: RingId) {
        let mut mgmt = self.management.write();
        let cluster_id = mgmt.rings.get(&ring).map(|r| r.cluster_id).unwrap_or(0);
        if cluster_id == 0 {
            return;
        }
        if let Some(cluster) = mgmt.clusters.get_mut(&cluster_id) {
            cluster.leave(ring);
            if cluster.is_empty() {
                mgmt.clusters.remove(&cluster_id);
            }
        }
        if let Some(opt) = mgmt.rings.get_mut(&ring) {
            opt.cluster_id = 0;
        }
    }

    /// Release `ring`, removing it from the dispatch table and freeing its
    /// filter, bloom sets, and matcher.
    pub fn release_ring(&self, ring: RingId) {
        self.remove_from_cluster(ring);
        self.management.write().rings.remove(&ring);
    }

    /// `ATTACH_FILTER`: validate and install a byte-code program. Validation
    /// failure leaves the ring's existing filter state untouched and
    /// surfaces `EINVAL`-equivalent, per spec §9's resolution of the
    /// original's permissive-return behavior.
    pub fn attach_filter(
        &self,
        ring: RingId,
        instructions: Vec<crate::filter::Instruction>,
    ) -> crate::error::Result<()> {
        let program = crate::filter::Program::new(instructions)?;
        let mut mgmt = self.management.write();
        let opt = mgmt
            .rings
            .get_mut(&ring)
            .ok_or_else(|| crate::error::RingtapError::config("unknown ring"))?;
        opt.attach_filter(program);
        Ok(())
    }

    /// `DETACH_FILTER`: free and clear the installed filter, if any.
    pub fn detach_filter(&self, ring: RingId) {
        if let Some(opt) = self.management.write().rings.get_mut(&ring) {
            opt.detach_filter();
        }
    }

    /// `SET_REFLECTOR`: set the device frames are reflected through before
    /// (or instead of) being enqueued.
    pub fn set_reflector(&self, ring: RingId, device: DeviceId) {
        if let Some(opt) = self.management.write().rings.get_mut(&ring) {
            opt.reflector_device = Some(device);
        }
    }

    /// `SET_BLOOM`: parse and apply one `"+tag=value"` / `"-tag=value"` rule.
    pub fn set_bloom(&self, ring: RingId, rule: &str) -> crate::error::Result<()> {
        let parsed = crate::socket::parse_bloom_rule(rule).inspect_err(|_| {
            warn!(rule, "malformed bloom rule");
        })?;
        let mut mgmt = self.management.write();
        let opt = mgmt
            .rings
            .get_mut(&ring)
            .ok_or_else(|| crate::error::RingtapError::config("unknown ring"))?;
        opt.apply_bloom_rule(parsed);
        Ok(())
    }

    /// `TOGGLE_BLOOM_STATE`: enable or disable the bloom filtering stage.
    pub fn toggle_bloom_state(&self, ring: RingId, enabled: bool) {
        if let Some(opt) = self.management.write().rings.get_mut(&ring) {
            opt.bloom.enabled = enabled;
        }
    }

    /// `RESET_BLOOM_FILTERS`: clear all seven sets and their collision
    /// lists. Idempotent.
    pub fn reset_bloom_filters(&self, ring: RingId) {
        if let Some(opt) = self.management.write().rings.get_mut(&ring) {
            opt.bloom.reset();
        }
    }

    /// `SET_STRING`: replace the attached Aho–Corasick matcher with a freshly
    /// compiled single-pattern (banded) machine.
    pub fn set_string(&self, ring: RingId, pattern: &str) -> crate::error::Result<()> {
        let mut mgmt = self.management.write();
        let opt = mgmt
            .rings
            .get_mut(&ring)
            .ok_or_else(|| crate::error::RingtapError::config("unknown ring"))?;
        opt.set_string(pattern)
    }

    /// Per-ring status surface: everything `ring_proc_info` reports.
    pub fn status(&self, ring: RingId) -> Option<crate::status::RingStatus> {
        let mgmt = self.management.read();
        let opt = mgmt.rings.get(&ring)?;
        Some(crate::status::RingStatus {
            ring,
            bound_device: opt.bound_device,
            cluster_id: opt.cluster_id,
            direction: opt.direction,
            stats: opt.ring.stats(),
        })
    }

    /// Global status surface: module-parameter defaults and live ring count.
    pub fn global_status(&self) -> crate::status::GlobalStatus {
        let mgmt = self.management.read();
        crate::status::GlobalStatus {
            config: self.config.clone(),
            ring_count: mgmt.rings.len(),
        }
    }

    /// Synthesize a lightweight frame descriptor from a raw buffer and
    /// dispatch it, for callers without a full device/stack frame object.
    pub fn on_raw_buffer(&self, device: DeviceId, bytes: &[u8]) -> bool {
        self.on_frame(&Frame {
            device,
            bytes,
            direction: FrameDirection::Rx,
            real: false,
        })
    }

    /// Dispatch one captured frame. Returns whether the frame was consumed
    /// (opaque mode, at least one ring accepted it, and it came from the
    /// real stack path).
    pub fn on_frame(&self, frame: &Frame<'_>) -> bool {
        if !self.config.enable_tx_capture() && frame.direction == FrameDirection::Tx {
            trace!("tx capture disabled, dropping outgoing frame");
            return false;
        }

        let mgmt = self.management.read();
        let reflector_transmit = self.reflector_transmit.read();
        let reflector_transmit = reflector_transmit.as_deref();
        let mut accepted = false;

        for (&id, opt) in mgmt.rings.iter() {
            if opt.cluster_id != 0 {
                continue;
            }
            if opt.bound_device != Some(frame.device) {
                continue;
            }
            if !direction_allowed(opt.direction, frame.direction) {
                continue;
            }
            if enqueue(opt, frame.bytes, reflector_transmit) {
                accepted = true;
            }
            let _ = id;
        }

        for cluster in mgmt.clusters.values() {
            let headers = packet::parse(frame.bytes);
            let flow_key = if headers.l4_offset != 0 {
                headers.ipv4_src as u64
                    + headers.ipv4_dst as u64
                    + headers.l3_proto as u64
                    + headers.l4_src_port as u64
                    + headers.l4_dst_port as u64
            } else {
                frame.bytes.len() as u64
            };
            if let Some(member) = cluster.select(flow_key) {
                if let Some(opt) = mgmt.rings.get(&member) {
                    if opt.bound_device == Some(frame.device)
                        && direction_allowed(opt.direction, frame.direction)
                        && enqueue(opt, frame.bytes, reflector_transmit)
                    {
                        accepted = true;
                    }
                }
            }
        }

        if !self.config.transparent_mode() && accepted && frame.real {
            return true;
        }
        false
    }
}

fn direction_allowed(ring_direction: Direction, frame_direction: FrameDirection) -> bool {
    match (ring_direction, frame_direction) {
        (Direction::RxAndTx, _) => true,
        (Direction::RxOnly, FrameDirection::Rx) => true,
        (Direction::TxOnly, FrameDirection::Tx) => true,
        _ => false,
    }
}

/// Run one ring's filter stages over `bytes` and enqueue on success.
fn enqueue(opt: &RingOpt, bytes: &[u8], reflector_transmit: Option<&dyn ReflectorTransmit>) -> bool {
    if let Some(program) = &opt.filter {
        if program.run(bytes) == 0 {
            return false;
        }
    }

    if !opt.sample_tick() {
        return false;
    }

    if let Some(device) = opt.reflector_device {
        let transmitted = reflector_transmit
            .map(|t| t.transmit(device, bytes))
            .unwrap_or(false);
        if transmitted {
            opt.reflector_warned.store(false, Ordering::Relaxed);
            return true;
        }
        if !opt.reflector_warned.swap(true, Ordering::Relaxed) {
            warn!(device, "reflector transmit failed, falling through to normal enqueue");
        }
    }

    let headers = packet::parse(bytes);

    if opt.bloom.enabled {
        let vlan_ok = headers.vlan_id == packet::NO_VLAN || opt.bloom.vlan.test(headers.vlan_id as u64);
        if !vlan_ok {
            return false;
        }
        let member_ok = opt.bloom.mac.test(headers.eth_src_mac)
            || opt.bloom.mac.test(headers.eth_dst_mac)
            || opt.bloom.test_ip(headers.ipv4_src)
            || opt.bloom.test_ip(headers.ipv4_dst)
            || opt.bloom.test_port(headers.l4_src_port)
            || opt.bloom.test_port(headers.l4_dst_port)
            || opt.bloom.proto.test(headers.l3_proto as u64);
        if !member_ok {
            return false;
        }
    }

    if let Some(matcher) = &opt.matcher {
        let is_http = headers.l4_src_port == HTTP_PORT || headers.l4_dst_port == HTTP_PORT;
        let payload_start = headers.payload_offset as usize;
        if is_http && payload_start < bytes.len() {
            let payload = &bytes[payload_start..];
            let mut matched = false;
            let _ = matcher.search(payload, |_id, _pos| {
                matched = true;
                true
            });
            if !matched {
                return false;
            }
        } else if is_http {
            return false;
        }
    }

    let caplen = bytes.len().min(opt.ring.bucket_len());
    let header = CaptureHeader {
        caplen: caplen as u32,
        len: bytes.len() as u32,
        vlan_id: headers.vlan_id,
        eth_type: headers.eth_type,
        l3_proto: headers.l3_proto,
        l3_offset: headers.l3_offset,
        l4_offset: headers.l4_offset,
        ipv4_src: headers.ipv4_src,
        ipv4_dst: headers.ipv4_dst,
        l4_src_port: headers.l4_src_port,
        l4_dst_port: headers.l4_dst_port,
        payload_offset: headers.payload_offset,
        ..Default::default()
    };
    opt.ring.try_produce(header, &bytes[..caplen])
}
