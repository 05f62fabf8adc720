//! Process-visible, read-only textual status surface: per-ring counters
//! plus a global view of module parameters and ring count.

use crate::config::RuntimeConfig;
use crate::ring::RingStats;
use crate::socket::{DeviceId, Direction, RingId};
use std::fmt;

/// Everything a status reader needs about one ring.
#[derive(Debug, Clone, Copy)]
pub struct RingStatus {
    /// Ring identifier within its runtime.
    pub ring: RingId,
    /// Bound device, if any.
    pub bound_device: Option<DeviceId>,
    /// `0` if not a cluster member.
    pub cluster_id: u16,
    /// Which traffic direction this ring accepts.
    pub direction: Direction,
    /// Snapshot of the ring's own counters.
    pub stats: RingStats,
}

impl fmt::Display for RingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ring={} version={} device={:?} cluster={} sample_rate={} \
             tot_slots={} slot_len={} data_len={} tot_mem={} \
             tot_pkts={} tot_lost={} tot_insert={} tot_read={}",
            self.ring,
            self.stats.version,
            self.bound_device,
            self.cluster_id,
            self.stats.sample_rate,
            self.stats.tot_slots,
            self.stats.slot_len,
            self.stats.data_len,
            self.stats.tot_mem,
            self.stats.tot_pkts,
            self.stats.tot_lost,
            self.stats.tot_insert,
            self.stats.tot_read,
        )
    }
}

/// Global status: module parameters and the number of live rings.
#[derive(Debug, Clone)]
pub struct GlobalStatus {
    /// Module-parameter defaults this runtime was created with.
    pub config: RuntimeConfig,
    /// Number of rings currently known to the runtime.
    pub ring_count: usize,
}

impl fmt::Display for GlobalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rings={} bucket_len={} num_slots={} sample_rate={} \
             transparent_mode={} enable_tx_capture={}",
            self.ring_count,
            self.config.bucket_len(),
            self.config.num_slots(),
            self.config.sample_rate(),
            self.config.transparent_mode(),
            self.config.enable_tx_capture(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::CaptureRing;

    #[test]
    fn test_ring_status_display() {
        let config = RuntimeConfig::new();
        let ring = CaptureRing::new(&config).unwrap();
        let status = RingStatus {
            ring: 1,
            bound_device: Some(7),
            cluster_id: 0,
            direction: Direction::RxOnly,
            stats: ring.stats(),
        };
        let text = status.to_string();
        assert!(text.contains("ring=1"));
        assert!(text.contains("device=Some(7)"));
    }

    #[test]
    fn test_global_status_display() {
        let status = GlobalStatus {
            config: RuntimeConfig::new(),
            ring_count: 3,
        };
        assert!(status.to_string().contains("rings=3"));
    }
}
