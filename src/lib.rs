//! ringtap — an in-process packet capture ring, dispatch/filter pipeline,
//! and multi-pattern Aho–Corasick matcher.
//!
//! The three core subsystems are [`ring`] (the shared-memory slot buffer),
//! [`dispatch`] (the per-frame filtering and fan-out path, fronted by
//! [`dispatch::CaptureRuntime`]), and [`matcher`] (the Aho–Corasick
//! automaton used as one of the filter stages). [`socket`] ties a ring to
//! its filters, bloom sets, and cluster membership; [`packet`] parses frame
//! headers; [`bitmask`] is the bloom-style set backing bloom filtering;
//! [`filter`] is the byte-code packet filter; [`status`] is the read-only
//! status surface; [`config`] holds the module-parameter equivalents.
//!
//! This crate never attaches to a live network interface: `on_frame` is
//! called by a caller-supplied loop with frame bytes it already has in
//! hand, representing the seam where a real network-stack hook would sit.

pub mod bitmask;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod filter;
pub mod matcher;
pub mod packet;
pub mod ring;
pub mod socket;
pub mod status;
pub mod telemetry;

pub use config::RuntimeConfig;
pub use dispatch::{CaptureRuntime, Frame, FrameDirection};
pub use error::{Result, RingtapError};
pub use ring::{CaptureHeader, CaptureRing, RingStats};
pub use socket::{Cluster, DeviceId, Direction, HashingMode, RingId, RingOpt};
pub use status::{GlobalStatus, RingStatus};

/// Crate version, for inclusion in status output.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_creates_and_binds_a_ring() {
        let runtime = CaptureRuntime::new(RuntimeConfig::new());
        let ring = runtime.create_ring().unwrap();
        runtime.bind(ring, 1, Direction::RxOnly);
        assert_eq!(runtime.global_status().ring_count, 1);
        assert!(runtime.status(ring).is_some());
    }

    #[test]
    fn test_releasing_a_ring_removes_it_from_status() {
        let runtime = CaptureRuntime::new(RuntimeConfig::new());
        let ring = runtime.create_ring().unwrap();
        runtime.release_ring(ring);
        assert!(runtime.status(ring).is_none());
        assert_eq!(runtime.global_status().ring_count, 0);
    }
}
