//! Shared-memory capture ring: a page-aligned region holding a header
//! followed by N fixed-size slots, single-producer/single-consumer.
//!
//! The backing storage is an anonymous `mmap`'d region (mirroring the raw
//! `libc::mmap` use in a page-locked ring buffer) so that pages can be
//! marked non-swappable at bind time; the header and slot array are laid
//! out directly inside it and accessed through volatile reads/writes,
//! exactly as a cross-address-space ring would, even though in this crate
//! producer and consumer share one process.

use crate::config::RuntimeConfig;
use crate::error::{Result, RingtapError};
use parking_lot::{Condvar, Mutex};
use std::mem::size_of;
use std::ptr;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::time::Duration;

/// Maximum payload capacity a slot may be configured with.
pub const MAX_BUCKET_LEN: usize = 9000;

/// Page size assumed for mmap-region validation. The actual anonymous
/// mapping is always rounded up to the real OS page size by the kernel;
/// this is the value external "mmap into userland" requests are checked
/// against.
pub const PAGE_SIZE: usize = 4096;

const SLOT_EMPTY: u8 = 0;
const SLOT_FULL: u8 = 1;

/// Extended `pcap_pkthdr`: the original capture header plus the parsed
/// fields a reader needs without re-parsing the frame.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct CaptureHeader {
    /// Number of payload bytes actually captured.
    pub caplen: u32,
    /// Original frame length on the wire.
    pub len: u32,
    /// Capture timestamp, seconds.
    pub timestamp_sec: u64,
    /// Capture timestamp, microseconds.
    pub timestamp_usec: u64,
    /// 802.1Q VLAN id, or [`crate::packet::NO_VLAN`] if untagged.
    pub vlan_id: u16,
    /// Ethertype after VLAN tag removal.
    pub eth_type: u16,
    /// IP protocol number.
    pub l3_proto: u8,
    /// Byte offset of the L3 header.
    pub l3_offset: u16,
    /// Byte offset of the L4 header.
    pub l4_offset: u16,
    /// Source IPv4 address, host byte order.
    pub ipv4_src: u32,
    /// Destination IPv4 address, host byte order.
    pub ipv4_dst: u32,
    /// L4 source port, host byte order.
    pub l4_src_port: u16,
    /// L4 destination port, host byte order.
    pub l4_dst_port: u16,
    /// Byte offset of the start of the application payload.
    pub payload_offset: u16,
}

#[repr(align(64))]
struct PaddedCounter(AtomicU64);

impl PaddedCounter {
    const fn new(v: u64) -> Self {
        Self(AtomicU64::new(v))
    }
}

/// Ring-wide header: `FlowSlotInfo` in the original's terms. Cache-line
/// padded per counter so producer and consumer writes don't false-share.
#[repr(C)]
struct FlowSlotInfo {
    version: u32,
    slot_len: u32,
    data_len: u32,
    tot_slots: u32,
    tot_mem: u64,
    sample_rate: AtomicU32,
    insert_idx: PaddedCounter,
    remove_idx: PaddedCounter,
    tot_pkts: PaddedCounter,
    tot_lost: PaddedCounter,
    tot_insert: PaddedCounter,
    tot_read: PaddedCounter,
}

const RING_VERSION: u32 = 1;

/// Point-in-time snapshot of a ring's counters, used by the status surface.
#[derive(Debug, Clone, Copy)]
pub struct RingStats {
    /// Header format version.
    pub version: u32,
    /// Configured per-slot payload capacity.
    pub data_len: u32,
    /// Total slot count.
    pub tot_slots: u32,
    /// Total slot size in bytes, including state byte and header.
    pub slot_len: u32,
    /// Total backing region size in bytes.
    pub tot_mem: u64,
    /// Current sampling rate.
    pub sample_rate: u32,
    /// Total frames offered to this ring.
    pub tot_pkts: u64,
    /// Total frames dropped due to overrun.
    pub tot_lost: u64,
    /// Total frames successfully enqueued.
    pub tot_insert: u64,
    /// Total frames dequeued by the reader.
    pub tot_read: u64,
    /// Current producer index.
    pub insert_idx: u64,
    /// Current consumer index.
    pub remove_idx: u64,
}

impl RingStats {
    /// Number of frames currently queued and unread. Computed with wrapping
    /// subtraction: at realistic packet rates the counters never actually
    /// wrap, but the arithmetic is intentionally modular rather than
    /// saturating, matching the original accounting identity.
    pub fn queued(&self) -> u64 {
        self.tot_insert.wrapping_sub(self.tot_read)
    }
}

/// A single-producer/single-consumer capture ring.
pub struct CaptureRing {
    region: memmap2::MmapMut,
    header_offset: usize,
    slots_offset: usize,
    slot_len: usize,
    bucket_len: usize,
    num_slots: usize,
    index_lock: Mutex<()>,
    wait_lock: Mutex<()>,
    wait_cond: Condvar,
    waiters: AtomicUsize,
    watermark: AtomicUsize,
}

// The ring is explicitly designed for one producer thread and one consumer
// thread to share `&CaptureRing` across a thread boundary; all mutation
// goes through atomics or the index lock.
unsafe impl Send for CaptureRing {}
unsafe impl Sync for CaptureRing {}

impl CaptureRing {
    /// Allocate and initialize a ring area sized by `config`'s `bucket_len`
    /// and `num_slots`, and lock its pages against swap.
    pub fn new(config: &RuntimeConfig) -> Result<Self> {
        let bucket_len = config.bucket_len();
        if bucket_len > MAX_BUCKET_LEN {
            return Err(RingtapError::config(format!(
                "bucket_len {} exceeds maximum {}",
                bucket_len, MAX_BUCKET_LEN
            )));
        }
        let num_slots = config.num_slots();

        let header_len = size_of::<FlowSlotInfo>();
        let per_slot = 1 + size_of::<CaptureHeader>() + bucket_len;
        let tot_mem = header_len + per_slot * num_slots;

        let mut region = memmap2::MmapOptions::new().len(tot_mem).map_anon()?;
        region.lock()?;

        let header = FlowSlotInfo {
            version: RING_VERSION,
            slot_len: per_slot as u32,
            data_len: bucket_len as u32,
            tot_slots: num_slots as u32,
            tot_mem: tot_mem as u64,
            sample_rate: AtomicU32::new(config.sample_rate()),
            insert_idx: PaddedCounter::new(0),
            remove_idx: PaddedCounter::new(0),
            tot_pkts: PaddedCounter::new(0),
            tot_lost: PaddedCounter::new(0),
            tot_insert: PaddedCounter::new(0),
            tot_read: PaddedCounter::new(0),
        };

        unsafe {
            ptr::write(region.as_mut_ptr() as *mut FlowSlotInfo, header);
            ptr::write_bytes(region.as_mut_ptr().add(header_len), 0, tot_mem - header_len);
        }

        Ok(Self {
            region,
            header_offset: 0,
            slots_offset: header_len,
            slot_len: per_slot,
            bucket_len,
            num_slots,
            index_lock: Mutex::new(()),
            wait_lock: Mutex::new(()),
            wait_cond: Condvar::new(),
            waiters: AtomicUsize::new(0),
            watermark: AtomicUsize::new(1),
        })
    }

    fn header(&self) -> &FlowSlotInfo {
        unsafe { &*(self.region.as_ptr().add(self.header_offset) as *const FlowSlotInfo) }
    }

    fn slot_state_ptr(&self, idx: usize) -> *const AtomicU8 {
        let offset = self.slots_offset + idx * self.slot_len;
        unsafe { self.region.as_ptr().add(offset) as *const AtomicU8 }
    }

    fn slot_header_ptr(&self, idx: usize) -> *mut CaptureHeader {
        let offset = self.slots_offset + idx * self.slot_len + 1;
        unsafe { self.region.as_ptr().add(offset) as *mut CaptureHeader }
    }

    fn slot_payload_ptr(&self, idx: usize) -> *mut u8 {
        let offset = self.slots_offset + idx * self.slot_len + 1 + size_of::<CaptureHeader>();
        unsafe { self.region.as_ptr().add(offset) as *mut u8 }
    }

    /// Configured number of slots.
    pub fn num_slots(&self) -> usize {
        self.num_slots
    }

    /// Configured per-slot payload capacity.
    pub fn bucket_len(&self) -> usize {
        self.bucket_len
    }

    /// Validate an external mmap request against this ring's backing
    /// region, per spec §6 "Mmap": the requested length must be a whole
    /// number of pages and must not exceed `tot_mem`. On success, returns
    /// the region bytes a userland mapping would be granted read-write
    /// access to (this crate maps producer and consumer into the same
    /// process, so the returned slice aliases `self.region` rather than a
    /// genuinely separate address-space mapping).
    pub fn mmap_view(&self, requested_len: usize) -> Result<&[u8]> {
        if requested_len % PAGE_SIZE != 0 {
            return Err(RingtapError::config(
                "mmap length must be a multiple of the page size",
            ));
        }
        if requested_len > self.region.len() {
            return Err(RingtapError::config(
                "mmap length exceeds the ring's backing region",
            ));
        }
        Ok(&self.region[..requested_len])
    }

    /// Set the wait-queue watermark: blocking readers are only woken once
    /// at least this many slots are queued.
    pub fn set_watermark(&self, watermark: usize) {
        self.watermark.store(watermark.max(1), Ordering::Relaxed);
    }

    /// Attempt to enqueue one frame. Returns `false` (and increments
    /// `tot_lost`) if the ring is full; this is never surfaced as an error.
    pub fn try_produce(&self, header: CaptureHeader, payload: &[u8]) -> bool {
        let _guard = self.index_lock.lock();
        let hdr = self.header();
        hdr.tot_pkts.0.fetch_add(1, Ordering::Relaxed);

        let insert_idx = hdr.insert_idx.0.load(Ordering::Relaxed) as usize;
        let state = unsafe { &*self.slot_state_ptr(insert_idx) };

        if state.load(Ordering::Acquire) != SLOT_EMPTY {
            hdr.tot_lost.0.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let caplen = payload.len().min(self.bucket_len);
        unsafe {
            ptr::write(self.slot_header_ptr(insert_idx), header);
            ptr::copy_nonoverlapping(
                payload.as_ptr(),
                self.slot_payload_ptr(insert_idx),
                caplen,
            );
        }

        state.store(SLOT_FULL, Ordering::Release);
        let next = ((insert_idx + 1) % self.num_slots) as u64;
        hdr.insert_idx.0.store(next, Ordering::Relaxed);
        hdr.tot_insert.0.fetch_add(1, Ordering::Relaxed);
        drop(_guard);

        if self.waiters.load(Ordering::Relaxed) > 0 {
            let queued = hdr
                .tot_insert
                .0
                .load(Ordering::Relaxed)
                .wrapping_sub(hdr.tot_read.0.load(Ordering::Relaxed));
            if queued as usize >= self.watermark.load(Ordering::Relaxed) {
                let _guard = self.wait_lock.lock();
                self.wait_cond.notify_all();
            }
        }
        true
    }

    /// Attempt to dequeue one frame, invoking `f` with a reference to its
    /// header and payload bytes. Returns `false` if no frame is ready.
    pub fn try_consume<F: FnOnce(&CaptureHeader, &[u8])>(&self, f: F) -> bool {
        let hdr = self.header();
        let remove_idx = hdr.remove_idx.0.load(Ordering::Relaxed) as usize;
        let state = unsafe { &*self.slot_state_ptr(remove_idx) };

        if state.load(Ordering::Acquire) != SLOT_FULL {
            return false;
        }

        unsafe {
            let header = &*self.slot_header_ptr(remove_idx);
            let payload =
                std::slice::from_raw_parts(self.slot_payload_ptr(remove_idx), header.caplen as usize);
            f(header, payload);
        }

        state.store(SLOT_EMPTY, Ordering::Release);
        let next = ((remove_idx + 1) % self.num_slots) as u64;
        hdr.remove_idx.0.store(next, Ordering::Relaxed);
        hdr.tot_read.0.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Block the calling thread until a frame is available or `timeout`
    /// elapses. Returns `true` if a frame looks ready. Cancellable in spirit
    /// by the caller dropping the wait early (e.g. on a shutdown signal).
    pub fn wait_readable(&self, timeout: Duration) -> bool {
        self.waiters.fetch_add(1, Ordering::Relaxed);
        let mut guard = self.wait_lock.lock();
        let result = self.wait_cond.wait_for(&mut guard, timeout);
        self.waiters.fetch_sub(1, Ordering::Relaxed);
        !result.timed_out()
    }

    /// Snapshot the ring's counters for the status surface.
    pub fn stats(&self) -> RingStats {
        let hdr = self.header();
        RingStats {
            version: hdr.version,
            data_len: hdr.data_len,
            tot_slots: hdr.tot_slots,
            slot_len: hdr.slot_len,
            tot_mem: hdr.tot_mem,
            sample_rate: hdr.sample_rate.load(Ordering::Relaxed),
            tot_pkts: hdr.tot_pkts.0.load(Ordering::Relaxed),
            tot_lost: hdr.tot_lost.0.load(Ordering::Relaxed),
            tot_insert: hdr.tot_insert.0.load(Ordering::Relaxed),
            tot_read: hdr.tot_read.0.load(Ordering::Relaxed),
            insert_idx: hdr.insert_idx.0.load(Ordering::Relaxed),
            remove_idx: hdr.remove_idx.0.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring(num_slots: usize) -> CaptureRing {
        let config = RuntimeConfig::new()
            .with_num_slots(num_slots)
            .unwrap()
            .with_bucket_len(64)
            .unwrap();
        CaptureRing::new(&config).unwrap()
    }

    #[test]
    fn test_roundtrip_header_and_payload() {
        let ring = ring(8);
        let header = CaptureHeader {
            caplen: 4,
            len: 4,
            ..Default::default()
        };
        assert!(ring.try_produce(header, b"ping"));
        let mut seen = Vec::new();
        assert!(ring.try_consume(|_hdr, payload| seen.extend_from_slice(payload)));
        assert_eq!(seen, b"ping");
    }

    #[test]
    fn test_overrun_accounting() {
        let ring = ring(4);
        let header = CaptureHeader::default();
        for _ in 0..6 {
            ring.try_produce(header, b"x");
        }
        let stats = ring.stats();
        assert_eq!(stats.tot_pkts, 6);
        assert_eq!(stats.tot_insert, 4);
        assert_eq!(stats.tot_lost, 2);
        assert_eq!(stats.insert_idx, 0);
    }

    #[test]
    fn test_fifo_order_preserved() {
        let ring = ring(8);
        for i in 0..5u8 {
            ring.try_produce(CaptureHeader::default(), &[i]);
        }
        let mut order = Vec::new();
        while ring.try_consume(|_, payload| order.push(payload[0])) {}
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_consume_empty_ring_returns_false() {
        let ring = ring(4);
        assert!(!ring.try_consume(|_, _| {}));
    }

    fn big_ring() -> CaptureRing {
        let config = RuntimeConfig::new()
            .with_num_slots(64)
            .unwrap()
            .with_bucket_len(2048)
            .unwrap();
        CaptureRing::new(&config).unwrap()
    }

    #[test]
    fn test_mmap_view_rejects_non_page_multiple() {
        let ring = big_ring();
        assert!(ring.mmap_view(PAGE_SIZE + 1).is_err());
    }

    #[test]
    fn test_mmap_view_rejects_oversized_request() {
        let ring = big_ring();
        let region_len = ring.region.len();
        let oversized = region_len.div_ceil(PAGE_SIZE) * PAGE_SIZE + PAGE_SIZE;
        assert!(ring.mmap_view(oversized).is_err());
    }

    #[test]
    fn test_mmap_view_accepts_page_aligned_request() {
        let ring = big_ring();
        assert!(ring.mmap_view(PAGE_SIZE).is_ok());
    }
}
