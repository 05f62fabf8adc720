//! Crate-wide tunables, equivalent to the original's loadable-module parameters.

use crate::error::{Result, RingtapError};

/// Minimum number of slots a ring may be configured with.
pub const MIN_NUM_SLOTS: usize = 8;

/// Maximum number of slots a ring may be configured with.
pub const MAX_NUM_SLOTS: usize = 1 << 20;

/// Default per-slot payload capacity, in bytes.
pub const DEFAULT_BUCKET_LEN: usize = 2048;

/// Default slot count.
pub const DEFAULT_NUM_SLOTS: usize = 4096;

/// Builder-validated runtime configuration, the equivalent of the original
/// module parameters (`bucket_len`, `num_slots`, `sample_rate`,
/// `transparent_mode`, `enable_tx_capture`) collected into one value instead
/// of free-standing globals.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    bucket_len: usize,
    num_slots: usize,
    sample_rate: u32,
    transparent_mode: bool,
    enable_tx_capture: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            bucket_len: DEFAULT_BUCKET_LEN,
            num_slots: DEFAULT_NUM_SLOTS,
            sample_rate: 1,
            transparent_mode: false,
            enable_tx_capture: true,
        }
    }
}

impl RuntimeConfig {
    /// Start building a configuration from defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-slot payload capacity in bytes. Must be non-zero.
    pub fn with_bucket_len(mut self, bucket_len: usize) -> Result<Self> {
        if bucket_len == 0 {
            return Err(RingtapError::config("bucket_len must be non-zero"));
        }
        self.bucket_len = bucket_len;
        Ok(self)
    }

    /// Set the number of slots in the ring. Must be a power of two within
    /// `[MIN_NUM_SLOTS, MAX_NUM_SLOTS]`, since the ring uses a mask-based
    /// index wrap.
    pub fn with_num_slots(mut self, num_slots: usize) -> Result<Self> {
        if !num_slots.is_power_of_two() {
            return Err(RingtapError::config("num_slots must be a power of two"));
        }
        if !(MIN_NUM_SLOTS..=MAX_NUM_SLOTS).contains(&num_slots) {
            return Err(RingtapError::config(format!(
                "num_slots must be between {} and {}",
                MIN_NUM_SLOTS, MAX_NUM_SLOTS
            )));
        }
        self.num_slots = num_slots;
        Ok(self)
    }

    /// Set the sampling rate: 1 keeps every packet, N keeps 1 in N. Must be
    /// at least 1.
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Result<Self> {
        if sample_rate == 0 {
            return Err(RingtapError::config("sample_rate must be at least 1"));
        }
        self.sample_rate = sample_rate;
        Ok(self)
    }

    /// Enable or disable transparent mode (bypass filtering, copy raw frames).
    pub fn with_transparent_mode(mut self, transparent: bool) -> Self {
        self.transparent_mode = transparent;
        self
    }

    /// Enable or disable global transmit-path capture.
    pub fn with_enable_tx_capture(mut self, enable: bool) -> Self {
        self.enable_tx_capture = enable;
        self
    }

    /// Per-slot payload capacity in bytes.
    pub fn bucket_len(&self) -> usize {
        self.bucket_len
    }

    /// Number of slots in the ring.
    pub fn num_slots(&self) -> usize {
        self.num_slots
    }

    /// Sampling rate: keep 1 packet in every `sample_rate`.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Whether transparent mode is enabled.
    pub fn transparent_mode(&self) -> bool {
        self.transparent_mode
    }

    /// Whether transmit-path capture is globally enabled.
    pub fn enable_tx_capture(&self) -> bool {
        self.enable_tx_capture
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = RuntimeConfig::new();
        assert_eq!(cfg.bucket_len(), DEFAULT_BUCKET_LEN);
        assert_eq!(cfg.num_slots(), DEFAULT_NUM_SLOTS);
        assert_eq!(cfg.sample_rate(), 1);
    }

    #[test]
    fn test_rejects_non_power_of_two() {
        let result = RuntimeConfig::new().with_num_slots(100);
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_zero_sample_rate() {
        let result = RuntimeConfig::new().with_sample_rate(0);
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_chain() {
        let cfg = RuntimeConfig::new()
            .with_bucket_len(1024)
            .unwrap()
            .with_num_slots(16384)
            .unwrap()
            .with_sample_rate(4)
            .unwrap()
            .with_transparent_mode(true)
            .with_enable_tx_capture(false);
        assert_eq!(cfg.bucket_len(), 1024);
        assert_eq!(cfg.num_slots(), 16384);
        assert_eq!(cfg.sample_rate(), 4);
        assert!(cfg.transparent_mode());
        assert!(!cfg.enable_tx_capture());
    }
}
